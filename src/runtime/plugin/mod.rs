/*
 *  runtime/plugin/mod.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Dynamic plugin system for hardware backends
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

//! Dynamic plugin system for hardware backends
//!
//! Backends ship as shared libraries exporting `opae_plugin_configure`.
//!
//! ## Architecture
//!
//! 1. **FFI Layer** (`ffi.rs`) - C ABI types for the plugin interface
//! 2. **Loader** (`loader.rs`) - opens libraries and runs configure
//! 3. **Adapter** (`adapter.rs`) - presents a vtable as a `Backend`
//!
//! ## Plugin Discovery
//!
//! A bare library name is tried with each prefix in turn:
//!
//! 1. the dynamic linker's search path
//! 2. `./target/release/` (development)
//! 3. `/usr/local/lib/opae/`, `/usr/local/lib64/opae/`
//! 4. `/usr/lib/opae/`, `/usr/lib64/opae/`

pub mod adapter;
pub mod ffi;
pub mod loader;

pub use adapter::PluginBackend;
pub use ffi::{FpgaResult, OpaeAdapterVTable, OpaeProperties};
pub use loader::{LoadedPlugin, PluginLoader};
