/*
 *  lib.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Library root
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

//! Plugin dispatch and resource ownership runtime for FPGA devices.
//!
//! Backends are registered with an [`runtime::AdapterRegistry`], either
//! loaded as shared libraries or supplied in-process. Devices are found
//! with an [`runtime::Enumerator`], and every operation on the resulting
//! tokens and handles is routed to the backend that produced them.

pub mod config;
pub mod logging;
pub mod runtime;

pub use runtime::{AdapterRegistry, FpgaError, Handle, Properties, Result, Token};
