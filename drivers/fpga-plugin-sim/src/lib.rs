/*
 *  fpga-shell simulated card plugin
 *
 *  A dynamic backend for fpga-shell that models an FPGA card in memory,
 *  so the runtime can be exercised without hardware.
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 */

//! # fpga-shell Simulated Card Plugin
//!
//! The card carries one FPGA management engine (a device object) and one
//! port accelerator. With `children` set, the port's feature header lists
//! that many child ports, each also enumerable as an accelerator.
//!
//! ## Model
//!
//! - 4 KiB of MMIO per accelerator; offsets from 0x800 are scratch space
//! - `reset` clears the scratch space
//! - exclusive opens conflict with any other open
//! - buffers are pinned at their virtual address
//! - two error registers per object; `first_error` cannot be cleared
//! - mapping region 0 hands out the register file itself
//! - event objects are socket pairs; only error events can be registered
//! - slot 0 can be reprogrammed through the FME; the image's first 16
//!   bytes become the port's GUID
//!
//! ## Usage
//!
//! Loaded by fpga-shell when `WITH_ASE` is set, or from a plugin
//! configuration entry:
//!
//! ```json
//! {
//!   "configurations": {
//!     "sim": {
//!       "enabled": true,
//!       "plugin": "libfpga_plugin_sim.so",
//!       "configuration": { "bus": 94, "children": 2 }
//!     }
//!   },
//!   "plugins": ["sim"]
//! }
//! ```

mod card;
mod ffi;
mod plugin;

// Re-export the plugin entry point
pub use plugin::opae_plugin_configure;
