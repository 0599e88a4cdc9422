/*
 *  runtime/mod.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Dispatch core: registry, properties, tokens and handles
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

// Core trait definitions
pub mod traits;
pub mod error;
pub mod table;

// Object model
pub mod properties;
pub mod token;
pub mod handle;
pub mod event;
pub mod dfh;

// Discovery and dispatch
pub mod catalog;
pub mod registry;
pub mod enumerate;

// Plugin system (conditionally compiled with plugin-system feature)
#[cfg(feature = "plugin-system")]
pub mod plugin;

// In-process backends for testing
#[cfg(test)]
pub mod drivers;

// Re-exports for convenience
pub use traits::{
    BUF_PREALLOCATED, BUF_QUIET, BUF_READ_ONLY, Backend, ErrorInfo, EventType, OPEN_SHARED,
    PinnedBuffer, RawEvent, RawHandle, RawToken,
};
pub use error::{FpgaError, InitError, OpenError, Result};
pub use table::AdapterTable;
pub use properties::{
    AcceleratorState, FpgaVersion, Guid, Interface, ObjectType, Properties, PropertyRecord,
    RawProperties, field,
};
pub use token::{Token, TokenRef};
pub use handle::{ChildPort, Handle, HandleState};
pub use event::EventHandle;
pub use catalog::{
    DeviceScanner, PciDevice, PlatformCatalog, PlatformEntry, SimulatedScanner, StaticScanner,
    SysfsScanner,
};
pub use registry::{AdapterCallback, AdapterRegistry, PluginSource, StopCode};
pub use enumerate::{Enumeration, Enumerator};
