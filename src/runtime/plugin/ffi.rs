/*
 *  runtime/plugin/ffi.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  C ABI types for the backend plugin interface
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

//! FFI types for the backend plugin system
//!
//! This module defines C-compatible types that form the stable ABI
//! between the runtime and backend plugins. All types use `#[repr(C)]`
//! to ensure consistent memory layout across compilation units.
//!
//! A plugin exports `opae_plugin_configure`, which receives a zeroed
//! [`OpaeAdapterVTable`] and the plugin's JSON configuration. It fills in
//! the slots it supports, sets `abi_version`, and returns 0. Slots left
//! null are reported as `NotSupported` when called.

use std::ffi::{c_char, c_void};
use std::os::raw::c_int;
use std::ptr;

use crate::runtime::error::{FpgaError, Result};
use crate::runtime::properties::{
    AcceleratorFields, AcceleratorState, DeviceFields, FpgaVersion, Guid, Interface, ObjectFields,
    ObjectType, PROPERTIES_MAGIC, PropertyRecord, RawProperties, field,
};
use crate::runtime::traits::RawToken;

/// Plugin ABI version
pub const OPAE_PLUGIN_ABI_VERSION_MAJOR: u32 = 1;
pub const OPAE_PLUGIN_ABI_VERSION_MINOR: u32 = 1;

/// Value a plugin stores in `abi_version`
pub const OPAE_PLUGIN_ABI_VERSION: u32 =
    OPAE_PLUGIN_ABI_VERSION_MAJOR << 16 | OPAE_PLUGIN_ABI_VERSION_MINOR;

/// Name of the configure entry point
pub const OPAE_PLUGIN_CONFIGURE: &[u8] = b"opae_plugin_configure\0";

/// Magic every property record crossing the ABI must carry
pub const OPAE_PROPERTIES_MAGIC: u32 = PROPERTIES_MAGIC;

/// Backend-native token
pub type OpaeToken = *mut c_void;

/// Backend-native handle
pub type OpaeHandle = *mut c_void;

/// Backend-native event handle
pub type OpaeEventHandle = *mut c_void;

/// Length of the name buffer in [`OpaeErrorInfo`]
pub const OPAE_ERROR_NAME_MAX: usize = 64;

/// Error register description as exchanged with plugins
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OpaeErrorInfo {
    /// NUL-terminated
    pub name: [c_char; OPAE_ERROR_NAME_MAX],
    pub can_clear: bool,
}

impl OpaeErrorInfo {
    pub fn empty() -> Self {
        Self {
            name: [0; OPAE_ERROR_NAME_MAX],
            can_clear: false,
        }
    }

    /// The name up to its terminator; an unterminated buffer is corrupt
    pub fn name(&self) -> Result<String> {
        let bytes: Vec<u8> = self.name.iter().map(|&c| c as u8).collect();
        let end = bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| FpgaError::Exception("plugin returned unterminated error name".into()))?;
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

/// Result codes returned by plugin functions
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpgaResult {
    Ok = 0,
    InvalidParam = 1,
    Busy = 2,
    Exception = 3,
    NotFound = 4,
    NoMemory = 5,
    NotSupported = 6,
    NoDriver = 7,
    NoDaemon = 8,
    NoAccess = 9,
    ReconfError = 10,
}

impl FpgaResult {
    /// Plugins return a plain `int`; anything unknown is an exception.
    pub fn from_code(code: c_int) -> Self {
        match code {
            0 => FpgaResult::Ok,
            1 => FpgaResult::InvalidParam,
            2 => FpgaResult::Busy,
            3 => FpgaResult::Exception,
            4 => FpgaResult::NotFound,
            5 => FpgaResult::NoMemory,
            6 => FpgaResult::NotSupported,
            7 => FpgaResult::NoDriver,
            8 => FpgaResult::NoDaemon,
            9 => FpgaResult::NoAccess,
            10 => FpgaResult::ReconfError,
            _ => FpgaResult::Exception,
        }
    }

    /// Map onto the runtime error taxonomy; `op` names the failing call
    pub fn into_result(self, op: &str) -> Result<()> {
        match self {
            FpgaResult::Ok => Ok(()),
            FpgaResult::InvalidParam => Err(FpgaError::InvalidParam(op.to_string())),
            FpgaResult::Busy => Err(FpgaError::Busy),
            FpgaResult::Exception => Err(FpgaError::Exception(op.to_string())),
            FpgaResult::NotFound => Err(FpgaError::NotFound(op.to_string())),
            FpgaResult::NoMemory => Err(FpgaError::NoMemory),
            FpgaResult::NotSupported => Err(FpgaError::NotSupported(op.to_string())),
            FpgaResult::NoDriver => Err(FpgaError::NoDriver),
            FpgaResult::NoDaemon => Err(FpgaError::NoDaemon),
            FpgaResult::NoAccess => Err(FpgaError::NoAccess),
            FpgaResult::ReconfError => Err(FpgaError::Reconfiguration(op.to_string())),
        }
    }
}

impl From<&FpgaError> for FpgaResult {
    fn from(e: &FpgaError) -> Self {
        match e {
            FpgaError::InvalidParam(_) => FpgaResult::InvalidParam,
            FpgaError::NotFound(_) => FpgaResult::NotFound,
            FpgaError::NoMemory => FpgaResult::NoMemory,
            FpgaError::Exception(_) => FpgaResult::Exception,
            FpgaError::NotSupported(_) => FpgaResult::NotSupported,
            FpgaError::Busy => FpgaResult::Busy,
            FpgaError::NoDriver => FpgaResult::NoDriver,
            FpgaError::NoDaemon => FpgaResult::NoDaemon,
            FpgaError::NoAccess => FpgaResult::NoAccess,
            FpgaError::Reconfiguration(_) => FpgaResult::ReconfError,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct OpaeVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct OpaeDeviceFields {
    pub num_slots: u32,
    pub bbs_id: u64,
    pub bbs_version: OpaeVersion,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct OpaeAcceleratorFields {
    pub state: u32,
    pub num_mmio: u32,
    pub num_interrupts: u32,
}

/// Object-type dependent fields; which member is live follows `objtype`
#[repr(C)]
#[derive(Clone, Copy)]
pub union OpaeObjectFields {
    pub device: OpaeDeviceFields,
    pub accelerator: OpaeAcceleratorFields,
}

/// Property record as exchanged with plugins
#[repr(C)]
#[derive(Clone, Copy)]
pub struct OpaeProperties {
    pub magic: u32,
    pub valid_fields: u64,
    pub objtype: u32,
    pub parent: OpaeToken,
    pub segment: u16,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
    pub socket_id: u8,
    pub vendor_id: u16,
    pub device_id: u16,
    pub subsystem_vendor_id: u16,
    pub subsystem_device_id: u16,
    /// Big-endian GUID bytes
    pub guid: [u8; 16],
    pub object_id: u64,
    pub num_errors: u32,
    pub interface: u32,
    pub u: OpaeObjectFields,
}

impl OpaeProperties {
    /// An empty record with the magic set
    pub fn empty() -> Self {
        Self {
            magic: OPAE_PROPERTIES_MAGIC,
            valid_fields: 0,
            objtype: 0,
            parent: ptr::null_mut(),
            segment: 0,
            bus: 0,
            device: 0,
            function: 0,
            socket_id: 0,
            vendor_id: 0,
            device_id: 0,
            subsystem_vendor_id: 0,
            subsystem_device_id: 0,
            guid: [0; 16],
            object_id: 0,
            num_errors: 0,
            interface: 0,
            u: OpaeObjectFields {
                device: OpaeDeviceFields::default(),
            },
        }
    }
}

pub(crate) fn token_ptr(token: RawToken) -> OpaeToken {
    token.0 as OpaeToken
}

pub(crate) fn token_from_ptr(ptr: OpaeToken) -> RawToken {
    RawToken(ptr as usize)
}

/// Convert a runtime record to its C form
pub fn properties_to_ffi(raw: &RawProperties) -> OpaeProperties {
    let r = &raw.record;
    let mut p = OpaeProperties::empty();
    p.valid_fields = r.valid_fields;
    p.objtype = r.object_type as u32;
    p.parent = raw.parent.map_or(ptr::null_mut(), token_ptr);
    p.segment = r.segment;
    p.bus = r.bus;
    p.device = r.device;
    p.function = r.function;
    p.socket_id = r.socket_id;
    p.vendor_id = r.vendor_id;
    p.device_id = r.device_id;
    p.subsystem_vendor_id = r.subsystem_vendor_id;
    p.subsystem_device_id = r.subsystem_device_id;
    p.guid = *r.guid.as_bytes();
    p.object_id = r.object_id;
    p.num_errors = r.num_errors;
    p.interface = r.interface as u32;
    p.u = match r.ext {
        ObjectFields::Device(d) => OpaeObjectFields {
            device: OpaeDeviceFields {
                num_slots: d.num_slots,
                bbs_id: d.bbs_id,
                bbs_version: OpaeVersion {
                    major: d.bbs_version.major,
                    minor: d.bbs_version.minor,
                    patch: d.bbs_version.patch,
                },
            },
        },
        ObjectFields::Accelerator(a) => OpaeObjectFields {
            accelerator: OpaeAcceleratorFields {
                state: a.state as u32,
                num_mmio: a.num_mmio,
                num_interrupts: a.num_interrupts,
            },
        },
        ObjectFields::Unset => OpaeObjectFields {
            device: OpaeDeviceFields::default(),
        },
    };
    p
}

/// Convert a record returned by a plugin, validating its magic
pub fn properties_from_ffi(p: &OpaeProperties) -> Result<RawProperties> {
    if p.magic != OPAE_PROPERTIES_MAGIC {
        return Err(FpgaError::Exception(format!(
            "plugin returned properties with bad magic {:#x}",
            p.magic
        )));
    }
    let corrupt = |e: FpgaError| FpgaError::Exception(format!("plugin returned {}", e));

    let mut r = PropertyRecord {
        valid_fields: p.valid_fields,
        segment: p.segment,
        bus: p.bus,
        device: p.device,
        function: p.function,
        socket_id: p.socket_id,
        vendor_id: p.vendor_id,
        device_id: p.device_id,
        subsystem_vendor_id: p.subsystem_vendor_id,
        subsystem_device_id: p.subsystem_device_id,
        guid: Guid::from_bytes(p.guid),
        object_id: p.object_id,
        num_errors: p.num_errors,
        ..Default::default()
    };
    if r.has(field::INTERFACE) {
        r.interface = Interface::try_from(p.interface).map_err(corrupt)?;
    }

    if r.has(field::OBJTYPE) {
        r.object_type = ObjectType::try_from(p.objtype).map_err(corrupt)?;
        // SAFETY: the live union member is selected by the object type
        r.ext = match r.object_type {
            ObjectType::Device => {
                let d = unsafe { p.u.device };
                ObjectFields::Device(DeviceFields {
                    num_slots: d.num_slots,
                    bbs_id: d.bbs_id,
                    bbs_version: FpgaVersion {
                        major: d.bbs_version.major,
                        minor: d.bbs_version.minor,
                        patch: d.bbs_version.patch,
                    },
                })
            }
            ObjectType::Accelerator => {
                let a = unsafe { p.u.accelerator };
                let state = if r.has(field::ACCELERATOR_STATE) {
                    AcceleratorState::try_from(a.state).map_err(corrupt)?
                } else {
                    AcceleratorState::default()
                };
                ObjectFields::Accelerator(AcceleratorFields {
                    state,
                    num_mmio: a.num_mmio,
                    num_interrupts: a.num_interrupts,
                })
            }
        };
    } else {
        r.valid_fields &= !field::TYPE_SPECIFIC_MASK;
    }

    let parent = if r.has(field::PARENT) && !p.parent.is_null() {
        Some(token_from_ptr(p.parent))
    } else {
        r.valid_fields &= !(1 << field::PARENT);
        None
    };

    Ok(RawProperties { record: r, parent })
}

/// Adapter vtable filled in by a plugin's configure entry point
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct OpaeAdapterVTable {
    pub abi_version: u32,

    pub initialize: Option<unsafe extern "C" fn() -> c_int>,
    pub finalize: Option<unsafe extern "C" fn() -> c_int>,

    /// Called with null `tokens` and `max_tokens == 0` to count matches
    pub enumerate: Option<
        unsafe extern "C" fn(
            filters: *const OpaeProperties,
            num_filters: u32,
            tokens: *mut OpaeToken,
            max_tokens: u32,
            num_matches: *mut u32,
        ) -> c_int,
    >,
    pub clone_token: Option<unsafe extern "C" fn(src: OpaeToken, dst: *mut OpaeToken) -> c_int>,
    pub destroy_token: Option<unsafe extern "C" fn(token: *mut OpaeToken) -> c_int>,
    pub get_properties: Option<unsafe extern "C" fn(token: OpaeToken, props: *mut OpaeProperties) -> c_int>,
    pub get_properties_from_handle:
        Option<unsafe extern "C" fn(handle: OpaeHandle, props: *mut OpaeProperties) -> c_int>,
    pub update_properties: Option<unsafe extern "C" fn(token: OpaeToken, props: *mut OpaeProperties) -> c_int>,

    pub open: Option<unsafe extern "C" fn(token: OpaeToken, handle: *mut OpaeHandle, flags: c_int) -> c_int>,
    pub close: Option<unsafe extern "C" fn(handle: OpaeHandle) -> c_int>,
    pub reset: Option<unsafe extern "C" fn(handle: OpaeHandle) -> c_int>,

    pub read_mmio32:
        Option<unsafe extern "C" fn(handle: OpaeHandle, mmio_num: u32, offset: u64, value: *mut u32) -> c_int>,
    pub write_mmio32: Option<unsafe extern "C" fn(handle: OpaeHandle, mmio_num: u32, offset: u64, value: u32) -> c_int>,
    pub read_mmio64:
        Option<unsafe extern "C" fn(handle: OpaeHandle, mmio_num: u32, offset: u64, value: *mut u64) -> c_int>,
    pub write_mmio64: Option<unsafe extern "C" fn(handle: OpaeHandle, mmio_num: u32, offset: u64, value: u64) -> c_int>,

    /// `buf_addr` is read when `flags` has the preallocated bit, written otherwise
    pub prepare_buffer: Option<
        unsafe extern "C" fn(handle: OpaeHandle, len: u64, buf_addr: *mut *mut c_void, wsid: *mut u64, flags: c_int) -> c_int,
    >,
    pub release_buffer: Option<unsafe extern "C" fn(handle: OpaeHandle, wsid: u64) -> c_int>,
    pub get_io_address: Option<unsafe extern "C" fn(handle: OpaeHandle, wsid: u64, ioaddr: *mut u64) -> c_int>,

    pub read_error: Option<unsafe extern "C" fn(token: OpaeToken, error_num: u32, value: *mut u64) -> c_int>,
    pub clear_error: Option<unsafe extern "C" fn(token: OpaeToken, error_num: u32) -> c_int>,
    pub clear_all_errors: Option<unsafe extern "C" fn(token: OpaeToken) -> c_int>,

    pub reconfigure_slot: Option<
        unsafe extern "C" fn(handle: OpaeHandle, slot: u32, bitstream: *const u8, len: usize, flags: c_int) -> c_int,
    >,

    // ABI 1.1

    pub map_mmio: Option<unsafe extern "C" fn(handle: OpaeHandle, mmio_num: u32, mmio_ptr: *mut *mut u64) -> c_int>,
    pub unmap_mmio: Option<unsafe extern "C" fn(handle: OpaeHandle, mmio_num: u32) -> c_int>,

    pub get_error_info:
        Option<unsafe extern "C" fn(token: OpaeToken, error_num: u32, info: *mut OpaeErrorInfo) -> c_int>,

    pub create_event_handle: Option<unsafe extern "C" fn(event: *mut OpaeEventHandle) -> c_int>,
    pub destroy_event_handle: Option<unsafe extern "C" fn(event: *mut OpaeEventHandle) -> c_int>,
    pub get_os_object_from_event_handle: Option<unsafe extern "C" fn(event: OpaeEventHandle, fd: *mut c_int) -> c_int>,
    pub register_event: Option<
        unsafe extern "C" fn(handle: OpaeHandle, event_type: c_int, event: OpaeEventHandle, flags: u32) -> c_int,
    >,
    pub unregister_event:
        Option<unsafe extern "C" fn(handle: OpaeHandle, event_type: c_int, event: OpaeEventHandle) -> c_int>,
}

/// Type of `opae_plugin_configure`
pub type PluginConfigureFn =
    unsafe extern "C" fn(vtable: *mut OpaeAdapterVTable, config_json: *const c_char) -> c_int;
