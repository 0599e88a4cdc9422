/*
 *  fpga-shell simulated card plugin - FFI Types
 *
 *  C ABI types matching the fpga-shell plugin interface
 *  These types must match exactly with the host's FFI types
 */

use std::ffi::{c_char, c_int, c_void};

/// Plugin ABI version, major in the high half
pub const OPAE_PLUGIN_ABI_VERSION_MAJOR: u32 = 1;
pub const OPAE_PLUGIN_ABI_VERSION_MINOR: u32 = 1;
pub const OPAE_PLUGIN_ABI_VERSION: u32 =
    OPAE_PLUGIN_ABI_VERSION_MAJOR << 16 | OPAE_PLUGIN_ABI_VERSION_MINOR;

pub const OPAE_PROPERTIES_MAGIC: u32 = 0x5052_4f50;

pub type OpaeToken = *mut c_void;
pub type OpaeHandle = *mut c_void;
pub type OpaeEventHandle = *mut c_void;

pub const OPAE_ERROR_NAME_MAX: usize = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OpaeErrorInfo {
    pub name: [c_char; OPAE_ERROR_NAME_MAX],
    pub can_clear: bool,
}

pub const EVENT_INTERRUPT: c_int = 0;
pub const EVENT_ERROR: c_int = 1;
pub const EVENT_POWER_THERMAL: c_int = 2;

/// Result codes returned by plugin functions
#[allow(dead_code)]
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

/// Property bits
pub mod field {
    pub const PARENT: u32 = 0;
    pub const OBJTYPE: u32 = 1;
    pub const SEGMENT: u32 = 2;
    pub const BUS: u32 = 3;
    pub const DEVICE: u32 = 4;
    pub const FUNCTION: u32 = 5;
    pub const SOCKETID: u32 = 6;
    pub const VENDORID: u32 = 7;
    pub const DEVICEID: u32 = 8;
    pub const GUID: u32 = 9;
    pub const OBJECTID: u32 = 10;
    pub const NUM_ERRORS: u32 = 11;
    pub const INTERFACE: u32 = 12;
    pub const SUB_VENDORID: u32 = 13;
    pub const SUB_DEVICEID: u32 = 14;

    pub const NUM_SLOTS: u32 = 32;
    pub const BBSID: u32 = 33;
    pub const BBSVERSION: u32 = 34;

    pub const ACCELERATOR_STATE: u32 = 32;
    pub const NUM_MMIO: u32 = 33;
    pub const NUM_INTERRUPTS: u32 = 34;
}

pub const OBJTYPE_DEVICE: u32 = 0;
pub const OBJTYPE_ACCELERATOR: u32 = 1;

pub const ACCELERATOR_UNASSIGNED: u32 = 1;

pub const INTERFACE_SIM_DFL: u32 = 2;

pub const OPEN_SHARED: c_int = 1 << 0;
pub const BUF_PREALLOCATED: c_int = 1 << 0;

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

#[repr(C)]
#[derive(Clone, Copy)]
pub union OpaeObjectFields {
    pub device: OpaeDeviceFields,
    pub accelerator: OpaeAcceleratorFields,
}

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
    pub guid: [u8; 16],
    pub object_id: u64,
    pub num_errors: u32,
    pub interface: u32,
    pub u: OpaeObjectFields,
}

impl OpaeProperties {
    pub fn has(&self, bit: u32) -> bool {
        self.valid_fields & (1u64 << bit) != 0
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct OpaeAdapterVTable {
    pub abi_version: u32,

    pub initialize: Option<unsafe extern "C" fn() -> c_int>,
    pub finalize: Option<unsafe extern "C" fn() -> c_int>,

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

/// Type of the configure entry point
#[allow(dead_code)]
pub type PluginConfigureFn =
    unsafe extern "C" fn(vtable: *mut OpaeAdapterVTable, config_json: *const c_char) -> c_int;
