/*
 *  runtime/plugin/adapter.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Plugin adapter - wraps a C ABI vtable as a Backend
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

use std::ffi::c_void;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use log::{debug, error};

use super::ffi::{
    FpgaResult, OpaeAdapterVTable, OpaeErrorInfo, OpaeEventHandle, OpaeHandle, OpaeProperties, OpaeToken,
    properties_from_ffi, properties_to_ffi, token_from_ptr, token_ptr,
};
use crate::runtime::error::{FpgaError, Result};
use crate::runtime::properties::RawProperties;
use crate::runtime::traits::{
    BUF_PREALLOCATED, Backend, ErrorInfo, EventType, PinnedBuffer, RawEvent, RawHandle, RawToken,
};

/// Adapter that presents a plugin vtable as a [`Backend`]
///
/// It handles:
///
/// - error code conversion
/// - `NotSupported` for slots the plugin left empty
///
/// A panic cannot unwind out of an `extern "C"` function; it aborts the
/// process instead. Plugins must catch their own panics and report them
/// as an error code.
pub struct PluginBackend {
    library: String,
    vtable: OpaeAdapterVTable,
}

fn handle_ptr(handle: RawHandle) -> OpaeHandle {
    handle.0 as OpaeHandle
}

fn event_ptr(event: RawEvent) -> OpaeEventHandle {
    event.0 as OpaeEventHandle
}

impl PluginBackend {
    pub fn new(library: impl Into<String>, vtable: OpaeAdapterVTable) -> Self {
        Self {
            library: library.into(),
            vtable,
        }
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    fn slot<T>(&self, slot: Option<T>, op: &str) -> Result<T> {
        slot.ok_or_else(|| FpgaError::unsupported(op))
    }

    /// Run a plugin call and translate its result code
    fn call<F>(&self, op: &str, f: F) -> Result<()>
    where
        F: FnOnce() -> c_int,
    {
        let code = catch_ffi_call(f)?;
        FpgaResult::from_code(code).into_result(op).inspect_err(|e| {
            debug!("{}: {} failed: {}", self.library, op, e);
        })
    }
}

impl Backend for PluginBackend {
    fn initialize(&self) -> Result<()> {
        match self.vtable.initialize {
            Some(init) => self.call("initialize", || unsafe { init() }),
            None => Ok(()),
        }
    }

    fn finalize(&self) -> Result<()> {
        match self.vtable.finalize {
            Some(fin) => self.call("finalize", || unsafe { fin() }),
            None => Ok(()),
        }
    }

    fn enumerate(&self, filters: &[RawProperties]) -> Result<Vec<RawToken>> {
        let enumerate = self.slot(self.vtable.enumerate, "enumerate")?;
        let ffi_filters: Vec<OpaeProperties> = filters.iter().map(properties_to_ffi).collect();
        let filter_ptr = if ffi_filters.is_empty() {
            ptr::null()
        } else {
            ffi_filters.as_ptr()
        };
        let num_filters = ffi_filters.len() as u32;

        // first pass counts, second pass collects
        let mut num_matches = 0u32;
        self.call("enumerate", || unsafe {
            enumerate(filter_ptr, num_filters, ptr::null_mut(), 0, &mut num_matches)
        })?;
        if num_matches == 0 {
            return Ok(Vec::new());
        }

        let mut tokens: Vec<OpaeToken> = vec![ptr::null_mut(); num_matches as usize];
        let capacity = num_matches;
        let mut found = 0u32;
        self.call("enumerate", || unsafe {
            enumerate(filter_ptr, num_filters, tokens.as_mut_ptr(), capacity, &mut found)
        })?;

        let returned = found.min(capacity) as usize;
        Ok(tokens[..returned]
            .iter()
            .filter(|t| !t.is_null())
            .map(|&t| token_from_ptr(t))
            .collect())
    }

    fn clone_token(&self, token: RawToken) -> Result<RawToken> {
        let clone = self.slot(self.vtable.clone_token, "clone_token")?;
        let mut dst: OpaeToken = ptr::null_mut();
        self.call("clone_token", || unsafe { clone(token_ptr(token), &mut dst) })?;
        if dst.is_null() {
            return Err(FpgaError::Exception("clone_token returned null".into()));
        }
        Ok(token_from_ptr(dst))
    }

    fn destroy_token(&self, token: RawToken) -> Result<()> {
        let destroy = self.slot(self.vtable.destroy_token, "destroy_token")?;
        let mut t = token_ptr(token);
        self.call("destroy_token", || unsafe { destroy(&mut t) })
    }

    fn get_properties(&self, token: RawToken) -> Result<RawProperties> {
        let get = self.slot(self.vtable.get_properties, "get_properties")?;
        let mut props = OpaeProperties::empty();
        self.call("get_properties", || unsafe { get(token_ptr(token), &mut props) })?;
        properties_from_ffi(&props)
    }

    fn get_properties_from_handle(&self, handle: RawHandle) -> Result<RawProperties> {
        let get = self.slot(self.vtable.get_properties_from_handle, "get_properties_from_handle")?;
        let mut props = OpaeProperties::empty();
        self.call("get_properties_from_handle", || unsafe { get(handle_ptr(handle), &mut props) })?;
        properties_from_ffi(&props)
    }

    fn update_properties(&self, token: RawToken, props: &mut RawProperties) -> Result<()> {
        let update = self.slot(self.vtable.update_properties, "update_properties")?;
        let mut ffi = properties_to_ffi(props);
        self.call("update_properties", || unsafe { update(token_ptr(token), &mut ffi) })?;
        *props = properties_from_ffi(&ffi)?;
        Ok(())
    }

    fn open(&self, token: RawToken, flags: i32) -> Result<RawHandle> {
        let open = self.slot(self.vtable.open, "open")?;
        // a handle nobody can close is not worth handing out
        self.slot(self.vtable.close, "close")?;

        let mut handle: OpaeHandle = ptr::null_mut();
        self.call("open", || unsafe { open(token_ptr(token), &mut handle, flags) })?;
        if handle.is_null() {
            return Err(FpgaError::Exception("open returned null handle".into()));
        }
        Ok(RawHandle(handle as usize))
    }

    fn close(&self, handle: RawHandle) -> Result<()> {
        let close = self.slot(self.vtable.close, "close")?;
        self.call("close", || unsafe { close(handle_ptr(handle)) })
    }

    fn reset(&self, handle: RawHandle) -> Result<()> {
        let reset = self.slot(self.vtable.reset, "reset")?;
        self.call("reset", || unsafe { reset(handle_ptr(handle)) })
    }

    fn read_mmio32(&self, handle: RawHandle, mmio_num: u32, offset: u64) -> Result<u32> {
        let read = self.slot(self.vtable.read_mmio32, "read_mmio32")?;
        let mut value = 0u32;
        self.call("read_mmio32", || unsafe { read(handle_ptr(handle), mmio_num, offset, &mut value) })?;
        Ok(value)
    }

    fn read_mmio64(&self, handle: RawHandle, mmio_num: u32, offset: u64) -> Result<u64> {
        let read = self.slot(self.vtable.read_mmio64, "read_mmio64")?;
        let mut value = 0u64;
        self.call("read_mmio64", || unsafe { read(handle_ptr(handle), mmio_num, offset, &mut value) })?;
        Ok(value)
    }

    fn write_mmio32(&self, handle: RawHandle, mmio_num: u32, offset: u64, value: u32) -> Result<()> {
        let write = self.slot(self.vtable.write_mmio32, "write_mmio32")?;
        self.call("write_mmio32", || unsafe { write(handle_ptr(handle), mmio_num, offset, value) })
    }

    fn write_mmio64(&self, handle: RawHandle, mmio_num: u32, offset: u64, value: u64) -> Result<()> {
        let write = self.slot(self.vtable.write_mmio64, "write_mmio64")?;
        self.call("write_mmio64", || unsafe { write(handle_ptr(handle), mmio_num, offset, value) })
    }

    fn map_mmio(&self, handle: RawHandle, mmio_num: u32) -> Result<u64> {
        let map = self.slot(self.vtable.map_mmio, "map_mmio")?;
        let mut base: *mut u64 = ptr::null_mut();
        self.call("map_mmio", || unsafe { map(handle_ptr(handle), mmio_num, &mut base) })?;
        if base.is_null() {
            return Err(FpgaError::Exception("map_mmio returned null".into()));
        }
        Ok(base as u64)
    }

    fn unmap_mmio(&self, handle: RawHandle, mmio_num: u32) -> Result<()> {
        let unmap = self.slot(self.vtable.unmap_mmio, "unmap_mmio")?;
        self.call("unmap_mmio", || unsafe { unmap(handle_ptr(handle), mmio_num) })
    }

    fn prepare_buffer(&self, handle: RawHandle, len: u64, addr: Option<u64>, flags: i32) -> Result<PinnedBuffer> {
        let prepare = self.slot(self.vtable.prepare_buffer, "prepare_buffer")?;
        if flags & BUF_PREALLOCATED != 0 && addr.is_none() {
            return Err(FpgaError::InvalidParam("preallocated buffer without an address".into()));
        }

        let mut buf_addr = addr.unwrap_or(0) as *mut c_void;
        let mut wsid = 0u64;
        self.call("prepare_buffer", || unsafe {
            prepare(handle_ptr(handle), len, &mut buf_addr, &mut wsid, flags as c_int)
        })?;
        Ok(PinnedBuffer {
            addr: buf_addr as u64,
            wsid,
        })
    }

    fn release_buffer(&self, handle: RawHandle, wsid: u64) -> Result<()> {
        let release = self.slot(self.vtable.release_buffer, "release_buffer")?;
        self.call("release_buffer", || unsafe { release(handle_ptr(handle), wsid) })
    }

    fn get_io_address(&self, handle: RawHandle, wsid: u64) -> Result<u64> {
        let get = self.slot(self.vtable.get_io_address, "get_io_address")?;
        let mut io = 0u64;
        self.call("get_io_address", || unsafe { get(handle_ptr(handle), wsid, &mut io) })?;
        Ok(io)
    }

    fn read_error(&self, token: RawToken, error_num: u32) -> Result<u64> {
        let read = self.slot(self.vtable.read_error, "read_error")?;
        let mut value = 0u64;
        self.call("read_error", || unsafe { read(token_ptr(token), error_num, &mut value) })?;
        Ok(value)
    }

    fn get_error_info(&self, token: RawToken, error_num: u32) -> Result<ErrorInfo> {
        let get = self.slot(self.vtable.get_error_info, "get_error_info")?;
        let mut info = OpaeErrorInfo::empty();
        self.call("get_error_info", || unsafe { get(token_ptr(token), error_num, &mut info) })?;
        Ok(ErrorInfo {
            name: info.name()?,
            can_clear: info.can_clear,
        })
    }

    fn clear_error(&self, token: RawToken, error_num: u32) -> Result<()> {
        let clear = self.slot(self.vtable.clear_error, "clear_error")?;
        self.call("clear_error", || unsafe { clear(token_ptr(token), error_num) })
    }

    fn clear_all_errors(&self, token: RawToken) -> Result<()> {
        let clear = self.slot(self.vtable.clear_all_errors, "clear_all_errors")?;
        self.call("clear_all_errors", || unsafe { clear(token_ptr(token)) })
    }

    fn reconfigure_slot(&self, handle: RawHandle, slot: u32, bitstream: &[u8], flags: i32) -> Result<()> {
        let reconf = self.slot(self.vtable.reconfigure_slot, "reconfigure_slot")?;
        self.call("reconfigure_slot", || unsafe {
            reconf(handle_ptr(handle), slot, bitstream.as_ptr(), bitstream.len(), flags as c_int)
        })
    }

    fn create_event_handle(&self) -> Result<RawEvent> {
        let create = self.slot(self.vtable.create_event_handle, "create_event_handle")?;
        let mut event: OpaeEventHandle = ptr::null_mut();
        self.call("create_event_handle", || unsafe { create(&mut event) })?;
        if event.is_null() {
            return Err(FpgaError::Exception("create_event_handle returned null".into()));
        }
        Ok(RawEvent(event as usize))
    }

    fn destroy_event_handle(&self, event: RawEvent) -> Result<()> {
        let destroy = self.slot(self.vtable.destroy_event_handle, "destroy_event_handle")?;
        let mut e = event_ptr(event);
        self.call("destroy_event_handle", || unsafe { destroy(&mut e) })
    }

    fn event_os_object(&self, event: RawEvent) -> Result<i32> {
        let get = self.slot(self.vtable.get_os_object_from_event_handle, "event_os_object")?;
        let mut fd: c_int = -1;
        self.call("event_os_object", || unsafe { get(event_ptr(event), &mut fd) })?;
        Ok(fd)
    }

    fn register_event(&self, handle: RawHandle, event_type: EventType, event: RawEvent, flags: u32) -> Result<()> {
        let register = self.slot(self.vtable.register_event, "register_event")?;
        self.call("register_event", || unsafe {
            register(handle_ptr(handle), event_type as c_int, event_ptr(event), flags)
        })
    }

    fn unregister_event(&self, handle: RawHandle, event_type: EventType, event: RawEvent) -> Result<()> {
        let unregister = self.slot(self.vtable.unregister_event, "unregister_event")?;
        self.call("unregister_event", || unsafe {
            unregister(handle_ptr(handle), event_type as c_int, event_ptr(event))
        })
    }
}

/// Run the host side of an FFI call
///
/// Only a panic raised by the Rust closure itself is caught here and
/// turned into an `Exception`. A panic inside the plugin's `extern "C"`
/// function aborts before it reaches this frame.
pub(crate) fn catch_ffi_call<F>(f: F) -> Result<c_int>
where
    F: FnOnce() -> c_int,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(code) => Ok(code),
        Err(panic_info) => {
            let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
                format!("Plugin panic: {}", s)
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                format!("Plugin panic: {}", s)
            } else {
                "Plugin panic: unknown error".to_string()
            };

            error!("Caught panic in plugin FFI call: {}", message);
            Err(FpgaError::Exception(message))
        }
    }
}
