/*
 *  runtime/traits.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Backend capability set
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

use super::error::{FpgaError, Result};
use super::properties::RawProperties;

/// Backend-native token. Opaque to the runtime, never dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawToken(pub usize);

/// Backend-native handle. Opaque to the runtime, never dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub usize);

/// Open flag: allow other processes to open the same resource
pub const OPEN_SHARED: i32 = 1 << 0;

/// Buffer flag: the caller supplies the memory to pin
pub const BUF_PREALLOCATED: i32 = 1 << 0;
/// Buffer flag: do not log allocation failures
pub const BUF_QUIET: i32 = 1 << 1;
/// Buffer flag: the device only reads from the buffer
pub const BUF_READ_ONLY: i32 = 1 << 2;

/// Backend-native event handle. Opaque to the runtime, never dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawEvent(pub usize);

/// Kinds of event a handle can signal
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Interrupt = 0,
    Error = 1,
    PowerThermal = 2,
}

/// Static description of an error register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub name: String,
    /// Whether `clear_error` can reset this register
    pub can_clear: bool,
}

/// A buffer pinned for device access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinnedBuffer {
    /// Virtual address of the buffer
    pub addr: u64,
    /// Workspace id for later lookups and release
    pub wsid: u64,
}

/// Operations a hardware backend can provide.
///
/// Every operation has a default that reports `NotSupported`, so a backend
/// only implements what it can actually do. The lifecycle hooks default to
/// success, which is the same as having no hook.
///
/// Tokens a backend hands out (from `enumerate`, `clone_token`, or as the
/// parent inside a property record) belong to the caller, who releases
/// them with `destroy_token`.
pub trait Backend: Send + Sync {
    /// Called once after all backends are registered
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Called once during teardown, before the library is unloaded
    fn finalize(&self) -> Result<()> {
        Ok(())
    }

    /// All tokens matching any of `filters` (all devices when empty)
    fn enumerate(&self, _filters: &[RawProperties]) -> Result<Vec<RawToken>> {
        Err(FpgaError::unsupported("enumerate"))
    }

    fn clone_token(&self, _token: RawToken) -> Result<RawToken> {
        Err(FpgaError::unsupported("clone_token"))
    }

    fn destroy_token(&self, _token: RawToken) -> Result<()> {
        Err(FpgaError::unsupported("destroy_token"))
    }

    fn get_properties(&self, _token: RawToken) -> Result<RawProperties> {
        Err(FpgaError::unsupported("get_properties"))
    }

    fn get_properties_from_handle(&self, _handle: RawHandle) -> Result<RawProperties> {
        Err(FpgaError::unsupported("get_properties_from_handle"))
    }

    /// Refresh `props` in place from the current state of `token`
    fn update_properties(&self, _token: RawToken, _props: &mut RawProperties) -> Result<()> {
        Err(FpgaError::unsupported("update_properties"))
    }

    fn open(&self, _token: RawToken, _flags: i32) -> Result<RawHandle> {
        Err(FpgaError::unsupported("open"))
    }

    fn close(&self, _handle: RawHandle) -> Result<()> {
        Err(FpgaError::unsupported("close"))
    }

    fn reset(&self, _handle: RawHandle) -> Result<()> {
        Err(FpgaError::unsupported("reset"))
    }

    fn read_mmio32(&self, _handle: RawHandle, _mmio_num: u32, _offset: u64) -> Result<u32> {
        Err(FpgaError::unsupported("read_mmio32"))
    }

    fn read_mmio64(&self, _handle: RawHandle, _mmio_num: u32, _offset: u64) -> Result<u64> {
        Err(FpgaError::unsupported("read_mmio64"))
    }

    fn write_mmio32(&self, _handle: RawHandle, _mmio_num: u32, _offset: u64, _value: u32) -> Result<()> {
        Err(FpgaError::unsupported("write_mmio32"))
    }

    fn write_mmio64(&self, _handle: RawHandle, _mmio_num: u32, _offset: u64, _value: u64) -> Result<()> {
        Err(FpgaError::unsupported("write_mmio64"))
    }

    /// Map MMIO region `mmio_num` into the caller's address space and
    /// return its base address
    fn map_mmio(&self, _handle: RawHandle, _mmio_num: u32) -> Result<u64> {
        Err(FpgaError::unsupported("map_mmio"))
    }

    fn unmap_mmio(&self, _handle: RawHandle, _mmio_num: u32) -> Result<()> {
        Err(FpgaError::unsupported("unmap_mmio"))
    }

    /// Pin `len` bytes. With `BUF_PREALLOCATED` the memory at `addr` is
    /// pinned instead of fresh memory being allocated.
    fn prepare_buffer(&self, _handle: RawHandle, _len: u64, _addr: Option<u64>, _flags: i32) -> Result<PinnedBuffer> {
        Err(FpgaError::unsupported("prepare_buffer"))
    }

    fn release_buffer(&self, _handle: RawHandle, _wsid: u64) -> Result<()> {
        Err(FpgaError::unsupported("release_buffer"))
    }

    fn get_io_address(&self, _handle: RawHandle, _wsid: u64) -> Result<u64> {
        Err(FpgaError::unsupported("get_io_address"))
    }

    fn read_error(&self, _token: RawToken, _error_num: u32) -> Result<u64> {
        Err(FpgaError::unsupported("read_error"))
    }

    fn get_error_info(&self, _token: RawToken, _error_num: u32) -> Result<ErrorInfo> {
        Err(FpgaError::unsupported("get_error_info"))
    }

    fn clear_error(&self, _token: RawToken, _error_num: u32) -> Result<()> {
        Err(FpgaError::unsupported("clear_error"))
    }

    fn clear_all_errors(&self, _token: RawToken) -> Result<()> {
        Err(FpgaError::unsupported("clear_all_errors"))
    }

    fn reconfigure_slot(&self, _handle: RawHandle, _slot: u32, _bitstream: &[u8], _flags: i32) -> Result<()> {
        Err(FpgaError::unsupported("reconfigure_slot"))
    }

    fn create_event_handle(&self) -> Result<RawEvent> {
        Err(FpgaError::unsupported("create_event_handle"))
    }

    fn destroy_event_handle(&self, _event: RawEvent) -> Result<()> {
        Err(FpgaError::unsupported("destroy_event_handle"))
    }

    /// The file descriptor to poll for `event`
    fn event_os_object(&self, _event: RawEvent) -> Result<i32> {
        Err(FpgaError::unsupported("event_os_object"))
    }

    fn register_event(&self, _handle: RawHandle, _event_type: EventType, _event: RawEvent, _flags: u32) -> Result<()> {
        Err(FpgaError::unsupported("register_event"))
    }

    fn unregister_event(&self, _handle: RawHandle, _event_type: EventType, _event: RawEvent) -> Result<()> {
        Err(FpgaError::unsupported("unregister_event"))
    }
}
