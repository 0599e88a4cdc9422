/*
 *  fpga-shell simulated card plugin - Backend Implementation
 *
 *  Exposes the simulated card through the fpga-shell adapter table
 */

use std::collections::BTreeSet;
use std::ffi::{c_char, c_int, c_void, CStr};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::card::{SimCard, SimConfig};
use crate::ffi::*;

/// Card state, created on first use and dropped by `finalize`
static CARD: Mutex<Option<SimCard>> = Mutex::new(None);
/// Configuration handed over by the host, applied when the card is built
static CONFIG: Mutex<Option<SimConfig>> = Mutex::new(None);
/// Addresses of live tokens and handles
static TOKENS: Mutex<BTreeSet<usize>> = Mutex::new(BTreeSet::new());
static HANDLES: Mutex<BTreeSet<usize>> = Mutex::new(BTreeSet::new());
static EVENTS: Mutex<BTreeSet<usize>> = Mutex::new(BTreeSet::new());

struct SimToken {
    device: usize,
}

struct SimHandle {
    device: usize,
    wsids: Vec<u64>,
    mapped: Vec<u32>,
}

/// An event object. The host polls `wait`; `notify` is the end a
/// signalling source would write to.
struct SimEvent {
    wait: UnixStream,
    #[allow(dead_code)]
    notify: UnixStream,
    /// (device, event type)
    registrations: Vec<(usize, c_int)>,
}

#[cfg(feature = "debug-logging")]
macro_rules! trace {
    ($($arg:tt)*) => { log::debug!($($arg)*) };
}

#[cfg(not(feature = "debug-logging"))]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// Macro to catch panics in FFI functions
macro_rules! catch_panic {
    ($code:block) => {
        match catch_unwind(AssertUnwindSafe(|| $code)) {
            Ok(result) => result,
            Err(_) => FpgaResult::Exception as c_int,
        }
    };
}

fn lock<T>(m: &'static Mutex<T>) -> MutexGuard<'static, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn with_card<T>(f: impl FnOnce(&mut SimCard) -> Result<T, FpgaResult>) -> Result<T, FpgaResult> {
    let mut card = lock(&CARD);
    let card = card.get_or_insert_with(|| SimCard::new(lock(&CONFIG).clone().unwrap_or_default()));
    f(card)
}

fn code(result: Result<(), FpgaResult>) -> c_int {
    match result {
        Ok(()) => FpgaResult::Ok as c_int,
        Err(e) => e as c_int,
    }
}

pub(crate) fn empty_properties() -> OpaeProperties {
    OpaeProperties {
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

fn mint_token(device: usize) -> OpaeToken {
    let token = Box::into_raw(Box::new(SimToken { device })) as OpaeToken;
    lock(&TOKENS).insert(token as usize);
    token
}

/// Device behind a token this plugin minted
fn token_device(token: OpaeToken) -> Result<usize, FpgaResult> {
    if token.is_null() || !lock(&TOKENS).contains(&(token as usize)) {
        return Err(FpgaResult::InvalidParam);
    }
    // SAFETY: the address is in the live set, so it is a boxed SimToken
    Ok(unsafe { (*(token as *const SimToken)).device })
}

fn event_ref<'a>(event: OpaeEventHandle) -> Result<&'a mut SimEvent, FpgaResult> {
    if event.is_null() || !lock(&EVENTS).contains(&(event as usize)) {
        return Err(FpgaResult::InvalidParam);
    }
    // SAFETY: the address is in the live set, so it is a boxed SimEvent
    Ok(unsafe { &mut *(event as *mut SimEvent) })
}

fn handle_ref<'a>(handle: OpaeHandle) -> Result<&'a mut SimHandle, FpgaResult> {
    if handle.is_null() || !lock(&HANDLES).contains(&(handle as usize)) {
        return Err(FpgaResult::InvalidParam);
    }
    // SAFETY: the address is in the live set, so it is a boxed SimHandle
    Ok(unsafe { &mut *(handle as *mut SimHandle) })
}

/// Fill `props` for `device`; a parent comes back as a fresh token
fn describe(card: &SimCard, device: usize, props: &mut OpaeProperties) -> Result<(), FpgaResult> {
    let magic = props.magic;
    *props = empty_properties();
    props.magic = magic;
    card.fill(device, props)?;
    props.parent = match card.devices[device].parent {
        Some(parent) => mint_token(parent),
        None => ptr::null_mut(),
    };
    Ok(())
}

fn check_magic(props: *const OpaeProperties) -> Result<(), FpgaResult> {
    // SAFETY: the caller checked for null
    if unsafe { (*props).magic } != OPAE_PROPERTIES_MAGIC {
        return Err(FpgaResult::InvalidParam);
    }
    Ok(())
}

// ============================================================================
// Adapter table entries
// ============================================================================

unsafe extern "C" fn initialize() -> c_int {
    catch_panic!({
        trace!("sim: initialize");
        code(with_card(|_| Ok(())))
    })
}

unsafe extern "C" fn finalize() -> c_int {
    catch_panic!({
        trace!("sim: finalize");
        lock(&CARD).take();
        FpgaResult::Ok as c_int
    })
}

unsafe extern "C" fn enumerate(
    filters: *const OpaeProperties,
    num_filters: u32,
    tokens: *mut OpaeToken,
    max_tokens: u32,
    num_matches: *mut u32,
) -> c_int {
    catch_panic!({
        if num_matches.is_null() || (num_filters > 0 && filters.is_null()) || (max_tokens > 0 && tokens.is_null()) {
            return FpgaResult::InvalidParam as c_int;
        }
        let filters: &[OpaeProperties] = if num_filters == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(filters, num_filters as usize)
        };
        let parents: Vec<Option<usize>> = filters
            .iter()
            .map(|f| if f.has(field::PARENT) { token_device(f.parent).ok() } else { None })
            .collect();

        let found = with_card(|card| {
            Ok((0..card.devices.len())
                .filter(|&d| {
                    filters.is_empty() || filters.iter().zip(&parents).any(|(f, p)| card.matches(d, f, *p))
                })
                .collect::<Vec<usize>>())
        });
        let found = match found {
            Ok(found) => found,
            Err(e) => return e as c_int,
        };

        for (i, &device) in found.iter().take(max_tokens as usize).enumerate() {
            *tokens.add(i) = mint_token(device);
        }
        *num_matches = found.len() as u32;
        trace!("sim: enumerate matched {}", found.len());
        FpgaResult::Ok as c_int
    })
}

unsafe extern "C" fn clone_token(src: OpaeToken, dst: *mut OpaeToken) -> c_int {
    catch_panic!({
        if dst.is_null() {
            return FpgaResult::InvalidParam as c_int;
        }
        match token_device(src) {
            Ok(device) => {
                *dst = mint_token(device);
                FpgaResult::Ok as c_int
            }
            Err(e) => e as c_int,
        }
    })
}

unsafe extern "C" fn destroy_token(token: *mut OpaeToken) -> c_int {
    catch_panic!({
        if token.is_null() || !lock(&TOKENS).remove(&(*token as usize)) {
            return FpgaResult::InvalidParam as c_int;
        }
        drop(Box::from_raw(*token as *mut SimToken));
        *token = ptr::null_mut();
        FpgaResult::Ok as c_int
    })
}

unsafe extern "C" fn get_properties(token: OpaeToken, props: *mut OpaeProperties) -> c_int {
    catch_panic!({
        if props.is_null() {
            return FpgaResult::InvalidParam as c_int;
        }
        code(check_magic(props).and_then(|_| {
            let device = token_device(token)?;
            with_card(|card| describe(card, device, &mut *props))
        }))
    })
}

unsafe extern "C" fn get_properties_from_handle(handle: OpaeHandle, props: *mut OpaeProperties) -> c_int {
    catch_panic!({
        if props.is_null() {
            return FpgaResult::InvalidParam as c_int;
        }
        code(check_magic(props).and_then(|_| {
            let device = handle_ref(handle)?.device;
            with_card(|card| describe(card, device, &mut *props))
        }))
    })
}

unsafe extern "C" fn update_properties(token: OpaeToken, props: *mut OpaeProperties) -> c_int {
    get_properties(token, props)
}

unsafe extern "C" fn open(token: OpaeToken, handle: *mut OpaeHandle, flags: c_int) -> c_int {
    catch_panic!({
        if handle.is_null() {
            return FpgaResult::InvalidParam as c_int;
        }
        let opened = token_device(token).and_then(|device| {
            with_card(|card| card.open(device, flags & OPEN_SHARED != 0))?;
            Ok(device)
        });
        match opened {
            Ok(device) => {
                let h = Box::into_raw(Box::new(SimHandle {
                    device,
                    wsids: Vec::new(),
                    mapped: Vec::new(),
                })) as OpaeHandle;
                lock(&HANDLES).insert(h as usize);
                *handle = h;
                trace!("sim: opened device {}", device);
                FpgaResult::Ok as c_int
            }
            Err(e) => e as c_int,
        }
    })
}

unsafe extern "C" fn close(handle: OpaeHandle) -> c_int {
    catch_panic!({
        if handle.is_null() || !lock(&HANDLES).remove(&(handle as usize)) {
            return FpgaResult::InvalidParam as c_int;
        }
        let h = Box::from_raw(handle as *mut SimHandle);
        code(with_card(|card| card.close(h.device, &h.wsids)))
    })
}

unsafe extern "C" fn reset(handle: OpaeHandle) -> c_int {
    catch_panic!({
        code(handle_ref(handle).and_then(|h| with_card(|card| card.reset(h.device))))
    })
}

unsafe extern "C" fn read_mmio32(handle: OpaeHandle, mmio_num: u32, offset: u64, value: *mut u32) -> c_int {
    catch_panic!({
        if value.is_null() {
            return FpgaResult::InvalidParam as c_int;
        }
        code(handle_ref(handle).and_then(|h| {
            *value = with_card(|card| card.read32(h.device, mmio_num, offset))?;
            Ok(())
        }))
    })
}

unsafe extern "C" fn write_mmio32(handle: OpaeHandle, mmio_num: u32, offset: u64, value: u32) -> c_int {
    catch_panic!({
        code(handle_ref(handle).and_then(|h| with_card(|card| card.write32(h.device, mmio_num, offset, value))))
    })
}

unsafe extern "C" fn read_mmio64(handle: OpaeHandle, mmio_num: u32, offset: u64, value: *mut u64) -> c_int {
    catch_panic!({
        if value.is_null() {
            return FpgaResult::InvalidParam as c_int;
        }
        code(handle_ref(handle).and_then(|h| {
            *value = with_card(|card| card.read64(h.device, mmio_num, offset))?;
            Ok(())
        }))
    })
}

unsafe extern "C" fn write_mmio64(handle: OpaeHandle, mmio_num: u32, offset: u64, value: u64) -> c_int {
    catch_panic!({
        code(handle_ref(handle).and_then(|h| with_card(|card| card.write64(h.device, mmio_num, offset, value))))
    })
}

unsafe extern "C" fn prepare_buffer(
    handle: OpaeHandle,
    len: u64,
    buf_addr: *mut *mut c_void,
    wsid: *mut u64,
    flags: c_int,
) -> c_int {
    catch_panic!({
        if buf_addr.is_null() || wsid.is_null() {
            return FpgaResult::InvalidParam as c_int;
        }
        let preallocated = flags & BUF_PREALLOCATED != 0;
        if preallocated && (*buf_addr).is_null() {
            return FpgaResult::InvalidParam as c_int;
        }
        let addr = preallocated.then(|| *buf_addr as u64);
        code(handle_ref(handle).and_then(|h| {
            let (addr, id) = with_card(|card| card.pin(len, addr))?;
            h.wsids.push(id);
            *buf_addr = addr as *mut c_void;
            *wsid = id;
            Ok(())
        }))
    })
}

unsafe extern "C" fn release_buffer(handle: OpaeHandle, wsid: u64) -> c_int {
    catch_panic!({
        code(handle_ref(handle).and_then(|h| {
            let at = h.wsids.iter().position(|&w| w == wsid).ok_or(FpgaResult::InvalidParam)?;
            h.wsids.swap_remove(at);
            with_card(|card| card.unpin(wsid))
        }))
    })
}

unsafe extern "C" fn get_io_address(handle: OpaeHandle, wsid: u64, ioaddr: *mut u64) -> c_int {
    catch_panic!({
        if ioaddr.is_null() {
            return FpgaResult::InvalidParam as c_int;
        }
        code(handle_ref(handle).and_then(|h| {
            if !h.wsids.contains(&wsid) {
                return Err(FpgaResult::InvalidParam);
            }
            *ioaddr = with_card(|card| card.io_address(wsid))?;
            Ok(())
        }))
    })
}

unsafe extern "C" fn read_error(token: OpaeToken, error_num: u32, value: *mut u64) -> c_int {
    catch_panic!({
        if value.is_null() {
            return FpgaResult::InvalidParam as c_int;
        }
        code(token_device(token).and_then(|device| {
            *value = with_card(|card| card.read_error(device, error_num))?;
            Ok(())
        }))
    })
}

unsafe extern "C" fn clear_error(token: OpaeToken, error_num: u32) -> c_int {
    catch_panic!({
        code(token_device(token).and_then(|device| with_card(|card| card.clear_error(device, error_num))))
    })
}

unsafe extern "C" fn clear_all_errors(token: OpaeToken) -> c_int {
    catch_panic!({
        code(token_device(token).and_then(|device| with_card(|card| card.clear_all_errors(device))))
    })
}

unsafe extern "C" fn reconfigure_slot(
    handle: OpaeHandle,
    slot: u32,
    bitstream: *const u8,
    len: usize,
    _flags: c_int,
) -> c_int {
    catch_panic!({
        if bitstream.is_null() || len == 0 {
            return FpgaResult::InvalidParam as c_int;
        }
        let image = std::slice::from_raw_parts(bitstream, len);
        code(handle_ref(handle).and_then(|h| with_card(|card| card.reconfigure(h.device, slot, image))))
    })
}

unsafe extern "C" fn map_mmio(handle: OpaeHandle, mmio_num: u32, mmio_ptr: *mut *mut u64) -> c_int {
    catch_panic!({
        if mmio_ptr.is_null() {
            return FpgaResult::InvalidParam as c_int;
        }
        code(handle_ref(handle).and_then(|h| {
            *mmio_ptr = with_card(|card| card.map(h.device, mmio_num))?;
            if !h.mapped.contains(&mmio_num) {
                h.mapped.push(mmio_num);
            }
            Ok(())
        }))
    })
}

unsafe extern "C" fn unmap_mmio(handle: OpaeHandle, mmio_num: u32) -> c_int {
    catch_panic!({
        code(handle_ref(handle).and_then(|h| {
            let at = h.mapped.iter().position(|&m| m == mmio_num).ok_or(FpgaResult::InvalidParam)?;
            h.mapped.swap_remove(at);
            Ok(())
        }))
    })
}

unsafe extern "C" fn get_error_info(token: OpaeToken, error_num: u32, info: *mut OpaeErrorInfo) -> c_int {
    catch_panic!({
        if info.is_null() {
            return FpgaResult::InvalidParam as c_int;
        }
        code(token_device(token).and_then(|device| {
            let (name, can_clear) = with_card(|card| card.error_info(device, error_num))?;
            let info = &mut *info;
            info.name = [0; OPAE_ERROR_NAME_MAX];
            for (dst, &b) in info.name.iter_mut().zip(name.as_bytes().iter().take(OPAE_ERROR_NAME_MAX - 1)) {
                *dst = b as c_char;
            }
            info.can_clear = can_clear;
            Ok(())
        }))
    })
}

unsafe extern "C" fn create_event_handle(event: *mut OpaeEventHandle) -> c_int {
    catch_panic!({
        if event.is_null() {
            return FpgaResult::InvalidParam as c_int;
        }
        let (wait, notify) = match UnixStream::pair() {
            Ok(pair) => pair,
            Err(_) => return FpgaResult::NoMemory as c_int,
        };
        let e = Box::into_raw(Box::new(SimEvent {
            wait,
            notify,
            registrations: Vec::new(),
        })) as OpaeEventHandle;
        lock(&EVENTS).insert(e as usize);
        *event = e;
        FpgaResult::Ok as c_int
    })
}

unsafe extern "C" fn destroy_event_handle(event: *mut OpaeEventHandle) -> c_int {
    catch_panic!({
        if event.is_null() || !lock(&EVENTS).remove(&(*event as usize)) {
            return FpgaResult::InvalidParam as c_int;
        }
        drop(Box::from_raw(*event as *mut SimEvent));
        *event = ptr::null_mut();
        FpgaResult::Ok as c_int
    })
}

unsafe extern "C" fn get_os_object_from_event_handle(event: OpaeEventHandle, fd: *mut c_int) -> c_int {
    catch_panic!({
        if fd.is_null() {
            return FpgaResult::InvalidParam as c_int;
        }
        code(event_ref(event).map(|e| {
            *fd = e.wait.as_raw_fd();
        }))
    })
}

/// Ports have no interrupt lines, so only error events can be registered
unsafe extern "C" fn register_event(handle: OpaeHandle, event_type: c_int, event: OpaeEventHandle, _flags: u32) -> c_int {
    catch_panic!({
        code(handle_ref(handle).and_then(|h| {
            match event_type {
                EVENT_ERROR => {}
                EVENT_INTERRUPT | EVENT_POWER_THERMAL => return Err(FpgaResult::NotSupported),
                _ => return Err(FpgaResult::InvalidParam),
            }
            let e = event_ref(event)?;
            if !e.registrations.contains(&(h.device, event_type)) {
                e.registrations.push((h.device, event_type));
            }
            Ok(())
        }))
    })
}

unsafe extern "C" fn unregister_event(handle: OpaeHandle, event_type: c_int, event: OpaeEventHandle) -> c_int {
    catch_panic!({
        code(handle_ref(handle).and_then(|h| {
            let e = event_ref(event)?;
            let at = e
                .registrations
                .iter()
                .position(|&r| r == (h.device, event_type))
                .ok_or(FpgaResult::NotFound)?;
            e.registrations.swap_remove(at);
            Ok(())
        }))
    })
}

// ============================================================================
// Plugin Registration
// ============================================================================

/// Plugin entry point - fills the host's adapter table.
///
/// # Safety
///
/// `vtable` must point to a writable table; `config_json` must be null or
/// a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn opae_plugin_configure(vtable: *mut OpaeAdapterVTable, config_json: *const c_char) -> c_int {
    catch_panic!({
        if vtable.is_null() {
            return FpgaResult::InvalidParam as c_int;
        }

        let config = if config_json.is_null() {
            SimConfig::default()
        } else {
            let text = match CStr::from_ptr(config_json).to_str() {
                Ok(text) => text,
                Err(_) => return FpgaResult::InvalidParam as c_int,
            };
            match serde_json::from_str::<SimConfig>(text) {
                Ok(config) => config,
                Err(_) => return FpgaResult::InvalidParam as c_int,
            }
        };
        trace!("sim: configured {:?}", config);
        *lock(&CONFIG) = Some(config);

        *vtable = OpaeAdapterVTable {
            abi_version: OPAE_PLUGIN_ABI_VERSION,
            initialize: Some(initialize),
            finalize: Some(finalize),
            enumerate: Some(enumerate),
            clone_token: Some(clone_token),
            destroy_token: Some(destroy_token),
            get_properties: Some(get_properties),
            get_properties_from_handle: Some(get_properties_from_handle),
            update_properties: Some(update_properties),
            open: Some(open),
            close: Some(close),
            reset: Some(reset),
            read_mmio32: Some(read_mmio32),
            write_mmio32: Some(write_mmio32),
            read_mmio64: Some(read_mmio64),
            write_mmio64: Some(write_mmio64),
            prepare_buffer: Some(prepare_buffer),
            release_buffer: Some(release_buffer),
            get_io_address: Some(get_io_address),
            read_error: Some(read_error),
            clear_error: Some(clear_error),
            clear_all_errors: Some(clear_all_errors),
            reconfigure_slot: Some(reconfigure_slot),
            map_mmio: Some(map_mmio),
            unmap_mmio: Some(unmap_mmio),
            get_error_info: Some(get_error_info),
            create_event_handle: Some(create_event_handle),
            destroy_event_handle: Some(destroy_event_handle),
            get_os_object_from_event_handle: Some(get_os_object_from_event_handle),
            register_event: Some(register_event),
            unregister_event: Some(unregister_event),
        };
        FpgaResult::Ok as c_int
    })
}
