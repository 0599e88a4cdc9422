/*
 *  runtime/drivers/mock.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Mock backend for testing
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

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::runtime::dfh;
use crate::runtime::error::{FpgaError, Result};
use crate::runtime::properties::{Guid, PropertyRecord, RawProperties, field};
use crate::runtime::table::AdapterTable;
use crate::runtime::token::Token;
use crate::runtime::traits::{Backend, ErrorInfo, EventType, PinnedBuffer, RawEvent, RawHandle, RawToken};

/// Mock backend for testing
///
/// Simulates a set of devices without hardware. Every token, handle and
/// pinned buffer it hands out is tracked, so tests can check that the
/// runtime releases each of them exactly once.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
pub struct MockDevice {
    pub record: PropertyRecord,
    pub parent: Option<usize>,
    pub mmio: HashMap<u64, u64>,
}

/// Internal state for the mock backend (shared for inspection in tests)
#[derive(Debug, Default)]
pub struct MockState {
    pub devices: Vec<MockDevice>,

    /// live raw token -> device index
    tokens: HashMap<usize, usize>,
    /// open raw handle -> device index
    handles: HashMap<usize, usize>,
    /// pinned wsid -> raw handle
    pins: HashMap<u64, usize>,
    /// (raw handle, region) currently mapped
    mappings: HashMap<(usize, u32), u64>,
    /// live event -> (raw handle, type) registrations
    events: HashMap<usize, Vec<(usize, EventType)>>,
    next_id: usize,

    pub init_calls: usize,
    pub finalize_calls: usize,
    pub destroy_calls: usize,
    pub double_destroys: usize,
    pub release_calls: usize,
    pub reset_calls: usize,
    pub reconfigured_bytes: usize,
    pub mmio_reads: usize,
    pub error_registers: HashMap<u32, u64>,

    /// Simulate failures (for error testing)
    pub simulate_init_failure: bool,
    pub simulate_finalize_failure: bool,
    pub simulate_enumerate_failure: Option<FpgaError>,
    pub simulate_mmio_failure: Option<FpgaError>,
    fail_open: Vec<Guid>,
    fail_pin: Vec<(Guid, FpgaError)>,
    fail_release: Vec<(Guid, FpgaError)>,
}

impl MockState {
    fn mint(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    fn device_of_token(&self, token: RawToken) -> Result<usize> {
        self.tokens
            .get(&token.0)
            .copied()
            .ok_or_else(|| FpgaError::InvalidParam(format!("unknown token {:?}", token)))
    }

    fn device_of_handle(&self, handle: RawHandle) -> Result<usize> {
        self.handles
            .get(&handle.0)
            .copied()
            .ok_or_else(|| FpgaError::InvalidParam(format!("unknown handle {:?}", handle)))
    }

    fn guid_of(&self, device: usize) -> Option<Guid> {
        let record = &self.devices[device].record;
        record.has(field::GUID).then_some(record.guid)
    }

    /// Record for `device`; a parent is returned as a freshly minted token
    fn describe(&mut self, device: usize) -> RawProperties {
        let mut raw = RawProperties::new(self.devices[device].record.clone());
        if let Some(parent) = self.devices[device].parent {
            let id = self.mint();
            self.tokens.insert(id, parent);
            raw = raw.with_parent(RawToken(id));
        }
        raw
    }

    fn matches(&self, filter: &RawProperties, device: usize) -> bool {
        if filter.record.has(field::PARENT) {
            let wanted = filter.parent.and_then(|p| self.tokens.get(&p.0).copied());
            if wanted.is_none() || wanted != self.devices[device].parent {
                return false;
            }
        }
        filter.record.matches(&self.devices[device].record)
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock plus an adapter table wrapping a second reference to it
    pub fn with_table(library: &str) -> (Self, Arc<AdapterTable>) {
        let mock = Self::new();
        let table = AdapterTable::new(library, Box::new(mock.clone()));
        (mock, Arc::new(table))
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock()
    }

    pub fn add_device(&self, record: PropertyRecord) -> usize {
        let mut st = self.state();
        st.devices.push(MockDevice { record, ..Default::default() });
        st.devices.len() - 1
    }

    pub fn add_child_device(&self, record: PropertyRecord, parent: usize) -> usize {
        let mut st = self.state();
        st.devices.push(MockDevice { record, parent: Some(parent), ..Default::default() });
        st.devices.len() - 1
    }

    /// Make `device` advertise `guids` as its child ports
    pub fn set_child_guids(&self, device: usize, guids: &[Guid]) {
        let mut st = self.state();
        st.devices[device].mmio.extend(dfh::child_list_layout(guids));
    }

    /// Mint a live token for `device` bound to `adapter`
    pub fn token_for(&self, adapter: &Arc<AdapterTable>, device: usize) -> Token {
        let mut st = self.state();
        let id = st.mint();
        st.tokens.insert(id, device);
        Token::from_raw(RawToken(id), Arc::clone(adapter))
    }

    pub fn live_tokens(&self) -> usize {
        self.state().tokens.len()
    }

    pub fn open_handles(&self) -> usize {
        self.state().handles.len()
    }

    pub fn pinned_buffers(&self) -> usize {
        self.state().pins.len()
    }

    pub fn mapped_regions(&self) -> usize {
        self.state().mappings.len()
    }

    pub fn live_events(&self) -> usize {
        self.state().events.len()
    }

    /// Registrations held by `event`
    pub fn registrations(&self, event: RawEvent) -> Vec<EventType> {
        let st = self.state();
        st.events
            .get(&event.0)
            .map(|regs| regs.iter().map(|&(_, t)| t).collect())
            .unwrap_or_default()
    }

    pub fn fail_open_of(&self, guid: Guid) {
        self.state().fail_open.push(guid);
    }

    pub fn fail_pin_on(&self, guid: Guid, error: FpgaError) {
        self.state().fail_pin.push((guid, error));
    }

    pub fn fail_release_on(&self, guid: Guid, error: FpgaError) {
        self.state().fail_release.push((guid, error));
    }

    pub fn clear_failures(&self) {
        let mut st = self.state();
        st.fail_open.clear();
        st.fail_pin.clear();
        st.fail_release.clear();
    }
}

fn injected(list: &[(Guid, FpgaError)], guid: Option<Guid>) -> Option<FpgaError> {
    let guid = guid?;
    list.iter().find(|(g, _)| *g == guid).map(|(_, e)| e.clone())
}

impl Backend for MockBackend {
    fn initialize(&self) -> Result<()> {
        let mut st = self.state();
        st.init_calls += 1;
        if st.simulate_init_failure {
            return Err(FpgaError::Exception("mock initialize failure".into()));
        }
        Ok(())
    }

    fn finalize(&self) -> Result<()> {
        let mut st = self.state();
        st.finalize_calls += 1;
        if st.simulate_finalize_failure {
            return Err(FpgaError::Exception("mock finalize failure".into()));
        }
        Ok(())
    }

    fn enumerate(&self, filters: &[RawProperties]) -> Result<Vec<RawToken>> {
        let mut st = self.state();
        if let Some(e) = st.simulate_enumerate_failure.clone() {
            return Err(e);
        }
        let found: Vec<usize> = (0..st.devices.len())
            .filter(|&d| filters.is_empty() || filters.iter().any(|f| st.matches(f, d)))
            .collect();
        Ok(found
            .into_iter()
            .map(|d| {
                let id = st.mint();
                st.tokens.insert(id, d);
                RawToken(id)
            })
            .collect())
    }

    fn clone_token(&self, token: RawToken) -> Result<RawToken> {
        let mut st = self.state();
        let device = st.device_of_token(token)?;
        let id = st.mint();
        st.tokens.insert(id, device);
        Ok(RawToken(id))
    }

    fn destroy_token(&self, token: RawToken) -> Result<()> {
        let mut st = self.state();
        st.destroy_calls += 1;
        if st.tokens.remove(&token.0).is_none() {
            st.double_destroys += 1;
            return Err(FpgaError::InvalidParam(format!("token {:?} already destroyed", token)));
        }
        Ok(())
    }

    fn get_properties(&self, token: RawToken) -> Result<RawProperties> {
        let mut st = self.state();
        let device = st.device_of_token(token)?;
        Ok(st.describe(device))
    }

    fn get_properties_from_handle(&self, handle: RawHandle) -> Result<RawProperties> {
        let mut st = self.state();
        let device = st.device_of_handle(handle)?;
        Ok(st.describe(device))
    }

    fn update_properties(&self, token: RawToken, props: &mut RawProperties) -> Result<()> {
        let mut st = self.state();
        let device = st.device_of_token(token)?;
        *props = st.describe(device);
        Ok(())
    }

    fn open(&self, token: RawToken, _flags: i32) -> Result<RawHandle> {
        let mut st = self.state();
        let device = st.device_of_token(token)?;
        if let Some(guid) = st.guid_of(device) {
            if st.fail_open.contains(&guid) {
                return Err(FpgaError::Busy);
            }
        }
        let id = st.mint();
        st.handles.insert(id, device);
        Ok(RawHandle(id))
    }

    fn close(&self, handle: RawHandle) -> Result<()> {
        let mut st = self.state();
        st.handles
            .remove(&handle.0)
            .map(|_| ())
            .ok_or_else(|| FpgaError::InvalidParam(format!("handle {:?} not open", handle)))
    }

    fn reset(&self, handle: RawHandle) -> Result<()> {
        let mut st = self.state();
        st.device_of_handle(handle)?;
        st.reset_calls += 1;
        Ok(())
    }

    fn read_mmio32(&self, handle: RawHandle, _mmio_num: u32, offset: u64) -> Result<u32> {
        let mut st = self.state();
        st.mmio_reads += 1;
        if let Some(e) = st.simulate_mmio_failure.clone() {
            return Err(e);
        }
        let device = st.device_of_handle(handle)?;
        Ok(st.devices[device].mmio.get(&offset).copied().unwrap_or(0) as u32)
    }

    fn read_mmio64(&self, handle: RawHandle, _mmio_num: u32, offset: u64) -> Result<u64> {
        let mut st = self.state();
        st.mmio_reads += 1;
        if let Some(e) = st.simulate_mmio_failure.clone() {
            return Err(e);
        }
        let device = st.device_of_handle(handle)?;
        Ok(st.devices[device].mmio.get(&offset).copied().unwrap_or(0))
    }

    fn write_mmio32(&self, handle: RawHandle, _mmio_num: u32, offset: u64, value: u32) -> Result<()> {
        let mut st = self.state();
        let device = st.device_of_handle(handle)?;
        st.devices[device].mmio.insert(offset, u64::from(value));
        Ok(())
    }

    fn write_mmio64(&self, handle: RawHandle, _mmio_num: u32, offset: u64, value: u64) -> Result<()> {
        let mut st = self.state();
        let device = st.device_of_handle(handle)?;
        st.devices[device].mmio.insert(offset, value);
        Ok(())
    }

    fn map_mmio(&self, handle: RawHandle, mmio_num: u32) -> Result<u64> {
        let mut st = self.state();
        st.device_of_handle(handle)?;
        if mmio_num > 1 {
            return Err(FpgaError::InvalidParam(format!("no region {}", mmio_num)));
        }
        let base = 0x7e00_0000_0000 + ((handle.0 as u64) << 16) + (u64::from(mmio_num) << 12);
        st.mappings.insert((handle.0, mmio_num), base);
        Ok(base)
    }

    fn unmap_mmio(&self, handle: RawHandle, mmio_num: u32) -> Result<()> {
        let mut st = self.state();
        st.mappings
            .remove(&(handle.0, mmio_num))
            .map(|_| ())
            .ok_or_else(|| FpgaError::InvalidParam(format!("region {} not mapped on {:?}", mmio_num, handle)))
    }

    fn prepare_buffer(&self, handle: RawHandle, _len: u64, addr: Option<u64>, _flags: i32) -> Result<PinnedBuffer> {
        let mut st = self.state();
        let device = st.device_of_handle(handle)?;
        if let Some(e) = injected(&st.fail_pin, st.guid_of(device)) {
            return Err(e);
        }
        let wsid = st.mint() as u64;
        st.pins.insert(wsid, handle.0);
        Ok(PinnedBuffer {
            addr: addr.unwrap_or(0x7f00_0000_0000 + (wsid << 12)),
            wsid,
        })
    }

    fn release_buffer(&self, handle: RawHandle, wsid: u64) -> Result<()> {
        let mut st = self.state();
        st.release_calls += 1;
        let device = st.device_of_handle(handle)?;
        if let Some(e) = injected(&st.fail_release, st.guid_of(device)) {
            return Err(e);
        }
        match st.pins.get(&wsid) {
            Some(&h) if h == handle.0 => {
                st.pins.remove(&wsid);
                Ok(())
            }
            _ => Err(FpgaError::InvalidParam(format!("wsid {} not pinned on {:?}", wsid, handle))),
        }
    }

    fn get_io_address(&self, handle: RawHandle, wsid: u64) -> Result<u64> {
        let st = self.state();
        match st.pins.get(&wsid) {
            Some(&h) if h == handle.0 => Ok(wsid << 12),
            _ => Err(FpgaError::NotFound(format!("wsid {}", wsid))),
        }
    }

    fn read_error(&self, token: RawToken, error_num: u32) -> Result<u64> {
        let st = self.state();
        st.device_of_token(token)?;
        st.error_registers
            .get(&error_num)
            .copied()
            .ok_or_else(|| FpgaError::NotFound(format!("error register {}", error_num)))
    }

    fn get_error_info(&self, token: RawToken, error_num: u32) -> Result<ErrorInfo> {
        let st = self.state();
        st.device_of_token(token)?;
        if !st.error_registers.contains_key(&error_num) {
            return Err(FpgaError::NotFound(format!("error register {}", error_num)));
        }
        Ok(ErrorInfo {
            name: format!("error{}", error_num),
            can_clear: true,
        })
    }

    fn clear_error(&self, token: RawToken, error_num: u32) -> Result<()> {
        let mut st = self.state();
        st.device_of_token(token)?;
        match st.error_registers.get_mut(&error_num) {
            Some(v) => {
                *v = 0;
                Ok(())
            }
            None => Err(FpgaError::NotFound(format!("error register {}", error_num))),
        }
    }

    fn clear_all_errors(&self, token: RawToken) -> Result<()> {
        let mut st = self.state();
        st.device_of_token(token)?;
        st.error_registers.values_mut().for_each(|v| *v = 0);
        Ok(())
    }

    fn reconfigure_slot(&self, handle: RawHandle, _slot: u32, bitstream: &[u8], _flags: i32) -> Result<()> {
        let mut st = self.state();
        st.device_of_handle(handle)?;
        st.reconfigured_bytes += bitstream.len();
        Ok(())
    }

    fn create_event_handle(&self) -> Result<RawEvent> {
        let mut st = self.state();
        let id = st.mint();
        st.events.insert(id, Vec::new());
        Ok(RawEvent(id))
    }

    fn destroy_event_handle(&self, event: RawEvent) -> Result<()> {
        let mut st = self.state();
        st.events
            .remove(&event.0)
            .map(|_| ())
            .ok_or_else(|| FpgaError::InvalidParam(format!("event {:?} already destroyed", event)))
    }

    fn event_os_object(&self, event: RawEvent) -> Result<i32> {
        let st = self.state();
        if !st.events.contains_key(&event.0) {
            return Err(FpgaError::InvalidParam(format!("unknown event {:?}", event)));
        }
        Ok(100 + event.0 as i32)
    }

    fn register_event(&self, handle: RawHandle, event_type: EventType, event: RawEvent, _flags: u32) -> Result<()> {
        let mut st = self.state();
        st.device_of_handle(handle)?;
        let regs = st
            .events
            .get_mut(&event.0)
            .ok_or_else(|| FpgaError::InvalidParam(format!("unknown event {:?}", event)))?;
        regs.push((handle.0, event_type));
        Ok(())
    }

    fn unregister_event(&self, handle: RawHandle, event_type: EventType, event: RawEvent) -> Result<()> {
        let mut st = self.state();
        let regs = st
            .events
            .get_mut(&event.0)
            .ok_or_else(|| FpgaError::InvalidParam(format!("unknown event {:?}", event)))?;
        let at = regs
            .iter()
            .position(|&r| r == (handle.0, event_type))
            .ok_or_else(|| FpgaError::NotFound(format!("{:?} registration on {:?}", event_type, handle)))?;
        regs.remove(at);
        Ok(())
    }
}
