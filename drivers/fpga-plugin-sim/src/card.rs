/*
 *  fpga-shell simulated card plugin - card model
 *
 *  One FME, one port accelerator and, optionally, child ports the port
 *  advertises through a version 1 feature header parameter list.
 */

use std::collections::HashMap;

use serde::Deserialize;

use crate::ffi::{
    field, FpgaResult, OpaeAcceleratorFields, OpaeDeviceFields, OpaeObjectFields, OpaeProperties, OpaeVersion,
    ACCELERATOR_UNASSIGNED, INTERFACE_SIM_DFL, OBJTYPE_ACCELERATOR, OBJTYPE_DEVICE,
};

pub const SIM_VENDOR_ID: u16 = 0x8086;
pub const SIM_DEVICE_ID: u16 = 0x0a5e;

pub const FME_GUID: u128 = 0xbfaf2ae9_4a52_46e3_82fe_38f0f9e17764;
pub const PORT_GUID: u128 = 0xd8424dc4_a4a3_c413_f89e_433683f9040b;
/// Child port n (from 1) gets `CHILD_GUID_BASE + n`
pub const CHILD_GUID_BASE: u128 = 0x44bfc10d_b42a_44e5_bd42_57dc93ea7f00;

pub const MMIO_SIZE: u64 = 0x1000;
/// Registers from here up are scratch space cleared by reset
pub const SCRATCH_BASE: u64 = 0x800;
pub const NUM_ERROR_REGS: usize = 2;
/// Name of each error register and whether it can be cleared
pub const ERROR_REGS: [(&str, bool); NUM_ERROR_REGS] = [("errors", true), ("first_error", false)];

const DFH_TYPE_AFU: u64 = 0x1 << 60;
const DFH_HAS_PARAMS: u64 = 1 << 31;
const PARAM_ID_CHILD_GUIDS: u64 = 0x0002;
const PARAM_EOP: u64 = 1 << 32;

/// Plugin configuration, passed as JSON by the host
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub segment: u16,
    pub bus: u8,
    pub socket_id: u8,
    /// Child ports advertised by the port accelerator
    pub children: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            segment: 0,
            bus: 0x5e,
            socket_id: 0,
            children: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Fme,
    Port,
}

#[derive(Debug)]
pub struct SimDevice {
    pub kind: Kind,
    pub guid: u128,
    pub parent: Option<usize>,
    pub function: u8,
    pub mmio: Vec<u64>,
    pub errors: [u64; NUM_ERROR_REGS],
    pub open_count: u32,
    pub exclusive: bool,
}

impl SimDevice {
    fn new(kind: Kind, guid: u128, parent: Option<usize>, function: u8) -> Self {
        let mut mmio = vec![0u64; (MMIO_SIZE / 8) as usize];
        if kind == Kind::Port {
            mmio[0] = DFH_TYPE_AFU;
            mmio[1] = guid as u64;
            mmio[2] = (guid >> 64) as u64;
        }
        Self {
            kind,
            guid,
            parent,
            function,
            mmio,
            errors: [0; NUM_ERROR_REGS],
            open_count: 0,
            exclusive: false,
        }
    }

    /// Turn the header into version 1 and list `guids` as children
    fn advertise_children(&mut self, guids: &[u128]) {
        self.mmio[0] = DFH_TYPE_AFU | 1 << 52;
        self.mmio[0x20 / 8] = DFH_HAS_PARAMS;
        let size = 1 + 2 * guids.len() as u64;
        self.mmio[0x28 / 8] = PARAM_ID_CHILD_GUIDS | PARAM_EOP | size << 35;
        for (i, g) in guids.iter().enumerate() {
            let at = 0x30 / 8 + i * 2;
            self.mmio[at] = *g as u64;
            self.mmio[at + 1] = (*g >> 64) as u64;
        }
    }
}

/// A pinned buffer. Host-supplied memory is only recorded; memory the
/// plugin allocated lives in `storage`.
#[derive(Debug)]
pub struct SimBuffer {
    pub addr: u64,
    pub len: u64,
    pub storage: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct SimCard {
    pub config: SimConfig,
    pub devices: Vec<SimDevice>,
    pub buffers: HashMap<u64, SimBuffer>,
    next_wsid: u64,
}

impl SimCard {
    pub fn new(config: SimConfig) -> Self {
        let children = config.children.min(16);
        let mut devices = vec![
            SimDevice::new(Kind::Fme, FME_GUID, None, 0),
            SimDevice::new(Kind::Port, PORT_GUID, Some(0), 0),
        ];
        let child_guids: Vec<u128> = (1..=children).map(|n| CHILD_GUID_BASE + u128::from(n)).collect();
        if !child_guids.is_empty() {
            devices[1].advertise_children(&child_guids);
        }
        for (i, g) in child_guids.iter().enumerate() {
            devices.push(SimDevice::new(Kind::Port, *g, Some(0), (i + 1) as u8));
        }
        Self {
            config,
            devices,
            buffers: HashMap::new(),
            next_wsid: 1,
        }
    }

    fn device(&self, device: usize) -> Result<&SimDevice, FpgaResult> {
        self.devices.get(device).ok_or(FpgaResult::InvalidParam)
    }

    fn device_mut(&mut self, device: usize) -> Result<&mut SimDevice, FpgaResult> {
        self.devices.get_mut(device).ok_or(FpgaResult::InvalidParam)
    }

    /// Populate `props` for `device`, parent excepted
    pub fn fill(&self, device: usize, props: &mut OpaeProperties) -> Result<(), FpgaResult> {
        let dev = self.device(device)?;
        let mut valid = 0u64;
        for bit in [
            field::OBJTYPE,
            field::SEGMENT,
            field::BUS,
            field::DEVICE,
            field::FUNCTION,
            field::SOCKETID,
            field::VENDORID,
            field::DEVICEID,
            field::SUB_VENDORID,
            field::SUB_DEVICEID,
            field::GUID,
            field::OBJECTID,
            field::NUM_ERRORS,
            field::INTERFACE,
        ] {
            valid |= 1 << bit;
        }

        props.segment = self.config.segment;
        props.bus = self.config.bus;
        props.device = 0;
        props.function = dev.function;
        props.socket_id = self.config.socket_id;
        props.vendor_id = SIM_VENDOR_ID;
        props.device_id = SIM_DEVICE_ID;
        props.subsystem_vendor_id = SIM_VENDOR_ID;
        props.subsystem_device_id = SIM_DEVICE_ID;
        props.guid = dev.guid.to_be_bytes();
        props.object_id = object_id(self.config.bus, device);
        props.num_errors = NUM_ERROR_REGS as u32;
        props.interface = INTERFACE_SIM_DFL;

        match dev.kind {
            Kind::Fme => {
                props.objtype = OBJTYPE_DEVICE;
                valid |= 1 << field::NUM_SLOTS | 1 << field::BBSID | 1 << field::BBSVERSION;
                props.u = OpaeObjectFields {
                    device: OpaeDeviceFields {
                        num_slots: 1,
                        bbs_id: 0x0000_0000_0a5e_0001,
                        bbs_version: OpaeVersion {
                            major: 1,
                            minor: 0,
                            patch: 0,
                        },
                    },
                };
            }
            Kind::Port => {
                props.objtype = OBJTYPE_ACCELERATOR;
                valid |= 1 << field::ACCELERATOR_STATE | 1 << field::NUM_MMIO | 1 << field::NUM_INTERRUPTS;
                props.u = OpaeObjectFields {
                    accelerator: OpaeAcceleratorFields {
                        state: ACCELERATOR_UNASSIGNED,
                        num_mmio: 1,
                        num_interrupts: 0,
                    },
                };
            }
        }

        if dev.parent.is_some() {
            valid |= 1 << field::PARENT;
        }
        props.valid_fields = valid;
        Ok(())
    }

    /// Whether `device` satisfies every populated field of `filter`.
    /// `filter_parent` is the device the filter's parent token refers to.
    pub fn matches(&self, device: usize, filter: &OpaeProperties, filter_parent: Option<usize>) -> bool {
        let mut candidate = crate::plugin::empty_properties();
        if self.fill(device, &mut candidate).is_err() {
            return false;
        }
        let dev = &self.devices[device];

        if filter.has(field::PARENT) && (filter_parent.is_none() || filter_parent != dev.parent) {
            return false;
        }

        let same = |bit: u32, eq: bool| !filter.has(bit) || (candidate.has(bit) && eq);
        let common = same(field::OBJTYPE, filter.objtype == candidate.objtype)
            && same(field::SEGMENT, filter.segment == candidate.segment)
            && same(field::BUS, filter.bus == candidate.bus)
            && same(field::DEVICE, filter.device == candidate.device)
            && same(field::FUNCTION, filter.function == candidate.function)
            && same(field::SOCKETID, filter.socket_id == candidate.socket_id)
            && same(field::VENDORID, filter.vendor_id == candidate.vendor_id)
            && same(field::DEVICEID, filter.device_id == candidate.device_id)
            && same(field::SUB_VENDORID, filter.subsystem_vendor_id == candidate.subsystem_vendor_id)
            && same(field::SUB_DEVICEID, filter.subsystem_device_id == candidate.subsystem_device_id)
            && same(field::GUID, filter.guid == candidate.guid)
            && same(field::OBJECTID, filter.object_id == candidate.object_id)
            && same(field::NUM_ERRORS, filter.num_errors == candidate.num_errors)
            && same(field::INTERFACE, filter.interface == candidate.interface);
        if !common {
            return false;
        }

        // type-specific bits only mean something when the filter names the type
        if !filter.has(field::OBJTYPE) {
            return true;
        }
        // SAFETY: both records carry the same object type at this point
        unsafe {
            if candidate.objtype == OBJTYPE_DEVICE {
                let (f, c) = (filter.u.device, candidate.u.device);
                same(field::NUM_SLOTS, f.num_slots == c.num_slots)
                    && same(field::BBSID, f.bbs_id == c.bbs_id)
                    && same(
                        field::BBSVERSION,
                        (f.bbs_version.major, f.bbs_version.minor, f.bbs_version.patch)
                            == (c.bbs_version.major, c.bbs_version.minor, c.bbs_version.patch),
                    )
            } else {
                let (f, c) = (filter.u.accelerator, candidate.u.accelerator);
                same(field::ACCELERATOR_STATE, f.state == c.state)
                    && same(field::NUM_MMIO, f.num_mmio == c.num_mmio)
                    && same(field::NUM_INTERRUPTS, f.num_interrupts == c.num_interrupts)
            }
        }
    }

    fn mmio_index(mmio_num: u32, offset: u64, align: u64) -> Result<usize, FpgaResult> {
        if mmio_num != 0 || offset % align != 0 || offset >= MMIO_SIZE {
            return Err(FpgaResult::InvalidParam);
        }
        Ok((offset / 8) as usize)
    }

    pub fn read64(&self, device: usize, mmio_num: u32, offset: u64) -> Result<u64, FpgaResult> {
        let idx = Self::mmio_index(mmio_num, offset, 8)?;
        Ok(self.device(device)?.mmio[idx])
    }

    /// Base of MMIO region `mmio_num`. The register file is never resized,
    /// so the pointer stays valid until the card is dropped.
    pub fn map(&mut self, device: usize, mmio_num: u32) -> Result<*mut u64, FpgaResult> {
        if mmio_num != 0 {
            return Err(FpgaResult::InvalidParam);
        }
        Ok(self.device_mut(device)?.mmio.as_mut_ptr())
    }

    pub fn write64(&mut self, device: usize, mmio_num: u32, offset: u64, value: u64) -> Result<(), FpgaResult> {
        let idx = Self::mmio_index(mmio_num, offset, 8)?;
        if offset < SCRATCH_BASE {
            return Err(FpgaResult::NoAccess);
        }
        self.device_mut(device)?.mmio[idx] = value;
        Ok(())
    }

    pub fn read32(&self, device: usize, mmio_num: u32, offset: u64) -> Result<u32, FpgaResult> {
        let idx = Self::mmio_index(mmio_num, offset, 4)?;
        let qword = self.device(device)?.mmio[idx];
        let shift = (offset % 8) * 8;
        Ok((qword >> shift) as u32)
    }

    pub fn write32(&mut self, device: usize, mmio_num: u32, offset: u64, value: u32) -> Result<(), FpgaResult> {
        let idx = Self::mmio_index(mmio_num, offset, 4)?;
        if offset < SCRATCH_BASE {
            return Err(FpgaResult::NoAccess);
        }
        let shift = (offset % 8) * 8;
        let reg = &mut self.device_mut(device)?.mmio[idx];
        *reg = (*reg & !(0xffff_ffffu64 << shift)) | u64::from(value) << shift;
        Ok(())
    }

    /// Clear the scratch registers
    pub fn reset(&mut self, device: usize) -> Result<(), FpgaResult> {
        let dev = self.device_mut(device)?;
        for reg in &mut dev.mmio[(SCRATCH_BASE / 8) as usize..] {
            *reg = 0;
        }
        Ok(())
    }

    pub fn open(&mut self, device: usize, shared: bool) -> Result<(), FpgaResult> {
        let dev = self.device_mut(device)?;
        if dev.exclusive || (!shared && dev.open_count > 0) {
            return Err(FpgaResult::Busy);
        }
        dev.open_count += 1;
        dev.exclusive = !shared;
        Ok(())
    }

    pub fn close(&mut self, device: usize, wsids: &[u64]) -> Result<(), FpgaResult> {
        for wsid in wsids {
            self.buffers.remove(wsid);
        }
        let dev = self.device_mut(device)?;
        dev.open_count = dev.open_count.saturating_sub(1);
        if dev.open_count == 0 {
            dev.exclusive = false;
        }
        Ok(())
    }

    /// Pin `len` bytes at `addr`, or allocate them when `addr` is `None`
    pub fn pin(&mut self, len: u64, addr: Option<u64>) -> Result<(u64, u64), FpgaResult> {
        if len == 0 {
            return Err(FpgaResult::InvalidParam);
        }
        let buffer = match addr {
            Some(addr) => SimBuffer { addr, len, storage: None },
            None => {
                let size = usize::try_from(len).map_err(|_| FpgaResult::NoMemory)?;
                let storage = vec![0u8; size];
                SimBuffer {
                    addr: storage.as_ptr() as u64,
                    len,
                    storage: Some(storage),
                }
            }
        };
        let wsid = self.next_wsid;
        self.next_wsid += 1;
        let addr = buffer.addr;
        self.buffers.insert(wsid, buffer);
        Ok((addr, wsid))
    }

    pub fn unpin(&mut self, wsid: u64) -> Result<(), FpgaResult> {
        self.buffers.remove(&wsid).map(|_| ()).ok_or(FpgaResult::InvalidParam)
    }

    /// The simulated IOMMU maps identity
    pub fn io_address(&self, wsid: u64) -> Result<u64, FpgaResult> {
        self.buffers.get(&wsid).map(|b| b.addr).ok_or(FpgaResult::InvalidParam)
    }

    pub fn read_error(&self, device: usize, error_num: u32) -> Result<u64, FpgaResult> {
        self.device(device)?
            .errors
            .get(error_num as usize)
            .copied()
            .ok_or(FpgaResult::InvalidParam)
    }

    pub fn error_info(&self, device: usize, error_num: u32) -> Result<(&'static str, bool), FpgaResult> {
        self.device(device)?;
        ERROR_REGS.get(error_num as usize).copied().ok_or(FpgaResult::InvalidParam)
    }

    pub fn clear_error(&mut self, device: usize, error_num: u32) -> Result<(), FpgaResult> {
        let (_, can_clear) = self.error_info(device, error_num)?;
        if !can_clear {
            return Err(FpgaResult::NotSupported);
        }
        let reg = self
            .device_mut(device)?
            .errors
            .get_mut(error_num as usize)
            .ok_or(FpgaResult::InvalidParam)?;
        *reg = 0;
        Ok(())
    }

    /// Clear every register that can be cleared
    pub fn clear_all_errors(&mut self, device: usize) -> Result<(), FpgaResult> {
        let dev = self.device_mut(device)?;
        for (reg, (_, can_clear)) in dev.errors.iter_mut().zip(ERROR_REGS) {
            if can_clear {
                *reg = 0;
            }
        }
        Ok(())
    }

    /// Program slot 0 through the FME. The first 16 bytes of the image
    /// become the port's GUID.
    pub fn reconfigure(&mut self, device: usize, slot: u32, bitstream: &[u8]) -> Result<(), FpgaResult> {
        if self.device(device)?.kind != Kind::Fme || slot != 0 {
            return Err(FpgaResult::InvalidParam);
        }
        let Some(header) = bitstream.get(..16) else {
            return Err(FpgaResult::ReconfError);
        };
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(header);
        let guid = u128::from_be_bytes(bytes);

        let port = self.device_mut(1)?;
        if port.open_count > 0 {
            return Err(FpgaResult::Busy);
        }
        port.guid = guid;
        port.mmio[1] = guid as u64;
        port.mmio[2] = (guid >> 64) as u64;
        Ok(())
    }
}

fn object_id(bus: u8, device: usize) -> u64 {
    u64::from(bus) << 20 | device as u64
}
