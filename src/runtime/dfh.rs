/*
 *  runtime/dfh.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Device feature header parameters - child port discovery
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

//! Child port discovery
//!
//! A multi-port accelerator lists the GUIDs of its children in a parameter
//! record hanging off its version 1 device feature header:
//!
//! ```text
//! 0x00  DFH        version in bits 59:52, must be >= 1
//! 0x20  CSR group  bit 31 set when a parameter list follows
//! 0x28  parameter records, each starting with a header qword:
//!         15:0   parameter id
//!         31:16  parameter version
//!         32     end of parameters
//!         63:35  record size in qwords, header included
//! ```
//!
//! The child list record (id [`PARAM_ID_CHILD_GUIDS`]) carries one GUID per
//! pair of qwords, low half first.

use log::debug;

use super::error::{FpgaError, Result};
use super::properties::Guid;

pub const DFH_OFFSET: u64 = 0x00;
pub const DFH_CSR_GROUP_OFFSET: u64 = 0x20;
pub const DFH_PARAM_LIST_OFFSET: u64 = 0x28;

pub const DFH_HAS_PARAMS: u64 = 1 << 31;

/// Parameter id of the child GUID list
pub const PARAM_ID_CHILD_GUIDS: u16 = 0x0002;

const MAX_PARAM_RECORDS: usize = 64;
const MAX_CHILDREN: u64 = 64;

pub fn dfh_version(dfh: u64) -> u8 {
    ((dfh >> 52) & 0xff) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamHeader {
    pub id: u16,
    pub version: u16,
    pub eop: bool,
    /// Record size in qwords, header included
    pub next: u64,
}

impl ParamHeader {
    pub fn decode(raw: u64) -> Self {
        Self {
            id: (raw & 0xffff) as u16,
            version: ((raw >> 16) & 0xffff) as u16,
            eop: raw & (1 << 32) != 0,
            next: raw >> 35,
        }
    }

    pub fn encode(&self) -> u64 {
        u64::from(self.id)
            | u64::from(self.version) << 16
            | u64::from(self.eop) << 32
            | self.next << 35
    }
}

/// Walk the parameter list through `read64` and return the advertised
/// child GUIDs in order. A header without parameters, or a list without a
/// child record, means no children. So does a header that cannot be read
/// at all; once a parameter list is advertised, read errors are returned.
pub fn child_guids<F>(mut read64: F) -> Result<Vec<Guid>>
where
    F: FnMut(u64) -> Result<u64>,
{
    let dfh = match read64(DFH_OFFSET) {
        Ok(dfh) => dfh,
        Err(e) => {
            debug!("feature header not readable, assuming no children: {}", e);
            return Ok(Vec::new());
        }
    };
    if dfh_version(dfh) < 1 {
        return Ok(Vec::new());
    }
    let csr_group = match read64(DFH_CSR_GROUP_OFFSET) {
        Ok(v) => v,
        Err(e) => {
            debug!("CSR group not readable, assuming no children: {}", e);
            return Ok(Vec::new());
        }
    };
    if csr_group & DFH_HAS_PARAMS == 0 {
        return Ok(Vec::new());
    }

    let mut offset = DFH_PARAM_LIST_OFFSET;
    for _ in 0..MAX_PARAM_RECORDS {
        let header = ParamHeader::decode(read64(offset)?);

        if header.id == PARAM_ID_CHILD_GUIDS {
            if header.next < 1 {
                return Err(FpgaError::Exception("empty child list record".into()));
            }
            let count = ((header.next - 1) / 2).min(MAX_CHILDREN);
            let mut guids = Vec::with_capacity(count as usize);
            for i in 0..count {
                let at = offset + 8 + i * 16;
                let lo = read64(at)?;
                let hi = read64(at + 8)?;
                guids.push(Guid::from_u128(u128::from(hi) << 64 | u128::from(lo)));
            }
            debug!("parameter list at {:#x} advertises {} child(ren)", offset, guids.len());
            return Ok(guids);
        }

        if header.eop {
            return Ok(Vec::new());
        }
        if header.next == 0 {
            return Err(FpgaError::Exception(format!(
                "zero-sized parameter record at {:#x}",
                offset
            )));
        }
        offset += header.next * 8;
    }

    Err(FpgaError::Exception("parameter list is not terminated".into()))
}

/// The register image of a version 1 header advertising `guids`, as
/// `(offset, value)` pairs. Used by backends that emulate multi-port
/// accelerators.
pub fn child_list_layout(guids: &[Guid]) -> Vec<(u64, u64)> {
    let mut regs = vec![
        (DFH_OFFSET, 1u64 << 52),
        (DFH_CSR_GROUP_OFFSET, DFH_HAS_PARAMS),
    ];
    let header = ParamHeader {
        id: PARAM_ID_CHILD_GUIDS,
        version: 0,
        eop: true,
        next: 1 + 2 * guids.len() as u64,
    };
    regs.push((DFH_PARAM_LIST_OFFSET, header.encode()));
    for (i, g) in guids.iter().enumerate() {
        let v = g.as_u128();
        let at = DFH_PARAM_LIST_OFFSET + 8 + i as u64 * 16;
        regs.push((at, v as u64));
        regs.push((at + 8, (v >> 64) as u64));
    }
    regs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn reader(regs: Vec<(u64, u64)>) -> impl FnMut(u64) -> Result<u64> {
        let map: HashMap<u64, u64> = regs.into_iter().collect();
        move |off| Ok(map.get(&off).copied().unwrap_or(0))
    }

    #[test]
    fn test_header_round_trip() {
        let h = ParamHeader { id: 2, version: 1, eop: true, next: 7 };
        assert_eq!(ParamHeader::decode(h.encode()), h);
    }

    #[test]
    fn test_version_zero_has_no_children() {
        let guids = child_guids(reader(vec![(DFH_OFFSET, 0)])).unwrap();
        assert!(guids.is_empty());
    }

    #[test]
    fn test_no_params_flag() {
        let guids = child_guids(reader(vec![(DFH_OFFSET, 1 << 52)])).unwrap();
        assert!(guids.is_empty());
    }

    #[test]
    fn test_child_list_in_order() {
        let wanted = vec![Guid::from_u128(0x11), Guid::from_u128(0x22 << 64 | 0x33)];
        let guids = child_guids(reader(child_list_layout(&wanted))).unwrap();
        assert_eq!(guids, wanted);
    }

    #[test]
    fn test_skips_other_records() {
        let child = Guid::from_u128(0xabcd);
        let other = ParamHeader { id: 0x10, version: 0, eop: false, next: 2 };
        let list = ParamHeader { id: PARAM_ID_CHILD_GUIDS, version: 0, eop: true, next: 3 };
        let regs = vec![
            (DFH_OFFSET, 1 << 52),
            (DFH_CSR_GROUP_OFFSET, DFH_HAS_PARAMS),
            (0x28, other.encode()),
            (0x30, 0xdead),
            (0x38, list.encode()),
            (0x40, 0xabcd),
            (0x48, 0),
        ];
        assert_eq!(child_guids(reader(regs)).unwrap(), vec![child]);
    }

    #[test]
    fn test_zero_sized_record_is_an_error() {
        let bad = ParamHeader { id: 0x10, version: 0, eop: false, next: 0 };
        let regs = vec![
            (DFH_OFFSET, 1 << 52),
            (DFH_CSR_GROUP_OFFSET, DFH_HAS_PARAMS),
            (0x28, bad.encode()),
        ];
        assert!(matches!(child_guids(reader(regs)), Err(FpgaError::Exception(_))));
    }

    #[test]
    fn test_unreadable_header_has_no_children() {
        assert_eq!(child_guids(|_| Err(FpgaError::NoAccess)), Ok(Vec::new()));

        let csr_denied = |off| match off {
            DFH_OFFSET => Ok(1 << 52),
            _ => Err(FpgaError::NoAccess),
        };
        assert_eq!(child_guids(csr_denied), Ok(Vec::new()));
    }

    #[test]
    fn test_param_list_read_failure_propagates() {
        let list_denied = |off| match off {
            DFH_OFFSET => Ok(1 << 52),
            DFH_CSR_GROUP_OFFSET => Ok(DFH_HAS_PARAMS),
            _ => Err(FpgaError::NoAccess),
        };
        assert_eq!(child_guids(list_denied), Err(FpgaError::NoAccess));
    }
}
