/*
 *  runtime/properties.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Property objects - partially populated device descriptors and filters
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

//! Property objects
//!
//! A [`Properties`] object describes a device or accelerator. The same
//! type is used for two jobs:
//!
//! - describing what a backend discovered (returned from a token or handle)
//! - acting as a filter during enumeration (only populated fields count)
//!
//! Every field has a bit in `valid_fields`. Reading a field whose bit is
//! clear returns `NotFound`; writing a field sets its bit. The bits above
//! 31 are shared between the device-only and accelerator-only sub-records
//! and are only meaningful once the object type has been set.
//!
//! Backends never see [`Properties`] directly. They exchange the plain
//! [`RawProperties`] form, where the parent is a backend-native token.

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};

use super::error::{FpgaError, Result};
use super::table::AdapterTable;
use super::token::{Token, TokenRef};
use super::traits::RawToken;

/// Globally unique accelerator identifier
pub type Guid = uuid::Uuid;

/// Tag stored in every live property object. Zeroed on destroy.
pub const PROPERTIES_MAGIC: u32 = 0x5052_4f50;

/// Bit positions in `valid_fields`
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

    // device-only
    pub const NUM_SLOTS: u32 = 32;
    pub const BBSID: u32 = 33;
    pub const BBSVERSION: u32 = 34;

    // accelerator-only
    pub const ACCELERATOR_STATE: u32 = 32;
    pub const NUM_MMIO: u32 = 33;
    pub const NUM_INTERRUPTS: u32 = 34;

    pub(crate) const TYPE_SPECIFIC_MASK: u64 = 0b111 << 32;
}

const fn bit(b: u32) -> u64 {
    1u64 << b
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum ObjectType {
    #[default]
    Device = 0,
    Accelerator = 1,
}

impl TryFrom<u32> for ObjectType {
    type Error = FpgaError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(ObjectType::Device),
            1 => Ok(ObjectType::Accelerator),
            other => Err(FpgaError::InvalidParam(format!("object type {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum AcceleratorState {
    #[default]
    Assigned = 0,
    Unassigned = 1,
}

impl TryFrom<u32> for AcceleratorState {
    type Error = FpgaError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(AcceleratorState::Assigned),
            1 => Ok(AcceleratorState::Unassigned),
            other => Err(FpgaError::InvalidParam(format!("accelerator state {}", other))),
        }
    }
}

/// Kernel or simulator interface a device is reached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum Interface {
    #[default]
    Dfl = 0,
    Vfio = 1,
    SimDfl = 2,
    SimVfio = 3,
    Uio = 4,
}

impl TryFrom<u32> for Interface {
    type Error = FpgaError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Interface::Dfl),
            1 => Ok(Interface::Vfio),
            2 => Ok(Interface::SimDfl),
            3 => Ok(Interface::SimVfio),
            4 => Ok(Interface::Uio),
            other => Err(FpgaError::InvalidParam(format!("interface {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FpgaVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceFields {
    pub num_slots: u32,
    pub bbs_id: u64,
    pub bbs_version: FpgaVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcceleratorFields {
    pub state: AcceleratorState,
    pub num_mmio: u32,
    pub num_interrupts: u32,
}

/// Object-type dependent part of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectFields {
    #[default]
    Unset,
    Device(DeviceFields),
    Accelerator(AcceleratorFields),
}

/// Plain property data, without a parent token.
///
/// This is what backends build when describing a device, and what the
/// matching logic compares.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyRecord {
    pub valid_fields: u64,
    pub object_type: ObjectType,
    pub segment: u16,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
    pub socket_id: u8,
    pub vendor_id: u16,
    pub device_id: u16,
    pub subsystem_vendor_id: u16,
    pub subsystem_device_id: u16,
    pub guid: Guid,
    pub object_id: u64,
    pub num_errors: u32,
    pub interface: Interface,
    pub ext: ObjectFields,
}

/// A record plus the backend-native parent token, as exchanged with backends
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawProperties {
    pub record: PropertyRecord,
    pub parent: Option<RawToken>,
}

impl RawProperties {
    pub fn new(record: PropertyRecord) -> Self {
        Self { record, parent: None }
    }

    pub fn with_parent(mut self, parent: RawToken) -> Self {
        self.parent = Some(parent);
        self.record.mark(field::PARENT);
        self
    }

    /// Filter semantics: every field populated in `self` must be populated
    /// in `candidate` with the same value. An empty filter matches all.
    pub fn matches(&self, candidate: &RawProperties) -> bool {
        if self.record.has(field::PARENT)
            && (!candidate.record.has(field::PARENT) || self.parent != candidate.parent)
        {
            return false;
        }
        self.record.matches(&candidate.record)
    }
}

macro_rules! common_fields {
    ($( $get:ident, $set:ident, $name:ident: $ty:ty = $bit:expr; )*) => {
        impl PropertyRecord {
            $(
                pub fn $get(&self) -> Result<$ty> {
                    self.require($bit, stringify!($name))?;
                    Ok(self.$name)
                }

                pub fn $set(&mut self, value: $ty) {
                    self.$name = value;
                    self.mark($bit);
                }
            )*
        }

        impl Properties {
            $(
                pub fn $get(&self) -> Result<$ty> {
                    self.lock()?.record.$get()
                }

                pub fn $set(&self, value: $ty) -> Result<()> {
                    self.lock()?.record.$set(value);
                    Ok(())
                }
            )*
        }
    };
}

common_fields! {
    segment, set_segment, segment: u16 = field::SEGMENT;
    bus, set_bus, bus: u8 = field::BUS;
    device, set_device, device: u8 = field::DEVICE;
    function, set_function, function: u8 = field::FUNCTION;
    socket_id, set_socket_id, socket_id: u8 = field::SOCKETID;
    vendor_id, set_vendor_id, vendor_id: u16 = field::VENDORID;
    device_id, set_device_id, device_id: u16 = field::DEVICEID;
    subsystem_vendor_id, set_subsystem_vendor_id, subsystem_vendor_id: u16 = field::SUB_VENDORID;
    subsystem_device_id, set_subsystem_device_id, subsystem_device_id: u16 = field::SUB_DEVICEID;
    guid, set_guid, guid: Guid = field::GUID;
    object_id, set_object_id, object_id: u64 = field::OBJECTID;
    num_errors, set_num_errors, num_errors: u32 = field::NUM_ERRORS;
    interface, set_interface, interface: Interface = field::INTERFACE;
}

impl PropertyRecord {
    pub fn has(&self, b: u32) -> bool {
        self.valid_fields & bit(b) != 0
    }

    pub(crate) fn mark(&mut self, b: u32) {
        self.valid_fields |= bit(b);
    }

    fn require(&self, b: u32, name: &str) -> Result<()> {
        if self.has(b) {
            Ok(())
        } else {
            Err(FpgaError::NotFound(format!("{} not set", name)))
        }
    }

    pub fn clear(&mut self) {
        self.valid_fields = 0;
    }

    pub fn get_object_type(&self) -> Result<ObjectType> {
        self.require(field::OBJTYPE, "object type")?;
        Ok(self.object_type)
    }

    /// Switching type drops the other type's sub-record and its bits.
    pub fn set_object_type(&mut self, object_type: ObjectType) {
        let switching = !self.has(field::OBJTYPE) || self.object_type != object_type;
        self.object_type = object_type;
        self.mark(field::OBJTYPE);
        if switching {
            self.valid_fields &= !field::TYPE_SPECIFIC_MASK;
            self.ext = match object_type {
                ObjectType::Device => ObjectFields::Device(DeviceFields::default()),
                ObjectType::Accelerator => ObjectFields::Accelerator(AcceleratorFields::default()),
            };
        }
    }

    fn require_type(&self, wanted: ObjectType, name: &str) -> Result<()> {
        if self.has(field::OBJTYPE) && self.object_type == wanted {
            Ok(())
        } else {
            Err(FpgaError::InvalidParam(format!(
                "{} only applies to {:?} objects",
                name, wanted
            )))
        }
    }

    fn device_fields(&self, b: u32, name: &str) -> Result<DeviceFields> {
        self.require_type(ObjectType::Device, name)?;
        self.require(b, name)?;
        match self.ext {
            ObjectFields::Device(d) => Ok(d),
            _ => Err(FpgaError::Exception("device sub-record missing".into())),
        }
    }

    fn device_fields_mut(&mut self, b: u32, name: &str) -> Result<&mut DeviceFields> {
        self.require_type(ObjectType::Device, name)?;
        self.mark(b);
        if !matches!(self.ext, ObjectFields::Device(_)) {
            self.ext = ObjectFields::Device(DeviceFields::default());
        }
        match &mut self.ext {
            ObjectFields::Device(d) => Ok(d),
            _ => Err(FpgaError::Exception("device sub-record missing".into())),
        }
    }

    fn accelerator_fields(&self, b: u32, name: &str) -> Result<AcceleratorFields> {
        self.require_type(ObjectType::Accelerator, name)?;
        self.require(b, name)?;
        match self.ext {
            ObjectFields::Accelerator(a) => Ok(a),
            _ => Err(FpgaError::Exception("accelerator sub-record missing".into())),
        }
    }

    fn accelerator_fields_mut(&mut self, b: u32, name: &str) -> Result<&mut AcceleratorFields> {
        self.require_type(ObjectType::Accelerator, name)?;
        self.mark(b);
        if !matches!(self.ext, ObjectFields::Accelerator(_)) {
            self.ext = ObjectFields::Accelerator(AcceleratorFields::default());
        }
        match &mut self.ext {
            ObjectFields::Accelerator(a) => Ok(a),
            _ => Err(FpgaError::Exception("accelerator sub-record missing".into())),
        }
    }

    pub fn num_slots(&self) -> Result<u32> {
        Ok(self.device_fields(field::NUM_SLOTS, "num_slots")?.num_slots)
    }

    pub fn set_num_slots(&mut self, value: u32) -> Result<()> {
        self.device_fields_mut(field::NUM_SLOTS, "num_slots")?.num_slots = value;
        Ok(())
    }

    pub fn bbs_id(&self) -> Result<u64> {
        Ok(self.device_fields(field::BBSID, "bbs_id")?.bbs_id)
    }

    pub fn set_bbs_id(&mut self, value: u64) -> Result<()> {
        self.device_fields_mut(field::BBSID, "bbs_id")?.bbs_id = value;
        Ok(())
    }

    pub fn bbs_version(&self) -> Result<FpgaVersion> {
        Ok(self.device_fields(field::BBSVERSION, "bbs_version")?.bbs_version)
    }

    pub fn set_bbs_version(&mut self, value: FpgaVersion) -> Result<()> {
        self.device_fields_mut(field::BBSVERSION, "bbs_version")?.bbs_version = value;
        Ok(())
    }

    pub fn accelerator_state(&self) -> Result<AcceleratorState> {
        Ok(self.accelerator_fields(field::ACCELERATOR_STATE, "accelerator_state")?.state)
    }

    pub fn set_accelerator_state(&mut self, value: AcceleratorState) -> Result<()> {
        self.accelerator_fields_mut(field::ACCELERATOR_STATE, "accelerator_state")?.state = value;
        Ok(())
    }

    pub fn num_mmio(&self) -> Result<u32> {
        Ok(self.accelerator_fields(field::NUM_MMIO, "num_mmio")?.num_mmio)
    }

    pub fn set_num_mmio(&mut self, value: u32) -> Result<()> {
        self.accelerator_fields_mut(field::NUM_MMIO, "num_mmio")?.num_mmio = value;
        Ok(())
    }

    pub fn num_interrupts(&self) -> Result<u32> {
        Ok(self.accelerator_fields(field::NUM_INTERRUPTS, "num_interrupts")?.num_interrupts)
    }

    pub fn set_num_interrupts(&mut self, value: u32) -> Result<()> {
        self.accelerator_fields_mut(field::NUM_INTERRUPTS, "num_interrupts")?.num_interrupts = value;
        Ok(())
    }

    /// Compare every field populated in `self` (the filter) against
    /// `candidate`. The parent bit is ignored here; see
    /// [`RawProperties::matches`].
    pub fn matches(&self, candidate: &PropertyRecord) -> bool {
        let wanted = self.valid_fields & !bit(field::PARENT);
        if candidate.valid_fields & wanted != wanted {
            return false;
        }

        let common = [
            (field::OBJTYPE, self.object_type == candidate.object_type),
            (field::SEGMENT, self.segment == candidate.segment),
            (field::BUS, self.bus == candidate.bus),
            (field::DEVICE, self.device == candidate.device),
            (field::FUNCTION, self.function == candidate.function),
            (field::SOCKETID, self.socket_id == candidate.socket_id),
            (field::VENDORID, self.vendor_id == candidate.vendor_id),
            (field::DEVICEID, self.device_id == candidate.device_id),
            (field::GUID, self.guid == candidate.guid),
            (field::OBJECTID, self.object_id == candidate.object_id),
            (field::NUM_ERRORS, self.num_errors == candidate.num_errors),
            (field::INTERFACE, self.interface == candidate.interface),
            (field::SUB_VENDORID, self.subsystem_vendor_id == candidate.subsystem_vendor_id),
            (field::SUB_DEVICEID, self.subsystem_device_id == candidate.subsystem_device_id),
        ];
        if common.iter().any(|&(b, equal)| self.has(b) && !equal) {
            return false;
        }

        if wanted & field::TYPE_SPECIFIC_MASK == 0 {
            return true;
        }

        match (self.ext, candidate.ext) {
            (ObjectFields::Device(f), ObjectFields::Device(c)) => {
                !(self.has(field::NUM_SLOTS) && f.num_slots != c.num_slots)
                    && !(self.has(field::BBSID) && f.bbs_id != c.bbs_id)
                    && !(self.has(field::BBSVERSION) && f.bbs_version != c.bbs_version)
            }
            (ObjectFields::Accelerator(f), ObjectFields::Accelerator(c)) => {
                !(self.has(field::ACCELERATOR_STATE) && f.state != c.state)
                    && !(self.has(field::NUM_MMIO) && f.num_mmio != c.num_mmio)
                    && !(self.has(field::NUM_INTERRUPTS) && f.num_interrupts != c.num_interrupts)
            }
            _ => false,
        }
    }
}

/// Parent token slot of a property object.
///
/// `Owned` parents were produced for this object (by a property query or
/// a deep clone) and are destroyed with it. `Borrowed` parents belong to
/// whoever called [`Properties::set_parent`].
#[derive(Debug)]
pub(crate) enum ParentToken {
    Owned(Token),
    Borrowed(TokenRef),
}

impl ParentToken {
    fn token_ref(&self) -> TokenRef {
        match self {
            ParentToken::Owned(t) => t.to_ref(),
            ParentToken::Borrowed(r) => r.clone(),
        }
    }

    fn raw(&self) -> RawToken {
        match self {
            ParentToken::Owned(t) => t.raw(),
            ParentToken::Borrowed(r) => r.raw(),
        }
    }
}

pub struct PropertiesInner {
    magic: u32,
    record: PropertyRecord,
    parent: Option<ParentToken>,
}

/// Locked view of a valid property object
pub struct PropertiesGuard<'a> {
    inner: MutexGuard<'a, PropertiesInner>,
}

impl PropertiesGuard<'_> {
    pub fn record(&self) -> &PropertyRecord {
        &self.inner.record
    }

    pub fn record_mut(&mut self) -> &mut PropertyRecord {
        &mut self.inner.record
    }
}

impl std::ops::Deref for PropertiesGuard<'_> {
    type Target = PropertiesInner;

    fn deref(&self) -> &PropertiesInner {
        &self.inner
    }
}

impl std::ops::DerefMut for PropertiesGuard<'_> {
    fn deref_mut(&mut self) -> &mut PropertiesInner {
        &mut self.inner
    }
}

/// Shared, lockable property object.
///
/// [`Properties::share`] hands out another reference to the same object;
/// [`Properties::try_clone`] makes an independent deep copy. Once any
/// reference calls [`Properties::destroy`], every other reference fails
/// validation.
pub struct Properties {
    shared: Arc<Mutex<PropertiesInner>>,
}

impl Default for Properties {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Properties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.validate_and_lock() {
            Some(g) => f
                .debug_struct("Properties")
                .field("record", g.record())
                .field("parent", &g.parent)
                .finish(),
            None => f.write_str("Properties(<destroyed>)"),
        }
    }
}

impl Properties {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(PropertiesInner {
                magic: PROPERTIES_MAGIC,
                record: PropertyRecord::default(),
                parent: None,
            })),
        }
    }

    /// Build an object from a backend record, taking ownership of the
    /// backend-native parent token (if any) through `adapter`.
    pub(crate) fn from_raw(raw: RawProperties, adapter: &Arc<AdapterTable>) -> Self {
        let props = Self::new();
        {
            let mut inner = props.shared.lock();
            inner.record = raw.record;
            inner.parent = raw
                .parent
                .map(|p| ParentToken::Owned(Token::from_raw(p, Arc::clone(adapter))));
        }
        props
    }

    /// Snapshot for a backend call. The parent is passed as its raw token.
    pub(crate) fn to_raw(&self) -> Result<RawProperties> {
        let inner = self.lock()?;
        let parent = if inner.record.has(field::PARENT) {
            inner.parent.as_ref().map(ParentToken::raw)
        } else {
            None
        };
        Ok(RawProperties {
            record: inner.record.clone(),
            parent,
        })
    }

    /// Apply a refreshed backend record in place.
    ///
    /// An owned parent is kept when the backend reports the same raw token
    /// and replaced (destroying the old one) otherwise.
    pub(crate) fn refresh_from_raw(&self, raw: RawProperties, adapter: &Arc<AdapterTable>) -> Result<()> {
        let old = {
            let mut inner = self.lock()?;
            inner.record = raw.record;
            let unchanged = matches!(
                (raw.parent, inner.parent.as_ref()),
                (Some(p), Some(current)) if current.raw() == p
            );
            match raw.parent {
                _ if unchanged => None,
                Some(p) => inner
                    .parent
                    .replace(ParentToken::Owned(Token::from_raw(p, Arc::clone(adapter)))),
                None => inner.parent.take(),
            }
        };
        // destroyed outside the lock
        drop(old);
        Ok(())
    }

    /// Another reference to this same object
    pub fn share(&self) -> Properties {
        Properties {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Lock the object if it is still valid
    pub fn validate_and_lock(&self) -> Option<PropertiesGuard<'_>> {
        let inner = self.shared.lock();
        if inner.magic == PROPERTIES_MAGIC {
            Some(PropertiesGuard { inner })
        } else {
            None
        }
    }

    fn lock(&self) -> Result<PropertiesGuard<'_>> {
        self.validate_and_lock()
            .ok_or_else(|| FpgaError::InvalidParam("properties object is not valid".into()))
    }

    /// Copy of the current record
    pub fn record(&self) -> Result<PropertyRecord> {
        Ok(self.lock()?.record.clone())
    }

    /// Deep copy. An owned parent is cloned through its backend so the two
    /// objects never share one.
    pub fn try_clone(&self) -> Result<Properties> {
        let (record, parent) = {
            let inner = self.lock()?;
            let parent = match &inner.parent {
                Some(ParentToken::Owned(t)) => Some(ParentToken::Owned(t.try_clone()?)),
                Some(ParentToken::Borrowed(r)) => Some(ParentToken::Borrowed(r.clone())),
                None => None,
            };
            (inner.record.clone(), parent)
        };

        let copy = Properties::new();
        {
            let mut inner = copy.shared.lock();
            inner.record = record;
            inner.parent = parent;
        }
        Ok(copy)
    }

    /// Release the object. An owned parent is destroyed here, once.
    pub fn destroy(self) -> Result<()> {
        let parent = {
            let mut inner = self.lock()?;
            inner.magic = 0;
            inner.record.clear();
            inner.parent.take()
        };
        match parent {
            Some(ParentToken::Owned(t)) => t.destroy(),
            _ => Ok(()),
        }
    }

    /// Reset every field bit. The magic and any owned parent are kept.
    pub fn clear(&self) -> Result<()> {
        self.lock()?.record.clear();
        Ok(())
    }

    pub fn is_set(&self, b: u32) -> Result<bool> {
        Ok(self.lock()?.record.has(b))
    }

    /// A fresh clone of the parent token
    pub fn parent(&self) -> Result<Token> {
        let parent = {
            let inner = self.lock()?;
            inner.record.require(field::PARENT, "parent")?;
            inner
                .parent
                .as_ref()
                .map(ParentToken::token_ref)
                .ok_or_else(|| FpgaError::Exception("parent bit set without a token".into()))?
        };
        parent.try_clone()
    }

    /// Point at a parent the caller keeps ownership of. A previously owned
    /// parent is destroyed.
    pub fn set_parent(&self, parent: &Token) -> Result<()> {
        self.replace_parent(ParentToken::Borrowed(parent.to_ref()))
    }

    /// Hand ownership of `parent` to this object
    pub fn adopt_parent(&self, parent: Token) -> Result<()> {
        self.replace_parent(ParentToken::Owned(parent))
    }

    fn replace_parent(&self, parent: ParentToken) -> Result<()> {
        let old = {
            let mut inner = self.lock()?;
            inner.record.mark(field::PARENT);
            inner.parent.replace(parent)
        };
        if let Some(ParentToken::Owned(t)) = old {
            debug!("releasing previously owned parent token {:?}", t.raw());
            if let Err(e) = t.destroy() {
                warn!("failed to destroy replaced parent token: {}", e);
            }
        }
        Ok(())
    }

    pub fn object_type(&self) -> Result<ObjectType> {
        self.lock()?.record.get_object_type()
    }

    pub fn set_object_type(&self, object_type: ObjectType) -> Result<()> {
        self.lock()?.record.set_object_type(object_type);
        Ok(())
    }

    pub fn num_slots(&self) -> Result<u32> {
        self.lock()?.record.num_slots()
    }

    pub fn set_num_slots(&self, value: u32) -> Result<()> {
        self.lock()?.record.set_num_slots(value)
    }

    pub fn bbs_id(&self) -> Result<u64> {
        self.lock()?.record.bbs_id()
    }

    pub fn set_bbs_id(&self, value: u64) -> Result<()> {
        self.lock()?.record.set_bbs_id(value)
    }

    pub fn bbs_version(&self) -> Result<FpgaVersion> {
        self.lock()?.record.bbs_version()
    }

    pub fn set_bbs_version(&self, value: FpgaVersion) -> Result<()> {
        self.lock()?.record.set_bbs_version(value)
    }

    pub fn accelerator_state(&self) -> Result<AcceleratorState> {
        self.lock()?.record.accelerator_state()
    }

    pub fn set_accelerator_state(&self, value: AcceleratorState) -> Result<()> {
        self.lock()?.record.set_accelerator_state(value)
    }

    pub fn num_mmio(&self) -> Result<u32> {
        self.lock()?.record.num_mmio()
    }

    pub fn set_num_mmio(&self, value: u32) -> Result<()> {
        self.lock()?.record.set_num_mmio(value)
    }

    pub fn num_interrupts(&self) -> Result<u32> {
        self.lock()?.record.num_interrupts()
    }

    pub fn set_num_interrupts(&self, value: u32) -> Result<()> {
        self.lock()?.record.set_num_interrupts(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::drivers::mock::MockBackend;

    #[test]
    fn test_read_before_write_is_not_found() {
        let props = Properties::new();
        assert!(matches!(props.bus(), Err(FpgaError::NotFound(_))));
        assert!(matches!(props.guid(), Err(FpgaError::NotFound(_))));
        assert!(matches!(props.object_type(), Err(FpgaError::NotFound(_))));
    }

    #[test]
    fn test_write_then_read() {
        let props = Properties::new();
        let guid = Guid::from_u128(0xd8424dc4_a4a3_c413_f89e_433683f9040b);

        props.set_bus(0x5e).unwrap();
        props.set_segment(0x1).unwrap();
        props.set_vendor_id(0x8086).unwrap();
        props.set_guid(guid).unwrap();
        props.set_interface(Interface::Vfio).unwrap();

        assert_eq!(props.bus().unwrap(), 0x5e);
        assert_eq!(props.segment().unwrap(), 0x1);
        assert_eq!(props.vendor_id().unwrap(), 0x8086);
        assert_eq!(props.guid().unwrap(), guid);
        assert_eq!(props.interface().unwrap(), Interface::Vfio);
        assert!(props.is_set(field::BUS).unwrap());
        assert!(!props.is_set(field::DEVICE).unwrap());
    }

    #[test]
    fn test_type_specific_fields_check_object_type() {
        let props = Properties::new();

        // no object type yet
        assert!(matches!(props.set_num_slots(2), Err(FpgaError::InvalidParam(_))));

        props.set_object_type(ObjectType::Accelerator).unwrap();
        assert!(matches!(props.set_num_slots(2), Err(FpgaError::InvalidParam(_))));
        assert!(matches!(props.num_mmio(), Err(FpgaError::NotFound(_))));
        props.set_num_mmio(2).unwrap();
        props.set_accelerator_state(AcceleratorState::Unassigned).unwrap();
        assert_eq!(props.num_mmio().unwrap(), 2);
        assert_eq!(props.accelerator_state().unwrap(), AcceleratorState::Unassigned);

        props.set_object_type(ObjectType::Device).unwrap();
        assert!(matches!(props.num_mmio(), Err(FpgaError::InvalidParam(_))));
        assert!(matches!(props.num_slots(), Err(FpgaError::NotFound(_))));
        props.set_num_slots(1).unwrap();
        props.set_bbs_version(FpgaVersion { major: 6, minor: 4, patch: 0 }).unwrap();
        assert_eq!(props.num_slots().unwrap(), 1);
        assert_eq!(props.bbs_version().unwrap().major, 6);
    }

    #[test]
    fn test_clear_resets_bitmap() {
        let props = Properties::new();
        props.set_bus(3).unwrap();
        props.set_object_type(ObjectType::Device).unwrap();
        props.clear().unwrap();
        assert!(matches!(props.bus(), Err(FpgaError::NotFound(_))));
        assert!(matches!(props.object_type(), Err(FpgaError::NotFound(_))));
        // still a valid object
        assert!(props.validate_and_lock().is_some());
    }

    #[test]
    fn test_destroy_invalidates_shared_references() {
        let props = Properties::new();
        let other = props.share();
        props.set_bus(1).unwrap();
        assert_eq!(other.bus().unwrap(), 1);

        props.destroy().unwrap();
        assert!(other.validate_and_lock().is_none());
        assert!(matches!(other.bus(), Err(FpgaError::InvalidParam(_))));
        assert!(matches!(other.share().destroy(), Err(FpgaError::InvalidParam(_))));
    }

    #[test]
    fn test_clone_is_independent() {
        let props = Properties::new();
        props.set_bus(7).unwrap();
        let copy = props.try_clone().unwrap();
        copy.set_bus(9).unwrap();
        copy.set_device(1).unwrap();

        assert_eq!(props.bus().unwrap(), 7);
        assert!(matches!(props.device(), Err(FpgaError::NotFound(_))));
        assert_eq!(copy.bus().unwrap(), 9);
    }

    #[test]
    fn test_clone_with_owned_parent_destroys_each_once() {
        let (mock, adapter) = MockBackend::with_table("libmock.so");
        mock.add_device(PropertyRecord::default());
        let parent = mock.token_for(&adapter, 0);

        let props = Properties::new();
        props.adopt_parent(parent).unwrap();
        assert_eq!(mock.live_tokens(), 1);

        let copy = props.try_clone().unwrap();
        assert_eq!(mock.live_tokens(), 2);

        copy.set_bus(4).unwrap();
        assert!(matches!(props.bus(), Err(FpgaError::NotFound(_))));

        copy.destroy().unwrap();
        assert_eq!(mock.live_tokens(), 1);
        props.destroy().unwrap();
        assert_eq!(mock.live_tokens(), 0);
        assert_eq!(mock.state().double_destroys, 0);
    }

    #[test]
    fn test_set_parent_releases_owned_parent() {
        let (mock, adapter) = MockBackend::with_table("libmock.so");
        mock.add_device(PropertyRecord::default());
        let owned = mock.token_for(&adapter, 0);
        let borrowed = mock.token_for(&adapter, 0);

        let props = Properties::new();
        props.adopt_parent(owned).unwrap();
        assert_eq!(mock.live_tokens(), 2);

        props.set_parent(&borrowed).unwrap();
        assert_eq!(mock.live_tokens(), 1);

        // a borrowed parent is left alone
        props.destroy().unwrap();
        assert_eq!(mock.live_tokens(), 1);
        borrowed.destroy().unwrap();
        assert_eq!(mock.live_tokens(), 0);
    }

    #[test]
    fn test_get_parent_returns_fresh_clone() {
        let (mock, adapter) = MockBackend::with_table("libmock.so");
        mock.add_device(PropertyRecord::default());
        let parent = mock.token_for(&adapter, 0);

        let props = Properties::new();
        assert!(matches!(props.parent(), Err(FpgaError::NotFound(_))));
        props.set_parent(&parent).unwrap();

        let got = props.parent().unwrap();
        assert_ne!(got.raw(), parent.raw());
        assert_eq!(mock.live_tokens(), 2);
        drop(got);
        assert_eq!(mock.live_tokens(), 1);
    }

    #[test]
    fn test_record_matching() {
        let mut candidate = PropertyRecord::default();
        candidate.set_object_type(ObjectType::Accelerator);
        candidate.set_bus(0x5e);
        candidate.set_guid(Guid::from_u128(1));
        candidate.set_num_mmio(2).unwrap();

        let empty = PropertyRecord::default();
        assert!(empty.matches(&candidate));

        let mut filter = PropertyRecord::default();
        filter.set_bus(0x5e);
        assert!(filter.matches(&candidate));
        filter.set_guid(Guid::from_u128(2));
        assert!(!filter.matches(&candidate));

        let mut filter = PropertyRecord::default();
        filter.set_object_type(ObjectType::Accelerator);
        filter.set_num_mmio(2).unwrap();
        assert!(filter.matches(&candidate));
        filter.set_num_mmio(1).unwrap();
        assert!(!filter.matches(&candidate));

        // a field the candidate never populated cannot match
        let mut filter = PropertyRecord::default();
        filter.set_socket_id(0);
        assert!(!filter.matches(&candidate));
    }

    #[test]
    fn test_raw_matching_compares_parent() {
        let candidate = RawProperties::new(PropertyRecord::default()).with_parent(RawToken(7));
        let same = RawProperties::new(PropertyRecord::default()).with_parent(RawToken(7));
        let other = RawProperties::new(PropertyRecord::default()).with_parent(RawToken(8));
        assert!(same.matches(&candidate));
        assert!(!other.matches(&candidate));
        assert!(!same.matches(&RawProperties::default()));
    }
}
