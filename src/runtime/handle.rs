/*
 *  runtime/handle.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Handles - opened resources and multi-port child trees
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

//! Opened resources
//!
//! A [`Handle`] is an arena of nodes. Node 0 is the resource that was
//! opened; any child ports discovered through its feature header are
//! appended after it and carry the root's index as their parent. Only a
//! node without a parent cascades a close to its children.
//!
//! A handle is meant to be driven from one thread at a time. Nothing
//! enforces that beyond `&mut self` on the operations that change the
//! tree or its pinned buffers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use log::{debug, error, info, warn};

use super::dfh;
use super::error::{FpgaError, OpenError, Result};
use super::event::EventHandle;
use super::properties::{Guid, ObjectType, Properties, PropertyRecord, RawProperties};
use super::table::AdapterTable;
use super::token::{Token, TokenRef};
use super::traits::{BUF_PREALLOCATED, EventType, PinnedBuffer, RawHandle};

const ROOT: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Open,
    ChildrenAttached,
    Closed,
}

enum NodeToken {
    /// The caller's token the root was opened from
    Root(TokenRef),
    /// A child token, owned until the child is closed
    Child(Option<Token>),
}

struct HandleNode {
    raw: RawHandle,
    adapter: Arc<AdapterTable>,
    token: NodeToken,
    guid: Option<Guid>,
    parent: Option<usize>,
    children: Vec<usize>,
    /// mapped MMIO region -> base address
    mappings: BTreeMap<u32, u64>,
    open: bool,
}

/// Bookkeeping for a buffer pinned through the root
struct Workspace {
    len: u64,
    addr: u64,
    io_address: u64,
    /// (node, child wsid) in pin order
    child_pins: Vec<(usize, u64)>,
}

pub struct Handle {
    nodes: Vec<HandleNode>,
    workspaces: HashMap<u64, Workspace>,
    state: HandleState,
}

impl Handle {
    /// Open `token` through its adapter, then resolve and open every child
    /// port its feature header advertises.
    ///
    /// When a child cannot be resolved or opened the error carries the
    /// partially built handle; children linked so far remain attached.
    pub(crate) fn open(token: &Token, flags: i32) -> std::result::Result<Handle, OpenError> {
        let adapter = Arc::clone(token.adapter());
        let raw = adapter
            .backend()
            .open(token.raw(), flags)
            .map_err(OpenError::plain)?;
        debug!("opened {:?} as {:?} via {}", token.raw(), raw, adapter.library());

        let mut handle = Handle {
            nodes: vec![HandleNode {
                raw,
                adapter: Arc::clone(&adapter),
                token: NodeToken::Root(token.to_ref()),
                guid: None,
                parent: None,
                children: Vec::new(),
                mappings: BTreeMap::new(),
                open: true,
            }],
            workspaces: HashMap::new(),
            state: HandleState::Open,
        };

        if !is_accelerator(token) {
            return Ok(handle);
        }
        let guids = match dfh::child_guids(|offset| adapter.backend().read_mmio64(raw, 0, offset)) {
            Ok(guids) => guids,
            Err(e) => {
                return Err(OpenError {
                    source: e,
                    partial: Some(handle),
                });
            }
        };

        for guid in guids {
            if let Err(e) = handle.attach_child(guid, flags) {
                error!("failed to attach child {}: {}", guid, e);
                return Err(OpenError {
                    source: e,
                    partial: Some(handle),
                });
            }
        }

        Ok(handle)
    }

    fn attach_child(&mut self, guid: Guid, flags: i32) -> Result<()> {
        let adapter = Arc::clone(&self.nodes[ROOT].adapter);

        let mut filter = PropertyRecord::default();
        filter.set_object_type(ObjectType::Accelerator);
        filter.set_guid(guid);

        let mut tokens = adapter
            .backend()
            .enumerate(&[RawProperties::new(filter)])?
            .into_iter()
            .map(|raw| Token::from_raw(raw, Arc::clone(&adapter)))
            .collect::<Vec<_>>();
        if tokens.is_empty() {
            return Err(FpgaError::NotFound(format!("child accelerator {}", guid)));
        }
        // surplus matches are released as they drop
        let token = tokens.swap_remove(0);
        drop(tokens);

        let raw = adapter.backend().open(token.raw(), flags)?;

        let idx = self.nodes.len();
        self.nodes.push(HandleNode {
            raw,
            adapter,
            token: NodeToken::Child(Some(token)),
            guid: Some(guid),
            parent: Some(ROOT),
            children: Vec::new(),
            mappings: BTreeMap::new(),
            open: true,
        });
        self.nodes[ROOT].children.push(idx);
        self.state = HandleState::ChildrenAttached;
        info!("attached child {} as node {}", guid, idx);
        Ok(())
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn raw(&self) -> RawHandle {
        self.nodes[ROOT].raw
    }

    pub fn adapter(&self) -> &Arc<AdapterTable> {
        &self.nodes[ROOT].adapter
    }

    /// The token this handle was opened from
    pub fn token(&self) -> Option<&TokenRef> {
        match &self.nodes[ROOT].token {
            NodeToken::Root(t) => Some(t),
            NodeToken::Child(_) => None,
        }
    }

    pub fn child_count(&self) -> usize {
        self.nodes[ROOT].children.len()
    }

    /// Child ports in discovery order
    pub fn children(&self) -> impl Iterator<Item = ChildPort<'_>> + '_ {
        self.nodes[ROOT]
            .children
            .iter()
            .map(move |&idx| ChildPort { handle: self, idx })
    }

    fn ensure_open(&self) -> Result<&HandleNode> {
        let node = &self.nodes[ROOT];
        if node.open {
            Ok(node)
        } else {
            Err(FpgaError::InvalidParam("handle is closed".into()))
        }
    }

    /// Close the handle and, for a root, every child first
    pub fn close(mut self) -> Result<()> {
        self.close_cascade(ROOT)
    }

    /// Close `idx` and its children. A node with a parent is left alone:
    /// its root closes it.
    pub(crate) fn close_cascade(&mut self, idx: usize) -> Result<()> {
        if self.nodes[idx].parent.is_some() {
            return Ok(());
        }

        let mut first_error = None;
        for child in self.nodes[idx].children.clone() {
            if let Err(e) = self.close_node(child) {
                warn!("failed to close child node {}: {}", child, e);
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.close_node(idx) {
            first_error.get_or_insert(e);
        }

        self.workspaces.clear();
        self.state = HandleState::Closed;
        first_error.map_or(Ok(()), Err)
    }

    fn close_node(&mut self, idx: usize) -> Result<()> {
        let node = &mut self.nodes[idx];
        if !node.open {
            return Ok(());
        }
        node.open = false;
        for (mmio_num, _) in std::mem::take(&mut node.mappings) {
            if let Err(e) = node.adapter.backend().unmap_mmio(node.raw, mmio_num) {
                warn!("failed to unmap region {} of node {}: {}", mmio_num, idx, e);
            }
        }
        let result = node.adapter.backend().close(node.raw);

        if let NodeToken::Child(slot) = &mut node.token {
            if let Some(token) = slot.take() {
                if let Err(e) = token.destroy() {
                    warn!("failed to destroy child token for node {}: {}", idx, e);
                }
            }
        }
        result
    }

    pub fn reset(&self) -> Result<()> {
        let node = self.ensure_open()?;
        node.adapter.backend().reset(node.raw)
    }

    pub fn read_mmio32(&self, mmio_num: u32, offset: u64) -> Result<u32> {
        let node = self.ensure_open()?;
        node.adapter.backend().read_mmio32(node.raw, mmio_num, offset)
    }

    pub fn read_mmio64(&self, mmio_num: u32, offset: u64) -> Result<u64> {
        let node = self.ensure_open()?;
        node.adapter.backend().read_mmio64(node.raw, mmio_num, offset)
    }

    pub fn write_mmio32(&self, mmio_num: u32, offset: u64, value: u32) -> Result<()> {
        let node = self.ensure_open()?;
        node.adapter.backend().write_mmio32(node.raw, mmio_num, offset, value)
    }

    pub fn write_mmio64(&self, mmio_num: u32, offset: u64, value: u64) -> Result<()> {
        let node = self.ensure_open()?;
        node.adapter.backend().write_mmio64(node.raw, mmio_num, offset, value)
    }

    /// Map an MMIO region and return its base address. Mapping a region
    /// twice returns the first mapping. Closing the handle unmaps whatever
    /// is still mapped.
    pub fn map_mmio(&mut self, mmio_num: u32) -> Result<u64> {
        let node = self.ensure_open()?;
        if let Some(&base) = node.mappings.get(&mmio_num) {
            return Ok(base);
        }
        let base = node.adapter.backend().map_mmio(node.raw, mmio_num)?;
        debug!("mapped region {} of {:?} at {:#x}", mmio_num, node.raw, base);
        self.nodes[ROOT].mappings.insert(mmio_num, base);
        Ok(base)
    }

    pub fn unmap_mmio(&mut self, mmio_num: u32) -> Result<()> {
        let node = self.ensure_open()?;
        if !node.mappings.contains_key(&mmio_num) {
            return Err(FpgaError::InvalidParam(format!("region {} is not mapped", mmio_num)));
        }
        node.adapter.backend().unmap_mmio(node.raw, mmio_num)?;
        self.nodes[ROOT].mappings.remove(&mmio_num);
        Ok(())
    }

    pub fn is_mapped(&self, mmio_num: u32) -> bool {
        self.nodes[ROOT].mappings.contains_key(&mmio_num)
    }

    /// Ask for `event_type` to be signalled on `event`. An event handle
    /// that was never registered is created through this handle's adapter.
    pub fn register_event(&self, event_type: EventType, event: &mut EventHandle, flags: u32) -> Result<()> {
        let node = self.ensure_open()?;
        let raw_event = event.bind(&node.adapter)?;
        node.adapter.backend().register_event(node.raw, event_type, raw_event, flags)
    }

    pub fn unregister_event(&self, event_type: EventType, event: &EventHandle) -> Result<()> {
        let node = self.ensure_open()?;
        let raw_event = event.bound_to(&node.adapter)?;
        node.adapter.backend().unregister_event(node.raw, event_type, raw_event)
    }

    pub fn properties(&self) -> Result<Properties> {
        let node = self.ensure_open()?;
        let raw = node.adapter.backend().get_properties_from_handle(node.raw)?;
        Ok(Properties::from_raw(raw, &node.adapter))
    }

    pub fn reconfigure_slot(&self, slot: u32, bitstream: &[u8], flags: i32) -> Result<()> {
        let node = self.ensure_open()?;
        if bitstream.is_empty() {
            return Err(FpgaError::InvalidParam("empty bitstream".into()));
        }
        node.adapter.backend().reconfigure_slot(node.raw, slot, bitstream, flags)
    }

    pub fn io_address(&self, wsid: u64) -> Result<u64> {
        let node = self.ensure_open()?;
        node.adapter.backend().get_io_address(node.raw, wsid)
    }

    /// Pin a buffer on the root and then on every child, in order.
    ///
    /// If a child pin fails, the children pinned so far are released in
    /// order, then the root's pin, and the child's error is returned.
    pub fn prepare_buffer(&mut self, len: u64, addr: Option<u64>, flags: i32) -> Result<PinnedBuffer> {
        let root = self.ensure_open()?;
        let backend = root.adapter.backend();
        let root_raw = root.raw;
        let pinned = backend.prepare_buffer(root_raw, len, addr, flags)?;

        let children = self.nodes[ROOT].children.clone();
        if children.is_empty() {
            self.workspaces.insert(
                pinned.wsid,
                Workspace { len, addr: pinned.addr, io_address: 0, child_pins: Vec::new() },
            );
            return Ok(pinned);
        }

        let io_address = match backend.get_io_address(root_raw, pinned.wsid) {
            Ok(io) => io,
            Err(e) => {
                self.release_root_pin(pinned.wsid);
                return Err(e);
            }
        };

        let mut child_pins = Vec::with_capacity(children.len());
        for idx in children {
            let node = &self.nodes[idx];
            match node.adapter.backend().prepare_buffer(
                node.raw,
                len,
                Some(pinned.addr),
                flags | BUF_PREALLOCATED,
            ) {
                Ok(child) => child_pins.push((idx, child.wsid)),
                Err(e) => {
                    error!("pinning buffer on child node {} failed: {}", idx, e);
                    for (pinned_idx, wsid) in child_pins {
                        let n = &self.nodes[pinned_idx];
                        if let Err(e) = n.adapter.backend().release_buffer(n.raw, wsid) {
                            warn!("rollback of child node {} pin {} failed: {}", pinned_idx, wsid, e);
                        }
                    }
                    self.release_root_pin(pinned.wsid);
                    return Err(e);
                }
            }
        }

        debug!(
            "pinned {} bytes at {:#x} (io {:#x}) on root and {} child(ren)",
            len,
            pinned.addr,
            io_address,
            child_pins.len()
        );
        self.workspaces.insert(
            pinned.wsid,
            Workspace { len, addr: pinned.addr, io_address, child_pins },
        );
        Ok(pinned)
    }

    fn release_root_pin(&self, wsid: u64) {
        let root = &self.nodes[ROOT];
        if let Err(e) = root.adapter.backend().release_buffer(root.raw, wsid) {
            warn!("rollback of root pin {} failed: {}", wsid, e);
        }
    }

    /// Release a buffer on every child, then on the root.
    ///
    /// This is best effort: the first failure is returned immediately and
    /// the remaining children stay pinned. Children released before the
    /// failure are dropped from the bookkeeping.
    pub fn release_buffer(&mut self, wsid: u64) -> Result<()> {
        if !self.nodes[ROOT].open {
            return Err(FpgaError::InvalidParam("handle is closed".into()));
        }
        let ws = self
            .workspaces
            .get_mut(&wsid)
            .ok_or_else(|| FpgaError::InvalidParam(format!("unknown workspace id {}", wsid)))?;
        debug!(
            "releasing {} bytes at {:#x} (io {:#x})",
            ws.len, ws.addr, ws.io_address
        );

        while let Some(&(idx, child_wsid)) = ws.child_pins.first() {
            let node = &self.nodes[idx];
            node.adapter.backend().release_buffer(node.raw, child_wsid)?;
            ws.child_pins.remove(0);
        }

        let root = &self.nodes[ROOT];
        root.adapter.backend().release_buffer(root.raw, wsid)?;
        self.workspaces.remove(&wsid);
        Ok(())
    }
}

/// Only accelerators carry a child list
fn is_accelerator(token: &Token) -> bool {
    match token.properties().and_then(|p| p.object_type()) {
        Ok(object_type) => object_type == ObjectType::Accelerator,
        Err(e) => {
            debug!("no object type for {:?}, not looking for children: {}", token.raw(), e);
            false
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.state == HandleState::Closed {
            return;
        }
        if let Err(e) = self.close_cascade(ROOT) {
            warn!("closing handle on drop failed: {}", e);
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("raw", &self.nodes[ROOT].raw)
            .field("library", &self.nodes[ROOT].adapter.library())
            .field("children", &self.child_count())
            .field("state", &self.state)
            .finish()
    }
}

/// A child port of a multi-port handle
pub struct ChildPort<'a> {
    handle: &'a Handle,
    idx: usize,
}

impl ChildPort<'_> {
    fn node(&self) -> Result<&HandleNode> {
        let node = &self.handle.nodes[self.idx];
        if node.open {
            Ok(node)
        } else {
            Err(FpgaError::InvalidParam("child port is closed".into()))
        }
    }

    pub fn guid(&self) -> Option<Guid> {
        self.handle.nodes[self.idx].guid
    }

    pub fn raw(&self) -> RawHandle {
        self.handle.nodes[self.idx].raw
    }

    pub fn reset(&self) -> Result<()> {
        let node = self.node()?;
        node.adapter.backend().reset(node.raw)
    }

    pub fn read_mmio64(&self, mmio_num: u32, offset: u64) -> Result<u64> {
        let node = self.node()?;
        node.adapter.backend().read_mmio64(node.raw, mmio_num, offset)
    }

    pub fn write_mmio64(&self, mmio_num: u32, offset: u64, value: u64) -> Result<()> {
        let node = self.node()?;
        node.adapter.backend().write_mmio64(node.raw, mmio_num, offset, value)
    }

    pub fn properties(&self) -> Result<Properties> {
        let node = self.node()?;
        let raw = node.adapter.backend().get_properties_from_handle(node.raw)?;
        Ok(Properties::from_raw(raw, &node.adapter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::drivers::mock::MockBackend;

    fn afu(guid: u128) -> PropertyRecord {
        let mut r = PropertyRecord::default();
        r.set_object_type(ObjectType::Accelerator);
        r.set_guid(Guid::from_u128(guid));
        r
    }

    /// A parent advertising `children`; only the GUIDs in `present` exist
    fn multi_port(children: &[u128], present: &[u128]) -> (MockBackend, Arc<AdapterTable>, Token) {
        let (mock, adapter) = MockBackend::with_table("libmock.so");
        let parent = mock.add_device(afu(0xfeed));
        let guids: Vec<Guid> = children.iter().map(|&g| Guid::from_u128(g)).collect();
        mock.set_child_guids(parent, &guids);
        for &g in present {
            mock.add_device(afu(g));
        }
        let token = mock.token_for(&adapter, parent);
        (mock, adapter, token)
    }

    #[test]
    fn test_open_without_children() {
        let (mock, adapter) = MockBackend::with_table("libmock.so");
        mock.add_device(afu(1));
        let token = mock.token_for(&adapter, 0);

        let handle = token.open(0).unwrap();
        assert_eq!(handle.state(), HandleState::Open);
        assert_eq!(handle.child_count(), 0);
        assert_eq!(mock.open_handles(), 1);

        handle.close().unwrap();
        assert_eq!(mock.open_handles(), 0);
    }

    #[test]
    fn test_open_attaches_children_in_order() {
        let (mock, _adapter, token) = multi_port(&[0xa, 0xb, 0xc], &[0xa, 0xb, 0xc]);

        let handle = token.open(0).unwrap();
        assert_eq!(handle.state(), HandleState::ChildrenAttached);
        let guids: Vec<_> = handle.children().filter_map(|c| c.guid()).collect();
        assert_eq!(
            guids,
            vec![Guid::from_u128(0xa), Guid::from_u128(0xb), Guid::from_u128(0xc)]
        );
        assert_eq!(mock.open_handles(), 4);

        handle.close().unwrap();
        assert_eq!(mock.open_handles(), 0);
        // only the caller's token remains
        assert_eq!(mock.live_tokens(), 1);
    }

    #[test]
    fn test_unresolvable_child_fails_open_and_keeps_earlier_children() {
        let (mock, _adapter, token) = multi_port(&[0xa, 0xb, 0xc], &[0xa, 0xc]);

        let err = token.open(0).unwrap_err();
        assert!(matches!(err.kind(), FpgaError::NotFound(_)));

        let partial = err.into_partial().unwrap();
        assert_eq!(partial.child_count(), 1);
        assert_eq!(partial.children().next().unwrap().guid(), Some(Guid::from_u128(0xa)));
        assert_eq!(mock.open_handles(), 2);

        partial.close().unwrap();
        assert_eq!(mock.open_handles(), 0);
        assert_eq!(mock.live_tokens(), 1);
    }

    #[test]
    fn test_dropping_failed_open_releases_children() {
        let (mock, _adapter, token) = multi_port(&[0xa, 0xb], &[0xa]);
        drop(token.open(0).unwrap_err());
        assert_eq!(mock.open_handles(), 0);
        assert_eq!(mock.live_tokens(), 1);
    }

    #[test]
    fn test_child_open_failure_aborts() {
        let (mock, _adapter, token) = multi_port(&[0xa, 0xb], &[0xa, 0xb]);
        mock.fail_open_of(Guid::from_u128(0xb));

        let err = token.open(0).unwrap_err();
        assert_eq!(err.kind(), &FpgaError::Busy);
        let partial = err.into_partial().unwrap();
        assert_eq!(partial.child_count(), 1);
    }

    #[test]
    fn test_non_root_does_not_cascade() {
        let (mock, _adapter, token) = multi_port(&[0xa], &[0xa]);
        let mut handle = token.open(0).unwrap();

        handle.close_cascade(1).unwrap();
        assert_eq!(mock.open_handles(), 2);
        assert_eq!(handle.state(), HandleState::ChildrenAttached);

        handle.close().unwrap();
        assert_eq!(mock.open_handles(), 0);
    }

    #[test]
    fn test_pin_spans_parent_and_children() {
        let (mock, _adapter, token) = multi_port(&[0xa, 0xb], &[0xa, 0xb]);
        let mut handle = token.open(0).unwrap();

        let buf = handle.prepare_buffer(4096, None, 0).unwrap();
        assert_eq!(mock.pinned_buffers(), 3);
        assert!(handle.io_address(buf.wsid).is_ok());

        handle.release_buffer(buf.wsid).unwrap();
        assert_eq!(mock.pinned_buffers(), 0);
    }

    #[test]
    fn test_pin_failure_rolls_back_children() {
        let (mock, _adapter, token) = multi_port(&[0xa, 0xb], &[0xa, 0xb]);
        let mut handle = token.open(0).unwrap();
        mock.fail_pin_on(Guid::from_u128(0xb), FpgaError::NoMemory);

        let err = handle.prepare_buffer(4096, None, 0).unwrap_err();
        assert_eq!(err, FpgaError::NoMemory);
        assert_eq!(mock.pinned_buffers(), 0);
        assert_eq!(mock.state().release_calls, 2);
    }

    #[test]
    fn test_unpin_is_best_effort() {
        let (mock, _adapter, token) = multi_port(&[0xa, 0xb], &[0xa, 0xb]);
        let mut handle = token.open(0).unwrap();
        let buf = handle.prepare_buffer(4096, None, 0).unwrap();

        mock.fail_release_on(Guid::from_u128(0xa), FpgaError::Busy);
        assert_eq!(handle.release_buffer(buf.wsid), Err(FpgaError::Busy));
        // nothing after the failing child was attempted
        assert_eq!(mock.pinned_buffers(), 3);

        mock.clear_failures();
        handle.release_buffer(buf.wsid).unwrap();
        assert_eq!(mock.pinned_buffers(), 0);
    }

    #[test]
    fn test_unknown_workspace() {
        let (mock, adapter) = MockBackend::with_table("libmock.so");
        mock.add_device(afu(1));
        let token = mock.token_for(&adapter, 0);
        let mut handle = token.open(0).unwrap();
        assert!(matches!(handle.release_buffer(99), Err(FpgaError::InvalidParam(_))));
    }

    #[test]
    fn test_mmio_and_child_ports() {
        let (mock, _adapter, token) = multi_port(&[0xa], &[0xa]);
        let handle = token.open(0).unwrap();

        handle.write_mmio64(0, 0x100, 0x1234).unwrap();
        assert_eq!(handle.read_mmio64(0, 0x100).unwrap(), 0x1234);
        handle.write_mmio32(0, 0x108, 7).unwrap();
        assert_eq!(handle.read_mmio32(0, 0x108).unwrap(), 7);

        let child = handle.children().next().unwrap();
        child.write_mmio64(0, 0x100, 0x99).unwrap();
        assert_eq!(child.read_mmio64(0, 0x100).unwrap(), 0x99);
        assert_eq!(handle.read_mmio64(0, 0x100).unwrap(), 0x1234);
        child.reset().unwrap();
        assert_eq!(
            child.properties().unwrap().guid().unwrap(),
            Guid::from_u128(0xa)
        );
        handle.reset().unwrap();
        assert_eq!(mock.state().reset_calls, 2);
    }

    #[test]
    fn test_reconfigure_rejects_empty_bitstream() {
        let (mock, adapter) = MockBackend::with_table("libmock.so");
        mock.add_device(afu(1));
        let token = mock.token_for(&adapter, 0);
        let handle = token.open(0).unwrap();
        assert!(matches!(
            handle.reconfigure_slot(0, &[], 0),
            Err(FpgaError::InvalidParam(_))
        ));
        handle.reconfigure_slot(0, &[1, 2, 3], 0).unwrap();
        assert_eq!(mock.state().reconfigured_bytes, 3);
    }

    fn device(bus: u8) -> PropertyRecord {
        let mut r = PropertyRecord::default();
        r.set_object_type(ObjectType::Device);
        r.set_bus(bus);
        r
    }

    #[test]
    fn test_device_open_reads_no_registers() {
        let (mock, adapter) = MockBackend::with_table("libmock.so");
        mock.add_device(device(1));
        mock.state().simulate_mmio_failure = Some(FpgaError::NoAccess);
        let token = mock.token_for(&adapter, 0);

        let handle = token.open(0).unwrap();
        assert_eq!(handle.child_count(), 0);
        assert_eq!(mock.state().mmio_reads, 0);
        handle.close().unwrap();
        assert_eq!(mock.live_tokens(), 1);
    }

    #[test]
    fn test_accelerator_without_register_access_opens() {
        let (mock, adapter) = MockBackend::with_table("libmock.so");
        mock.add_device(afu(1));
        mock.state().simulate_mmio_failure = Some(FpgaError::NoAccess);
        let token = mock.token_for(&adapter, 0);

        let handle = token.open(0).unwrap();
        assert_eq!(handle.state(), HandleState::Open);
        assert_eq!(handle.child_count(), 0);
        assert_eq!(mock.state().mmio_reads, 1);
        assert_eq!(mock.open_handles(), 1);
    }

    #[test]
    fn test_close_unmaps_regions() {
        let (mock, adapter) = MockBackend::with_table("libmock.so");
        mock.add_device(afu(1));
        let token = mock.token_for(&adapter, 0);
        let mut handle = token.open(0).unwrap();

        let base = handle.map_mmio(0).unwrap();
        assert_eq!(handle.map_mmio(0).unwrap(), base);
        handle.map_mmio(1).unwrap();
        assert!(matches!(handle.map_mmio(5), Err(FpgaError::InvalidParam(_))));
        assert_eq!(mock.mapped_regions(), 2);

        handle.unmap_mmio(1).unwrap();
        assert!(!handle.is_mapped(1));
        assert!(matches!(handle.unmap_mmio(1), Err(FpgaError::InvalidParam(_))));
        assert_eq!(mock.mapped_regions(), 1);

        handle.close().unwrap();
        assert_eq!(mock.mapped_regions(), 0);
        assert_eq!(mock.open_handles(), 0);
    }

    #[test]
    fn test_drop_unmaps_regions() {
        let (mock, adapter) = MockBackend::with_table("libmock.so");
        mock.add_device(afu(1));
        let token = mock.token_for(&adapter, 0);
        let mut handle = token.open(0).unwrap();
        handle.map_mmio(0).unwrap();
        drop(handle);
        assert_eq!(mock.mapped_regions(), 0);
    }

    #[test]
    fn test_event_registration() {
        let (mock, adapter) = MockBackend::with_table("libmock.so");
        mock.add_device(afu(1));
        let token = mock.token_for(&adapter, 0);
        let handle = token.open(0).unwrap();

        let mut event = EventHandle::new();
        assert!(matches!(
            handle.unregister_event(EventType::Error, &event),
            Err(FpgaError::InvalidParam(_))
        ));

        handle.register_event(EventType::Error, &mut event, 0).unwrap();
        handle.register_event(EventType::Interrupt, &mut event, 0).unwrap();
        let raw = event.raw().unwrap();
        assert_eq!(mock.live_events(), 1);
        assert_eq!(mock.registrations(raw), vec![EventType::Error, EventType::Interrupt]);
        assert!(event.os_object().is_ok());

        handle.unregister_event(EventType::Error, &event).unwrap();
        assert_eq!(mock.registrations(raw), vec![EventType::Interrupt]);

        event.destroy().unwrap();
        assert_eq!(mock.live_events(), 0);
    }
}
