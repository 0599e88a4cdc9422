/*
 *  runtime/event.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Event handles - bound to a backend on first registration
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

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use super::error::{FpgaError, Result};
use super::table::AdapterTable;
use super::traits::RawEvent;

struct BoundEvent {
    raw: RawEvent,
    adapter: Arc<AdapterTable>,
}

/// An event handle.
///
/// Created empty, because no backend is known yet. The first
/// [`Handle::register_event`](super::Handle::register_event) creates the
/// backend event through the handle's adapter and binds this object to
/// it; every later call goes to that adapter.
pub struct EventHandle {
    bound: Option<BoundEvent>,
}

impl EventHandle {
    pub fn new() -> Self {
        Self { bound: None }
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    pub fn raw(&self) -> Option<RawEvent> {
        self.bound.as_ref().map(|b| b.raw)
    }

    /// The backend event, created through `adapter` if not yet bound
    pub(crate) fn bind(&mut self, adapter: &Arc<AdapterTable>) -> Result<RawEvent> {
        match &self.bound {
            Some(b) if Arc::ptr_eq(&b.adapter, adapter) => Ok(b.raw),
            Some(b) => Err(FpgaError::InvalidParam(format!(
                "event handle belongs to {}, not {}",
                b.adapter.library(),
                adapter.library()
            ))),
            None => {
                let raw = adapter.backend().create_event_handle()?;
                debug!("created event {:?} via {}", raw, adapter.library());
                self.bound = Some(BoundEvent {
                    raw,
                    adapter: Arc::clone(adapter),
                });
                Ok(raw)
            }
        }
    }

    /// The backend event, which must already be bound to `adapter`
    pub(crate) fn bound_to(&self, adapter: &Arc<AdapterTable>) -> Result<RawEvent> {
        match &self.bound {
            Some(b) if Arc::ptr_eq(&b.adapter, adapter) => Ok(b.raw),
            Some(_) => Err(FpgaError::InvalidParam("event handle belongs to another adapter".into())),
            None => Err(FpgaError::InvalidParam("event handle was never registered".into())),
        }
    }

    /// File descriptor to poll. Only available once registered.
    pub fn os_object(&self) -> Result<i32> {
        let b = self
            .bound
            .as_ref()
            .ok_or_else(|| FpgaError::InvalidParam("event handle was never registered".into()))?;
        b.adapter.backend().event_os_object(b.raw)
    }

    /// Destroy the backend event, if one was created
    pub fn destroy(mut self) -> Result<()> {
        match self.bound.take() {
            Some(b) => b.adapter.backend().destroy_event_handle(b.raw),
            None => Ok(()),
        }
    }
}

impl Default for EventHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventHandle {
    fn drop(&mut self) {
        if let Some(b) = self.bound.take() {
            if let Err(e) = b.adapter.backend().destroy_event_handle(b.raw) {
                warn!("failed to destroy event {:?}: {}", b.raw, e);
            }
        }
    }
}

impl fmt::Debug for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandle")
            .field("raw", &self.raw())
            .field("library", &self.bound.as_ref().map(|b| b.adapter.library()))
            .finish()
    }
}
