/*
 *  runtime/token.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Tokens - enumerable references to devices, bound to their backend
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

use super::error::{OpenError, Result};
use super::handle::Handle;
use super::properties::Properties;
use super::table::AdapterTable;
use super::traits::{ErrorInfo, RawToken};

/// Owning token.
///
/// Wraps a backend-native token together with the adapter that produced
/// it; every operation is routed to that adapter. The backend token is
/// destroyed exactly once, by [`Token::destroy`] or on drop.
pub struct Token {
    raw: RawToken,
    adapter: Arc<AdapterTable>,
    live: bool,
}

/// Non-owning reference to a token. Never destroys anything.
#[derive(Clone)]
pub struct TokenRef {
    raw: RawToken,
    adapter: Arc<AdapterTable>,
}

impl Token {
    pub(crate) fn from_raw(raw: RawToken, adapter: Arc<AdapterTable>) -> Self {
        Self { raw, adapter, live: true }
    }

    pub fn raw(&self) -> RawToken {
        self.raw
    }

    pub fn adapter(&self) -> &Arc<AdapterTable> {
        &self.adapter
    }

    pub fn to_ref(&self) -> TokenRef {
        TokenRef {
            raw: self.raw,
            adapter: Arc::clone(&self.adapter),
        }
    }

    /// A new token for the same resource, from the same backend
    pub fn try_clone(&self) -> Result<Token> {
        self.to_ref().try_clone()
    }

    /// Destroy the backend token now and report the outcome
    pub fn destroy(mut self) -> Result<()> {
        self.live = false;
        self.adapter.backend().destroy_token(self.raw)
    }

    pub fn properties(&self) -> Result<Properties> {
        self.to_ref().properties()
    }

    /// Refresh `props` from this token's current state
    pub fn update_properties(&self, props: &Properties) -> Result<()> {
        self.to_ref().update_properties(props)
    }

    pub fn read_error(&self, error_num: u32) -> Result<u64> {
        self.adapter.backend().read_error(self.raw, error_num)
    }

    /// Name of error register `error_num` and whether it can be cleared
    pub fn error_info(&self, error_num: u32) -> Result<ErrorInfo> {
        self.adapter.backend().get_error_info(self.raw, error_num)
    }

    pub fn clear_error(&self, error_num: u32) -> Result<()> {
        self.adapter.backend().clear_error(self.raw, error_num)
    }

    pub fn clear_all_errors(&self) -> Result<()> {
        self.adapter.backend().clear_all_errors(self.raw)
    }

    /// Open the resource. See [`Handle`] for multi-port behaviour.
    pub fn open(&self, flags: i32) -> std::result::Result<Handle, OpenError> {
        Handle::open(self, flags)
    }
}

impl TokenRef {
    pub fn raw(&self) -> RawToken {
        self.raw
    }

    pub fn adapter(&self) -> &Arc<AdapterTable> {
        &self.adapter
    }

    pub fn try_clone(&self) -> Result<Token> {
        let raw = self.adapter.backend().clone_token(self.raw)?;
        Ok(Token::from_raw(raw, Arc::clone(&self.adapter)))
    }

    pub fn properties(&self) -> Result<Properties> {
        let raw = self.adapter.backend().get_properties(self.raw)?;
        Ok(Properties::from_raw(raw, &self.adapter))
    }

    pub fn update_properties(&self, props: &Properties) -> Result<()> {
        let mut raw = props.to_raw()?;
        self.adapter.backend().update_properties(self.raw, &mut raw)?;
        props.refresh_from_raw(raw, &self.adapter)
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        if !self.live {
            return;
        }
        debug!("destroying token {:?} ({})", self.raw, self.adapter.library());
        if let Err(e) = self.adapter.backend().destroy_token(self.raw) {
            warn!("failed to destroy token {:?}: {}", self.raw, e);
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("raw", &self.raw)
            .field("library", &self.adapter.library())
            .finish()
    }
}

impl fmt::Debug for TokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRef")
            .field("raw", &self.raw)
            .field("library", &self.adapter.library())
            .finish()
    }
}
