/*
 *  runtime/error.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Error types for the dispatch runtime
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

use thiserror::Error;

use super::handle::Handle;

/// Errors returned by every runtime operation.
///
/// The variants follow the result codes a backend plugin reports across
/// the C ABI, so a code coming out of a plugin maps onto exactly one kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FpgaError {
    /// Null, malformed or inapplicable input
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// No matching device, or the queried field is not populated
    #[error("not found: {0}")]
    NotFound(String),

    #[error("out of memory")]
    NoMemory,

    /// Internal fault such as a corrupted object
    #[error("unexpected fault: {0}")]
    Exception(String),

    /// The bound backend does not provide this operation
    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("resource busy")]
    Busy,

    #[error("no driver available")]
    NoDriver,

    #[error("no daemon available")]
    NoDaemon,

    #[error("access denied")]
    NoAccess,

    #[error("reconfiguration failed: {0}")]
    Reconfiguration(String),
}

impl FpgaError {
    pub(crate) fn unsupported(operation: &str) -> Self {
        FpgaError::NotSupported(operation.to_string())
    }

    /// True for the kinds that multi-backend iteration treats as
    /// "nothing here, keep going".
    pub fn is_skippable(&self) -> bool {
        matches!(self, FpgaError::NotFound(_) | FpgaError::NoDriver)
    }
}

/// Result type used across the runtime.
pub type Result<T> = std::result::Result<T, FpgaError>;

/// Failure of [`crate::runtime::AdapterRegistry::initialize`].
///
/// Whatever was loaded before the failure has already been unwound when
/// this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("plugin manager initialization failed with {0} error(s)")]
    Errors(usize),

    #[error("no supported platform or plugin detected")]
    NoPlatform,
}

/// Failure while opening a handle.
///
/// When the root opened but a child port could not be resolved, the
/// partially built tree is handed back in `partial`. Children linked
/// before the failure stay attached to it, so closing (or dropping) the
/// partial handle releases them.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct OpenError {
    pub source: FpgaError,
    pub partial: Option<Handle>,
}

impl OpenError {
    pub(crate) fn plain(source: FpgaError) -> Self {
        Self { source, partial: None }
    }

    /// The error kind, without the partial handle
    pub fn kind(&self) -> &FpgaError {
        &self.source
    }

    pub fn into_partial(self) -> Option<Handle> {
        self.partial
    }
}

impl From<OpenError> for FpgaError {
    fn from(e: OpenError) -> Self {
        e.source
    }
}
