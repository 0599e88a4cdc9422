/*
 *  runtime/table.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Adapter table - one registered backend
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

use super::error::Result;
use super::traits::Backend;

#[cfg(feature = "plugin-system")]
use super::plugin::LoadedPlugin;

/// One registered backend: its capability set plus the library it came
/// from. Identity is the library name.
///
/// Tokens and handles keep the table alive through an `Arc`, so a library
/// is never unloaded underneath an outstanding object.
pub struct AdapterTable {
    library: String,

    // dropped before `plugin`: the backend's entry points live in it
    backend: Box<dyn Backend>,

    #[cfg(feature = "plugin-system")]
    plugin: Option<LoadedPlugin>,
}

impl AdapterTable {
    /// An in-process backend, not backed by a shared library
    pub fn new(library: impl Into<String>, backend: Box<dyn Backend>) -> Self {
        Self {
            library: library.into(),
            backend,
            #[cfg(feature = "plugin-system")]
            plugin: None,
        }
    }

    #[cfg(feature = "plugin-system")]
    pub(crate) fn from_plugin(library: impl Into<String>, backend: Box<dyn Backend>, plugin: LoadedPlugin) -> Self {
        Self {
            library: library.into(),
            backend,
            plugin: Some(plugin),
        }
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Whether the backend came from a dynamically loaded library
    pub fn is_dynamic(&self) -> bool {
        #[cfg(feature = "plugin-system")]
        {
            self.plugin.is_some()
        }
        #[cfg(not(feature = "plugin-system"))]
        {
            false
        }
    }

    /// Drop the backend, then close its library.
    pub(crate) fn unload(self) -> Result<()> {
        #[cfg(feature = "plugin-system")]
        {
            let AdapterTable { backend, plugin, .. } = self;
            drop(backend);
            match plugin {
                Some(p) => p.close(),
                None => Ok(()),
            }
        }
        #[cfg(not(feature = "plugin-system"))]
        {
            drop(self);
            Ok(())
        }
    }
}

impl fmt::Debug for AdapterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterTable")
            .field("library", &self.library)
            .field("dynamic", &self.is_dynamic())
            .finish()
    }
}
