/*
 *  runtime/plugin/loader.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Plugin loader - locates, opens and configures backend libraries
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

use std::ffi::CString;

use libloading::{Library, Symbol};
use log::{debug, info, warn};

use super::adapter::{PluginBackend, catch_ffi_call};
use super::ffi::{
    OPAE_PLUGIN_ABI_VERSION_MAJOR, OPAE_PLUGIN_ABI_VERSION_MINOR, OPAE_PLUGIN_CONFIGURE,
    OpaeAdapterVTable, PluginConfigureFn,
};
use crate::runtime::error::{FpgaError, Result};
use crate::runtime::registry::PluginSource;
use crate::runtime::table::AdapterTable;

/// Prefixes tried in order when opening a plugin library. The empty
/// prefix defers to the dynamic linker's own search path.
pub const SEARCH_PREFIXES: [&str; 6] = [
    "",
    "./target/release/",
    "/usr/local/lib/opae/",
    "/usr/local/lib64/opae/",
    "/usr/lib/opae/",
    "/usr/lib64/opae/",
];

/// An open shared library backing a registered adapter
pub struct LoadedPlugin {
    library: Library,
    path: String,
}

impl LoadedPlugin {
    /// The path the library was opened from
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn close(self) -> Result<()> {
        debug!("Unloading plugin {}", self.path);
        self.library
            .close()
            .map_err(|e| FpgaError::Exception(format!("unloading {}: {}", self.path, e)))
    }
}

/// Plugin loader - opens backend libraries and runs their configure hook
#[derive(Debug, Default, Clone, Copy)]
pub struct PluginLoader;

impl PluginLoader {
    /// Candidate paths for `library`, in the order they are tried.
    /// A name that already contains a directory is used as is.
    pub fn search_paths(library: &str) -> Vec<String> {
        if library.contains('/') {
            return vec![library.to_string()];
        }
        SEARCH_PREFIXES
            .iter()
            .map(|prefix| format!("{}{}", prefix, library))
            .collect()
    }

    fn open_library(library: &str) -> Result<(Library, String)> {
        let mut last_error = None;
        for candidate in Self::search_paths(library) {
            match unsafe { Library::new(&candidate) } {
                Ok(lib) => {
                    debug!("Opened {} as {}", library, candidate);
                    return Ok((lib, candidate));
                }
                Err(e) => last_error = Some(e),
            }
        }
        let reason = last_error.map_or_else(|| "no candidates".to_string(), |e| e.to_string());
        Err(FpgaError::NotFound(format!("plugin {}: {}", library, reason)))
    }

    /// Load a plugin and configure it
    ///
    /// This performs the following steps:
    /// 1. Open the shared library from the first prefix that works
    /// 2. Look up `opae_plugin_configure`
    /// 3. Call it with an empty vtable and the JSON configuration
    /// 4. Verify the ABI version the plugin reports
    pub fn load_plugin(library: &str, configuration: &str) -> Result<AdapterTable> {
        info!("Loading plugin {}", library);
        let (lib, path) = Self::open_library(library)?;

        let config = CString::new(configuration)
            .map_err(|_| FpgaError::InvalidParam(format!("{}: configuration contains NUL", library)))?;

        let mut vtable = OpaeAdapterVTable::default();
        {
            let configure: Symbol<PluginConfigureFn> = unsafe { lib.get(OPAE_PLUGIN_CONFIGURE) }
                .map_err(|e| FpgaError::NotFound(format!("{}: no configure entry point: {}", path, e)))?;

            let code = catch_ffi_call(|| unsafe { configure(&mut vtable, config.as_ptr()) })?;
            if code != 0 {
                return Err(FpgaError::Exception(format!("{}: configure returned {}", path, code)));
            }
        }

        let major = vtable.abi_version >> 16;
        let minor = vtable.abi_version & 0xffff;
        debug!(
            "Plugin ABI version: {}.{}, host {}.{}",
            major, minor, OPAE_PLUGIN_ABI_VERSION_MAJOR, OPAE_PLUGIN_ABI_VERSION_MINOR
        );
        if major != OPAE_PLUGIN_ABI_VERSION_MAJOR {
            return Err(FpgaError::NotSupported(format!(
                "{}: ABI version {}.{} incompatible with host {}.{}",
                path, major, minor, OPAE_PLUGIN_ABI_VERSION_MAJOR, OPAE_PLUGIN_ABI_VERSION_MINOR
            )));
        }
        if minor > OPAE_PLUGIN_ABI_VERSION_MINOR {
            warn!("{} has newer minor ABI version {}.{} than host", path, major, minor);
        }

        info!("Loaded plugin {} from {}", library, path);
        let backend = PluginBackend::new(library, vtable);
        Ok(AdapterTable::from_plugin(
            library,
            Box::new(backend),
            LoadedPlugin { library: lib, path },
        ))
    }
}

impl PluginSource for PluginLoader {
    fn load(&self, library: &str, configuration: &str) -> Result<AdapterTable> {
        Self::load_plugin(library, configuration)
    }
}
