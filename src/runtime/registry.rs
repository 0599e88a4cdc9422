/*
 *  runtime/registry.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Adapter registry - loads, initialises and tears down backends
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

//! The process-wide list of registered backends.
//!
//! Backends come either from a configuration file or, when no file names
//! any plugin, from platform autodetection through the [`PlatformCatalog`].
//! Registration order is dispatch order: the first backend registered is
//! the first one asked during enumeration.
//!
//! All state sits behind one reentrant lock. Hooks and callbacks run with
//! the lock held but without any borrow of the inner state, so they may
//! call back into the registry (a failing `initialize` unwinds through
//! `finalize_all` this way).

use std::cell::RefCell;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use log::{debug, error, info, warn};
use parking_lot::ReentrantMutex;

use super::catalog::{DeviceScanner, PlatformCatalog, SimulatedScanner, SysfsScanner};
use super::error::{FpgaError, InitError, Result};
use super::table::AdapterTable;
use crate::config::{EnvSettings, PluginConfigSet, find_config_file};

/// Produces adapter tables from library names
pub trait PluginSource: Send + Sync {
    /// Load `library` and hand it `configuration` (JSON)
    fn load(&self, library: &str, configuration: &str) -> Result<AdapterTable>;
}

#[cfg(not(feature = "plugin-system"))]
struct StaticOnly;

#[cfg(not(feature = "plugin-system"))]
impl PluginSource for StaticOnly {
    fn load(&self, library: &str, _configuration: &str) -> Result<AdapterTable> {
        Err(FpgaError::NotSupported(format!("{}: dynamic plugins are disabled", library)))
    }
}

fn default_source() -> Box<dyn PluginSource> {
    #[cfg(feature = "plugin-system")]
    {
        Box::new(super::plugin::PluginLoader)
    }
    #[cfg(not(feature = "plugin-system"))]
    {
        Box::new(StaticOnly)
    }
}

/// What an adapter callback asks the iteration to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCode {
    Continue,
    Stop,
}

/// Callback type for [`AdapterRegistry::for_each_adapter`]
pub type AdapterCallback<'a> = dyn FnMut(&Arc<AdapterTable>) -> Result<StopCode> + 'a;

#[derive(Debug, Default)]
struct RegistryState {
    adapters: Vec<Arc<AdapterTable>>,
    catalog: PlatformCatalog,
    initialized: bool,
    finalizing: bool,
}

impl RegistryState {
    fn has_library(&self, library: &str) -> bool {
        self.adapters.iter().any(|a| a.library() == library)
    }
}

pub struct AdapterRegistry {
    state: ReentrantMutex<RefCell<RegistryState>>,
    source: Box<dyn PluginSource>,
    scanner: Box<dyn DeviceScanner>,
}

static GLOBAL: OnceLock<AdapterRegistry> = OnceLock::new();

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterRegistry {
    /// A registry with the dynamic loader and the scanner the environment asks for
    pub fn new() -> Self {
        Self::from_env(&EnvSettings::from_env())
    }

    pub fn from_env(env: &EnvSettings) -> Self {
        let scanner: Box<dyn DeviceScanner> = if env.simulation {
            info!("simulation mode, using the simulated platform identity");
            Box::new(SimulatedScanner)
        } else {
            Box::new(SysfsScanner::default())
        };
        Self::with_parts(default_source(), scanner, PlatformCatalog::builtin())
    }

    pub fn with_parts(source: Box<dyn PluginSource>, scanner: Box<dyn DeviceScanner>, catalog: PlatformCatalog) -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(RegistryState {
                catalog,
                ..Default::default()
            })),
            source,
            scanner,
        }
    }

    /// The process-wide registry.
    ///
    /// On first access it is initialised from the environment unless
    /// `OPAE_EXPLICIT_INITIALIZE` is set, in which case the caller must
    /// call [`initialize`](Self::initialize) itself.
    pub fn global() -> &'static AdapterRegistry {
        GLOBAL.get_or_init(|| {
            let env = EnvSettings::from_env();
            let registry = AdapterRegistry::from_env(&env);
            if !env.explicit_initialize {
                crate::logging::init_with(&env);
                if let Err(e) = registry.initialize(env.config_file.as_deref()) {
                    warn!("automatic initialisation failed: {}", e);
                }
            }
            registry
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().borrow().initialized
    }

    /// Snapshot of the registered adapters, in registration order
    pub fn adapters(&self) -> Vec<Arc<AdapterTable>> {
        self.state.lock().borrow().adapters.clone()
    }

    /// Snapshot of the platform table with its current flags
    pub fn catalog(&self) -> PlatformCatalog {
        self.state.lock().borrow().catalog.clone()
    }

    /// Load and initialise backends. A second call after success is a no-op.
    ///
    /// `config_path` overrides the usual config file search. A config file
    /// that cannot be read or parsed as a whole is logged and ignored, and
    /// platform autodetection is used instead.
    pub fn initialize(&self, config_path: Option<&Path>) -> std::result::Result<(), InitError> {
        let guard = self.state.lock();
        if guard.borrow().initialized {
            return Ok(());
        }

        let path = config_path.map(Path::to_path_buf).or_else(find_config_file);
        let config = path.and_then(|p| match PluginConfigSet::load(&p) {
            Ok(set) => {
                info!("using configuration {}", p.display());
                Some(set)
            }
            Err(e) => {
                error!("ignoring configuration {}: {}", p.display(), e);
                None
            }
        });

        self.initialize_locked(&guard, config)
    }

    /// Like [`initialize`](Self::initialize) with an already parsed configuration
    pub fn initialize_with(&self, config: PluginConfigSet) -> std::result::Result<(), InitError> {
        let guard = self.state.lock();
        if guard.borrow().initialized {
            return Ok(());
        }
        self.initialize_locked(&guard, Some(config))
    }

    fn initialize_locked(
        &self,
        state: &RefCell<RegistryState>,
        config: Option<PluginConfigSet>,
    ) -> std::result::Result<(), InitError> {
        let mut errors = 0;
        let mut platforms = 0;

        match config {
            Some(set) if !set.entries.is_empty() => {
                errors += set.errors;
                for entry in set.entries {
                    platforms += 1;
                    if state.borrow().has_library(&entry.library) {
                        error!("plugin \"{}\": {} is already loaded", entry.name, entry.library);
                        errors += 1;
                        continue;
                    }
                    if let Err(e) = self.load_and_register(state, &entry.library, &entry.configuration) {
                        error!("plugin \"{}\": {}", entry.name, e);
                        errors += 1;
                    }
                }
            }
            other => {
                if let Some(set) = other {
                    errors += set.errors;
                    debug!("configuration names no usable plugin, autodetecting");
                }
                let (detect_errors, detected) = self.autodetect(state);
                errors += detect_errors;
                platforms += detected;
            }
        }

        if errors == 0 {
            let adapters = state.borrow().adapters.clone();
            for adapter in &adapters {
                if let Err(e) = adapter.backend().initialize() {
                    error!("{}: initialize failed: {}", adapter.library(), e);
                    errors += 1;
                }
            }
        }

        if errors == 0 && platforms > 0 {
            state.borrow_mut().initialized = true;
            info!("initialised with {} adapter(s)", state.borrow().adapters.len());
            return Ok(());
        }

        self.finalize_all();
        if errors > 0 {
            Err(InitError::Errors(errors))
        } else {
            Err(InitError::NoPlatform)
        }
    }

    fn autodetect(&self, state: &RefCell<RegistryState>) -> (usize, usize) {
        let devices = match self.scanner.scan() {
            Ok(devices) => devices,
            Err(e) => {
                error!("platform detection failed: {}", e);
                return (1, 0);
            }
        };

        let (detected, pending) = {
            let mut s = state.borrow_mut();
            for dev in &devices {
                s.catalog.detect(dev);
            }
            (s.catalog.detected_count(), s.catalog.pending())
        };

        let mut errors = 0;
        for backend in pending {
            match self.load_and_register(state, &backend.library, &backend.configuration) {
                Ok(_) => state.borrow_mut().catalog.mark_loaded(&backend.library),
                Err(e) => {
                    error!("failed to load {}: {}", backend.library, e);
                    errors += 1;
                }
            }
        }
        (errors, detected)
    }

    fn load_and_register(&self, state: &RefCell<RegistryState>, library: &str, configuration: &str) -> Result<()> {
        let table = self.source.load(library, configuration)?;
        self.register_locked(state, table).map(|_| ())
    }

    fn register_locked(&self, state: &RefCell<RegistryState>, table: AdapterTable) -> Result<Arc<AdapterTable>> {
        let mut s = state.borrow_mut();
        if s.has_library(table.library()) {
            return Err(FpgaError::InvalidParam(format!("{} is already registered", table.library())));
        }
        let table = Arc::new(table);
        s.adapters.push(Arc::clone(&table));
        debug!("registered {}", table.library());
        Ok(table)
    }

    /// Append a backend. A second table for the same library is rejected.
    pub fn register_adapter(&self, table: AdapterTable) -> Result<Arc<AdapterTable>> {
        let guard = self.state.lock();
        self.register_locked(&guard, table)
    }

    /// Run `callback` on each adapter in registration order.
    ///
    /// `NotFound` and `NoDriver` errors from the callback move on to the
    /// next adapter; any other error stops the walk. Without a callback
    /// nothing is visited and `Stop` is returned.
    pub fn for_each_adapter(&self, callback: Option<&mut AdapterCallback<'_>>) -> StopCode {
        let Some(callback) = callback else {
            error!("for_each_adapter called without a callback");
            return StopCode::Stop;
        };

        let guard = self.state.lock();
        let adapters = guard.borrow().adapters.clone();
        for adapter in &adapters {
            match callback(adapter) {
                Ok(StopCode::Continue) => {}
                Ok(StopCode::Stop) => return StopCode::Stop,
                Err(e) if e.is_skippable() => debug!("{}: {}, skipping", adapter.library(), e),
                Err(e) => {
                    debug!("{}: {}, stopping", adapter.library(), e);
                    return StopCode::Stop;
                }
            }
        }
        StopCode::Continue
    }

    /// Finalise and unload every backend. Returns the number of failures.
    ///
    /// Safe to call repeatedly and from inside a hook; an overlapping or
    /// repeated call does nothing and reports no failures. A library that
    /// still has live tokens or handles stays mapped until the last of them
    /// is gone.
    pub fn finalize_all(&self) -> usize {
        let guard = self.state.lock();
        let adapters = {
            let mut s = guard.borrow_mut();
            if s.finalizing {
                debug!("finalize_all already in progress");
                return 0;
            }
            s.finalizing = true;
            s.adapters.clone()
        };

        let mut errors = 0;
        for adapter in &adapters {
            if let Err(e) = adapter.backend().finalize() {
                error!("{}: finalize failed: {}", adapter.library(), e);
                errors += 1;
            }
        }
        drop(adapters);

        let tables = {
            let mut s = guard.borrow_mut();
            s.catalog.reset_flags();
            s.initialized = false;
            std::mem::take(&mut s.adapters)
        };

        for table in tables {
            let library = table.library().to_string();
            match Arc::try_unwrap(table) {
                Ok(table) => {
                    if let Err(e) = table.unload() {
                        error!("{}", e);
                        errors += 1;
                    }
                }
                Err(_) => warn!("{} is still in use, unloading when released", library),
            }
        }

        guard.borrow_mut().finalizing = false;
        errors
    }
}

impl Drop for AdapterRegistry {
    fn drop(&mut self) {
        let busy = {
            let guard = self.state.lock();
            let s = guard.borrow();
            s.initialized || !s.adapters.is_empty()
        };
        if busy {
            self.finalize_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::config::PluginConfig;
    use crate::runtime::catalog::{PciDevice, SIM_PLUGIN_LIBRARY, StaticScanner};
    use crate::runtime::drivers::mock::MockBackend;
    use crate::runtime::traits::Backend;

    /// Serves mock backends by library name and records every load
    #[derive(Default)]
    struct FakeSource {
        backends: Mutex<Vec<(String, MockBackend)>>,
        loads: Mutex<Vec<(String, String)>>,
        refuse: Vec<String>,
    }

    impl FakeSource {
        fn refusing(libs: &[&str]) -> Self {
            Self {
                refuse: libs.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn backend(&self, library: &str) -> Option<MockBackend> {
            self.backends.lock().iter().find(|(l, _)| l == library).map(|(_, b)| b.clone())
        }
    }

    impl PluginSource for Arc<FakeSource> {
        fn load(&self, library: &str, configuration: &str) -> Result<AdapterTable> {
            self.loads.lock().push((library.to_string(), configuration.to_string()));
            if self.refuse.iter().any(|l| l == library) {
                return Err(FpgaError::Exception(format!("{}: configure returned 1", library)));
            }
            let backend = MockBackend::default();
            self.backends.lock().push((library.to_string(), backend.clone()));
            Ok(AdapterTable::new(library, Box::new(backend)))
        }
    }

    fn registry(source: &Arc<FakeSource>, devices: Vec<PciDevice>) -> AdapterRegistry {
        AdapterRegistry::with_parts(
            Box::new(Arc::clone(source)),
            Box::new(StaticScanner(devices)),
            PlatformCatalog::builtin(),
        )
    }

    fn plugin(name: &str, library: &str) -> PluginConfig {
        PluginConfig {
            name: name.into(),
            library: library.into(),
            enabled: true,
            configuration: "{}".into(),
        }
    }

    fn libraries(registry: &AdapterRegistry) -> Vec<String> {
        registry.adapters().iter().map(|a| a.library().to_string()).collect()
    }

    #[test]
    fn test_config_drives_loading_in_order() {
        let source = Arc::new(FakeSource::default());
        let reg = registry(&source, vec![]);
        let set = PluginConfigSet {
            entries: vec![plugin("xfpga", "libxfpga.so"), plugin("vfio", "libopae-v.so")],
            errors: 0,
        };

        reg.initialize_with(set.clone()).unwrap();
        assert!(reg.is_initialized());
        assert_eq!(libraries(&reg), ["libxfpga.so", "libopae-v.so"]);
        assert_eq!(source.backend("libxfpga.so").unwrap().state().init_calls, 1);

        // already initialised
        reg.initialize_with(set).unwrap();
        assert_eq!(source.loads.lock().len(), 2);
    }

    #[test]
    fn test_missing_configuration_entry_counts_one_error() {
        let text = r#"{
            "configurations": {
                "xfpga": { "enabled": true, "plugin": "libxfpga.so", "configuration": {} }
            },
            "plugins": [ "xfpga", "ghost" ]
        }"#;
        let set = PluginConfigSet::parse(text).unwrap();

        let source = Arc::new(FakeSource::default());
        let reg = registry(&source, vec![]);
        assert_eq!(reg.initialize_with(set), Err(InitError::Errors(1)));

        // one plugin was loaded before the failure was unwound
        assert_eq!(source.loads.lock().len(), 1);
        assert!(reg.adapters().is_empty());
        assert!(!reg.is_initialized());
    }

    #[test]
    fn test_configure_failure_discards_and_continues() {
        let source = Arc::new(FakeSource::refusing(&["libbad.so"]));
        let reg = registry(&source, vec![]);
        let set = PluginConfigSet {
            entries: vec![plugin("bad", "libbad.so"), plugin("good", "libgood.so")],
            errors: 0,
        };
        assert_eq!(reg.initialize_with(set), Err(InitError::Errors(1)));
        assert_eq!(source.loads.lock().len(), 2);
    }

    #[test]
    fn test_duplicate_library_in_config_is_not_loaded_twice() {
        let source = Arc::new(FakeSource::default());
        let reg = registry(&source, vec![]);
        let set = PluginConfigSet {
            entries: vec![plugin("a", "libxfpga.so"), plugin("b", "libxfpga.so")],
            errors: 0,
        };
        assert_eq!(reg.initialize_with(set), Err(InitError::Errors(1)));
        assert_eq!(source.loads.lock().len(), 1);
    }

    #[test]
    fn test_autodetect_loads_each_library_once() {
        let source = Arc::new(FakeSource::default());
        let n6000 = PciDevice {
            vendor_id: 0x8086,
            device_id: 0xbcce,
            subsystem_vendor_id: 0x8086,
            subsystem_device_id: 0x1770,
        };
        let d5005 = PciDevice {
            vendor_id: 0x8086,
            device_id: 0x0b2b,
            subsystem_vendor_id: 0x8086,
            subsystem_device_id: 0,
        };
        let reg = registry(&source, vec![n6000, d5005]);

        reg.initialize(Some(Path::new("/nonexistent/opae.cfg"))).unwrap();
        assert_eq!(libraries(&reg), ["libxfpga.so", "libopae-v.so", "libopae-u.so"]);
        assert!(reg.catalog().is_loaded("libxfpga.so"));
    }

    #[test]
    fn test_simulated_identity_selects_sim_plugin() {
        let source = Arc::new(FakeSource::default());
        let reg = AdapterRegistry::with_parts(
            Box::new(Arc::clone(&source)),
            Box::new(SimulatedScanner),
            PlatformCatalog::builtin(),
        );
        reg.initialize_with(PluginConfigSet::default()).unwrap();
        assert_eq!(libraries(&reg), [SIM_PLUGIN_LIBRARY]);
    }

    #[test]
    fn test_nothing_detected_is_no_platform() {
        let source = Arc::new(FakeSource::default());
        let reg = registry(&source, vec![]);
        assert_eq!(reg.initialize_with(PluginConfigSet::default()), Err(InitError::NoPlatform));
        assert!(!reg.is_initialized());
    }

    #[test]
    fn test_init_hook_failure_unwinds() {
        let source = Arc::new(FakeSource::default());
        let reg = registry(&source, vec![]);

        // make the second backend's hook fail through a pre-registered table
        let (bad, table) = MockBackend::with_table("libbad.so");
        bad.state().simulate_init_failure = true;
        reg.register_adapter(Arc::try_unwrap(table).unwrap()).unwrap();

        let set = PluginConfigSet {
            entries: vec![plugin("good", "libgood.so")],
            errors: 0,
        };
        assert_eq!(reg.initialize_with(set), Err(InitError::Errors(1)));
        assert!(reg.adapters().is_empty());
        assert_eq!(bad.state().finalize_calls, 1);
        assert_eq!(source.backend("libgood.so").unwrap().state().finalize_calls, 1);
    }

    #[test]
    fn test_register_rejects_duplicate_library() {
        let reg = registry(&Arc::new(FakeSource::default()), vec![]);
        reg.register_adapter(AdapterTable::new("libxfpga.so", Box::new(MockBackend::default())))
            .unwrap();
        let err = reg
            .register_adapter(AdapterTable::new("libxfpga.so", Box::new(MockBackend::default())))
            .unwrap_err();
        assert!(matches!(err, FpgaError::InvalidParam(_)));
        assert_eq!(reg.adapters().len(), 1);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let source = Arc::new(FakeSource::default());
        let reg = registry(&source, vec![]);
        reg.initialize_with(PluginConfigSet {
            entries: vec![plugin("xfpga", "libxfpga.so")],
            errors: 0,
        })
        .unwrap();

        assert_eq!(reg.finalize_all(), 0);
        assert_eq!(reg.finalize_all(), 0);
        assert!(!reg.is_initialized());
        assert!(reg.adapters().is_empty());
        assert_eq!(source.backend("libxfpga.so").unwrap().state().finalize_calls, 1);

        // can be initialised again afterwards
        reg.initialize_with(PluginConfigSet {
            entries: vec![plugin("xfpga", "libxfpga.so")],
            errors: 0,
        })
        .unwrap();
        assert_eq!(reg.adapters().len(), 1);
    }

    #[test]
    fn test_finalize_failures_are_counted() {
        let reg = registry(&Arc::new(FakeSource::default()), vec![]);
        let (mock, table) = MockBackend::with_table("libflaky.so");
        mock.state().simulate_finalize_failure = true;
        reg.register_adapter(Arc::try_unwrap(table).unwrap()).unwrap();
        reg.register_adapter(AdapterTable::new("libfine.so", Box::new(MockBackend::default())))
            .unwrap();

        assert_eq!(reg.finalize_all(), 1);
        assert!(reg.adapters().is_empty());
    }

    /// A backend whose finalize hook calls back into its registry
    struct Reentrant {
        registry: Arc<OnceLock<Arc<AdapterRegistry>>>,
        nested: Arc<AtomicUsize>,
    }

    impl Backend for Reentrant {
        fn finalize(&self) -> Result<()> {
            if let Some(reg) = self.registry.get() {
                assert_eq!(reg.finalize_all(), 0);
                self.nested.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[test]
    fn test_finalize_from_inside_a_hook_is_a_noop() {
        let cell = Arc::new(OnceLock::new());
        let nested = Arc::new(AtomicUsize::new(0));
        let reg = Arc::new(registry(&Arc::new(FakeSource::default()), vec![]));
        let _ = cell.set(Arc::clone(&reg));

        reg.register_adapter(AdapterTable::new(
            "libreentrant.so",
            Box::new(Reentrant {
                registry: Arc::clone(&cell),
                nested: Arc::clone(&nested),
            }),
        ))
        .unwrap();

        assert_eq!(reg.finalize_all(), 0);
        assert_eq!(nested.load(Ordering::SeqCst), 1);
        assert!(reg.adapters().is_empty());
    }

    #[test]
    fn test_for_each_without_callback_stops() {
        let reg = registry(&Arc::new(FakeSource::default()), vec![]);
        reg.register_adapter(AdapterTable::new("liba.so", Box::new(MockBackend::default())))
            .unwrap();
        assert_eq!(reg.for_each_adapter(None), StopCode::Stop);
    }

    #[test]
    fn test_for_each_skips_not_found_and_stops_on_other_errors() {
        let reg = registry(&Arc::new(FakeSource::default()), vec![]);
        for lib in ["liba.so", "libb.so", "libc.so"] {
            reg.register_adapter(AdapterTable::new(lib, Box::new(MockBackend::default())))
                .unwrap();
        }

        let mut seen = Vec::new();
        let code = reg.for_each_adapter(Some(&mut |a: &Arc<AdapterTable>| {
            seen.push(a.library().to_string());
            match a.library() {
                "liba.so" => Err(FpgaError::NoDriver),
                "libb.so" => Err(FpgaError::NotFound("nothing here".into())),
                _ => Ok(StopCode::Continue),
            }
        }));
        assert_eq!(code, StopCode::Continue);
        assert_eq!(seen, ["liba.so", "libb.so", "libc.so"]);

        let mut visits = 0;
        let code = reg.for_each_adapter(Some(&mut |_: &Arc<AdapterTable>| {
            visits += 1;
            Err(FpgaError::Busy)
        }));
        assert_eq!(code, StopCode::Stop);
        assert_eq!(visits, 1);
    }

    #[test]
    fn test_unload_waits_for_outstanding_tokens() {
        let reg = registry(&Arc::new(FakeSource::default()), vec![]);
        let table = reg
            .register_adapter(AdapterTable::new("liba.so", Box::new(MockBackend::default())))
            .unwrap();

        assert_eq!(reg.finalize_all(), 0);
        assert!(reg.adapters().is_empty());
        // the outstanding reference keeps the table usable
        assert_eq!(table.library(), "liba.so");
        assert_eq!(Arc::strong_count(&table), 1);
    }

    /// Counts finalize calls and holds the hook long enough for callers to overlap
    struct SlowFinalize {
        calls: Arc<AtomicUsize>,
    }

    impl Backend for SlowFinalize {
        fn finalize(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(50));
            Ok(())
        }
    }

    #[test]
    fn test_concurrent_finalize_runs_each_hook_once() {
        let reg = registry(&Arc::new(FakeSource::default()), vec![]);
        let calls = Arc::new(AtomicUsize::new(0));
        for lib in ["liba.so", "libb.so"] {
            reg.register_adapter(AdapterTable::new(
                lib,
                Box::new(SlowFinalize {
                    calls: Arc::clone(&calls),
                }),
            ))
            .unwrap();
        }

        let barrier = std::sync::Barrier::new(2);
        let (first, second) = std::thread::scope(|s| {
            let a = s.spawn(|| {
                barrier.wait();
                reg.finalize_all()
            });
            let b = s.spawn(|| {
                barrier.wait();
                reg.finalize_all()
            });
            (a.join().unwrap(), b.join().unwrap())
        });

        assert_eq!((first, second), (0, 0));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(reg.adapters().is_empty());
        assert!(!reg.is_initialized());
    }

    #[test]
    fn test_same_config_loads_same_plugins() {
        let text = r#"{
            "configurations": {
                "xfpga": { "enabled": true, "plugin": "libxfpga.so", "configuration": { "a": 1 } },
                "off": { "enabled": false, "plugin": "liboff.so" },
                "vfio": { "enabled": true, "plugin": "libopae-v.so" }
            },
            "plugins": [ "vfio", "off", "xfpga" ]
        }"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, text.as_bytes()).unwrap();

        let parsed = PluginConfigSet::parse(text).unwrap();
        assert_eq!(PluginConfigSet::parse(text).unwrap(), parsed);
        let loaded = PluginConfigSet::load(file.path()).unwrap();
        assert_eq!(loaded, parsed);

        let mut runs = Vec::new();
        for set in [parsed, loaded] {
            let source = Arc::new(FakeSource::default());
            let reg = registry(&source, vec![]);
            reg.initialize_with(set).unwrap();
            runs.push((libraries(&reg), source.loads.lock().clone()));
            assert_eq!(reg.finalize_all(), 0);
        }
        assert_eq!(runs[0], runs[1]);
        assert_eq!(runs[0].0, ["libopae-v.so", "libxfpga.so"]);
    }
}
