/*
 *  config.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Plugin configuration file and environment settings
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

use dirs_next::home_dir;
use log::{debug, error};
use serde::Deserialize;
use serde_json::Value;
use std::{fs, path::{Path, PathBuf}};
use thiserror::Error;

/// Config file path override
pub const ENV_CFGFILE: &str = "LIBOPAE_CFGFILE";
/// Log level: 0 error, 1 message, 2 debug
pub const ENV_LOG: &str = "LIBOPAE_LOG";
/// Redirect log output to this file
pub const ENV_LOGFILE: &str = "LIBOPAE_LOGFILE";
/// When present, the global registry is not initialized on first use
pub const ENV_EXPLICIT_INITIALIZE: &str = "OPAE_EXPLICIT_INITIALIZE";
/// When present, platform detection reports the simulated identity
pub const ENV_SIMULATION: &str = "WITH_ASE";

/// Largest config file accepted
pub const MAX_CONFIG_SIZE: u64 = 8 * 4096;

const HOME_CONFIG_FILES: [&str; 3] = [
    ".local/opae.cfg",
    ".local/opae/opae.cfg",
    ".config/opae/opae.cfg",
];

const SYSTEM_CONFIG_FILES: [&str; 2] = [
    "/usr/local/etc/opae/opae.cfg",
    "/etc/opae/opae.cfg",
];

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file {path} is {size} bytes, limit is {limit}")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },
    #[error("Validation error: {0}")]
    Validation(String),
}

/// One plugin to load, resolved from the config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    pub name: String,
    pub library: String,
    pub enabled: bool,
    /// Serialized JSON handed to the plugin's configure entry point
    pub configuration: String,
}

/// Enabled plugins in `plugins` order, plus the number of entries that
/// could not be resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginConfigSet {
    pub entries: Vec<PluginConfig>,
    pub errors: usize,
}

#[derive(Debug, Deserialize)]
struct ConfigurationEntry {
    plugin: String,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    configuration: Value,
}

impl PluginConfigSet {
    /// Parse a config document.
    ///
    /// A document that is not JSON, or has no `plugins` array of names, is
    /// rejected as a whole. Problems with a single plugin are counted in
    /// `errors` and the rest are still processed.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let root: Value = serde_json::from_str(text)?;

        let names = root
            .get("plugins")
            .and_then(Value::as_array)
            .ok_or_else(|| ConfigError::Validation("missing \"plugins\" array".into()))?;
        let configurations = root.get("configurations").and_then(Value::as_object);

        let mut set = PluginConfigSet::default();
        for name in names {
            let Some(name) = name.as_str() else {
                error!("plugin name {} is not a string", name);
                set.errors += 1;
                continue;
            };

            let Some(raw) = configurations.and_then(|c| c.get(name)) else {
                error!("plugin \"{}\" has no entry in \"configurations\"", name);
                set.errors += 1;
                continue;
            };

            let entry: ConfigurationEntry = match serde_json::from_value(raw.clone()) {
                Ok(entry) => entry,
                Err(e) => {
                    error!("configuration for \"{}\" is malformed: {}", name, e);
                    set.errors += 1;
                    continue;
                }
            };

            if !entry.enabled {
                debug!("plugin \"{}\" is disabled", name);
                continue;
            }

            let configuration = if entry.configuration.is_null() {
                "{}".to_string()
            } else {
                entry.configuration.to_string()
            };

            set.entries.push(PluginConfig {
                name: name.to_string(),
                library: entry.plugin,
                enabled: true,
                configuration,
            });
        }
        Ok(set)
    }

    /// Read and parse a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let size = fs::metadata(path)?.len();
        if size > MAX_CONFIG_SIZE {
            return Err(ConfigError::TooLarge {
                path: path.to_path_buf(),
                size,
                limit: MAX_CONFIG_SIZE,
            });
        }
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }
}

/// Locate the config file: `LIBOPAE_CFGFILE`, then the home paths, then
/// the system paths. First existing file wins.
pub fn find_config_file() -> Option<PathBuf> {
    let from_env = std::env::var_os(ENV_CFGFILE).map(PathBuf::from);
    let system: Vec<PathBuf> = SYSTEM_CONFIG_FILES.iter().map(PathBuf::from).collect();
    find_config_file_in(from_env, home_dir(), &system)
}

fn find_config_file_in(from_env: Option<PathBuf>, home: Option<PathBuf>, system: &[PathBuf]) -> Option<PathBuf> {
    if let Some(p) = from_env {
        if p.is_file() {
            return Some(fs::canonicalize(&p).unwrap_or(p));
        }
        debug!("{} points at {}, which does not exist", ENV_CFGFILE, p.display());
    }

    if let Some(home) = home {
        for rel in HOME_CONFIG_FILES {
            let p = home.join(rel);
            if p.is_file() {
                return Some(p);
            }
        }
    }

    system.iter().find(|p| p.is_file()).cloned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    #[default]
    Error,
    Message,
    Debug,
}

impl LogLevel {
    fn parse(value: &str) -> Self {
        match value.trim().parse::<u32>() {
            Ok(0) | Err(_) => LogLevel::Error,
            Ok(1) => LogLevel::Message,
            Ok(_) => LogLevel::Debug,
        }
    }

    pub fn filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Message => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
        }
    }
}

/// Settings taken from the process environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSettings {
    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub explicit_initialize: bool,
    pub simulation: bool,
}

impl EnvSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            log_level: lookup(ENV_LOG).map(|v| LogLevel::parse(&v)).unwrap_or_default(),
            log_file: lookup(ENV_LOGFILE).filter(|v| !v.is_empty()).map(PathBuf::from),
            config_file: lookup(ENV_CFGFILE).filter(|v| !v.is_empty()).map(PathBuf::from),
            explicit_initialize: lookup(ENV_EXPLICIT_INITIALIZE).is_some(),
            simulation: lookup(ENV_SIMULATION).is_some(),
        }
    }
}
