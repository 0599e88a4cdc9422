/*
 *  logging.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Log setup from LIBOPAE_LOG / LIBOPAE_LOGFILE
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

use std::fs::OpenOptions;

use env_logger::{Builder, Env, Target};
use log::warn;

use crate::config::{EnvSettings, LogLevel};

/// Initialise logging from the environment. Safe to call more than once;
/// only the first call installs a logger.
pub fn init() {
    init_with(&EnvSettings::from_env());
}

/// Initialise logging at an explicit level, ignoring `LIBOPAE_LOG`
pub fn init_at(level: LogLevel) {
    let mut env = EnvSettings::from_env();
    env.log_level = level;
    init_with(&env);
}

pub fn init_with(env: &EnvSettings) {
    let default_filter = env.log_level.filter().as_str().to_ascii_lowercase();
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter));
    builder.format_timestamp_secs();

    let mut redirect_failed = None;
    if let Some(path) = &env.log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => redirect_failed = Some((path.clone(), e)),
        }
    }

    if builder.try_init().is_ok() {
        if let Some((path, e)) = redirect_failed {
            warn!("could not open log file {}: {}, logging to stderr", path.display(), e);
        }
    }
}
