/*
 *  main.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Diagnostic front end: list adapters and enumerate devices
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

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Arg, ArgAction, Command};
use log::{error, info};

use fpga_shell::config::{EnvSettings, LogLevel};
use fpga_shell::logging;
use fpga_shell::runtime::{AdapterRegistry, Enumerator, Guid, ObjectType, Properties, Token};

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

fn describe(token: &Token) -> anyhow::Result<String> {
    let props = token.properties()?;
    let kind = match props.object_type() {
        Ok(ObjectType::Device) => "device",
        Ok(ObjectType::Accelerator) => "accelerator",
        Err(_) => "unknown",
    };
    let bdf = match (props.segment(), props.bus(), props.device(), props.function()) {
        (Ok(s), Ok(b), Ok(d), Ok(f)) => format!("{:04x}:{:02x}:{:02x}.{}", s, b, d, f),
        _ => "-".to_string(),
    };
    let id = match (props.vendor_id(), props.device_id()) {
        (Ok(v), Ok(d)) => format!("{:04x}:{:04x}", v, d),
        _ => "-".to_string(),
    };
    let guid = props.guid().map(|g| g.to_string()).unwrap_or_else(|_| "-".to_string());
    let line = format!(
        "{:<12} {:<13} {:<10} {} [{}]",
        kind,
        bdf,
        id,
        guid,
        token.adapter().library()
    );
    props.destroy()?;
    Ok(line)
}

fn main() -> anyhow::Result<()> {
    let matches = Command::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(Arg::new("debug")
        .action(ArgAction::SetTrue)
        .long("debug")
        .short('v')
        .alias("verbose")
        .help("Enable debug log level")
        .required(false))
        .arg(Arg::new("config")
        .short('C')
        .long("config")
        .help("Plugin configuration file, overrides the search path")
        .value_parser(clap::value_parser!(PathBuf))
        .required(false))
        .arg(Arg::new("list-adapters")
        .action(ArgAction::SetTrue)
        .short('l')
        .long("list-adapters")
        .help("List registered backend adapters")
        .required(false))
        .arg(Arg::new("enumerate")
        .action(ArgAction::SetTrue)
        .short('e')
        .long("enumerate")
        .help("Enumerate devices and accelerators")
        .required(false))
        .arg(Arg::new("guid")
        .short('g')
        .long("guid")
        .help("Only enumerate accelerators with this GUID")
        .required(false))
        .get_matches();

    let env = EnvSettings::from_env();
    if matches.get_flag("debug") {
        logging::init_at(LogLevel::Debug);
    } else {
        logging::init_with(&env);
    }

    info!("{} v.{} built {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), BUILD_DATE);

    let config = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .or_else(|| env.config_file.clone());

    let registry = AdapterRegistry::from_env(&env);
    if let Err(e) = registry.initialize(config.as_deref()) {
        error!("{}", e);
        bail!("runtime initialization failed: {}", e);
    }

    if matches.get_flag("list-adapters") {
        for adapter in registry.adapters() {
            let kind = if adapter.is_dynamic() { "plugin" } else { "builtin" };
            println!("{:<32} {}", adapter.library(), kind);
        }
    }

    if matches.get_flag("enumerate") || matches.get_one::<String>("guid").is_some() {
        let mut enumerator = Enumerator::new(&registry);
        if let Some(text) = matches.get_one::<String>("guid") {
            let guid = Guid::parse_str(text).with_context(|| format!("invalid GUID {}", text))?;
            let filter = Properties::new();
            filter.set_object_type(ObjectType::Accelerator)?;
            filter.set_guid(guid)?;
            enumerator = enumerator.filter(&filter)?;
            filter.destroy()?;
        }

        let found = enumerator.run()?;
        for token in &found.tokens {
            println!("{}", describe(token)?);
        }
        println!("{} match(es)", found.num_matches);
    }

    let errors = registry.finalize_all();
    if errors > 0 {
        bail!("{} adapter(s) failed to finalize", errors);
    }
    Ok(())
}
