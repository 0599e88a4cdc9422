/*
 *  runtime/catalog.rs
 *
 *  fpga-shell - FPGA plugin dispatch runtime
 *  (c) 2020-26 Stuart Hunter
 *
 *  Platform catalog - PCI identities to backend libraries
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

//! Platform catalog
//!
//! When no configuration file names any plugins, the registry scans the
//! PCI bus and looks every device up here. An identity may map to more
//! than one library (one per access method); every match is flagged as
//! detected, and each distinct library is loaded once.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

/// Vendor/device identity used by simulation mode
pub const SIM_VENDOR_ID: u16 = 0x8086;
pub const SIM_DEVICE_ID: u16 = 0x0a5e;

/// Library serving the simulated identity
pub const SIM_PLUGIN_LIBRARY: &str = "libfpga_plugin_sim.so";

pub const SYSFS_PCI_DEVICES: &str = "/sys/bus/pci/devices";

/// One function found on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciDevice {
    pub vendor_id: u16,
    pub device_id: u16,
    pub subsystem_vendor_id: u16,
    pub subsystem_device_id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformEntry {
    pub vendor_id: u16,
    pub device_id: u16,
    /// `None` matches any subsystem vendor
    pub subsystem_vendor_id: Option<u16>,
    /// `None` matches any subsystem device
    pub subsystem_device_id: Option<u16>,
    pub library: String,
    pub configuration: String,
    detected: bool,
    loaded: bool,
}

impl PlatformEntry {
    pub fn new(
        vendor_id: u16,
        device_id: u16,
        subsystem_vendor_id: Option<u16>,
        subsystem_device_id: Option<u16>,
        library: &str,
    ) -> Self {
        Self {
            vendor_id,
            device_id,
            subsystem_vendor_id,
            subsystem_device_id,
            library: library.to_string(),
            configuration: "{}".to_string(),
            detected: false,
            loaded: false,
        }
    }

    pub fn matches(&self, dev: &PciDevice) -> bool {
        self.vendor_id == dev.vendor_id
            && self.device_id == dev.device_id
            && self.subsystem_vendor_id.is_none_or(|v| v == dev.subsystem_vendor_id)
            && self.subsystem_device_id.is_none_or(|d| d == dev.subsystem_device_id)
    }

    pub fn is_detected(&self) -> bool {
        self.detected
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

/// A backend chosen by detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedBackend {
    pub library: String,
    pub configuration: String,
}

#[derive(Debug, Clone)]
pub struct PlatformCatalog {
    entries: Vec<PlatformEntry>,
}

impl Default for PlatformCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PlatformCatalog {
    pub fn from_entries(entries: Vec<PlatformEntry>) -> Self {
        Self { entries }
    }

    /// The identities this runtime knows how to serve
    pub fn builtin() -> Self {
        const ANY: Option<u16> = None;
        let intel = Some(0x8086);
        let mut entries = Vec::new();

        fn add(
            entries: &mut Vec<PlatformEntry>,
            (vendor, device): (u16, u16),
            (sub_vendor, sub_device): (Option<u16>, Option<u16>),
            libraries: &[&str],
        ) {
            for lib in libraries {
                entries.push(PlatformEntry::new(vendor, device, sub_vendor, sub_device, lib));
            }
        }

        add(&mut entries, (0x1c2c, 0x1000), (Some(0), Some(0)), &["libxfpga.so"]); // N5010
        add(&mut entries, (0x1c2c, 0x1001), (Some(0), Some(0)), &["libxfpga.so"]); // N5011
        add(&mut entries, (0x1c2c, 0x1002), (Some(0), Some(0)), &["libxfpga.so"]); // N5013
        add(&mut entries, (0x1c2c, 0x1003), (Some(0), Some(0)), &["libxfpga.so"]); // N5014
        add(&mut entries, (0x1ded, 0x8103), (Some(0x1ded), Some(0x4342)), &["libxfpga.so"]);
        add(&mut entries, (0x8086, 0xbcbd), (ANY, ANY), &["libxfpga.so"]); // MCP
        add(&mut entries, (0x8086, 0xbcc0), (ANY, ANY), &["libxfpga.so"]);
        add(&mut entries, (0x8086, 0xbcc1), (ANY, ANY), &["libxfpga.so"]);
        add(&mut entries, (0x8086, 0x09c4), (ANY, ANY), &["libxfpga.so"]); // A10GX
        add(&mut entries, (0x8086, 0x09c5), (ANY, ANY), &["libxfpga.so"]);
        add(&mut entries, (0x8086, 0x0ddb), (ANY, ANY), &["libxfpga.so", "libopae-v.so", "libopae-u.so"]);
        add(&mut entries, (0x8086, 0x0b2b), (ANY, ANY), &["libxfpga.so"]); // D5005
        add(&mut entries, (0x8086, 0x0b2c), (ANY, ANY), &["libxfpga.so"]);
        add(&mut entries, (0x8086, 0x0b30), (ANY, ANY), &["libxfpga.so"]); // N3000
        add(&mut entries, (0x8086, 0x0b31), (ANY, ANY), &["libxfpga.so"]);
        add(&mut entries, (0x8086, 0xbcce), (intel, Some(0x138d)), &["libxfpga.so", "libopae-v.so", "libopae-u.so"]);
        add(&mut entries, (0x8086, 0xbccf), (intel, Some(0x138d)), &["libopae-v.so", "libopae-u.so"]);
        add(&mut entries, (0x8086, 0xaf00), (intel, Some(0x0000)), &["libxfpga.so", "libopae-v.so", "libopae-u.so"]);
        add(&mut entries, (0x8086, 0xaf01), (intel, Some(0x0000)), &["libopae-v.so", "libopae-u.so"]);
        add(&mut entries, (0x8086, 0xbcce), (intel, Some(0x0000)), &["libxfpga.so", "libopae-v.so", "libopae-u.so"]);
        add(&mut entries, (0x8086, 0xbccf), (intel, Some(0x0000)), &["libopae-v.so", "libopae-u.so"]);
        add(&mut entries, (0x8086, 0xbcce), (intel, Some(0x0001)), &["libxfpga.so", "libopae-v.so", "libopae-u.so"]);
        add(&mut entries, (0x8086, 0xbccf), (intel, Some(0x0001)), &["libopae-v.so", "libopae-u.so"]);
        add(&mut entries, (0x8086, 0xbcce), (intel, Some(0x1770)), &["libxfpga.so", "libopae-v.so", "libopae-u.so"]); // N6000
        add(&mut entries, (0x8086, 0xbccf), (intel, Some(0x1770)), &["libopae-v.so", "libopae-u.so"]);
        add(&mut entries, (0x8086, 0xbcce), (intel, Some(0x1771)), &["libxfpga.so", "libopae-v.so", "libopae-u.so"]); // N6001
        add(&mut entries, (0x8086, 0xbccf), (intel, Some(0x1771)), &["libopae-v.so", "libopae-u.so"]);
        add(&mut entries, (0x8086, 0xbcce), (intel, Some(0x17d4)), &["libxfpga.so", "libopae-v.so", "libopae-u.so"]); // C6100
        add(&mut entries, (0x8086, 0xbccf), (intel, Some(0x17d4)), &["libopae-v.so", "libopae-u.so"]);
        add(&mut entries, (SIM_VENDOR_ID, SIM_DEVICE_ID), (Some(SIM_VENDOR_ID), Some(SIM_DEVICE_ID)), &[SIM_PLUGIN_LIBRARY]);

        Self { entries }
    }

    pub fn entries(&self) -> &[PlatformEntry] {
        &self.entries
    }

    /// Flag every entry matching `dev`. Returns how many matched.
    pub fn detect(&mut self, dev: &PciDevice) -> usize {
        let mut hits = 0;
        for entry in self.entries.iter_mut().filter(|e| e.matches(dev)) {
            if !entry.detected {
                debug!(
                    "platform {:04x}:{:04x} {:04x}:{:04x} -> {}",
                    dev.vendor_id, dev.device_id, dev.subsystem_vendor_id, dev.subsystem_device_id, entry.library
                );
            }
            entry.detected = true;
            hits += 1;
        }
        hits
    }

    /// Detected libraries not yet loaded, in table order, each once
    pub fn pending(&self) -> Vec<DetectedBackend> {
        let mut out: Vec<DetectedBackend> = Vec::new();
        for entry in self.entries.iter().filter(|e| e.detected && !e.loaded) {
            if self.is_loaded(&entry.library) || out.iter().any(|b| b.library == entry.library) {
                continue;
            }
            out.push(DetectedBackend {
                library: entry.library.clone(),
                configuration: entry.configuration.clone(),
            });
        }
        out
    }

    pub fn detected_count(&self) -> usize {
        self.entries.iter().filter(|e| e.detected).count()
    }

    pub fn mark_loaded(&mut self, library: &str) {
        for entry in self.entries.iter_mut().filter(|e| e.library == library) {
            entry.loaded = true;
        }
    }

    pub fn is_loaded(&self, library: &str) -> bool {
        self.entries.iter().any(|e| e.library == library && e.loaded)
    }

    pub fn reset_flags(&mut self) {
        for entry in &mut self.entries {
            entry.detected = false;
            entry.loaded = false;
        }
    }
}

/// Source of PCI identities for autodetection
pub trait DeviceScanner: Send + Sync {
    fn scan(&self) -> std::io::Result<Vec<PciDevice>>;
}

/// Reads identities from sysfs
#[derive(Debug, Clone)]
pub struct SysfsScanner {
    root: PathBuf,
}

impl Default for SysfsScanner {
    fn default() -> Self {
        Self::new(SYSFS_PCI_DEVICES)
    }
}

impl SysfsScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_id(dir: &Path, name: &str) -> std::io::Result<u16> {
        let text = fs::read_to_string(dir.join(name))?;
        let trimmed = text.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        u16::from_str_radix(digits, 16).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{}: {}", dir.join(name).display(), e),
            )
        })
    }
}

impl DeviceScanner for SysfsScanner {
    fn scan(&self) -> std::io::Result<Vec<PciDevice>> {
        let mut devices = Vec::new();
        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.root)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        dirs.sort();

        for dir in dirs {
            let dev = PciDevice {
                vendor_id: Self::read_id(&dir, "vendor")?,
                device_id: Self::read_id(&dir, "device")?,
                subsystem_vendor_id: Self::read_id(&dir, "subsystem_vendor")?,
                subsystem_device_id: Self::read_id(&dir, "subsystem_device")?,
            };
            devices.push(dev);
        }
        if devices.is_empty() {
            warn!("no PCI devices under {}", self.root.display());
        }
        Ok(devices)
    }
}

/// Reports only the simulation identity
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedScanner;

impl DeviceScanner for SimulatedScanner {
    fn scan(&self) -> std::io::Result<Vec<PciDevice>> {
        Ok(vec![PciDevice {
            vendor_id: SIM_VENDOR_ID,
            device_id: SIM_DEVICE_ID,
            subsystem_vendor_id: SIM_VENDOR_ID,
            subsystem_device_id: SIM_DEVICE_ID,
        }])
    }
}

/// A fixed list of identities
#[derive(Debug, Clone, Default)]
pub struct StaticScanner(pub Vec<PciDevice>);

impl DeviceScanner for StaticScanner {
    fn scan(&self) -> std::io::Result<Vec<PciDevice>> {
        Ok(self.0.clone())
    }
}
