// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Raw record collection from a sysfs PCI bus directory.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::raw::{RawDeviceSource, RawDrive, RawPciDevice, SysfsId};

/// Default PCI bus devices directory.
const PCI_BUS_DEVICES: &str = "/sys/bus/pci/devices";
/// Block device sizes are reported in 512-byte sectors.
const SECTOR_SIZE: u64 = 512;

/// Reads [`RawPciDevice`] records from a sysfs-style directory tree.
///
/// Every I/O failure is logged and degrades to an empty or partial result;
/// an unreadable bus directory is indistinguishable from an empty one by
/// design of the collaborating decoder, which treats missing records as
/// absent hardware.
#[derive(Clone, Debug)]
pub struct SysfsReader {
    bus_path: PathBuf,
}

impl Default for SysfsReader {
    fn default() -> Self {
        SysfsReader::new(PCI_BUS_DEVICES)
    }
}

impl SysfsReader {
    #[must_use]
    pub fn new(bus_path: impl Into<PathBuf>) -> SysfsReader {
        SysfsReader {
            bus_path: bus_path.into(),
        }
    }

    fn read_one(&self, name: &str) -> Option<RawPciDevice> {
        let id: SysfsId = name.parse().ok()?;
        let entry = self.bus_path.join(name);
        let config = match fs::read(entry.join("config")) {
            Ok(config) => config,
            Err(err) => {
                warn!(device = name, %err, "cannot read configuration space");
                return None;
            }
        };
        Some(RawPciDevice {
            id,
            path: device_tree_path(&entry, name),
            config,
            is_virtual: entry.join("physfn").exists(),
            drives: read_drives(&entry),
        })
    }
}

impl RawDeviceSource for SysfsReader {
    fn raw_devices(&self, path_filter: Option<&str>) -> Vec<RawPciDevice> {
        let entries = match fs::read_dir(&self.bus_path) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %self.bus_path.display(), %err, "cannot read PCI bus directory");
                return Vec::new();
            }
        };
        let mut devices = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(device) = self.read_one(name) else {
                continue;
            };
            if path_filter.is_none_or(|filter| device.path.contains(filter)) {
                devices.push(device);
            }
        }
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        debug!(count = devices.len(), "raw PCI records read");
        devices
    }
}

/// Builds the hierarchical device path from the entry's canonical location,
/// one PCI address per hop below the root complex. Falls back to the bare
/// entry name when the location cannot be resolved.
fn device_tree_path(entry: &Path, name: &str) -> String {
    let Ok(real) = fs::canonicalize(entry) else {
        return format!("/{name}");
    };
    let mut hops = Vec::new();
    for component in real.components() {
        let text = component.as_os_str().to_string_lossy();
        if text.parse::<SysfsId>().is_ok() {
            hops.push(text.into_owned());
        }
    }
    if hops.is_empty() {
        return format!("/{name}");
    }
    format!("/{}", hops.join("/"))
}

/// Collects block devices under the entry's `block/` and `nvme/*/`
/// directories, with their sizes converted from sectors to bytes.
fn read_drives(entry: &Path) -> Vec<RawDrive> {
    let mut drives = Vec::new();
    collect_block_dir(&entry.join("block"), &mut drives);
    if let Ok(controllers) = fs::read_dir(entry.join("nvme")) {
        for controller in controllers.flatten() {
            collect_block_dir(&controller.path(), &mut drives);
        }
    }
    drives.sort_by(|a, b| a.name.cmp(&b.name));
    drives
}

fn collect_block_dir(dir: &Path, drives: &mut Vec<RawDrive>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let size_file = entry.path().join("size");
        let Ok(raw_size) = fs::read_to_string(&size_file) else {
            continue;
        };
        let Ok(sectors) = raw_size.trim().parse::<u64>() else {
            warn!(path = %size_file.display(), "unparsable block device size");
            continue;
        };
        drives.push(RawDrive {
            name: entry.file_name().to_string_lossy().into_owned(),
            size_bytes: sectors * SECTOR_SIZE,
        });
    }
}
