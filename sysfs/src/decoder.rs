// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Classification of raw PCI records into the switch topology forest.
//!
//! A managed switch appears in sysfs as two functions of one device: a
//! memory controller endpoint carrying the register file resource, and a
//! PCI-to-PCI bridge in the same slot leading to the downstream buses. The
//! decoder recognizes that pair, then hangs bridges, devices, functions and
//! drives off it by structural predicates only (bus numbers and path
//! containment). Every call re-derives the forest from the record list.

use std::collections::BTreeSet;

use tracing::warn;

use crate::SysfsError;
use crate::config_space as cfg;
use crate::raw::{RawPciDevice, SysfsId};

/// Known switch (vendor, device) id pairs.
const KNOWN_SWITCHES: [(u16, u16); 2] = [(0x11f8, 0x8546), (0x11f8, 0x8536)];

const CLASS_MEMORY: u8 = 0x05;
const CLASS_BRIDGE: u8 = 0x06;
const SUBCLASS_MEMORY: u8 = 0x80;
const SUBCLASS_PCI_BRIDGE: u8 = 0x04;

/// The register file exposed under the memory controller's sysfs entry.
const RESOURCE_PATH: &str = "/resource0";

/// Device data read from the primary function's capability lists.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PcieCapabilityData {
    pub link_capability: u32,
    pub link_status: u16,
}

/// A managed switch: the memory controller function plus its companion
/// upstream bridge.
#[derive(Clone, Debug, Default)]
pub struct SysfsSwitch {
    pub vendor_id: u16,
    pub device_id: u16,
    pub revision_id: u8,
    /// Path to the switch's register file (`.../resource0`).
    pub memory_resource: String,
    pub memory_id: SysfsId,
    pub bridge_id: SysfsId,
    pub bridge_path: String,
    /// Secondary bus number of the upstream bridge.
    pub sec_bus_num: u8,
    pub serial_number: Option<u64>,
}

/// A downstream bridge of a switch.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SysfsBridge {
    pub id: SysfsId,
    pub path: String,
    pub sec_bus_num: u8,
}

/// A physical device behind a bridge, deduplicated over its functions.
#[derive(Clone, Debug, Default)]
pub struct SysfsDevice {
    pub id: SysfsId,
    pub vendor_id: u16,
    pub device_id: u16,
    pub is_multi_function: bool,
    pub bridge_path: String,
    /// Present when the primary function carries a PCI Express capability.
    pub pcie_capability: Option<PcieCapabilityData>,
    pub serial_number: Option<u64>,
}

/// One function of a device.
#[derive(Clone, Debug, Default)]
pub struct SysfsFunction {
    pub id: SysfsId,
    pub path: String,
    pub is_virtual: bool,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_prog_if: u8,
    pub pci_vendor_id: u16,
    pub pci_device_id: u16,
    pub pci_revision_id: u8,
    pub pci_subsystem_vendor_id: Option<u16>,
    pub pci_subsystem_id: Option<u16>,
    pub drives: Vec<SysfsDrive>,
}

/// A block device attached under a function.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SysfsDrive {
    pub name: String,
    pub size_bytes: u64,
}

fn is_switch_memory_controller(dev: &RawPciDevice) -> bool {
    let Some(vendor) = cfg::vendor_id(&dev.config) else {
        return false;
    };
    let Some(device) = cfg::device_id(&dev.config) else {
        return false;
    };
    KNOWN_SWITCHES.contains(&(vendor, device))
        && cfg::class_code(&dev.config) == Some(CLASS_MEMORY)
        && cfg::subclass(&dev.config) == Some(SUBCLASS_MEMORY)
}

/// A companion bridge shares the memory controller's slot (same domain,
/// bus, device; the function differs) and parent directory.
fn is_bridge_for_memory_controller(memory: &RawPciDevice, dev: &RawPciDevice) -> bool {
    cfg::class_code(&dev.config) == Some(CLASS_BRIDGE)
        && cfg::subclass(&dev.config) == Some(SUBCLASS_PCI_BRIDGE)
        && memory.id.same_device(&dev.id)
        && cfg::header_type(&dev.config) == Some(cfg::HEADER_TYPE_1)
        && memory.parent_path() == dev.parent_path()
}

fn is_downstream_bridge(domain: u16, sec_bus: u8, upstream_path: &str, dev: &RawPciDevice) -> bool {
    dev.id.domain == domain
        && dev.id.bus == sec_bus
        && cfg::header_type(&dev.config) == Some(cfg::HEADER_TYPE_1)
        && cfg::class_code(&dev.config) == Some(CLASS_BRIDGE)
        && cfg::subclass(&dev.config) == Some(SUBCLASS_PCI_BRIDGE)
        && dev.path.starts_with(&format!("{upstream_path}/"))
}

fn is_device_for_bridge(bridge: &SysfsBridge, dev: &RawPciDevice) -> bool {
    dev.id.domain == bridge.id.domain
        && dev.id.bus == bridge.sec_bus_num
        && dev.path.starts_with(bridge.path.as_str())
}

fn is_function_for_device(device: &SysfsDevice, dev: &RawPciDevice) -> bool {
    device.id.same_device(&dev.id) && dev.path.starts_with(device.bridge_path.as_str())
}

fn make_switch(memory: &RawPciDevice, bridge: &RawPciDevice) -> SysfsSwitch {
    let serial_number = cfg::serial_number(&bridge.config);
    if serial_number.is_none() {
        warn!(bridge = %bridge.id, "switch configuration space carries no serial number");
    }
    SysfsSwitch {
        vendor_id: cfg::vendor_id(&memory.config).unwrap_or_default(),
        device_id: cfg::device_id(&memory.config).unwrap_or_default(),
        revision_id: cfg::revision_id(&bridge.config).unwrap_or_default(),
        memory_resource: format!("{}{RESOURCE_PATH}", memory.path),
        memory_id: memory.id,
        bridge_id: bridge.id,
        bridge_path: bridge.path.clone(),
        sec_bus_num: cfg::secondary_bus(&bridge.config).unwrap_or_default(),
        serial_number,
    }
}

fn make_device(raw: &RawPciDevice, bridge_path: &str) -> SysfsDevice {
    let mut device = SysfsDevice {
        id: raw.id,
        vendor_id: cfg::vendor_id(&raw.config).unwrap_or_default(),
        device_id: cfg::device_id(&raw.config).unwrap_or_default(),
        is_multi_function: cfg::is_multi_function(&raw.config),
        bridge_path: bridge_path.to_string(),
        pcie_capability: None,
        serial_number: None,
    };
    // Capability data lives on the primary function only.
    if raw.id.function == 0 {
        device.pcie_capability =
            cfg::pcie_link_registers(&raw.config).map(|(link_capability, link_status)| {
                PcieCapabilityData {
                    link_capability,
                    link_status,
                }
            });
        if device.pcie_capability.is_some() {
            device.serial_number = cfg::serial_number(&raw.config);
        }
    }
    device
}

fn make_function(raw: &RawPciDevice) -> SysfsFunction {
    let subsystem = cfg::subsystem_ids(&raw.config);
    SysfsFunction {
        id: raw.id,
        path: raw.path.clone(),
        is_virtual: raw.is_virtual,
        device_class: cfg::class_code(&raw.config).unwrap_or_default(),
        device_subclass: cfg::subclass(&raw.config).unwrap_or_default(),
        device_prog_if: cfg::prog_if(&raw.config).unwrap_or_default(),
        pci_vendor_id: cfg::vendor_id(&raw.config).unwrap_or_default(),
        pci_device_id: cfg::device_id(&raw.config).unwrap_or_default(),
        pci_revision_id: cfg::revision_id(&raw.config).unwrap_or_default(),
        pci_subsystem_vendor_id: subsystem.map(|(vendor, _)| vendor),
        pci_subsystem_id: subsystem.map(|(_, id)| id),
        drives: raw
            .drives
            .iter()
            .map(|d| SysfsDrive {
                name: d.name.clone(),
                size_bytes: d.size_bytes,
            })
            .collect(),
    }
}

/// Pure decoder over a raw record list.
///
/// Holds nothing but the records it was given; all lookups below a switch
/// re-filter the same list.
#[derive(Clone, Debug, Default)]
pub struct SysfsDecoder {
    raw: Vec<RawPciDevice>,
}

impl SysfsDecoder {
    #[must_use]
    pub fn new(raw: Vec<RawPciDevice>) -> SysfsDecoder {
        SysfsDecoder { raw }
    }

    /// All managed switches visible in the record list. A switch is
    /// reported once per companion bridge found for its memory controller.
    #[must_use]
    pub fn switches(&self) -> Vec<SysfsSwitch> {
        let mut switches = Vec::new();
        for memory in &self.raw {
            if !is_switch_memory_controller(memory) {
                continue;
            }
            for bridge in &self.raw {
                if is_bridge_for_memory_controller(memory, bridge) {
                    switches.push(make_switch(memory, bridge));
                }
            }
        }
        switches
    }

    /// Downstream bridges on a switch's secondary bus.
    #[must_use]
    pub fn bridges_for_switch(&self, sw: &SysfsSwitch) -> Vec<SysfsBridge> {
        self.downstream_bridges(sw.bridge_id.domain, sw.sec_bus_num, &sw.bridge_path)
    }

    fn downstream_bridges(&self, domain: u16, sec_bus: u8, upstream_path: &str) -> Vec<SysfsBridge> {
        self.raw
            .iter()
            .filter(|dev| is_downstream_bridge(domain, sec_bus, upstream_path, dev))
            .map(|dev| SysfsBridge {
                id: dev.id,
                path: dev.path.clone(),
                sec_bus_num: cfg::secondary_bus(&dev.config).unwrap_or_default(),
            })
            .collect()
    }

    /// Devices behind a bridge, one entry per device number regardless of
    /// how many functions the device exposes.
    #[must_use]
    pub fn devices_for_bridge(&self, bridge: &SysfsBridge) -> Vec<SysfsDevice> {
        let mut seen = BTreeSet::new();
        let mut devices = Vec::new();
        for dev in &self.raw {
            if is_device_for_bridge(bridge, dev) && seen.insert(dev.id.device) {
                devices.push(make_device(dev, &bridge.path));
            }
        }
        devices
    }

    /// Functions of a device. A single-function device reports exactly one
    /// entry even if stale sibling records linger in the list.
    #[must_use]
    pub fn functions_for_device(&self, device: &SysfsDevice) -> Vec<SysfsFunction> {
        let mut functions = Vec::new();
        for raw in &self.raw {
            if is_function_for_device(device, raw) {
                functions.push(make_function(raw));
                if !cfg::is_multi_function(&raw.config) {
                    break;
                }
            }
        }
        functions
    }

    /// Finds a downstream bridge by the switch's bridge path and the
    /// bridge's device number.
    pub fn bridge_by_switch_path(
        &self,
        bridge_path: &str,
        bridge_id: u8,
    ) -> Result<SysfsBridge, SysfsError> {
        let upstream = self
            .raw
            .iter()
            .find(|dev| dev.path == bridge_path)
            .ok_or_else(|| SysfsError::BridgeNotFound {
                what: format!("path {bridge_path}"),
            })?;
        let sec_bus = cfg::secondary_bus(&upstream.config).unwrap_or_default();
        self.downstream_bridges(upstream.id.domain, sec_bus, &upstream.path)
            .into_iter()
            .find(|bridge| bridge.id.device == bridge_id)
            .ok_or_else(|| SysfsError::BridgeNotFound {
                what: format!("device number {bridge_id} under {bridge_path}"),
            })
    }
}
