// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Raw PCI device records, the decoder's only input.

use std::fmt;
use std::str::FromStr;

use crate::SysfsError;

/// PCI address of a single function: domain, bus, device, function.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SysfsId {
    pub domain: u16,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl SysfsId {
    #[must_use]
    pub fn new(domain: u16, bus: u8, device: u8, function: u8) -> SysfsId {
        SysfsId {
            domain,
            bus,
            device,
            function,
        }
    }

    /// Whether two ids agree on domain and bus.
    #[must_use]
    pub fn same_bus(&self, other: &SysfsId) -> bool {
        self.domain == other.domain && self.bus == other.bus
    }

    /// Whether two ids agree on domain, bus and device, ignoring function.
    #[must_use]
    pub fn same_device(&self, other: &SysfsId) -> bool {
        self.same_bus(other) && self.device == other.device
    }
}

impl fmt::Display for SysfsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

impl FromStr for SysfsId {
    type Err = SysfsError;

    /// Parses the canonical `dddd:bb:dd.f` form used by sysfs entry names.
    fn from_str(s: &str) -> Result<SysfsId, SysfsError> {
        let malformed = || SysfsError::MalformedAddress {
            value: s.to_string(),
        };
        let (rest, function) = s.rsplit_once('.').ok_or_else(malformed)?;
        let mut parts = rest.split(':');
        let domain = parts.next().ok_or_else(malformed)?;
        let bus = parts.next().ok_or_else(malformed)?;
        let device = parts.next().ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(SysfsId {
            domain: u16::from_str_radix(domain, 16).map_err(|_| malformed())?,
            bus: u8::from_str_radix(bus, 16).map_err(|_| malformed())?,
            device: u8::from_str_radix(device, 16).map_err(|_| malformed())?,
            function: u8::from_str_radix(function, 16).map_err(|_| malformed())?,
        })
    }
}

/// A block device exposed by a PCI function.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawDrive {
    /// Kernel block device name, such as `nvme0n1`.
    pub name: String,
    pub size_bytes: u64,
}

/// One PCI function as read from sysfs: identity, hierarchical path, a
/// configuration-space snapshot and attached block devices.
///
/// `path` is the device-tree chain below the root complex with a leading
/// slash, one PCI address per hop (`/0000:00:11.0/0000:01:00.0`). Records
/// are immutable once read; the decoder never mutates them.
#[derive(Clone, Debug, Default)]
pub struct RawPciDevice {
    pub id: SysfsId,
    pub path: String,
    /// Configuration-space snapshot; 256 bytes or 4096 with extended space.
    pub config: Vec<u8>,
    pub is_virtual: bool,
    pub drives: Vec<RawDrive>,
}

impl RawPciDevice {
    /// The path of this record's parent directory, with the trailing PCI
    /// address removed. Empty when the record sits at the root.
    #[must_use]
    pub fn parent_path(&self) -> &str {
        self.path.rfind('/').map_or("", |idx| &self.path[..idx])
    }
}

/// Produces the current raw record list. The live implementation reads
/// sysfs; tests substitute a canned list.
pub trait RawDeviceSource: Send + Sync {
    /// Returns every visible PCI function, optionally restricted to paths
    /// containing `path_filter`. Returns an empty list on I/O failure.
    fn raw_devices(&self, path_filter: Option<&str>) -> Vec<RawPciDevice>;
}
