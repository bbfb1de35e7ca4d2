// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Domain entities held by the resource model.
//!
//! Entities reference each other by UUID only; many-to-many links live in
//! the relation tables, never embedded by value.

use uuid::Uuid;

use crate::status::Status;
use crate::store::Entity;

macro_rules! impl_entity {
    ($ty:ty) => {
        impl Entity for $ty {
            fn uuid(&self) -> Uuid {
                self.uuid
            }
            fn parent(&self) -> Option<Uuid> {
                self.parent
            }
        }
    };
}

/// The management agent itself.
#[derive(Clone, Debug, Default)]
pub struct Manager {
    pub uuid: Uuid,
    pub parent: Option<Uuid>,
    pub status: Status,
}
impl_entity!(Manager);

/// The physical enclosure hosting the switch and its drives.
#[derive(Clone, Debug, Default)]
pub struct Chassis {
    pub uuid: Uuid,
    pub parent: Option<Uuid>,
    pub status: Status,
}
impl_entity!(Chassis);

/// The PCIe fabric, the root of zones and endpoints.
#[derive(Clone, Debug, Default)]
pub struct Fabric {
    pub uuid: Uuid,
    pub parent: Option<Uuid>,
    pub status: Status,
}
impl_entity!(Fabric);

/// One physical PCIe switch.
#[derive(Clone, Debug, Default)]
pub struct Switch {
    pub uuid: Uuid,
    /// Parent fabric.
    pub parent: Option<Uuid>,
    pub chassis: Option<Uuid>,
    pub serial_number: Option<String>,
    /// Path to the switch's memory-mapped register file.
    pub memory_path: String,
    /// Sysfs path of the switch's upstream bridge.
    pub bridge_path: String,
    pub sec_bus_num: u8,
    pub status: Status,
}
impl_entity!(Switch);

/// Direction of a switch port.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, strum::Display, strum::EnumIs)]
pub enum PortType {
    #[default]
    Downstream,
    Upstream,
    /// Internal management endpoint port.
    Management,
    Unsupported,
}

/// One physical port of a switch.
#[derive(Clone, Debug, Default)]
pub struct Port {
    pub uuid: Uuid,
    /// Parent switch.
    pub parent: Option<Uuid>,
    pub phys_port_id: u8,
    pub port_type: PortType,
    /// TWI channel for the port's presence/SMART side band.
    pub twi_port: u8,
    /// Trained link width, when known.
    pub width: Option<u32>,
    /// Trained link speed in GT/s, when known.
    pub speed_gts: Option<f64>,
    pub status: Status,
}
impl_entity!(Port);

/// A switch partition exposed as a zone of endpoints.
#[derive(Clone, Debug, Default)]
pub struct Zone {
    pub uuid: Uuid,
    /// Parent fabric.
    pub parent: Option<Uuid>,
    pub zone_id: u8,
    pub status: Status,
}
impl_entity!(Zone);

/// A connectable entity on the fabric: a device (target) or a host
/// (initiator).
#[derive(Clone, Debug, Default)]
pub struct Endpoint {
    pub uuid: Uuid,
    /// Parent fabric.
    pub parent: Option<Uuid>,
    /// The PCIe device this endpoint exposes; `None` for host endpoints.
    pub connected_device: Option<Uuid>,
    pub status: Status,
}
impl_entity!(Endpoint);

/// A discovered PCIe device behind a downstream port.
#[derive(Clone, Debug, Default)]
pub struct PcieDevice {
    pub uuid: Uuid,
    /// Parent manager.
    pub parent: Option<Uuid>,
    pub chassis: Option<Uuid>,
    pub vendor_id: u16,
    pub device_id: u16,
    pub serial_number: Option<String>,
    pub status: Status,
}
impl_entity!(PcieDevice);

/// One configuration-space function of a PCIe device.
#[derive(Clone, Debug, Default)]
pub struct PcieFunction {
    pub uuid: Uuid,
    /// Parent PCIe device.
    pub parent: Option<Uuid>,
    pub function_id: u8,
    pub device_class: u8,
    pub is_virtual: bool,
    /// Downstream port the function was discovered behind.
    pub dsp_port: Option<Uuid>,
    pub status: Status,
}
impl_entity!(PcieFunction);

/// An NVMe drive attached behind a downstream port.
#[derive(Clone, Debug, Default)]
pub struct Drive {
    pub uuid: Uuid,
    /// Parent chassis.
    pub parent: Option<Uuid>,
    /// Downstream port the drive sits behind.
    pub dsp_port: Option<Uuid>,
    pub name: Option<String>,
    pub capacity_bytes: Option<u64>,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
    /// Percent drive life used, from the last SMART side-band read.
    pub last_smart_health: Option<u8>,
    /// Out-of-band operations in flight; protected drives are skipped by
    /// the monitor's status refresh.
    pub is_being_erased: bool,
    pub is_being_discovered: bool,
    pub is_in_warning_state: bool,
    pub is_in_critical_discovery_state: bool,
    pub status: Status,
}
impl_entity!(Drive);

impl Drive {
    /// Whether an out-of-band operation owns this drive right now.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.is_being_erased
            || self.is_being_discovered
            || self.is_in_warning_state
            || self.is_in_critical_discovery_state
    }
}

/// An accelerator or other processor-class device behind a port.
#[derive(Clone, Debug, Default)]
pub struct Processor {
    pub uuid: Uuid,
    /// Parent system.
    pub parent: Option<Uuid>,
    /// Downstream port the processor sits behind.
    pub dsp_port: Option<Uuid>,
    pub status: Status,
}
impl_entity!(Processor);

/// The storage subsystem aggregating the chassis' drives.
#[derive(Clone, Debug, Default)]
pub struct StorageSubsystem {
    pub uuid: Uuid,
    /// Parent system.
    pub parent: Option<Uuid>,
    pub status: Status,
}
impl_entity!(StorageSubsystem);
