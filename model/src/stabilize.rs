// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Deterministic UUID derivation from stable hardware attributes.
//!
//! Freshly discovered entities start with random UUIDs; once their stable
//! attributes (serial number, port id, zone id) are known they are
//! stabilized: the final UUID is a v5 hash of a per-kind tag plus those
//! attributes, so a device rediscovered after a restart or hot-plug cycle
//! resolves to the identity it had before.

use uuid::Uuid;

use crate::{ComponentKind, ModelError};

const TAG_MANAGER: &str = "_PCIeModule_";
const TAG_CHASSIS: &str = "_PCIeChassis_";
const TAG_FABRIC: &str = "_PCIeFabric_";
const TAG_SWITCH: &str = "_PCIeSwitch_";
const TAG_PORT: &str = "_PCIePort_";
const TAG_ZONE: &str = "_PCIeZone_";
const TAG_ENDPOINT: &str = "_PCIeEndpoint_";
const TAG_DEVICE: &str = "_PCIeDevice_";
const TAG_FUNCTION: &str = "_PCIeFunction_";
const TAG_DRIVE: &str = "_PCIeDrive_";
const TAG_PROCESSOR: &str = "_PCIeProcessor_";
const TAG_STORAGE_SUBSYSTEM: &str = "_PCIeStorage_";

fn stable_uuid(tag: &str, key: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{tag}{key}").as_bytes())
}

fn require<'a>(
    value: Option<&'a str>,
    kind: ComponentKind,
    what: &'static str,
) -> Result<&'a str, ModelError> {
    value.ok_or(ModelError::KeyValueMissing { kind, what })
}

pub fn manager_uuid(switch_serial: Option<&str>) -> Result<Uuid, ModelError> {
    let serial = require(switch_serial, ComponentKind::Manager, "switch serial number")?;
    Ok(stable_uuid(TAG_MANAGER, serial))
}

pub fn chassis_uuid(switch_serial: Option<&str>) -> Result<Uuid, ModelError> {
    let serial = require(switch_serial, ComponentKind::Chassis, "switch serial number")?;
    Ok(stable_uuid(TAG_CHASSIS, serial))
}

/// There is one fabric per agent; its key is the tag alone.
#[must_use]
pub fn fabric_uuid() -> Uuid {
    stable_uuid(TAG_FABRIC, "")
}

pub fn switch_uuid(serial: Option<&str>) -> Result<Uuid, ModelError> {
    let serial = require(serial, ComponentKind::Switch, "serial number")?;
    Ok(stable_uuid(TAG_SWITCH, serial))
}

#[must_use]
pub fn port_uuid(phys_port_id: u8) -> Uuid {
    stable_uuid(TAG_PORT, &phys_port_id.to_string())
}

#[must_use]
pub fn zone_uuid(zone_id: u8) -> Uuid {
    stable_uuid(TAG_ZONE, &zone_id.to_string())
}

/// A device stabilizes on its serial number when it has one; otherwise the
/// caller passes a synthetic key built from the physical port id.
pub fn device_uuid(unique_key: Option<&str>) -> Result<Uuid, ModelError> {
    let key = require(unique_key, ComponentKind::PcieDevice, "unique key")?;
    Ok(stable_uuid(TAG_DEVICE, key))
}

pub fn function_uuid(device_key: Option<&str>, function_id: u8) -> Result<Uuid, ModelError> {
    let key = require(device_key, ComponentKind::PcieFunction, "device unique key")?;
    Ok(stable_uuid(TAG_FUNCTION, &format!("{key}{function_id}")))
}

pub fn drive_uuid(serial: Option<&str>) -> Result<Uuid, ModelError> {
    let serial = require(serial, ComponentKind::Drive, "serial number")?;
    Ok(stable_uuid(TAG_DRIVE, serial))
}

/// A processor stabilizes on the same unique key as its PCIe device.
pub fn processor_uuid(device_key: Option<&str>) -> Result<Uuid, ModelError> {
    let key = require(device_key, ComponentKind::Processor, "device unique key")?;
    Ok(stable_uuid(TAG_PROCESSOR, key))
}

pub fn storage_subsystem_uuid(switch_serial: Option<&str>) -> Result<Uuid, ModelError> {
    let serial = require(
        switch_serial,
        ComponentKind::StorageSubsystem,
        "switch serial number",
    )?;
    Ok(stable_uuid(TAG_STORAGE_SUBSYSTEM, serial))
}

/// Synthetic device key for hardware that exposes no serial number.
#[must_use]
pub fn synthetic_device_key(phys_port_id: u8) -> String {
    format!("port{phys_port_id}")
}

/// An endpoint stabilizes on the device it exposes plus the ports it is
/// reachable through, order-independent.
pub fn endpoint_uuid(device: Option<Uuid>, ports: &[u8]) -> Result<Uuid, ModelError> {
    if device.is_none() && ports.is_empty() {
        return Err(ModelError::KeyValueMissing {
            kind: ComponentKind::Endpoint,
            what: "connected device and ports",
        });
    }
    let mut sorted = ports.to_vec();
    sorted.sort_unstable();
    let mut key = device.map(|uuid| uuid.to_string()).unwrap_or_default();
    for port in sorted {
        key.push_str(&port.to_string());
        key.push(':');
    }
    Ok(stable_uuid(TAG_ENDPOINT, &key))
}
