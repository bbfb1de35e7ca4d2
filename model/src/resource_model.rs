// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! The aggregate owning every entity store and relation table.

use uuid::Uuid;

use crate::entities::{
    Chassis, Drive, Endpoint, Fabric, Manager, PcieDevice, PcieFunction, Port, Processor,
    StorageSubsystem, Switch, Zone,
};
use crate::events::ComponentKind;
use crate::relations::RelationTable;
use crate::store::Store;

/// Every store and relation table of the fabric model, shared between the
/// discovery orchestrator, the port monitor, and request handlers.
pub struct ResourceModel {
    pub managers: Store<Manager>,
    pub chassis: Store<Chassis>,
    pub fabrics: Store<Fabric>,
    pub switches: Store<Switch>,
    pub ports: Store<Port>,
    pub zones: Store<Zone>,
    pub endpoints: Store<Endpoint>,
    pub devices: Store<PcieDevice>,
    pub functions: Store<PcieFunction>,
    pub drives: Store<Drive>,
    pub processors: Store<Processor>,
    pub storage_subsystems: Store<StorageSubsystem>,

    /// Zone -> endpoints bound into it.
    pub zone_endpoints: RelationTable,
    /// Endpoint -> ports it is reachable through.
    pub endpoint_ports: RelationTable,
    /// Drive -> PCIe functions backing it.
    pub drive_functions: RelationTable,
    /// Storage subsystem -> drives it aggregates.
    pub subsystem_drives: RelationTable,
    /// Processor -> PCIe functions backing it.
    pub processor_functions: RelationTable,
}

impl ResourceModel {
    #[must_use]
    pub fn new() -> ResourceModel {
        ResourceModel {
            managers: Store::new(ComponentKind::Manager),
            chassis: Store::new(ComponentKind::Chassis),
            fabrics: Store::new(ComponentKind::Fabric),
            switches: Store::new(ComponentKind::Switch),
            ports: Store::new(ComponentKind::Port),
            zones: Store::new(ComponentKind::Zone),
            endpoints: Store::new(ComponentKind::Endpoint),
            devices: Store::new(ComponentKind::PcieDevice),
            functions: Store::new(ComponentKind::PcieFunction),
            drives: Store::new(ComponentKind::Drive),
            processors: Store::new(ComponentKind::Processor),
            storage_subsystems: Store::new(ComponentKind::StorageSubsystem),
            zone_endpoints: RelationTable::new(),
            endpoint_ports: RelationTable::new(),
            drive_functions: RelationTable::new(),
            subsystem_drives: RelationTable::new(),
            processor_functions: RelationTable::new(),
        }
    }

    /// The port of `switch` with the given physical id, if modeled.
    #[must_use]
    pub fn port_by_phys_id(&self, switch: Uuid, phys_port_id: u8) -> Option<Port> {
        self.ports
            .find(|p| p.parent == Some(switch) && p.phys_port_id == phys_port_id)
    }

    /// The zone with the given partition id, if modeled.
    #[must_use]
    pub fn zone_by_id(&self, zone_id: u8) -> Option<Zone> {
        self.zones.find(|z| z.zone_id == zone_id)
    }

    /// The endpoint exposing `device`, if any.
    #[must_use]
    pub fn endpoint_for_device(&self, device: Uuid) -> Option<Endpoint> {
        self.endpoints.find(|e| e.connected_device == Some(device))
    }

    /// The drive with the given serial number, if modeled.
    #[must_use]
    pub fn drive_by_serial(&self, serial: &str) -> Option<Drive> {
        self.drives
            .find(|d| d.serial_number.as_deref() == Some(serial))
    }

    /// Drops every relation mentioning `uuid` from every table.
    pub fn unlink_everywhere(&self, uuid: Uuid) {
        self.zone_endpoints.remove_all_for(uuid);
        self.endpoint_ports.remove_all_for(uuid);
        self.drive_functions.remove_all_for(uuid);
        self.subsystem_drives.remove_all_for(uuid);
        self.processor_functions.remove_all_for(uuid);
    }
}

impl Default for ResourceModel {
    fn default() -> ResourceModel {
        ResourceModel::new()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::status::Status;

    #[test]
    fn lookups_cross_stores_and_relations() {
        let model = ResourceModel::new();
        let switch = Uuid::new_v4();
        let port = Port {
            uuid: Uuid::new_v4(),
            parent: Some(switch),
            phys_port_id: 4,
            status: Status::enabled(),
            ..Port::default()
        };
        model.ports.add(port.clone());

        assert_eq!(
            model.port_by_phys_id(switch, 4).unwrap().uuid,
            port.uuid
        );
        assert!(model.port_by_phys_id(switch, 5).is_none());
        assert!(model.port_by_phys_id(Uuid::new_v4(), 4).is_none());

        let endpoint = Uuid::new_v4();
        let zone = Uuid::new_v4();
        model.zone_endpoints.add(zone, endpoint);
        model.endpoint_ports.add(endpoint, port.uuid);
        model.unlink_everywhere(endpoint);
        assert!(model.zone_endpoints.children_of(zone).is_empty());
        assert!(model.endpoint_ports.children_of(endpoint).is_empty());
    }
}
