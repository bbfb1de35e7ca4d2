// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! The discovery orchestrator.
//!
//! [`DiscoveryManager::discover`] runs once at agent start: it locates the
//! managed switch in the PCI topology, models the fabric skeleton (manager,
//! chassis, fabric, switch, zones, ports, host endpoints) and stabilizes
//! every UUID so a restart converges on the same identities. The per-port
//! paths (out-of-band discovery, in-band discovery, removal, status
//! refresh) are driven afterwards by the port monitor as devices come and
//! go.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use gas::mrpc::LinkStatusRetrieve;
use gas::mrpc::binding_info::BindingEntry;
use gas::mrpc::p2p_result;
use gas::{Gas, GasError, PHY_PORTS_NUMBER, TopSettings};
use model::{
    Chassis, ChangeKind, ComponentKind, Drive, Endpoint, Event, EventSink, Fabric, Health,
    Manager, PcieDevice, PcieFunction, Port, PortType, Processor, ResourceModel, State, Status,
    StorageSubsystem, Switch, Zone, stabilize,
};
use sysfs::{RawDeviceSource, SysfsDecoder, SysfsDevice, SysfsDrive, SysfsFunction, config_space};

use crate::binding::BindingPoll;
use crate::kinds::DeviceKind;
use crate::{DiscoveryError, binding, oob};

/// Logical bridge 0 always carries the partition's upstream port.
const USP_BRIDGE_ID: u8 = 0;

/// Bytes of a function's configuration space snapshotted from the CSR
/// group; the standard header and capability list fit in the first 256.
const CSR_SNAPSHOT_LEN: usize = 256;

/// Orchestrates fabric and per-port device discovery against one switch.
pub struct DiscoveryManager {
    gas: Arc<Gas>,
    source: Arc<dyn RawDeviceSource>,
    model: Arc<ResourceModel>,
    sink: Arc<dyn EventSink>,
    poll: BindingPoll,
}

impl DiscoveryManager {
    pub fn new(
        gas: Arc<Gas>,
        source: Arc<dyn RawDeviceSource>,
        model: Arc<ResourceModel>,
        sink: Arc<dyn EventSink>,
    ) -> DiscoveryManager {
        DiscoveryManager {
            gas,
            source,
            model,
            sink,
            poll: BindingPoll::default(),
        }
    }

    /// Overrides the post-bind/unbind poll pacing.
    #[must_use]
    pub fn with_binding_poll(mut self, poll: BindingPoll) -> DiscoveryManager {
        self.poll = poll;
        self
    }

    pub fn gas(&self) -> &Gas {
        &self.gas
    }

    pub fn model(&self) -> &ResourceModel {
        &self.model
    }

    /// Runs the one-time fabric sweep and returns the switch UUID.
    ///
    /// Per-port failures are logged and leave the port offline for the
    /// sweep; only a missing switch aborts.
    pub fn discover(&self) -> Result<Uuid, DiscoveryError> {
        let decoder = SysfsDecoder::new(self.source.raw_devices(None));
        let switch = decoder
            .switches()
            .into_iter()
            .next()
            .ok_or(DiscoveryError::SwitchNotFound)?;

        let serial = switch.serial_number.map(|s| format!("{s:016x}"));
        // A switch without a serial number still gets a stable identity,
        // tied to where it sits on the host bus.
        let stable_key = serial.clone().unwrap_or_else(|| switch.bridge_path.clone());
        let key = Some(stable_key.as_str());

        let manager_uuid = stabilize::manager_uuid(key)?;
        self.model.managers.add(Manager {
            uuid: manager_uuid,
            parent: None,
            status: Status::enabled(),
        });
        self.notify(manager_uuid, ComponentKind::Manager, ChangeKind::Add, None);

        let chassis_uuid = stabilize::chassis_uuid(key)?;
        self.model.chassis.add(Chassis {
            uuid: chassis_uuid,
            parent: Some(manager_uuid),
            status: Status::enabled(),
        });
        self.notify(
            chassis_uuid,
            ComponentKind::Chassis,
            ChangeKind::Add,
            Some(manager_uuid),
        );

        let subsystem_uuid = stabilize::storage_subsystem_uuid(key)?;
        self.model.storage_subsystems.add(StorageSubsystem {
            uuid: subsystem_uuid,
            parent: Some(manager_uuid),
            status: Status::enabled(),
        });
        self.notify(
            subsystem_uuid,
            ComponentKind::StorageSubsystem,
            ChangeKind::Add,
            Some(chassis_uuid),
        );

        let fabric_uuid = stabilize::fabric_uuid();
        self.model.fabrics.add(Fabric {
            uuid: fabric_uuid,
            parent: Some(manager_uuid),
            status: Status::enabled(),
        });
        self.notify(
            fabric_uuid,
            ComponentKind::Fabric,
            ChangeKind::Add,
            Some(manager_uuid),
        );

        let switch_uuid = stabilize::switch_uuid(key)?;
        self.model.switches.add(Switch {
            uuid: switch_uuid,
            parent: Some(fabric_uuid),
            chassis: Some(chassis_uuid),
            serial_number: serial.clone(),
            memory_path: switch.memory_resource.clone(),
            bridge_path: switch.bridge_path.clone(),
            sec_bus_num: switch.sec_bus_num,
            status: Status::enabled(),
        });
        self.notify(
            switch_uuid,
            ComponentKind::Switch,
            ChangeKind::Add,
            Some(fabric_uuid),
        );
        info!(
            switch = %switch_uuid,
            serial = serial.as_deref().unwrap_or("none"),
            bridge = %switch.bridge_path,
            "switch discovered"
        );

        let top = self.gas.read_top()?;
        self.discover_zones(fabric_uuid, &top);
        self.discover_ports(fabric_uuid, switch_uuid, &top)?;
        Ok(switch_uuid)
    }

    fn discover_zones(&self, fabric_uuid: Uuid, top: &TopSettings) {
        for partition_id in 0..top.part_num {
            // The management partition is not exposed as a zone.
            if partition_id == top.current_partition_id {
                continue;
            }
            let Ok(zone_id) = u8::try_from(partition_id) else {
                warn!(partition_id, "partition id out of range, skipping");
                continue;
            };
            match self.gas.read_partition(zone_id) {
                Ok(config) => {
                    trace!(zone_id, ports = config.ports_number, "partition configuration")
                }
                Err(error) => {
                    warn!(zone_id, %error, "partition registers unreadable, skipping zone");
                    continue;
                }
            }
            let zone_uuid = stabilize::zone_uuid(zone_id);
            self.model.zones.add(Zone {
                uuid: zone_uuid,
                parent: Some(fabric_uuid),
                zone_id,
                status: Status::enabled(),
            });
            self.notify(zone_uuid, ComponentKind::Zone, ChangeKind::Add, Some(fabric_uuid));
            debug!(zone_id, zone = %zone_uuid, "zone discovered");
        }
    }

    fn discover_ports(
        &self,
        fabric_uuid: Uuid,
        switch_uuid: Uuid,
        top: &TopSettings,
    ) -> Result<(), DiscoveryError> {
        let info = binding::all_port_binding_info(&self.gas)?;
        for entry in info.entries.iter().filter(|e| e.has_port()) {
            if let Err(error) = self.discover_port(fabric_uuid, switch_uuid, top, entry) {
                warn!(phy_port_id = entry.phy_port_id, %error, "port discovery failed");
            }
        }
        Ok(())
    }

    fn discover_port(
        &self,
        fabric_uuid: Uuid,
        switch_uuid: Uuid,
        top: &TopSettings,
        entry: &BindingEntry,
    ) -> Result<(), DiscoveryError> {
        let port_type = classify_port(entry, top.current_partition_id);
        let port_uuid = stabilize::port_uuid(entry.phy_port_id);
        self.model.ports.add(Port {
            uuid: port_uuid,
            parent: Some(switch_uuid),
            phys_port_id: entry.phy_port_id,
            port_type,
            twi_port: entry.phy_port_id / 2,
            width: None,
            speed_gts: None,
            status: Status::enabled(),
        });
        self.notify(port_uuid, ComponentKind::Port, ChangeKind::Add, Some(switch_uuid));
        debug!(phy_port_id = entry.phy_port_id, %port_type, "port discovered");

        self.update_port_status(port_uuid)?;
        if port_type.is_upstream() {
            self.add_host_endpoint(fabric_uuid, entry, port_uuid)?;
        }
        Ok(())
    }

    /// Host endpoints carry no connected device; they stabilize on the
    /// upstream port alone.
    fn add_host_endpoint(
        &self,
        fabric_uuid: Uuid,
        entry: &BindingEntry,
        port_uuid: Uuid,
    ) -> Result<(), DiscoveryError> {
        let endpoint_uuid = stabilize::endpoint_uuid(None, &[entry.phy_port_id])?;
        self.model.endpoints.add(Endpoint {
            uuid: endpoint_uuid,
            parent: Some(fabric_uuid),
            connected_device: None,
            status: Status::enabled(),
        });
        self.model.endpoint_ports.add(endpoint_uuid, port_uuid);
        self.notify(
            endpoint_uuid,
            ComponentKind::Endpoint,
            ChangeKind::Add,
            Some(fabric_uuid),
        );
        match self.model.zone_by_id(entry.partition_id) {
            Some(zone) => {
                self.model.zone_endpoints.add(zone.uuid, endpoint_uuid);
                self.notify(zone.uuid, ComponentKind::Zone, ChangeKind::Update, Some(fabric_uuid));
            }
            None => warn!(
                partition_id = entry.partition_id,
                "host endpoint bound to an unmodeled partition"
            ),
        }
        Ok(())
    }

    /// Refreshes a port's link width, speed and availability from the
    /// switch link training engine.
    pub fn update_port_status(&self, port_uuid: Uuid) -> Result<(), DiscoveryError> {
        let port = self.model.ports.get(port_uuid)?;
        let mut cmd = LinkStatusRetrieve::for_port(port.phys_port_id)?;
        self.gas.run(&mut cmd)?;
        if cmd.return_value != p2p_result::COMMAND_SUCCEED {
            return Err(DiscoveryError::LinkStatusRejected {
                code: cmd.return_value,
            });
        }
        let up = cmd.is_link_up();
        self.model.ports.update(port_uuid, |p| {
            if up {
                p.width = Some(u32::from(cmd.neg_link_width));
                p.speed_gts = Some(cmd.speed_gts());
                p.status = Status::enabled();
            } else {
                p.width = None;
                p.speed_gts = None;
                p.status = Status::new(State::UnavailableOffline, Health::Ok);
            }
        })?;
        if up && port.port_type.is_upstream() {
            if let Err(error) = self.refresh_upstream_csr(port_uuid, cmd.partition_id) {
                debug!(partition_id = cmd.partition_id, %error, "upstream CSR read failed");
            }
        }
        self.notify(port_uuid, ComponentKind::Port, ChangeKind::Update, port.parent);
        Ok(())
    }

    /// Reads the upstream port function's configuration space through the
    /// CSR register group and corrects the port width from its PCI
    /// Express link status register.
    fn refresh_upstream_csr(&self, port_uuid: Uuid, partition_id: u8) -> Result<(), DiscoveryError> {
        let config = self.gas.read_partition(partition_id)?;
        if !config.has_usp_function() {
            return Err(DiscoveryError::NoUpstreamFunction { partition_id });
        }
        let mut snapshot = vec![0u8; CSR_SNAPSHOT_LEN];
        self.gas.read_csr(config.usp_inst_id, 0, &mut snapshot)?;
        if let Some((capability, link_status)) = config_space::pcie_link_registers(&snapshot) {
            let width = u32::from((link_status >> 4) & 0x3f);
            trace!(partition_id, capability, link_status, width, "upstream link registers");
            if width != 0 {
                self.model.ports.update(port_uuid, |p| p.width = Some(width))?;
            }
        }
        Ok(())
    }

    /// Probes the port's TWI side band for a device, trying each device
    /// kind in discovery order. Returns the modeled device, or `None` for
    /// an empty slot.
    pub fn oob_port_device_discovery(
        &self,
        port_uuid: Uuid,
    ) -> Result<Option<Uuid>, DiscoveryError> {
        let port = self.model.ports.get(port_uuid)?;
        for kind in DeviceKind::all() {
            let found = match kind {
                DeviceKind::Drive => self.oob_drive_discovery(&port)?,
                // Processors and unclassified devices answer on no side
                // band; they only become visible in band.
                DeviceKind::Processor | DeviceKind::Unknown => None,
            };
            if let Some(device) = found {
                debug!(
                    phy_port_id = port.phys_port_id,
                    %kind,
                    device = %device,
                    "out-of-band device found"
                );
                return Ok(Some(device));
            }
        }
        Ok(None)
    }

    fn oob_drive_discovery(&self, port: &Port) -> Result<Option<Uuid>, DiscoveryError> {
        let smart = oob::read_smart(&self.gas, port.twi_port);
        let serial = oob::read_vpd_serial(&self.gas, port.twi_port);
        let firmware = oob::read_firmware_version(&self.gas, port.twi_port);
        if smart.is_err() && serial.is_err() && firmware.is_err() {
            debug!(phy_port_id = port.phys_port_id, "no side-band answer, slot treated as empty");
            return Ok(None);
        }
        if let Err(error) = &smart {
            warn!(phy_port_id = port.phys_port_id, %error, "SMART side band failed");
        }
        if let Err(error) = &serial {
            warn!(phy_port_id = port.phys_port_id, %error, "VPD serial read failed");
        }
        if let Err(error) = &firmware {
            warn!(phy_port_id = port.phys_port_id, %error, "VPD firmware read failed");
        }

        let serial = serial.ok().flatten();
        let key = serial
            .clone()
            .unwrap_or_else(|| stabilize::synthetic_device_key(port.phys_port_id));
        let drive_uuid = stabilize::drive_uuid(Some(&key))?;
        let smart = smart.ok();
        self.register_drive(Drive {
            uuid: drive_uuid,
            parent: self.modeled_chassis(),
            dsp_port: Some(port.uuid),
            serial_number: serial,
            firmware_version: firmware.ok().flatten(),
            last_smart_health: smart.map(|s| s.percentage_drive_life_used),
            status: smart.map_or_else(Status::enabled, |s| s.to_status()),
            ..Drive::default()
        });
        self.add_device_endpoint(drive_uuid, port)?;
        Ok(Some(drive_uuid))
    }

    fn register_drive(&self, drive: Drive) {
        let drive_uuid = drive.uuid;
        let parent = drive.parent;
        self.model.drives.add(drive);
        self.notify(drive_uuid, ComponentKind::Drive, ChangeKind::Add, parent);
        if let Some(subsystem) = self.modeled_subsystem() {
            self.model.subsystem_drives.add(subsystem, drive_uuid);
            self.notify(subsystem, ComponentKind::StorageSubsystem, ChangeKind::Update, None);
        }
    }

    /// Models the endpoint exposing `device` and links it to the zone the
    /// port is currently bound into, if any.
    fn add_device_endpoint(&self, device: Uuid, port: &Port) -> Result<(), DiscoveryError> {
        let fabric_uuid = stabilize::fabric_uuid();
        let endpoint_uuid = stabilize::endpoint_uuid(Some(device), &[port.phys_port_id])?;
        self.model.endpoints.add(Endpoint {
            uuid: endpoint_uuid,
            parent: Some(fabric_uuid),
            connected_device: Some(device),
            status: Status::enabled(),
        });
        self.model.endpoint_ports.add(endpoint_uuid, port.uuid);
        self.notify(
            endpoint_uuid,
            ComponentKind::Endpoint,
            ChangeKind::Add,
            Some(fabric_uuid),
        );

        let info = binding::port_binding_info(&self.gas, port.phys_port_id)?;
        if let Some(entry) = info.entries.first() {
            if entry.is_bound() {
                if let Some(zone) = self.model.zone_by_id(entry.partition_id) {
                    self.model.zone_endpoints.add(zone.uuid, endpoint_uuid);
                    self.notify(
                        zone.uuid,
                        ComponentKind::Zone,
                        ChangeKind::Update,
                        Some(fabric_uuid),
                    );
                }
            }
        }
        Ok(())
    }

    /// Decodes the PCI topology behind the port's logical bridge while it
    /// is bound to the management partition.
    ///
    /// `oob_device` is the device the side band reported earlier, if any;
    /// when the topology shows nothing behind the bridge that device is
    /// marked critical instead of silently dropped.
    pub fn ib_port_device_discovery(
        &self,
        switch_uuid: Uuid,
        port_uuid: Uuid,
        logical_bridge_id: u8,
        oob_device: Option<Uuid>,
    ) -> Result<(), DiscoveryError> {
        if logical_bridge_id == USP_BRIDGE_ID {
            return Err(DiscoveryError::ReservedBridge);
        }
        let switch = self.model.switches.get(switch_uuid)?;
        let decoder = SysfsDecoder::new(self.source.raw_devices(None));
        // Downstream bridges enumerate from device number 0; logical
        // bridge ids from 1, bridge 0 being the upstream port.
        let bridge = decoder.bridge_by_switch_path(&switch.bridge_path, logical_bridge_id - 1)?;
        let devices = decoder.devices_for_bridge(&bridge);
        match devices.as_slice() {
            [] => {
                match oob_device {
                    Some(device) => self.critical_state_device_discovery(device)?,
                    None => debug!(logical_bridge_id, "no device behind the bridge"),
                }
                Ok(())
            }
            [device] => self.sysfs_device_discovery(port_uuid, oob_device, &decoder, device),
            devices => Err(DiscoveryError::TooManyDevices {
                count: devices.len(),
            }),
        }
    }

    /// The side band saw a device but the host trains no link to it.
    fn critical_state_device_discovery(&self, drive_uuid: Uuid) -> Result<(), DiscoveryError> {
        warn!(drive = %drive_uuid, "drive answers out of band but is invisible in band");
        let drive = self.model.drives.get(drive_uuid)?;
        self.model.drives.update(drive_uuid, |d| {
            d.is_in_critical_discovery_state = true;
            d.status = Status::critical();
        })?;
        self.notify(drive_uuid, ComponentKind::Drive, ChangeKind::Update, drive.parent);
        Ok(())
    }

    fn sysfs_device_discovery(
        &self,
        port_uuid: Uuid,
        oob_device: Option<Uuid>,
        decoder: &SysfsDecoder,
        device: &SysfsDevice,
    ) -> Result<(), DiscoveryError> {
        let port = self.model.ports.get(port_uuid)?;
        let functions = decoder.functions_for_device(device);
        let kind = DeviceKind::classify(&functions);
        info!(
            phy_port_id = port.phys_port_id,
            %kind,
            vendor_id = device.vendor_id,
            device_id = device.device_id,
            "in-band device discovery"
        );

        let serial = device.serial_number.map(|s| format!("{s:016x}"));
        let device_key = serial
            .clone()
            .unwrap_or_else(|| stabilize::synthetic_device_key(port.phys_port_id));
        let device_uuid = stabilize::device_uuid(Some(&device_key))?;
        let manager = self.modeled_manager();
        self.model.devices.add(PcieDevice {
            uuid: device_uuid,
            parent: manager,
            chassis: self.modeled_chassis(),
            vendor_id: device.vendor_id,
            device_id: device.device_id,
            serial_number: serial.clone(),
            status: Status::enabled(),
        });
        self.notify(device_uuid, ComponentKind::PcieDevice, ChangeKind::Add, manager);

        let backing = match kind {
            DeviceKind::Drive => Some(self.ib_drive_discovery(
                &port,
                oob_device,
                serial.as_deref(),
                &device_key,
                &functions,
            )?),
            DeviceKind::Processor => Some(self.ib_processor_discovery(&port, &device_key)?),
            DeviceKind::Unknown => {
                warn!(
                    phy_port_id = port.phys_port_id,
                    "unrecognized device class, modeling functions only"
                );
                None
            }
        };

        for function in &functions {
            let function_uuid = stabilize::function_uuid(Some(&device_key), function.id.function)?;
            self.model.functions.add(PcieFunction {
                uuid: function_uuid,
                parent: Some(device_uuid),
                function_id: function.id.function,
                device_class: function.device_class,
                is_virtual: function.is_virtual,
                dsp_port: Some(port.uuid),
                status: Status::enabled(),
            });
            self.notify(
                function_uuid,
                ComponentKind::PcieFunction,
                ChangeKind::Add,
                Some(device_uuid),
            );
            if let Some(backing) = backing {
                match kind {
                    DeviceKind::Drive => self.model.drive_functions.add(backing, function_uuid),
                    DeviceKind::Processor => {
                        self.model.processor_functions.add(backing, function_uuid)
                    }
                    DeviceKind::Unknown => {}
                }
            }
        }
        Ok(())
    }

    fn ib_drive_discovery(
        &self,
        port: &Port,
        oob_device: Option<Uuid>,
        serial: Option<&str>,
        device_key: &str,
        functions: &[SysfsFunction],
    ) -> Result<Uuid, DiscoveryError> {
        let sysfs_drives: Vec<&SysfsDrive> =
            functions.iter().flat_map(|f| f.drives.iter()).collect();
        let Some(first) = sysfs_drives.first() else {
            warn!(
                phy_port_id = port.phys_port_id,
                "mass-storage device exposes no block device"
            );
            return Err(DiscoveryError::DeviceNotFound);
        };
        if sysfs_drives.len() > 1 {
            warn!(
                phy_port_id = port.phys_port_id,
                count = sysfs_drives.len(),
                "multiple block devices behind one port, modeling the first"
            );
        }

        let drive_uuid = match oob_device.filter(|uuid| self.model.drives.contains(*uuid)) {
            Some(uuid) => uuid,
            // In-band-only discovery: the side band never saw this drive.
            None => {
                let uuid = stabilize::drive_uuid(Some(device_key))?;
                self.register_drive(Drive {
                    uuid,
                    parent: self.modeled_chassis(),
                    dsp_port: Some(port.uuid),
                    serial_number: serial.map(str::to_string),
                    status: Status::enabled(),
                    ..Drive::default()
                });
                self.add_device_endpoint(uuid, port)?;
                uuid
            }
        };
        let mut parent = None;
        self.model.drives.update(drive_uuid, |d| {
            parent = d.parent;
            d.name = Some(first.name.clone());
            d.capacity_bytes = Some(first.size_bytes);
            d.is_in_critical_discovery_state = false;
            d.status.state = State::Enabled;
        })?;
        self.notify(drive_uuid, ComponentKind::Drive, ChangeKind::Update, parent);
        Ok(drive_uuid)
    }

    fn ib_processor_discovery(&self, port: &Port, device_key: &str) -> Result<Uuid, DiscoveryError> {
        let processor_uuid = stabilize::processor_uuid(Some(device_key))?;
        let manager = self.modeled_manager();
        self.model.processors.add(Processor {
            uuid: processor_uuid,
            parent: manager,
            dsp_port: Some(port.uuid),
            status: Status::enabled(),
        });
        self.notify(processor_uuid, ComponentKind::Processor, ChangeKind::Add, manager);
        self.add_device_endpoint(processor_uuid, port)?;
        Ok(processor_uuid)
    }

    /// Tears down everything modeled behind a hot-removed port: endpoints
    /// degenerate (unbound from their zones and marked critical), then
    /// functions, PCIe devices and the backing drive or processor go.
    pub fn remove_devices_on_port(&self, port_uuid: Uuid) -> Result<(), DiscoveryError> {
        let drives: Vec<Drive> = self
            .model
            .drives
            .list()
            .into_iter()
            .filter(|d| d.dsp_port == Some(port_uuid))
            .collect();
        let processors: Vec<Processor> = self
            .model
            .processors
            .list()
            .into_iter()
            .filter(|p| p.dsp_port == Some(port_uuid))
            .collect();
        let functions: Vec<PcieFunction> = self
            .model
            .functions
            .list()
            .into_iter()
            .filter(|f| f.dsp_port == Some(port_uuid))
            .collect();

        let backing: Vec<Uuid> = drives
            .iter()
            .map(|d| d.uuid)
            .chain(processors.iter().map(|p| p.uuid))
            .collect();
        self.degenerate_endpoints(&backing);

        let mut device_uuids: Vec<Uuid> = functions.iter().filter_map(|f| f.parent).collect();
        device_uuids.sort_unstable();
        device_uuids.dedup();

        for function in &functions {
            self.model.functions.remove(function.uuid)?;
            self.model.unlink_everywhere(function.uuid);
            self.notify(
                function.uuid,
                ComponentKind::PcieFunction,
                ChangeKind::Remove,
                function.parent,
            );
        }
        for device_uuid in device_uuids {
            if self.model.devices.contains(device_uuid) {
                self.model.devices.remove(device_uuid)?;
                self.notify(
                    device_uuid,
                    ComponentKind::PcieDevice,
                    ChangeKind::Remove,
                    self.modeled_manager(),
                );
            }
        }
        for drive in &drives {
            self.model.drives.remove(drive.uuid)?;
            self.model.unlink_everywhere(drive.uuid);
            self.notify(drive.uuid, ComponentKind::Drive, ChangeKind::Remove, drive.parent);
        }
        if !drives.is_empty() {
            if let Some(subsystem) = self.modeled_subsystem() {
                self.notify(subsystem, ComponentKind::StorageSubsystem, ChangeKind::Update, None);
            }
        }
        for processor in &processors {
            self.model.processors.remove(processor.uuid)?;
            self.model.unlink_everywhere(processor.uuid);
            self.notify(
                processor.uuid,
                ComponentKind::Processor,
                ChangeKind::Remove,
                processor.parent,
            );
        }
        info!(
            drives = drives.len(),
            processors = processors.len(),
            functions = functions.len(),
            "port devices removed"
        );
        Ok(())
    }

    /// An endpoint whose device vanished is unbound from its zones and
    /// marked critical; rediscovery of the same device revives the same
    /// endpoint identity.
    fn degenerate_endpoints(&self, devices: &[Uuid]) {
        for device in devices {
            let Some(endpoint) = self.model.endpoint_for_device(*device) else {
                continue;
            };
            let zones = self.model.zone_endpoints.parents_of(endpoint.uuid);
            if !zones.is_empty() {
                if let Err(error) = self.unbind_endpoint_ports(endpoint.uuid) {
                    warn!(endpoint = %endpoint.uuid, %error, "unbinding a degenerated endpoint failed");
                }
            }
            for zone_uuid in zones {
                self.model.zone_endpoints.remove(zone_uuid, endpoint.uuid);
                self.notify(zone_uuid, ComponentKind::Zone, ChangeKind::Update, None);
            }
            if self
                .model
                .endpoints
                .update(endpoint.uuid, |e| e.status = Status::critical())
                .is_ok()
            {
                self.notify(
                    endpoint.uuid,
                    ComponentKind::Endpoint,
                    ChangeKind::Update,
                    endpoint.parent,
                );
            }
        }
    }

    fn unbind_endpoint_ports(&self, endpoint_uuid: Uuid) -> Result<(), DiscoveryError> {
        for port_uuid in self.model.endpoint_ports.children_of(endpoint_uuid) {
            let port = self.model.ports.get(port_uuid)?;
            let info = binding::port_binding_info(&self.gas, port.phys_port_id)?;
            let Some(entry) = info.entries.first() else {
                continue;
            };
            if entry.is_bound() {
                binding::unbind_from_partition(
                    &self.gas,
                    entry.partition_id,
                    entry.logical_bridge_id,
                    self.poll,
                )?;
            }
        }
        Ok(())
    }

    /// Binds every port of `endpoint` into the zone's partition, one free
    /// logical bridge per port.
    pub fn bind_endpoint_to_zone(
        &self,
        zone_uuid: Uuid,
        endpoint_uuid: Uuid,
    ) -> Result<(), DiscoveryError> {
        let zone = self.model.zones.get(zone_uuid)?;
        self.model.endpoints.get(endpoint_uuid)?;
        let ports = self.model.endpoint_ports.children_of(endpoint_uuid);
        let info = binding::partition_binding_info(&self.gas, zone.zone_id)?;
        if binding::available_bridge_count(&info) < ports.len() {
            return Err(DiscoveryError::NoBridgeAvailable {
                partition_id: zone.zone_id,
            });
        }
        for port_uuid in ports {
            let port = self.model.ports.get(port_uuid)?;
            let info = binding::partition_binding_info(&self.gas, zone.zone_id)?;
            let logical_bridge_id = binding::available_bridge_id(&info)?;
            binding::bind_to_partition(
                &self.gas,
                port.phys_port_id,
                zone.zone_id,
                logical_bridge_id,
                self.poll,
            )?;
        }
        self.model.zone_endpoints.add(zone_uuid, endpoint_uuid);
        self.notify(zone_uuid, ComponentKind::Zone, ChangeKind::Update, zone.parent);
        Ok(())
    }

    pub fn unbind_endpoint_from_zone(
        &self,
        zone_uuid: Uuid,
        endpoint_uuid: Uuid,
    ) -> Result<(), DiscoveryError> {
        let zone = self.model.zones.get(zone_uuid)?;
        self.unbind_endpoint_ports(endpoint_uuid)?;
        self.model.zone_endpoints.remove(zone_uuid, endpoint_uuid);
        self.notify(zone_uuid, ComponentKind::Zone, ChangeKind::Update, zone.parent);
        Ok(())
    }

    /// Binds the port into the management partition so the host can
    /// enumerate the device behind it. Returns the logical bridge used.
    pub fn bind_to_host(&self, port_uuid: Uuid) -> Result<u8, DiscoveryError> {
        let port = self.model.ports.get(port_uuid)?;
        let partition_id = self.current_partition_id()?;
        let info = binding::partition_binding_info(&self.gas, partition_id)?;
        let logical_bridge_id = binding::available_bridge_id(&info)?;
        binding::bind_to_partition(
            &self.gas,
            port.phys_port_id,
            partition_id,
            logical_bridge_id,
            self.poll,
        )?;
        Ok(logical_bridge_id)
    }

    /// Releases a logical bridge of the management partition.
    pub fn unbind_from_host(&self, logical_bridge_id: u8) -> Result<(), DiscoveryError> {
        let partition_id = self.current_partition_id()?;
        binding::unbind_from_partition(&self.gas, partition_id, logical_bridge_id, self.poll)
    }

    /// The logical bridge a port is currently bound through.
    pub fn bridge_id_for_port(&self, port_uuid: Uuid) -> Result<u8, DiscoveryError> {
        let port = self.model.ports.get(port_uuid)?;
        let info = binding::port_binding_info(&self.gas, port.phys_port_id)?;
        binding::logical_bridge_for_port(&info)
    }

    /// Refreshes a drive's health from its SMART side band.
    pub fn update_drive_status(
        &self,
        port_uuid: Uuid,
        drive_uuid: Uuid,
    ) -> Result<(), DiscoveryError> {
        let port = self.model.ports.get(port_uuid)?;
        let smart = oob::read_smart(&self.gas, port.twi_port)?;
        let mut parent = None;
        self.model.drives.update(drive_uuid, |d| {
            parent = d.parent;
            d.last_smart_health = Some(smart.percentage_drive_life_used);
            d.status = smart.to_status();
        })?;
        self.notify(drive_uuid, ComponentKind::Drive, ChangeKind::Update, parent);
        Ok(())
    }

    /// Marks a present-but-unbound drive offline, keeping its last known
    /// health.
    pub fn set_drive_offline(&self, drive_uuid: Uuid) -> Result<(), DiscoveryError> {
        let mut parent = None;
        self.model.drives.update(drive_uuid, |d| {
            parent = d.parent;
            d.status.state = State::UnavailableOffline;
        })?;
        self.notify(drive_uuid, ComponentKind::Drive, ChangeKind::Update, parent);
        Ok(())
    }

    fn current_partition_id(&self) -> Result<u8, DiscoveryError> {
        let top = self.gas.read_top()?;
        u8::try_from(top.current_partition_id).map_err(|_| {
            DiscoveryError::Gas(GasError::InvalidField {
                field: "current_partition_id",
                value: u64::from(top.current_partition_id),
            })
        })
    }

    fn modeled_manager(&self) -> Option<Uuid> {
        self.model.managers.keys().first().copied()
    }

    fn modeled_chassis(&self) -> Option<Uuid> {
        self.model.chassis.keys().first().copied()
    }

    fn modeled_subsystem(&self) -> Option<Uuid> {
        self.model.storage_subsystems.keys().first().copied()
    }

    fn notify(&self, subject: Uuid, component: ComponentKind, change: ChangeKind, context: Option<Uuid>) {
        self.sink.notify(Event::new(subject, component, change, context));
    }
}

fn classify_port(entry: &BindingEntry, current_partition_id: u32) -> PortType {
    if entry.phy_port_id >= PHY_PORTS_NUMBER {
        return PortType::Unsupported;
    }
    if !entry.is_bound() {
        return PortType::Downstream;
    }
    if entry.logical_bridge_id == USP_BRIDGE_ID {
        if u32::from(entry.partition_id) == current_partition_id {
            PortType::Management
        } else {
            PortType::Upstream
        }
    } else {
        PortType::Downstream
    }
}
