// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Bridges between the port state machine and the discovery orchestrator.

use std::sync::Arc;

use discovery::DiscoveryManager;
use discovery::{binding, oob};
use gas::GasError;
use gas::mrpc::binding_info::PortBindingInfo;
use uuid::Uuid;

use crate::MonitorError;
use crate::state::PortStateWorker;

/// One switch-wide sample taken at the start of a monitor cycle. All ports
/// of the cycle are judged against the same snapshot.
#[derive(Debug)]
pub struct FabricSample {
    /// Partition this agent manages the switch from.
    pub current_partition_id: u8,
    /// Drive presence bitmask from the side band.
    pub presence: u64,
    /// The all-ports binding table.
    pub bindings: PortBindingInfo,
}

/// Takes the per-cycle fabric snapshot.
pub trait FabricSampler: Send + Sync {
    fn sample(&self) -> Result<FabricSample, MonitorError>;
}

/// Samples the fabric through the switch's register file.
pub struct GasSampler {
    manager: Arc<DiscoveryManager>,
}

impl GasSampler {
    pub fn new(manager: Arc<DiscoveryManager>) -> GasSampler {
        GasSampler { manager }
    }
}

impl FabricSampler for GasSampler {
    fn sample(&self) -> Result<FabricSample, MonitorError> {
        let gas = self.manager.gas();
        let top = gas.read_top()?;
        let current_partition_id = u8::try_from(top.current_partition_id).map_err(|_| {
            GasError::InvalidField {
                field: "current_partition_id",
                value: u64::from(top.current_partition_id),
            }
        })?;
        let presence = oob::presence_bitmask(gas)?;
        let bindings = binding::all_port_binding_info(gas)?;
        Ok(FabricSample {
            current_partition_id,
            presence,
            bindings,
        })
    }
}

/// Runs port state machine actions through the discovery orchestrator.
pub struct DiscoveryWorker {
    manager: Arc<DiscoveryManager>,
}

impl DiscoveryWorker {
    pub fn new(manager: Arc<DiscoveryManager>) -> DiscoveryWorker {
        DiscoveryWorker { manager }
    }
}

impl PortStateWorker for DiscoveryWorker {
    fn bind_to_host(&self, port: Uuid) -> Result<u8, MonitorError> {
        Ok(self.manager.bind_to_host(port)?)
    }

    fn unbind_from_host(&self, logical_bridge_id: u8) -> Result<(), MonitorError> {
        Ok(self.manager.unbind_from_host(logical_bridge_id)?)
    }

    fn bridge_id(&self, port: Uuid) -> Result<u8, MonitorError> {
        Ok(self.manager.bridge_id_for_port(port)?)
    }

    fn oob_discovery(&self, port: Uuid) -> Result<Option<Uuid>, MonitorError> {
        Ok(self.manager.oob_port_device_discovery(port)?)
    }

    fn ib_discovery(
        &self,
        switch: Uuid,
        port: Uuid,
        logical_bridge_id: u8,
        device: Option<Uuid>,
    ) -> Result<(), MonitorError> {
        Ok(self
            .manager
            .ib_port_device_discovery(switch, port, logical_bridge_id, device)?)
    }

    fn full_discovery(
        &self,
        switch: Uuid,
        port: Uuid,
        logical_bridge_id: u8,
    ) -> Result<Option<Uuid>, MonitorError> {
        let oob_device = self.manager.oob_port_device_discovery(port)?;
        self.manager
            .ib_port_device_discovery(switch, port, logical_bridge_id, oob_device)?;
        // in-band discovery may register a drive the side band missed
        let drive = self
            .manager
            .model()
            .drives
            .find(|d| d.dsp_port == Some(port))
            .map(|d| d.uuid);
        Ok(drive.or(oob_device))
    }

    fn remove(&self, port: Uuid) -> Result<(), MonitorError> {
        Ok(self.manager.remove_devices_on_port(port)?)
    }

    fn update_port_status(&self, port: Uuid) -> Result<(), MonitorError> {
        Ok(self.manager.update_port_status(port)?)
    }

    fn update_drive_status(&self, port: Uuid, drive: Uuid) -> Result<(), MonitorError> {
        Ok(self.manager.update_drive_status(port, drive)?)
    }

    fn set_drive_offline(&self, drive: Uuid) -> Result<(), MonitorError> {
        Ok(self.manager.set_drive_offline(drive)?)
    }
}
