// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! The per-switch background monitor thread.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use discovery::DiscoveryManager;
use discovery::oob;
use model::{PortType, ResourceModel};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::MonitorError;
use crate::state::{PortStateManager, PortStateWorker};
use crate::worker::{DiscoveryWorker, FabricSample, FabricSampler, GasSampler};

/// Shared cancellation state between the handle and the thread.
struct Shared {
    running: Mutex<bool>,
    wake: Condvar,
}

/// Owns the background monitor thread of one switch.
///
/// The thread runs one cycle immediately, then one per interval. Dropping
/// the handle stops and joins the thread.
pub struct PortMonitor {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl PortMonitor {
    /// Spawns the monitor for `switch` on top of the discovery orchestrator.
    pub fn for_manager(
        manager: Arc<DiscoveryManager>,
        model: Arc<ResourceModel>,
        switch: Uuid,
        interval: Duration,
    ) -> Result<PortMonitor, MonitorError> {
        let worker = Arc::new(DiscoveryWorker::new(manager.clone()));
        let sampler = Arc::new(GasSampler::new(manager));
        PortMonitor::spawn(model, worker, sampler, switch, interval)
    }

    pub fn spawn(
        model: Arc<ResourceModel>,
        worker: Arc<dyn PortStateWorker>,
        sampler: Arc<dyn FabricSampler>,
        switch: Uuid,
        interval: Duration,
    ) -> Result<PortMonitor, MonitorError> {
        let shared = Arc::new(Shared {
            running: Mutex::new(true),
            wake: Condvar::new(),
        });
        let task = MonitorTask::new(model, worker, sampler, switch);
        let thread_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name(format!("port-monitor-{switch}"))
            .spawn(move || run(task, &thread_shared, interval))?;
        Ok(PortMonitor {
            shared,
            handle: Some(handle),
        })
    }

    /// Stops the thread and joins it. Wakes a sleeping thread promptly.
    pub fn stop(&mut self) {
        *self.shared.running.lock() = false;
        self.shared.wake.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PortMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(mut task: MonitorTask, shared: &Shared, interval: Duration) {
    info!(switch = %task.switch, "port monitor starting");
    loop {
        if let Err(error) = task.cycle() {
            error!(switch = %task.switch, %error, "monitor cycle failed");
        }
        let mut running = shared.running.lock();
        if !*running {
            break;
        }
        let _ = shared.wake.wait_for(&mut running, interval);
        if !*running {
            break;
        }
    }
    debug!(switch = %task.switch, "port monitor stopped");
}

/// One switch's monitoring state: the upstream ports to refresh and a state
/// manager per downstream port.
struct MonitorTask {
    model: Arc<ResourceModel>,
    worker: Arc<dyn PortStateWorker>,
    sampler: Arc<dyn FabricSampler>,
    switch: Uuid,
    upstream: Vec<Uuid>,
    downstream: Vec<PortStateManager>,
}

impl MonitorTask {
    fn new(
        model: Arc<ResourceModel>,
        worker: Arc<dyn PortStateWorker>,
        sampler: Arc<dyn FabricSampler>,
        switch: Uuid,
    ) -> MonitorTask {
        let mut upstream = Vec::new();
        let mut downstream = Vec::new();
        for uuid in model.ports.keys_by_parent(switch) {
            let Ok(port) = model.ports.get(uuid) else {
                continue;
            };
            match port.port_type {
                PortType::Upstream => upstream.push(uuid),
                PortType::Downstream => {
                    downstream.push(PortStateManager::new(worker.clone(), switch, uuid));
                }
                PortType::Management => {
                    debug!(phys_port_id = port.phys_port_id, "ignoring management port");
                }
                PortType::Unsupported => {
                    warn!(phys_port_id = port.phys_port_id, "port of unsupported type");
                }
            }
        }
        info!(
            switch = %switch,
            upstream = upstream.len(),
            downstream = downstream.len(),
            "monitoring ports",
        );
        MonitorTask {
            model,
            worker,
            sampler,
            switch,
            upstream,
            downstream,
        }
    }

    /// One monitor pass: a single fabric snapshot, then every downstream
    /// port through its state machine, then upstream link refresh. Per-port
    /// failures are logged and do not stop the pass.
    fn cycle(&mut self) -> Result<(), MonitorError> {
        let sample = self.sampler.sample()?;
        debug!(presence = sample.presence, "cycle snapshot");
        for psm in &mut self.downstream {
            if let Err(error) = check_port(&self.model, self.worker.as_ref(), psm, &sample) {
                warn!(port = %psm.port(), %error, "port check failed");
            }
        }
        for &port in &self.upstream {
            if let Err(error) = self.worker.update_port_status(port) {
                warn!(port = %port, %error, "upstream status refresh failed");
            }
        }
        Ok(())
    }
}

fn check_port(
    model: &ResourceModel,
    worker: &dyn PortStateWorker,
    psm: &mut PortStateManager,
    sample: &FabricSample,
) -> Result<(), MonitorError> {
    let port = model.ports.get(psm.port())?;
    let entry = sample
        .bindings
        .entry_for(port.phys_port_id)
        .ok_or(MonitorError::PortNotInBindingTable {
            phy_port_id: port.phys_port_id,
        })?;
    let is_bound = entry.is_bound();
    let is_bound_to_host = is_bound && entry.partition_id == sample.current_partition_id;
    let is_present = oob::is_device_present(sample.presence, port.phys_port_id);

    // the drive behind the port, when the model and the sample agree on it
    let drive = psm
        .device()
        .filter(|_| is_present && psm.device_present())
        .and_then(|uuid| model.drives.get(uuid).ok());
    let is_being_erased = drive.as_ref().is_some_and(|d| d.is_being_erased);

    if let Err(error) = worker.update_port_status(psm.port()) {
        warn!(port = %psm.port(), %error, "port status refresh failed");
    }

    // drives owned by an out-of-band operation are left alone
    if let Some(drive) = &drive
        && !drive.is_protected()
    {
        let refresh = if is_bound {
            worker.update_drive_status(psm.port(), drive.uuid)
        } else {
            worker.set_drive_offline(drive.uuid)
        };
        if let Err(error) = refresh {
            warn!(drive = %drive.uuid, %error, "drive status refresh failed");
        }
    }

    psm.update(is_present, is_bound, is_bound_to_host, is_being_erased);
    Ok(())
}
