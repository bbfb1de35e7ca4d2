// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Background fabric monitoring.
//!
//! One [`PortMonitor`] thread per switch periodically samples the switch-wide
//! presence bitmask and binding table, feeds every downstream port's
//! [`PortStateManager`], and refreshes upstream port link status. The state
//! managers reconcile the resource model with what the hardware reports by
//! triggering the minimal discovery or removal action on each change.

#![deny(clippy::all, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use discovery::DiscoveryError;
use gas::GasError;
use model::ModelError;

pub use crate::monitor::PortMonitor;
pub use crate::state::{PortState, PortStateManager, PortStateWorker};
pub use crate::worker::{DiscoveryWorker, FabricSample, FabricSampler, GasSampler};

pub mod monitor;
pub mod state;
pub mod worker;

/// Errors raised by the port monitor.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Gas(#[from] GasError),
    #[error(transparent)]
    Model(#[from] ModelError),
    /// The all-ports binding table has no entry for a modeled port.
    #[error("port {phy_port_id} missing from the binding table")]
    PortNotInBindingTable { phy_port_id: u8 },
    /// The monitor thread could not be spawned.
    #[error("failed to spawn the monitor thread: {0}")]
    Spawn(#[from] std::io::Error),
}
