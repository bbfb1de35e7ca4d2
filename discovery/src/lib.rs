// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! The fabric discovery orchestrator.
//!
//! Discovery combines two independent channels: out-of-band reads over the
//! switch's TWI side band (drive presence, SMART, VPD) and in-band PCI
//! topology decoded from sysfs once a port is bound to the management
//! partition. [`DiscoveryManager`] runs the one-time fabric sweep at agent
//! start and the per-port (re)discovery and removal paths the port monitor
//! triggers afterwards.
//!
//! Per-port failures are logged and leave the port looking empty for the
//! cycle; only a missing switch aborts the fabric sweep.

#![deny(clippy::all, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use gas::GasError;
use gas::mrpc::binding_info::OperationResult;
use gas::mrpc::p2p_result;
use model::ModelError;
use sysfs::SysfsError;

pub use crate::binding::BindingPoll;
pub use crate::kinds::DeviceKind;
pub use crate::manager::DiscoveryManager;

pub mod binding;
pub mod kinds;
pub mod manager;
pub mod oob;

#[cfg(test)]
pub(crate) mod sim;

/// Errors raised by the discovery orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Gas(#[from] GasError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Sysfs(#[from] SysfsError),
    /// No known switch found in the PCI topology.
    #[error("no PCIe switch found in the PCI topology")]
    SwitchNotFound,
    /// A p2p binding command completed with a non-success return value.
    #[error("binding command rejected: {}", p2p_result::describe(*code))]
    BindingRejected { code: u32 },
    /// A link status command completed with a non-success return value.
    #[error("link status command rejected with code {code}")]
    LinkStatusRejected { code: u32 },
    /// A port reported multiple binding entries where one was expected.
    #[error("port {phy_port_id} reported {count} binding entries, expected 1")]
    AmbiguousBinding { phy_port_id: u8, count: usize },
    /// The port has no partition or logical bridge assigned.
    #[error("port {phy_port_id} is not bound to any partition")]
    PortNotBound { phy_port_id: u8 },
    /// Every logical bridge of the partition already has a port.
    #[error("no logical bridge available in partition {partition_id}")]
    NoBridgeAvailable { partition_id: u8 },
    /// Logical bridge 0 belongs to the partition's upstream port.
    #[error("logical bridge 0 is reserved for the upstream port")]
    ReservedBridge,
    /// A bind or unbind settled on a terminal non-success result.
    #[error("binding operation failed with result {result:?}")]
    BindingFailed { result: OperationResult },
    /// The binding table never left `InProgress` within the poll budget.
    #[error("binding operation still in progress after {attempts} polls")]
    BindingTimeout { attempts: u32 },
    /// More than one device answered behind a single downstream bridge.
    #[error("{count} PCIe devices found behind one downstream bridge, expected 1")]
    TooManyDevices { count: usize },
    /// A device was expected behind the bridge but none was usable.
    #[error("no usable device found behind the downstream bridge")]
    DeviceNotFound,
    /// The partition has no upstream port function to read CSR data from.
    #[error("partition {partition_id} has no upstream port function")]
    NoUpstreamFunction { partition_id: u8 },
}
