// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Port/partition binding operations over the MRPC channel.
//!
//! A bind or unbind is a two-step affair: the command itself completes
//! quickly, then the switch works the change through in the background.
//! Completion is observed by re-reading the binding table until the
//! per-entry operation result leaves `InProgress`.

use std::thread;
use std::time::Duration;

use tracing::debug;

use gas::mrpc::binding_info::{OperationResult, PartitionBindingInfo, PortBindingInfo};
use gas::mrpc::{BindPort, UnbindOption, UnbindPort, p2p_result};
use gas::{Gas, NO_PORT_ASSIGNED};

use crate::DiscoveryError;

/// How the post-bind/unbind result poll paces itself.
#[derive(Clone, Copy, Debug)]
pub struct BindingPoll {
    pub interval: Duration,
    /// Number of polls before the operation counts as stuck.
    pub limit: u32,
}

impl Default for BindingPoll {
    fn default() -> BindingPoll {
        BindingPoll {
            interval: Duration::from_millis(500),
            limit: 240,
        }
    }
}

fn check_p2p_return(return_value: u32) -> Result<(), DiscoveryError> {
    if return_value == p2p_result::COMMAND_SUCCEED {
        Ok(())
    } else {
        Err(DiscoveryError::BindingRejected { code: return_value })
    }
}

/// Binding state of one physical port.
pub fn port_binding_info(gas: &Gas, phy_port_id: u8) -> Result<PortBindingInfo, DiscoveryError> {
    let mut cmd = PortBindingInfo::for_port(phy_port_id);
    gas.run(&mut cmd)?;
    check_p2p_return(cmd.return_value)?;
    Ok(cmd)
}

/// Binding state of every physical port.
pub fn all_port_binding_info(gas: &Gas) -> Result<PortBindingInfo, DiscoveryError> {
    let mut cmd = PortBindingInfo::all_ports();
    gas.run(&mut cmd)?;
    check_p2p_return(cmd.return_value)?;
    Ok(cmd)
}

/// Logical-bridge table of one partition.
pub fn partition_binding_info(
    gas: &Gas,
    partition_id: u8,
) -> Result<PartitionBindingInfo, DiscoveryError> {
    let mut cmd = PartitionBindingInfo::for_partition(partition_id);
    gas.run(&mut cmd)?;
    check_p2p_return(cmd.return_value)?;
    Ok(cmd)
}

/// The logical bridge a port is bound to.
///
/// Requires exactly one binding entry with both a partition and a bridge
/// assigned.
pub fn logical_bridge_for_port(pbi: &PortBindingInfo) -> Result<u8, DiscoveryError> {
    if pbi.entries.len() != 1 {
        return Err(DiscoveryError::AmbiguousBinding {
            phy_port_id: pbi.phy_port_id,
            count: pbi.entries.len(),
        });
    }
    let entry = &pbi.entries[0];
    if entry.partition_id == NO_PORT_ASSIGNED || entry.logical_bridge_id == NO_PORT_ASSIGNED {
        return Err(DiscoveryError::PortNotBound {
            phy_port_id: pbi.phy_port_id,
        });
    }
    Ok(entry.logical_bridge_id)
}

/// First free logical bridge of the partition. Bridge 0 is the upstream
/// port and never handed out.
pub fn available_bridge_id(pbi: &PartitionBindingInfo) -> Result<u8, DiscoveryError> {
    for (bridge_id, entry) in pbi.entries.iter().enumerate().skip(1) {
        if entry.phy_port_id == NO_PORT_ASSIGNED {
            return Ok(u8::try_from(bridge_id).unwrap_or(u8::MAX));
        }
    }
    Err(DiscoveryError::NoBridgeAvailable {
        partition_id: pbi.partition_id,
    })
}

/// Number of free logical bridges in the partition.
#[must_use]
pub fn available_bridge_count(pbi: &PartitionBindingInfo) -> usize {
    pbi.entries
        .iter()
        .skip(1)
        .filter(|e| e.phy_port_id == NO_PORT_ASSIGNED)
        .count()
}

fn settle_result(
    poll: BindingPoll,
    mut read_result: impl FnMut() -> Result<OperationResult, DiscoveryError>,
) -> Result<(), DiscoveryError> {
    for _ in 0..poll.limit {
        let result = read_result()?;
        if result != OperationResult::InProgress {
            return if result == OperationResult::Success {
                Ok(())
            } else {
                Err(DiscoveryError::BindingFailed { result })
            };
        }
        thread::sleep(poll.interval);
    }
    Err(DiscoveryError::BindingTimeout {
        attempts: poll.limit,
    })
}

/// Binds `phy_port_id` to a logical bridge of `partition_id` and waits for
/// the switch to finish the operation.
pub fn bind_to_partition(
    gas: &Gas,
    phy_port_id: u8,
    partition_id: u8,
    logical_bridge_id: u8,
    poll: BindingPoll,
) -> Result<(), DiscoveryError> {
    let mut cmd = BindPort {
        partition_id,
        logical_bridge_id,
        phy_port_id,
        return_value: 0,
    };
    gas.run(&mut cmd)?;
    check_p2p_return(cmd.return_value)?;

    settle_result(poll, || {
        let info = partition_binding_info(gas, partition_id)?;
        let result = info
            .entries
            .get(usize::from(logical_bridge_id))
            .map_or(OperationResult::InProgress, |e| e.operation_result);
        debug!(phy_port_id, partition_id, logical_bridge_id, ?result, "bind result poll");
        Ok(result)
    })
}

/// Unbinds a logical bridge of `partition_id` from its physical port and
/// waits for the switch to finish the operation.
pub fn unbind_from_partition(
    gas: &Gas,
    partition_id: u8,
    logical_bridge_id: u8,
    poll: BindingPoll,
) -> Result<(), DiscoveryError> {
    let info = partition_binding_info(gas, partition_id)?;
    let phy_port_id = info
        .entries
        .get(usize::from(logical_bridge_id))
        .map_or(NO_PORT_ASSIGNED, |e| e.phy_port_id);

    let mut cmd = UnbindPort {
        partition_id,
        logical_bridge_id,
        option: UnbindOption::SimSurpriseHotRemove,
        return_value: 0,
    };
    gas.run(&mut cmd)?;
    check_p2p_return(cmd.return_value)?;

    settle_result(poll, || {
        let info = port_binding_info(gas, phy_port_id)?;
        let result = info
            .entries
            .first()
            .map_or(OperationResult::InProgress, |e| e.operation_result);
        debug!(phy_port_id, partition_id, logical_bridge_id, ?result, "unbind result poll");
        Ok(result)
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use gas::mrpc::binding_info::{BindingEntry, BindingState};

    use super::*;

    fn entry(port: u8, partition: u8, bridge: u8) -> BindingEntry {
        BindingEntry {
            phy_port_id: port,
            partition_id: partition,
            logical_bridge_id: bridge,
            operation_result: OperationResult::Success,
            binding_state: BindingState::Bound,
        }
    }

    #[test]
    fn bridge_for_port_requires_a_single_bound_entry() {
        let mut pbi = PortBindingInfo::for_port(4);
        pbi.entries = vec![entry(4, 1, 3)];
        assert_eq!(logical_bridge_for_port(&pbi).unwrap(), 3);

        pbi.entries = vec![entry(4, NO_PORT_ASSIGNED, NO_PORT_ASSIGNED)];
        assert!(matches!(
            logical_bridge_for_port(&pbi),
            Err(DiscoveryError::PortNotBound { phy_port_id: 4 })
        ));

        pbi.entries = vec![entry(4, 1, 3), entry(4, 2, 1)];
        assert!(matches!(
            logical_bridge_for_port(&pbi),
            Err(DiscoveryError::AmbiguousBinding { count: 2, .. })
        ));
    }

    #[test]
    fn bridge_allocation_skips_the_upstream_bridge() {
        let mut pbi = PartitionBindingInfo::for_partition(1);
        pbi.entries = vec![
            entry(NO_PORT_ASSIGNED, 1, 0),
            entry(8, 1, 1),
            entry(NO_PORT_ASSIGNED, 1, 2),
            entry(NO_PORT_ASSIGNED, 1, 3),
        ];
        assert_eq!(available_bridge_id(&pbi).unwrap(), 2);
        assert_eq!(available_bridge_count(&pbi), 2);

        pbi.entries = vec![entry(NO_PORT_ASSIGNED, 1, 0), entry(8, 1, 1)];
        assert!(matches!(
            available_bridge_id(&pbi),
            Err(DiscoveryError::NoBridgeAvailable { partition_id: 1 })
        ));
    }

    #[test]
    fn settle_poll_waits_out_in_progress() {
        let poll = BindingPoll {
            interval: Duration::from_millis(1),
            limit: 10,
        };
        let mut results = vec![
            OperationResult::InProgress,
            OperationResult::InProgress,
            OperationResult::InProgress,
            OperationResult::Success,
        ]
        .into_iter();
        let mut polls = 0u32;
        settle_result(poll, || {
            polls += 1;
            Ok(results.next().unwrap())
        })
        .unwrap();
        assert_eq!(polls, 4);

        let err = settle_result(poll, || Ok(OperationResult::Failed)).unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::BindingFailed {
                result: OperationResult::Failed
            }
        ));

        let err = settle_result(poll, || Ok(OperationResult::InProgress)).unwrap_err();
        assert!(matches!(err, DiscoveryError::BindingTimeout { attempts: 10 }));
    }
}
