// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Port and partition binding-table queries.
//!
//! Input layout (2 bytes): `[0]` sub-command, `[1]` selector: physical port
//! id for the port query (`0xff` selects all ports) or partition id for
//! the partition query.
//!
//! Output layout: `[0]` entry count, entries packed from offset 4 onward,
//! 4 bytes each:
//!
//! ```text
//! [0] physical port id   (0xff = no port assigned)
//! [1] partition id       (0xff = unbound)
//! [2] logical bridge id  (0xff = unbound)
//! [3] packed state byte: low nibble = operation result,
//!                        high nibble = binding state
//! ```

use crate::codec::{get_u8, put_u8};
use crate::mrpc::{CommandCode, MrpcCommand, encode_sub_command, expect_len};
use crate::{GasError, NO_PORT_ASSIGNED, PHY_PORTS_NUMBER};

const SUB_PORT_BINDING_INFO: u8 = 2;
const SUB_PARTITION_BINDING_INFO: u8 = 3;

const ENTRIES_OFFSET: usize = 4;
const ENTRY_SIZE: usize = 4;

const OPERATION_RESULT_MASK: u8 = 0x0f;
const BINDING_STATE_SHIFT: u8 = 4;

/// Selector value that queries every physical port at once.
pub const ALL_PORTS: u8 = 0xff;

/// Result of the most recent bind/unbind operation on a table entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display, strum::EnumIs)]
pub enum OperationResult {
    Success,
    Failed,
    InProgress,
    NotApplicable,
}

impl OperationResult {
    /// Decodes the low nibble of the packed state byte.
    pub fn from_packed(packed: u8) -> Result<OperationResult, GasError> {
        match packed & OPERATION_RESULT_MASK {
            0x0 => Ok(OperationResult::Success),
            0x1 => Ok(OperationResult::Failed),
            0x2 => Ok(OperationResult::InProgress),
            0xf => Ok(OperationResult::NotApplicable),
            other => Err(GasError::InvalidField {
                field: "operation_result",
                value: u64::from(other),
            }),
        }
    }
}

/// Binding state of a table entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display, strum::EnumIs)]
pub enum BindingState {
    Unbound,
    Bound,
    NotApplicable,
}

impl BindingState {
    /// Decodes the high nibble of the packed state byte.
    pub fn from_packed(packed: u8) -> Result<BindingState, GasError> {
        match packed >> BINDING_STATE_SHIFT {
            0x0 => Ok(BindingState::Unbound),
            0x1 => Ok(BindingState::Bound),
            0xf => Ok(BindingState::NotApplicable),
            other => Err(GasError::InvalidField {
                field: "binding_state",
                value: u64::from(other),
            }),
        }
    }
}

/// One decoded binding-table entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BindingEntry {
    pub phy_port_id: u8,
    pub partition_id: u8,
    pub logical_bridge_id: u8,
    pub operation_result: OperationResult,
    pub binding_state: BindingState,
}

impl BindingEntry {
    /// Whether any physical port occupies this entry.
    #[must_use]
    pub fn has_port(&self) -> bool {
        self.phy_port_id != NO_PORT_ASSIGNED
    }

    /// Whether the entry is bound to some partition.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.partition_id != NO_PORT_ASSIGNED
    }

    fn decode(output: &[u8], index: usize) -> Result<BindingEntry, GasError> {
        let base = ENTRIES_OFFSET + index * ENTRY_SIZE;
        let packed = get_u8(output, base + 3)?;
        Ok(BindingEntry {
            phy_port_id: get_u8(output, base)?,
            partition_id: get_u8(output, base + 1)?,
            logical_bridge_id: get_u8(output, base + 2)?,
            operation_result: OperationResult::from_packed(packed)?,
            binding_state: BindingState::from_packed(packed)?,
        })
    }
}

fn decode_entries(output: &[u8], max_entries: usize) -> Result<Vec<BindingEntry>, GasError> {
    let count = usize::from(get_u8(output, 0)?).min(max_entries);
    expect_len(output, ENTRIES_OFFSET + count * ENTRY_SIZE)?;
    (0..count).map(|i| BindingEntry::decode(output, i)).collect()
}

/// Queries binding state per physical port.
#[derive(Debug, Default)]
pub struct PortBindingInfo {
    /// Physical port to query, or [`ALL_PORTS`].
    pub phy_port_id: u8,
    /// Command return value, valid after a `Done` execution.
    pub return_value: u32,
    /// One entry per reported port.
    pub entries: Vec<BindingEntry>,
}

impl PortBindingInfo {
    /// Query for a single physical port.
    #[must_use]
    pub fn for_port(phy_port_id: u8) -> Self {
        PortBindingInfo {
            phy_port_id,
            ..Default::default()
        }
    }

    /// Query covering all physical ports.
    #[must_use]
    pub fn all_ports() -> Self {
        Self::for_port(ALL_PORTS)
    }

    /// The entry for `phy_port_id`, if the switch reported one.
    #[must_use]
    pub fn entry_for(&self, phy_port_id: u8) -> Option<&BindingEntry> {
        self.entries.iter().find(|e| e.phy_port_id == phy_port_id)
    }
}

impl MrpcCommand for PortBindingInfo {
    const CODE: CommandCode = CommandCode::PortPartitionP2pBinding;

    fn encode_input(&self, out: &mut Vec<u8>) -> Result<(), GasError> {
        encode_sub_command(out, SUB_PORT_BINDING_INFO);
        put_u8(out, 1, self.phy_port_id);
        Ok(())
    }

    fn output_len(&self) -> usize {
        ENTRIES_OFFSET + usize::from(PHY_PORTS_NUMBER) * ENTRY_SIZE
    }

    fn decode_output(&mut self, return_value: u32, output: &[u8]) -> Result<(), GasError> {
        self.return_value = return_value;
        self.entries = decode_entries(output, usize::from(PHY_PORTS_NUMBER))?;
        Ok(())
    }
}

/// Queries the logical-bridge binding table of one partition.
///
/// Entry index equals the logical bridge id; bridge 0 is the partition's
/// upstream port.
#[derive(Debug, Default)]
pub struct PartitionBindingInfo {
    pub partition_id: u8,
    /// Command return value, valid after a `Done` execution.
    pub return_value: u32,
    /// One entry per logical bridge of the partition.
    pub entries: Vec<BindingEntry>,
}

impl PartitionBindingInfo {
    #[must_use]
    pub fn for_partition(partition_id: u8) -> Self {
        PartitionBindingInfo {
            partition_id,
            ..Default::default()
        }
    }

    /// Number of logical bridges the partition reports.
    #[must_use]
    pub fn logical_bridge_count(&self) -> u8 {
        u8::try_from(self.entries.len()).unwrap_or(u8::MAX)
    }
}

impl MrpcCommand for PartitionBindingInfo {
    const CODE: CommandCode = CommandCode::PortPartitionP2pBinding;

    fn encode_input(&self, out: &mut Vec<u8>) -> Result<(), GasError> {
        encode_sub_command(out, SUB_PARTITION_BINDING_INFO);
        put_u8(out, 1, self.partition_id);
        Ok(())
    }

    fn output_len(&self) -> usize {
        ENTRIES_OFFSET + usize::from(PHY_PORTS_NUMBER) * ENTRY_SIZE
    }

    fn decode_output(&mut self, return_value: u32, output: &[u8]) -> Result<(), GasError> {
        self.return_value = return_value;
        self.entries = decode_entries(output, usize::from(PHY_PORTS_NUMBER))?;
        Ok(())
    }
}

/// Encodes a binding-table output region for simulators and tests.
#[must_use]
pub fn encode_binding_table(entries: &[(u8, u8, u8, u8)]) -> Vec<u8> {
    let mut out = vec![0u8; ENTRIES_OFFSET + entries.len() * ENTRY_SIZE];
    out[0] = u8::try_from(entries.len()).unwrap_or(u8::MAX);
    for (i, (port, partition, bridge, packed)) in entries.iter().enumerate() {
        let base = ENTRIES_OFFSET + i * ENTRY_SIZE;
        out[base] = *port;
        out[base + 1] = *partition;
        out[base + 2] = *bridge;
        out[base + 3] = *packed;
    }
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn packed_state_byte_splits_into_nibbles() {
        assert_eq!(OperationResult::from_packed(0x10).unwrap(), OperationResult::Success);
        assert_eq!(OperationResult::from_packed(0x12).unwrap(), OperationResult::InProgress);
        assert_eq!(BindingState::from_packed(0x10).unwrap(), BindingState::Bound);
        assert_eq!(BindingState::from_packed(0x02).unwrap(), BindingState::Unbound);
        assert_eq!(BindingState::from_packed(0xff).unwrap(), BindingState::NotApplicable);
        assert!(OperationResult::from_packed(0x07).is_err());
    }

    #[test]
    fn port_binding_info_decodes_entries() {
        let output = encode_binding_table(&[(4, 1, 2, 0x10), (6, 0xff, 0xff, 0xff)]);
        let mut cmd = PortBindingInfo::all_ports();
        cmd.decode_output(0, &output).unwrap();
        assert_eq!(cmd.entries.len(), 2);
        let bound = cmd.entry_for(4).unwrap();
        assert!(bound.is_bound());
        assert_eq!(bound.logical_bridge_id, 2);
        assert_eq!(bound.binding_state, BindingState::Bound);
        let unbound = cmd.entry_for(6).unwrap();
        assert!(!unbound.is_bound());
        assert_eq!(unbound.operation_result, OperationResult::NotApplicable);
    }

    #[test]
    fn truncated_table_is_a_short_response() {
        let mut output = encode_binding_table(&[(4, 1, 2, 0x10)]);
        output[0] = 3; // claims more entries than the region holds
        let mut cmd = PortBindingInfo::all_ports();
        assert!(matches!(
            cmd.decode_output(0, &output),
            Err(GasError::ShortResponse { .. })
        ));
    }
}
