// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Port/partition bind and unbind commands.
//!
//! Input layouts (both 4 bytes):
//!
//! ```text
//! BindPort:    [0] sub-command (0)   UnbindPort:  [0] sub-command (1)
//!              [1] partition id                   [1] partition id
//!              [2] logical bridge id              [2] logical bridge id
//!              [3] physical port id               [3] unbind option
//! ```
//!
//! Both commands report their outcome solely through the 32-bit command
//! return value; the output data region is unused.

use crate::GasError;
use crate::codec::put_u8;
use crate::mrpc::{CommandCode, MrpcCommand, encode_sub_command};

const SUB_BIND_PORT: u8 = 0;
const SUB_UNBIND_PORT: u8 = 1;

/// How an unbind behaves when the port link is still active.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(u8)]
pub enum UnbindOption {
    /// Only unbind if the link is already down.
    #[default]
    IfLinkDown = 0,
    /// Simulate a managed hot remove if the port is in L0 or L1.
    SimManagedHotRemove = 1,
    /// Simulate a surprise hot remove if the port is in L0 or L1.
    SimSurpriseHotRemove = 2,
    /// Simulate a link-down event if the port is in L0 or L1.
    SimLinkDown = 3,
}

/// Binds a physical port to a logical bridge of a partition.
#[derive(Debug, Default)]
pub struct BindPort {
    pub partition_id: u8,
    pub logical_bridge_id: u8,
    pub phy_port_id: u8,
    /// Command return value, valid after a `Done` execution.
    pub return_value: u32,
}

impl MrpcCommand for BindPort {
    const CODE: CommandCode = CommandCode::PortPartitionP2pBinding;

    fn encode_input(&self, out: &mut Vec<u8>) -> Result<(), GasError> {
        encode_sub_command(out, SUB_BIND_PORT);
        put_u8(out, 1, self.partition_id);
        put_u8(out, 2, self.logical_bridge_id);
        put_u8(out, 3, self.phy_port_id);
        Ok(())
    }

    fn output_len(&self) -> usize {
        0
    }

    fn decode_output(&mut self, return_value: u32, _output: &[u8]) -> Result<(), GasError> {
        self.return_value = return_value;
        Ok(())
    }
}

/// Unbinds a logical bridge of a partition from its physical port.
#[derive(Debug, Default)]
pub struct UnbindPort {
    pub partition_id: u8,
    pub logical_bridge_id: u8,
    pub option: UnbindOption,
    /// Command return value, valid after a `Done` execution.
    pub return_value: u32,
}

impl MrpcCommand for UnbindPort {
    const CODE: CommandCode = CommandCode::PortPartitionP2pBinding;

    fn encode_input(&self, out: &mut Vec<u8>) -> Result<(), GasError> {
        encode_sub_command(out, SUB_UNBIND_PORT);
        put_u8(out, 1, self.partition_id);
        put_u8(out, 2, self.logical_bridge_id);
        put_u8(out, 3, self.option as u8);
        Ok(())
    }

    fn output_len(&self) -> usize {
        0
    }

    fn decode_output(&mut self, return_value: u32, _output: &[u8]) -> Result<(), GasError> {
        self.return_value = return_value;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bind_input_layout() {
        let cmd = BindPort {
            partition_id: 7,
            logical_bridge_id: 5,
            phy_port_id: 34,
            return_value: 0,
        };
        let mut buf = Vec::new();
        cmd.encode_input(&mut buf).unwrap();
        assert_eq!(buf, &[SUB_BIND_PORT, 7, 5, 34]);
    }

    #[test]
    fn unbind_input_layout() {
        let cmd = UnbindPort {
            partition_id: 7,
            logical_bridge_id: 5,
            option: UnbindOption::SimManagedHotRemove,
            return_value: 0,
        };
        let mut buf = Vec::new();
        cmd.encode_input(&mut buf).unwrap();
        assert_eq!(buf, &[SUB_UNBIND_PORT, 7, 5, 1]);
    }
}
