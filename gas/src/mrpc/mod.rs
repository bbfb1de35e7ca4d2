// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! MRPC command encode/decode.
//!
//! An MRPC command is executed by writing its input record into the input
//! data region, writing its command code into the command register, and
//! polling the status register until the switch firmware reports a terminal
//! status. On `Done`, a 32-bit command return value and a command-specific
//! output record become readable. [`crate::Gas::execute_cmd`] drives that
//! cycle; the types here only describe the fixed wire layouts.

use crate::GasError;
use crate::codec::put_u8;

pub use crate::mrpc::bind::{BindPort, UnbindOption, UnbindPort};
pub use crate::mrpc::binding_info::{
    BindingEntry, BindingState, OperationResult, PartitionBindingInfo, PortBindingInfo,
};
pub use crate::mrpc::link_status::LinkStatusRetrieve;
pub use crate::mrpc::twi::{TwiRead, TwiWrite};

pub mod bind;
pub mod binding_info;
pub mod link_status;
pub mod twi;

/// MRPC command codes understood by the switch firmware.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
#[repr(u32)]
pub enum CommandCode {
    TwiAccess = 0x0000_0001,
    PortPartitionP2pBinding = 0x0000_000c,
    LinkStatusRetrieve = 0x0000_001c,
}

/// Status register values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display, strum::EnumIs)]
pub enum CommandStatus {
    Idle,
    InProgress,
    Done,
    Failed,
}

impl CommandStatus {
    /// Decodes the status register byte. Undefined values are treated as
    /// `Failed` so they feed the same retry path as an explicit failure.
    #[must_use]
    pub fn from_raw(raw: u8) -> CommandStatus {
        match raw {
            0 => CommandStatus::Idle,
            1 => CommandStatus::InProgress,
            2 => CommandStatus::Done,
            _ => CommandStatus::Failed,
        }
    }
}

/// Return values of the port/partition P2P binding command family.
pub mod p2p_result {
    pub const COMMAND_SUCCEED: u32 = 0x0000_0000;
    pub const PHY_PORT_ALREADY_BOUND: u32 = 0x0000_0001;
    pub const BRIDGE_INSTANCE_ALREADY_BOUND: u32 = 0x0000_0002;
    pub const PARTITION_DOES_NOT_EXIST: u32 = 0x0000_0003;
    pub const PHY_PORT_DOES_NOT_EXIST: u32 = 0x0000_0004;
    pub const PHY_PORT_DISABLED: u32 = 0x0000_0005;
    pub const NO_BRIDGE_INSTANCE: u32 = 0x0000_0006;
    pub const BIND_UNBIND_IN_PROGRESS: u32 = 0x0000_0007;
    pub const TARGET_IS_USP: u32 = 0x0000_0008;
    pub const SUB_COMMAND_DOES_NOT_EXIST: u32 = 0x0000_0009;
    pub const PHY_PORT_LINK_ACTIVE: u32 = 0x0000_000a;
    pub const BRIDGE_NOT_BOUND_TO_PHY_PORT: u32 = 0x0000_000b;
    pub const INVALID_UNBIND_OPTION: u32 = 0x0000_000c;

    /// Human-readable name for operator-facing logs and errors.
    #[must_use]
    pub fn describe(value: u32) -> &'static str {
        match value {
            COMMAND_SUCCEED => "command succeeded",
            PHY_PORT_ALREADY_BOUND => "physical port already bound",
            BRIDGE_INSTANCE_ALREADY_BOUND => "logical bridge binding instance already bound",
            PARTITION_DOES_NOT_EXIST => "partition does not exist",
            PHY_PORT_DOES_NOT_EXIST => "physical port does not exist",
            PHY_PORT_DISABLED => "physical port disabled",
            NO_BRIDGE_INSTANCE => "no logical bridge binding instance",
            BIND_UNBIND_IN_PROGRESS => "bind/unbind in progress",
            TARGET_IS_USP => "bind/unbind target is an upstream port",
            SUB_COMMAND_DOES_NOT_EXIST => "sub-command does not exist",
            PHY_PORT_LINK_ACTIVE => "physical port link active",
            BRIDGE_NOT_BOUND_TO_PHY_PORT => "bridge instance not bound to physical port",
            INVALID_UNBIND_OPTION => "invalid unbind option",
            _ => "unknown return value",
        }
    }
}

/// A fixed-layout MRPC command: input record in, return value plus output
/// record out.
pub trait MrpcCommand {
    /// Command code written to the command register to trigger execution.
    const CODE: CommandCode;

    /// Serializes the input record into `out` (offset 0 = start of the MRPC
    /// input data region).
    fn encode_input(&self, out: &mut Vec<u8>) -> Result<(), GasError>;

    /// Number of output-region bytes this command's layout requires.
    fn output_len(&self) -> usize;

    /// Decodes the command return value and the output record.
    fn decode_output(&mut self, return_value: u32, output: &[u8]) -> Result<(), GasError>;
}

pub(crate) fn encode_sub_command(out: &mut Vec<u8>, sub: u8) {
    put_u8(out, 0, sub);
}

pub(crate) fn reject_oversized(len: usize, max: usize) -> Result<(), GasError> {
    if len > max {
        return Err(GasError::InputTooLarge { len, max });
    }
    Ok(())
}

pub(crate) fn expect_len(output: &[u8], expected: usize) -> Result<(), GasError> {
    if output.len() < expected {
        return Err(GasError::ShortResponse {
            expected,
            actual: output.len(),
        });
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn undefined_status_bytes_decode_as_failed() {
        assert_eq!(CommandStatus::from_raw(0), CommandStatus::Idle);
        assert_eq!(CommandStatus::from_raw(1), CommandStatus::InProgress);
        assert_eq!(CommandStatus::from_raw(2), CommandStatus::Done);
        assert_eq!(CommandStatus::from_raw(0xff), CommandStatus::Failed);
        assert_eq!(CommandStatus::from_raw(0x17), CommandStatus::Failed);
    }

    #[test]
    fn zero_length_responses_are_valid() {
        assert!(expect_len(&[], 0).is_ok());
        assert!(matches!(
            expect_len(&[], 1),
            Err(GasError::ShortResponse {
                expected: 1,
                actual: 0
            })
        ));
    }

    #[test]
    fn p2p_results_have_names() {
        assert_eq!(p2p_result::describe(0), "command succeeded");
        assert_eq!(p2p_result::describe(0xdead_beef), "unknown return value");
    }
}
