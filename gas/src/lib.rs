// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Global Address Space (GAS) register access and the MRPC command protocol.
//!
//! The managed PCIe switch exposes its management interface as a memory-mapped
//! register file (its PCI `resource0`). This crate provides:
//!
//! - [`AccessInterface`]: byte-level, bounds-checked access to that register
//!   file, with a [`MemoryMappedFile`] implementation for real hardware and an
//!   in-memory implementation for tests.
//! - [`mrpc`]: fixed-layout MRPC commands (bind/unbind, binding info, link
//!   status, TWI side-channel access) with explicit little-endian
//!   encode/decode at documented byte offsets.
//! - [`Gas`]: the per-switch handle that executes MRPC commands through the
//!   submit/poll/retry cycle and offers direct reads of the top-settings,
//!   partition and CSR register groups.
//!
//! A [`Gas`] handle is constructed once per physical switch and shared by the
//! discovery orchestrator and the port monitor. At most one MRPC command is in
//! flight per register file: the whole submit/poll/read sequence runs under a
//! single mutex. The top-settings, partition and CSR read paths each use their
//! own mutex so an unrelated slow access does not serialize them.

#![deny(clippy::all, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub use crate::iface::{AccessInterface, MemoryMappedFile, SharedInterface};
pub use crate::regs::{Gas, INVALID_INSTANCE_ID, PartitionConfig, TopSettings};

pub mod codec;
pub mod iface;
pub mod mrpc;
pub mod regs;

/// Number of physical ports on the supported switch family.
pub const PHY_PORTS_NUMBER: u8 = 48;

/// Physical port id value meaning "no port assigned" in binding tables.
pub const NO_PORT_ASSIGNED: u8 = 0xff;

/// MRPC input data region offset.
pub const MRPC_INPUT_DATA_REG_OFFSET: usize = 0x0000_0000;
/// MRPC output data region offset.
pub const MRPC_OUTPUT_DATA_REG_OFFSET: usize = 0x0000_0400;
/// MRPC command (run) register offset.
pub const MRPC_COMMAND_REG_OFFSET: usize = 0x0000_0800;
/// MRPC status register offset.
pub const MRPC_STATUS_REG_OFFSET: usize = 0x0000_0804;
/// MRPC command return value register offset.
pub const MRPC_COMMAND_RETURN_VALUE_REG_OFFSET: usize = 0x0000_0808;
/// Top-settings register group offset.
pub const TOP_SETTING_REG_OFFSET: usize = 0x0000_1000;
/// Partition register group offset.
pub const PARTITION_REG_OFFSET: usize = 0x0000_4000;
/// PCIe configuration space register group offset.
pub const CSR_REG_OFFSET: usize = 0x0013_4000;

/// Usable size of the MRPC input data region.
pub const MRPC_INPUT_DATA_REG_SIZE: usize = MRPC_OUTPUT_DATA_REG_OFFSET - MRPC_INPUT_DATA_REG_OFFSET;
/// Usable size of the MRPC output data region.
pub const MRPC_OUTPUT_DATA_REG_SIZE: usize = MRPC_COMMAND_REG_OFFSET - MRPC_OUTPUT_DATA_REG_OFFSET;
/// Per-partition stride inside the partition register group.
pub const PARTITION_REG_STRIDE: usize = 24 + 47 * 4;
/// Per-function PCIe configuration space size inside the CSR group.
pub const SINGLE_FUNCTION_CSR_SIZE: usize = 4 * 1024;

/// Errors raised by register access and MRPC command execution.
#[derive(Debug, thiserror::Error)]
pub enum GasError {
    /// Opening or mapping the device memory file failed.
    #[error("failed to map register file {path}: {source}")]
    Map {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// An access fell outside the mapped register file.
    #[error("register access out of bounds: offset {offset:#x} len {len} (file size {size:#x})")]
    OutOfBounds { offset: usize, len: usize, size: usize },
    /// Command input does not fit the MRPC input data region.
    #[error("command input of {len} bytes exceeds the MRPC input region ({max} bytes)")]
    InputTooLarge { len: usize, max: usize },
    /// Requested output does not fit the MRPC output data region.
    #[error("command output of {len} bytes exceeds the MRPC output region ({max} bytes)")]
    OutputTooLarge { len: usize, max: usize },
    /// The command never reached `Done`; carries the terminal status.
    #[error("MRPC command {code:#x} ended with status {status}")]
    CommandFailed { code: u32, status: mrpc::CommandStatus },
    /// The output region held fewer bytes than the command's layout requires.
    #[error("short MRPC response: expected {expected} bytes, region holds {actual}")]
    ShortResponse { expected: usize, actual: usize },
    /// A decoded field held a value the protocol does not define.
    #[error("invalid field {field}: value {value:#x}")]
    InvalidField { field: &'static str, value: u64 },
}
