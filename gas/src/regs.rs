// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! The per-switch GAS handle: MRPC command execution and direct reads of
//! the top-settings, partition and CSR register groups.

use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::codec::get_u32_le;
use crate::iface::SharedInterface;
use crate::mrpc::{CommandStatus, MrpcCommand};
use crate::{
    CSR_REG_OFFSET, GasError, MRPC_COMMAND_REG_OFFSET, MRPC_COMMAND_RETURN_VALUE_REG_OFFSET,
    MRPC_INPUT_DATA_REG_OFFSET, MRPC_INPUT_DATA_REG_SIZE, MRPC_OUTPUT_DATA_REG_OFFSET,
    MRPC_OUTPUT_DATA_REG_SIZE, MRPC_STATUS_REG_OFFSET, PARTITION_REG_OFFSET, PARTITION_REG_STRIDE,
    SINGLE_FUNCTION_CSR_SIZE, TOP_SETTING_REG_OFFSET,
};

/// Settling time between writing the command code and the first status read.
const COMMAND_SETTLE_TIME: Duration = Duration::from_millis(10);
/// Interval between status reads while the command is in progress.
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Status reads before an in-progress command is reported as stuck.
const STATUS_POLL_LIMIT: u32 = 1000;
/// Re-reads of a `Failed` status before it is accepted as terminal.
const FAILED_STATUS_RETRIES: u32 = 3;
/// Delay before the first `Failed` re-read; grows by this step per retry.
const FAILED_RETRY_BASE_DELAY: Duration = Duration::from_millis(20);
const FAILED_RETRY_DELAY_STEP: Duration = Duration::from_millis(50);

/// Decoded top-settings register group.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TopSettings {
    /// Number of partitions configured on the switch.
    pub part_num: u32,
    /// Partition id of the management partition this agent runs in.
    pub current_partition_id: u32,
}

/// Instance id reported when a partition has no upstream port function.
pub const INVALID_INSTANCE_ID: u32 = 0xffff_ffff;

/// Decoded per-partition configuration registers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PartitionConfig {
    pub status: u32,
    pub state: u32,
    /// Number of ports in the partition, the upstream port included.
    pub ports_number: u32,
    /// CSR instance id of the partition's upstream port function.
    pub usp_inst_id: u32,
}

impl PartitionConfig {
    /// Whether the partition reports a readable upstream port function.
    #[must_use]
    pub fn has_usp_function(&self) -> bool {
        self.usp_inst_id != INVALID_INSTANCE_ID
    }
}

/// Handle to one switch register file.
///
/// At most one MRPC command is in flight per register file; the whole
/// submit/poll/read sequence holds `mrpc_lock`. The three register-group
/// read paths hold their own locks so they never wait on a slow command.
pub struct Gas {
    iface: SharedInterface,
    mrpc_lock: Mutex<()>,
    top_lock: Mutex<()>,
    partition_lock: Mutex<()>,
    csr_lock: Mutex<()>,
}

impl Gas {
    #[must_use]
    pub fn new(iface: SharedInterface) -> Gas {
        Gas {
            iface,
            mrpc_lock: Mutex::new(()),
            top_lock: Mutex::new(()),
            partition_lock: Mutex::new(()),
            csr_lock: Mutex::new(()),
        }
    }

    /// Executes `cmd` and returns the terminal status register value.
    ///
    /// The command's output is decoded only when the status is `Done`; on
    /// any other terminal status the command's output fields are untouched.
    /// A `Failed` status is re-read up to three times with growing delays
    /// before it is accepted, since firmware transiently reports failure
    /// while switching partitions.
    pub fn execute_cmd<C: MrpcCommand>(&self, cmd: &mut C) -> Result<CommandStatus, GasError> {
        let mut input = Vec::new();
        cmd.encode_input(&mut input)?;
        if input.len() > MRPC_INPUT_DATA_REG_SIZE {
            return Err(GasError::InputTooLarge {
                len: input.len(),
                max: MRPC_INPUT_DATA_REG_SIZE,
            });
        }
        let output_len = cmd.output_len();
        if output_len > MRPC_OUTPUT_DATA_REG_SIZE {
            return Err(GasError::OutputTooLarge {
                len: output_len,
                max: MRPC_OUTPUT_DATA_REG_SIZE,
            });
        }

        let code = C::CODE as u32;
        let _guard = self.mrpc_lock.lock();

        self.iface.write(MRPC_INPUT_DATA_REG_OFFSET, &input)?;
        self.iface.write(MRPC_COMMAND_REG_OFFSET, &code.to_le_bytes())?;
        trace!(code, input_len = input.len(), "MRPC command submitted");

        thread::sleep(COMMAND_SETTLE_TIME);
        let status = self.wait_for_terminal_status(code)?;
        if !status.is_done() {
            return Ok(status);
        }

        let mut raw_ret = [0u8; 4];
        self.iface.read(MRPC_COMMAND_RETURN_VALUE_REG_OFFSET, &mut raw_ret)?;
        let return_value = u32::from_le_bytes(raw_ret);

        let mut output = vec![0u8; output_len];
        self.iface.read(MRPC_OUTPUT_DATA_REG_OFFSET, &mut output)?;
        cmd.decode_output(return_value, &output)?;
        trace!(code, return_value, "MRPC command done");
        Ok(CommandStatus::Done)
    }

    /// Executes `cmd` and maps any non-`Done` terminal status to an error.
    pub fn run<C: MrpcCommand>(&self, cmd: &mut C) -> Result<(), GasError> {
        match self.execute_cmd(cmd)? {
            CommandStatus::Done => Ok(()),
            status => Err(GasError::CommandFailed {
                code: C::CODE as u32,
                status,
            }),
        }
    }

    fn read_status(&self) -> Result<CommandStatus, GasError> {
        let mut raw = [0u8; 4];
        self.iface.read(MRPC_STATUS_REG_OFFSET, &mut raw)?;
        Ok(CommandStatus::from_raw(raw[0]))
    }

    fn wait_for_terminal_status(&self, code: u32) -> Result<CommandStatus, GasError> {
        let mut polls = 0;
        loop {
            match self.read_status()? {
                CommandStatus::InProgress => {
                    polls += 1;
                    if polls >= STATUS_POLL_LIMIT {
                        warn!(code, "MRPC command stuck in progress");
                        return Ok(CommandStatus::InProgress);
                    }
                    thread::sleep(STATUS_POLL_INTERVAL);
                }
                CommandStatus::Failed => {
                    if let Some(status) = self.reread_failed_status(code)? {
                        if status.is_in_progress() {
                            continue;
                        }
                        return Ok(status);
                    }
                    return Ok(CommandStatus::Failed);
                }
                status => return Ok(status),
            }
        }
    }

    /// Re-reads a `Failed` status register. Returns the first non-`Failed`
    /// value seen, or `None` when every retry still read `Failed`.
    fn reread_failed_status(&self, code: u32) -> Result<Option<CommandStatus>, GasError> {
        let mut delay = FAILED_RETRY_BASE_DELAY;
        for retry in 1..=FAILED_STATUS_RETRIES {
            thread::sleep(delay);
            delay += FAILED_RETRY_DELAY_STEP;
            let status = self.read_status()?;
            debug!(code, retry, %status, "failed status re-read");
            if !status.is_failed() {
                return Ok(Some(status));
            }
        }
        Ok(None)
    }

    /// Reads the top-settings register group.
    pub fn read_top(&self) -> Result<TopSettings, GasError> {
        let _guard = self.top_lock.lock();
        let mut raw = [0u8; 8];
        self.iface.read(TOP_SETTING_REG_OFFSET, &mut raw)?;
        Ok(TopSettings {
            part_num: get_u32_le(&raw, 0)?,
            current_partition_id: get_u32_le(&raw, 4)?,
        })
    }

    /// Reads the configuration registers of one partition.
    pub fn read_partition(&self, partition_id: u8) -> Result<PartitionConfig, GasError> {
        let _guard = self.partition_lock.lock();
        let base = PARTITION_REG_OFFSET + usize::from(partition_id) * PARTITION_REG_STRIDE;
        let mut raw = [0u8; 16];
        self.iface.read(base, &mut raw)?;
        Ok(PartitionConfig {
            status: get_u32_le(&raw, 0)?,
            state: get_u32_le(&raw, 4)?,
            ports_number: get_u32_le(&raw, 8)?,
            usp_inst_id: get_u32_le(&raw, 12)?,
        })
    }

    /// Reads `buf.len()` bytes from the PCIe configuration space of the CSR
    /// instance `instance_id`, starting at `offset` within that space.
    pub fn read_csr(&self, instance_id: u32, offset: usize, buf: &mut [u8]) -> Result<(), GasError> {
        let _guard = self.csr_lock.lock();
        let base = CSR_REG_OFFSET + instance_id as usize * SINGLE_FUNCTION_CSR_SIZE;
        self.iface.read(base + offset, buf)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::iface::{AccessInterface, InMemoryRegisterFile};
    use crate::mrpc::{LinkStatusRetrieve, PortBindingInfo};
    use crate::mrpc::binding_info::encode_binding_table;

    /// Register file whose status register replays a scripted sequence,
    /// repeating the last value. Counts status reads.
    struct ScriptedStatus {
        inner: InMemoryRegisterFile,
        statuses: Vec<u8>,
        status_reads: AtomicUsize,
    }

    impl ScriptedStatus {
        fn new(statuses: Vec<u8>) -> Self {
            ScriptedStatus {
                inner: InMemoryRegisterFile::new(CSR_REG_OFFSET),
                statuses,
                status_reads: AtomicUsize::new(0),
            }
        }
    }

    impl AccessInterface for ScriptedStatus {
        fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), GasError> {
            if offset == MRPC_STATUS_REG_OFFSET {
                let n = self.status_reads.fetch_add(1, Ordering::SeqCst);
                let value = *self.statuses.get(n).unwrap_or(
                    self.statuses.last().expect("script must not be empty"),
                );
                buf.fill(0);
                buf[0] = value;
                return Ok(());
            }
            self.inner.read(offset, buf)
        }

        fn write(&self, offset: usize, data: &[u8]) -> Result<(), GasError> {
            self.inner.write(offset, data)
        }

        fn size(&self) -> usize {
            self.inner.size()
        }
    }

    #[test]
    fn done_command_reads_return_value_and_output() {
        let file = ScriptedStatus::new(vec![2]);
        file.inner.preload(MRPC_COMMAND_RETURN_VALUE_REG_OFFSET, &[0, 0, 0, 0]);
        file.inner.preload(
            MRPC_OUTPUT_DATA_REG_OFFSET,
            &encode_binding_table(&[(4, 1, 2, 0x10)]),
        );

        let file = Arc::new(file);
        let gas = Gas::new(file.clone());
        let mut cmd = PortBindingInfo::all_ports();
        let status = gas.execute_cmd(&mut cmd).unwrap();

        assert!(status.is_done());
        assert_eq!(cmd.entries.len(), 1);
        assert_eq!(cmd.entries[0].phy_port_id, 4);
        // The input record and command code landed in their regions.
        assert_eq!(file.inner.snapshot(MRPC_INPUT_DATA_REG_OFFSET, 2), vec![2, 0xff]);
        assert_eq!(
            file.inner.snapshot(MRPC_COMMAND_REG_OFFSET, 4),
            0x0cu32.to_le_bytes().to_vec()
        );
    }

    #[test]
    fn in_progress_then_done_is_polled_through() {
        let file = Arc::new(ScriptedStatus::new(vec![1, 1, 1, 2]));
        let gas = Gas::new(file.clone());
        let mut cmd = LinkStatusRetrieve::for_port(0).unwrap();
        let status = gas.execute_cmd(&mut cmd).unwrap();
        assert!(status.is_done());
        assert_eq!(file.status_reads.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn stuck_failed_status_is_reread_exactly_three_times() {
        let file = Arc::new(ScriptedStatus::new(vec![0xff]));
        let gas = Gas::new(file.clone());
        let mut cmd = LinkStatusRetrieve::for_port(0).unwrap();
        let status = gas.execute_cmd(&mut cmd).unwrap();
        assert!(status.is_failed());
        // One initial read plus three retries.
        assert_eq!(file.status_reads.load(Ordering::SeqCst), 4);
        assert!(gas.run(&mut cmd).is_err());
    }

    #[test]
    fn transient_failed_status_recovers_to_done() {
        let file = Arc::new(ScriptedStatus::new(vec![0xff, 0xff, 2]));
        let gas = Gas::new(file.clone());
        let mut cmd = LinkStatusRetrieve::for_port(0).unwrap();
        let status = gas.execute_cmd(&mut cmd).unwrap();
        assert!(status.is_done());
        assert_eq!(file.status_reads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn top_and_partition_groups_decode_little_endian_words() {
        let file = InMemoryRegisterFile::new(CSR_REG_OFFSET);
        file.preload(TOP_SETTING_REG_OFFSET, &[3, 0, 0, 0, 1, 0, 0, 0]);
        let base = PARTITION_REG_OFFSET + 2 * PARTITION_REG_STRIDE;
        file.preload(base + 8, &[5, 0, 0, 0, 7, 0, 0, 0]);

        let gas = Gas::new(Arc::new(file));
        let top = gas.read_top().unwrap();
        assert_eq!(top.part_num, 3);
        assert_eq!(top.current_partition_id, 1);

        let partition = gas.read_partition(2).unwrap();
        assert_eq!(partition.ports_number, 5);
        assert_eq!(partition.usp_inst_id, 7);
    }
}
