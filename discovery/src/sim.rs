// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! In-memory switch firmware double for orchestrator tests.
//!
//! Commands execute synchronously when the command register is written:
//! the binding table, link records and TWI slave contents are plain test
//! state mutated and reported through the same wire layouts the firmware
//! uses. Binding-table queries replay scripted per-query operation
//! results so the post-bind/unbind settle loop can be exercised.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use gas::iface::AccessInterface;
use gas::mrpc::binding_info::encode_binding_table;
use gas::{
    CSR_REG_OFFSET, Gas, GasError, MRPC_COMMAND_REG_OFFSET,
    MRPC_COMMAND_RETURN_VALUE_REG_OFFSET, MRPC_INPUT_DATA_REG_OFFSET, MRPC_INPUT_DATA_REG_SIZE,
    MRPC_OUTPUT_DATA_REG_OFFSET, MRPC_STATUS_REG_OFFSET, NO_PORT_ASSIGNED, PARTITION_REG_OFFSET,
    PARTITION_REG_STRIDE, PHY_PORTS_NUMBER, SINGLE_FUNCTION_CSR_SIZE, TOP_SETTING_REG_OFFSET,
};

const REGISTER_FILE_SIZE: usize =
    CSR_REG_OFFSET + PHY_PORTS_NUMBER as usize * SINGLE_FUNCTION_CSR_SIZE;

const STATUS_DONE: u8 = 2;
const STATUS_FAILED: u8 = 0xff;

const CMD_TWI_ACCESS: u32 = 0x01;
const CMD_P2P_BINDING: u32 = 0x0c;
const CMD_LINK_STATUS: u32 = 0x1c;

const SUB_BIND: u8 = 0;
const SUB_UNBIND: u8 = 1;
const SUB_PORT_INFO: u8 = 2;
const SUB_PARTITION_INFO: u8 = 3;

const DEFAULT_BRIDGES: u8 = 8;

#[derive(Clone, Copy, Debug)]
struct BindingRow {
    phy_port_id: u8,
    partition_id: u8,
    logical_bridge_id: u8,
}

impl BindingRow {
    fn packed(&self, result: u8) -> u8 {
        let state: u8 = if self.partition_id == NO_PORT_ASSIGNED { 0 } else { 1 };
        (state << 4) | (result & 0x0f)
    }
}

#[derive(Default)]
struct SimState {
    regs: Vec<u8>,
    rows: Vec<BindingRow>,
    /// One per binding-table query; empty means `Success`.
    scripted_results: VecDeque<u8>,
    /// Logical bridges each partition exposes.
    bridges_per_partition: HashMap<u8, u8>,
    link_records: HashMap<u8, [u8; 10]>,
    /// (twi port, slave address, register offset) -> slave bytes.
    twi: HashMap<(u8, u16, u32), Vec<u8>>,
}

impl SimState {
    fn finish(&mut self, status: u8, return_value: u32, output: &[u8]) {
        self.regs[MRPC_OUTPUT_DATA_REG_OFFSET..MRPC_OUTPUT_DATA_REG_OFFSET + output.len()]
            .copy_from_slice(output);
        self.regs
            [MRPC_COMMAND_RETURN_VALUE_REG_OFFSET..MRPC_COMMAND_RETURN_VALUE_REG_OFFSET + 4]
            .copy_from_slice(&return_value.to_le_bytes());
        self.regs[MRPC_STATUS_REG_OFFSET..MRPC_STATUS_REG_OFFSET + 4]
            .copy_from_slice(&u32::from(status).to_le_bytes());
    }

    fn execute(&mut self, code: u32) {
        let input = self.regs
            [MRPC_INPUT_DATA_REG_OFFSET..MRPC_INPUT_DATA_REG_OFFSET + MRPC_INPUT_DATA_REG_SIZE]
            .to_vec();
        match code {
            CMD_TWI_ACCESS => self.run_twi(&input),
            CMD_P2P_BINDING => self.run_p2p(&input),
            CMD_LINK_STATUS => self.run_link_status(&input),
            _ => self.finish(STATUS_FAILED, 0, &[]),
        }
    }

    fn run_twi(&mut self, input: &[u8]) {
        let sub = input[0];
        let twi_port = input[1];
        let slave = u16::from_le_bytes([input[2], input[3]]);
        let offset = u32::from_le_bytes(input[4..8].try_into().unwrap());
        let len = usize::from(u16::from_le_bytes([input[8], input[9]]));
        if sub != 0 {
            self.finish(STATUS_DONE, 0, &[]);
            return;
        }
        match self.twi.get(&(twi_port, slave, offset)) {
            Some(bytes) => {
                let mut out = bytes.clone();
                out.resize(len, 0);
                self.finish(STATUS_DONE, 0, &out);
            }
            // no slave behind the channel
            None => self.finish(STATUS_FAILED, 0, &[]),
        }
    }

    fn run_p2p(&mut self, input: &[u8]) {
        match input[0] {
            SUB_BIND => {
                let row = BindingRow {
                    partition_id: input[1],
                    logical_bridge_id: input[2],
                    phy_port_id: input[3],
                };
                self.rows.retain(|r| r.phy_port_id != row.phy_port_id);
                self.rows.push(row);
                self.finish(STATUS_DONE, 0, &[]);
            }
            SUB_UNBIND => {
                let partition = input[1];
                let bridge = input[2];
                for row in &mut self.rows {
                    if row.partition_id == partition && row.logical_bridge_id == bridge {
                        row.partition_id = NO_PORT_ASSIGNED;
                        row.logical_bridge_id = NO_PORT_ASSIGNED;
                    }
                }
                self.finish(STATUS_DONE, 0, &[]);
            }
            SUB_PORT_INFO => {
                let selector = input[1];
                let rows: Vec<BindingRow> = if selector == NO_PORT_ASSIGNED {
                    self.rows.clone()
                } else {
                    let matched: Vec<BindingRow> = self
                        .rows
                        .iter()
                        .copied()
                        .filter(|r| r.phy_port_id == selector)
                        .collect();
                    if matched.is_empty() {
                        vec![BindingRow {
                            phy_port_id: selector,
                            partition_id: NO_PORT_ASSIGNED,
                            logical_bridge_id: NO_PORT_ASSIGNED,
                        }]
                    } else {
                        matched
                    }
                };
                let result = self.scripted_results.pop_front().unwrap_or(0);
                let entries: Vec<(u8, u8, u8, u8)> = rows
                    .iter()
                    .map(|r| {
                        (r.phy_port_id, r.partition_id, r.logical_bridge_id, r.packed(result))
                    })
                    .collect();
                let output = encode_binding_table(&entries);
                self.finish(STATUS_DONE, 0, &output);
            }
            SUB_PARTITION_INFO => {
                let partition = input[1];
                let count = self
                    .bridges_per_partition
                    .get(&partition)
                    .copied()
                    .unwrap_or(DEFAULT_BRIDGES);
                let result = self.scripted_results.pop_front().unwrap_or(0);
                let entries: Vec<(u8, u8, u8, u8)> = (0..count)
                    .map(|bridge| {
                        self.rows
                            .iter()
                            .find(|r| {
                                r.partition_id == partition && r.logical_bridge_id == bridge
                            })
                            .map_or(
                                (NO_PORT_ASSIGNED, partition, bridge, 0x0f),
                                |r| (r.phy_port_id, partition, bridge, r.packed(result)),
                            )
                    })
                    .collect();
                let output = encode_binding_table(&entries);
                self.finish(STATUS_DONE, 0, &output);
            }
            // SUB_COMMAND_DOES_NOT_EXIST
            _ => self.finish(STATUS_DONE, 9, &[]),
        }
    }

    fn run_link_status(&mut self, input: &[u8]) {
        let mask = u64::from_le_bytes(input[0..8].try_into().unwrap());
        let port = u8::try_from(mask.trailing_zeros()).unwrap_or(NO_PORT_ASSIGNED);
        // default record: port in Detect, link down
        let record = self.link_records.get(&port).copied().unwrap_or_else(|| {
            let mut rec = [0u8; 10];
            rec[0] = port;
            rec[1] = NO_PORT_ASSIGNED;
            rec[2] = NO_PORT_ASSIGNED;
            rec
        });
        self.finish(STATUS_DONE, 0, &record);
    }
}

/// The simulated switch. Shared as the [`Gas`] access interface while the
/// test keeps its own handle to mutate firmware state mid-test.
pub(crate) struct SwitchSim {
    state: Mutex<SimState>,
}

impl SwitchSim {
    pub(crate) fn new() -> Arc<SwitchSim> {
        Arc::new(SwitchSim {
            state: Mutex::new(SimState {
                regs: vec![0; REGISTER_FILE_SIZE],
                ..SimState::default()
            }),
        })
    }

    pub(crate) fn gas(self: &Arc<Self>) -> Gas {
        Gas::new(self.clone())
    }

    pub(crate) fn set_top(&self, part_num: u32, current_partition_id: u32) {
        let mut state = self.state.lock();
        state.regs[TOP_SETTING_REG_OFFSET..TOP_SETTING_REG_OFFSET + 4]
            .copy_from_slice(&part_num.to_le_bytes());
        state.regs[TOP_SETTING_REG_OFFSET + 4..TOP_SETTING_REG_OFFSET + 8]
            .copy_from_slice(&current_partition_id.to_le_bytes());
    }

    pub(crate) fn set_partition(&self, partition_id: u8, ports_number: u32, usp_inst_id: u32) {
        let mut state = self.state.lock();
        let base = PARTITION_REG_OFFSET + usize::from(partition_id) * PARTITION_REG_STRIDE;
        state.regs[base..base + 4].copy_from_slice(&1u32.to_le_bytes());
        state.regs[base + 4..base + 8].copy_from_slice(&1u32.to_le_bytes());
        state.regs[base + 8..base + 12].copy_from_slice(&ports_number.to_le_bytes());
        state.regs[base + 12..base + 16].copy_from_slice(&usp_inst_id.to_le_bytes());
    }

    pub(crate) fn add_binding(&self, phy_port_id: u8, partition_id: u8, logical_bridge_id: u8) {
        self.state.lock().rows.push(BindingRow {
            phy_port_id,
            partition_id,
            logical_bridge_id,
        });
    }

    pub(crate) fn script_results(&self, results: &[u8]) {
        self.state.lock().scripted_results.extend(results.iter().copied());
    }

    pub(crate) fn set_link(
        &self,
        phy_port_id: u8,
        partition_id: u8,
        neg_link_width: u8,
        link_rate: u8,
        ltssm_major: u8,
    ) {
        let record = [
            phy_port_id,
            partition_id,
            0,
            0,
            neg_link_width,
            neg_link_width,
            0,
            link_rate,
            ltssm_major,
            0,
        ];
        self.state.lock().link_records.insert(phy_port_id, record);
    }

    pub(crate) fn set_twi(&self, twi_port: u8, slave_addr: u16, offset: u32, bytes: &[u8]) {
        self.state
            .lock()
            .twi
            .insert((twi_port, slave_addr, offset), bytes.to_vec());
    }

    pub(crate) fn binding_of(&self, phy_port_id: u8) -> Option<(u8, u8)> {
        self.state
            .lock()
            .rows
            .iter()
            .find(|r| r.phy_port_id == phy_port_id && r.partition_id != NO_PORT_ASSIGNED)
            .map(|r| (r.partition_id, r.logical_bridge_id))
    }
}

impl AccessInterface for SwitchSim {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), GasError> {
        let state = self.state.lock();
        let end = offset + buf.len();
        if end > state.regs.len() {
            return Err(GasError::OutOfBounds {
                offset,
                len: buf.len(),
                size: state.regs.len(),
            });
        }
        buf.copy_from_slice(&state.regs[offset..end]);
        Ok(())
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<(), GasError> {
        let mut state = self.state.lock();
        let end = offset + data.len();
        if end > state.regs.len() {
            return Err(GasError::OutOfBounds {
                offset,
                len: data.len(),
                size: state.regs.len(),
            });
        }
        state.regs[offset..end].copy_from_slice(data);
        if offset == MRPC_COMMAND_REG_OFFSET && data.len() >= 4 {
            let code = u32::from_le_bytes(data[0..4].try_into().unwrap());
            state.execute(code);
        }
        Ok(())
    }

    fn size(&self) -> usize {
        REGISTER_FILE_SIZE
    }
}
