// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Physical-port link status query.
//!
//! Input is a single little-endian `u64` whose bit N selects physical port
//! N. Output is one 10-byte record for the lowest selected port:
//!
//! ```text
//! [0] physical port id        [5] negotiated link width
//! [1] partition id            [6] upstream-port flag
//! [2] logical bridge id       [7] link-up flag + link rate generation
//! [3] stack id / stack port   [8] LTSSM major state
//! [4] configured link width   [9] LTSSM minor state
//! ```

use crate::codec::{get_u8, put_u64_le};
use crate::mrpc::{CommandCode, MrpcCommand, expect_len};
use crate::{GasError, PHY_PORTS_NUMBER};

const OUTPUT_SIZE: usize = 10;

/// Input mask selecting every bound port.
pub const ALL_BOUND_PORTS: u64 = 0;
/// Input mask selecting every physical port.
pub const ALL_PORTS: u64 = u64::MAX;

/// LTSSM major states reported by the switch link training engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display, strum::EnumIs)]
#[repr(u8)]
pub enum LtssmMajorState {
    Detect = 0,
    Poll = 1,
    Config = 2,
    L0 = 3,
    Recovery = 4,
    Disable = 5,
    Loopback = 6,
    HotReset = 7,
    TxLos = 8,
    L1 = 9,
    L2 = 10,
}

impl LtssmMajorState {
    pub fn from_raw(raw: u8) -> Result<LtssmMajorState, GasError> {
        Ok(match raw {
            0 => LtssmMajorState::Detect,
            1 => LtssmMajorState::Poll,
            2 => LtssmMajorState::Config,
            3 => LtssmMajorState::L0,
            4 => LtssmMajorState::Recovery,
            5 => LtssmMajorState::Disable,
            6 => LtssmMajorState::Loopback,
            7 => LtssmMajorState::HotReset,
            8 => LtssmMajorState::TxLos,
            9 => LtssmMajorState::L1,
            10 => LtssmMajorState::L2,
            other => {
                return Err(GasError::InvalidField {
                    field: "ltssm_major_state",
                    value: u64::from(other),
                });
            }
        })
    }
}

/// PCIe generation encoded in the link rate field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
#[repr(u8)]
pub enum PcieGen {
    Gen1 = 1,
    Gen2 = 2,
    Gen3 = 3,
}

impl PcieGen {
    /// Transfer rate in GT/s.
    #[must_use]
    pub fn speed_gts(self) -> f64 {
        match self {
            PcieGen::Gen1 => 2.5,
            PcieGen::Gen2 => 5.0,
            PcieGen::Gen3 => 8.0,
        }
    }
}

/// Retrieves the link status record of one physical port.
#[derive(Debug, Default)]
pub struct LinkStatusRetrieve {
    /// Port selection bitmask, bit N = physical port N.
    pub input_data: u64,
    /// Command return value, valid after a `Done` execution.
    pub return_value: u32,
    pub port_id: u8,
    pub partition_id: u8,
    pub logical_bridge_id: u8,
    pub stack_id_port_id: u8,
    pub cfg_link_width: u8,
    pub neg_link_width: u8,
    pub ups_flag: u8,
    pub linkup_link_rate: u8,
    pub major: u8,
    pub minor: u8,
}

impl LinkStatusRetrieve {
    /// Query for a single physical port.
    pub fn for_port(phy_port_id: u8) -> Result<LinkStatusRetrieve, GasError> {
        if phy_port_id >= PHY_PORTS_NUMBER {
            return Err(GasError::InvalidField {
                field: "phy_port_id",
                value: u64::from(phy_port_id),
            });
        }
        Ok(LinkStatusRetrieve {
            input_data: 1u64 << phy_port_id,
            ..Default::default()
        })
    }

    /// Whether the port trained to L0.
    #[must_use]
    pub fn is_link_up(&self) -> bool {
        matches!(LtssmMajorState::from_raw(self.major), Ok(LtssmMajorState::L0))
    }

    /// PCIe generation of the trained link, if the rate field is sane.
    #[must_use]
    pub fn link_gen(&self) -> Option<PcieGen> {
        match self.linkup_link_rate {
            1 => Some(PcieGen::Gen1),
            2 => Some(PcieGen::Gen2),
            3 => Some(PcieGen::Gen3),
            _ => None,
        }
    }

    /// Link speed in GT/s, zero when the rate field is unknown.
    #[must_use]
    pub fn speed_gts(&self) -> f64 {
        self.link_gen().map_or(0.0, PcieGen::speed_gts)
    }
}

impl MrpcCommand for LinkStatusRetrieve {
    const CODE: CommandCode = CommandCode::LinkStatusRetrieve;

    fn encode_input(&self, out: &mut Vec<u8>) -> Result<(), GasError> {
        put_u64_le(out, 0, self.input_data);
        Ok(())
    }

    fn output_len(&self) -> usize {
        OUTPUT_SIZE
    }

    fn decode_output(&mut self, return_value: u32, output: &[u8]) -> Result<(), GasError> {
        expect_len(output, OUTPUT_SIZE)?;
        self.return_value = return_value;
        self.port_id = get_u8(output, 0)?;
        self.partition_id = get_u8(output, 1)?;
        self.logical_bridge_id = get_u8(output, 2)?;
        self.stack_id_port_id = get_u8(output, 3)?;
        self.cfg_link_width = get_u8(output, 4)?;
        self.neg_link_width = get_u8(output, 5)?;
        self.ups_flag = get_u8(output, 6)?;
        self.linkup_link_rate = get_u8(output, 7)?;
        self.major = get_u8(output, 8)?;
        self.minor = get_u8(output, 9)?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn input_is_a_little_endian_port_mask() {
        let cmd = LinkStatusRetrieve::for_port(33).unwrap();
        let mut input = Vec::new();
        cmd.encode_input(&mut input).unwrap();
        assert_eq!(input.len(), 8);
        assert_eq!(u64::from_le_bytes(input.try_into().unwrap()), 1u64 << 33);
        assert!(LinkStatusRetrieve::for_port(48).is_err());
    }

    #[test]
    fn decodes_the_ten_byte_record() {
        let mut cmd = LinkStatusRetrieve::for_port(1).unwrap();
        cmd.decode_output(0, &[1, 1, 1, 0, 4, 4, 1, 1, 3, 0]).unwrap();
        assert_eq!(cmd.port_id, 1);
        assert_eq!(cmd.cfg_link_width, 4);
        assert_eq!(cmd.neg_link_width, 4);
        assert!(cmd.is_link_up());
        assert_eq!(cmd.link_gen(), Some(PcieGen::Gen1));
        assert_eq!(cmd.speed_gts(), 2.5);

        cmd.decode_output(0, &[1, 1, 1, 0, 4, 0, 1, 0, 0, 0]).unwrap();
        assert!(!cmd.is_link_up());
        assert_eq!(cmd.link_gen(), None);
    }

    #[test]
    fn short_record_is_rejected() {
        let mut cmd = LinkStatusRetrieve::default();
        assert!(matches!(
            cmd.decode_output(0, &[1, 2, 3]),
            Err(GasError::ShortResponse { .. })
        ));
    }
}
