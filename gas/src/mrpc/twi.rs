// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! TWI (I2C) access through the switch firmware.
//!
//! Both directions share a 12-byte input header:
//!
//! ```text
//! [0]     sub-command (0 = read, 1 = write)
//! [1]     TWI port
//! [2..4]  slave address, u16 LE
//! [4..8]  register offset, u32 LE
//! [8..10] byte count, u16 LE
//! [10]    slave address size (0 = 7-bit, 1 = 10-bit)
//! [11]    offset size in bytes (1, 2 or 4)
//! ```
//!
//! A write appends its payload after the header; a read returns the
//! requested bytes at the start of the output region.

use crate::codec::{put_u8, put_u16_le, put_u32_le};
use crate::mrpc::{CommandCode, MrpcCommand, expect_len, reject_oversized};
use crate::{GasError, MRPC_INPUT_DATA_REG_SIZE, MRPC_OUTPUT_DATA_REG_SIZE};

const SUB_TWI_READ: u8 = 0;
const SUB_TWI_WRITE: u8 = 1;

const HEADER_SIZE: usize = 12;

/// Largest payload a single TWI write can carry.
pub const TWI_WRITE_DATA_MAX_SIZE: usize = MRPC_INPUT_DATA_REG_SIZE - HEADER_SIZE;
/// Largest payload a single TWI read can return.
pub const TWI_READ_DATA_MAX_SIZE: usize = MRPC_OUTPUT_DATA_REG_SIZE;

/// Well-known TWI slave addresses on the switch management bus.
pub mod twi_device {
    pub const SEEPROM: u16 = 0x00a0;
    pub const NVME_VPD: u16 = 0x00a6;
    pub const SMART: u16 = 0x00d4;
    pub const DRIVE_PRESENCE: u16 = 0x0040;
}

/// TWI port numbers of the drive-presence expanders. Each expander is read
/// at register offset 0 on its own TWI port.
pub mod presence_port {
    /// Physical ports 0 to 14.
    pub const PORTS_0_14: u8 = 0x2;
    /// Physical ports 32 to 46.
    pub const PORTS_32_46: u8 = 0x1;
}

/// Slave address width selector.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(u8)]
pub enum TwiSlaveAddressSize {
    #[default]
    Address7Bit = 0,
    Address10Bit = 1,
}

/// Register offset width selector.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(u8)]
pub enum TwiOffsetSize {
    #[default]
    Offset8Bit = 1,
    Offset16Bit = 2,
    Offset32Bit = 4,
}

#[derive(Clone, Copy, Debug, Default)]
struct TwiHeader {
    twi_port: u8,
    slave_addr: u16,
    offset: u32,
    bytes_num: u16,
    slave_addr_size: TwiSlaveAddressSize,
    offset_size: TwiOffsetSize,
}

impl TwiHeader {
    fn encode(&self, out: &mut Vec<u8>, sub: u8) {
        put_u8(out, 0, sub);
        put_u8(out, 1, self.twi_port);
        put_u16_le(out, 2, self.slave_addr);
        put_u32_le(out, 4, self.offset);
        put_u16_le(out, 8, self.bytes_num);
        put_u8(out, 10, self.slave_addr_size as u8);
        put_u8(out, 11, self.offset_size as u8);
    }
}

/// Reads bytes from a TWI slave register.
#[derive(Debug, Default)]
pub struct TwiRead {
    header: TwiHeader,
    /// Command return value, valid after a `Done` execution.
    pub return_value: u32,
    /// Bytes returned by the slave.
    pub data: Vec<u8>,
}

impl TwiRead {
    #[must_use]
    pub fn new(twi_port: u8, slave_addr: u16, offset: u32, bytes_num: u16) -> TwiRead {
        TwiRead {
            header: TwiHeader {
                twi_port,
                slave_addr,
                offset,
                bytes_num,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_offset_size(mut self, offset_size: TwiOffsetSize) -> TwiRead {
        self.header.offset_size = offset_size;
        self
    }
}

impl MrpcCommand for TwiRead {
    const CODE: CommandCode = CommandCode::TwiAccess;

    fn encode_input(&self, out: &mut Vec<u8>) -> Result<(), GasError> {
        let len = usize::from(self.header.bytes_num);
        if len > TWI_READ_DATA_MAX_SIZE {
            return Err(GasError::OutputTooLarge {
                len,
                max: TWI_READ_DATA_MAX_SIZE,
            });
        }
        self.header.encode(out, SUB_TWI_READ);
        Ok(())
    }

    fn output_len(&self) -> usize {
        usize::from(self.header.bytes_num)
    }

    fn decode_output(&mut self, return_value: u32, output: &[u8]) -> Result<(), GasError> {
        let len = usize::from(self.header.bytes_num);
        expect_len(output, len)?;
        self.return_value = return_value;
        self.data = output[..len].to_vec();
        Ok(())
    }
}

/// Writes bytes to a TWI slave register.
#[derive(Debug, Default)]
pub struct TwiWrite {
    header: TwiHeader,
    data: Vec<u8>,
    /// Command return value, valid after a `Done` execution.
    pub return_value: u32,
}

impl TwiWrite {
    #[must_use]
    pub fn new(twi_port: u8, slave_addr: u16, offset: u32, data: Vec<u8>) -> TwiWrite {
        TwiWrite {
            header: TwiHeader {
                twi_port,
                slave_addr,
                offset,
                bytes_num: u16::try_from(data.len()).unwrap_or(u16::MAX),
                ..Default::default()
            },
            data,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_offset_size(mut self, offset_size: TwiOffsetSize) -> TwiWrite {
        self.header.offset_size = offset_size;
        self
    }
}

impl MrpcCommand for TwiWrite {
    const CODE: CommandCode = CommandCode::TwiAccess;

    fn encode_input(&self, out: &mut Vec<u8>) -> Result<(), GasError> {
        reject_oversized(self.data.len(), TWI_WRITE_DATA_MAX_SIZE)?;
        self.header.encode(out, SUB_TWI_WRITE);
        for (i, byte) in self.data.iter().enumerate() {
            put_u8(out, HEADER_SIZE + i, *byte);
        }
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
    use pretty_assertions::assert_eq;

    #[test]
    fn write_header_and_payload_layout() {
        let cmd = TwiWrite::new(0, 0x00a0, 0, vec![0x01, 0x02, 0x03, 0x04]);
        let mut input = Vec::new();
        cmd.encode_input(&mut input).unwrap();
        assert_eq!(
            input,
            vec![
                1, 0, // write to TWI port 0
                0xa0, 0x00, // slave address
                0, 0, 0, 0, // offset
                4, 0, // byte count
                0, 1, // 7-bit address, 8-bit offset
                0x01, 0x02, 0x03, 0x04,
            ]
        );
    }

    #[test]
    fn read_header_layout_and_decode() {
        let mut cmd = TwiRead::new(9, twi_device::DRIVE_PRESENCE, 0x02, 1)
            .with_offset_size(TwiOffsetSize::Offset16Bit);
        let mut input = Vec::new();
        cmd.encode_input(&mut input).unwrap();
        assert_eq!(input.len(), 12);
        assert_eq!(input[0], 0);
        assert_eq!(input[1], 9);
        assert_eq!(&input[2..4], &[0x40, 0x00]);
        assert_eq!(&input[4..8], &[0x02, 0x00, 0x00, 0x00]);
        assert_eq!(input[11], 2);

        cmd.decode_output(0, &[0x5a]).unwrap();
        assert_eq!(cmd.data, vec![0x5a]);
    }

    #[test]
    fn presence_expander_constants_select_the_twi_port() {
        for port in [presence_port::PORTS_0_14, presence_port::PORTS_32_46] {
            let cmd = TwiRead::new(port, twi_device::DRIVE_PRESENCE, 0, 1);
            let mut input = Vec::new();
            cmd.encode_input(&mut input).unwrap();
            assert_eq!(input[1], port);
            assert_eq!(&input[4..8], &[0, 0, 0, 0]);
        }
    }

    #[test]
    fn oversized_transfers_are_rejected() {
        let cmd = TwiWrite::new(0, 0x00a0, 0, vec![0u8; TWI_WRITE_DATA_MAX_SIZE + 10]);
        let mut input = Vec::new();
        assert!(matches!(
            cmd.encode_input(&mut input),
            Err(GasError::InputTooLarge { .. })
        ));

        let cmd = TwiRead::new(0, 0x00a0, 0, u16::MAX);
        assert!(matches!(
            cmd.encode_input(&mut input),
            Err(GasError::OutputTooLarge { .. })
        ));
    }
}
