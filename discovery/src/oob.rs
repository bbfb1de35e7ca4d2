// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Out-of-band device channels over the switch's TWI side band.
//!
//! Drives answer on fixed slave addresses independently of PCIe link
//! state: SMART health at `0xd4`, vital product data at `0xa6`, and a
//! presence expander at `0x40`. A channel that does not answer is a
//! failed channel, not a protocol error; only when every channel fails
//! does a slot count as empty.

use gas::mrpc::TwiRead;
use gas::mrpc::twi::{presence_port, twi_device};
use gas::{Gas, GasError};
use model::{Health, State, Status};

/// SMART log bytes read per drive.
const SMART_DATA_LEN: u16 = 2;
/// VPD serial number field: offset and width in the VPD EEPROM.
const VPD_SERIAL_OFFSET: u32 = 0x00;
const VPD_SERIAL_LEN: u16 = 20;
/// Firmware revision field in the VPD EEPROM.
const VPD_FIRMWARE_OFFSET: u32 = 0x40;
const VPD_FIRMWARE_LEN: u16 = 8;

/// Decoded drive SMART side-band record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SmartLog {
    /// Raw status byte; zero means healthy.
    pub status: u8,
    pub percentage_drive_life_used: u8,
}

impl SmartLog {
    /// Resource status equivalent of the SMART status byte.
    #[must_use]
    pub fn to_status(self) -> Status {
        Status {
            state: State::Enabled,
            health: if self.status == 0 {
                Health::Ok
            } else {
                Health::Warning
            },
        }
    }

    #[must_use]
    pub fn media_life_left(self) -> u8 {
        100u8.saturating_sub(self.percentage_drive_life_used)
    }
}

/// Reads the SMART log of the drive behind `twi_port`.
pub fn read_smart(gas: &Gas, twi_port: u8) -> Result<SmartLog, GasError> {
    let mut cmd = TwiRead::new(twi_port, twi_device::SMART, 0, SMART_DATA_LEN);
    gas.run(&mut cmd)?;
    Ok(SmartLog {
        status: cmd.data.first().copied().unwrap_or(0),
        percentage_drive_life_used: cmd.data.get(1).copied().unwrap_or(0),
    })
}

/// Reads the drive serial number from its VPD EEPROM. Returns `None` when
/// the field is blank.
pub fn read_vpd_serial(gas: &Gas, twi_port: u8) -> Result<Option<String>, GasError> {
    let mut cmd = TwiRead::new(
        twi_port,
        twi_device::NVME_VPD,
        VPD_SERIAL_OFFSET,
        VPD_SERIAL_LEN,
    );
    gas.run(&mut cmd)?;
    Ok(ascii_field(&cmd.data))
}

/// Reads the drive firmware revision from its VPD EEPROM.
pub fn read_firmware_version(gas: &Gas, twi_port: u8) -> Result<Option<String>, GasError> {
    let mut cmd = TwiRead::new(
        twi_port,
        twi_device::NVME_VPD,
        VPD_FIRMWARE_OFFSET,
        VPD_FIRMWARE_LEN,
    );
    gas.run(&mut cmd)?;
    Ok(ascii_field(&cmd.data))
}

/// Reads the drive-presence expander and returns one presence bit per
/// drive slot.
///
/// The expander reports each byte MSB-first and active-low; both bytes
/// are bit-reversed and the combined mask complemented.
pub fn presence_bitmask(gas: &Gas) -> Result<u64, GasError> {
    let low = read_presence_byte(gas, presence_port::PORTS_0_14)?;
    let high = read_presence_byte(gas, presence_port::PORTS_32_46)?;
    let all_ports = u16::from(low.reverse_bits()) | (u16::from(high.reverse_bits()) << 8);
    Ok(u64::from(!all_ports))
}

fn read_presence_byte(gas: &Gas, twi_port: u8) -> Result<u8, GasError> {
    let mut cmd = TwiRead::new(twi_port, twi_device::DRIVE_PRESENCE, 0, 1);
    gas.run(&mut cmd)?;
    Ok(cmd.data.first().copied().unwrap_or(0))
}

/// Whether the presence bitmask reports a device in the given port's slot.
///
/// Drive slots sit on ports [0, 2, .., 14] and [32, 34, .., 46]; halving
/// and folding the upper group maps them onto bits [0, 15].
#[must_use]
pub fn is_device_present(bitmask: u64, phys_port_id: u8) -> bool {
    let mut bit = phys_port_id / 2;
    if bit > 7 {
        bit -= 8;
    }
    bitmask & (1u64 << bit) != 0
}

fn ascii_field(raw: &[u8]) -> Option<String> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let text = std::str::from_utf8(&raw[..end]).ok()?.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
        return None;
    }
    Some(text.to_string())
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn presence_bit_mapping_folds_the_upper_port_group() {
        // slot bits 0 and 8 set
        let mask = 0b1_0000_0001u64;
        assert!(is_device_present(mask, 0));
        assert!(is_device_present(mask, 1));
        assert!(!is_device_present(mask, 2));
        assert!(is_device_present(mask, 32));
        assert!(!is_device_present(mask, 34));
        assert!(!is_device_present(mask, 46));
    }

    #[test]
    fn ascii_field_trims_and_rejects_garbage() {
        assert_eq!(ascii_field(b"S3X9NX0K  \0\0\0"), Some("S3X9NX0K".into()));
        assert_eq!(ascii_field(b"\0\0\0\0"), None);
        assert_eq!(ascii_field(b"     "), None);
        assert_eq!(ascii_field(&[0xff, 0xfe, 0x41]), None);
    }

    #[test]
    fn smart_log_maps_to_status_and_life_left() {
        let healthy = SmartLog {
            status: 0,
            percentage_drive_life_used: 30,
        };
        assert_eq!(healthy.to_status().health, Health::Ok);
        assert_eq!(healthy.media_life_left(), 70);

        let worn = SmartLog {
            status: 2,
            percentage_drive_life_used: 120,
        };
        assert_eq!(worn.to_status().health, Health::Warning);
        assert_eq!(worn.media_life_left(), 0);
    }
}
