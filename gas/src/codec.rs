// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Little-endian field codec helpers.
//!
//! All MRPC wire fields are fixed-width little-endian integers at documented
//! byte offsets. These helpers replace the original firmware interface's
//! overlaid packed structs with explicit reads and writes, so the wire layout
//! never depends on host struct layout or endianness.

use crate::GasError;

/// Reads a `u8` at `offset`, bounds-checked against the buffer.
pub fn get_u8(buf: &[u8], offset: usize) -> Result<u8, GasError> {
    buf.get(offset).copied().ok_or(GasError::ShortResponse {
        expected: offset + 1,
        actual: buf.len(),
    })
}

/// Reads a little-endian `u16` at `offset`.
pub fn get_u16_le(buf: &[u8], offset: usize) -> Result<u16, GasError> {
    let bytes = checked_slice(buf, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Reads a little-endian `u32` at `offset`.
pub fn get_u32_le(buf: &[u8], offset: usize) -> Result<u32, GasError> {
    let bytes = checked_slice(buf, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Reads a little-endian `u64` at `offset`.
pub fn get_u64_le(buf: &[u8], offset: usize) -> Result<u64, GasError> {
    let bytes = checked_slice(buf, offset, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(raw))
}

/// Writes a `u8` at `offset`, growing the buffer with zeros as needed.
pub fn put_u8(buf: &mut Vec<u8>, offset: usize, value: u8) {
    ensure_len(buf, offset + 1);
    buf[offset] = value;
}

/// Writes a little-endian `u16` at `offset`.
pub fn put_u16_le(buf: &mut Vec<u8>, offset: usize, value: u16) {
    ensure_len(buf, offset + 2);
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Writes a little-endian `u32` at `offset`.
pub fn put_u32_le(buf: &mut Vec<u8>, offset: usize, value: u32) {
    ensure_len(buf, offset + 4);
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Writes a little-endian `u64` at `offset`.
pub fn put_u64_le(buf: &mut Vec<u8>, offset: usize, value: u64) {
    ensure_len(buf, offset + 8);
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn ensure_len(buf: &mut Vec<u8>, len: usize) {
    if buf.len() < len {
        buf.resize(len, 0);
    }
}

fn checked_slice(buf: &[u8], offset: usize, len: usize) -> Result<&[u8], GasError> {
    let end = offset.checked_add(len).ok_or(GasError::ShortResponse {
        expected: usize::MAX,
        actual: buf.len(),
    })?;
    buf.get(offset..end).ok_or(GasError::ShortResponse {
        expected: end,
        actual: buf.len(),
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_are_little_endian() {
        let mut buf = Vec::new();
        put_u32_le(&mut buf, 2, 0x0403_0201);
        assert_eq!(buf, &[0, 0, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(get_u32_le(&buf, 2).unwrap(), 0x0403_0201);
        assert_eq!(get_u16_le(&buf, 2).unwrap(), 0x0201);
    }

    #[test]
    fn reads_past_the_end_are_short_responses() {
        let buf = [1u8, 2, 3];
        assert!(matches!(
            get_u32_le(&buf, 1),
            Err(GasError::ShortResponse { expected: 5, actual: 3 })
        ));
        assert!(get_u8(&buf, 3).is_err());
    }

    #[test]
    fn multi_byte_return_codes_assemble_from_low_byte_first() {
        let buf = [0xaa, 0xbb, 0xcc, 0xdd];
        let expected =
            u32::from(buf[0]) | u32::from(buf[1]) << 8 | u32::from(buf[2]) << 16 | u32::from(buf[3]) << 24;
        assert_eq!(get_u32_le(&buf, 0).unwrap(), expected);
    }
}
