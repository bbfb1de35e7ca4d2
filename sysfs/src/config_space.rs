// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! PCI configuration-space field access.
//!
//! All accessors read named fields at their architected byte offsets out of
//! a raw snapshot buffer. Reads past the end of the snapshot yield `None`;
//! a partial snapshot therefore degrades to "field absent" instead of
//! failing the decode.

/// Standard capability id of the PCI Express capability.
pub const PCI_EXPRESS_CAPABILITY_ID: u8 = 0x10;
/// Extended capability id of the device serial number capability.
pub const PCI_SERIAL_NUMBER_EXTENDED_CAPABILITY_ID: u16 = 0x0003;
/// First extended capability sits at this fixed offset.
pub const PCI_EXTENDED_CAPABILITY_OFFSET: u16 = 0x0100;

/// Link capability register offset within the PCI Express capability.
const PCIE_LINK_CAPABILITY_OFFSET: usize = 0x0c;
/// Link status register offset within the PCI Express capability.
const PCIE_LINK_STATUS_OFFSET: usize = 0x12;

const HEADER_TYPE_OFFSET: usize = 0x0e;
const STATUS_OFFSET: usize = 0x06;
const CAPABILITY_POINTER_OFFSET: usize = 0x34;
const SECONDARY_BUS_OFFSET: usize = 0x19;
const SUBSYSTEM_VENDOR_ID_OFFSET: usize = 0x2c;
const SUBSYSTEM_ID_OFFSET: usize = 0x2e;

/// 7 LSBs carry the header type, the MSB flags a multi-function device.
const HEADER_TYPE_MASK: u8 = 0x7f;
const MULTI_FUNCTION_MASK: u8 = 0x80;
/// Status register bit 4: the capability pointer is implemented.
const STATUS_CAPABILITY_LIST_MASK: u16 = 0x0010;
/// Two LSBs of a capability pointer are reserved.
const CAPABILITY_POINTER_MASK: u8 = 0xfc;
const EXTENDED_NEXT_POINTER_SHIFT: u16 = 4;

pub const HEADER_TYPE_0: u8 = 0x00;
pub const HEADER_TYPE_1: u8 = 0x01;

fn read_u8(config: &[u8], offset: usize) -> Option<u8> {
    config.get(offset).copied()
}

fn read_u16(config: &[u8], offset: usize) -> Option<u16> {
    let bytes = config.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(config: &[u8], offset: usize) -> Option<u32> {
    let bytes = config.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn vendor_id(config: &[u8]) -> Option<u16> {
    read_u16(config, 0x00)
}

pub fn device_id(config: &[u8]) -> Option<u16> {
    read_u16(config, 0x02)
}

pub fn revision_id(config: &[u8]) -> Option<u8> {
    read_u8(config, 0x08)
}

pub fn prog_if(config: &[u8]) -> Option<u8> {
    read_u8(config, 0x09)
}

pub fn subclass(config: &[u8]) -> Option<u8> {
    read_u8(config, 0x0a)
}

pub fn class_code(config: &[u8]) -> Option<u8> {
    read_u8(config, 0x0b)
}

pub fn header_type(config: &[u8]) -> Option<u8> {
    read_u8(config, HEADER_TYPE_OFFSET).map(|raw| raw & HEADER_TYPE_MASK)
}

pub fn is_multi_function(config: &[u8]) -> bool {
    read_u8(config, HEADER_TYPE_OFFSET).is_some_and(|raw| raw & MULTI_FUNCTION_MASK != 0)
}

/// Secondary bus number; only meaningful for type 1 headers.
pub fn secondary_bus(config: &[u8]) -> Option<u8> {
    read_u8(config, SECONDARY_BUS_OFFSET)
}

/// Subsystem vendor and device ids; only present in type 0 headers.
pub fn subsystem_ids(config: &[u8]) -> Option<(u16, u16)> {
    if header_type(config)? != HEADER_TYPE_0 {
        return None;
    }
    Some((
        read_u16(config, SUBSYSTEM_VENDOR_ID_OFFSET)?,
        read_u16(config, SUBSYSTEM_ID_OFFSET)?,
    ))
}

/// Capability list start, or `None` when the status register does not
/// advertise one. Both header types keep the pointer at the same offset.
pub fn capability_pointer(config: &[u8]) -> Option<u8> {
    let status = read_u16(config, STATUS_OFFSET)?;
    if status & STATUS_CAPABILITY_LIST_MASK == 0 {
        return None;
    }
    match header_type(config)? {
        HEADER_TYPE_0 | HEADER_TYPE_1 => {
            Some(read_u8(config, CAPABILITY_POINTER_OFFSET)? & CAPABILITY_POINTER_MASK)
        }
        _ => None,
    }
}

/// Walks the standard capability list from `start` looking for
/// `capability_id`. Returns the capability's offset.
///
/// Terminates on a zero or out-of-bounds pointer and on any revisited
/// offset, so a snapshot whose "next" pointer points at itself cannot loop.
#[must_use]
pub fn find_capability(config: &[u8], capability_id: u8, start: u8) -> Option<usize> {
    let mut offset = usize::from(start);
    let mut visited = [false; 256];
    while offset != 0 && offset + 2 <= config.len() {
        if visited[offset & 0xff] {
            return None;
        }
        visited[offset & 0xff] = true;
        if read_u8(config, offset)? == capability_id {
            return Some(offset);
        }
        offset = usize::from(read_u8(config, offset + 1)?);
    }
    None
}

/// Walks the extended capability list from [`PCI_EXTENDED_CAPABILITY_OFFSET`]
/// looking for `capability_id`. The "next" field is the upper 12 bits of the
/// header's second word. Same termination guarantees as [`find_capability`].
#[must_use]
pub fn find_extended_capability(config: &[u8], capability_id: u16) -> Option<usize> {
    let mut offset = usize::from(PCI_EXTENDED_CAPABILITY_OFFSET);
    let mut steps = 0;
    let mut last = 0;
    while offset != 0 && offset + 4 <= config.len() {
        if read_u16(config, offset)? == capability_id {
            return Some(offset);
        }
        let next = usize::from(read_u16(config, offset + 2)? >> EXTENDED_NEXT_POINTER_SHIFT);
        if next == offset || next == last {
            return None;
        }
        last = offset;
        offset = next;
        steps += 1;
        // An extended config space holds at most ~1000 4-byte headers.
        if steps > 1024 {
            return None;
        }
    }
    None
}

/// Link capability and link status registers from the PCI Express
/// capability, when present.
#[must_use]
pub fn pcie_link_registers(config: &[u8]) -> Option<(u32, u16)> {
    let start = capability_pointer(config)?;
    let offset = find_capability(config, PCI_EXPRESS_CAPABILITY_ID, start)?;
    Some((
        read_u32(config, offset + PCIE_LINK_CAPABILITY_OFFSET)?,
        read_u16(config, offset + PCIE_LINK_STATUS_OFFSET)?,
    ))
}

/// 64-bit device serial number from the extended capability list.
///
/// Only consulted when the device carries a PCI Express capability; legacy
/// devices have no extended configuration space.
#[must_use]
pub fn serial_number(config: &[u8]) -> Option<u64> {
    let start = capability_pointer(config)?;
    find_capability(config, PCI_EXPRESS_CAPABILITY_ID, start)?;
    let offset = find_extended_capability(config, PCI_SERIAL_NUMBER_EXTENDED_CAPABILITY_ID)?;
    let lower = read_u32(config, offset + 4)?;
    let upper = read_u32(config, offset + 8)?;
    Some((u64::from(upper) << 32) | u64::from(lower))
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    fn snapshot() -> Vec<u8> {
        let mut config = vec![0u8; 4096];
        // capability list implemented, pointer to 0x40
        config[STATUS_OFFSET] = 0x10;
        config[CAPABILITY_POINTER_OFFSET] = 0x40;
        // 0x40: some other capability chaining to 0x50
        config[0x40] = 0x01;
        config[0x41] = 0x50;
        // 0x50: PCI Express capability
        config[0x50] = PCI_EXPRESS_CAPABILITY_ID;
        config[0x50 + PCIE_LINK_CAPABILITY_OFFSET..0x50 + PCIE_LINK_CAPABILITY_OFFSET + 4]
            .copy_from_slice(&0x0042_0004u32.to_le_bytes());
        config[0x50 + PCIE_LINK_STATUS_OFFSET..0x50 + PCIE_LINK_STATUS_OFFSET + 2]
            .copy_from_slice(&0x1041u16.to_le_bytes());
        // 0x100: unrelated extended capability chaining to 0x140
        config[0x100..0x102].copy_from_slice(&0x0001u16.to_le_bytes());
        config[0x102..0x104].copy_from_slice(&(0x140u16 << 4).to_le_bytes());
        // 0x140: serial number capability
        config[0x140..0x142]
            .copy_from_slice(&PCI_SERIAL_NUMBER_EXTENDED_CAPABILITY_ID.to_le_bytes());
        config[0x144..0x148].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        config[0x148..0x14c].copy_from_slice(&0x0000_1234u32.to_le_bytes());
        config
    }

    #[test]
    fn walks_both_capability_lists() {
        let config = snapshot();
        assert_eq!(pcie_link_registers(&config), Some((0x0042_0004, 0x1041)));
        assert_eq!(serial_number(&config), Some(0x0000_1234_dead_beef));
    }

    #[test]
    fn absent_capability_bit_hides_the_list() {
        let mut config = snapshot();
        config[STATUS_OFFSET] = 0;
        assert_eq!(capability_pointer(&config), None);
        assert_eq!(pcie_link_registers(&config), None);
        assert_eq!(serial_number(&config), None);
    }

    #[test]
    fn self_referencing_pointers_terminate() {
        let mut config = vec![0u8; 4096];
        config[STATUS_OFFSET] = 0x10;
        config[CAPABILITY_POINTER_OFFSET] = 0x40;
        config[0x40] = 0x01;
        config[0x41] = 0x40; // points at itself
        assert_eq!(find_capability(&config, PCI_EXPRESS_CAPABILITY_ID, 0x40), None);

        // extended header pointing at itself
        config[0x100..0x102].copy_from_slice(&0x0001u16.to_le_bytes());
        config[0x102..0x104].copy_from_slice(&(0x100u16 << 4).to_le_bytes());
        assert_eq!(
            find_extended_capability(&config, PCI_SERIAL_NUMBER_EXTENDED_CAPABILITY_ID),
            None
        );
    }

    #[test]
    fn walks_never_read_past_the_snapshot() {
        // 256-byte snapshot: extended space absent entirely
        let config = snapshot()[..256].to_vec();
        assert_eq!(pcie_link_registers(&config), Some((0x0042_0004, 0x1041)));
        assert_eq!(serial_number(&config), None);

        // truncated mid-capability
        let config = snapshot()[..0x52].to_vec();
        assert_eq!(pcie_link_registers(&config), None);
    }

    #[test]
    fn header_fields_decode() {
        let mut config = vec![0u8; 64];
        config[0x00..0x02].copy_from_slice(&0x11f8u16.to_le_bytes());
        config[0x02..0x04].copy_from_slice(&0x8546u16.to_le_bytes());
        config[0x0a] = 0x80;
        config[0x0b] = 0x05;
        config[HEADER_TYPE_OFFSET] = 0x81; // multi-function, type 1
        config[SECONDARY_BUS_OFFSET] = 7;

        assert_eq!(vendor_id(&config), Some(0x11f8));
        assert_eq!(device_id(&config), Some(0x8546));
        assert_eq!(class_code(&config), Some(0x05));
        assert_eq!(subclass(&config), Some(0x80));
        assert_eq!(header_type(&config), Some(HEADER_TYPE_1));
        assert!(is_multi_function(&config));
        assert_eq!(secondary_bus(&config), Some(7));
        assert_eq!(subsystem_ids(&config), None);
    }
}
