// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! In-band PCI topology decoding.
//!
//! The host kernel's PCI enumeration is the in-band view of the switch
//! fabric: the switch's management endpoint, its downstream bridges and the
//! devices behind them all appear as ordinary PCI functions under
//! `/sys/bus/pci/devices`. This crate reads those entries into immutable
//! [`RawPciDevice`] records ([`reader`]) and classifies them into a
//! switch/bridge/device/function/drive forest ([`decoder`]).
//!
//! The decoder is a pure function over the raw records. It never touches
//! the filesystem and re-derives the whole forest on every call, so two
//! decodes of the same records always agree.

#![deny(clippy::all, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub use crate::decoder::{
    SysfsBridge, SysfsDecoder, SysfsDevice, SysfsDrive, SysfsFunction, SysfsSwitch,
};
pub use crate::raw::{RawDeviceSource, RawPciDevice, SysfsId};
pub use crate::reader::SysfsReader;

pub mod config_space;
pub mod decoder;
pub mod raw;
pub mod reader;

/// Errors raised by topology decoding.
#[derive(Debug, thiserror::Error)]
pub enum SysfsError {
    /// A device path or id string did not parse.
    #[error("malformed PCI address {value:?}")]
    MalformedAddress { value: String },
    /// A bridge lookup by path or id found nothing.
    #[error("bridge not found: {what}")]
    BridgeNotFound { what: String },
}
