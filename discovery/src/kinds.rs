// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Device kind classification.
//!
//! Kinds are tried in a fixed order during per-port discovery; `Unknown`
//! matches anything and must stay last so recognized kinds win.

use sysfs::SysfsFunction;

const CLASS_MASS_STORAGE: u8 = 0x01;
const CLASS_PROCESSOR: u8 = 0x0b;
const CLASS_PROCESSING_ACCELERATOR: u8 = 0x12;

/// What sits behind a downstream port.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display, strum::EnumIs)]
pub enum DeviceKind {
    Drive,
    Processor,
    Unknown,
}

impl DeviceKind {
    /// All kinds in discovery order.
    #[must_use]
    pub fn all() -> [DeviceKind; 3] {
        [DeviceKind::Drive, DeviceKind::Processor, DeviceKind::Unknown]
    }

    /// Whether a sysfs function belongs to this device kind.
    #[must_use]
    pub fn matches_function(self, function: &SysfsFunction) -> bool {
        match self {
            DeviceKind::Drive => function.device_class == CLASS_MASS_STORAGE,
            DeviceKind::Processor => {
                function.device_class == CLASS_PROCESSOR
                    || function.device_class == CLASS_PROCESSING_ACCELERATOR
            }
            DeviceKind::Unknown => true,
        }
    }

    /// The kind of a device given its functions' classes.
    #[must_use]
    pub fn classify(functions: &[SysfsFunction]) -> DeviceKind {
        for kind in DeviceKind::all() {
            if functions.iter().any(|f| kind.matches_function(f)) {
                return kind;
            }
        }
        DeviceKind::Unknown
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    fn function_with_class(device_class: u8) -> SysfsFunction {
        SysfsFunction {
            device_class,
            ..SysfsFunction::default()
        }
    }

    #[test]
    fn classification_prefers_recognized_kinds() {
        assert_eq!(
            DeviceKind::classify(&[function_with_class(0x01)]),
            DeviceKind::Drive
        );
        assert_eq!(
            DeviceKind::classify(&[function_with_class(0x12)]),
            DeviceKind::Processor
        );
        assert_eq!(
            DeviceKind::classify(&[function_with_class(0x02)]),
            DeviceKind::Unknown
        );
        // a drive function wins over unclassified siblings
        assert_eq!(
            DeviceKind::classify(&[function_with_class(0x02), function_with_class(0x01)]),
            DeviceKind::Drive
        );
        assert_eq!(DeviceKind::classify(&[]), DeviceKind::Unknown);
    }

    #[test]
    fn kinds_display_by_name_for_logs() {
        assert_eq!(DeviceKind::Drive.to_string(), "Drive");
        assert!(DeviceKind::Unknown.is_unknown());
    }
}
