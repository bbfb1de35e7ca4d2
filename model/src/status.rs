// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Entity status: availability state and health.

/// Availability of an entity.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, strum::Display, strum::EnumIs)]
pub enum State {
    #[default]
    Enabled,
    Disabled,
    Absent,
    Starting,
    /// Present but not usable; set when in-band confirmation of an
    /// out-of-band detected device failed.
    UnavailableOffline,
}

/// Health of an entity.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, strum::Display, strum::EnumIs)]
pub enum Health {
    #[default]
    Ok,
    Warning,
    Critical,
}

/// State and health pair carried by every entity.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Status {
    pub state: State,
    pub health: Health,
}

impl Status {
    #[must_use]
    pub fn new(state: State, health: Health) -> Status {
        Status { state, health }
    }

    #[must_use]
    pub fn enabled() -> Status {
        Status::new(State::Enabled, Health::Ok)
    }

    #[must_use]
    pub fn critical() -> Status {
        Status::new(State::UnavailableOffline, Health::Critical)
    }

    #[must_use]
    pub fn absent() -> Status {
        Status::new(State::Absent, Health::Warning)
    }
}
