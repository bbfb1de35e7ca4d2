// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Per-port reconciliation state machine.
//!
//! Each downstream port carries a [`PortStateManager`] fed once per monitor
//! cycle with four sampled booleans (device present, bound, bound to the
//! management host, drive being erased). Transitions trigger the minimal
//! discovery or removal action through a [`PortStateWorker`]; a failed action
//! blocks the transition and keeps the previous sample latched, so the same
//! event fires again on the next cycle.

use std::sync::Arc;

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::MonitorError;

/// Discovery and binding actions a port transition may trigger.
///
/// Implemented against the discovery orchestrator by
/// [`DiscoveryWorker`](crate::worker::DiscoveryWorker); tests substitute a
/// recording double.
pub trait PortStateWorker: Send + Sync {
    /// Binds the port to a free bridge of the management partition and
    /// returns the bridge id.
    fn bind_to_host(&self, port: Uuid) -> Result<u8, MonitorError>;

    /// Releases a management-partition bridge.
    fn unbind_from_host(&self, logical_bridge_id: u8) -> Result<(), MonitorError>;

    /// The logical bridge the port is currently bound to.
    fn bridge_id(&self, port: Uuid) -> Result<u8, MonitorError>;

    /// Side-band discovery; returns the device found, if any.
    fn oob_discovery(&self, port: Uuid) -> Result<Option<Uuid>, MonitorError>;

    /// In-band discovery through an already-bound bridge.
    fn ib_discovery(
        &self,
        switch: Uuid,
        port: Uuid,
        logical_bridge_id: u8,
        device: Option<Uuid>,
    ) -> Result<(), MonitorError>;

    /// Side-band followed by in-band discovery; returns the device backing
    /// the port afterwards, if any.
    fn full_discovery(
        &self,
        switch: Uuid,
        port: Uuid,
        logical_bridge_id: u8,
    ) -> Result<Option<Uuid>, MonitorError>;

    /// Tears down everything modeled behind the port.
    fn remove(&self, port: Uuid) -> Result<(), MonitorError>;

    /// Refreshes the port's link width, speed and state.
    fn update_port_status(&self, port: Uuid) -> Result<(), MonitorError>;

    /// Refreshes a drive's health from its SMART side band.
    fn update_drive_status(&self, port: Uuid, drive: Uuid) -> Result<(), MonitorError>;

    /// Marks an unbound drive offline, keeping its last known health.
    fn set_drive_offline(&self, drive: Uuid) -> Result<(), MonitorError>;
}

/// Reconciliation state of one downstream port.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, strum::Display, strum::EnumIs)]
pub enum PortState {
    /// No sample consumed yet.
    #[default]
    Unknown,
    /// Binding sampled (management host), presence still unknown.
    HostBound,
    /// Binding sampled (another partition), presence still unknown.
    ForeignBound,
    /// Nothing plugged, not bound anywhere.
    UnboundEmpty,
    /// Bound to another partition with no device behind the port.
    BoundEmpty,
    /// Device present and discovered, not bound to any host.
    UnboundPresent,
    /// Device present and bound to another partition.
    BoundPresent,
    /// Drive under an out-of-band erase; transient unbinds are expected.
    Erasing,
}

impl PortState {
    /// The two initialization samples have been consumed.
    #[must_use]
    pub fn is_initialized(self) -> bool {
        !matches!(
            self,
            PortState::Unknown | PortState::HostBound | PortState::ForeignBound
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
enum PortEvent {
    BoundToHost,
    BoundToOther,
    NotBound,
    DevicePresent,
    DeviceAbsent,
    WasUnbound,
    HotPlug,
    HotUnplug,
    EraseStarted,
    EraseFinished,
}

#[derive(Clone, Copy, Debug, strum::Display)]
enum Action {
    Bind,
    Unbind,
    FullUnbind,
    Oob,
    IbBindUnbind,
    Remove,
    FullBindUnbind,
}

/// Drives one downstream port through its reconciliation states.
pub struct PortStateManager {
    worker: Arc<dyn PortStateWorker>,
    switch: Uuid,
    port: Uuid,
    state: PortState,
    prev_present: bool,
    prev_bound: bool,
    device: Option<Uuid>,
}

impl PortStateManager {
    pub fn new(worker: Arc<dyn PortStateWorker>, switch: Uuid, port: Uuid) -> PortStateManager {
        PortStateManager {
            worker,
            switch,
            port,
            state: PortState::Unknown,
            prev_present: false,
            prev_bound: false,
            device: None,
        }
    }

    pub fn port(&self) -> Uuid {
        self.port
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    /// The device last discovered behind the port, if any.
    pub fn device(&self) -> Option<Uuid> {
        self.device
    }

    /// The state says a device sits behind the port.
    #[must_use]
    pub fn device_present(&self) -> bool {
        matches!(
            self.state,
            PortState::UnboundPresent | PortState::BoundPresent | PortState::Erasing
        )
    }

    /// Consumes one cycle's sample for this port.
    pub fn update(
        &mut self,
        is_present: bool,
        is_bound: bool,
        is_bound_to_host: bool,
        is_being_erased: bool,
    ) {
        debug!(
            port = %self.port,
            state = %self.state,
            is_present,
            is_bound,
            is_bound_to_host,
            is_being_erased,
            "sampling port",
        );
        if self.state.is_initialized() {
            self.generate_events(is_present, is_bound, is_being_erased);
        } else {
            self.init_binding(is_bound, is_bound_to_host);
            self.init_presence(is_present);
        }
    }

    fn init_binding(&mut self, is_bound: bool, is_bound_to_host: bool) {
        self.prev_bound = is_bound;
        let event = if !is_bound {
            PortEvent::NotBound
        } else if is_bound_to_host {
            PortEvent::BoundToHost
        } else {
            PortEvent::BoundToOther
        };
        self.apply(event);
    }

    fn init_presence(&mut self, is_present: bool) {
        self.prev_present = is_present;
        let event = if is_present {
            PortEvent::DevicePresent
        } else {
            PortEvent::DeviceAbsent
        };
        self.apply(event);
    }

    fn generate_events(&mut self, is_present: bool, is_bound: bool, is_being_erased: bool) {
        let mut settled = true;
        if is_being_erased && self.state.is_bound_present() {
            settled &= self.apply(PortEvent::EraseStarted);
        } else if self.state.is_erasing() && !is_being_erased && is_bound {
            settled &= self.apply(PortEvent::EraseFinished);
        }

        // An erase may transiently unbind the port; the drive flag keeps
        // the port counting as used until it clears.
        let is_used = is_bound || is_being_erased;
        if !is_used && self.prev_bound {
            settled &= self.apply(PortEvent::WasUnbound);
        } else if self.prev_present != is_present {
            settled &= self.apply(if is_present {
                PortEvent::HotPlug
            } else {
                PortEvent::HotUnplug
            });
        }

        // A blocked transition keeps the previous sample latched so the
        // same event regenerates next cycle.
        if settled {
            self.prev_present = is_present;
            self.prev_bound = is_used;
        }
    }

    /// Runs one event through the transition table. Returns false when the
    /// event has no transition here or its action failed.
    fn apply(&mut self, event: PortEvent) -> bool {
        let Some((next, action)) = Self::transition(self.state, event) else {
            warn!(port = %self.port, state = %self.state, %event, "event ignored in this state");
            return false;
        };
        if let Some(action) = action {
            debug!(port = %self.port, %action, "action started");
            if let Err(error) = self.act(action) {
                error!(port = %self.port, state = %self.state, %action, %error, "action failed");
                return false;
            }
            debug!(port = %self.port, %action, "action finished");
        }
        debug!(port = %self.port, from = %self.state, to = %next, %event, "port transition");
        self.state = next;
        true
    }

    fn transition(state: PortState, event: PortEvent) -> Option<(PortState, Option<Action>)> {
        use PortEvent as E;
        use PortState as S;
        match (state, event) {
            // first sample: binding
            (S::Unknown, E::BoundToHost) => Some((S::HostBound, None)),
            (S::Unknown, E::BoundToOther) => Some((S::ForeignBound, None)),
            (S::Unknown, E::NotBound) => Some((S::HostBound, Some(Action::Bind))),
            // second sample: presence
            (S::HostBound, E::DevicePresent) => Some((S::UnboundPresent, Some(Action::FullUnbind))),
            (S::HostBound, E::DeviceAbsent) => Some((S::UnboundEmpty, Some(Action::Unbind))),
            (S::ForeignBound, E::DevicePresent) => Some((S::BoundPresent, Some(Action::Oob))),
            (S::ForeignBound, E::DeviceAbsent) => Some((S::BoundEmpty, None)),
            // release by the owning host
            (S::BoundPresent, E::WasUnbound) => {
                Some((S::UnboundPresent, Some(Action::IbBindUnbind)))
            }
            (S::BoundEmpty, E::WasUnbound) => Some((S::UnboundEmpty, None)),
            // hot swap
            (S::BoundPresent, E::HotUnplug) => Some((S::BoundEmpty, Some(Action::Remove))),
            (S::BoundEmpty, E::HotPlug) => Some((S::BoundPresent, Some(Action::Oob))),
            (S::UnboundPresent, E::HotUnplug) => Some((S::UnboundEmpty, Some(Action::Remove))),
            (S::UnboundEmpty, E::HotPlug) => {
                Some((S::UnboundPresent, Some(Action::FullBindUnbind)))
            }
            // erase bracket
            (S::BoundPresent, E::EraseStarted) => Some((S::Erasing, None)),
            (S::Erasing, E::EraseFinished) => Some((S::BoundPresent, None)),
            (S::Erasing, E::WasUnbound) => Some((S::UnboundPresent, Some(Action::IbBindUnbind))),
            (S::Erasing, E::HotUnplug) => Some((S::BoundEmpty, Some(Action::Remove))),
            _ => None,
        }
    }

    fn act(&mut self, action: Action) -> Result<(), MonitorError> {
        match action {
            Action::Bind => {
                self.worker.bind_to_host(self.port)?;
                Ok(())
            }
            Action::Unbind => {
                let bridge = self.worker.bridge_id(self.port)?;
                self.worker.unbind_from_host(bridge)
            }
            Action::FullUnbind => {
                let bridge = self.worker.bridge_id(self.port)?;
                let device = self.worker.full_discovery(self.switch, self.port, bridge)?;
                self.worker.unbind_from_host(bridge)?;
                self.device = device;
                Ok(())
            }
            Action::Oob => {
                self.device = self.worker.oob_discovery(self.port)?;
                Ok(())
            }
            Action::IbBindUnbind => {
                let bridge = self.worker.bind_to_host(self.port)?;
                self.worker
                    .ib_discovery(self.switch, self.port, bridge, self.device)?;
                self.worker.unbind_from_host(bridge)
            }
            Action::Remove => {
                self.worker.remove(self.port)?;
                self.device = None;
                Ok(())
            }
            Action::FullBindUnbind => {
                let bridge = self.worker.bind_to_host(self.port)?;
                let device = self.worker.full_discovery(self.switch, self.port, bridge)?;
                self.worker.unbind_from_host(bridge)?;
                self.device = device;
                Ok(())
            }
        }
    }
}
