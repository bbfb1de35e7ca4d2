// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Model-change notifications.
//!
//! The orchestrator fires one event per entity mutation. Sinks must never
//! block and never fail visibly; a listener that cannot keep up drops
//! events on its own side.

use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

/// Which entity type an event is about.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum ComponentKind {
    Manager,
    Chassis,
    Fabric,
    Switch,
    Port,
    Zone,
    Endpoint,
    PcieDevice,
    PcieFunction,
    Drive,
    Processor,
    StorageSubsystem,
}

/// What happened to the entity.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum ChangeKind {
    Add,
    Update,
    Remove,
}

/// One model-change notification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Event {
    pub subject: Uuid,
    pub component: ComponentKind,
    pub change: ChangeKind,
    /// The parent or container the change happened under.
    pub context: Option<Uuid>,
}

impl Event {
    #[must_use]
    pub fn new(
        subject: Uuid,
        component: ComponentKind,
        change: ChangeKind,
        context: Option<Uuid>,
    ) -> Event {
        Event {
            subject,
            component,
            change,
            context,
        }
    }
}

/// Fire-and-forget event receiver.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: Event);
}

/// Sink that logs each event.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn notify(&self, event: Event) {
        info!(
            subject = %event.subject,
            component = %event.component,
            change = %event.change,
            "model changed"
        );
    }
}

/// Sink that records events in order. Used by tests.
#[derive(Debug, Default)]
pub struct BufferingSink {
    events: Mutex<Vec<Event>>,
}

impl BufferingSink {
    #[must_use]
    pub fn new() -> BufferingSink {
        BufferingSink::default()
    }

    #[must_use]
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut self.events.lock())
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl EventSink for BufferingSink {
    fn notify(&self, event: Event) {
        self.events.lock().push(event);
    }
}
