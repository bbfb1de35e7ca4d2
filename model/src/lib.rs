// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! The fabric resource model.
//!
//! Discovery and monitoring mutate a UUID-keyed store of domain entities
//! (fabric, switch, zone, port, endpoint, PCIe device/function, drive) plus
//! many-to-many relation tables between them. The store is safe for
//! concurrent use from the monitor thread and request handlers; every read
//! returns a clone so no caller holds a lock across its own work.
//!
//! [`stabilize`] derives deterministic UUIDs from stable hardware
//! attributes so repeated discovery of the same physical device converges
//! on the same identity. [`events`] carries fire-and-forget model-change
//! notifications out of the orchestrator.

#![deny(clippy::all, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub use crate::entities::{
    Chassis, Drive, Endpoint, Fabric, Manager, PcieDevice, PcieFunction, Port, PortType,
    Processor, StorageSubsystem, Switch, Zone,
};
pub use crate::events::{BufferingSink, ChangeKind, ComponentKind, Event, EventSink, LogSink};
pub use crate::resource_model::ResourceModel;
pub use crate::status::{Health, State, Status};
pub use crate::store::{Entity, Store};

pub mod entities;
pub mod events;
pub mod relations;
pub mod resource_model;
pub mod stabilize;
pub mod status;
pub mod store;

/// Errors raised by resource model access.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// A referenced UUID does not exist in the store.
    #[error("{kind} {uuid} not found")]
    NotFound {
        kind: ComponentKind,
        uuid: uuid::Uuid,
    },
    /// An attribute required to stabilize an entity is missing.
    #[error("cannot stabilize {kind}: {what} missing")]
    KeyValueMissing {
        kind: ComponentKind,
        what: &'static str,
    },
}
