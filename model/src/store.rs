// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! UUID-keyed entity stores.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::{ComponentKind, ModelError};

/// Implemented by every stored entity type.
pub trait Entity: Clone + Send + Sync {
    fn uuid(&self) -> Uuid;
    fn parent(&self) -> Option<Uuid>;
}

/// A thread-safe store of one entity type.
///
/// Reads return clones; the store never hands out references into the map,
/// so callers cannot hold the lock across their own control flow. Anyone
/// that yielded to another thread re-reads instead of trusting a stale
/// clone.
pub struct Store<T: Entity> {
    kind: ComponentKind,
    entries: RwLock<HashMap<Uuid, T>>,
}

impl<T: Entity> Store<T> {
    #[must_use]
    pub fn new(kind: ComponentKind) -> Store<T> {
        Store {
            kind,
            entries: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Inserts or replaces the entity under its own UUID.
    pub fn add(&self, entity: T) {
        self.entries.write().insert(entity.uuid(), entity);
    }

    pub fn get(&self, uuid: Uuid) -> Result<T, ModelError> {
        self.entries
            .read()
            .get(&uuid)
            .cloned()
            .ok_or(ModelError::NotFound {
                kind: self.kind,
                uuid,
            })
    }

    #[must_use]
    pub fn contains(&self, uuid: Uuid) -> bool {
        self.entries.read().contains_key(&uuid)
    }

    /// Applies `mutate` to the stored entity under the write lock.
    pub fn update(&self, uuid: Uuid, mutate: impl FnOnce(&mut T)) -> Result<(), ModelError> {
        let mut entries = self.entries.write();
        let entity = entries.get_mut(&uuid).ok_or(ModelError::NotFound {
            kind: self.kind,
            uuid,
        })?;
        mutate(entity);
        Ok(())
    }

    pub fn remove(&self, uuid: Uuid) -> Result<T, ModelError> {
        self.entries
            .write()
            .remove(&uuid)
            .ok_or(ModelError::NotFound {
                kind: self.kind,
                uuid,
            })
    }

    #[must_use]
    pub fn keys(&self) -> Vec<Uuid> {
        self.entries.read().keys().copied().collect()
    }

    #[must_use]
    pub fn keys_by_parent(&self, parent: Uuid) -> Vec<Uuid> {
        self.entries
            .read()
            .values()
            .filter(|e| e.parent() == Some(parent))
            .map(Entity::uuid)
            .collect()
    }

    /// Clone of every stored entity.
    #[must_use]
    pub fn list(&self) -> Vec<T> {
        self.entries.read().values().cloned().collect()
    }

    /// First entity matching `pred`, if any.
    #[must_use]
    pub fn find(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        self.entries.read().values().find(|e| pred(e)).cloned()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::entities::Zone;
    use crate::status::Status;

    fn zone(uuid: Uuid, parent: Option<Uuid>, zone_id: u8) -> Zone {
        Zone {
            uuid,
            parent,
            zone_id,
            status: Status::enabled(),
        }
    }

    #[test]
    fn add_get_update_remove_cycle() {
        let store = Store::new(ComponentKind::Zone);
        let uuid = Uuid::new_v4();
        store.add(zone(uuid, None, 1));

        assert_eq!(store.get(uuid).unwrap().zone_id, 1);
        store.update(uuid, |z| z.zone_id = 2).unwrap();
        assert_eq!(store.get(uuid).unwrap().zone_id, 2);

        let removed = store.remove(uuid).unwrap();
        assert_eq!(removed.zone_id, 2);
        assert!(matches!(
            store.get(uuid),
            Err(ModelError::NotFound { kind: ComponentKind::Zone, .. })
        ));
    }

    #[test]
    fn keys_by_parent_filters() {
        let store = Store::new(ComponentKind::Zone);
        let fabric = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.add(zone(a, Some(fabric), 1));
        store.add(zone(b, None, 2));

        assert_eq!(store.keys_by_parent(fabric), vec![a]);
        assert_eq!(store.keys().len(), 2);
        assert_eq!(store.find(|z| z.zone_id == 2).unwrap().uuid, b);
    }
}
