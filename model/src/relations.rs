// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Many-to-many relation tables between entities.

use std::collections::BTreeSet;

use parking_lot::RwLock;
use uuid::Uuid;

/// A named, thread-safe set of (parent, child) UUID pairs.
#[derive(Debug, Default)]
pub struct RelationTable {
    entries: RwLock<BTreeSet<(Uuid, Uuid)>>,
}

impl RelationTable {
    #[must_use]
    pub fn new() -> RelationTable {
        RelationTable::default()
    }

    pub fn add(&self, parent: Uuid, child: Uuid) {
        self.entries.write().insert((parent, child));
    }

    /// Removes one pair; absent pairs are ignored.
    pub fn remove(&self, parent: Uuid, child: Uuid) {
        self.entries.write().remove(&(parent, child));
    }

    #[must_use]
    pub fn contains(&self, parent: Uuid, child: Uuid) -> bool {
        self.entries.read().contains(&(parent, child))
    }

    #[must_use]
    pub fn children_of(&self, parent: Uuid) -> Vec<Uuid> {
        self.entries
            .read()
            .iter()
            .filter(|(p, _)| *p == parent)
            .map(|(_, c)| *c)
            .collect()
    }

    #[must_use]
    pub fn parents_of(&self, child: Uuid) -> Vec<Uuid> {
        self.entries
            .read()
            .iter()
            .filter(|(_, c)| *c == child)
            .map(|(p, _)| *p)
            .collect()
    }

    /// Drops every pair mentioning `uuid` on either side.
    pub fn remove_all_for(&self, uuid: Uuid) {
        self.entries
            .write()
            .retain(|(p, c)| *p != uuid && *c != uuid);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bidirectional_lookups() {
        let table = RelationTable::new();
        let zone = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        table.add(zone, a);
        table.add(zone, b);

        let mut children = table.children_of(zone);
        children.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(children, expected);
        assert_eq!(table.parents_of(a), vec![zone]);

        table.remove(zone, a);
        assert!(!table.contains(zone, a));
        assert!(table.contains(zone, b));

        table.remove_all_for(zone);
        assert!(table.children_of(zone).is_empty());
    }
}
