//! Client to worker pinning table
//!
//! The [`DispatchMap`] is owned by exactly one dispatcher and mutated through
//! `&mut self`, so the "look up, otherwise assign and insert" step is atomic
//! per client without any lock. Entries are never evicted: once a client is
//! pinned it stays on that worker for the lifetime of the map.

use pinpool_common::{ClientId, WorkerIndex};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

/// Result of resolving a client to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// The client was already pinned
    Existing(WorkerIndex),

    /// The client was pinned by this call
    New(WorkerIndex),
}

impl Assignment {
    pub fn index(self) -> WorkerIndex {
        match self {
            Assignment::Existing(index) | Assignment::New(index) => index,
        }
    }

    pub fn is_new(self) -> bool {
        matches!(self, Assignment::New(_))
    }
}

/// Permanent mapping of client ids to worker indices
#[derive(Debug, Default, Clone, Serialize)]
pub struct DispatchMap {
    entries: HashMap<ClientId, WorkerIndex>,
}

impl DispatchMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Worker the client is pinned to, if any
    pub fn get(&self, client_id: ClientId) -> Option<WorkerIndex> {
        self.entries.get(&client_id).copied()
    }

    /// Return the client's existing pinning, or pin it to whatever `assign`
    /// produces
    ///
    /// `assign` runs only for unknown clients and may block. If it fails no
    /// entry is created and the error is returned unchanged.
    pub fn get_or_assign<E>(
        &mut self,
        client_id: ClientId,
        assign: impl FnOnce() -> Result<WorkerIndex, E>,
    ) -> Result<Assignment, E> {
        match self.entries.entry(client_id) {
            Entry::Occupied(entry) => Ok(Assignment::Existing(*entry.get())),
            Entry::Vacant(entry) => {
                let index = assign()?;
                entry.insert(index);
                Ok(Assignment::New(index))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ordered copy of every pinning
    pub fn snapshot(&self) -> BTreeMap<ClientId, WorkerIndex> {
        self.entries.iter().map(|(&k, &v)| (k, v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_once_then_reuse() {
        let mut map = DispatchMap::new();
        let mut calls = 0;

        let first = map
            .get_or_assign(1, || -> Result<_, ()> {
                calls += 1;
                Ok(2)
            })
            .unwrap();
        let second = map
            .get_or_assign(1, || -> Result<_, ()> {
                calls += 1;
                Ok(0)
            })
            .unwrap();

        assert_eq!(first, Assignment::New(2));
        assert_eq!(second, Assignment::Existing(2));
        assert_eq!(calls, 1);
        assert_eq!(map.get(1), Some(2));
    }

    #[test]
    fn test_failed_assignment_leaves_no_entry() {
        let mut map = DispatchMap::new();

        let result = map.get_or_assign(5, || Err("cancelled"));

        assert_eq!(result, Err("cancelled"));
        assert!(map.is_empty());
        assert_eq!(map.get(5), None);
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let mut map = DispatchMap::new();
        for (client_id, index) in [(9, 0), (3, 1), (7, 0)] {
            map.get_or_assign(client_id, || Ok::<_, ()>(index)).unwrap();
        }

        let snapshot: Vec<_> = map.snapshot().into_iter().collect();
        assert_eq!(snapshot, vec![(3, 1), (7, 0), (9, 0)]);
        assert_eq!(map.len(), 3);
    }
}
