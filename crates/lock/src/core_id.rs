//! Identity of the physical locks behind a lockable.

use crate::lock::{CollectionLock, LockId};
use std::collections::BTreeSet;

/// The set of physical locks a lockable acquires.
///
/// Two lockables whose core ids intersect serialize on at least one shared
/// physical lock, so their write transactions are mutually exclusive. This
/// can be checked without acquiring anything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CoreId {
    locks: BTreeSet<LockId>,
}

impl CoreId {
    /// Creates an empty core id.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates the core id of a single lock.
    pub fn of(id: LockId) -> Self {
        let mut locks = BTreeSet::new();
        locks.insert(id);
        Self { locks }
    }

    /// Creates the core id of a set of locks.
    pub fn from_locks(locks: &[CollectionLock]) -> Self {
        locks.iter().map(CollectionLock::id).collect()
    }

    /// Returns the union of two core ids.
    pub fn union(&self, other: &CoreId) -> CoreId {
        self.locks.union(&other.locks).copied().collect()
    }

    /// Returns true if both core ids share a physical lock.
    pub fn intersects(&self, other: &CoreId) -> bool {
        // Iterate the smaller set
        let (small, large) = if self.locks.len() <= other.locks.len() {
            (&self.locks, &other.locks)
        } else {
            (&other.locks, &self.locks)
        };
        small.iter().any(|id| large.contains(id))
    }

    /// Returns true if the core id includes `id`.
    pub fn contains(&self, id: LockId) -> bool {
        self.locks.contains(&id)
    }

    /// Returns the number of physical locks.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns true if no lock is involved.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Iterates over the lock ids in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = LockId> + '_ {
        self.locks.iter().copied()
    }
}

impl FromIterator<LockId> for CoreId {
    fn from_iter<I: IntoIterator<Item = LockId>>(iter: I) -> Self {
        Self {
            locks: iter.into_iter().collect(),
        }
    }
}
