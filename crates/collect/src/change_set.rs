//! Per-transaction batches of change events.
//!
//! A ChangeSet gathers every element event a collection fired while one
//! outermost write transaction was open, in firing order.

use crate::event::{ChangeKind, CollectionEvent};
use strata_core::Cause;

/// The events of one write transaction.
#[derive(Clone, Debug)]
pub struct ChangeSet<T> {
    /// The transaction's cause, taken from its first event.
    pub cause: Option<Cause>,
    /// Events in firing order.
    pub events: Vec<CollectionEvent<T>>,
}

impl<T> Default for ChangeSet<T> {
    fn default() -> Self {
        Self {
            cause: None,
            events: Vec::new(),
        }
    }
}

impl<T> ChangeSet<T> {
    /// Creates a new empty change set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if there are no changes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the total number of changes.
    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Appends an event.
    pub fn push(&mut self, event: CollectionEvent<T>) {
        if self.cause.is_none() {
            self.cause = Some(event.cause);
        }
        self.events.push(event);
    }

    /// Merges another change set into this one.
    pub fn merge(&mut self, other: ChangeSet<T>) {
        for event in other.events {
            self.push(event);
        }
    }

    /// Clears all changes.
    pub fn clear(&mut self) {
        self.cause = None;
        self.events.clear();
    }

    /// Iterates over `Added` events.
    pub fn added(&self) -> impl Iterator<Item = &CollectionEvent<T>> {
        self.events.iter().filter(|e| e.is_added())
    }

    /// Iterates over `Removed` events.
    pub fn removed(&self) -> impl Iterator<Item = &CollectionEvent<T>> {
        self.events.iter().filter(|e| e.is_removed())
    }

    /// Iterates over `Updated` events as (old, new) pairs.
    pub fn updated(&self) -> impl Iterator<Item = (&T, &T)> {
        self.events.iter().filter_map(|e| match &e.kind {
            ChangeKind::Updated { old } => Some((old, &e.value)),
            _ => None,
        })
    }
}
