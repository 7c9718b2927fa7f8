//! Element-level change events.

use strata_core::{Cause, ElementId};

/// What happened to an element.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeKind<T> {
    /// The element was inserted.
    Added,
    /// The element was removed.
    Removed,
    /// The element's value was replaced. Old and new may be equal when only
    /// the element's provenance changed.
    Updated { old: T },
}

/// A change to one element of a collection.
///
/// `index` is the element's position after the change for `Added` and
/// `Updated`, and its position before the change for `Removed`.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionEvent<T> {
    /// What happened.
    pub kind: ChangeKind<T>,
    /// The affected element.
    pub id: ElementId,
    /// The element's position.
    pub index: usize,
    /// The element's (new) value.
    pub value: T,
    /// The mutation this event belongs to.
    pub cause: Cause,
    /// True for the `Removed`/`Added` pair produced by moving an element.
    pub moved: bool,
}

impl<T> CollectionEvent<T> {
    /// Creates an `Added` event.
    pub fn added(id: ElementId, index: usize, value: T, cause: Cause) -> Self {
        Self {
            kind: ChangeKind::Added,
            id,
            index,
            value,
            cause,
            moved: false,
        }
    }

    /// Creates a `Removed` event.
    pub fn removed(id: ElementId, index: usize, value: T, cause: Cause) -> Self {
        Self {
            kind: ChangeKind::Removed,
            id,
            index,
            value,
            cause,
            moved: false,
        }
    }

    /// Creates an `Updated` event.
    pub fn updated(id: ElementId, index: usize, old: T, value: T, cause: Cause) -> Self {
        Self {
            kind: ChangeKind::Updated { old },
            id,
            index,
            value,
            cause,
            moved: false,
        }
    }

    /// Flags the event as half of a move.
    pub fn as_move(mut self, moved: bool) -> Self {
        self.moved = moved;
        self
    }

    /// Returns true for `Added` events.
    #[inline]
    pub fn is_added(&self) -> bool {
        matches!(self.kind, ChangeKind::Added)
    }

    /// Returns true for `Removed` events.
    #[inline]
    pub fn is_removed(&self) -> bool {
        matches!(self.kind, ChangeKind::Removed)
    }

    /// Returns true for `Updated` events.
    #[inline]
    pub fn is_updated(&self) -> bool {
        matches!(self.kind, ChangeKind::Updated { .. })
    }

    /// Returns the previous value of an `Updated` event.
    pub fn old_value(&self) -> Option<&T> {
        match &self.kind {
            ChangeKind::Updated { old } => Some(old),
            _ => None,
        }
    }
}
