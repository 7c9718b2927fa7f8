//! Sorted set backed by a counted red-black tree.

use crate::comparator::{Comparator, SimpleComparator};
use crate::range::{KeyRange, SubRange};
use crate::rbtree::{Iter, RedBlackTree, SearchDirection};
use core::fmt;
use strata_core::ElementId;

/// A set of values kept sorted by a comparator, with positional access.
///
/// Two values that compare equal are the same set member.
pub struct TreeSet<T, C = SimpleComparator> {
    tree: RedBlackTree<T>,
    cmp: C,
}

impl<T: Ord> TreeSet<T, SimpleComparator> {
    /// Creates an empty ascending set.
    pub fn new() -> Self {
        Self::with_comparator(SimpleComparator::asc())
    }
}

impl<T: Ord> Default for TreeSet<T, SimpleComparator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C: Comparator<T>> TreeSet<T, C> {
    /// Creates an empty set ordered by `cmp`.
    pub fn with_comparator(cmp: C) -> Self {
        Self {
            tree: RedBlackTree::new(),
            cmp,
        }
    }

    /// Returns the comparator.
    pub fn comparator(&self) -> &C {
        &self.cmp
    }

    /// Returns the underlying tree.
    pub fn tree(&self) -> &RedBlackTree<T> {
        &self.tree
    }

    /// Returns the number of values.
    #[inline]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Returns true if the set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Returns the modification stamp.
    #[inline]
    pub fn stamp(&self) -> u64 {
        self.tree.stamp()
    }

    /// Inserts a value.
    ///
    /// Returns the handle of the member and whether it was newly inserted. An
    /// equal member already present is kept and `value` is dropped.
    pub fn insert(&mut self, value: T) -> (ElementId, bool) {
        if let Some(existing) = self.find(&value) {
            return (existing, false);
        }
        let cmp = &self.cmp;
        let id = self.tree.insert_sorted(value, |a, b| cmp.compare(a, b), false);
        (id, true)
    }

    /// Returns the handle of the member equal to `value`.
    pub fn find(&self, value: &T) -> Option<ElementId> {
        self.tree.find(|other| self.cmp.compare(value, other))
    }

    /// Returns true if a member equals `value`.
    pub fn contains(&self, value: &T) -> bool {
        self.find(value).is_some()
    }

    /// Returns the value behind a handle.
    pub fn value(&self, id: ElementId) -> Option<&T> {
        self.tree.value(id)
    }

    /// Returns the member at `index`.
    pub fn get(&self, index: usize) -> Option<ElementId> {
        self.tree.get(index)
    }

    /// Returns the index of a member.
    pub fn index_of(&self, id: ElementId) -> Option<usize> {
        self.tree.index_of(id)
    }

    /// Returns the first member.
    pub fn first(&self) -> Option<ElementId> {
        self.tree.first()
    }

    /// Returns the last member.
    pub fn last(&self) -> Option<ElementId> {
        self.tree.last()
    }

    /// Returns the member closest to `value` in a direction.
    ///
    /// `Less` with `inclusive` is the floor of `value`, `Greater` with
    /// `inclusive` its ceiling.
    pub fn closest(&self, value: &T, direction: SearchDirection, inclusive: bool) -> Option<ElementId> {
        self.tree
            .find_closest(|other| self.cmp.compare(value, other), direction, inclusive)
    }

    /// Returns the member after `id`.
    pub fn next(&self, id: ElementId) -> Option<ElementId> {
        self.tree.next(id)
    }

    /// Returns the member before `id`.
    pub fn prev(&self, id: ElementId) -> Option<ElementId> {
        self.tree.prev(id)
    }

    /// Replaces a member's value in place.
    ///
    /// Succeeds only if `value` sorts strictly between the member's
    /// neighbors, so the order and uniqueness are preserved. Otherwise (or if
    /// `id` is absent) the value is handed back.
    pub fn replace(&mut self, id: ElementId, value: T) -> Result<T, T> {
        if !self.tree.contains(id) {
            return Err(value);
        }
        let after_prev = self
            .tree
            .prev(id)
            .and_then(|prev| self.tree.value(prev))
            .map_or(true, |prev| self.cmp.is_less(prev, &value));
        let before_next = self
            .tree
            .next(id)
            .and_then(|next| self.tree.value(next))
            .map_or(true, |next| self.cmp.is_less(&value, next));
        if !(after_prev && before_next) {
            return Err(value);
        }
        match self.tree.replace(id, value) {
            Some(old) => Ok(old),
            None => unreachable!("member presence checked above"),
        }
    }

    /// Removes the member equal to `value`.
    pub fn remove(&mut self, value: &T) -> Option<T> {
        let id = self.find(value)?;
        self.tree.try_remove(id)
    }

    /// Removes a member by handle.
    pub fn remove_id(&mut self, id: ElementId) -> Option<T> {
        self.tree.try_remove(id)
    }

    /// Removes every member.
    pub fn clear(&mut self) {
        self.tree.clear();
    }

    /// Iterates over the members in order.
    pub fn iter(&self) -> Iter<'_, T> {
        self.tree.iter()
    }

    /// Returns the window of members inside `range`.
    pub fn range(&self, range: &KeyRange<T>) -> SubRange<'_, T> {
        self.tree.range_by(range, |value| value, &self.cmp)
    }
}

impl<T: fmt::Debug, C> fmt::Debug for TreeSet<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.tree.iter().map(|(_, v)| v)).finish()
    }
}

impl<T: Ord> FromIterator<T> for TreeSet<T, SimpleComparator> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for value in iter {
            set.insert(value);
        }
        set
    }
}
