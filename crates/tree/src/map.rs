//! Sorted map backed by a counted red-black tree.

use crate::comparator::{Comparator, SimpleComparator};
use crate::range::{KeyRange, SubRange};
use crate::rbtree::RedBlackTree;
use core::fmt;
use strata_core::ElementId;

/// A map kept sorted by key, with positional access to entries.
pub struct TreeMap<K, V, C = SimpleComparator> {
    tree: RedBlackTree<(K, V)>,
    cmp: C,
}

impl<K: Ord, V> TreeMap<K, V, SimpleComparator> {
    /// Creates an empty ascending map.
    pub fn new() -> Self {
        Self::with_comparator(SimpleComparator::asc())
    }
}

impl<K: Ord, V> Default for TreeMap<K, V, SimpleComparator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C: Comparator<K>> TreeMap<K, V, C> {
    /// Creates an empty map ordered by `cmp`.
    pub fn with_comparator(cmp: C) -> Self {
        Self {
            tree: RedBlackTree::new(),
            cmp,
        }
    }

    /// Returns the number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Returns true if the map is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Returns the modification stamp.
    #[inline]
    pub fn stamp(&self) -> u64 {
        self.tree.stamp()
    }

    /// Inserts an entry, returning the value it replaced.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(id) = self.entry_id(&key) {
            return self
                .tree
                .value_mut(id)
                .map(|entry| core::mem::replace(&mut entry.1, value));
        }
        let cmp = &self.cmp;
        self.tree
            .insert_sorted((key, value), |a, b| cmp.compare(&a.0, &b.0), false);
        None
    }

    /// Returns the handle of the entry for `key`.
    pub fn entry_id(&self, key: &K) -> Option<ElementId> {
        self.tree.find(|(other, _)| self.cmp.compare(key, other))
    }

    /// Returns the entry behind a handle.
    pub fn entry(&self, id: ElementId) -> Option<(&K, &V)> {
        self.tree.value(id).map(|(k, v)| (k, v))
    }

    /// Returns the value for `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        let id = self.entry_id(key)?;
        self.tree.value(id).map(|(_, v)| v)
    }

    /// Returns the value for `key` mutably.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let id = self.entry_id(key)?;
        self.tree.value_mut(id).map(|(_, v)| v)
    }

    /// Returns true if the map has an entry for `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.entry_id(key).is_some()
    }

    /// Returns the index of the entry for `key`.
    pub fn index_of(&self, key: &K) -> Option<usize> {
        self.tree.index_of(self.entry_id(key)?)
    }

    /// Returns the entry at `index`.
    pub fn get_index(&self, index: usize) -> Option<(&K, &V)> {
        self.tree.at(index).map(|(_, (k, v))| (k, v))
    }

    /// Removes the entry for `key`, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let id = self.entry_id(key)?;
        self.tree.try_remove(id).map(|(_, v)| v)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.tree.clear();
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&K, &V)> + '_ {
        self.tree.iter().map(|(_, (k, v))| (k, v))
    }

    /// Iterates over keys in order.
    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    /// Iterates over values in key order.
    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    /// Returns the window of entries whose keys fall within `range`.
    pub fn range(&self, range: &KeyRange<K>) -> SubRange<'_, (K, V)> {
        self.tree.range_by(range, |(k, _)| k, &self.cmp)
    }
}

impl<K: fmt::Debug, V: fmt::Debug, C> fmt::Debug for TreeMap<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.tree.iter().map(|(_, (k, v))| (k, v)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_insert_replaces() {
        let mut map = TreeMap::new();
        assert_eq!(map.insert(1, "a"), None);
        assert_eq!(map.insert(1, "b"), Some("a"));
        assert_eq!(map.get(&1), Some(&"b"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_keys_sorted() {
        let mut map = TreeMap::new();
        for k in [30, 10, 20] {
            map.insert(k, k * 2);
        }
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), [10, 20, 30]);
        assert_eq!(map.values().rev().copied().collect::<Vec<_>>(), [60, 40, 20]);
        assert_eq!(map.index_of(&20), Some(1));
        assert_eq!(map.get_index(2), Some((&30, &60)));
    }

    #[test]
    fn test_remove_and_get_mut() {
        let mut map = TreeMap::new();
        map.insert("x", 1);
        map.insert("y", 2);
        *map.get_mut(&"y").unwrap() += 10;
        assert_eq!(map.get(&"y"), Some(&12));
        assert_eq!(map.remove(&"x"), Some(1));
        assert!(!map.contains_key(&"x"));
    }

    #[test]
    fn test_range() {
        let mut map = TreeMap::new();
        for k in 0..10 {
            map.insert(k, ());
        }
        let sub = map.range(&KeyRange::from_bounds(7..));
        assert_eq!(sub.len(), 3);
    }
}
