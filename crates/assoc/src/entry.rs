//! Key entries and their value collections.

use crate::info::Roots;
use hashbrown::HashMap;
use std::cmp::Ordering;
use strata_core::ElementId;
use strata_tree::RedBlackTree;

/// Handle to one key entry of a grouped multimap.
///
/// The handle is invalidated when the entry is removed, either because its
/// key left the key flow or because empty keys are pruned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyEntryId(pub(crate) ElementId);

/// A value element grouped under a key.
#[derive(Clone, Debug)]
pub(crate) struct ValueRef<V> {
    pub element: ElementId,
    pub value: V,
    /// Roots shared by the key and the value element.
    pub roots: Roots,
}

/// The values grouped under one key, in value flow order.
#[derive(Debug)]
pub(crate) struct ValueCollection<V> {
    tree: RedBlackTree<ValueRef<V>>,
    refs: HashMap<ElementId, ElementId>,
}

impl<V: Clone> ValueCollection<V> {
    pub fn new() -> Self {
        Self {
            tree: RedBlackTree::new(),
            refs: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn contains(&self, element: ElementId) -> bool {
        self.refs.contains_key(&element)
    }

    pub fn set_roots(&mut self, element: ElementId, roots: Roots) {
        if let Some(id) = self.refs.get(&element) {
            if let Some(value_ref) = self.tree.value_mut(*id) {
                value_ref.roots = roots;
            }
        }
    }

    /// Inserts a value ordered by `position`, returning its index.
    pub fn insert<F>(&mut self, value_ref: ValueRef<V>, mut position: F) -> usize
    where
        F: FnMut(ElementId, ElementId) -> Option<Ordering>,
    {
        let element = value_ref.element;
        let id = self.tree.insert_sorted(
            value_ref,
            |a, b| position(a.element, b.element).unwrap_or(Ordering::Greater),
            false,
        );
        self.refs.insert(element, id);
        self.tree.index_of(id).unwrap_or_default()
    }

    /// Removes a value, returning its former index and reference.
    pub fn remove(&mut self, element: ElementId) -> Option<(usize, ValueRef<V>)> {
        let id = self.refs.remove(&element)?;
        let index = self.tree.index_of(id)?;
        Some((index, self.tree.remove(id)))
    }

    /// Replaces a value, returning its index and the previous value.
    pub fn update(&mut self, element: ElementId, value: V) -> Option<(usize, V)> {
        let id = *self.refs.get(&element)?;
        let index = self.tree.index_of(id)?;
        let value_ref = self.tree.value_mut(id)?;
        Some((index, std::mem::replace(&mut value_ref.value, value)))
    }

    pub fn values(&self) -> Vec<V> {
        self.tree.iter().map(|(_, r)| r.value.clone()).collect()
    }

    pub fn refs(&self) -> impl Iterator<Item = &ValueRef<V>> + '_ {
        self.tree.iter().map(|(_, r)| r)
    }
}

/// One key and the values grouped under it.
#[derive(Debug)]
pub(crate) struct KeyEntry<K, V> {
    pub key: K,
    pub key_element: ElementId,
    pub values: ValueCollection<V>,
}

impl<K, V: Clone> KeyEntry<K, V> {
    pub fn new(key: K, key_element: ElementId) -> Self {
        Self {
            key,
            key_element,
            values: ValueCollection::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_ref(slot: u32, value: &'static str) -> ValueRef<&'static str> {
        ValueRef {
            element: ElementId::new(slot, 0),
            value,
            roots: Roots::new(),
        }
    }

    fn by_slot(a: ElementId, b: ElementId) -> Option<Ordering> {
        Some(a.slot().cmp(&b.slot()))
    }

    #[test]
    fn test_values_follow_position() {
        let mut values = ValueCollection::new();
        assert_eq!(values.insert(value_ref(5, "five"), by_slot), 0);
        assert_eq!(values.insert(value_ref(2, "two"), by_slot), 0);
        assert_eq!(values.insert(value_ref(9, "nine"), by_slot), 2);
        assert_eq!(values.values(), vec!["two", "five", "nine"]);

        let (index, removed) = values.remove(ElementId::new(5, 0)).unwrap();
        assert_eq!((index, removed.value), (1, "five"));
        assert!(!values.contains(ElementId::new(5, 0)));
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_update_keeps_position() {
        let mut values = ValueCollection::new();
        values.insert(value_ref(1, "a"), by_slot);
        values.insert(value_ref(2, "b"), by_slot);
        assert_eq!(values.update(ElementId::new(2, 0), "B"), Some((1, "b")));
        assert_eq!(values.values(), vec!["a", "B"]);
        assert!(values.update(ElementId::new(3, 0), "c").is_none());
    }
}
