//! Key ranges and positional sub-ranges of a tree.

use crate::comparator::{Comparator, SimpleComparator};
use crate::rbtree::{Iter, RedBlackTree, SearchDirection};
use core::cmp::Ordering;
use core::ops::{Bound, RangeBounds};
use strata_core::ElementId;

/// The keys lying between a lower and an upper bound.
///
/// Bounds are judged by whatever comparator orders the keys, so a range over
/// a descending tree names its larger key as the lower bound.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyRange<K> {
    lower: Bound<K>,
    upper: Bound<K>,
}

impl<K> KeyRange<K> {
    pub fn new(lower: Bound<K>, upper: Bound<K>) -> Self {
        Self { lower, upper }
    }

    /// Every key.
    pub fn full() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    /// Copies the bounds of a standard range, e.g. `KeyRange::from_bounds(3..=7)`.
    pub fn from_bounds<R: RangeBounds<K>>(range: R) -> Self
    where
        K: Clone,
    {
        Self::new(range.start_bound().cloned(), range.end_bound().cloned())
    }

    /// Keys equal to `key`.
    pub fn only(key: K) -> Self
    where
        K: Clone,
    {
        Self::new(Bound::Included(key.clone()), Bound::Included(key))
    }

    pub fn is_full(&self) -> bool {
        matches!((&self.lower, &self.upper), (Bound::Unbounded, Bound::Unbounded))
    }

    pub fn lower(&self) -> Bound<&K> {
        edge(&self.lower)
    }

    pub fn upper(&self) -> Bound<&K> {
        edge(&self.upper)
    }

    /// Checks `key` against both bounds under `cmp`.
    pub fn contains_by<C: Comparator<K> + ?Sized>(&self, key: &K, cmp: &C) -> bool {
        let above = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(bound) => cmp.compare(key, bound) != Ordering::Less,
            Bound::Excluded(bound) => cmp.compare(key, bound) == Ordering::Greater,
        };
        above
            && match &self.upper {
                Bound::Unbounded => true,
                Bound::Included(bound) => cmp.compare(key, bound) != Ordering::Greater,
                Bound::Excluded(bound) => cmp.compare(key, bound) == Ordering::Less,
            }
    }
}

impl<K: Ord> KeyRange<K> {
    /// Checks `key` against both bounds in natural order.
    pub fn contains(&self, key: &K) -> bool {
        self.contains_by(key, &SimpleComparator::asc())
    }
}

fn edge<K>(bound: &Bound<K>) -> Bound<&K> {
    match bound {
        Bound::Included(key) => Bound::Included(key),
        Bound::Excluded(key) => Bound::Excluded(key),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// A contiguous positional window `start..end` of a tree.
pub struct SubRange<'a, T> {
    tree: &'a RedBlackTree<T>,
    start: usize,
    end: usize,
}

impl<'a, T> SubRange<'a, T> {
    pub(crate) fn new(tree: &'a RedBlackTree<T>, start: usize, end: usize) -> Self {
        let end = end.min(tree.len());
        Self {
            tree,
            start: start.min(end),
            end,
        }
    }

    /// Returns the number of elements in the window.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true if the window is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns the tree index of the window's first element.
    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Returns the element at `index` within the window.
    pub fn get(&self, index: usize) -> Option<ElementId> {
        if index < self.len() {
            self.tree.get(self.start + index)
        } else {
            None
        }
    }

    /// Returns the index of an element within the window.
    pub fn index_of(&self, id: ElementId) -> Option<usize> {
        let index = self.tree.index_of(id)?;
        if index >= self.start && index < self.end {
            Some(index - self.start)
        } else {
            None
        }
    }

    /// Iterates over the window.
    pub fn iter(&self) -> Iter<'a, T> {
        self.tree.iter_between(self.start, self.end)
    }
}

impl<T> RedBlackTree<T> {
    /// Returns the window of elements whose keys fall within `range`.
    ///
    /// The tree must be sorted by `key_of` under `cmp`.
    pub fn range_by<K, C, F>(&self, range: &KeyRange<K>, key_of: F, cmp: &C) -> SubRange<'_, T>
    where
        C: Comparator<K> + ?Sized,
        F: Fn(&T) -> &K,
    {
        // The element nearest to a bound on its inner side, if any.
        let nearest = |bound: Bound<&K>, direction: SearchDirection| {
            let (key, inclusive) = match bound {
                Bound::Unbounded => return None,
                Bound::Included(key) => (key, true),
                Bound::Excluded(key) => (key, false),
            };
            let found = self.find_closest(|value| cmp.compare(key, key_of(value)), direction, inclusive);
            Some(found.and_then(|id| self.index_of(id)))
        };
        let start = match nearest(range.lower(), SearchDirection::Greater) {
            None => 0,
            Some(index) => index.unwrap_or(self.len()),
        };
        let end = match nearest(range.upper(), SearchDirection::Less) {
            None => self.len(),
            Some(index) => index.map_or(0, |index| index + 1),
        };
        SubRange::new(self, start, end.max(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn tree_of(values: &[i32]) -> RedBlackTree<i32> {
        let mut tree = RedBlackTree::new();
        for &v in values {
            tree.insert_sorted(v, |a, b| a.cmp(b), false);
        }
        tree
    }

    fn window(tree: &RedBlackTree<i32>, range: KeyRange<i32>) -> Vec<i32> {
        tree.range_by(&range, |v| v, &SimpleComparator::asc())
            .iter()
            .map(|(_, v)| *v)
            .collect()
    }

    #[test]
    fn test_key_range_contains() {
        let range = KeyRange::from_bounds(10..20);
        assert!(range.contains(&10));
        assert!(range.contains(&15));
        assert!(!range.contains(&20));
        assert!(!range.contains(&9));

        assert!(KeyRange::full().contains(&i32::MIN));
        assert!(KeyRange::only(5).contains(&5));
        assert!(!KeyRange::only(5).contains(&6));
        assert!(!KeyRange::new(Bound::Excluded(5), Bound::Unbounded).contains(&5));
        assert!(KeyRange::from_bounds(..=5).contains(&5));
    }

    #[test]
    fn test_key_range_contains_by_descending() {
        let range = KeyRange::from_bounds(20..=10);
        let desc = SimpleComparator::desc();
        assert!(range.contains_by(&15, &desc));
        assert!(!range.contains_by(&25, &desc));
        assert!(!range.contains(&15));
    }

    #[test]
    fn test_range_by_bounds() {
        let tree = tree_of(&[1, 3, 5, 5, 7, 9]);
        assert_eq!(window(&tree, KeyRange::full()), [1, 3, 5, 5, 7, 9]);
        assert_eq!(window(&tree, KeyRange::only(5)), [5, 5]);
        assert_eq!(window(&tree, KeyRange::new(Bound::Excluded(5), Bound::Unbounded)), [7, 9]);
        assert_eq!(window(&tree, KeyRange::from_bounds(..=5)), [1, 3, 5, 5]);
        assert_eq!(window(&tree, KeyRange::from_bounds(2..=8)), [3, 5, 5, 7]);
        assert!(window(&tree, KeyRange::only(4)).is_empty());
        assert!(window(&tree, KeyRange::from_bounds(8..=2)).is_empty());
    }

    #[test]
    fn test_sub_range_positions() {
        let tree = tree_of(&[1, 2, 3, 4, 5]);
        let sub = tree.range_by(&KeyRange::from_bounds(2..=4), |v| v, &SimpleComparator::asc());
        assert_eq!(sub.len(), 3);
        assert_eq!(sub.start(), 1);
        let second = sub.get(1).unwrap();
        assert_eq!(tree.value(second), Some(&3));
        assert_eq!(sub.index_of(second), Some(1));
        assert_eq!(sub.index_of(tree.get(0).unwrap()), None);
        assert_eq!(sub.get(3), None);
    }
}
