//! Red-black tree iterator implementation.

use super::node::Link;
use super::tree::RedBlackTree;
use core::iter::FusedIterator;
use strata_core::ElementId;

/// Double-ended iterator over a contiguous run of tree elements.
pub struct Iter<'a, T> {
    /// The tree being iterated.
    tree: &'a RedBlackTree<T>,
    /// Next node from the front.
    front: Link,
    /// Next node from the back.
    back: Link,
    /// Elements left between `front` and `back`, both included.
    remaining: usize,
}

impl<'a, T> Iter<'a, T> {
    pub(crate) fn new(tree: &'a RedBlackTree<T>, front: Link, back: Link, remaining: usize) -> Self {
        Self {
            tree,
            front,
            back,
            remaining,
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (ElementId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let slot = self.front?;
        self.remaining -= 1;
        self.front = self.tree.successor(slot);
        Some((self.tree.id_of(slot), &self.tree.node(slot).value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T> DoubleEndedIterator for Iter<'a, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let slot = self.back?;
        self.remaining -= 1;
        self.back = self.tree.predecessor(slot);
        Some((self.tree.id_of(slot), &self.tree.node(slot).value))
    }
}

impl<'a, T> ExactSizeIterator for Iter<'a, T> {}

impl<'a, T> FusedIterator for Iter<'a, T> {}

impl<'a, T> Clone for Iter<'a, T> {
    fn clone(&self) -> Self {
        Self { ..*self }
    }
}
