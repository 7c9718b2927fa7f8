//! Counted red-black tree implementation.

use super::iter::Iter;
use super::node::{next_generation, Color, Link, Node, Slot, SlotId, RETIRED};
use alloc::vec::Vec;
use core::cmp::Ordering;
use core::fmt;
use core::mem;
use strata_core::ElementId;

/// Direction of a closest-match search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchDirection {
    /// Find the greatest element below the target.
    Less,
    /// Find the least element above the target.
    Greater,
}

/// An invariant violation found by [`RedBlackTree::validate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeError {
    /// The root is red.
    RootNotBlack,
    /// The root has a parent link.
    RootHasParent,
    /// A child link points at a vacant slot or disagrees with the child's parent link.
    BrokenLink { slot: u32 },
    /// A node's stored subtree size is wrong.
    SizeMismatch { slot: u32, expected: usize, actual: usize },
    /// A red node has a red child.
    RedRed { slot: u32 },
    /// The two subtrees of a node have different black heights.
    BlackHeight { slot: u32 },
    /// The number of occupied slots differs from the root's subtree size.
    LengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::RootNotBlack => write!(f, "Root node is red"),
            TreeError::RootHasParent => write!(f, "Root node has a parent"),
            TreeError::BrokenLink { slot } => write!(f, "Broken link at slot {}", slot),
            TreeError::SizeMismatch {
                slot,
                expected,
                actual,
            } => write!(
                f,
                "Size mismatch at slot {}: expected {}, found {}",
                slot, expected, actual
            ),
            TreeError::RedRed { slot } => write!(f, "Red node at slot {} has a red parent", slot),
            TreeError::BlackHeight { slot } => {
                write!(f, "Unequal black height below slot {}", slot)
            }
            TreeError::LengthMismatch { expected, actual } => write!(
                f,
                "Tree holds {} nodes but the root counts {}",
                actual, expected
            ),
        }
    }
}

/// A red-black tree whose nodes carry subtree sizes.
///
/// Elements are addressed by stable [`ElementId`] handles that survive
/// insertions and removals of other elements. Besides the usual ordered
/// search, the stored sizes give O(log n) positional access in both
/// directions: [`get`](Self::get) maps an index to a handle and
/// [`index_of`](Self::index_of) maps a handle back to its index.
///
/// The tree does not own an ordering. Positional inserts
/// ([`insert_after`](Self::insert_after), [`insert_at`](Self::insert_at), ...)
/// make it a list; [`insert_sorted`](Self::insert_sorted) with a consistent
/// comparator makes it a sorted multiset.
///
/// Slots are addressed by `u32`: a tree holds at most `u32::MAX + 1` slots
/// over its lifetime, and allocating past that panics. A slot whose
/// generation counter is exhausted is retired instead of reused, so a handle
/// never aliases a later element.
pub struct RedBlackTree<T> {
    /// Arena of node slots.
    slots: Vec<Slot<T>>,
    /// Head of the vacant slot list.
    free: Link,
    /// Root node.
    root: Link,
    /// Number of occupied slots.
    occupied: usize,
    /// Modification stamp, bumped by every structural change or value replacement.
    stamp: u64,
}

impl<T> Default for RedBlackTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RedBlackTree<T> {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: None,
            root: None,
            occupied: 0,
            stamp: 0,
        }
    }

    /// Returns the number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.size_of(self.root)
    }

    /// Returns true if the tree is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Returns the modification stamp.
    ///
    /// Optimistic readers record the stamp, read, and retry if it moved.
    #[inline]
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// Returns true if the handle refers to a present element.
    #[inline]
    pub fn contains(&self, id: ElementId) -> bool {
        self.resolve(id).is_some()
    }

    /// Returns the value behind a handle.
    pub fn value(&self, id: ElementId) -> Option<&T> {
        self.resolve(id).map(|slot| &self.node(slot).value)
    }

    /// Returns the value behind a handle mutably.
    ///
    /// Callers keeping the tree sorted must not change the value's ordering.
    pub fn value_mut(&mut self, id: ElementId) -> Option<&mut T> {
        let slot = self.resolve(id)?;
        Some(&mut self.node_mut(slot).value)
    }

    /// Replaces the value behind a handle, returning the previous value.
    pub fn replace(&mut self, id: ElementId, value: T) -> Option<T> {
        let slot = self.resolve(id)?;
        self.stamp += 1;
        Some(mem::replace(&mut self.node_mut(slot).value, value))
    }

    /// Returns the first element.
    pub fn first(&self) -> Option<ElementId> {
        self.root.map(|root| self.id_of(self.min_of(root)))
    }

    /// Returns the last element.
    pub fn last(&self) -> Option<ElementId> {
        self.root.map(|root| self.id_of(self.max_of(root)))
    }

    /// Returns the element at `index`.
    pub fn get(&self, index: usize) -> Option<ElementId> {
        self.slot_at(index).map(|slot| self.id_of(slot))
    }

    /// Returns the element and its value at `index`.
    pub fn at(&self, index: usize) -> Option<(ElementId, &T)> {
        self.slot_at(index)
            .map(|slot| (self.id_of(slot), &self.node(slot).value))
    }

    /// Returns the index of an element.
    ///
    /// Walks from the node to the root, adding the left subtree size plus one
    /// every time the walk ascends from a right child.
    pub fn index_of(&self, id: ElementId) -> Option<usize> {
        let slot = self.resolve(id)?;
        let mut index = self.size_of(self.left(slot));
        let mut current = slot;
        while let Some(parent) = self.parent(current) {
            if self.right(parent) == Some(current) {
                index += self.size_of(self.left(parent)) + 1;
            }
            current = parent;
        }
        Some(index)
    }

    /// Returns the element after `id`.
    pub fn next(&self, id: ElementId) -> Option<ElementId> {
        let slot = self.resolve(id)?;
        self.successor(slot).map(|s| self.id_of(s))
    }

    /// Returns the element before `id`.
    pub fn prev(&self, id: ElementId) -> Option<ElementId> {
        let slot = self.resolve(id)?;
        self.predecessor(slot).map(|s| self.id_of(s))
    }

    /// Compares the positions of two present elements.
    pub fn compare_position(&self, a: ElementId, b: ElementId) -> Option<Ordering> {
        if a == b {
            return self.resolve(a).map(|_| Ordering::Equal);
        }
        Some(self.index_of(a)?.cmp(&self.index_of(b)?))
    }

    /// Inserts a value at the front.
    pub fn insert_first(&mut self, value: T) -> ElementId {
        let slot = match self.root {
            None => self.attach(value, None, true),
            Some(root) => {
                let min = self.min_of(root);
                self.attach(value, Some(min), true)
            }
        };
        self.id_of(slot)
    }

    /// Inserts a value at the back.
    pub fn insert_last(&mut self, value: T) -> ElementId {
        let slot = match self.root {
            None => self.attach(value, None, false),
            Some(root) => {
                let max = self.max_of(root);
                self.attach(value, Some(max), false)
            }
        };
        self.id_of(slot)
    }

    /// Inserts a value so that it ends up at `index`.
    ///
    /// Returns the value back if `index > len`.
    pub fn insert_at(&mut self, index: usize, value: T) -> Result<ElementId, T> {
        let len = self.len();
        if index > len {
            return Err(value);
        }
        if index == len {
            return Ok(self.insert_last(value));
        }
        match self.slot_at(index) {
            Some(target) => Ok(self.insert_before_slot(target, value)),
            None => Err(value),
        }
    }

    /// Inserts a value immediately after an element.
    ///
    /// Returns the value back if `after` is not present.
    pub fn insert_after(&mut self, after: ElementId, value: T) -> Result<ElementId, T> {
        match self.resolve(after) {
            Some(slot) => Ok(self.insert_after_slot(slot, value)),
            None => Err(value),
        }
    }

    /// Inserts a value immediately before an element.
    ///
    /// Returns the value back if `before` is not present.
    pub fn insert_before(&mut self, before: ElementId, value: T) -> Result<ElementId, T> {
        match self.resolve(before) {
            Some(slot) => Ok(self.insert_before_slot(slot, value)),
            None => Err(value),
        }
    }

    /// Inserts a value at its sorted position.
    ///
    /// Equal values keep the order already established in the tree: the new
    /// value lands after the last equal element, or before the first one when
    /// `prefer_first` is set.
    pub fn insert_sorted<F>(&mut self, value: T, mut compare: F, prefer_first: bool) -> ElementId
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let mut parent = None;
        let mut as_left = true;
        let mut current = self.root;
        while let Some(slot) = current {
            let go_left = match compare(&value, &self.node(slot).value) {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal => prefer_first,
            };
            parent = Some(slot);
            as_left = go_left;
            current = if go_left {
                self.left(slot)
            } else {
                self.right(slot)
            };
        }
        let slot = self.attach(value, parent, as_left);
        self.id_of(slot)
    }

    /// Finds an element matching a search.
    ///
    /// `search` reports how the sought position compares to a stored value.
    pub fn find<F>(&self, mut search: F) -> Option<ElementId>
    where
        F: FnMut(&T) -> Ordering,
    {
        let mut current = self.root;
        while let Some(slot) = current {
            current = match search(&self.node(slot).value) {
                Ordering::Less => self.left(slot),
                Ordering::Greater => self.right(slot),
                Ordering::Equal => return Some(self.id_of(slot)),
            };
        }
        None
    }

    /// Finds the element closest to a search target in one direction.
    ///
    /// With [`SearchDirection::Less`] this is the greatest element below the
    /// target (or equal to it when `inclusive`, the last of several equal
    /// ones). With [`SearchDirection::Greater`] it is the least element above
    /// the target (or the first equal one when `inclusive`).
    pub fn find_closest<F>(
        &self,
        mut search: F,
        direction: SearchDirection,
        inclusive: bool,
    ) -> Option<ElementId>
    where
        F: FnMut(&T) -> Ordering,
    {
        let mut best = None;
        let mut current = self.root;
        while let Some(slot) = current {
            let target = search(&self.node(slot).value);
            let qualifies = match (direction, target) {
                (_, Ordering::Equal) => inclusive,
                (SearchDirection::Less, ord) => ord == Ordering::Greater,
                (SearchDirection::Greater, ord) => ord == Ordering::Less,
            };
            let go_right = match direction {
                SearchDirection::Less => qualifies,
                SearchDirection::Greater => !qualifies,
            };
            if qualifies {
                best = Some(slot);
            }
            current = if go_right {
                self.right(slot)
            } else {
                self.left(slot)
            };
        }
        best.map(|slot| self.id_of(slot))
    }

    /// Removes an element, returning its value.
    ///
    /// # Panics
    ///
    /// Panics if the handle is not present. Removing an absent element is a
    /// caller bug; use [`try_remove`](Self::try_remove) when presence is unknown.
    pub fn remove(&mut self, id: ElementId) -> T {
        match self.resolve(id) {
            Some(slot) => self.remove_slot(slot),
            None => panic!("removing absent element {:?}", id),
        }
    }

    /// Removes an element if it is present.
    pub fn try_remove(&mut self, id: ElementId) -> Option<T> {
        let slot = self.resolve(id)?;
        Some(self.remove_slot(slot))
    }

    /// Removes every element. All outstanding handles become invalid.
    pub fn clear(&mut self) {
        let mut free = None;
        for index in (0..self.slots.len()).rev() {
            let generation = match &self.slots[index] {
                Slot::Occupied { generation, .. } => next_generation(*generation),
                Slot::Vacant { generation, .. } => *generation,
            };
            let reusable = generation != RETIRED;
            self.slots[index] = Slot::Vacant {
                generation,
                next_free: if reusable { free } else { None },
            };
            if reusable {
                free = Some(slot_id(index));
            }
        }
        self.free = free;
        self.root = None;
        self.occupied = 0;
        self.stamp += 1;
    }

    /// Returns a double-ended iterator over handles and values.
    pub fn iter(&self) -> Iter<'_, T> {
        match self.root {
            None => Iter::new(self, None, None, 0),
            Some(root) => Iter::new(
                self,
                Some(self.min_of(root)),
                Some(self.max_of(root)),
                self.len(),
            ),
        }
    }

    /// Returns an iterator over the elements with indices in `start..end`.
    pub fn iter_between(&self, start: usize, end: usize) -> Iter<'_, T> {
        let end = end.min(self.len());
        if start >= end {
            return Iter::new(self, None, None, 0);
        }
        Iter::new(self, self.slot_at(start), self.slot_at(end - 1), end - start)
    }

    /// Checks every structural invariant.
    ///
    /// Verifies parent/child link agreement, subtree sizes, the red-red rule,
    /// equal black heights and the total element count.
    pub fn validate(&self) -> Result<(), TreeError> {
        match self.root {
            None => {
                if self.occupied != 0 {
                    return Err(TreeError::LengthMismatch {
                        expected: 0,
                        actual: self.occupied,
                    });
                }
                Ok(())
            }
            Some(root) => {
                if !self.is_occupied(root) {
                    return Err(TreeError::BrokenLink { slot: root });
                }
                if self.node(root).color != Color::Black {
                    return Err(TreeError::RootNotBlack);
                }
                if self.node(root).parent.is_some() {
                    return Err(TreeError::RootHasParent);
                }
                self.validate_subtree(root)?;
                let expected = self.node(root).size;
                if expected != self.occupied {
                    return Err(TreeError::LengthMismatch {
                        expected,
                        actual: self.occupied,
                    });
                }
                Ok(())
            }
        }
    }

    // ==================== Arena access ====================

    /// Resolves a handle to its slot if the element is present.
    #[inline]
    pub(crate) fn resolve(&self, id: ElementId) -> Option<SlotId> {
        match self.slots.get(id.slot() as usize) {
            Some(Slot::Occupied { generation, .. }) if *generation == id.generation() => {
                Some(id.slot())
            }
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn id_of(&self, slot: SlotId) -> ElementId {
        ElementId::new(slot, self.slots[slot as usize].generation())
    }

    #[inline]
    fn is_occupied(&self, slot: SlotId) -> bool {
        matches!(self.slots.get(slot as usize), Some(Slot::Occupied { .. }))
    }

    #[inline]
    pub(crate) fn node(&self, slot: SlotId) -> &Node<T> {
        match &self.slots[slot as usize] {
            Slot::Occupied { node, .. } => node,
            Slot::Vacant { .. } => panic!("tree link to vacant slot {}", slot),
        }
    }

    #[inline]
    fn node_mut(&mut self, slot: SlotId) -> &mut Node<T> {
        match &mut self.slots[slot as usize] {
            Slot::Occupied { node, .. } => node,
            Slot::Vacant { .. } => panic!("tree link to vacant slot {}", slot),
        }
    }

    #[inline]
    fn left(&self, slot: SlotId) -> Link {
        self.node(slot).left
    }

    #[inline]
    fn right(&self, slot: SlotId) -> Link {
        self.node(slot).right
    }

    #[inline]
    fn parent(&self, slot: SlotId) -> Link {
        self.node(slot).parent
    }

    #[inline]
    fn size_of(&self, link: Link) -> usize {
        link.map_or(0, |slot| self.node(slot).size)
    }

    #[inline]
    fn color_of(&self, link: Link) -> Color {
        link.map_or(Color::Black, |slot| self.node(slot).color)
    }

    #[inline]
    fn set_color(&mut self, slot: SlotId, color: Color) {
        self.node_mut(slot).color = color;
    }

    /// Returns a link that the red-black invariants guarantee to be present.
    #[inline]
    fn required(link: Link, what: &str) -> SlotId {
        match link {
            Some(slot) => slot,
            None => panic!("red-black invariant violated: missing {}", what),
        }
    }

    fn alloc(&mut self, node: Node<T>) -> SlotId {
        self.occupied += 1;
        match self.free {
            Some(slot) => {
                let (generation, next_free) = match &self.slots[slot as usize] {
                    Slot::Vacant {
                        generation,
                        next_free,
                    } => (*generation, *next_free),
                    Slot::Occupied { .. } => panic!("free list points at occupied slot {}", slot),
                };
                self.free = next_free;
                self.slots[slot as usize] = Slot::Occupied { generation, node };
                slot
            }
            None => {
                let slot = slot_id(self.slots.len());
                self.slots.push(Slot::Occupied {
                    generation: 0,
                    node,
                });
                slot
            }
        }
    }

    fn release(&mut self, slot: SlotId) -> T {
        let generation = next_generation(self.slots[slot as usize].generation());
        let reusable = generation != RETIRED;
        let vacated = mem::replace(
            &mut self.slots[slot as usize],
            Slot::Vacant {
                generation,
                next_free: if reusable { self.free } else { None },
            },
        );
        if reusable {
            self.free = Some(slot);
        }
        self.occupied -= 1;
        match vacated {
            Slot::Occupied { node, .. } => node.value,
            Slot::Vacant { .. } => panic!("releasing vacant slot {}", slot),
        }
    }

    // ==================== Navigation ====================

    fn min_of(&self, mut slot: SlotId) -> SlotId {
        while let Some(left) = self.left(slot) {
            slot = left;
        }
        slot
    }

    fn max_of(&self, mut slot: SlotId) -> SlotId {
        while let Some(right) = self.right(slot) {
            slot = right;
        }
        slot
    }

    pub(crate) fn successor(&self, slot: SlotId) -> Link {
        if let Some(right) = self.right(slot) {
            return Some(self.min_of(right));
        }
        let mut current = slot;
        while let Some(parent) = self.parent(current) {
            if self.left(parent) == Some(current) {
                return Some(parent);
            }
            current = parent;
        }
        None
    }

    pub(crate) fn predecessor(&self, slot: SlotId) -> Link {
        if let Some(left) = self.left(slot) {
            return Some(self.max_of(left));
        }
        let mut current = slot;
        while let Some(parent) = self.parent(current) {
            if self.right(parent) == Some(current) {
                return Some(parent);
            }
            current = parent;
        }
        None
    }

    fn slot_at(&self, mut index: usize) -> Link {
        let mut current = self.root;
        while let Some(slot) = current {
            let left_size = self.size_of(self.left(slot));
            match index.cmp(&left_size) {
                Ordering::Less => current = self.left(slot),
                Ordering::Equal => return Some(slot),
                Ordering::Greater => {
                    index -= left_size + 1;
                    current = self.right(slot);
                }
            }
        }
        None
    }

    // ==================== Insertion ====================

    fn insert_after_slot(&mut self, slot: SlotId, value: T) -> ElementId {
        let new_slot = match self.right(slot) {
            None => self.attach(value, Some(slot), false),
            Some(right) => {
                let min = self.min_of(right);
                self.attach(value, Some(min), true)
            }
        };
        self.id_of(new_slot)
    }

    fn insert_before_slot(&mut self, slot: SlotId, value: T) -> ElementId {
        let new_slot = match self.left(slot) {
            None => self.attach(value, Some(slot), true),
            Some(left) => {
                let max = self.max_of(left);
                self.attach(value, Some(max), false)
            }
        };
        self.id_of(new_slot)
    }

    /// Links a new red node under `parent` and rebalances.
    fn attach(&mut self, value: T, parent: Link, as_left: bool) -> SlotId {
        let slot = self.alloc(Node::new(value, parent));
        match parent {
            None => self.root = Some(slot),
            Some(parent) => {
                if as_left {
                    self.node_mut(parent).left = Some(slot);
                } else {
                    self.node_mut(parent).right = Some(slot);
                }
                let mut current = Some(parent);
                while let Some(ancestor) = current {
                    self.node_mut(ancestor).size += 1;
                    current = self.parent(ancestor);
                }
            }
        }
        self.insert_fixup(slot);
        self.stamp += 1;
        slot
    }

    fn rotate_left(&mut self, x: SlotId) {
        let y = Self::required(self.right(x), "right child for left rotation");
        let y_left = self.left(y);
        self.node_mut(x).right = y_left;
        if let Some(child) = y_left {
            self.node_mut(child).parent = Some(x);
        }
        self.replace_child(x, Some(y));
        self.node_mut(y).left = Some(x);
        self.node_mut(x).parent = Some(y);

        let size = self.node(x).size;
        self.node_mut(y).size = size;
        self.node_mut(x).size = self.size_of(self.left(x)) + self.size_of(self.right(x)) + 1;
    }

    fn rotate_right(&mut self, x: SlotId) {
        let y = Self::required(self.left(x), "left child for right rotation");
        let y_right = self.right(y);
        self.node_mut(x).left = y_right;
        if let Some(child) = y_right {
            self.node_mut(child).parent = Some(x);
        }
        self.replace_child(x, Some(y));
        self.node_mut(y).right = Some(x);
        self.node_mut(x).parent = Some(y);

        let size = self.node(x).size;
        self.node_mut(y).size = size;
        self.node_mut(x).size = self.size_of(self.left(x)) + self.size_of(self.right(x)) + 1;
    }

    /// Points `old`'s parent (or the root) at `new` and sets `new`'s parent.
    fn replace_child(&mut self, old: SlotId, new: Link) {
        let parent = self.parent(old);
        match parent {
            None => self.root = new,
            Some(p) => {
                if self.left(p) == Some(old) {
                    self.node_mut(p).left = new;
                } else {
                    self.node_mut(p).right = new;
                }
            }
        }
        if let Some(new) = new {
            self.node_mut(new).parent = parent;
        }
    }

    fn insert_fixup(&mut self, mut z: SlotId) {
        while let Some(parent) = self.parent(z) {
            if self.node(parent).color != Color::Red {
                break;
            }
            let grandparent = Self::required(self.parent(parent), "grandparent of red node");
            if self.left(grandparent) == Some(parent) {
                let uncle = self.right(grandparent);
                if self.color_of(uncle) == Color::Red {
                    self.set_color(parent, Color::Black);
                    self.set_color(Self::required(uncle, "red uncle"), Color::Black);
                    self.set_color(grandparent, Color::Red);
                    z = grandparent;
                } else {
                    if self.right(parent) == Some(z) {
                        self.rotate_left(parent);
                        z = parent;
                    }
                    let parent = Self::required(self.parent(z), "parent after rotation");
                    let grandparent = Self::required(self.parent(parent), "grandparent after rotation");
                    self.set_color(parent, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    self.rotate_right(grandparent);
                }
            } else {
                let uncle = self.left(grandparent);
                if self.color_of(uncle) == Color::Red {
                    self.set_color(parent, Color::Black);
                    self.set_color(Self::required(uncle, "red uncle"), Color::Black);
                    self.set_color(grandparent, Color::Red);
                    z = grandparent;
                } else {
                    if self.left(parent) == Some(z) {
                        self.rotate_right(parent);
                        z = parent;
                    }
                    let parent = Self::required(self.parent(z), "parent after rotation");
                    let grandparent = Self::required(self.parent(parent), "grandparent after rotation");
                    self.set_color(parent, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    self.rotate_left(grandparent);
                }
            }
        }
        if let Some(root) = self.root {
            self.set_color(root, Color::Black);
        }
    }

    // ==================== Removal ====================

    /// Unlinks a node. A node with two children is replaced structurally by
    /// its successor node (not by swapping values), so every other handle
    /// keeps pointing at its own value.
    fn remove_slot(&mut self, z: SlotId) -> T {
        let y = match (self.left(z), self.right(z)) {
            (Some(_), Some(right)) => self.min_of(right),
            _ => z,
        };

        // Every ancestor of y's old position loses one element.
        let mut current = self.parent(y);
        while let Some(ancestor) = current {
            self.node_mut(ancestor).size -= 1;
            current = self.parent(ancestor);
        }

        let y_color = self.node(y).color;
        let x;
        let x_parent;
        if self.left(z).is_none() {
            x = self.right(z);
            x_parent = self.parent(z);
            self.replace_child(z, x);
        } else if self.right(z).is_none() {
            x = self.left(z);
            x_parent = self.parent(z);
            self.replace_child(z, x);
        } else {
            x = self.right(y);
            if self.parent(y) == Some(z) {
                x_parent = Some(y);
            } else {
                x_parent = self.parent(y);
                self.replace_child(y, x);
                let z_right = self.right(z);
                self.node_mut(y).right = z_right;
                if let Some(child) = z_right {
                    self.node_mut(child).parent = Some(y);
                }
            }
            self.replace_child(z, Some(y));
            let z_left = self.left(z);
            self.node_mut(y).left = z_left;
            if let Some(child) = z_left {
                self.node_mut(child).parent = Some(y);
            }
            let (color, size) = {
                let node = self.node(z);
                (node.color, node.size)
            };
            let node = self.node_mut(y);
            node.color = color;
            node.size = size;
        }

        if y_color == Color::Black {
            self.delete_fixup(x, x_parent);
        }
        self.stamp += 1;
        self.release(z)
    }

    fn delete_fixup(&mut self, mut x: Link, mut parent: Link) {
        while x != self.root && self.color_of(x) == Color::Black {
            let p = match parent {
                Some(p) => p,
                None => break,
            };
            if self.left(p) == x {
                let mut w = Self::required(self.right(p), "sibling of doubly black node");
                if self.node(w).color == Color::Red {
                    self.set_color(w, Color::Black);
                    self.set_color(p, Color::Red);
                    self.rotate_left(p);
                    w = Self::required(self.right(p), "sibling after rotation");
                }
                if self.color_of(self.left(w)) == Color::Black
                    && self.color_of(self.right(w)) == Color::Black
                {
                    self.set_color(w, Color::Red);
                    x = Some(p);
                    parent = self.parent(p);
                } else {
                    if self.color_of(self.right(w)) == Color::Black {
                        if let Some(near) = self.left(w) {
                            self.set_color(near, Color::Black);
                        }
                        self.set_color(w, Color::Red);
                        self.rotate_right(w);
                        w = Self::required(self.right(p), "sibling after rotation");
                    }
                    let color = self.node(p).color;
                    self.set_color(w, color);
                    self.set_color(p, Color::Black);
                    if let Some(far) = self.right(w) {
                        self.set_color(far, Color::Black);
                    }
                    self.rotate_left(p);
                    x = self.root;
                    parent = None;
                }
            } else {
                let mut w = Self::required(self.left(p), "sibling of doubly black node");
                if self.node(w).color == Color::Red {
                    self.set_color(w, Color::Black);
                    self.set_color(p, Color::Red);
                    self.rotate_right(p);
                    w = Self::required(self.left(p), "sibling after rotation");
                }
                if self.color_of(self.left(w)) == Color::Black
                    && self.color_of(self.right(w)) == Color::Black
                {
                    self.set_color(w, Color::Red);
                    x = Some(p);
                    parent = self.parent(p);
                } else {
                    if self.color_of(self.left(w)) == Color::Black {
                        if let Some(near) = self.right(w) {
                            self.set_color(near, Color::Black);
                        }
                        self.set_color(w, Color::Red);
                        self.rotate_left(w);
                        w = Self::required(self.left(p), "sibling after rotation");
                    }
                    let color = self.node(p).color;
                    self.set_color(w, color);
                    self.set_color(p, Color::Black);
                    if let Some(far) = self.left(w) {
                        self.set_color(far, Color::Black);
                    }
                    self.rotate_right(p);
                    x = self.root;
                    parent = None;
                }
            }
        }
        if let Some(x) = x {
            self.set_color(x, Color::Black);
        }
    }

    // ==================== Validation ====================

    /// Validates the subtree rooted at `slot`, returning its black height.
    fn validate_subtree(&self, slot: SlotId) -> Result<usize, TreeError> {
        let node = self.node(slot);
        for child in [node.left, node.right].into_iter().flatten() {
            if !self.is_occupied(child) || self.node(child).parent != Some(slot) {
                return Err(TreeError::BrokenLink { slot: child });
            }
            if node.color == Color::Red && self.node(child).color == Color::Red {
                return Err(TreeError::RedRed { slot: child });
            }
        }
        let left_height = match node.left {
            Some(left) => self.validate_subtree(left)?,
            None => 1,
        };
        let right_height = match node.right {
            Some(right) => self.validate_subtree(right)?,
            None => 1,
        };
        if left_height != right_height {
            return Err(TreeError::BlackHeight { slot });
        }
        let expected = self.size_of(node.left) + self.size_of(node.right) + 1;
        if node.size != expected {
            return Err(TreeError::SizeMismatch {
                slot,
                expected,
                actual: node.size,
            });
        }
        Ok(left_height + usize::from(node.color == Color::Black))
    }
}

impl<T: fmt::Debug> fmt::Debug for RedBlackTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|(_, v)| v)).finish()
    }
}

impl<'a, T> IntoIterator for &'a RedBlackTree<T> {
    type Item = (ElementId, &'a T);
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Converts an arena index to a slot id.
///
/// # Panics
///
/// Panics when the index does not fit the slot id range.
fn slot_id(index: usize) -> SlotId {
    match SlotId::try_from(index) {
        Ok(slot) => slot,
        Err(_) => panic!("tree arena exceeds {} slots", SlotId::MAX as u64 + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn values<T: Clone>(tree: &RedBlackTree<T>) -> Vec<T> {
        tree.iter().map(|(_, v)| v.clone()).collect()
    }

    fn sorted_tree(values: &[i32]) -> RedBlackTree<i32> {
        let mut tree = RedBlackTree::new();
        for &v in values {
            tree.insert_sorted(v, |a, b| a.cmp(b), false);
            tree.validate().unwrap();
        }
        tree
    }

    #[test]
    fn test_empty_tree() {
        let tree: RedBlackTree<i32> = RedBlackTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert_eq!(tree.first(), None);
        assert_eq!(tree.get(0), None);
        assert_eq!(tree.find(|v: &i32| 5.cmp(v)), None);
        assert_eq!(tree.find_closest(|v: &i32| 5.cmp(v), SearchDirection::Less, true), None);
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_insert_last_keeps_order() {
        let mut tree = RedBlackTree::new();
        for i in 0..100 {
            tree.insert_last(i);
            tree.validate().unwrap();
        }
        assert_eq!(values(&tree), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_insert_first_keeps_order() {
        let mut tree = RedBlackTree::new();
        for i in 0..50 {
            tree.insert_first(i);
        }
        tree.validate().unwrap();
        assert_eq!(values(&tree), (0..50).rev().collect::<Vec<_>>());
    }

    #[test]
    fn test_insert_at_index() {
        let mut tree = RedBlackTree::new();
        tree.insert_at(0, 'b').unwrap();
        tree.insert_at(0, 'a').unwrap();
        tree.insert_at(2, 'd').unwrap();
        tree.insert_at(2, 'c').unwrap();
        assert_eq!(values(&tree), vec!['a', 'b', 'c', 'd']);
        assert_eq!(tree.insert_at(9, 'z'), Err('z'));
        tree.validate().unwrap();
    }

    #[test]
    fn test_insert_after_and_before() {
        let mut tree = RedBlackTree::new();
        let b = tree.insert_last(2);
        tree.insert_after(b, 4).unwrap();
        tree.insert_after(b, 3).unwrap();
        tree.insert_before(b, 1).unwrap();
        assert_eq!(values(&tree), vec![1, 2, 3, 4]);
        tree.validate().unwrap();
    }

    #[test]
    fn test_get_and_index_of_agree() {
        let tree = sorted_tree(&[50, 20, 80, 10, 30, 70, 90, 60, 40]);
        for i in 0..tree.len() {
            let id = tree.get(i).unwrap();
            assert_eq!(tree.index_of(id), Some(i));
        }
        assert_eq!(values(&tree), vec![10, 20, 30, 40, 50, 60, 70, 80, 90]);
    }

    #[test]
    fn test_handles_survive_other_changes() {
        let mut tree = RedBlackTree::new();
        let ids: Vec<_> = (0..20).map(|i| tree.insert_last(i)).collect();
        for id in ids.iter().step_by(2) {
            tree.remove(*id);
        }
        tree.validate().unwrap();
        for (i, id) in ids.iter().enumerate() {
            if i % 2 == 0 {
                assert!(!tree.contains(*id));
                assert_eq!(tree.value(*id), None);
            } else {
                assert_eq!(tree.value(*id), Some(&(i as i32)));
                assert_eq!(tree.index_of(*id), Some(i / 2));
            }
        }
    }

    #[test]
    fn test_stale_handle_not_confused_with_reused_slot() {
        let mut tree = RedBlackTree::new();
        let old = tree.insert_last(1);
        tree.remove(old);
        let new = tree.insert_last(2);
        assert_eq!(old.slot(), new.slot());
        assert_ne!(old, new);
        assert_eq!(tree.value(old), None);
        assert_eq!(tree.value(new), Some(&2));
        assert_eq!(tree.try_remove(old), None);
    }

    fn age(tree: &mut RedBlackTree<i32>, id: ElementId, generation: u32) {
        match &mut tree.slots[id.slot() as usize] {
            Slot::Vacant { generation: g, .. } => *g = generation,
            Slot::Occupied { .. } => panic!("slot {} is occupied", id.slot()),
        }
    }

    #[test]
    fn test_exhausted_slot_is_retired() {
        let mut tree = RedBlackTree::new();
        let first = tree.insert_last(1);
        tree.remove(first);
        age(&mut tree, first, RETIRED - 1);

        let last = tree.insert_last(2);
        assert_eq!(last.slot(), first.slot());
        assert_eq!(last.generation(), RETIRED - 1);
        tree.remove(last);

        let fresh = tree.insert_last(3);
        assert_ne!(fresh.slot(), last.slot());
        assert_eq!(tree.value(last), None);
        assert_eq!(tree.try_remove(last), None);
        assert_eq!(tree.slots[last.slot() as usize].generation(), RETIRED);

        let again = tree.insert_last(4);
        assert_ne!(again.slot(), last.slot());
        assert_eq!(values(&tree), vec![3, 4]);
        tree.validate().unwrap();
    }

    #[test]
    fn test_clear_skips_retired_slots() {
        let mut tree = RedBlackTree::new();
        let ids: Vec<_> = (0..3).map(|i| tree.insert_last(i)).collect();
        tree.remove(ids[1]);
        age(&mut tree, ids[1], RETIRED - 1);
        let last = tree.insert_last(7);
        assert_eq!(last.slot(), ids[1].slot());
        tree.clear();

        let reused: Vec<_> = (0..3).map(|i| tree.insert_last(i)).collect();
        assert!(reused.iter().all(|id| id.slot() != last.slot()));
        assert!(!tree.contains(last));
        tree.validate().unwrap();
    }

    #[test]
    fn test_remove_internal_node_keeps_handles() {
        let mut tree = RedBlackTree::new();
        let ids: Vec<_> = (0..15).map(|i| tree.insert_last(i)).collect();
        // The root of a 15-element tree has two children
        let removed = tree.remove(ids[7]);
        assert_eq!(removed, 7);
        tree.validate().unwrap();
        for (i, id) in ids.iter().enumerate() {
            if i != 7 {
                assert_eq!(tree.value(*id), Some(&(i as i32)));
            }
        }
    }

    #[test]
    fn test_remove_all_in_random_order() {
        let mut tree = RedBlackTree::new();
        let ids: Vec<_> = (0..64).map(|i| tree.insert_last(i)).collect();
        let mut order: Vec<usize> = (0..64).collect();
        // Deterministic shuffle
        for i in 0..order.len() {
            let j = (i * 37 + 11) % order.len();
            order.swap(i, j);
        }
        for (n, &i) in order.iter().enumerate() {
            assert_eq!(tree.remove(ids[i]), i as i32);
            tree.validate().unwrap();
            assert_eq!(tree.len(), 63 - n);
        }
        assert!(tree.is_empty());
    }

    #[test]
    #[should_panic(expected = "removing absent element")]
    fn test_remove_absent_panics() {
        let mut tree = RedBlackTree::new();
        let id = tree.insert_last(1);
        tree.remove(id);
        tree.remove(id);
    }

    #[test]
    fn test_next_prev() {
        let mut tree = RedBlackTree::new();
        let ids: Vec<_> = (0..10).map(|i| tree.insert_last(i)).collect();
        for i in 0..9 {
            assert_eq!(tree.next(ids[i]), Some(ids[i + 1]));
            assert_eq!(tree.prev(ids[i + 1]), Some(ids[i]));
        }
        assert_eq!(tree.next(ids[9]), None);
        assert_eq!(tree.prev(ids[0]), None);
    }

    #[test]
    fn test_sorted_insert_ties_are_stable() {
        let mut tree = RedBlackTree::new();
        let cmp = |a: &(i32, char), b: &(i32, char)| a.0.cmp(&b.0);
        tree.insert_sorted((3, 'a'), cmp, false);
        tree.insert_sorted((1, 'b'), cmp, false);
        tree.insert_sorted((3, 'c'), cmp, false);
        tree.insert_sorted((3, 'd'), cmp, true);
        assert_eq!(values(&tree), vec![(1, 'b'), (3, 'd'), (3, 'a'), (3, 'c')]);
    }

    #[test]
    fn test_find_closest() {
        let tree = sorted_tree(&[10, 20, 20, 30]);
        let at = |id: Option<ElementId>| id.and_then(|id| tree.index_of(id));

        assert_eq!(at(tree.find_closest(|v| 20.cmp(v), SearchDirection::Less, true)), Some(2));
        assert_eq!(at(tree.find_closest(|v| 20.cmp(v), SearchDirection::Less, false)), Some(0));
        assert_eq!(at(tree.find_closest(|v| 20.cmp(v), SearchDirection::Greater, true)), Some(1));
        assert_eq!(at(tree.find_closest(|v| 20.cmp(v), SearchDirection::Greater, false)), Some(3));
        assert_eq!(tree.find_closest(|v| 5.cmp(v), SearchDirection::Less, true), None);
    }

    #[test]
    fn test_compare_position() {
        let mut tree = RedBlackTree::new();
        let a = tree.insert_last(1);
        let b = tree.insert_last(2);
        assert_eq!(tree.compare_position(a, b), Some(Ordering::Less));
        assert_eq!(tree.compare_position(b, a), Some(Ordering::Greater));
        assert_eq!(tree.compare_position(a, a), Some(Ordering::Equal));
        tree.remove(a);
        assert_eq!(tree.compare_position(a, b), None);
    }

    #[test]
    fn test_replace_bumps_stamp() {
        let mut tree = RedBlackTree::new();
        let id = tree.insert_last(1);
        let stamp = tree.stamp();
        assert_eq!(tree.replace(id, 5), Some(1));
        assert!(tree.stamp() > stamp);
        assert_eq!(tree.value(id), Some(&5));
    }

    #[test]
    fn test_clear_invalidates_handles() {
        let mut tree = RedBlackTree::new();
        let ids: Vec<_> = (0..5).map(|i| tree.insert_last(i)).collect();
        tree.clear();
        assert!(tree.is_empty());
        assert!(ids.iter().all(|id| !tree.contains(*id)));
        let id = tree.insert_last(9);
        assert!(!ids.contains(&id));
        tree.validate().unwrap();
    }

    #[test]
    fn test_validate_is_repeatable() {
        let tree = sorted_tree(&[4, 8, 15, 16, 23, 42]);
        assert!(tree.validate().is_ok());
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_validate_detects_size_mismatch() {
        let mut tree = sorted_tree(&[1, 2, 3]);
        let root = tree.root.unwrap();
        tree.node_mut(root).size = 7;
        assert!(matches!(
            tree.validate(),
            Err(TreeError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_detects_red_red() {
        let mut tree = sorted_tree(&[1, 2, 3, 4]);
        // 4 is a red leaf under black 3
        let parent = tree.parent(tree.root.map(|r| tree.max_of(r)).unwrap()).unwrap();
        tree.set_color(parent, Color::Red);
        assert!(tree.validate().is_err());
    }

    #[test]
    fn test_iter_both_directions() {
        let tree = sorted_tree(&[3, 1, 2]);
        let forward: Vec<_> = tree.iter().map(|(_, v)| *v).collect();
        let backward: Vec<_> = tree.iter().rev().map(|(_, v)| *v).collect();
        assert_eq!(forward, vec![1, 2, 3]);
        assert_eq!(backward, vec![3, 2, 1]);
        let between: Vec<_> = tree.iter_between(1, 3).map(|(_, v)| *v).collect();
        assert_eq!(between, vec![2, 3]);
    }
}
