//! Red-black tree node definitions.

/// Index of a node slot in the tree arena.
pub(crate) type SlotId = u32;

/// Link to another node, `None` standing for the nil leaf.
pub(crate) type Link = Option<SlotId>;

/// Node color.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
    /// Red node.
    Red,
    /// Black node (nil leaves count as black).
    Black,
}

/// A node in the red-black tree.
#[derive(Clone, Debug)]
pub(crate) struct Node<T> {
    /// The value stored in this node.
    pub value: T,
    /// Node color.
    pub color: Color,
    /// Number of nodes in the subtree rooted here, this node included.
    pub size: usize,
    /// Parent node.
    pub parent: Link,
    /// Left child.
    pub left: Link,
    /// Right child.
    pub right: Link,
}

impl<T> Node<T> {
    /// Creates a new red leaf node.
    pub fn new(value: T, parent: Link) -> Self {
        Self {
            value,
            color: Color::Red,
            size: 1,
            parent,
            left: None,
            right: None,
        }
    }
}

/// One arena slot. Vacant slots keep their generation so stale handles can be
/// told apart from handles to a node that reused the slot.
#[derive(Clone, Debug)]
pub(crate) enum Slot<T> {
    Occupied { generation: u32, node: Node<T> },
    Vacant { generation: u32, next_free: Link },
}

/// Generation of a slot that has run out of generations. A retired slot stays
/// vacant and is never handed out again.
pub(crate) const RETIRED: u32 = u32::MAX;

/// Returns the generation a slot takes when its element is removed.
#[inline]
pub(crate) fn next_generation(generation: u32) -> u32 {
    generation.saturating_add(1)
}

impl<T> Slot<T> {
    /// Returns the slot's current generation.
    #[inline]
    pub fn generation(&self) -> u32 {
        match self {
            Slot::Occupied { generation, .. } | Slot::Vacant { generation, .. } => *generation,
        }
    }
}
