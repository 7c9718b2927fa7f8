//! Counted red-black tree.
//!
//! Nodes live in an arena and are addressed by generation-checked handles.
//! Each node stores the size of its subtree, which gives positional access in
//! O(log n) next to the usual ordered search.

mod iter;
mod node;
mod tree;

pub use iter::Iter;
pub use node::Color;
pub use tree::{RedBlackTree, SearchDirection, TreeError};
