//! Strata Tree - Counted red-black trees for Strata collections.
//!
//! This crate provides the ordered storage every Strata collection is built on:
//!
//! - `RedBlackTree`: Arena red-black tree with subtree sizes and stable handles
//! - `TreeSet` / `TreeMap`: Comparator-ordered set and map on top of it
//! - `KeyRange` / `SubRange`: Key bounds and the positional window they select
//!
//! # Example
//!
//! ```rust
//! use strata_tree::{RedBlackTree, SearchDirection};
//!
//! let mut tree = RedBlackTree::new();
//! let b = tree.insert_last("b");
//! let a = tree.insert_before(b, "a").unwrap();
//! tree.insert_after(b, "c").unwrap();
//!
//! assert_eq!(tree.index_of(b), Some(1));
//! assert_eq!(tree.get(0), Some(a));
//! assert_eq!(tree.remove(a), "a");
//! assert_eq!(tree.index_of(b), Some(0));
//!
//! let closest = tree.find_closest(|v| "bb".cmp(v), SearchDirection::Less, true);
//! assert_eq!(closest, Some(b));
//! ```

#![no_std]

extern crate alloc;

pub mod comparator;
pub mod map;
pub mod range;
pub mod rbtree;
pub mod set;

pub use comparator::{Comparator, SimpleComparator};
pub use map::TreeMap;
pub use range::{KeyRange, SubRange};
pub use rbtree::{Iter, RedBlackTree, SearchDirection, TreeError};
pub use set::TreeSet;
pub use strata_core::ElementId;
