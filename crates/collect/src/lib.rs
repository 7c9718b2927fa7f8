//! Strata Collect - Observable collections and incremental derivation stages.
//!
//! A base collection can be transformed through a chain of stages, and every
//! derived collection stays in sync with its source as elements are added,
//! removed, updated or moved, without re-scanning the source.
//!
//! # Core Concepts
//!
//! - `ObservableCollection<T>`: Read, subscription, locking and write-request contract
//! - `ObservableTreeList<T>`: Mutable base list with stable element handles
//! - `ObservableSortedSet<T>`: Sorted distinct base collection with bounded sub-views
//! - `CollectionEvent<T>` / `ChangeSet<T>`: Element-level events and per-transaction batches
//! - `Subscription`: Listener registration cancelled on drop
//!
//! # Stages
//!
//! - `MappedCollection`: One-to-one, optionally reversible and caching
//! - `FilteredCollection`: Keeps elements accepted by a predicate
//! - `DistinctCollection` / `DistinctSortedCollection`: Collapse equal elements
//! - `SortedCollection`: Orders elements by a comparator
//! - `FlattenedCollection`: Concatenates inner collections
//! - `ReversedCollection`: Last-to-first view
//!
//! Write requests on a stage are translated into requests on its source. The
//! stage only changes when the source's events come back down.
//!
//! # Example
//!
//! ```rust
//! use strata_collect::{CollectionFlow, DistinctOptions, ObservableCollection, ObservableTreeList, ValueComparator};
//!
//! let list = ObservableTreeList::from_values([5, 4, 3, 2, 1, 3]);
//! let sorted = list.distinct(DistinctOptions::default()).sorted(ValueComparator::natural());
//! assert_eq!(sorted.values(), vec![1, 2, 3, 4, 5]);
//!
//! let six = list.push(6).unwrap();
//! assert_eq!(sorted.values(), vec![1, 2, 3, 4, 5, 6]);
//!
//! list.remove(six).unwrap();
//! assert_eq!(sorted.len(), 5);
//! ```

pub mod base;
pub mod change_set;
pub mod collection;
mod derived;
pub mod entity;
pub mod event;
pub mod flow;
mod scope;
pub mod sorted_set;
pub mod stages;
pub mod subscription;

pub use base::ObservableTreeList;
pub use change_set::ChangeSet;
pub use collection::{CollectionRef, ObservableCollection, ValueComparator};
pub use entity::{EntityChange, EntityCollection, EntityStore};
pub use event::{ChangeKind, CollectionEvent};
pub use flow::CollectionFlow;
pub use sorted_set::{ObservableSortedSet, SortedSubSet};
pub use stages::{
    DistinctCollection, DistinctOptions, DistinctSortedCollection, FilteredCollection,
    FlattenedCollection, MapBuilder, MapOptions, MappedCollection, ReversedCollection,
    SortedCollection,
};
pub use subscription::{BatchListener, EventListener, Subscription, SubscriptionId, SubscriptionManager};
pub use strata_core::{msg, Cause, CollectionId, ElementId, Error, OperationError, Rejection, Result};
pub use strata_lock::{CoreId, LockType, Lockable};
