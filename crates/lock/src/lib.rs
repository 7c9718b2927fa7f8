//! Strata Lock - Locking for Strata collections.
//!
//! This crate provides the lock contract shared by base and derived collections:
//!
//! - `CollectionLock`: Re-entrant read/write lock with a stable `LockId`
//! - `Lockable`: Anything backed by one or more physical locks
//! - `Transaction`: RAII acquisition of a set of locks
//! - `lock_all` / `try_lock_all`: Composite acquisition in canonical order
//! - `CoreId`: The set of physical locks behind a lockable
//!
//! # Example
//!
//! ```rust
//! use strata_lock::{lock_all, CollectionLock, LockType, Lockable};
//!
//! let a = CollectionLock::new();
//! let b = CollectionLock::new();
//!
//! // Declared order does not matter; locks are taken by LockId.
//! let tx = lock_all(&[&b, &a], LockType::Exclusive).unwrap();
//! assert_eq!(tx.len(), 2);
//! assert!(a.core_id().intersects(&tx.core_id()));
//! drop(tx);
//! assert!(a.is_free());
//! ```

mod composite;
mod core_id;
mod lock;
mod transaction;

pub use composite::{lock_all, try_lock_all, Lockable};
pub use core_id::CoreId;
pub use lock::{CollectionLock, LockGuard, LockId, LockType};
pub use transaction::{Transaction, TransactionId};
