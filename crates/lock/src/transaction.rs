//! Lock transactions.

use crate::core_id::CoreId;
use crate::lock::{LockGuard, LockType};
use std::sync::atomic::{AtomicU64, Ordering};
use strata_core::Cause;

/// Global transaction ID counter.
static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Transaction ID type.
pub type TransactionId = u64;

/// A set of held locks, released in reverse acquisition order when dropped.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    lock_type: LockType,
    guards: Vec<LockGuard>,
    cause: Cause,
}

impl Transaction {
    pub(crate) fn new(lock_type: LockType, guards: Vec<LockGuard>) -> Self {
        Self {
            id: NEXT_TX_ID.fetch_add(1, Ordering::Relaxed),
            lock_type,
            guards,
            cause: Cause::new(),
        }
    }

    /// Returns the transaction ID.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the mode all locks are held in.
    pub fn lock_type(&self) -> LockType {
        self.lock_type
    }

    /// Returns the cause events fired under this transaction carry.
    pub fn cause(&self) -> Cause {
        self.cause
    }

    /// Replaces the transaction's cause with an outer one.
    pub fn with_cause(mut self, cause: Cause) -> Self {
        self.cause = cause;
        self
    }

    /// Returns the number of physical locks held.
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Returns true if no lock is held.
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Returns the core id of the held locks.
    pub fn core_id(&self) -> CoreId {
        self.guards.iter().map(|guard| guard.lock().id()).collect()
    }

    /// Releases every lock now.
    pub fn release(self) {}
}

impl Drop for Transaction {
    fn drop(&mut self) {
        release_reverse(&mut self.guards);
    }
}

/// Drops guards last-acquired first.
pub(crate) fn release_reverse(guards: &mut Vec<LockGuard>) {
    while let Some(guard) = guards.pop() {
        drop(guard);
    }
}
