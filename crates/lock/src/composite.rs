//! Composite lock acquisition.
//!
//! Several lockables are locked as one [`Transaction`]. Their physical locks
//! are gathered, deduplicated and taken in ascending [`LockId`](crate::LockId) order, so two
//! threads locking overlapping sets in different declared orders cannot
//! deadlock.

use crate::core_id::CoreId;
use crate::lock::{CollectionLock, LockType};
use crate::transaction::{release_reverse, Transaction};
use strata_core::Result;
use tracing::{trace, warn};

/// Something backed by one or more physical locks.
pub trait Lockable {
    /// Returns the physical locks behind this lockable.
    fn physical_locks(&self) -> Vec<CollectionLock>;

    /// Returns the core id of this lockable.
    fn core_id(&self) -> CoreId {
        CoreId::from_locks(&self.physical_locks())
    }

    /// Acquires every physical lock, blocking as needed.
    fn lock(&self, lock_type: LockType) -> Result<Transaction> {
        acquire_ordered(self.physical_locks(), lock_type, true)
    }

    /// Acquires every physical lock without blocking.
    fn try_lock(&self, lock_type: LockType) -> Result<Transaction> {
        acquire_ordered(self.physical_locks(), lock_type, false)
    }
}

impl Lockable for CollectionLock {
    fn physical_locks(&self) -> Vec<CollectionLock> {
        vec![self.clone()]
    }
}

/// Locks every lockable, blocking as needed.
///
/// If any acquisition fails, the locks already taken are released before the
/// error is returned.
pub fn lock_all(lockables: &[&dyn Lockable], lock_type: LockType) -> Result<Transaction> {
    acquire_ordered(gather(lockables), lock_type, true)
}

/// Locks every lockable without blocking.
///
/// Returns [`strata_core::Error::WouldBlock`] at the first lock held elsewhere,
/// after releasing everything acquired so far.
pub fn try_lock_all(lockables: &[&dyn Lockable], lock_type: LockType) -> Result<Transaction> {
    acquire_ordered(gather(lockables), lock_type, false)
}

fn gather(lockables: &[&dyn Lockable]) -> Vec<CollectionLock> {
    lockables
        .iter()
        .flat_map(|lockable| lockable.physical_locks())
        .collect()
}

fn acquire_ordered(
    mut locks: Vec<CollectionLock>,
    lock_type: LockType,
    blocking: bool,
) -> Result<Transaction> {
    locks.sort_by_key(CollectionLock::id);
    locks.dedup_by_key(|lock| lock.id());

    let mut guards = Vec::with_capacity(locks.len());
    for lock in &locks {
        let acquired = if blocking {
            lock.acquire(lock_type)
        } else {
            lock.try_acquire(lock_type)
        };
        match acquired {
            Ok(guard) => guards.push(guard),
            Err(err) => {
                if !blocking {
                    warn!(
                        lock = lock.id().get(),
                        held = guards.len(),
                        "composite try-lock failed; releasing acquired locks"
                    );
                }
                release_reverse(&mut guards);
                return Err(err);
            }
        }
    }
    trace!(count = guards.len(), ?lock_type, "composite lock acquired");
    Ok(Transaction::new(lock_type, guards))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use strata_core::Error;

    /// A lockable backed by two locks, like a view over two sources.
    struct Pair(CollectionLock, CollectionLock);

    impl Lockable for Pair {
        fn physical_locks(&self) -> Vec<CollectionLock> {
            vec![self.0.clone(), self.1.clone()]
        }
    }

    #[test]
    fn test_lock_all_dedups_shared_locks() {
        let a = CollectionLock::new();
        let b = CollectionLock::new();
        let pair = Pair(a.clone(), b.clone());
        let tx = lock_all(&[&pair, &a, &b], LockType::Exclusive).unwrap();
        assert_eq!(tx.len(), 2);
        assert_eq!(tx.core_id(), pair.core_id());
        drop(tx);
        assert!(a.is_free() && b.is_free());
    }

    #[test]
    fn test_try_lock_all_releases_on_failure() {
        let a = CollectionLock::new();
        let b = CollectionLock::new();
        let held = b.clone();
        let (held_tx, held_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            let _guard = held.write().unwrap();
            held_tx.send(()).unwrap();
            let _ = done_rx.recv();
        });
        held_rx.recv().unwrap();

        let err = try_lock_all(&[&a, &b], LockType::Exclusive).unwrap_err();
        assert_eq!(err, Error::WouldBlock);
        // The lock taken before the failure was released
        assert!(a.is_free());

        done_tx.send(()).unwrap();
        handle.join().unwrap();
        assert!(try_lock_all(&[&a, &b], LockType::Exclusive).is_ok());
    }

    #[test]
    fn test_lockable_lock_default() {
        let pair = Pair(CollectionLock::new(), CollectionLock::new());
        let tx = pair.lock(LockType::Shared).unwrap();
        assert_eq!(tx.lock_type(), LockType::Shared);
        assert!(pair.0.is_held(LockType::Shared));
        tx.release();
        assert!(pair.0.is_free());
    }

    #[test]
    fn test_reversed_order_does_not_deadlock() {
        let a = CollectionLock::new();
        let b = CollectionLock::new();
        let (tx, rx) = mpsc::channel();

        let handles: Vec<_> = [(a.clone(), b.clone()), (b.clone(), a.clone())]
            .into_iter()
            .map(|(first, second)| {
                let tx = tx.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let _txn = lock_all(&[&first, &second], LockType::Exclusive).unwrap();
                    }
                    tx.send(()).unwrap();
                })
            })
            .collect();

        for _ in 0..2 {
            rx.recv_timeout(Duration::from_secs(10))
                .expect("composite locks deadlocked");
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(a.is_free() && b.is_free());
    }
}
