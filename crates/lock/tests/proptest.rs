//! Property-based tests for strata-lock using proptest.

use proptest::prelude::*;
use strata_lock::{lock_all, CollectionLock, CoreId, LockType, Lockable};

proptest! {
    /// Core ids intersect exactly when the lock sets share a lock.
    #[test]
    fn core_ids_intersect_iff_shared(
        left in prop::collection::vec(0usize..8, 0..6),
        right in prop::collection::vec(0usize..8, 0..6),
    ) {
        let pool: Vec<CollectionLock> = (0..8).map(|_| CollectionLock::new()).collect();
        let pick = |indices: &[usize]| -> Vec<CollectionLock> {
            indices.iter().map(|&i| pool[i].clone()).collect()
        };
        let left_id = CoreId::from_locks(&pick(&left));
        let right_id = CoreId::from_locks(&pick(&right));
        let shared = left.iter().any(|i| right.contains(i));
        prop_assert_eq!(left_id.intersects(&right_id), shared);
    }

    /// A composite lock holds each distinct lock once and frees all of them.
    #[test]
    fn composite_lock_releases_everything(indices in prop::collection::vec(0usize..6, 1..12)) {
        let pool: Vec<CollectionLock> = (0..6).map(|_| CollectionLock::new()).collect();
        let chosen: Vec<&dyn Lockable> = indices.iter().map(|&i| &pool[i] as &dyn Lockable).collect();

        let mut distinct = indices.clone();
        distinct.sort();
        distinct.dedup();

        let tx = lock_all(&chosen, LockType::Exclusive).unwrap();
        prop_assert_eq!(tx.len(), distinct.len());
        for &i in &distinct {
            prop_assert!(pool[i].is_held(LockType::Exclusive));
        }
        drop(tx);
        prop_assert!(pool.iter().all(CollectionLock::is_free));
    }
}
