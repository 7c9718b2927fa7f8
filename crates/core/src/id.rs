//! Identifiers shared by every Strata crate.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Global collection identity counter.
static NEXT_COLLECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Global cause counter.
static NEXT_CAUSE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable handle to one element of a collection.
///
/// A handle addresses an arena slot and remembers the slot's generation at
/// the time the element was created. Once the element is removed the slot's
/// generation moves on, so a stale handle is detected instead of silently
/// reading whatever element reused the slot.
///
/// The derived `Ord` is an arbitrary total order suitable for maps and sets.
/// Positional order is answered by the owning collection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId {
    slot: u32,
    generation: u32,
}

impl ElementId {
    /// Creates a handle for the given slot and generation.
    #[inline]
    pub const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    /// Returns the arena slot.
    #[inline]
    pub const fn slot(&self) -> u32 {
        self.slot
    }

    /// Returns the slot generation this handle was issued for.
    #[inline]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.slot, self.generation)
    }
}

/// Identity of one collection instance (base or derived).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionId(u64);

impl CollectionId {
    /// Allocates a fresh collection identity.
    pub fn next() -> Self {
        CollectionId(NEXT_COLLECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw identity value.
    #[inline]
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// The cause of a mutation, carried by every event it produces.
///
/// All events fired while one write transaction is open share the cause the
/// transaction was opened with, which lets subscribers group them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Cause(u64);

impl Cause {
    /// Allocates a fresh cause.
    pub fn new() -> Self {
        Cause(NEXT_CAUSE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw cause value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for Cause {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_element_id_accessors() {
        let id = ElementId::new(3, 7);
        assert_eq!(id.slot(), 3);
        assert_eq!(id.generation(), 7);
        assert_eq!(format!("{:?}", id), "#3v7");
    }

    #[test]
    fn test_element_id_generation_distinguishes() {
        assert_ne!(ElementId::new(1, 1), ElementId::new(1, 2));
    }

    #[test]
    fn test_collection_ids_unique() {
        let a = CollectionId::next();
        let b = CollectionId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn test_causes_unique() {
        assert_ne!(Cause::new(), Cause::new());
    }
}
