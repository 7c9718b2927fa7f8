//! Multimap change events.

use crate::entry::KeyEntryId;
use strata_core::Cause;

/// What changed in one key entry.
#[derive(Clone, Debug, PartialEq)]
pub enum EntryChange<K, V> {
    /// The entry was added to the key set at `index`.
    KeyAdded { index: usize },
    /// The entry was removed from the key set; `index` is its former position.
    KeyRemoved { index: usize },
    /// The entry's key was replaced in place.
    KeyChanged { index: usize, old: K },
    /// A value was grouped under the key at `index`.
    ValueAdded { index: usize, value: V },
    /// A value left the key; `index` is its former position.
    ValueRemoved { index: usize, value: V },
    /// A grouped value changed, or the roots justifying it did.
    ValueUpdated { index: usize, old: V, value: V },
}

/// A change to a grouped multimap.
#[derive(Clone, Debug, PartialEq)]
pub struct MultiMapEvent<K, V> {
    /// The affected entry.
    pub entry: KeyEntryId,
    /// The entry's (new) key.
    pub key: K,
    /// What happened.
    pub change: EntryChange<K, V>,
    /// The cause of the source change.
    pub cause: Cause,
}

impl<K, V> MultiMapEvent<K, V> {
    /// Returns true for key set changes.
    pub fn is_key_event(&self) -> bool {
        matches!(
            self.change,
            EntryChange::KeyAdded { .. } | EntryChange::KeyRemoved { .. } | EntryChange::KeyChanged { .. }
        )
    }
}
