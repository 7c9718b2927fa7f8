//! Grouping configuration.

/// How a change to a key's value is surfaced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeyChangePolicy {
    /// Remove every value and the key entry, then re-add them under the new
    /// key. Observers never see a value attributed to two keys at once.
    #[default]
    Regroup,
    /// Report a single in-place key change. Only sound when new keys are
    /// known to be distinct from every active key.
    InPlace,
}

/// Options of a [`GroupedMultiMap`](crate::GroupedMultiMap).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GroupingOptions {
    /// Drop a key entry as soon as it holds no values.
    pub prune_empty_keys: bool,
    /// How key value changes are reported.
    pub key_changes: KeyChangePolicy,
}

impl GroupingOptions {
    /// Returns options that drop empty key entries.
    pub fn pruned() -> Self {
        Self {
            prune_empty_keys: true,
            ..Self::default()
        }
    }

    /// Sets the key change policy.
    pub fn with_key_changes(mut self, policy: KeyChangePolicy) -> Self {
        self.key_changes = policy;
        self
    }
}
