//! Grouping invariant violations.

use std::fmt;
use strata_core::ElementId;

/// An inconsistency found by [`GroupedMultiMap::validate`](crate::GroupedMultiMap::validate).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupingError {
    /// A key entry holds a value that shares no root with the key.
    UnjustifiedValue { key: ElementId, value: ElementId },
    /// A value shares a root with a key but is missing from its entry.
    MissingValue { key: ElementId, value: ElementId },
    /// A value's recorded roots differ from the roots it shares with the key.
    StaleRoots { key: ElementId, value: ElementId },
    /// An empty entry survived although empty keys are pruned.
    EmptyEntry { key: ElementId },
    /// A known key has no entry although empty keys are kept.
    MissingEntry { key: ElementId },
    /// Entries or values are out of flow order.
    OutOfOrder { key: ElementId },
    /// The lookup tables disagree with the entries.
    Index { key: ElementId },
}

impl fmt::Display for GroupingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupingError::UnjustifiedValue { key, value } => {
                write!(f, "Value {:?} grouped under key {:?} without a shared root", value, key)
            }
            GroupingError::MissingValue { key, value } => {
                write!(f, "Value {:?} missing under key {:?}", value, key)
            }
            GroupingError::StaleRoots { key, value } => {
                write!(f, "Stale roots for value {:?} under key {:?}", value, key)
            }
            GroupingError::EmptyEntry { key } => write!(f, "Empty entry for key {:?} not pruned", key),
            GroupingError::MissingEntry { key } => write!(f, "No entry for key {:?}", key),
            GroupingError::OutOfOrder { key } => write!(f, "Entry for key {:?} out of order", key),
            GroupingError::Index { key } => write!(f, "Lookup tables disagree for key {:?}", key),
        }
    }
}

impl std::error::Error for GroupingError {}
