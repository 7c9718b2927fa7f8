//! Strata Assoc - Live grouped multimaps for Strata collections.
//!
//! A [`GroupedMultiMap`] groups the elements of a value flow under the keys
//! of a distinct key flow. Both flows are derived, independently, from one
//! root collection; a value belongs to a key when both trace back to a
//! common root element.
//!
//! - `GroupedMultiMap`: The live key to values grouping
//! - `GroupedElementInfo`: What one root element contributed
//! - `MultiMapEvent`: Key set and per-key value changes
//! - `GroupingOptions`: Empty-key pruning and key change reporting
//!
//! # Example
//!
//! ```rust
//! use strata_assoc::{GroupedMultiMap, GroupingOptions};
//! use strata_collect::{CollectionRef, ObservableCollection, ObservableTreeList};
//!
//! let words = ObservableTreeList::from_values(["apple", "bean", "avocado"]);
//! let source: CollectionRef<&str> = words.clone();
//! let by_letter = GroupedMultiMap::group_by(source, |w: &&str| w.as_bytes()[0], GroupingOptions::default()).unwrap();
//! assert_eq!(by_letter.get(&b'a'), vec!["apple", "avocado"]);
//!
//! words.push("beet").unwrap();
//! assert_eq!(by_letter.get(&b'b'), vec!["bean", "beet"]);
//! ```

mod entry;
mod error;
mod event;
mod info;
mod multimap;
mod options;

pub use entry::KeyEntryId;
pub use error::GroupingError;
pub use event::{EntryChange, MultiMapEvent};
pub use info::{GroupedElementInfo, RootPhase, Roots};
pub use multimap::{GroupedMultiMap, MultiMapListener};
pub use options::{GroupingOptions, KeyChangePolicy};
