//! Derivation stages.
//!
//! Each stage is a read-through view over one source collection that keeps its
//! own ordered element tree in sync with the source's events and pushes write
//! requests back to the source.

mod distinct;
mod filter;
mod flatten;
mod map;
mod reverse;
mod sort;

pub use distinct::{DistinctCollection, DistinctOptions, DistinctSortedCollection};
pub use filter::FilteredCollection;
pub use flatten::FlattenedCollection;
pub use map::{MapBuilder, MapOptions, MappedCollection};
pub use reverse::ReversedCollection;
pub use sort::SortedCollection;
