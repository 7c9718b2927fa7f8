//! Fluent pipeline construction.

use crate::collection::{CollectionRef, ObservableCollection, ValueComparator};
use crate::stages::{
    DistinctCollection, DistinctOptions, DistinctSortedCollection, FilteredCollection,
    FlattenedCollection, MapBuilder, MappedCollection, ReversedCollection, SortedCollection,
};
use std::hash::Hash;
use std::rc::Rc;

/// Chains derivation stages onto a shared collection.
///
/// Every method builds a new stage subscribed to `self`; the stage keeps its
/// source alive, so intermediate results need not be held by the caller.
///
/// ```rust
/// use strata_collect::{CollectionFlow, ObservableCollection, ObservableTreeList, ValueComparator};
///
/// let list = ObservableTreeList::from_values([3, 1, 2, 3]);
/// let view = list
///     .filter(|v| *v > 1)
///     .map(|v| v * 10)
///     .sorted(ValueComparator::natural());
/// assert_eq!(view.values(), vec![20, 30, 30]);
/// ```
pub trait CollectionFlow<T: Clone + 'static> {
    /// Returns `self` as a type-erased collection handle.
    fn as_collection(&self) -> CollectionRef<T>;

    /// Maps every element through `map`.
    fn map<U, F>(&self, map: F) -> Rc<MappedCollection<T, U>>
    where
        U: Clone + 'static,
        F: Fn(&T) -> U + 'static,
    {
        MapBuilder::new(map).build(self.as_collection())
    }

    /// Maps every element with a configured builder.
    fn map_with<U>(&self, builder: MapBuilder<T, U>) -> Rc<MappedCollection<T, U>>
    where
        U: Clone + 'static,
    {
        builder.build(self.as_collection())
    }

    /// Keeps the elements accepted by `predicate`.
    fn filter<F>(&self, predicate: F) -> Rc<FilteredCollection<T>>
    where
        F: Fn(&T) -> bool + 'static,
    {
        FilteredCollection::new(self.as_collection(), predicate)
    }

    /// Collapses equal elements, keeping source order.
    fn distinct(&self, options: DistinctOptions) -> Rc<DistinctCollection<T>>
    where
        T: Hash + Eq,
    {
        DistinctCollection::new(self.as_collection(), options)
    }

    /// Collapses elements equal under `cmp`, ordered by `cmp`.
    fn distinct_sorted(
        &self,
        cmp: ValueComparator<T>,
        options: DistinctOptions,
    ) -> Rc<DistinctSortedCollection<T>> {
        DistinctSortedCollection::new(self.as_collection(), cmp, options)
    }

    /// Orders the elements by `cmp`.
    fn sorted(&self, cmp: ValueComparator<T>) -> Rc<SortedCollection<T>> {
        SortedCollection::new(self.as_collection(), cmp)
    }

    /// Concatenates the inner collection of every element.
    fn flat_map<U, F>(&self, inner_of: F) -> Rc<FlattenedCollection<T, U>>
    where
        U: Clone + 'static,
        F: Fn(&T) -> CollectionRef<U> + 'static,
    {
        FlattenedCollection::new(self.as_collection(), inner_of)
    }

    /// Presents the elements last to first.
    fn reverse(&self) -> Rc<ReversedCollection<T>> {
        ReversedCollection::new(self.as_collection())
    }
}

impl<T, C> CollectionFlow<T> for Rc<C>
where
    T: Clone + 'static,
    C: ObservableCollection<T> + 'static,
{
    fn as_collection(&self) -> CollectionRef<T> {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::ObservableTreeList;

    #[test]
    fn test_chained_pipeline_tracks_source() {
        let list = ObservableTreeList::from_values(["b", "a", "c", "a"]);
        let view = list
            .distinct(DistinctOptions::default())
            .sorted(ValueComparator::natural())
            .reverse();
        assert_eq!(view.values(), vec!["c", "b", "a"]);

        list.push("d").unwrap();
        assert_eq!(view.values(), vec!["d", "c", "b", "a"]);

        let c = list.find(&"c").unwrap();
        list.remove(c).unwrap();
        assert_eq!(view.values(), vec!["d", "b", "a"]);
    }

    #[test]
    fn test_map_with_reverse_writes_back() {
        let list = ObservableTreeList::from_values([1, 2]);
        let doubled = list.map_with(MapBuilder::new(|v: &i32| v * 2).with_reverse(|v: &i32| v / 2));
        doubled.push(6).unwrap();
        assert_eq!(list.values(), vec![1, 2, 3]);
        assert_eq!(doubled.values(), vec![2, 4, 6]);
    }

    #[test]
    fn test_flat_map_over_nested_lists() {
        let left = ObservableTreeList::from_values([1, 2]);
        let right = ObservableTreeList::from_values([3]);
        let outer: Rc<ObservableTreeList<CollectionRef<i32>>> =
            ObservableTreeList::from_values([left.as_collection(), right.as_collection()]);
        let flat = outer.flat_map(|inner: &CollectionRef<i32>| inner.clone());
        assert_eq!(flat.values(), vec![1, 2, 3]);

        right.push(4).unwrap();
        assert_eq!(flat.values(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_find_on_derived_stage() {
        let list = ObservableTreeList::from_values([4, 5, 6]);
        let evens = list.filter(|v| v % 2 == 0);
        let six = evens.find(&6).unwrap();
        assert_eq!(evens.index_of(six), Some(1));
        assert!(evens.find(&5).is_none());
    }
}
