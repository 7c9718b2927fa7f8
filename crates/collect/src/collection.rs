//! The observable collection contract.

use crate::subscription::{BatchListener, EventListener, Subscription};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use strata_core::{CollectionId, ElementId, Rejection, Result};
use strata_lock::Lockable;
use strata_tree::Comparator;

/// Shared handle to any observable collection.
pub type CollectionRef<T> = Rc<dyn ObservableCollection<T>>;

/// An ordered collection with stable element handles that reports every
/// change to its subscribers and accepts write requests.
///
/// Base collections own their elements. Derived collections (see
/// [`CollectionFlow`](crate::CollectionFlow)) mirror a source and translate
/// write requests into requests against that source; a request either
/// succeeds or is refused with a [`Rejection`] without changing anything.
///
/// Positional arguments `after` and `before` bound where a new or moved
/// element may land: strictly after `after` and strictly before `before`.
/// Within that window `prefer_first` asks for the earliest admissible position.
pub trait ObservableCollection<T>: Lockable {
    /// Returns the collection's identity.
    fn id(&self) -> CollectionId;

    /// Returns the number of elements.
    fn len(&self) -> usize;

    /// Returns true if the collection is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the value at `index`.
    fn get(&self, index: usize) -> Option<T>;

    /// Returns the element at `index`.
    fn element_at(&self, index: usize) -> Option<ElementId>;

    /// Returns the value of an element.
    fn element(&self, id: ElementId) -> Option<T>;

    /// Returns the index of an element.
    fn index_of(&self, id: ElementId) -> Option<usize>;

    /// Returns the element after `id`.
    fn next(&self, id: ElementId) -> Option<ElementId>;

    /// Returns the element before `id`.
    fn prev(&self, id: ElementId) -> Option<ElementId>;

    /// Compares the positions of two present elements.
    fn compare_position(&self, a: ElementId, b: ElementId) -> Option<Ordering>;

    /// Returns the first element.
    fn first(&self) -> Option<ElementId> {
        self.element_at(0)
    }

    /// Returns the last element.
    fn last(&self) -> Option<ElementId> {
        self.len().checked_sub(1).and_then(|index| self.element_at(index))
    }

    /// Returns every element handle in order.
    fn elements(&self) -> Vec<ElementId>;

    /// Returns every value in order.
    fn values(&self) -> Vec<T>;

    /// Returns every value in reverse order.
    fn values_rev(&self) -> Vec<T> {
        let mut values = self.values();
        values.reverse();
        values
    }

    /// Returns the first element whose value matches `predicate`.
    fn find_by(&self, predicate: &dyn Fn(&T) -> bool) -> Option<ElementId> {
        self.elements()
            .into_iter()
            .find(|id| self.element(*id).is_some_and(|value| predicate(&value)))
    }

    /// Returns the first element equal to `value`.
    fn find(&self, value: &T) -> Option<ElementId>
    where
        T: PartialEq,
    {
        self.find_by(&|candidate| candidate == value)
    }

    /// Returns the elements of `root` that element `id` is derived from.
    ///
    /// `root` may be this collection itself, which yields `[id]`. Fails with
    /// an invalid-operation error if `root` is not upstream of this collection.
    fn sources_of(&self, id: ElementId, root: CollectionId) -> Result<Vec<ElementId>>;

    /// Registers an element listener.
    fn subscribe(&self, listener: EventListener<T>) -> Subscription;

    /// Registers a listener receiving each write transaction's events at once.
    fn subscribe_batched(&self, listener: BatchListener<T>) -> Subscription;

    /// Returns the modification stamp.
    fn stamp(&self) -> u64;

    /// Checks whether `value` could be added between `after` and `before`.
    fn can_add(&self, value: &T, after: Option<ElementId>, before: Option<ElementId>)
        -> Option<Rejection>;

    /// Adds a value between `after` and `before`, returning its handle.
    fn add(
        &self,
        value: T,
        after: Option<ElementId>,
        before: Option<ElementId>,
        prefer_first: bool,
    ) -> Result<ElementId>;

    /// Checks whether an element could be moved between `after` and `before`.
    fn can_move(
        &self,
        id: ElementId,
        after: Option<ElementId>,
        before: Option<ElementId>,
    ) -> Option<Rejection>;

    /// Moves an element between `after` and `before`.
    ///
    /// The element lands at the earliest position of the window when
    /// `prefer_first` is set and at the latest otherwise; if it already sits
    /// there nothing happens. Returns the element's handle after the move,
    /// which is new if the element had to be re-inserted.
    fn move_element(
        &self,
        id: ElementId,
        after: Option<ElementId>,
        before: Option<ElementId>,
        prefer_first: bool,
    ) -> Result<ElementId>;

    /// Checks whether an element's value could be replaced by `value`.
    fn can_set(&self, id: ElementId, value: &T) -> Option<Rejection>;

    /// Replaces an element's value, returning the previous value.
    fn set(&self, id: ElementId, value: T) -> Result<T>;

    /// Checks whether an element could be removed.
    fn can_remove(&self, id: ElementId) -> Option<Rejection>;

    /// Removes an element, returning its value.
    fn remove(&self, id: ElementId) -> Result<T>;

    /// Appends a value.
    fn push(&self, value: T) -> Result<ElementId> {
        self.add(value, None, None, false)
    }
}

/// A shareable value ordering used by sorted collections.
pub struct ValueComparator<T> {
    compare: Rc<dyn Fn(&T, &T) -> Ordering>,
}

impl<T: 'static> ValueComparator<T> {
    /// Creates a comparator from a closure.
    pub fn new<F>(compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + 'static,
    {
        Self {
            compare: Rc::new(compare),
        }
    }

    /// Wraps any tree comparator.
    pub fn from_comparator<C>(cmp: C) -> Self
    where
        C: Comparator<T> + 'static,
    {
        Self::new(move |a, b| cmp.compare(a, b))
    }

    /// The natural ascending order.
    pub fn natural() -> Self
    where
        T: Ord,
    {
        Self::new(|a: &T, b: &T| a.cmp(b))
    }

    /// Returns the reversed order.
    pub fn reversed(&self) -> Self {
        let compare = self.compare.clone();
        Self::new(move |a, b| compare(b, a))
    }
}

impl<T> Comparator<T> for ValueComparator<T> {
    #[inline]
    fn compare(&self, a: &T, b: &T) -> Ordering {
        (self.compare)(a, b)
    }
}

impl<T> Clone for ValueComparator<T> {
    fn clone(&self) -> Self {
        Self {
            compare: self.compare.clone(),
        }
    }
}

impl<T> fmt::Debug for ValueComparator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValueComparator")
    }
}
