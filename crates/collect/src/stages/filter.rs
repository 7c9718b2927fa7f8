//! Filtering stage.

use crate::collection::{CollectionRef, ObservableCollection};
use crate::derived::{
    connect, delegate_positions, delegate_values, source_order, DerivedCore, Entry, SourceListener,
};
use crate::event::{ChangeKind, CollectionEvent};
use crate::scope::WriteScope;
use std::rc::Rc;
use strata_core::{msg, Cause, CollectionId, ElementId, Error, Rejection, Result};
use strata_lock::{CollectionLock, Lockable};
use tracing::trace;

/// A collection holding the source values accepted by a predicate, in source
/// order.
///
/// Write requests for values the predicate refuses are rejected as illegal
/// elements. Everything else is forwarded to the source.
pub struct FilteredCollection<T> {
    source: CollectionRef<T>,
    core: DerivedCore<T>,
    predicate: Rc<dyn Fn(&T) -> bool>,
    message: String,
}

impl<T: Clone + 'static> FilteredCollection<T> {
    /// Filters `source` by `predicate`.
    pub fn new<F>(source: CollectionRef<T>, predicate: F) -> Rc<Self>
    where
        F: Fn(&T) -> bool + 'static,
    {
        Self::with_message(source, predicate, msg::ILLEGAL_ELEMENT)
    }

    /// Filters `source` by `predicate`, rejecting refused values with `message`.
    pub fn with_message<F>(source: CollectionRef<T>, predicate: F, message: impl Into<String>) -> Rc<Self>
    where
        F: Fn(&T) -> bool + 'static,
    {
        let stage = Rc::new(Self {
            source,
            core: DerivedCore::new(),
            predicate: Rc::new(predicate),
            message: message.into(),
        });
        let cause = Cause::new();
        let mut index = 0;
        for id in stage.source.elements() {
            match stage.source.element(id) {
                Some(value) if (stage.predicate)(&value) => {
                    stage.core.insert_at(index, Entry::new(value, id), cause, false);
                    index += 1;
                }
                _ => {}
            }
        }
        stage.core.attach(connect(&*stage.source, &stage));
        stage
    }

    /// Returns true if `value` passes the filter.
    pub fn accepts(&self, value: &T) -> bool {
        (self.predicate)(value)
    }

    fn refuse(&self, value: &T) -> Option<Rejection> {
        if self.accepts(value) {
            None
        } else {
            Some(Rejection::illegal_element(self.message.clone()))
        }
    }

    fn source_of(&self, id: ElementId) -> std::result::Result<ElementId, Rejection> {
        self.core
            .primary(id)
            .ok_or_else(|| Rejection::illegal_element(msg::NOT_PRESENT))
    }

    fn accept(&self, event: &CollectionEvent<T>) {
        let entry = Entry::new(event.value.clone(), event.id);
        self.core
            .insert_with(entry, source_order(&*self.source), false, event.cause, event.moved);
    }
}

impl<T: Clone + 'static> SourceListener<T> for FilteredCollection<T> {
    fn on_source_event(&self, event: &CollectionEvent<T>) {
        let existing = self.core.derived_of(event.id);
        match &event.kind {
            ChangeKind::Added => {
                if self.accepts(&event.value) {
                    self.accept(event);
                }
            }
            ChangeKind::Removed => {
                if let Some(id) = existing {
                    self.core.remove(id, event.cause, event.moved);
                }
            }
            ChangeKind::Updated { .. } => match (existing, self.accepts(&event.value)) {
                (Some(id), true) => {
                    self.core.update(id, event.value.clone(), event.cause);
                }
                (Some(id), false) => {
                    trace!(collection = self.core.id.get(), "element left filter");
                    self.core.remove(id, event.cause, false);
                }
                (None, true) => {
                    trace!(collection = self.core.id.get(), "element entered filter");
                    self.accept(event);
                }
                (None, false) => {}
            },
        }
    }

    fn on_source_flush(&self) {
        self.core.flush();
    }
}

impl<T> Lockable for FilteredCollection<T> {
    fn physical_locks(&self) -> Vec<CollectionLock> {
        self.source.physical_locks()
    }
}

impl<T: Clone + 'static> ObservableCollection<T> for FilteredCollection<T> {
    delegate_positions!(T);
    delegate_values!(T);

    fn sources_of(&self, id: ElementId, root: CollectionId) -> Result<Vec<ElementId>> {
        self.core.sources_of(id, root, &*self.source)
    }

    fn can_add(&self, value: &T, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        if let Some(rejection) = self.refuse(value) {
            return Some(rejection);
        }
        match self.core.source_hints(&*self.source, after, before) {
            Ok((after, before)) => self.source.can_add(value, after, before),
            Err(rejection) => Some(rejection),
        }
    }

    fn add(
        &self,
        value: T,
        after: Option<ElementId>,
        before: Option<ElementId>,
        prefer_first: bool,
    ) -> Result<ElementId> {
        if let Some(rejection) = self.refuse(&value) {
            return Err(rejection.into());
        }
        let _tx = WriteScope::enter(self)?;
        let (after, before) = self.core.source_hints(&*self.source, after, before)?;
        let source_id = self.source.add(value, after, before, prefer_first)?;
        self.core.derived_of(source_id).ok_or(Error::NotPresent)
    }

    fn can_move(&self, id: ElementId, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        let source_id = match self.source_of(id) {
            Ok(source_id) => source_id,
            Err(rejection) => return Some(rejection),
        };
        match self.core.source_hints(&*self.source, after, before) {
            Ok((after, before)) => self.source.can_move(source_id, after, before),
            Err(rejection) => Some(rejection),
        }
    }

    fn move_element(
        &self,
        id: ElementId,
        after: Option<ElementId>,
        before: Option<ElementId>,
        prefer_first: bool,
    ) -> Result<ElementId> {
        let _tx = WriteScope::enter(self)?;
        let source_id = self.source_of(id)?;
        let (after, before) = self.core.source_hints(&*self.source, after, before)?;
        let moved = self.source.move_element(source_id, after, before, prefer_first)?;
        self.core.derived_of(moved).ok_or(Error::NotPresent)
    }

    fn can_set(&self, id: ElementId, value: &T) -> Option<Rejection> {
        if let Some(rejection) = self.refuse(value) {
            return Some(rejection);
        }
        match self.source_of(id) {
            Ok(source_id) => self.source.can_set(source_id, value),
            Err(rejection) => Some(rejection),
        }
    }

    fn set(&self, id: ElementId, value: T) -> Result<T> {
        if let Some(rejection) = self.refuse(&value) {
            return Err(rejection.into());
        }
        let _tx = WriteScope::enter(self)?;
        let source_id = self.core.primary(id).ok_or(Error::NotPresent)?;
        self.source.set(source_id, value)
    }

    fn can_remove(&self, id: ElementId) -> Option<Rejection> {
        match self.source_of(id) {
            Ok(source_id) => self.source.can_remove(source_id),
            Err(rejection) => Some(rejection),
        }
    }

    fn remove(&self, id: ElementId) -> Result<T> {
        let _tx = WriteScope::enter(self)?;
        let source_id = self.core.primary(id).ok_or(Error::NotPresent)?;
        self.source.remove(source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::ObservableTreeList;
    use std::cell::RefCell;

    fn evens(list: &Rc<ObservableTreeList<i32>>) -> Rc<FilteredCollection<i32>> {
        FilteredCollection::new(list.clone(), |v: &i32| v % 2 == 0)
    }

    #[test]
    fn test_filter_initial_and_incremental() {
        let list = ObservableTreeList::from_values([1, 2, 3, 4]);
        let filtered = evens(&list);
        assert_eq!(filtered.values(), vec![2, 4]);

        list.insert_at(1, 6).unwrap();
        list.push(7).unwrap();
        assert_eq!(filtered.values(), vec![6, 2, 4]);
    }

    #[test]
    fn test_filter_updates_cross_predicate() {
        let list = ObservableTreeList::from_values([1, 2, 3]);
        let filtered = evens(&list);
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        let _sub = filtered.subscribe(Rc::new(move |e: &CollectionEvent<i32>| {
            sink.borrow_mut().push((e.kind.clone(), e.index, e.value))
        }));

        let one = list.element_at(0).unwrap();
        let two = list.element_at(1).unwrap();
        list.set(one, 8).unwrap();
        list.set(two, 5).unwrap();
        list.set(one, 10).unwrap();
        list.set(two, 9).unwrap();

        assert_eq!(filtered.values(), vec![10]);
        assert_eq!(
            *events.borrow(),
            vec![
                (ChangeKind::Added, 0, 8),
                (ChangeKind::Removed, 1, 2),
                (ChangeKind::Updated { old: 8 }, 0, 10),
            ]
        );
    }

    #[test]
    fn test_filter_rejects_refused_values() {
        let list = ObservableTreeList::from_values([2]);
        let filtered = FilteredCollection::with_message(list.clone(), |v: &i32| *v > 0, "must be positive");
        let rejection = filtered.can_add(&-1, None, None).unwrap();
        assert_eq!(rejection.reason(), "must be positive");
        assert!(filtered.push(-1).is_err());
        assert_eq!(list.len(), 1);

        let id = filtered.element_at(0).unwrap();
        assert!(filtered.set(id, -5).is_err());
        assert_eq!(filtered.set(id, 5).unwrap(), 2);
        assert_eq!(list.values(), vec![5]);
    }

    #[test]
    fn test_filter_add_respects_window() {
        let list = ObservableTreeList::from_values([2, 3, 4]);
        let filtered = evens(&list);
        let two = filtered.element_at(0).unwrap();
        let four = filtered.element_at(1).unwrap();

        let id = filtered.add(6, Some(two), Some(four), false).unwrap();
        assert_eq!(filtered.values(), vec![2, 6, 4]);
        assert_eq!(filtered.index_of(id), Some(1));
        assert_eq!(list.values(), vec![2, 3, 6, 4]);
        assert!(filtered.add(8, Some(four), Some(two), false).is_err());
    }

    #[test]
    fn test_dropping_filter_unsubscribes() {
        let list = ObservableTreeList::from_values([1]);
        let filtered = evens(&list);
        drop(filtered);
        list.push(2).unwrap();
        assert_eq!(list.len(), 2);
    }
}
