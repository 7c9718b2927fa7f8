//! One-to-one mapping stage.

use crate::collection::{CollectionRef, ObservableCollection};
use crate::derived::{connect, delegate_positions, DerivedCore, Entry, SourceListener};
use crate::event::{ChangeKind, CollectionEvent};
use crate::scope::WriteScope;
use std::rc::Rc;
use strata_core::{msg, Cause, CollectionId, ElementId, Error, Rejection, Result};
use strata_lock::{CollectionLock, Lockable};
use tracing::trace;

/// Options of a mapping stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapOptions {
    /// Keep mapped values instead of re-mapping the source value on each read.
    pub cache: bool,
    /// Accept write requests by mapping values back to the source.
    pub reversible: bool,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            cache: true,
            reversible: false,
        }
    }
}

/// Builder for [`MappedCollection`].
pub struct MapBuilder<S, T> {
    map: Rc<dyn Fn(&S) -> T>,
    reverse: Option<Rc<dyn Fn(&T) -> S>>,
    options: MapOptions,
}

impl<S: Clone + 'static, T: Clone + 'static> MapBuilder<S, T> {
    /// Creates a builder for the forward mapping `map`.
    pub fn new<F>(map: F) -> Self
    where
        F: Fn(&S) -> T + 'static,
    {
        Self {
            map: Rc::new(map),
            reverse: None,
            options: MapOptions::default(),
        }
    }

    /// Supplies the inverse mapping, making the stage writable.
    pub fn with_reverse<F>(mut self, reverse: F) -> Self
    where
        F: Fn(&T) -> S + 'static,
    {
        self.reverse = Some(Rc::new(reverse));
        self.options.reversible = true;
        self
    }

    /// Sets whether mapped values are cached.
    pub fn cache(mut self, cache: bool) -> Self {
        self.options.cache = cache;
        self
    }

    /// Sets whether write requests are accepted.
    pub fn reversible(mut self, reversible: bool) -> Self {
        self.options.reversible = reversible;
        self
    }

    /// Returns the options collected so far.
    pub fn options(&self) -> MapOptions {
        self.options
    }

    /// Builds the stage over `source`.
    pub fn build(self, source: CollectionRef<S>) -> Rc<MappedCollection<S, T>> {
        let stage = Rc::new(MappedCollection {
            source,
            core: DerivedCore::new(),
            map: self.map,
            reverse: self.reverse,
            options: self.options,
        });
        let cause = Cause::new();
        for (index, id) in stage.source.elements().into_iter().enumerate() {
            if let Some(value) = stage.source.element(id) {
                let mapped = (stage.map)(&value);
                stage.core.insert_at(index, Entry::new(mapped, id), cause, false);
            }
        }
        stage.core.attach(connect(&*stage.source, &stage));
        stage
    }
}

/// A collection holding `map(v)` for every source value `v`, in source order.
///
/// Moves and removals are always forwarded to the source. Adds and sets need
/// an inverse mapping and are refused as unsupported without one.
pub struct MappedCollection<S, T> {
    source: CollectionRef<S>,
    core: DerivedCore<T>,
    map: Rc<dyn Fn(&S) -> T>,
    reverse: Option<Rc<dyn Fn(&T) -> S>>,
    options: MapOptions,
}

impl<S: Clone + 'static, T: Clone + 'static> MappedCollection<S, T> {
    /// Returns the stage options.
    pub fn options(&self) -> MapOptions {
        self.options
    }

    fn reverse(&self) -> std::result::Result<&Rc<dyn Fn(&T) -> S>, Rejection> {
        match &self.reverse {
            Some(reverse) if self.options.reversible => Ok(reverse),
            _ => Err(Rejection::unsupported(msg::NOT_REVERSIBLE)),
        }
    }

    fn source_of(&self, id: ElementId) -> std::result::Result<ElementId, Rejection> {
        self.core
            .primary(id)
            .ok_or_else(|| Rejection::illegal_element(msg::NOT_PRESENT))
    }

    fn resolve(&self, source_id: ElementId) -> Result<ElementId> {
        self.core.derived_of(source_id).ok_or(Error::NotPresent)
    }
}

impl<S: Clone + 'static, T: Clone + 'static> SourceListener<S> for MappedCollection<S, T> {
    fn on_source_event(&self, event: &CollectionEvent<S>) {
        match &event.kind {
            ChangeKind::Added => {
                let mapped = (self.map)(&event.value);
                self.core
                    .insert_at(event.index, Entry::new(mapped, event.id), event.cause, event.moved);
            }
            ChangeKind::Removed => {
                if let Some(id) = self.core.derived_of(event.id) {
                    self.core.remove(id, event.cause, event.moved);
                }
            }
            ChangeKind::Updated { .. } => {
                if let Some(id) = self.core.derived_of(event.id) {
                    let mapped = (self.map)(&event.value);
                    self.core.update(id, mapped, event.cause);
                }
            }
        }
        trace!(collection = self.core.id.get(), index = event.index, "mapped source event");
    }

    fn on_source_flush(&self) {
        self.core.flush();
    }
}

impl<S, T> Lockable for MappedCollection<S, T> {
    fn physical_locks(&self) -> Vec<CollectionLock> {
        self.source.physical_locks()
    }
}

impl<S: Clone + 'static, T: Clone + 'static> ObservableCollection<T> for MappedCollection<S, T> {
    delegate_positions!(T);

    fn get(&self, index: usize) -> Option<T> {
        if self.options.cache {
            self.core.get(index)
        } else {
            self.element(self.core.element_at(index)?)
        }
    }

    fn element(&self, id: ElementId) -> Option<T> {
        if self.options.cache {
            self.core.element(id)
        } else {
            let value = self.source.element(self.core.primary(id)?)?;
            Some((self.map)(&value))
        }
    }

    fn values(&self) -> Vec<T> {
        if self.options.cache {
            self.core.values()
        } else {
            self.source.values().iter().map(|v| (self.map)(v)).collect()
        }
    }

    fn values_rev(&self) -> Vec<T> {
        let mut values = self.values();
        values.reverse();
        values
    }

    fn sources_of(&self, id: ElementId, root: CollectionId) -> Result<Vec<ElementId>> {
        self.core.sources_of(id, root, &*self.source)
    }

    fn can_add(&self, value: &T, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        let reverse = match self.reverse() {
            Ok(reverse) => reverse,
            Err(rejection) => return Some(rejection),
        };
        match self.core.source_hints(&*self.source, after, before) {
            Ok((after, before)) => self.source.can_add(&reverse(value), after, before),
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
        let reverse = self.reverse()?.clone();
        let _tx = WriteScope::enter(self)?;
        let (after, before) = self.core.source_hints(&*self.source, after, before)?;
        let source_id = self.source.add(reverse(&value), after, before, prefer_first)?;
        self.resolve(source_id)
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
        self.resolve(moved)
    }

    fn can_set(&self, id: ElementId, value: &T) -> Option<Rejection> {
        let reverse = match self.reverse() {
            Ok(reverse) => reverse,
            Err(rejection) => return Some(rejection),
        };
        match self.source_of(id) {
            Ok(source_id) => self.source.can_set(source_id, &reverse(value)),
            Err(rejection) => Some(rejection),
        }
    }

    fn set(&self, id: ElementId, value: T) -> Result<T> {
        let reverse = self.reverse()?.clone();
        let _tx = WriteScope::enter(self)?;
        let source_id = self.core.primary(id).ok_or(Error::NotPresent)?;
        let old = self.element(id).ok_or(Error::NotPresent)?;
        self.source.set(source_id, reverse(&value))?;
        Ok(old)
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
        let old = self.element(id).ok_or(Error::NotPresent)?;
        self.source.remove(source_id)?;
        Ok(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::ObservableTreeList;
    use std::cell::{Cell, RefCell};

    fn doubled(list: &Rc<ObservableTreeList<i32>>) -> Rc<MappedCollection<i32, i32>> {
        MapBuilder::new(|v: &i32| v * 2)
            .with_reverse(|v: &i32| v / 2)
            .build(list.clone())
    }

    #[test]
    fn test_map_tracks_source() {
        let list = ObservableTreeList::from_values([1, 2, 3]);
        let mapped = doubled(&list);
        assert_eq!(mapped.values(), vec![2, 4, 6]);

        let first = list.element_at(0).unwrap();
        list.set(first, 10).unwrap();
        list.push(4).unwrap();
        list.remove(list.element_at(1).unwrap()).unwrap();
        assert_eq!(mapped.values(), vec![20, 6, 8]);
        assert_eq!(mapped.values_rev(), vec![8, 6, 20]);
    }

    #[test]
    fn test_map_writes_through_reverse() {
        let list = ObservableTreeList::from_values([1, 3]);
        let mapped = doubled(&list);
        let first = mapped.element_at(0).unwrap();

        let id = mapped.add(4, Some(first), None, true).unwrap();
        assert_eq!(list.values(), vec![1, 2, 3]);
        assert_eq!(mapped.index_of(id), Some(1));

        assert_eq!(mapped.set(id, 8).unwrap(), 4);
        assert_eq!(list.values(), vec![1, 4, 3]);
        assert_eq!(mapped.remove(id).unwrap(), 8);
        assert_eq!(list.values(), vec![1, 3]);
    }

    #[test]
    fn test_map_without_reverse_is_unsupported() {
        let list = ObservableTreeList::from_values(["a"]);
        let mapped = MapBuilder::new(|v: &&str| v.len()).build(list.clone());
        let rejection = mapped.can_add(&1, None, None).unwrap();
        assert!(rejection.is_unsupported());
        assert_eq!(mapped.push(1), Err(Error::unsupported(msg::NOT_REVERSIBLE)));
        assert_eq!(list.len(), 1);

        let id = mapped.element_at(0).unwrap();
        assert_eq!(mapped.remove(id).unwrap(), 1);
        assert!(list.is_empty());
    }

    #[test]
    fn test_uncached_map_reads_source() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let list = ObservableTreeList::from_values([1, 2]);
        let mapped = MapBuilder::new(move |v: &i32| {
            counter.set(counter.get() + 1);
            v + 100
        })
        .cache(false)
        .build(list.clone());
        let before = calls.get();
        assert_eq!(mapped.get(1), Some(102));
        assert_eq!(mapped.values(), vec![101, 102]);
        assert!(calls.get() > before);
    }

    #[test]
    fn test_map_provenance_and_moves() {
        let list = ObservableTreeList::from_values(['a', 'b', 'c']);
        let upper = MapBuilder::new(|c: &char| c.to_ascii_uppercase()).build(list.clone());
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        let _sub = upper.subscribe(Rc::new(move |e: &CollectionEvent<char>| {
            sink.borrow_mut().push((e.kind.clone(), e.index, e.moved))
        }));

        let c = upper.element_at(2).unwrap();
        let moved = upper.move_element(c, None, None, true).unwrap();
        assert_eq!(upper.values(), vec!['C', 'A', 'B']);
        assert_eq!(upper.index_of(moved), Some(0));
        assert_eq!(
            *events.borrow(),
            vec![(ChangeKind::Removed, 2, true), (ChangeKind::Added, 0, true)]
        );

        let root = upper.sources_of(moved, list.id()).unwrap();
        assert_eq!(root, vec![list.element_at(0).unwrap()]);
        assert!(upper.sources_of(moved, CollectionId::next()).is_err());
    }
}
