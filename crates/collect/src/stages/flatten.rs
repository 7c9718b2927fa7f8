//! Flattening stage.

use crate::change_set::ChangeSet;
use crate::collection::{CollectionRef, ObservableCollection};
use crate::derived::{connect, delegate_positions, delegate_values, DerivedCore, Entry, SourceListener};
use crate::event::{ChangeKind, CollectionEvent};
use crate::scope::WriteScope;
use crate::subscription::Subscription;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::{Rc, Weak};
use strata_core::{msg, Cause, CollectionId, ElementId, Error, Rejection, Result};
use strata_lock::{CollectionLock, Lockable};
use tracing::{debug, trace};

/// One outer element and the inner collection it contributes.
struct Outer<T> {
    inner: CollectionRef<T>,
    /// Inner element to derived element.
    elements: HashMap<ElementId, ElementId>,
    _subscriptions: [Subscription; 2],
}

/// Where a write lands: an outer element and hints inside its inner collection.
struct Target<T> {
    outer: ElementId,
    inner: CollectionRef<T>,
    after: Option<ElementId>,
    before: Option<ElementId>,
}

/// The concatenation of the inner collections of every source value, in
/// source order.
///
/// Each derived element records its outer source element followed by its
/// element in the inner collection. Edits are carried out on the inner
/// collections.
pub struct FlattenedCollection<O, T> {
    source: CollectionRef<O>,
    core: DerivedCore<T>,
    inner_of: Rc<dyn Fn(&O) -> CollectionRef<T>>,
    outers: RefCell<HashMap<ElementId, Outer<T>>>,
    this: Weak<Self>,
}

impl<O: Clone + 'static, T: Clone + 'static> FlattenedCollection<O, T> {
    /// Flattens `source` through `inner_of`.
    pub fn new<F>(source: CollectionRef<O>, inner_of: F) -> Rc<Self>
    where
        F: Fn(&O) -> CollectionRef<T> + 'static,
    {
        let stage = Rc::new_cyclic(|this| Self {
            source,
            core: DerivedCore::untracked(),
            inner_of: Rc::new(inner_of),
            outers: RefCell::new(HashMap::new()),
            this: this.clone(),
        });
        let cause = Cause::new();
        for id in stage.source.elements() {
            if let Some(value) = stage.source.element(id) {
                stage.attach_outer(id, &value, cause, false);
            }
        }
        stage.core.attach(connect(&*stage.source, &stage));
        stage
    }

    /// Returns the outer source element and inner element behind `id`.
    pub fn origin(&self, id: ElementId) -> Option<(ElementId, ElementId)> {
        let sources = self.core.sources(id)?;
        Some((sources[0], sources[1]))
    }

    fn inner(&self, outer: ElementId) -> Option<CollectionRef<T>> {
        self.outers.borrow().get(&outer).map(|o| o.inner.clone())
    }

    fn derived(&self, outer: ElementId, inner: ElementId) -> Option<ElementId> {
        self.outers
            .borrow()
            .get(&outer)
            .and_then(|o| o.elements.get(&inner).copied())
    }

    /// Orders entries by outer position, then by inner position.
    fn order(&self, a: &Entry<T>, b: &Entry<T>) -> Ordering {
        let outer = self
            .source
            .compare_position(a.sources[0], b.sources[0])
            .unwrap_or(Ordering::Greater);
        if outer != Ordering::Equal {
            return outer;
        }
        self.outers
            .borrow()
            .get(&a.sources[0])
            .and_then(|o| o.inner.compare_position(a.sources[1], b.sources[1]))
            .unwrap_or(Ordering::Greater)
    }

    fn add_inner(&self, outer: ElementId, inner_id: ElementId, value: T, cause: Cause, moved: bool) {
        let mut entry = Entry::new(value, outer);
        entry.sources.push(inner_id);
        let id = self
            .core
            .insert_with(entry, |a, b| self.order(a, b), false, cause, moved);
        if let Some(o) = self.outers.borrow_mut().get_mut(&outer) {
            o.elements.insert(inner_id, id);
        }
    }

    fn attach_outer(&self, outer: ElementId, value: &O, cause: Cause, moved: bool) {
        let inner = (self.inner_of)(value);
        let weak = self.this.clone();
        let events = inner.subscribe(Rc::new(move |event: &CollectionEvent<T>| {
            if let Some(stage) = weak.upgrade() {
                stage.on_inner_event(outer, event);
            }
        }));
        let weak = self.this.clone();
        let batches = inner.subscribe_batched(Rc::new(move |_: &ChangeSet<T>| {
            if let Some(stage) = weak.upgrade() {
                stage.core.flush();
            }
        }));
        self.outers.borrow_mut().insert(
            outer,
            Outer {
                inner: inner.clone(),
                elements: HashMap::new(),
                _subscriptions: [events, batches],
            },
        );
        for inner_id in inner.elements() {
            if let Some(value) = inner.element(inner_id) {
                self.add_inner(outer, inner_id, value, cause, moved);
            }
        }
    }

    fn detach_outer(&self, outer: ElementId, cause: Cause, moved: bool) {
        let Some(state) = self.outers.borrow_mut().remove(&outer) else {
            return;
        };
        let mut derived: Vec<(usize, ElementId)> = state
            .elements
            .values()
            .filter_map(|id| self.core.index_of(*id).map(|index| (index, *id)))
            .collect();
        derived.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        for (_, id) in derived {
            self.core.remove(id, cause, moved);
        }
    }

    fn on_inner_event(&self, outer: ElementId, event: &CollectionEvent<T>) {
        match &event.kind {
            ChangeKind::Added => {
                self.add_inner(outer, event.id, event.value.clone(), event.cause, event.moved);
            }
            ChangeKind::Removed => {
                let removed = self
                    .outers
                    .borrow_mut()
                    .get_mut(&outer)
                    .and_then(|o| o.elements.remove(&event.id));
                if let Some(id) = removed {
                    self.core.remove(id, event.cause, event.moved);
                }
            }
            ChangeKind::Updated { .. } => {
                if let Some(id) = self.derived(outer, event.id) {
                    self.core.update(id, event.value.clone(), event.cause);
                }
            }
        }
        trace!(collection = self.core.id.get(), index = event.index, "inner event");
    }

    /// Picks the inner collection a write goes to.
    fn target(
        &self,
        after: Option<ElementId>,
        before: Option<ElementId>,
        prefer_first: bool,
    ) -> std::result::Result<Target<T>, Rejection> {
        let origin = |hint: Option<ElementId>| match hint {
            None => Ok(None),
            Some(id) => self
                .origin(id)
                .map(Some)
                .ok_or_else(|| Rejection::illegal_position(msg::NOT_PRESENT)),
        };
        let after = origin(after)?;
        let before = origin(before)?;
        if let (Some((a, _)), Some((b, _))) = (after, before) {
            if self.source.compare_position(a, b) == Some(Ordering::Greater) {
                return Err(Rejection::illegal_position(msg::ILLEGAL_ELEMENT_POSITION));
            }
        }
        let outer = match (prefer_first, after, before) {
            (true, Some((outer, _)), _) | (false, _, Some((outer, _))) => Some(outer),
            (true, None, _) => self.source.first(),
            (false, _, None) => self.source.last(),
        }
        .ok_or_else(|| Rejection::unsupported(msg::UNSUPPORTED_OPERATION))?;
        let inner = self
            .inner(outer)
            .ok_or_else(|| Rejection::unsupported(msg::UNSUPPORTED_OPERATION))?;
        let hint_in = |hint: Option<(ElementId, ElementId)>| {
            hint.and_then(|(o, i)| (o == outer).then_some(i))
        };
        Ok(Target {
            outer,
            inner,
            after: hint_in(after),
            before: hint_in(before),
        })
    }
}

impl<O: Clone + 'static, T: Clone + 'static> SourceListener<O> for FlattenedCollection<O, T> {
    fn on_source_event(&self, event: &CollectionEvent<O>) {
        match &event.kind {
            ChangeKind::Added => self.attach_outer(event.id, &event.value, event.cause, event.moved),
            ChangeKind::Removed => self.detach_outer(event.id, event.cause, event.moved),
            ChangeKind::Updated { .. } => {
                let replaced = match self.inner(event.id) {
                    Some(current) => !Rc::ptr_eq(&current, &(self.inner_of)(&event.value)),
                    None => true,
                };
                if replaced {
                    debug!(collection = self.core.id.get(), "inner collection replaced");
                    self.detach_outer(event.id, event.cause, false);
                    self.attach_outer(event.id, &event.value, event.cause, false);
                }
            }
        }
    }

    fn on_source_flush(&self) {
        self.core.flush();
    }
}

impl<O, T> Lockable for FlattenedCollection<O, T> {
    fn physical_locks(&self) -> Vec<CollectionLock> {
        let mut locks = self.source.physical_locks();
        for outer in self.outers.borrow().values() {
            locks.extend(outer.inner.physical_locks());
        }
        locks
    }
}

impl<O: Clone + 'static, T: Clone + 'static> ObservableCollection<T> for FlattenedCollection<O, T> {
    delegate_positions!(T);
    delegate_values!(T);

    fn sources_of(&self, id: ElementId, root: CollectionId) -> Result<Vec<ElementId>> {
        if root == self.core.id {
            return if self.core.contains(id) {
                Ok(vec![id])
            } else {
                Err(Error::NotPresent)
            };
        }
        let (outer, inner_id) = self.origin(id).ok_or(Error::NotPresent)?;
        match self.source.sources_of(outer, root) {
            Ok(found) => Ok(found),
            Err(_) => {
                let inner = self.inner(outer).ok_or(Error::NotPresent)?;
                inner.sources_of(inner_id, root)
            }
        }
    }

    fn can_add(&self, value: &T, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        match self.target(after, before, false) {
            Ok(target) => target.inner.can_add(value, target.after, target.before),
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
        let _tx = WriteScope::enter(self)?;
        let target = self.target(after, before, prefer_first)?;
        let inner_id = target
            .inner
            .add(value, target.after, target.before, prefer_first)?;
        self.derived(target.outer, inner_id).ok_or(Error::NotPresent)
    }

    fn can_move(&self, id: ElementId, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        let Some((outer, inner_id)) = self.origin(id) else {
            return Some(Rejection::illegal_element(msg::NOT_PRESENT));
        };
        let target = match self.target(after, before, false) {
            Ok(target) => target,
            Err(rejection) => return Some(rejection),
        };
        if target.outer == outer {
            return target.inner.can_move(inner_id, target.after, target.before);
        }
        let Some(value) = self.core.element(id) else {
            return Some(Rejection::illegal_element(msg::NOT_PRESENT));
        };
        target
            .inner
            .can_add(&value, target.after, target.before)
            .or_else(|| self.inner(outer).and_then(|inner| inner.can_remove(inner_id)))
    }

    fn move_element(
        &self,
        id: ElementId,
        after: Option<ElementId>,
        before: Option<ElementId>,
        prefer_first: bool,
    ) -> Result<ElementId> {
        let _tx = WriteScope::enter(self)?;
        let (outer, inner_id) = self.origin(id).ok_or(Error::NotPresent)?;
        let target = self.target(after, before, prefer_first)?;
        if target.outer == outer {
            let moved = target
                .inner
                .move_element(inner_id, target.after, target.before, prefer_first)?;
            return self.derived(outer, moved).ok_or(Error::NotPresent);
        }
        let source_inner = self.inner(outer).ok_or(Error::NotPresent)?;
        if let Some(rejection) = source_inner.can_remove(inner_id) {
            return Err(rejection.into());
        }
        let value = self.core.element(id).ok_or(Error::NotPresent)?;
        let added = target
            .inner
            .add(value, target.after, target.before, prefer_first)?;
        source_inner.remove(inner_id)?;
        self.derived(target.outer, added).ok_or(Error::NotPresent)
    }

    fn can_set(&self, id: ElementId, value: &T) -> Option<Rejection> {
        let Some((outer, inner_id)) = self.origin(id) else {
            return Some(Rejection::illegal_element(msg::NOT_PRESENT));
        };
        self.inner(outer)
            .and_then(|inner| inner.can_set(inner_id, value))
    }

    fn set(&self, id: ElementId, value: T) -> Result<T> {
        let _tx = WriteScope::enter(self)?;
        let (outer, inner_id) = self.origin(id).ok_or(Error::NotPresent)?;
        let inner = self.inner(outer).ok_or(Error::NotPresent)?;
        inner.set(inner_id, value)
    }

    fn can_remove(&self, id: ElementId) -> Option<Rejection> {
        let Some((outer, inner_id)) = self.origin(id) else {
            return Some(Rejection::illegal_element(msg::NOT_PRESENT));
        };
        self.inner(outer).and_then(|inner| inner.can_remove(inner_id))
    }

    fn remove(&self, id: ElementId) -> Result<T> {
        let _tx = WriteScope::enter(self)?;
        let (outer, inner_id) = self.origin(id).ok_or(Error::NotPresent)?;
        let inner = self.inner(outer).ok_or(Error::NotPresent)?;
        inner.remove(inner_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::ObservableTreeList;

    type Inner = Rc<ObservableTreeList<i32>>;

    fn setup() -> (Rc<ObservableTreeList<Inner>>, Inner, Inner, Rc<FlattenedCollection<Inner, i32>>) {
        let a = ObservableTreeList::from_values([1, 2]);
        let b = ObservableTreeList::from_values([10]);
        let outer = ObservableTreeList::from_values([a.clone(), b.clone()]);
        let flat = FlattenedCollection::new(outer.clone(), |inner: &Inner| -> CollectionRef<i32> { inner.clone() });
        (outer, a, b, flat)
    }

    #[test]
    fn test_flatten_concatenates() {
        let (_outer, a, b, flat) = setup();
        assert_eq!(flat.values(), vec![1, 2, 10]);
        a.push(3).unwrap();
        b.insert_at(0, 9).unwrap();
        assert_eq!(flat.values(), vec![1, 2, 3, 9, 10]);
        a.remove(a.element_at(0).unwrap()).unwrap();
        assert_eq!(flat.values(), vec![2, 3, 9, 10]);
    }

    #[test]
    fn test_flatten_follows_outer_changes() {
        let (outer, _a, b, flat) = setup();
        let c = ObservableTreeList::from_values([100, 200]);
        outer.insert_at(1, c.clone()).unwrap();
        assert_eq!(flat.values(), vec![1, 2, 100, 200, 10]);

        outer.remove(outer.element_at(0).unwrap()).unwrap();
        assert_eq!(flat.values(), vec![100, 200, 10]);

        outer.set(outer.element_at(1).unwrap(), c.clone()).unwrap();
        assert_eq!(flat.values(), vec![100, 200, 100, 200]);
        b.push(11).unwrap();
        assert_eq!(flat.len(), 4);
    }

    #[test]
    fn test_flatten_edits_inner_collections() {
        let (_outer, a, b, flat) = setup();
        let two = flat.element_at(1).unwrap();
        let ten = flat.element_at(2).unwrap();

        let id = flat.add(5, Some(two), Some(ten), true).unwrap();
        assert_eq!(a.values(), vec![1, 2, 5]);
        assert_eq!(flat.index_of(id), Some(2));

        let id = flat.add(7, Some(two), Some(ten), false).unwrap();
        assert_eq!(b.values(), vec![7, 10]);
        assert_eq!(flat.values(), vec![1, 2, 5, 7, 10]);

        assert_eq!(flat.set(id, 8).unwrap(), 7);
        assert_eq!(flat.remove(id).unwrap(), 8);
        assert_eq!(b.values(), vec![10]);
    }

    #[test]
    fn test_flatten_moves_across_inners() {
        let (_outer, a, b, flat) = setup();
        let one = flat.element_at(0).unwrap();
        let ten = flat.element_at(2).unwrap();
        let moved = flat.move_element(one, Some(ten), None, true).unwrap();
        assert_eq!(a.values(), vec![2]);
        assert_eq!(b.values(), vec![10, 1]);
        assert_eq!(flat.index_of(moved), Some(2));
    }

    #[test]
    fn test_flatten_provenance_and_locks() {
        let (outer, a, _b, flat) = setup();
        let two = flat.element_at(1).unwrap();
        assert_eq!(flat.sources_of(two, outer.id()).unwrap(), vec![outer.element_at(0).unwrap()]);
        assert_eq!(flat.sources_of(two, a.id()).unwrap(), vec![a.element_at(1).unwrap()]);
        assert!(flat.core_id().intersects(&a.core_id()));
        assert!(flat.core_id().intersects(&outer.core_id()));
    }
}
