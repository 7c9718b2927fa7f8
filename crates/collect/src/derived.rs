//! Bookkeeping shared by derived collections.
//!
//! A derived collection keeps its own red-black tree of entries. Each entry
//! remembers the source elements it was derived from, and `by_source` maps
//! every such source element back to its entry so source events can be
//! routed in O(1).

use crate::change_set::ChangeSet;
use crate::collection::ObservableCollection;
use crate::event::CollectionEvent;
use crate::subscription::{Subscription, SubscriptionManager};
use hashbrown::HashMap;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::{Rc, Weak};
use strata_core::{msg, Cause, CollectionId, ElementId, Error, Rejection, Result};
use strata_tree::RedBlackTree;
use tracing::debug;

/// Source elements backing one derived element.
pub(crate) type Sources = SmallVec<[ElementId; 2]>;

/// One derived element.
#[derive(Clone, Debug)]
pub(crate) struct Entry<T> {
    pub value: T,
    pub sources: Sources,
}

impl<T> Entry<T> {
    pub fn new(value: T, source: ElementId) -> Self {
        let mut sources = Sources::new();
        sources.push(source);
        Self { value, sources }
    }

    /// The source element the entry is positioned by.
    #[inline]
    pub fn primary(&self) -> ElementId {
        self.sources[0]
    }
}

pub(crate) struct DerivedState<T> {
    pub tree: RedBlackTree<Entry<T>>,
    pub by_source: HashMap<ElementId, ElementId>,
}

/// Tree, index and subscribers of one derived collection.
pub(crate) struct DerivedCore<T> {
    pub id: CollectionId,
    pub state: RefCell<DerivedState<T>>,
    pub subscriptions: Rc<SubscriptionManager<T>>,
    upstream: RefCell<Vec<Subscription>>,
    /// Whether `by_source` is maintained.
    track: bool,
}

impl<T: Clone + 'static> DerivedCore<T> {
    pub fn new() -> Self {
        Self {
            id: CollectionId::next(),
            state: RefCell::new(DerivedState {
                tree: RedBlackTree::new(),
                by_source: HashMap::new(),
            }),
            subscriptions: Rc::new(SubscriptionManager::new()),
            upstream: RefCell::new(Vec::new()),
            track: true,
        }
    }

    /// Creates a core whose entries' sources belong to several collections,
    /// so handles cannot be indexed together.
    pub fn untracked() -> Self {
        Self {
            track: false,
            ..Self::new()
        }
    }

    /// Keeps upstream subscriptions alive for as long as this collection.
    pub fn attach<I: IntoIterator<Item = Subscription>>(&self, subscriptions: I) {
        self.upstream.borrow_mut().extend(subscriptions);
    }

    pub fn len(&self) -> usize {
        self.state.borrow().tree.len()
    }

    pub fn stamp(&self) -> u64 {
        self.state.borrow().tree.stamp()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.state.borrow().tree.at(index).map(|(_, e)| e.value.clone())
    }

    pub fn element_at(&self, index: usize) -> Option<ElementId> {
        self.state.borrow().tree.get(index)
    }

    pub fn element(&self, id: ElementId) -> Option<T> {
        self.state.borrow().tree.value(id).map(|e| e.value.clone())
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.state.borrow().tree.contains(id)
    }

    pub fn index_of(&self, id: ElementId) -> Option<usize> {
        self.state.borrow().tree.index_of(id)
    }

    pub fn next(&self, id: ElementId) -> Option<ElementId> {
        self.state.borrow().tree.next(id)
    }

    pub fn prev(&self, id: ElementId) -> Option<ElementId> {
        self.state.borrow().tree.prev(id)
    }

    pub fn compare_position(&self, a: ElementId, b: ElementId) -> Option<Ordering> {
        self.state.borrow().tree.compare_position(a, b)
    }

    pub fn elements(&self) -> Vec<ElementId> {
        self.state.borrow().tree.iter().map(|(id, _)| id).collect()
    }

    pub fn values(&self) -> Vec<T> {
        self.state.borrow().tree.iter().map(|(_, e)| e.value.clone()).collect()
    }

    pub fn values_rev(&self) -> Vec<T> {
        self.state
            .borrow()
            .tree
            .iter()
            .rev()
            .map(|(_, e)| e.value.clone())
            .collect()
    }

    /// Returns the source elements of a derived element.
    pub fn sources(&self, id: ElementId) -> Option<Sources> {
        self.state.borrow().tree.value(id).map(|e| e.sources.clone())
    }

    /// Returns the primary source element of a derived element.
    pub fn primary(&self, id: ElementId) -> Option<ElementId> {
        self.state.borrow().tree.value(id).map(Entry::primary)
    }

    /// Returns the derived element a source element maps to.
    pub fn derived_of(&self, source: ElementId) -> Option<ElementId> {
        self.state.borrow().by_source.get(&source).copied()
    }

    /// Resolves provenance through `source`.
    pub fn sources_of<S>(
        &self,
        id: ElementId,
        root: CollectionId,
        source: &dyn ObservableCollection<S>,
    ) -> Result<Vec<ElementId>> {
        if root == self.id {
            return if self.contains(id) {
                Ok(vec![id])
            } else {
                Err(Error::NotPresent)
            };
        }
        let sources = self.sources(id).ok_or(Error::NotPresent)?;
        let mut roots = Vec::new();
        for element in sources {
            for found in source.sources_of(element, root)? {
                if !roots.contains(&found) {
                    roots.push(found);
                }
            }
        }
        Ok(roots)
    }

    /// Translates derived position hints into hints against the source.
    ///
    /// `after` maps to its latest source element and `before` to its
    /// earliest, so the source window never admits a position outside the
    /// derived one.
    pub fn source_hints<S>(
        &self,
        source: &dyn ObservableCollection<S>,
        after: Option<ElementId>,
        before: Option<ElementId>,
    ) -> std::result::Result<(Option<ElementId>, Option<ElementId>), Rejection> {
        let pick = |hint: Option<ElementId>,
                    latest: bool|
         -> std::result::Result<Option<ElementId>, Rejection> {
            let Some(id) = hint else {
                return Ok(None);
            };
            let sources = self
                .sources(id)
                .ok_or_else(|| Rejection::illegal_position(msg::NOT_PRESENT))?;
            let by_position = |a: &ElementId, b: &ElementId| {
                source.compare_position(*a, *b).unwrap_or(Ordering::Equal)
            };
            let chosen = if latest {
                sources.iter().copied().max_by(by_position)
            } else {
                sources.iter().copied().min_by(by_position)
            };
            Ok(chosen)
        };
        Ok((pick(after, true)?, pick(before, false)?))
    }

    /// Inserts an entry where `place` puts it and fires `Added`.
    pub fn insert_placed<F>(&self, entry: Entry<T>, place: F, cause: Cause, moved: bool) -> ElementId
    where
        F: FnOnce(&mut RedBlackTree<Entry<T>>, Entry<T>) -> ElementId,
    {
        let value = entry.value.clone();
        let (id, index) = {
            let mut state = self.state.borrow_mut();
            let sources = entry.sources.clone();
            let id = place(&mut state.tree, entry);
            if self.track {
                for source in sources {
                    state.by_source.insert(source, id);
                }
            }
            (id, state.tree.index_of(id).unwrap_or_default())
        };
        self.subscriptions
            .notify(CollectionEvent::added(id, index, value, cause).as_move(moved));
        id
    }

    /// Inserts an entry at `index` (or last, past the end) and fires `Added`.
    pub fn insert_at(&self, index: usize, entry: Entry<T>, cause: Cause, moved: bool) -> ElementId {
        self.insert_placed(
            entry,
            |tree, entry| match tree.insert_at(index, entry) {
                Ok(id) => id,
                Err(entry) => tree.insert_last(entry),
            },
            cause,
            moved,
        )
    }

    /// Inserts an entry at its position under `compare` and fires `Added`.
    pub fn insert_with<F>(
        &self,
        entry: Entry<T>,
        compare: F,
        prefer_first: bool,
        cause: Cause,
        moved: bool,
    ) -> ElementId
    where
        F: FnMut(&Entry<T>, &Entry<T>) -> Ordering,
    {
        self.insert_placed(
            entry,
            |tree, entry| tree.insert_sorted(entry, compare, prefer_first),
            cause,
            moved,
        )
    }

    /// Removes an entry and fires `Removed`.
    pub fn remove(&self, id: ElementId, cause: Cause, moved: bool) -> Option<Entry<T>> {
        let (index, entry) = {
            let mut state = self.state.borrow_mut();
            let index = state.tree.index_of(id)?;
            let entry = state.tree.try_remove(id)?;
            for source in &entry.sources {
                if state.by_source.get(source) == Some(&id) {
                    state.by_source.remove(source);
                }
            }
            (index, entry)
        };
        self.subscriptions.notify(
            CollectionEvent::removed(id, index, entry.value.clone(), cause).as_move(moved),
        );
        Some(entry)
    }

    /// Replaces an entry's value and fires `Updated`.
    pub fn update(&self, id: ElementId, value: T, cause: Cause) -> Option<T> {
        let (index, old) = {
            let mut state = self.state.borrow_mut();
            let index = state.tree.index_of(id)?;
            let entry = state.tree.value_mut(id)?;
            (index, std::mem::replace(&mut entry.value, value.clone()))
        };
        self.subscriptions
            .notify(CollectionEvent::updated(id, index, old.clone(), value, cause));
        Some(old)
    }

    /// Fires `Updated` with equal old and new values.
    ///
    /// Used when only the provenance of an element changed.
    pub fn touch(&self, id: ElementId, cause: Cause) {
        let found = {
            let state = self.state.borrow();
            state
                .tree
                .index_of(id)
                .zip(state.tree.value(id).map(|e| e.value.clone()))
        };
        if let Some((index, value)) = found {
            self.subscriptions
                .notify(CollectionEvent::updated(id, index, value.clone(), value, cause));
        }
    }

    /// Replaces an entry's source list without firing anything.
    pub fn set_sources(&self, id: ElementId, sources: Sources) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(entry) = state.tree.value_mut(id) else {
            return false;
        };
        entry.sources = sources.clone();
        if self.track {
            for source in sources {
                state.by_source.insert(source, id);
            }
        }
        true
    }

    /// Returns true if the entry is ordered with respect to its neighbors.
    pub fn fits(&self, id: ElementId, compare: &mut dyn FnMut(&Entry<T>, &Entry<T>) -> Ordering) -> bool {
        let state = self.state.borrow();
        let tree = &state.tree;
        let Some(entry) = tree.value(id) else {
            return false;
        };
        let after_prev = tree
            .prev(id)
            .and_then(|prev| tree.value(prev))
            .map_or(true, |prev| compare(prev, entry) != Ordering::Greater);
        let before_next = tree
            .next(id)
            .and_then(|next| tree.value(next))
            .map_or(true, |next| compare(entry, next) != Ordering::Greater);
        after_prev && before_next
    }

    /// Moves an entry that no longer fits to its position under `compare`.
    ///
    /// Fires a `Removed`/`Added` pair flagged as a move and returns the new
    /// handle, or returns `id` untouched if the entry still fits.
    pub fn reposition(
        &self,
        id: ElementId,
        compare: &mut dyn FnMut(&Entry<T>, &Entry<T>) -> Ordering,
        cause: Cause,
    ) -> ElementId {
        if self.fits(id, compare) {
            return id;
        }
        match self.remove(id, cause, true) {
            Some(entry) => {
                debug!(collection = self.id.get(), "repositioned element");
                self.insert_with(entry, compare, false, cause, true)
            }
            None => id,
        }
    }

    /// Forgets a source element.
    pub fn unmap_source(&self, source: ElementId) -> Option<ElementId> {
        self.state.borrow_mut().by_source.remove(&source)
    }

    pub fn flush(&self) {
        self.subscriptions.flush();
    }
}

/// Orders entries by the source position of their primary element.
pub(crate) fn source_order<'a, S, T>(
    source: &'a dyn ObservableCollection<S>,
) -> impl FnMut(&Entry<T>, &Entry<T>) -> Ordering + 'a {
    move |a, b| {
        source
            .compare_position(a.primary(), b.primary())
            .unwrap_or(Ordering::Greater)
    }
}

/// Receives the events of a source collection.
pub(crate) trait SourceListener<S> {
    fn on_source_event(&self, event: &CollectionEvent<S>);

    /// Called when the source's outermost write transaction closes.
    fn on_source_flush(&self);
}

/// Subscribes `listener` to `source` through weak references.
pub(crate) fn connect<S, L>(source: &dyn ObservableCollection<S>, listener: &Rc<L>) -> [Subscription; 2]
where
    S: 'static,
    L: SourceListener<S> + 'static,
{
    let weak: Weak<L> = Rc::downgrade(listener);
    let events = source.subscribe(Rc::new(move |event: &CollectionEvent<S>| {
        if let Some(listener) = weak.upgrade() {
            listener.on_source_event(event);
        }
    }));
    let weak: Weak<L> = Rc::downgrade(listener);
    let batches = source.subscribe_batched(Rc::new(move |_: &ChangeSet<S>| {
        if let Some(listener) = weak.upgrade() {
            listener.on_source_flush();
        }
    }));
    [events, batches]
}

/// Implements the positional reads of [`ObservableCollection`] by delegating
/// to a `core: DerivedCore<T>` field.
macro_rules! delegate_positions {
    ($t:ty) => {
        fn id(&self) -> ::strata_core::CollectionId {
            self.core.id
        }

        fn len(&self) -> usize {
            self.core.len()
        }

        fn element_at(&self, index: usize) -> Option<::strata_core::ElementId> {
            self.core.element_at(index)
        }

        fn index_of(&self, id: ::strata_core::ElementId) -> Option<usize> {
            self.core.index_of(id)
        }

        fn next(&self, id: ::strata_core::ElementId) -> Option<::strata_core::ElementId> {
            self.core.next(id)
        }

        fn prev(&self, id: ::strata_core::ElementId) -> Option<::strata_core::ElementId> {
            self.core.prev(id)
        }

        fn compare_position(
            &self,
            a: ::strata_core::ElementId,
            b: ::strata_core::ElementId,
        ) -> Option<::std::cmp::Ordering> {
            self.core.compare_position(a, b)
        }

        fn elements(&self) -> Vec<::strata_core::ElementId> {
            self.core.elements()
        }

        fn subscribe(
            &self,
            listener: $crate::subscription::EventListener<$t>,
        ) -> $crate::subscription::Subscription {
            self.core.subscriptions.subscribe(listener)
        }

        fn subscribe_batched(
            &self,
            listener: $crate::subscription::BatchListener<$t>,
        ) -> $crate::subscription::Subscription {
            self.core.subscriptions.subscribe_batched(listener)
        }

        fn stamp(&self) -> u64 {
            self.core.stamp()
        }
    };
}

/// Implements the value reads of [`ObservableCollection`] from the cached
/// entry values.
macro_rules! delegate_values {
    ($t:ty) => {
        fn get(&self, index: usize) -> Option<$t> {
            self.core.get(index)
        }

        fn element(&self, id: ::strata_core::ElementId) -> Option<$t> {
            self.core.element(id)
        }

        fn values(&self) -> Vec<$t> {
            self.core.values()
        }

        fn values_rev(&self) -> Vec<$t> {
            self.core.values_rev()
        }
    };
}

pub(crate) use delegate_positions;
pub(crate) use delegate_values;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::ObservableTreeList;

    #[test]
    fn test_source_order_follows_source_positions() {
        let list = ObservableTreeList::from_values([1, 2, 3]);
        let source: &dyn ObservableCollection<i32> = &*list;
        let ids = source.elements();
        let core = DerivedCore::<i32>::new();
        let cause = Cause::new();
        for (value, at) in [(30, 2), (10, 0), (20, 1)] {
            core.insert_with(Entry::new(value, ids[at]), source_order(source), false, cause, false);
        }
        assert_eq!(core.values(), vec![10, 20, 30]);
        assert_eq!(core.derived_of(ids[1]), core.element_at(1));
    }

    #[test]
    fn test_remove_forgets_sources() {
        let source = ObservableTreeList::from_values(['a']);
        let sid = source.elements()[0];
        let core = DerivedCore::<char>::new();
        let id = core.insert_at(0, Entry::new('A', sid), Cause::new(), false);
        let entry = core.remove(id, Cause::new(), false).unwrap();
        assert_eq!(entry.value, 'A');
        assert_eq!(core.derived_of(sid), None);
        assert!(core.remove(id, Cause::new(), false).is_none());
    }

    #[test]
    fn test_source_hints_pick_outer_members() {
        let source = ObservableTreeList::from_values([1, 2, 3]);
        let ids = source.elements();
        let core = DerivedCore::<i32>::new();
        let mut entry = Entry::new(1, ids[1]);
        entry.sources.push(ids[0]);
        entry.sources.push(ids[2]);
        let id = core.insert_at(0, entry, Cause::new(), false);

        let (after, before) = core.source_hints(&*source, Some(id), Some(id)).unwrap();
        assert_eq!(after, Some(ids[2]));
        assert_eq!(before, Some(ids[0]));
    }

    #[test]
    fn test_sources_of_walks_upstream() {
        let source = ObservableTreeList::from_values([7]);
        let sid = source.elements()[0];
        let core = DerivedCore::<i32>::new();
        let id = core.insert_at(0, Entry::new(7, sid), Cause::new(), false);
        assert_eq!(core.sources_of(id, source.id(), &*source).unwrap(), vec![sid]);
        assert_eq!(core.sources_of(id, core.id, &*source).unwrap(), vec![id]);
    }
}
