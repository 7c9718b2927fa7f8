//! Reversed view.

use crate::collection::{CollectionRef, ObservableCollection};
use crate::derived::{connect, SourceListener};
use crate::event::{ChangeKind, CollectionEvent};
use crate::subscription::{BatchListener, EventListener, Subscription, SubscriptionManager};
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::rc::Rc;
use strata_core::{CollectionId, ElementId, Error, Rejection, Result};
use strata_lock::{CollectionLock, Lockable};

/// The source collection in reverse order.
///
/// The view keeps no elements of its own: handles are the source's handles
/// and indices are mirrored.
pub struct ReversedCollection<T> {
    id: CollectionId,
    source: CollectionRef<T>,
    subscriptions: Rc<SubscriptionManager<T>>,
    /// Source length as of the last event delivered.
    seen: Cell<usize>,
    upstream: RefCell<Vec<Subscription>>,
}

impl<T: Clone + 'static> ReversedCollection<T> {
    /// Creates a reversed view of `source`.
    pub fn new(source: CollectionRef<T>) -> Rc<Self> {
        let view = Rc::new(Self {
            id: CollectionId::next(),
            seen: Cell::new(source.len()),
            source,
            subscriptions: Rc::new(SubscriptionManager::new()),
            upstream: RefCell::new(Vec::new()),
        });
        let subscriptions = connect(&*view.source, &view);
        view.upstream.borrow_mut().extend(subscriptions);
        view
    }

    #[inline]
    fn flip(&self, index: usize) -> Option<usize> {
        self.source.len().checked_sub(index + 1)
    }
}

impl<T: Clone + 'static> SourceListener<T> for ReversedCollection<T> {
    fn on_source_event(&self, event: &CollectionEvent<T>) {
        let len = self.seen.get();
        let mut flipped = event.clone();
        match &event.kind {
            ChangeKind::Added => {
                flipped.index = len - event.index;
                self.seen.set(len + 1);
            }
            ChangeKind::Removed => {
                flipped.index = len.saturating_sub(event.index + 1);
                self.seen.set(len.saturating_sub(1));
            }
            ChangeKind::Updated { .. } => {
                flipped.index = len.saturating_sub(event.index + 1);
            }
        }
        self.subscriptions.notify(flipped);
    }

    fn on_source_flush(&self) {
        self.subscriptions.flush();
    }
}

impl<T> Lockable for ReversedCollection<T> {
    fn physical_locks(&self) -> Vec<CollectionLock> {
        self.source.physical_locks()
    }
}

impl<T: Clone + 'static> ObservableCollection<T> for ReversedCollection<T> {
    fn id(&self) -> CollectionId {
        self.id
    }

    fn len(&self) -> usize {
        self.source.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.source.get(self.flip(index)?)
    }

    fn element_at(&self, index: usize) -> Option<ElementId> {
        self.source.element_at(self.flip(index)?)
    }

    fn element(&self, id: ElementId) -> Option<T> {
        self.source.element(id)
    }

    fn index_of(&self, id: ElementId) -> Option<usize> {
        self.flip(self.source.index_of(id)?)
    }

    fn next(&self, id: ElementId) -> Option<ElementId> {
        self.source.prev(id)
    }

    fn prev(&self, id: ElementId) -> Option<ElementId> {
        self.source.next(id)
    }

    fn compare_position(&self, a: ElementId, b: ElementId) -> Option<Ordering> {
        self.source.compare_position(a, b).map(Ordering::reverse)
    }

    fn elements(&self) -> Vec<ElementId> {
        let mut elements = self.source.elements();
        elements.reverse();
        elements
    }

    fn values(&self) -> Vec<T> {
        self.source.values_rev()
    }

    fn values_rev(&self) -> Vec<T> {
        self.source.values()
    }

    fn sources_of(&self, id: ElementId, root: CollectionId) -> Result<Vec<ElementId>> {
        if root != self.id {
            return self.source.sources_of(id, root);
        }
        if self.source.element(id).is_some() {
            Ok(vec![id])
        } else {
            Err(Error::NotPresent)
        }
    }

    fn subscribe(&self, listener: EventListener<T>) -> Subscription {
        self.subscriptions.subscribe(listener)
    }

    fn subscribe_batched(&self, listener: BatchListener<T>) -> Subscription {
        self.subscriptions.subscribe_batched(listener)
    }

    fn stamp(&self) -> u64 {
        self.source.stamp()
    }

    fn can_add(&self, value: &T, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        self.source.can_add(value, before, after)
    }

    fn add(
        &self,
        value: T,
        after: Option<ElementId>,
        before: Option<ElementId>,
        prefer_first: bool,
    ) -> Result<ElementId> {
        self.source.add(value, before, after, !prefer_first)
    }

    fn can_move(&self, id: ElementId, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        self.source.can_move(id, before, after)
    }

    fn move_element(
        &self,
        id: ElementId,
        after: Option<ElementId>,
        before: Option<ElementId>,
        prefer_first: bool,
    ) -> Result<ElementId> {
        self.source.move_element(id, before, after, !prefer_first)
    }

    fn can_set(&self, id: ElementId, value: &T) -> Option<Rejection> {
        self.source.can_set(id, value)
    }

    fn set(&self, id: ElementId, value: T) -> Result<T> {
        self.source.set(id, value)
    }

    fn can_remove(&self, id: ElementId) -> Option<Rejection> {
        self.source.can_remove(id)
    }

    fn remove(&self, id: ElementId) -> Result<T> {
        self.source.remove(id)
    }
}
