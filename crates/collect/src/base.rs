//! Base list collection.

use crate::change_set::ChangeSet;
use crate::collection::ObservableCollection;
use crate::event::CollectionEvent;
use crate::scope::WriteScope;
use crate::subscription::{BatchListener, EventListener, Subscription, SubscriptionManager};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use strata_core::{msg, CollectionId, ElementId, Error, Rejection, Result};
use strata_lock::{CollectionLock, Lockable};
use strata_tree::RedBlackTree;
use tracing::trace;

/// A mutable list with stable element handles and O(log n) positional access.
///
/// This is the root of most derivation pipelines. Every mutation runs in a
/// write transaction on the list's own lock and fires its events before the
/// call returns.
pub struct ObservableTreeList<T> {
    id: CollectionId,
    lock: CollectionLock,
    tree: RefCell<RedBlackTree<T>>,
    subscriptions: Rc<SubscriptionManager<T>>,
}

impl<T: Clone + 'static> ObservableTreeList<T> {
    /// Creates an empty list.
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            id: CollectionId::next(),
            lock: CollectionLock::new(),
            tree: RefCell::new(RedBlackTree::new()),
            subscriptions: Rc::new(SubscriptionManager::new()),
        })
    }

    /// Creates a list holding `values` in order.
    pub fn from_values<I: IntoIterator<Item = T>>(values: I) -> Rc<Self> {
        let list = Self::new();
        {
            let mut tree = list.tree.borrow_mut();
            for value in values {
                tree.insert_last(value);
            }
        }
        list
    }

    /// Returns the list's lock.
    pub fn collection_lock(&self) -> &CollectionLock {
        &self.lock
    }

    /// Inserts a value so that it ends up at `index`.
    pub fn insert_at(&self, index: usize, value: T) -> Result<ElementId> {
        WriteScope::run(self, &self.subscriptions, |cause| {
            let id = self
                .tree
                .borrow_mut()
                .insert_at(index, value.clone())
                .map_err(|_| Error::invalid_operation("insert index out of bounds"))?;
            self.subscriptions
                .notify(CollectionEvent::added(id, index, value, cause));
            Ok(id)
        })
    }

    /// Appends every value in one write transaction.
    pub fn extend<I: IntoIterator<Item = T>>(&self, values: I) -> Result<Vec<ElementId>> {
        WriteScope::run(self, &self.subscriptions, |cause| {
            let mut ids = Vec::new();
            for value in values {
                let (id, index) = {
                    let mut tree = self.tree.borrow_mut();
                    let id = tree.insert_last(value.clone());
                    (id, tree.len() - 1)
                };
                self.subscriptions
                    .notify(CollectionEvent::added(id, index, value, cause));
                ids.push(id);
            }
            Ok(ids)
        })
    }

    /// Removes every element, last first, in one write transaction.
    pub fn clear(&self) -> Result<()> {
        WriteScope::run(self, &self.subscriptions, |cause| {
            loop {
                let removed = {
                    let mut tree = self.tree.borrow_mut();
                    match tree.last() {
                        Some(id) => {
                            let index = tree.len() - 1;
                            Some((id, index, tree.remove(id)))
                        }
                        None => None,
                    }
                };
                let Some((id, index, value)) = removed else {
                    break;
                };
                self.subscriptions
                    .notify(CollectionEvent::removed(id, index, value, cause));
            }
            Ok(())
        })
    }

    fn check_window(&self, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        let tree = self.tree.borrow();
        window_rejection(&tree, after, before)
    }

    /// Whether `id` already sits where a move would put it.
    fn is_in_place(&self, id: ElementId, after: Option<ElementId>, before: Option<ElementId>, prefer_first: bool) -> bool {
        let tree = self.tree.borrow();
        if prefer_first {
            tree.prev(id) == after
        } else {
            tree.next(id) == before
        }
    }

    fn insert_in_window(
        &self,
        value: T,
        after: Option<ElementId>,
        before: Option<ElementId>,
        prefer_first: bool,
    ) -> Result<(ElementId, usize)> {
        let mut tree = self.tree.borrow_mut();
        let inserted = match (prefer_first, after, before) {
            (true, Some(after), _) => tree.insert_after(after, value),
            (true, None, _) => Ok(tree.insert_first(value)),
            (false, _, Some(before)) => tree.insert_before(before, value),
            (false, _, None) => Ok(tree.insert_last(value)),
        };
        let id = inserted.map_err(|_| Error::NotPresent)?;
        let index = tree.index_of(id).ok_or(Error::NotPresent)?;
        Ok((id, index))
    }
}

/// Rejects hints that are absent or out of order.
pub(crate) fn window_rejection<T>(
    tree: &RedBlackTree<T>,
    after: Option<ElementId>,
    before: Option<ElementId>,
) -> Option<Rejection> {
    for hint in [after, before].into_iter().flatten() {
        if !tree.contains(hint) {
            return Some(Rejection::illegal_position(msg::NOT_PRESENT));
        }
    }
    if let (Some(after), Some(before)) = (after, before) {
        if tree.compare_position(after, before) != Some(Ordering::Less) {
            return Some(Rejection::illegal_position(msg::ILLEGAL_ELEMENT_POSITION));
        }
    }
    None
}

impl<T> Lockable for ObservableTreeList<T> {
    fn physical_locks(&self) -> Vec<CollectionLock> {
        vec![self.lock.clone()]
    }
}

impl<T: Clone + 'static> ObservableCollection<T> for ObservableTreeList<T> {
    fn id(&self) -> CollectionId {
        self.id
    }

    fn len(&self) -> usize {
        self.tree.borrow().len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.tree.borrow().at(index).map(|(_, v)| v.clone())
    }

    fn element_at(&self, index: usize) -> Option<ElementId> {
        self.tree.borrow().get(index)
    }

    fn element(&self, id: ElementId) -> Option<T> {
        self.tree.borrow().value(id).cloned()
    }

    fn index_of(&self, id: ElementId) -> Option<usize> {
        self.tree.borrow().index_of(id)
    }

    fn next(&self, id: ElementId) -> Option<ElementId> {
        self.tree.borrow().next(id)
    }

    fn prev(&self, id: ElementId) -> Option<ElementId> {
        self.tree.borrow().prev(id)
    }

    fn compare_position(&self, a: ElementId, b: ElementId) -> Option<Ordering> {
        self.tree.borrow().compare_position(a, b)
    }

    fn elements(&self) -> Vec<ElementId> {
        self.tree.borrow().iter().map(|(id, _)| id).collect()
    }

    fn values(&self) -> Vec<T> {
        self.tree.borrow().iter().map(|(_, v)| v.clone()).collect()
    }

    fn values_rev(&self) -> Vec<T> {
        self.tree.borrow().iter().rev().map(|(_, v)| v.clone()).collect()
    }

    fn sources_of(&self, id: ElementId, root: CollectionId) -> Result<Vec<ElementId>> {
        if root != self.id {
            return Err(Error::invalid_operation("root is not upstream of this collection"));
        }
        if self.tree.borrow().contains(id) {
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
        self.tree.borrow().stamp()
    }

    fn can_add(&self, _value: &T, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        self.check_window(after, before)
    }

    fn add(
        &self,
        value: T,
        after: Option<ElementId>,
        before: Option<ElementId>,
        prefer_first: bool,
    ) -> Result<ElementId> {
        if let Some(rejection) = self.check_window(after, before) {
            return Err(rejection.into());
        }
        WriteScope::run(self, &self.subscriptions, |cause| {
            let (id, index) = self.insert_in_window(value.clone(), after, before, prefer_first)?;
            trace!(collection = self.id.get(), index, "element added");
            self.subscriptions
                .notify(CollectionEvent::added(id, index, value, cause));
            Ok(id)
        })
    }

    fn can_move(&self, id: ElementId, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        if let Some(rejection) = self.presence(id) {
            return Some(rejection);
        }
        if after == Some(id) || before == Some(id) {
            return Some(Rejection::illegal_position(msg::ILLEGAL_MOVE));
        }
        self.check_window(after, before)
    }

    fn move_element(
        &self,
        id: ElementId,
        after: Option<ElementId>,
        before: Option<ElementId>,
        prefer_first: bool,
    ) -> Result<ElementId> {
        if let Some(rejection) = self.can_move(id, after, before) {
            return Err(rejection.into());
        }
        if self.is_in_place(id, after, before, prefer_first) {
            return Ok(id);
        }
        WriteScope::run(self, &self.subscriptions, |cause| {
            let (index, value) = {
                let mut tree = self.tree.borrow_mut();
                let index = tree.index_of(id).ok_or(Error::NotPresent)?;
                (index, tree.remove(id))
            };
            self.subscriptions.notify(
                CollectionEvent::removed(id, index, value.clone(), cause).as_move(true),
            );
            let (new_id, new_index) =
                self.insert_in_window(value.clone(), after, before, prefer_first)?;
            trace!(collection = self.id.get(), from = index, to = new_index, "element moved");
            self.subscriptions.notify(
                CollectionEvent::added(new_id, new_index, value, cause).as_move(true),
            );
            Ok(new_id)
        })
    }

    fn can_set(&self, id: ElementId, _value: &T) -> Option<Rejection> {
        self.presence(id)
    }

    fn set(&self, id: ElementId, value: T) -> Result<T> {
        if !self.tree.borrow().contains(id) {
            return Err(Error::NotPresent);
        }
        WriteScope::run(self, &self.subscriptions, |cause| {
            let (index, old) = {
                let mut tree = self.tree.borrow_mut();
                let index = tree.index_of(id).ok_or(Error::NotPresent)?;
                let old = tree.replace(id, value.clone()).ok_or(Error::NotPresent)?;
                (index, old)
            };
            self.subscriptions
                .notify(CollectionEvent::updated(id, index, old.clone(), value, cause));
            Ok(old)
        })
    }

    fn can_remove(&self, id: ElementId) -> Option<Rejection> {
        self.presence(id)
    }

    fn remove(&self, id: ElementId) -> Result<T> {
        if !self.tree.borrow().contains(id) {
            return Err(Error::NotPresent);
        }
        WriteScope::run(self, &self.subscriptions, |cause| {
            let (index, value) = {
                let mut tree = self.tree.borrow_mut();
                let index = tree.index_of(id).ok_or(Error::NotPresent)?;
                (index, tree.remove(id))
            };
            self.subscriptions
                .notify(CollectionEvent::removed(id, index, value.clone(), cause));
            Ok(value)
        })
    }
}

impl<T: Clone + 'static> ObservableTreeList<T> {
    fn presence(&self, id: ElementId) -> Option<Rejection> {
        if self.tree.borrow().contains(id) {
            None
        } else {
            Some(Rejection::illegal_element(msg::NOT_PRESENT))
        }
    }

    /// Subscribes to whole-transaction change sets.
    pub fn on_changes<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChangeSet<T>) + 'static,
    {
        self.subscriptions.subscribe_batched(Rc::new(listener))
    }
}
