//! Sorted distinct base collection.

use crate::collection::{ObservableCollection, ValueComparator};
use crate::derived::{connect, SourceListener};
use crate::event::{ChangeKind, CollectionEvent};
use crate::scope::WriteScope;
use crate::subscription::{BatchListener, EventListener, Subscription, SubscriptionManager};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use strata_core::{msg, CollectionId, ElementId, Error, Rejection, Result};
use strata_lock::{CollectionLock, Lockable};
use strata_tree::{Comparator, KeyRange, SearchDirection, TreeSet};
use tracing::trace;

/// A base collection of unique values kept in comparator order.
///
/// Positions are dictated by the comparator, so position hints are only
/// checked for consistency and elements cannot be moved.
pub struct ObservableSortedSet<T> {
    id: CollectionId,
    lock: CollectionLock,
    set: RefCell<TreeSet<T, ValueComparator<T>>>,
    subscriptions: Rc<SubscriptionManager<T>>,
}

impl<T: Clone + 'static> ObservableSortedSet<T> {
    /// Creates an empty set ordered by `cmp`.
    pub fn new(cmp: ValueComparator<T>) -> Rc<Self> {
        Rc::new(Self {
            id: CollectionId::next(),
            lock: CollectionLock::new(),
            set: RefCell::new(TreeSet::with_comparator(cmp)),
            subscriptions: Rc::new(SubscriptionManager::new()),
        })
    }

    /// Creates an empty set in natural order.
    pub fn natural() -> Rc<Self>
    where
        T: Ord,
    {
        Self::new(ValueComparator::natural())
    }

    /// Creates a set holding `values`. Duplicates are dropped.
    pub fn from_values<I: IntoIterator<Item = T>>(cmp: ValueComparator<T>, values: I) -> Rc<Self> {
        let set = Self::new(cmp);
        {
            let mut inner = set.set.borrow_mut();
            for value in values {
                inner.insert(value);
            }
        }
        set
    }

    /// Returns the set's comparator.
    pub fn comparator(&self) -> ValueComparator<T> {
        self.set.borrow().comparator().clone()
    }

    /// Returns the element closest to `value` in `direction`.
    pub fn closest(&self, value: &T, direction: SearchDirection, inclusive: bool) -> Option<ElementId> {
        self.set.borrow().closest(value, direction, inclusive)
    }

    /// Returns the element equal to `value`.
    pub fn find_value(&self, value: &T) -> Option<ElementId> {
        self.set.borrow().find(value)
    }

    /// Returns a live view of the members inside `range`.
    ///
    /// Adds through the view are refused when the value lies outside the
    /// range.
    pub fn sub_set(self: &Rc<Self>, range: KeyRange<T>) -> Rc<SortedSubSet<T>> {
        SortedSubSet::new(self.clone(), range)
    }

    /// Checks that `value` sorts strictly inside the window.
    fn check_position(&self, value: &T, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        let set = self.set.borrow();
        let cmp = set.comparator();
        if let Some(after) = after {
            match set.value(after) {
                Some(bound) if cmp.is_less(bound, value) => {}
                Some(_) => return Some(Rejection::illegal_position(msg::ILLEGAL_ELEMENT_POSITION)),
                None => return Some(Rejection::illegal_position(msg::NOT_PRESENT)),
            }
        }
        if let Some(before) = before {
            match set.value(before) {
                Some(bound) if cmp.is_less(value, bound) => {}
                Some(_) => return Some(Rejection::illegal_position(msg::ILLEGAL_ELEMENT_POSITION)),
                None => return Some(Rejection::illegal_position(msg::NOT_PRESENT)),
            }
        }
        None
    }

    fn check_set(&self, id: ElementId, value: &T) -> Option<Rejection> {
        let set = self.set.borrow();
        if !set.tree().contains(id) {
            return Some(Rejection::illegal_element(msg::NOT_PRESENT));
        }
        match set.find(value) {
            Some(existing) if existing != id => Some(Rejection::illegal_element(msg::ELEMENT_EXISTS)),
            Some(_) => None,
            None => {
                let cmp = set.comparator();
                let tree = set.tree();
                let after_prev = tree
                    .prev(id)
                    .and_then(|prev| tree.value(prev))
                    .map_or(true, |prev| cmp.is_less(prev, value));
                let before_next = tree
                    .next(id)
                    .and_then(|next| tree.value(next))
                    .map_or(true, |next| cmp.is_less(value, next));
                if after_prev && before_next {
                    None
                } else {
                    Some(Rejection::illegal_position(msg::ILLEGAL_ELEMENT_POSITION))
                }
            }
        }
    }

    fn is_between(&self, id: ElementId, after: Option<ElementId>, before: Option<ElementId>) -> bool {
        let set = self.set.borrow();
        let tree = set.tree();
        after.map_or(true, |a| tree.compare_position(a, id) == Some(Ordering::Less))
            && before.map_or(true, |b| tree.compare_position(id, b) == Some(Ordering::Less))
    }
}

impl<T> Lockable for ObservableSortedSet<T> {
    fn physical_locks(&self) -> Vec<CollectionLock> {
        vec![self.lock.clone()]
    }
}

impl<T: Clone + 'static> ObservableCollection<T> for ObservableSortedSet<T> {
    fn id(&self) -> CollectionId {
        self.id
    }

    fn len(&self) -> usize {
        self.set.borrow().len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.set.borrow().tree().at(index).map(|(_, v)| v.clone())
    }

    fn element_at(&self, index: usize) -> Option<ElementId> {
        self.set.borrow().get(index)
    }

    fn element(&self, id: ElementId) -> Option<T> {
        self.set.borrow().value(id).cloned()
    }

    fn index_of(&self, id: ElementId) -> Option<usize> {
        self.set.borrow().index_of(id)
    }

    fn next(&self, id: ElementId) -> Option<ElementId> {
        self.set.borrow().next(id)
    }

    fn prev(&self, id: ElementId) -> Option<ElementId> {
        self.set.borrow().prev(id)
    }

    fn compare_position(&self, a: ElementId, b: ElementId) -> Option<Ordering> {
        self.set.borrow().tree().compare_position(a, b)
    }

    fn elements(&self) -> Vec<ElementId> {
        self.set.borrow().iter().map(|(id, _)| id).collect()
    }

    fn values(&self) -> Vec<T> {
        self.set.borrow().iter().map(|(_, v)| v.clone()).collect()
    }

    fn values_rev(&self) -> Vec<T> {
        self.set.borrow().iter().rev().map(|(_, v)| v.clone()).collect()
    }

    fn sources_of(&self, id: ElementId, root: CollectionId) -> Result<Vec<ElementId>> {
        if root != self.id {
            return Err(Error::invalid_operation("root is not upstream of this collection"));
        }
        if self.set.borrow().tree().contains(id) {
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
        self.set.borrow().stamp()
    }

    fn can_add(&self, value: &T, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        if self.set.borrow().contains(value) {
            return Some(Rejection::illegal_element(msg::ELEMENT_EXISTS));
        }
        self.check_position(value, after, before)
    }

    fn add(
        &self,
        value: T,
        after: Option<ElementId>,
        before: Option<ElementId>,
        _prefer_first: bool,
    ) -> Result<ElementId> {
        if let Some(rejection) = self.can_add(&value, after, before) {
            return Err(rejection.into());
        }
        WriteScope::run(self, &self.subscriptions, |cause| {
            let (id, index) = {
                let mut set = self.set.borrow_mut();
                let (id, _) = set.insert(value.clone());
                (id, set.index_of(id).ok_or(Error::NotPresent)?)
            };
            trace!(collection = self.id.get(), index, "sorted member added");
            self.subscriptions
                .notify(CollectionEvent::added(id, index, value, cause));
            Ok(id)
        })
    }

    fn can_move(&self, id: ElementId, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        if !self.set.borrow().tree().contains(id) {
            return Some(Rejection::illegal_element(msg::NOT_PRESENT));
        }
        if self.is_between(id, after, before) {
            None
        } else {
            Some(Rejection::illegal_position(msg::ILLEGAL_MOVE))
        }
    }

    fn move_element(
        &self,
        id: ElementId,
        after: Option<ElementId>,
        before: Option<ElementId>,
        _prefer_first: bool,
    ) -> Result<ElementId> {
        match self.can_move(id, after, before) {
            Some(rejection) => Err(rejection.into()),
            None => Ok(id),
        }
    }

    fn can_set(&self, id: ElementId, value: &T) -> Option<Rejection> {
        self.check_set(id, value)
    }

    fn set(&self, id: ElementId, value: T) -> Result<T> {
        if let Some(rejection) = self.check_set(id, &value) {
            return Err(rejection.into());
        }
        WriteScope::run(self, &self.subscriptions, |cause| {
            let (index, old) = {
                let mut set = self.set.borrow_mut();
                let index = set.index_of(id).ok_or(Error::NotPresent)?;
                let old = set
                    .replace(id, value.clone())
                    .map_err(|_| Error::illegal_position(msg::ILLEGAL_ELEMENT_POSITION))?;
                (index, old)
            };
            self.subscriptions
                .notify(CollectionEvent::updated(id, index, old.clone(), value, cause));
            Ok(old)
        })
    }

    fn can_remove(&self, id: ElementId) -> Option<Rejection> {
        if self.set.borrow().tree().contains(id) {
            None
        } else {
            Some(Rejection::illegal_element(msg::NOT_PRESENT))
        }
    }

    fn remove(&self, id: ElementId) -> Result<T> {
        if !self.set.borrow().tree().contains(id) {
            return Err(Error::NotPresent);
        }
        WriteScope::run(self, &self.subscriptions, |cause| {
            let (index, value) = {
                let mut set = self.set.borrow_mut();
                let index = set.index_of(id).ok_or(Error::NotPresent)?;
                (index, set.remove_id(id).ok_or(Error::NotPresent)?)
            };
            self.subscriptions
                .notify(CollectionEvent::removed(id, index, value.clone(), cause));
            Ok(value)
        })
    }
}

/// The members of an [`ObservableSortedSet`] inside a key range.
///
/// The view shares the set's handles. Its window is found by searching the
/// set's tree for the range bounds, so positional reads take logarithmic
/// time whatever the size of the set.
pub struct SortedSubSet<T> {
    id: CollectionId,
    parent: Rc<ObservableSortedSet<T>>,
    range: KeyRange<T>,
    subscriptions: Rc<SubscriptionManager<T>>,
    upstream: RefCell<Vec<Subscription>>,
}

impl<T: Clone + 'static> SortedSubSet<T> {
    fn new(parent: Rc<ObservableSortedSet<T>>, range: KeyRange<T>) -> Rc<Self> {
        let view = Rc::new(Self {
            id: CollectionId::next(),
            parent,
            range,
            subscriptions: Rc::new(SubscriptionManager::new()),
            upstream: RefCell::new(Vec::new()),
        });
        let subscriptions = connect(&*view.parent, &view);
        view.upstream.borrow_mut().extend(subscriptions);
        view
    }

    /// Returns the bounds of the view.
    pub fn range(&self) -> &KeyRange<T> {
        &self.range
    }

    /// Returns the set indices `start..end` the range covers.
    fn window(&self) -> (usize, usize) {
        let set = self.parent.set.borrow();
        let sub = set.range(&self.range);
        (sub.start(), sub.start() + sub.len())
    }

    fn in_range(&self, value: &T) -> bool {
        self.range.contains_by(value, self.parent.set.borrow().comparator())
    }

    fn local(&self, id: ElementId) -> Option<usize> {
        let index = self.parent.index_of(id)?;
        let (start, end) = self.window();
        (start..end).contains(&index).then(|| index - start)
    }

    fn check_value(&self, value: &T) -> Option<Rejection> {
        if self.in_range(value) {
            None
        } else {
            Some(Rejection::illegal_element(msg::OUT_OF_RANGE))
        }
    }

    fn check_hints(&self, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        [after, before]
            .into_iter()
            .flatten()
            .find(|hint| self.local(*hint).is_none())
            .map(|_| Rejection::illegal_position(msg::NOT_PRESENT))
    }

    fn check_member(&self, id: ElementId) -> Option<Rejection> {
        match self.local(id) {
            Some(_) => None,
            None => Some(Rejection::illegal_element(msg::NOT_PRESENT)),
        }
    }
}

impl<T: Clone + 'static> SourceListener<T> for SortedSubSet<T> {
    fn on_source_event(&self, event: &CollectionEvent<T>) {
        let (start, end) = self.window();
        let inside = (start..end).contains(&event.index);
        let mut local = event.clone();
        match &event.kind {
            ChangeKind::Added if inside => {}
            ChangeKind::Removed if self.in_range(&event.value) => {}
            ChangeKind::Updated { old } => match (self.in_range(old), inside) {
                (true, true) => {}
                (false, true) => local.kind = ChangeKind::Added,
                (true, false) => {
                    // It left through the nearer edge of the window.
                    local.kind = ChangeKind::Removed;
                    local.value = old.clone();
                    local.index = event.index.max(start);
                }
                (false, false) => return,
            },
            _ => return,
        }
        local.index -= start;
        self.subscriptions.notify(local);
    }

    fn on_source_flush(&self) {
        self.subscriptions.flush();
    }
}

impl<T> Lockable for SortedSubSet<T> {
    fn physical_locks(&self) -> Vec<CollectionLock> {
        self.parent.physical_locks()
    }
}

impl<T: Clone + 'static> ObservableCollection<T> for SortedSubSet<T> {
    fn id(&self) -> CollectionId {
        self.id
    }

    fn len(&self) -> usize {
        let (start, end) = self.window();
        end - start
    }

    fn get(&self, index: usize) -> Option<T> {
        self.element(self.element_at(index)?)
    }

    fn element_at(&self, index: usize) -> Option<ElementId> {
        let set = self.parent.set.borrow();
        let id = set.range(&self.range).get(index);
        id
    }

    fn element(&self, id: ElementId) -> Option<T> {
        self.local(id)?;
        self.parent.element(id)
    }

    fn index_of(&self, id: ElementId) -> Option<usize> {
        self.local(id)
    }

    fn next(&self, id: ElementId) -> Option<ElementId> {
        self.element_at(self.local(id)? + 1)
    }

    fn prev(&self, id: ElementId) -> Option<ElementId> {
        self.element_at(self.local(id)?.checked_sub(1)?)
    }

    fn compare_position(&self, a: ElementId, b: ElementId) -> Option<Ordering> {
        Some(self.local(a)?.cmp(&self.local(b)?))
    }

    fn elements(&self) -> Vec<ElementId> {
        let set = self.parent.set.borrow();
        let ids = set.range(&self.range).iter().map(|(id, _)| id).collect();
        ids
    }

    fn values(&self) -> Vec<T> {
        let set = self.parent.set.borrow();
        let values = set.range(&self.range).iter().map(|(_, v)| v.clone()).collect();
        values
    }

    fn values_rev(&self) -> Vec<T> {
        let set = self.parent.set.borrow();
        let values = set.range(&self.range).iter().rev().map(|(_, v)| v.clone()).collect();
        values
    }

    fn sources_of(&self, id: ElementId, root: CollectionId) -> Result<Vec<ElementId>> {
        self.local(id).ok_or(Error::NotPresent)?;
        if root == self.id {
            Ok(vec![id])
        } else {
            self.parent.sources_of(id, root)
        }
    }

    fn subscribe(&self, listener: EventListener<T>) -> Subscription {
        self.subscriptions.subscribe(listener)
    }

    fn subscribe_batched(&self, listener: BatchListener<T>) -> Subscription {
        self.subscriptions.subscribe_batched(listener)
    }

    fn stamp(&self) -> u64 {
        self.parent.stamp()
    }

    fn can_add(&self, value: &T, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        self.check_value(value)
            .or_else(|| self.check_hints(after, before))
            .or_else(|| self.parent.can_add(value, after, before))
    }

    fn add(
        &self,
        value: T,
        after: Option<ElementId>,
        before: Option<ElementId>,
        prefer_first: bool,
    ) -> Result<ElementId> {
        if let Some(rejection) = self.check_value(&value).or_else(|| self.check_hints(after, before)) {
            return Err(rejection.into());
        }
        self.parent.add(value, after, before, prefer_first)
    }

    fn can_move(&self, id: ElementId, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        self.check_member(id)
            .or_else(|| self.check_hints(after, before))
            .or_else(|| self.parent.can_move(id, after, before))
    }

    fn move_element(
        &self,
        id: ElementId,
        after: Option<ElementId>,
        before: Option<ElementId>,
        prefer_first: bool,
    ) -> Result<ElementId> {
        if let Some(rejection) = self.check_member(id).or_else(|| self.check_hints(after, before)) {
            return Err(rejection.into());
        }
        self.parent.move_element(id, after, before, prefer_first)
    }

    fn can_set(&self, id: ElementId, value: &T) -> Option<Rejection> {
        self.check_member(id)
            .or_else(|| self.check_value(value))
            .or_else(|| self.parent.can_set(id, value))
    }

    fn set(&self, id: ElementId, value: T) -> Result<T> {
        if let Some(rejection) = self.check_member(id).or_else(|| self.check_value(&value)) {
            return Err(rejection.into());
        }
        self.parent.set(id, value)
    }

    fn can_remove(&self, id: ElementId) -> Option<Rejection> {
        self.check_member(id).or_else(|| self.parent.can_remove(id))
    }

    fn remove(&self, id: ElementId) -> Result<T> {
        if let Some(rejection) = self.check_member(id) {
            return Err(rejection.into());
        }
        self.parent.remove(id)
    }
}
