//! Live key to values grouping.

use crate::entry::{KeyEntry, KeyEntryId, ValueRef};
use crate::error::GroupingError;
use crate::event::{EntryChange, MultiMapEvent};
use crate::info::{GroupedElementInfo, ProvenanceTable, Roots, Side};
use crate::options::{GroupingOptions, KeyChangePolicy};
use hashbrown::HashMap;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::hash::Hash;
use std::rc::Rc;
use strata_collect::{
    ChangeKind, CollectionEvent, CollectionRef, DistinctCollection, DistinctOptions, MapBuilder,
    ObservableCollection, Subscription,
};
use strata_core::{Cause, CollectionId, ElementId, Result};
use strata_lock::{CollectionLock, LockType, Lockable};
use strata_tree::RedBlackTree;
use tracing::{debug, trace, warn};

/// Callback for multimap events.
pub type MultiMapListener<K, V> = Rc<dyn Fn(&MultiMapEvent<K, V>)>;

/// Collections and settings one update pass works against.
struct Pass<'a, K, V> {
    keys: &'a dyn ObservableCollection<K>,
    values: &'a dyn ObservableCollection<V>,
    options: GroupingOptions,
    cause: Cause,
    events: Vec<MultiMapEvent<K, V>>,
}

impl<K, V> Pass<'_, K, V> {
    fn emit(&mut self, entry: ElementId, key: K, change: EntryChange<K, V>) {
        self.events.push(MultiMapEvent {
            entry: KeyEntryId(entry),
            key,
            change,
            cause: self.cause,
        });
    }
}

/// A change reported by one of the flows, with the roots of its element.
enum FlowChange<K, V> {
    Key(CollectionEvent<K>, Roots),
    Value(CollectionEvent<V>, Roots),
}

impl<K: Clone + Hash + Eq, V: Clone> FlowChange<K, V> {
    fn cause(&self) -> Cause {
        match self {
            FlowChange::Key(event, _) => event.cause,
            FlowChange::Value(event, _) => event.cause,
        }
    }

    fn apply(self, state: &mut GroupState<K, V>, pass: &mut Pass<'_, K, V>) {
        match self {
            FlowChange::Key(event, roots) => match event.kind {
                ChangeKind::Added => state.key_added(event.id, event.value, roots, pass),
                ChangeKind::Removed => state.key_removed(event.id, pass),
                ChangeKind::Updated { .. } => state.key_updated(event.id, event.value, roots, pass),
            },
            FlowChange::Value(event, roots) => match event.kind {
                ChangeKind::Added => state.value_added(event.id, event.value, roots, pass),
                ChangeKind::Removed => state.value_removed(event.id, pass),
                ChangeKind::Updated { .. } => state.value_updated(event.id, event.value, roots, pass),
            },
        }
    }
}

/// Grouping state, mutated only under the map's write lock.
struct GroupState<K, V> {
    table: ProvenanceTable,
    entries: RedBlackTree<KeyEntry<K, V>>,
    /// Entry handle by key element.
    entry_of: HashMap<ElementId, ElementId>,
    /// Current value of every known key element.
    key_values: HashMap<ElementId, K>,
    by_key: HashMap<K, ElementId>,
    /// Current value of every known value element.
    value_data: HashMap<ElementId, V>,
}

impl<K: Clone + Hash + Eq, V: Clone> GroupState<K, V> {
    fn new() -> Self {
        Self {
            table: ProvenanceTable::new(),
            entries: RedBlackTree::new(),
            entry_of: HashMap::new(),
            key_values: HashMap::new(),
            by_key: HashMap::new(),
            value_data: HashMap::new(),
        }
    }

    fn entry_for(&self, key: &K) -> Option<ElementId> {
        let element = self.by_key.get(key)?;
        self.entry_of.get(element).copied()
    }

    fn ensure_entry(&mut self, key_element: ElementId, pass: &mut Pass<'_, K, V>) -> Option<ElementId> {
        if let Some(id) = self.entry_of.get(&key_element) {
            return Some(*id);
        }
        let key = self.key_values.get(&key_element)?.clone();
        let keys = pass.keys;
        let id = self.entries.insert_sorted(
            KeyEntry::new(key.clone(), key_element),
            |a, b| {
                keys.compare_position(a.key_element, b.key_element)
                    .unwrap_or(Ordering::Greater)
            },
            false,
        );
        self.entry_of.insert(key_element, id);
        let index = self.entries.index_of(id).unwrap_or_default();
        trace!(?key_element, index, "key entry added");
        pass.emit(id, key, EntryChange::KeyAdded { index });
        Some(id)
    }

    /// Removes a key entry, reporting its remaining values first.
    fn drop_entry(&mut self, key_element: ElementId, pass: &mut Pass<'_, K, V>) {
        let Some(id) = self.entry_of.remove(&key_element) else {
            return;
        };
        let Some(index) = self.entries.index_of(id) else {
            return;
        };
        let KeyEntry { key, values, .. } = self.entries.remove(id);
        let refs: Vec<ValueRef<V>> = values.refs().cloned().collect();
        for (position, value_ref) in refs.into_iter().enumerate().rev() {
            pass.emit(
                id,
                key.clone(),
                EntryChange::ValueRemoved {
                    index: position,
                    value: value_ref.value,
                },
            );
        }
        debug!(?key_element, index, "key entry removed");
        pass.emit(id, key, EntryChange::KeyRemoved { index });
    }

    /// Brings the membership of one value under one key in line with the
    /// roots the two share.
    fn sync(&mut self, key_element: ElementId, value_element: ElementId, pass: &mut Pass<'_, K, V>) {
        let roots = self.table.shared_roots(key_element, value_element);
        if roots.is_empty() {
            self.detach(key_element, value_element, pass);
            return;
        }
        let Some(entry_id) = self.ensure_entry(key_element, pass) else {
            return;
        };
        let Some(entry) = self.entries.value_mut(entry_id) else {
            return;
        };
        if entry.values.contains(value_element) {
            entry.values.set_roots(value_element, roots);
            return;
        }
        let Some(value) = self.value_data.get(&value_element).cloned() else {
            return;
        };
        let values = pass.values;
        let index = entry.values.insert(
            ValueRef {
                element: value_element,
                value: value.clone(),
                roots,
            },
            |a, b| values.compare_position(a, b),
        );
        let key = entry.key.clone();
        trace!(?key_element, ?value_element, index, "value grouped");
        pass.emit(entry_id, key, EntryChange::ValueAdded { index, value });
    }

    fn detach(&mut self, key_element: ElementId, value_element: ElementId, pass: &mut Pass<'_, K, V>) {
        let Some(entry_id) = self.entry_of.get(&key_element).copied() else {
            return;
        };
        let Some(entry) = self.entries.value_mut(entry_id) else {
            return;
        };
        let Some((index, removed)) = entry.values.remove(value_element) else {
            return;
        };
        let key = entry.key.clone();
        let empty = entry.values.is_empty();
        trace!(?key_element, ?value_element, index, "value ungrouped");
        pass.emit(
            entry_id,
            key,
            EntryChange::ValueRemoved {
                index,
                value: removed.value,
            },
        );
        if empty && pass.options.prune_empty_keys {
            self.drop_entry(key_element, pass);
        }
    }

    /// Re-files an element under `roots` and syncs every pair that may have
    /// changed, in flow order of the other side.
    fn set_roots(&mut self, side: Side, element: ElementId, roots: Roots, pass: &mut Pass<'_, K, V>) {
        let mut touched: Vec<ElementId> = self.table.set_roots(side, element, roots).into_iter().collect();
        match side {
            Side::Key => {
                touched.sort_by_key(|value| pass.values.index_of(*value).unwrap_or(usize::MAX));
                for value in touched {
                    self.sync(element, value, pass);
                }
            }
            Side::Value => {
                touched.sort_by_key(|key| pass.keys.index_of(*key).unwrap_or(usize::MAX));
                for key in touched {
                    self.sync(key, element, pass);
                }
            }
        }
    }

    fn key_added(&mut self, element: ElementId, key: K, roots: Roots, pass: &mut Pass<'_, K, V>) {
        self.key_values.insert(element, key.clone());
        self.by_key.insert(key, element);
        if !pass.options.prune_empty_keys {
            self.ensure_entry(element, pass);
        }
        self.set_roots(Side::Key, element, roots, pass);
    }

    fn key_removed(&mut self, element: ElementId, pass: &mut Pass<'_, K, V>) {
        self.set_roots(Side::Key, element, Roots::new(), pass);
        self.drop_entry(element, pass);
        if let Some(key) = self.key_values.remove(&element) {
            if self.by_key.get(&key) == Some(&element) {
                self.by_key.remove(&key);
            }
        }
    }

    fn key_updated(&mut self, element: ElementId, key: K, roots: Roots, pass: &mut Pass<'_, K, V>) {
        let Some(old) = self.key_values.get(&element).cloned() else {
            return;
        };
        if old != key {
            self.rekey(element, old, key, pass);
        }
        self.set_roots(Side::Key, element, roots, pass);
    }

    fn rekey(&mut self, element: ElementId, old: K, key: K, pass: &mut Pass<'_, K, V>) {
        self.key_values.insert(element, key.clone());
        if self.by_key.get(&old) == Some(&element) {
            self.by_key.remove(&old);
        }
        self.by_key.insert(key.clone(), element);

        let Some(entry_id) = self.entry_of.get(&element).copied() else {
            return;
        };
        match pass.options.key_changes {
            KeyChangePolicy::InPlace => {
                if let Some(entry) = self.entries.value_mut(entry_id) {
                    entry.key = key.clone();
                }
                let index = self.entries.index_of(entry_id).unwrap_or_default();
                pass.emit(entry_id, key, EntryChange::KeyChanged { index, old });
            }
            KeyChangePolicy::Regroup => {
                debug!(?element, "regrouping values under changed key");
                self.drop_entry(element, pass);
                if !pass.options.prune_empty_keys {
                    self.ensure_entry(element, pass);
                }
                let mut partners: Vec<ElementId> = self.table.partners(Side::Key, element).into_iter().collect();
                partners.sort_by_key(|value| pass.values.index_of(*value).unwrap_or(usize::MAX));
                for value in partners {
                    self.sync(element, value, pass);
                }
            }
        }
    }

    fn value_added(&mut self, element: ElementId, value: V, roots: Roots, pass: &mut Pass<'_, K, V>) {
        self.value_data.insert(element, value);
        self.set_roots(Side::Value, element, roots, pass);
    }

    fn value_removed(&mut self, element: ElementId, pass: &mut Pass<'_, K, V>) {
        self.set_roots(Side::Value, element, Roots::new(), pass);
        self.value_data.remove(&element);
    }

    fn value_updated(&mut self, element: ElementId, value: V, roots: Roots, pass: &mut Pass<'_, K, V>) {
        if !self.value_data.contains_key(&element) {
            return;
        }
        self.value_data.insert(element, value.clone());
        let mut holders: Vec<ElementId> = self.table.partners(Side::Value, element).into_iter().collect();
        holders.sort_by_key(|key| pass.keys.index_of(*key).unwrap_or(usize::MAX));
        for key_element in holders {
            let Some(entry_id) = self.entry_of.get(&key_element).copied() else {
                continue;
            };
            let Some(entry) = self.entries.value_mut(entry_id) else {
                continue;
            };
            if let Some((index, old)) = entry.values.update(element, value.clone()) {
                let key = entry.key.clone();
                pass.emit(
                    entry_id,
                    key,
                    EntryChange::ValueUpdated {
                        index,
                        old,
                        value: value.clone(),
                    },
                );
            }
        }
        self.set_roots(Side::Value, element, roots, pass);
    }
}

/// Listener registry with queued delivery.
struct Listeners<K, V> {
    next_id: Cell<u64>,
    listeners: RefCell<Vec<(u64, MultiMapListener<K, V>)>>,
    queue: RefCell<VecDeque<MultiMapEvent<K, V>>>,
    delivering: Cell<bool>,
}

impl<K: 'static, V: 'static> Listeners<K, V> {
    fn new() -> Self {
        Self {
            next_id: Cell::new(1),
            listeners: RefCell::new(Vec::new()),
            queue: RefCell::new(VecDeque::new()),
            delivering: Cell::new(false),
        }
    }

    fn subscribe(self: &Rc<Self>, listener: MultiMapListener<K, V>) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.listeners.borrow_mut().push((id, listener));
        let registry = Rc::downgrade(self);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.listeners.borrow_mut().retain(|(other, _)| *other != id);
            }
        })
    }

    fn deliver(&self, events: Vec<MultiMapEvent<K, V>>) {
        self.queue.borrow_mut().extend(events);
        if self.delivering.replace(true) {
            return;
        }
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(event) = next else {
                break;
            };
            let listeners: Vec<MultiMapListener<K, V>> =
                self.listeners.borrow().iter().map(|(_, l)| l.clone()).collect();
            for listener in listeners {
                listener(&event);
            }
        }
        self.delivering.set(false);
    }
}

/// A live multimap grouping a value flow under a distinct key flow.
///
/// Keys and values are derived independently from a common root collection.
/// A value is grouped under a key when both trace back to at least one
/// common root element, so the grouping does not depend on the order in
/// which the two flows report their changes.
///
/// Key entries follow the order of the key flow and the values under a key
/// follow the order of the value flow.
pub struct GroupedMultiMap<K, V> {
    root: CollectionId,
    keys: CollectionRef<K>,
    values: CollectionRef<V>,
    options: GroupingOptions,
    state: RefCell<GroupState<K, V>>,
    listeners: Rc<Listeners<K, V>>,
    /// Flow changes waiting for the map's lock.
    deferred: RefCell<VecDeque<FlowChange<K, V>>>,
    stamp: Cell<u64>,
    subscriptions: RefCell<Vec<Subscription>>,
}

impl<K: Clone + Hash + Eq + 'static, V: Clone + 'static> GroupedMultiMap<K, V> {
    /// Groups `values` under `keys`, correlating them through `root`.
    ///
    /// Key elements holding equal keys share one entry, which groups the
    /// values of all of them. Fails if `root` is not upstream of both flows.
    pub fn new(
        root: CollectionId,
        keys: CollectionRef<K>,
        values: CollectionRef<V>,
        options: GroupingOptions,
    ) -> Result<Rc<Self>> {
        let keys: CollectionRef<K> =
            DistinctCollection::new(keys, DistinctOptions { prefer_first: true });
        let cause = Cause::new();
        let mut initial = VecDeque::new();
        for (index, id) in keys.elements().into_iter().enumerate() {
            let roots: Roots = keys.sources_of(id, root)?.into_iter().collect();
            if let Some(key) = keys.element(id) {
                initial.push_back(FlowChange::Key(CollectionEvent::added(id, index, key, cause), roots));
            }
        }
        for (index, id) in values.elements().into_iter().enumerate() {
            let roots: Roots = values.sources_of(id, root)?.into_iter().collect();
            if let Some(value) = values.element(id) {
                initial.push_back(FlowChange::Value(CollectionEvent::added(id, index, value, cause), roots));
            }
        }

        let map = Rc::new(Self {
            root,
            keys,
            values,
            options,
            state: RefCell::new(GroupState::new()),
            listeners: Rc::new(Listeners::new()),
            deferred: RefCell::new(initial),
            stamp: Cell::new(0),
            subscriptions: RefCell::new(Vec::new()),
        });
        map.catch_up()?;

        let weak = Rc::downgrade(&map);
        let on_keys = map.keys.subscribe(Rc::new(move |event: &CollectionEvent<K>| {
            if let Some(map) = weak.upgrade() {
                map.on_key_event(event);
            }
        }));
        let weak = Rc::downgrade(&map);
        let on_values = map.values.subscribe(Rc::new(move |event: &CollectionEvent<V>| {
            if let Some(map) = weak.upgrade() {
                map.on_value_event(event);
            }
        }));
        map.subscriptions.borrow_mut().extend([on_keys, on_values]);
        debug!(
            root = root.get(),
            keys = map.key_count(),
            values = map.value_count(),
            "grouped multimap created"
        );
        Ok(map)
    }

    /// Groups the elements of `source` by `key_of`.
    ///
    /// Keys are kept in order of their first occurrence in `source`.
    pub fn group_by<F>(source: CollectionRef<V>, key_of: F, options: GroupingOptions) -> Result<Rc<Self>>
    where
        F: Fn(&V) -> K + 'static,
    {
        let keys: CollectionRef<K> = MapBuilder::new(key_of).build(source.clone());
        Self::new(source.id(), keys, source, options)
    }

    /// Returns the root collection the flows are correlated through.
    pub fn root(&self) -> CollectionId {
        self.root
    }

    /// Returns the grouping options.
    pub fn options(&self) -> GroupingOptions {
        self.options
    }

    /// Returns the values grouped under `key`.
    pub fn get(&self, key: &K) -> Vec<V> {
        let state = self.state.borrow();
        state
            .entry_for(key)
            .and_then(|id| state.entries.value(id))
            .map(|entry| entry.values.values())
            .unwrap_or_default()
    }

    /// Returns the keys that have an entry, in key flow order.
    pub fn keys(&self) -> Vec<K> {
        self.state
            .borrow()
            .entries
            .iter()
            .map(|(_, entry)| entry.key.clone())
            .collect()
    }

    /// Returns the number of key entries.
    pub fn key_count(&self) -> usize {
        self.state.borrow().entries.len()
    }

    /// Returns the number of grouped values, counted once per key.
    pub fn value_count(&self) -> usize {
        self.state
            .borrow()
            .entries
            .iter()
            .map(|(_, entry)| entry.values.len())
            .sum()
    }

    /// Returns true if `key` has an entry.
    pub fn contains_key(&self, key: &K) -> bool {
        self.entry(key).is_some()
    }

    /// Returns the entry handle of `key`.
    pub fn entry(&self, key: &K) -> Option<KeyEntryId> {
        self.state.borrow().entry_for(key).map(KeyEntryId)
    }

    /// Returns the key of an entry.
    pub fn entry_key(&self, entry: KeyEntryId) -> Option<K> {
        self.state.borrow().entries.value(entry.0).map(|e| e.key.clone())
    }

    /// Returns the position of an entry in the key set.
    pub fn entry_index(&self, entry: KeyEntryId) -> Option<usize> {
        self.state.borrow().entries.index_of(entry.0)
    }

    /// Returns the values of an entry, or `None` if the handle is stale.
    pub fn values_by_entry(&self, entry: KeyEntryId) -> Option<Vec<V>> {
        self.state
            .borrow()
            .entries
            .value(entry.0)
            .map(|e| e.values.values())
    }

    /// Returns what one root element contributed to the grouping.
    pub fn root_info(&self, root: ElementId) -> Option<GroupedElementInfo> {
        self.state.borrow().table.info(root).cloned()
    }

    /// Registers a listener for key set and per-key value changes.
    pub fn subscribe(&self, listener: MultiMapListener<K, V>) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Returns the modification stamp.
    ///
    /// The stamp moves on whenever either flow reports a change, so a reader
    /// can detect a concurrent update by comparing stamps.
    pub fn stamp(&self) -> u64 {
        self.stamp.get()
    }

    /// Checks the grouping against the provenance table.
    pub fn validate(&self) -> core::result::Result<(), GroupingError> {
        let state = self.state.borrow();
        let prune = self.options.prune_empty_keys;

        let mut previous: Option<ElementId> = None;
        for (id, entry) in state.entries.iter() {
            let key = entry.key_element;
            if state.entry_of.get(&key) != Some(&id) || state.by_key.get(&entry.key) != Some(&key) {
                return Err(GroupingError::Index { key });
            }
            if let Some(previous) = previous {
                if self.keys.compare_position(previous, key) != Some(Ordering::Less) {
                    return Err(GroupingError::OutOfOrder { key });
                }
            }
            previous = Some(key);

            if prune && entry.values.is_empty() {
                return Err(GroupingError::EmptyEntry { key });
            }
            let mut previous_value: Option<ElementId> = None;
            for value_ref in entry.values.refs() {
                let value = value_ref.element;
                let shared = state.table.shared_roots(key, value);
                if shared.is_empty() {
                    return Err(GroupingError::UnjustifiedValue { key, value });
                }
                if shared != value_ref.roots {
                    return Err(GroupingError::StaleRoots { key, value });
                }
                if let Some(previous_value) = previous_value {
                    if self.values.compare_position(previous_value, value) != Some(Ordering::Less) {
                        return Err(GroupingError::OutOfOrder { key });
                    }
                }
                previous_value = Some(value);
            }
        }
        if state.entry_of.len() != state.entries.len() {
            let key = state.entry_of.keys().next().copied().unwrap_or(ElementId::new(0, 0));
            return Err(GroupingError::Index { key });
        }

        for key in state.key_values.keys().copied() {
            let entry = state
                .entry_of
                .get(&key)
                .and_then(|id| state.entries.value(*id));
            for value in state.table.partners(Side::Key, key) {
                if state.table.shared_roots(key, value).is_empty() {
                    continue;
                }
                if !entry.is_some_and(|e| e.values.contains(value)) {
                    return Err(GroupingError::MissingValue { key, value });
                }
            }
            if entry.is_none() && !prune {
                return Err(GroupingError::MissingEntry { key });
            }
        }
        for (key, _) in state.table.elements(Side::Key) {
            if !state.key_values.contains_key(key) {
                return Err(GroupingError::Index { key: *key });
            }
        }
        Ok(())
    }

    fn roots_of<T>(&self, collection: &dyn ObservableCollection<T>, id: ElementId) -> Roots {
        match collection.sources_of(id, self.root) {
            Ok(roots) => roots.into_iter().collect(),
            Err(err) => {
                warn!(%err, ?id, "could not resolve roots");
                Roots::new()
            }
        }
    }

    /// Queues a flow change and applies every queued change the lock allows.
    fn receive(&self, change: FlowChange<K, V>) {
        self.stamp.set(self.stamp.get() + 1);
        self.deferred.borrow_mut().push_back(change);
        if let Err(err) = self.catch_up() {
            debug!(%err, pending = self.pending(), "grouping update deferred");
        }
    }

    /// Applies flow changes that arrived while the map's lock was held
    /// elsewhere.
    ///
    /// Changes are applied in arrival order. Fails, leaving the grouping as
    /// it was, if the lock still cannot be taken.
    pub fn catch_up(&self) -> Result<()> {
        if self.deferred.borrow().is_empty() {
            return Ok(());
        }
        let _txn = self.lock(LockType::Exclusive)?;
        loop {
            let next = self.deferred.borrow_mut().pop_front();
            let Some(change) = next else {
                break;
            };
            let mut pass = Pass {
                keys: &*self.keys,
                values: &*self.values,
                options: self.options,
                cause: change.cause(),
                events: Vec::new(),
            };
            change.apply(&mut self.state.borrow_mut(), &mut pass);
            self.listeners.deliver(pass.events);
        }
        Ok(())
    }

    /// Returns the number of flow changes not yet applied.
    pub fn pending(&self) -> usize {
        self.deferred.borrow().len()
    }

    fn on_key_event(&self, event: &CollectionEvent<K>) {
        let roots = match event.kind {
            ChangeKind::Removed => Roots::new(),
            _ => self.roots_of(&*self.keys, event.id),
        };
        self.receive(FlowChange::Key(event.clone(), roots));
    }

    fn on_value_event(&self, event: &CollectionEvent<V>) {
        let roots = match event.kind {
            ChangeKind::Removed => Roots::new(),
            _ => self.roots_of(&*self.values, event.id),
        };
        self.receive(FlowChange::Value(event.clone(), roots));
    }
}

impl<K, V> Lockable for GroupedMultiMap<K, V> {
    fn physical_locks(&self) -> Vec<CollectionLock> {
        let mut locks = self.keys.physical_locks();
        locks.extend(self.values.physical_locks());
        locks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::RootPhase;
    use strata_collect::{CollectionFlow, FlattenedCollection, ObservableTreeList};

    type Row = (char, Option<i32>);

    fn rows() -> Rc<ObservableTreeList<Row>> {
        ObservableTreeList::from_values([
            ('A', Some(1)),
            ('A', Some(2)),
            ('B', Some(3)),
            ('B', Some(4)),
            ('C', None),
        ])
    }

    fn keys_of(root: &Rc<ObservableTreeList<Row>>) -> CollectionRef<char> {
        root.map(|r: &Row| r.0).distinct(DistinctOptions { prefer_first: true })
    }

    fn values_of(root: &Rc<ObservableTreeList<Row>>) -> CollectionRef<i32> {
        root.filter(|r: &Row| r.1.is_some())
            .map(|r: &Row| r.1.unwrap_or_default())
    }

    fn grouping(root: &Rc<ObservableTreeList<Row>>, options: GroupingOptions) -> Rc<GroupedMultiMap<char, i32>> {
        GroupedMultiMap::new(root.id(), keys_of(root), values_of(root), options).unwrap()
    }

    fn record(map: &GroupedMultiMap<char, i32>) -> (Rc<RefCell<Vec<MultiMapEvent<char, i32>>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let sub = map.subscribe(Rc::new(move |e: &MultiMapEvent<char, i32>| sink.borrow_mut().push(e.clone())));
        (seen, sub)
    }

    fn find(root: &ObservableTreeList<Row>, row: Row) -> ElementId {
        root.find(&row).unwrap()
    }

    #[test]
    fn test_groups_by_shared_root() {
        for options in [GroupingOptions::default(), GroupingOptions::pruned()] {
            let root = rows();
            let map = grouping(&root, options);
            assert_eq!(map.get(&'A'), vec![1, 2]);
            assert_eq!(map.get(&'B'), vec![3, 4]);
            assert!(map.get(&'C').is_empty());
            assert_eq!(map.value_count(), 4);
            map.validate().unwrap();

            root.remove(find(&root, ('A', Some(2)))).unwrap();
            assert_eq!(map.get(&'A'), vec![1]);
            map.validate().unwrap();
        }
    }

    #[test]
    fn test_empty_keys_kept() {
        let root = rows();
        let map = grouping(&root, GroupingOptions::default());
        assert_eq!(map.keys(), vec!['A', 'B', 'C']);
        assert!(map.contains_key(&'C'));

        let entry = map.entry(&'B').unwrap();
        root.set(find(&root, ('B', Some(3))), ('B', None)).unwrap();
        root.set(find(&root, ('B', Some(4))), ('B', None)).unwrap();
        assert!(map.contains_key(&'B'));
        assert_eq!(map.values_by_entry(entry), Some(Vec::new()));
        assert_eq!(map.key_count(), 3);
        map.validate().unwrap();
    }

    #[test]
    fn test_empty_keys_pruned() {
        let root = rows();
        let map = grouping(&root, GroupingOptions::pruned());
        assert_eq!(map.keys(), vec!['A', 'B']);
        assert!(!map.contains_key(&'C'));

        let entry = map.entry(&'B').unwrap();
        root.set(find(&root, ('B', Some(3))), ('B', None)).unwrap();
        assert_eq!(map.get(&'B'), vec![4]);
        root.set(find(&root, ('B', Some(4))), ('B', None)).unwrap();
        assert!(!map.contains_key(&'B'));
        assert_eq!(map.values_by_entry(entry), None);
        assert_eq!(map.keys(), vec!['A']);
        map.validate().unwrap();

        root.set(find(&root, ('C', None)), ('C', Some(9))).unwrap();
        assert_eq!(map.keys(), vec!['A', 'C']);
        assert_eq!(map.get(&'C'), vec![9]);
    }

    #[test]
    fn test_values_before_keys() {
        let root = rows();
        // The value flow subscribes to the root first and so hears of new
        // root elements before the key flow does.
        let values = values_of(&root);
        let keys = keys_of(&root);
        let map = GroupedMultiMap::new(root.id(), keys, values, GroupingOptions::pruned()).unwrap();

        root.push(('D', Some(5))).unwrap();
        root.insert_at(0, ('B', Some(0))).unwrap();
        assert_eq!(map.get(&'D'), vec![5]);
        assert_eq!(map.get(&'B'), vec![0, 3, 4]);
        map.validate().unwrap();
    }

    #[test]
    fn test_new_key_events() {
        let root = rows();
        let map = grouping(&root, GroupingOptions::default());
        let (seen, _sub) = record(&map);

        root.push(('D', Some(5))).unwrap();
        let changes: Vec<_> = seen.borrow().iter().map(|e| (e.key, e.change.clone())).collect();
        assert_eq!(
            changes,
            vec![
                ('D', EntryChange::KeyAdded { index: 3 }),
                ('D', EntryChange::ValueAdded { index: 0, value: 5 }),
            ]
        );
        let events = seen.borrow();
        assert!(events[0].is_key_event() && !events[1].is_key_event());
        assert_eq!(events[0].entry, events[1].entry);
        assert_eq!(events[0].cause, events[1].cause);
        assert_eq!(map.entry(&'D'), Some(events[0].entry));
    }

    #[test]
    fn test_key_change_regroups() {
        let root = rows();
        let map = grouping(&root, GroupingOptions::default());
        let before = map.entry(&'B').unwrap();
        let (seen, _sub) = record(&map);

        let b3 = find(&root, ('B', Some(3)));
        root.remove(find(&root, ('B', Some(4)))).unwrap();
        seen.borrow_mut().clear();
        root.set(b3, ('E', Some(3))).unwrap();

        assert_eq!(map.get(&'E'), vec![3]);
        assert!(map.get(&'B').is_empty());
        assert!(!map.contains_key(&'B'));
        let after = map.entry(&'E').unwrap();
        assert_ne!(before, after);
        assert_eq!(map.entry_index(after), Some(1));

        let changes: Vec<_> = seen.borrow().iter().map(|e| (e.key, e.change.clone())).collect();
        assert_eq!(
            changes[..4],
            [
                ('B', EntryChange::ValueRemoved { index: 0, value: 3 }),
                ('B', EntryChange::KeyRemoved { index: 1 }),
                ('E', EntryChange::KeyAdded { index: 1 }),
                ('E', EntryChange::ValueAdded { index: 0, value: 3 }),
            ]
        );
        map.validate().unwrap();
    }

    #[test]
    fn test_key_change_in_place() {
        let root = rows();
        let options = GroupingOptions::default().with_key_changes(KeyChangePolicy::InPlace);
        let map = grouping(&root, options);
        let before = map.entry(&'B').unwrap();
        let (seen, _sub) = record(&map);

        let b3 = find(&root, ('B', Some(3)));
        root.remove(find(&root, ('B', Some(4)))).unwrap();
        seen.borrow_mut().clear();
        root.set(b3, ('E', Some(3))).unwrap();

        assert_eq!(map.entry(&'E'), Some(before));
        assert_eq!(map.entry_key(before), Some('E'));
        assert_eq!(map.get(&'E'), vec![3]);
        assert_eq!(
            seen.borrow()[0].change,
            EntryChange::KeyChanged { index: 1, old: 'B' }
        );
        assert!(seen
            .borrow()
            .iter()
            .all(|e| !matches!(e.change, EntryChange::ValueRemoved { .. })));
        map.validate().unwrap();
    }

    #[test]
    fn test_key_moving_to_existing_bucket() {
        let root = rows();
        let map = grouping(&root, GroupingOptions::default());
        root.set(find(&root, ('B', Some(3))), ('A', Some(3))).unwrap();
        assert_eq!(map.get(&'A'), vec![1, 2, 3]);
        assert_eq!(map.get(&'B'), vec![4]);

        let info = map.root_info(find(&root, ('A', Some(3)))).unwrap();
        assert_eq!(info.phase(), RootPhase::Grouped);
        map.validate().unwrap();
    }

    #[test]
    fn test_group_by_source() {
        let words = ObservableTreeList::from_values(["apple", "bean", "avocado", "beet", "cherry"]);
        let source: CollectionRef<&str> = words.clone();
        let map = GroupedMultiMap::group_by(source, |w: &&str| w.as_bytes()[0], GroupingOptions::default()).unwrap();
        assert_eq!(map.keys(), vec![b'a', b'b', b'c']);
        assert_eq!(map.get(&b'a'), vec!["apple", "avocado"]);

        words.insert_at(0, "blueberry").unwrap();
        assert_eq!(map.keys(), vec![b'b', b'a', b'c']);
        assert_eq!(map.get(&b'b'), vec!["blueberry", "bean", "beet"]);
        map.validate().unwrap();
        map.validate().unwrap();
    }

    #[test]
    fn test_root_must_be_upstream() {
        let root = rows();
        let other = ObservableTreeList::<Row>::new();
        let result = GroupedMultiMap::new(other.id(), keys_of(&root), values_of(&root), GroupingOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_lock_covers_both_flows() {
        let root = rows();
        let map = grouping(&root, GroupingOptions::default());
        assert_eq!(map.core_id(), root.core_id());

        let txn = map.lock(LockType::Exclusive).unwrap();
        assert_eq!(txn.len(), 1);
        drop(txn);
        assert!(root.collection_lock().is_free());
    }

    #[test]
    fn test_equal_keys_share_an_entry() {
        let root = rows();
        let keys: CollectionRef<char> = root.map(|r: &Row| r.0);
        let map = GroupedMultiMap::new(root.id(), keys, values_of(&root), GroupingOptions::default()).unwrap();
        assert_eq!(map.keys(), vec!['A', 'B', 'C']);
        assert_eq!(map.get(&'A'), vec![1, 2]);

        root.push(('A', Some(5))).unwrap();
        assert_eq!(map.get(&'A'), vec![1, 2, 5]);
        root.remove(find(&root, ('A', Some(1)))).unwrap();
        assert_eq!(map.get(&'A'), vec![2, 5]);
        root.set(find(&root, ('B', Some(3))), ('A', Some(3))).unwrap();
        assert_eq!(map.get(&'A'), vec![2, 3, 5]);
        assert_eq!(map.get(&'B'), vec![4]);
        assert_eq!(map.key_count(), 3);
        map.validate().unwrap();
    }

    type Shelf = (char, Rc<ObservableTreeList<i32>>);

    #[test]
    fn test_changes_wait_for_the_lock() {
        let first = ObservableTreeList::from_values([1, 2]);
        let second = ObservableTreeList::from_values([3]);
        let shelves = ObservableTreeList::from_values([('a', first.clone())]);
        let keys: CollectionRef<char> = shelves.map(|s: &Shelf| s.0);
        let source: CollectionRef<Shelf> = shelves.clone();
        let values: CollectionRef<i32> =
            FlattenedCollection::new(source, |s: &Shelf| -> CollectionRef<i32> { s.1.clone() });
        let map = GroupedMultiMap::new(shelves.id(), keys, values, GroupingOptions::default()).unwrap();
        let (seen, _sub) = record(&map);
        assert_eq!(map.get(&'a'), vec![1, 2]);

        // A shared hold on an inner list keeps the map from locking.
        let reading = first.lock(LockType::Shared).unwrap();
        let stamp = map.stamp();
        shelves.push(('b', second.clone())).unwrap();
        assert_eq!(map.pending(), 2);
        assert!(map.stamp() > stamp);
        assert_eq!(map.keys(), vec!['a']);
        assert!(seen.borrow().is_empty());
        assert!(map.catch_up().is_err());
        map.validate().unwrap();

        drop(reading);
        map.catch_up().unwrap();
        assert_eq!(map.pending(), 0);
        assert_eq!(map.keys(), vec!['a', 'b']);
        assert_eq!(map.get(&'b'), vec![3]);
        assert_eq!(seen.borrow().len(), 2);
        map.validate().unwrap();

        second.push(4).unwrap();
        assert_eq!(map.get(&'b'), vec![3, 4]);
        assert!(first.collection_lock().is_free());
    }

    #[test]
    fn test_dropping_map_stops_listening() {
        let root = rows();
        let map = grouping(&root, GroupingOptions::default());
        let stamp = map.stamp();
        root.push(('A', Some(7))).unwrap();
        assert!(map.stamp() > stamp);

        let weak = Rc::downgrade(&map);
        drop(map);
        assert!(weak.upgrade().is_none());
        root.push(('F', Some(8))).unwrap();
    }
}
