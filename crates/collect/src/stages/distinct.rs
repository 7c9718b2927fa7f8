//! Deduplicating stages.
//!
//! Every distinct value is represented by one derived element backed by all
//! source elements holding that value. The first entry of the element's
//! source list is its active member. The other members are kept in source
//! order, so when the active member goes away the earliest remaining one is
//! promoted.

use crate::collection::{CollectionRef, ObservableCollection, ValueComparator};
use crate::derived::{
    connect, delegate_positions, delegate_values, source_order, DerivedCore, Entry, SourceListener,
    Sources,
};
use crate::event::{ChangeKind, CollectionEvent};
use crate::scope::WriteScope;
use hashbrown::HashMap;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::hash::Hash;
use std::rc::Rc;
use strata_core::{msg, Cause, CollectionId, ElementId, Error, Rejection, Result};
use strata_lock::{CollectionLock, Lockable};
use strata_tree::Comparator;
use tracing::{debug, warn};

/// Options of the distinct stages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DistinctOptions {
    /// Keep the earliest source element of each value active instead of the
    /// first one encountered.
    pub prefer_first: bool,
}

/// Adds `member` to a source list. Returns true if it became active.
fn join<S>(source: &dyn ObservableCollection<S>, sources: &mut Sources, member: ElementId, prefer_first: bool) -> bool {
    let earlier = |a: ElementId, b: ElementId| source.compare_position(a, b) == Some(Ordering::Less);
    if prefer_first && sources.first().map_or(true, |active| earlier(member, *active)) {
        sources.insert(0, member);
        return true;
    }
    let at = sources
        .iter()
        .skip(1)
        .position(|other| earlier(member, *other))
        .map_or(sources.len(), |offset| offset + 1);
    sources.insert(at, member);
    false
}

/// Removes `member` from a source list. Returns true if it was active.
fn leave(sources: &mut Sources, member: ElementId) -> bool {
    let was_active = sources.first() == Some(&member);
    sources.retain(|other| *other != member);
    was_active
}

/// Sets every member of the derived element `id` to `value`.
///
/// While the members are written `rewriting` names `id`, so the stage keeps
/// the element and its handle instead of re-grouping member by member.
/// If a member refuses, the members already written get their old values
/// back before the error is returned.
fn set_members<S: Clone>(
    source: &dyn ObservableCollection<S>,
    rewriting: &Cell<Option<ElementId>>,
    id: ElementId,
    members: &Sources,
    value: &S,
) -> Result<()> {
    let outer = rewriting.replace(Some(id));
    let written = write_members(source, members, value);
    rewriting.set(outer);
    written
}

fn write_members<S: Clone>(source: &dyn ObservableCollection<S>, members: &Sources, value: &S) -> Result<()> {
    let mut written: Vec<(ElementId, S)> = Vec::with_capacity(members.len());
    for member in members {
        match source.set(*member, value.clone()) {
            Ok(old) => written.push((*member, old)),
            Err(err) => {
                for (member, old) in written.into_iter().rev() {
                    if let Err(undo) = source.set(member, old) {
                        warn!(error = %undo, "could not restore member after refused write");
                    }
                }
                return Err(err);
            }
        }
    }
    Ok(())
}

/// Removes every member of a derived element from the source, last first.
///
/// If a removal fails, the members already removed are added back next to
/// the neighbors they had.
fn remove_members<S: Clone>(source: &dyn ObservableCollection<S>, members: &Sources) -> Result<()> {
    if let Some(rejection) = members.iter().find_map(|member| source.can_remove(*member)) {
        return Err(rejection.into());
    }
    let mut removed: Vec<(S, Option<ElementId>, Option<ElementId>)> = Vec::with_capacity(members.len());
    for member in members.iter().rev() {
        let (prev, next) = (source.prev(*member), source.next(*member));
        match source.remove(*member) {
            Ok(value) => removed.push((value, prev, next)),
            Err(err) => {
                for (value, prev, next) in removed.into_iter().rev() {
                    let present = |hint: Option<ElementId>| hint.filter(|id| source.element(*id).is_some());
                    let restored = match present(next) {
                        Some(next) => source.add(value, None, Some(next), false),
                        None => source.add(value, present(prev), None, true),
                    };
                    if let Err(undo) = restored {
                        warn!(error = %undo, "could not restore member after failed removal");
                    }
                }
                return Err(err);
            }
        }
    }
    Ok(())
}

/// Returns the first rejection `check` reports for any member.
fn check_members(members: Option<Sources>, check: impl Fn(ElementId) -> Option<Rejection>) -> Option<Rejection> {
    match members {
        Some(members) => members.iter().find_map(|member| check(*member)),
        None => Some(Rejection::illegal_element(msg::NOT_PRESENT)),
    }
}

/// A view holding each distinct source value once, in the source order of
/// its active member.
pub struct DistinctCollection<T> {
    source: CollectionRef<T>,
    core: DerivedCore<T>,
    buckets: RefCell<HashMap<T, ElementId>>,
    options: DistinctOptions,
    rewriting: Cell<Option<ElementId>>,
}

impl<T: Clone + Hash + Eq + 'static> DistinctCollection<T> {
    /// Deduplicates `source` by value equality.
    pub fn new(source: CollectionRef<T>, options: DistinctOptions) -> Rc<Self> {
        let stage = Rc::new(Self {
            source,
            core: DerivedCore::new(),
            buckets: RefCell::new(HashMap::new()),
            options,
            rewriting: Cell::new(None),
        });
        let cause = Cause::new();
        for id in stage.source.elements() {
            if let Some(value) = stage.source.element(id) {
                stage.enter(id, value, cause, false);
            }
        }
        stage.core.attach(connect(&*stage.source, &stage));
        stage
    }

    /// Returns the stage options.
    pub fn options(&self) -> DistinctOptions {
        self.options
    }

    /// Returns the source elements holding the value of `id`, active first.
    pub fn members(&self, id: ElementId) -> Option<Vec<ElementId>> {
        self.core.sources(id).map(|sources| sources.to_vec())
    }

    fn bucket(&self, value: &T) -> Option<ElementId> {
        self.buckets.borrow().get(value).copied()
    }

    fn enter(&self, member: ElementId, value: T, cause: Cause, moved: bool) {
        let Some(id) = self.bucket(&value) else {
            let id = self.core.insert_with(
                Entry::new(value.clone(), member),
                source_order(&*self.source),
                false,
                cause,
                moved,
            );
            self.buckets.borrow_mut().insert(value, id);
            return;
        };
        let Some(mut sources) = self.core.sources(id) else {
            return;
        };
        let promoted = join(&*self.source, &mut sources, member, self.options.prefer_first);
        self.core.set_sources(id, sources);
        if promoted {
            debug!(collection = self.core.id.get(), "earlier member became active");
            self.activate(id, value, cause);
        } else {
            self.core.touch(id, cause);
        }
    }

    fn exit(&self, member: ElementId, value: &T, cause: Cause, moved: bool) {
        let Some(id) = self.core.derived_of(member) else {
            return;
        };
        let Some(mut sources) = self.core.sources(id) else {
            return;
        };
        let was_active = leave(&mut sources, member);
        self.core.unmap_source(member);
        if sources.is_empty() {
            if let Some(entry) = self.core.remove(id, cause, moved) {
                self.buckets.borrow_mut().remove(&entry.value);
            }
            return;
        }
        let active = sources[0];
        self.core.set_sources(id, sources);
        if was_active {
            debug!(collection = self.core.id.get(), "promoted remaining member");
            let value = self.source.element(active).unwrap_or_else(|| value.clone());
            self.activate(id, value, cause);
        } else {
            self.core.touch(id, cause);
        }
    }

    /// Re-reads the active member's value and position.
    fn activate(&self, id: ElementId, value: T, cause: Cause) {
        self.core.update(id, value.clone(), cause);
        let placed = self
            .core
            .reposition(id, &mut source_order(&*self.source), cause);
        if placed != id {
            self.buckets.borrow_mut().insert(value, placed);
        }
    }
}

impl<T: Clone + Hash + Eq + 'static> SourceListener<T> for DistinctCollection<T> {
    fn on_source_event(&self, event: &CollectionEvent<T>) {
        match &event.kind {
            ChangeKind::Added => self.enter(event.id, event.value.clone(), event.cause, event.moved),
            ChangeKind::Removed => self.exit(event.id, &event.value, event.cause, event.moved),
            ChangeKind::Updated { old } => {
                let Some(id) = self.core.derived_of(event.id) else {
                    return;
                };
                let sole = self.core.sources(id).is_some_and(|s| s.len() == 1);
                if *old == event.value {
                    if self.core.primary(id) == Some(event.id) {
                        self.core.update(id, event.value.clone(), event.cause);
                    } else {
                        self.core.touch(id, event.cause);
                    }
                } else if self.bucket(&event.value).is_none() && (sole || self.rewriting.get() == Some(id)) {
                    if self.core.primary(id) == Some(event.id) {
                        let mut buckets = self.buckets.borrow_mut();
                        if buckets.get(old) == Some(&id) {
                            buckets.remove(old);
                        }
                        buckets.insert(event.value.clone(), id);
                        drop(buckets);
                        self.core.update(id, event.value.clone(), event.cause);
                    } else {
                        self.core.touch(id, event.cause);
                    }
                } else if self.bucket(&event.value) == Some(id) && self.rewriting.get() == Some(id) {
                    self.core.touch(id, event.cause);
                } else {
                    self.exit(event.id, old, event.cause, false);
                    self.enter(event.id, event.value.clone(), event.cause, false);
                }
            }
        }
    }

    fn on_source_flush(&self) {
        self.core.flush();
    }
}

impl<T> Lockable for DistinctCollection<T> {
    fn physical_locks(&self) -> Vec<CollectionLock> {
        self.source.physical_locks()
    }
}

impl<T: Clone + Hash + Eq + 'static> ObservableCollection<T> for DistinctCollection<T> {
    delegate_positions!(T);
    delegate_values!(T);

    fn sources_of(&self, id: ElementId, root: CollectionId) -> Result<Vec<ElementId>> {
        self.core.sources_of(id, root, &*self.source)
    }

    fn can_add(&self, value: &T, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        if self.bucket(value).is_some() {
            return Some(Rejection::illegal_element(msg::ELEMENT_EXISTS));
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
        if self.bucket(&value).is_some() {
            return Err(Error::illegal_element(msg::ELEMENT_EXISTS));
        }
        let _tx = WriteScope::enter(self)?;
        let (after, before) = self.core.source_hints(&*self.source, after, before)?;
        let source_id = self.source.add(value, after, before, prefer_first)?;
        self.core.derived_of(source_id).ok_or(Error::NotPresent)
    }

    fn can_move(&self, id: ElementId, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        let Some(active) = self.core.primary(id) else {
            return Some(Rejection::illegal_element(msg::NOT_PRESENT));
        };
        match self.core.source_hints(&*self.source, after, before) {
            Ok((after, before)) => self.source.can_move(active, after, before),
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
        let active = self.core.primary(id).ok_or(Error::NotPresent)?;
        let (after, before) = self.core.source_hints(&*self.source, after, before)?;
        let moved = self.source.move_element(active, after, before, prefer_first)?;
        self.core.derived_of(moved).ok_or(Error::NotPresent)
    }

    fn can_set(&self, id: ElementId, value: &T) -> Option<Rejection> {
        match self.bucket(value) {
            Some(existing) if existing != id => Some(Rejection::illegal_element(msg::ELEMENT_EXISTS)),
            _ => check_members(self.core.sources(id), |member| {
                self.source.can_set(member, value)
            }),
        }
    }

    fn set(&self, id: ElementId, value: T) -> Result<T> {
        if let Some(rejection) = self.can_set(id, &value) {
            return Err(rejection.into());
        }
        let _tx = WriteScope::enter(self)?;
        let old = self.core.element(id).ok_or(Error::NotPresent)?;
        let members = self.core.sources(id).ok_or(Error::NotPresent)?;
        set_members(&*self.source, &self.rewriting, id, &members, &value)?;
        Ok(old)
    }

    fn can_remove(&self, id: ElementId) -> Option<Rejection> {
        check_members(self.core.sources(id), |member| {
            self.source.can_remove(member)
        })
    }

    fn remove(&self, id: ElementId) -> Result<T> {
        let _tx = WriteScope::enter(self)?;
        let old = self.core.element(id).ok_or(Error::NotPresent)?;
        let members = self.core.sources(id).ok_or(Error::NotPresent)?;
        remove_members(&*self.source, &members)?;
        Ok(old)
    }
}

/// A view holding each distinct source value once, in comparator order.
///
/// Values comparing equal form one element. An update whose new value still
/// fits between its neighbors keeps its position.
pub struct DistinctSortedCollection<T> {
    source: CollectionRef<T>,
    core: DerivedCore<T>,
    cmp: ValueComparator<T>,
    options: DistinctOptions,
    rewriting: Cell<Option<ElementId>>,
}

impl<T: Clone + 'static> DistinctSortedCollection<T> {
    /// Deduplicates and sorts `source` by `cmp`.
    pub fn new(source: CollectionRef<T>, cmp: ValueComparator<T>, options: DistinctOptions) -> Rc<Self> {
        let stage = Rc::new(Self {
            source,
            core: DerivedCore::new(),
            cmp,
            options,
            rewriting: Cell::new(None),
        });
        let cause = Cause::new();
        for id in stage.source.elements() {
            if let Some(value) = stage.source.element(id) {
                stage.enter(id, value, cause, false);
            }
        }
        stage.core.attach(connect(&*stage.source, &stage));
        stage
    }

    /// Returns the comparator.
    pub fn comparator(&self) -> &ValueComparator<T> {
        &self.cmp
    }

    /// Returns the source elements holding the value of `id`, active first.
    pub fn members(&self, id: ElementId) -> Option<Vec<ElementId>> {
        self.core.sources(id).map(|sources| sources.to_vec())
    }

    fn bucket(&self, value: &T) -> Option<ElementId> {
        self.core
            .state
            .borrow()
            .tree
            .find(|entry| self.cmp.compare(value, &entry.value))
    }

    fn by_value(&self) -> impl FnMut(&Entry<T>, &Entry<T>) -> Ordering + '_ {
        move |a, b| self.cmp.compare(&a.value, &b.value)
    }

    fn enter(&self, member: ElementId, value: T, cause: Cause, moved: bool) {
        let Some(id) = self.bucket(&value) else {
            self.core
                .insert_with(Entry::new(value, member), self.by_value(), false, cause, moved);
            return;
        };
        let Some(mut sources) = self.core.sources(id) else {
            return;
        };
        let promoted = join(&*self.source, &mut sources, member, self.options.prefer_first);
        self.core.set_sources(id, sources);
        if promoted {
            self.core.update(id, value, cause);
        } else {
            self.core.touch(id, cause);
        }
    }

    fn exit(&self, member: ElementId, cause: Cause, moved: bool) {
        let Some(id) = self.core.derived_of(member) else {
            return;
        };
        let Some(mut sources) = self.core.sources(id) else {
            return;
        };
        let was_active = leave(&mut sources, member);
        self.core.unmap_source(member);
        if sources.is_empty() {
            self.core.remove(id, cause, moved);
            return;
        }
        let active = sources[0];
        self.core.set_sources(id, sources);
        match self.source.element(active) {
            Some(value) if was_active => {
                debug!(collection = self.core.id.get(), "promoted remaining member");
                self.core.update(id, value, cause);
            }
            _ => self.core.touch(id, cause),
        }
    }

    fn is_between(&self, id: ElementId, after: Option<ElementId>, before: Option<ElementId>) -> bool {
        after.map_or(true, |a| self.core.compare_position(a, id) == Some(Ordering::Less))
            && before.map_or(true, |b| self.core.compare_position(id, b) == Some(Ordering::Less))
    }

    fn check_position(&self, value: &T, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        for (hint, is_after) in [(after, true), (before, false)] {
            let Some(hint) = hint else {
                continue;
            };
            let Some(bound) = self.core.element(hint) else {
                return Some(Rejection::illegal_position(msg::NOT_PRESENT));
            };
            let order = self.cmp.compare(&bound, value);
            let consistent = if is_after {
                order == Ordering::Less
            } else {
                order == Ordering::Greater
            };
            if !consistent {
                return Some(Rejection::illegal_position(msg::ILLEGAL_ELEMENT_POSITION));
            }
        }
        None
    }
}

impl<T: Clone + 'static> SourceListener<T> for DistinctSortedCollection<T> {
    fn on_source_event(&self, event: &CollectionEvent<T>) {
        match &event.kind {
            ChangeKind::Added => self.enter(event.id, event.value.clone(), event.cause, event.moved),
            ChangeKind::Removed => self.exit(event.id, event.cause, event.moved),
            ChangeKind::Updated { .. } => {
                let Some(id) = self.core.derived_of(event.id) else {
                    return;
                };
                let sole = self.core.sources(id).is_some_and(|s| s.len() == 1);
                let target = self.bucket(&event.value);
                let rewrite = self.rewriting.get() == Some(id) && target.map_or(true, |t| t == id);
                if target == Some(id) || (sole && target.is_none()) || rewrite {
                    if self.core.primary(id) == Some(event.id) {
                        self.core.update(id, event.value.clone(), event.cause);
                        self.core.reposition(id, &mut self.by_value(), event.cause);
                    } else {
                        self.core.touch(id, event.cause);
                    }
                } else {
                    self.exit(event.id, event.cause, false);
                    self.enter(event.id, event.value.clone(), event.cause, false);
                }
            }
        }
    }

    fn on_source_flush(&self) {
        self.core.flush();
    }
}

impl<T> Lockable for DistinctSortedCollection<T> {
    fn physical_locks(&self) -> Vec<CollectionLock> {
        self.source.physical_locks()
    }
}

impl<T: Clone + 'static> ObservableCollection<T> for DistinctSortedCollection<T> {
    delegate_positions!(T);
    delegate_values!(T);

    fn sources_of(&self, id: ElementId, root: CollectionId) -> Result<Vec<ElementId>> {
        self.core.sources_of(id, root, &*self.source)
    }

    fn can_add(&self, value: &T, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        if self.bucket(value).is_some() {
            return Some(Rejection::illegal_element(msg::ELEMENT_EXISTS));
        }
        self.check_position(value, after, before)
            .or_else(|| self.source.can_add(value, None, None))
    }

    fn add(
        &self,
        value: T,
        after: Option<ElementId>,
        before: Option<ElementId>,
        prefer_first: bool,
    ) -> Result<ElementId> {
        if let Some(rejection) = self.can_add(&value, after, before) {
            return Err(rejection.into());
        }
        let _tx = WriteScope::enter(self)?;
        let source_id = self.source.add(value, None, None, prefer_first)?;
        self.core.derived_of(source_id).ok_or(Error::NotPresent)
    }

    fn can_move(&self, id: ElementId, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        if !self.core.contains(id) {
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
        match self.bucket(value) {
            Some(existing) if existing != id => Some(Rejection::illegal_element(msg::ELEMENT_EXISTS)),
            _ => check_members(self.core.sources(id), |member| {
                self.source.can_set(member, value)
            }),
        }
    }

    fn set(&self, id: ElementId, value: T) -> Result<T> {
        if let Some(rejection) = self.can_set(id, &value) {
            return Err(rejection.into());
        }
        let _tx = WriteScope::enter(self)?;
        let old = self.core.element(id).ok_or(Error::NotPresent)?;
        let members = self.core.sources(id).ok_or(Error::NotPresent)?;
        set_members(&*self.source, &self.rewriting, id, &members, &value)?;
        Ok(old)
    }

    fn can_remove(&self, id: ElementId) -> Option<Rejection> {
        check_members(self.core.sources(id), |member| {
            self.source.can_remove(member)
        })
    }

    fn remove(&self, id: ElementId) -> Result<T> {
        let _tx = WriteScope::enter(self)?;
        let old = self.core.element(id).ok_or(Error::NotPresent)?;
        let members = self.core.sources(id).ok_or(Error::NotPresent)?;
        remove_members(&*self.source, &members)?;
        Ok(old)
    }
}
