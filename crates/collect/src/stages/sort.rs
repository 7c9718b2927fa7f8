//! Sorting stage.

use crate::collection::{CollectionRef, ObservableCollection, ValueComparator};
use crate::derived::{
    connect, delegate_positions, delegate_values, DerivedCore, Entry, SourceListener,
};
use crate::event::{ChangeKind, CollectionEvent};
use crate::scope::WriteScope;
use std::cell::Cell;
use std::cmp::Ordering;
use std::rc::Rc;
use strata_core::{msg, Cause, CollectionId, ElementId, Error, Rejection, Result};
use strata_lock::{CollectionLock, Lockable};
use strata_tree::{Comparator, RedBlackTree};
use tracing::trace;

/// Where a value added through the sorted view asked to land.
#[derive(Clone, Copy, Debug)]
struct Placement {
    after: Option<ElementId>,
    before: Option<ElementId>,
    prefer_first: bool,
}

/// A view of the source values in comparator order.
///
/// Equal values keep the order in which they arrived. An update whose new
/// value still fits between its neighbors keeps its position; otherwise the
/// element moves.
pub struct SortedCollection<T> {
    source: CollectionRef<T>,
    core: DerivedCore<T>,
    cmp: ValueComparator<T>,
    pending: Cell<Option<Placement>>,
}

impl<T: Clone + 'static> SortedCollection<T> {
    /// Sorts `source` by `cmp`.
    pub fn new(source: CollectionRef<T>, cmp: ValueComparator<T>) -> Rc<Self> {
        let stage = Rc::new(Self {
            source,
            core: DerivedCore::new(),
            cmp,
            pending: Cell::new(None),
        });
        let cause = Cause::new();
        for id in stage.source.elements() {
            if let Some(value) = stage.source.element(id) {
                stage.insert(Entry::new(value, id), None, cause, false);
            }
        }
        stage.core.attach(connect(&*stage.source, &stage));
        stage
    }

    /// Returns the comparator.
    pub fn comparator(&self) -> &ValueComparator<T> {
        &self.cmp
    }

    fn insert(&self, entry: Entry<T>, placement: Option<Placement>, cause: Cause, moved: bool) -> ElementId {
        let cmp = self.cmp.clone();
        self.core.insert_placed(
            entry,
            move |tree, entry| place(tree, entry, &cmp, placement),
            cause,
            moved,
        )
    }

    fn by_value(&self) -> impl FnMut(&Entry<T>, &Entry<T>) -> Ordering + '_ {
        move |a, b| self.cmp.compare(&a.value, &b.value)
    }

    /// Checks the hints against the comparator.
    fn check_hints(&self, value: &T, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        for (hint, is_after) in [(after, true), (before, false)] {
            let Some(hint) = hint else {
                continue;
            };
            let Some(bound) = self.core.element(hint) else {
                return Some(Rejection::illegal_position(msg::NOT_PRESENT));
            };
            let order = self.cmp.compare(&bound, value);
            let consistent = if is_after {
                order != Ordering::Greater
            } else {
                order != Ordering::Less
            };
            if !consistent {
                return Some(Rejection::illegal_position(msg::ILLEGAL_ELEMENT_POSITION));
            }
        }
        None
    }

    fn source_of(&self, id: ElementId) -> std::result::Result<ElementId, Rejection> {
        self.core
            .primary(id)
            .ok_or_else(|| Rejection::illegal_element(msg::NOT_PRESENT))
    }

    fn is_between(&self, id: ElementId, after: Option<ElementId>, before: Option<ElementId>) -> bool {
        after.map_or(true, |a| self.core.compare_position(a, id) == Some(Ordering::Less))
            && before.map_or(true, |b| self.core.compare_position(id, b) == Some(Ordering::Less))
    }
}

/// Inserts next to an equal hint, or at the sorted position.
fn place<T>(
    tree: &mut RedBlackTree<Entry<T>>,
    entry: Entry<T>,
    cmp: &ValueComparator<T>,
    placement: Option<Placement>,
) -> ElementId {
    let Some(placement) = placement else {
        return tree.insert_sorted(entry, |a, b| cmp.compare(&a.value, &b.value), false);
    };
    let equals = |tree: &RedBlackTree<Entry<T>>, hint: Option<ElementId>, entry: &Entry<T>| {
        hint.and_then(|h| tree.value(h))
            .is_some_and(|bound| cmp.is_equal(&bound.value, &entry.value))
    };
    let mut entry = entry;
    if equals(tree, placement.after, &entry) {
        if let Some(after) = placement.after {
            match tree.insert_after(after, entry) {
                Ok(id) => return id,
                Err(back) => entry = back,
            }
        }
    } else if equals(tree, placement.before, &entry) {
        if let Some(before) = placement.before {
            match tree.insert_before(before, entry) {
                Ok(id) => return id,
                Err(back) => entry = back,
            }
        }
    }
    tree.insert_sorted(
        entry,
        |a, b| cmp.compare(&a.value, &b.value),
        placement.prefer_first,
    )
}

impl<T: Clone + 'static> SourceListener<T> for SortedCollection<T> {
    fn on_source_event(&self, event: &CollectionEvent<T>) {
        match &event.kind {
            ChangeKind::Added => {
                let placement = self.pending.take();
                self.insert(Entry::new(event.value.clone(), event.id), placement, event.cause, event.moved);
            }
            ChangeKind::Removed => {
                if let Some(id) = self.core.derived_of(event.id) {
                    self.core.remove(id, event.cause, event.moved);
                }
            }
            ChangeKind::Updated { .. } => {
                let Some(id) = self.core.derived_of(event.id) else {
                    return;
                };
                self.core.update(id, event.value.clone(), event.cause);
                let moved = self.core.reposition(id, &mut self.by_value(), event.cause);
                if moved != id {
                    trace!(collection = self.core.id.get(), "sorted element moved on update");
                }
            }
        }
    }

    fn on_source_flush(&self) {
        self.core.flush();
    }
}

impl<T> Lockable for SortedCollection<T> {
    fn physical_locks(&self) -> Vec<CollectionLock> {
        self.source.physical_locks()
    }
}

impl<T: Clone + 'static> ObservableCollection<T> for SortedCollection<T> {
    delegate_positions!(T);
    delegate_values!(T);

    fn sources_of(&self, id: ElementId, root: CollectionId) -> Result<Vec<ElementId>> {
        self.core.sources_of(id, root, &*self.source)
    }

    fn can_add(&self, value: &T, after: Option<ElementId>, before: Option<ElementId>) -> Option<Rejection> {
        self.check_hints(value, after, before)
            .or_else(|| self.source.can_add(value, None, None))
    }

    fn add(
        &self,
        value: T,
        after: Option<ElementId>,
        before: Option<ElementId>,
        prefer_first: bool,
    ) -> Result<ElementId> {
        if let Some(rejection) = self.check_hints(&value, after, before) {
            return Err(rejection.into());
        }
        let _tx = WriteScope::enter(self)?;
        self.pending.set(Some(Placement {
            after,
            before,
            prefer_first,
        }));
        let added = self.source.add(value, None, None, prefer_first);
        self.pending.set(None);
        self.core.derived_of(added?).ok_or(Error::NotPresent)
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
        match self.source_of(id) {
            Ok(source_id) => self.source.can_set(source_id, value),
            Err(rejection) => Some(rejection),
        }
    }

    fn set(&self, id: ElementId, value: T) -> Result<T> {
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

    fn sorted(list: &Rc<ObservableTreeList<i32>>) -> Rc<SortedCollection<i32>> {
        SortedCollection::new(list.clone(), ValueComparator::natural())
    }

    #[test]
    fn test_sorted_view_orders_source() {
        let list = ObservableTreeList::from_values([5, 4, 3, 2, 1]);
        let view = sorted(&list);
        assert_eq!(view.values(), vec![1, 2, 3, 4, 5]);
        assert_eq!(view.values_rev(), vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_equal_values_are_stable() {
        let list = ObservableTreeList::from_values([(3, 'a'), (1, 'b'), (3, 'c')]);
        let view = SortedCollection::new(list.clone(), ValueComparator::new(|a: &(i32, char), b: &(i32, char)| a.0.cmp(&b.0)));
        assert_eq!(view.values(), vec![(1, 'b'), (3, 'a'), (3, 'c')]);

        list.push((3, 'd')).unwrap();
        assert_eq!(view.get(3), Some((3, 'd')));

        let id = view.add((3, 'e'), None, None, true).unwrap();
        assert_eq!(view.index_of(id), Some(1));
    }

    #[test]
    fn test_add_duplicate_lands_next_to_existing() {
        let list = ObservableTreeList::from_values([5, 4, 3, 2, 1]);
        let view = sorted(&list);
        let three = view.element_at(2).unwrap();

        let id = view.add(3, Some(three), None, false).unwrap();
        assert_eq!(view.values(), vec![1, 2, 3, 3, 4, 5]);
        assert_eq!(view.index_of(id), Some(3));
        assert_eq!(view.prev(id), Some(three));

        let before = view.add(3, None, Some(three), false).unwrap();
        assert_eq!(view.next(before), Some(three));
    }

    #[test]
    fn test_add_rejects_inconsistent_hints() {
        let list = ObservableTreeList::from_values([1, 5]);
        let view = sorted(&list);
        let five = view.element_at(1).unwrap();
        assert_eq!(
            view.can_add(&7, None, Some(five)),
            Some(Rejection::illegal_position(msg::ILLEGAL_ELEMENT_POSITION))
        );
        assert!(view.add(7, None, Some(five), false).is_err());
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_update_keeps_or_moves() {
        let list = ObservableTreeList::from_values([10, 20, 30]);
        let view = sorted(&list);
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        let _sub = view.subscribe(Rc::new(move |e: &CollectionEvent<i32>| {
            sink.borrow_mut().push((e.kind.clone(), e.index, e.moved))
        }));

        let twenty = list.element_at(1).unwrap();
        list.set(twenty, 25).unwrap();
        assert_eq!(view.values(), vec![10, 25, 30]);
        list.set(twenty, 35).unwrap();
        assert_eq!(view.values(), vec![10, 30, 35]);

        assert_eq!(
            *events.borrow(),
            vec![
                (ChangeKind::Updated { old: 20 }, 1, false),
                (ChangeKind::Updated { old: 25 }, 1, false),
                (ChangeKind::Removed, 1, true),
                (ChangeKind::Added, 2, true),
            ]
        );
    }

    #[test]
    fn test_sorted_elements_cannot_move() {
        let list = ObservableTreeList::from_values([1, 2]);
        let view = sorted(&list);
        let one = view.element_at(0).unwrap();
        let two = view.element_at(1).unwrap();
        assert!(view.move_element(one, Some(two), None, false).is_err());
        assert_eq!(view.move_element(one, None, Some(two), true).unwrap(), one);
    }
}
