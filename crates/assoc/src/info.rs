//! Provenance correlation between key and value elements.
//!
//! Key and value elements are derived through independent pipelines. Each is
//! filed under every root element it traces back to, and a value belongs to a
//! key exactly when the two share at least one root.

use hashbrown::HashMap;
use std::collections::BTreeSet;
use strata_core::ElementId;

/// Set of root element ids.
pub type Roots = BTreeSet<ElementId>;

/// Where one root element stands in the grouping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootPhase {
    /// Only key elements trace back to the root so far.
    KeysOnly,
    /// Only value elements trace back to the root so far.
    ValuesOnly,
    /// Both key and value elements trace back to the root.
    Grouped,
}

/// The key and value elements one root element contributed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupedElementInfo {
    root: ElementId,
    keys: BTreeSet<ElementId>,
    values: BTreeSet<ElementId>,
}

impl GroupedElementInfo {
    fn new(root: ElementId) -> Self {
        Self {
            root,
            keys: BTreeSet::new(),
            values: BTreeSet::new(),
        }
    }

    /// Returns the root element.
    pub fn root(&self) -> ElementId {
        self.root
    }

    /// Returns the key elements derived from the root.
    pub fn keys(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.keys.iter().copied()
    }

    /// Returns the value elements derived from the root.
    pub fn values(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.values.iter().copied()
    }

    /// Returns the grouping phase of the root.
    pub fn phase(&self) -> RootPhase {
        match (self.keys.is_empty(), self.values.is_empty()) {
            (false, true) => RootPhase::KeysOnly,
            (true, false) => RootPhase::ValuesOnly,
            _ => RootPhase::Grouped,
        }
    }

    fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.values.is_empty()
    }
}

/// Which side of the grouping an element belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Side {
    Key,
    Value,
}

/// Root bookkeeping for both sides of a grouping.
#[derive(Debug, Default)]
pub(crate) struct ProvenanceTable {
    infos: HashMap<ElementId, GroupedElementInfo>,
    key_roots: HashMap<ElementId, Roots>,
    value_roots: HashMap<ElementId, Roots>,
}

impl ProvenanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self, root: ElementId) -> Option<&GroupedElementInfo> {
        self.infos.get(&root)
    }

    pub fn roots(&self, side: Side, element: ElementId) -> Option<&Roots> {
        match side {
            Side::Key => self.key_roots.get(&element),
            Side::Value => self.value_roots.get(&element),
        }
    }

    pub fn elements(&self, side: Side) -> impl Iterator<Item = (&ElementId, &Roots)> {
        match side {
            Side::Key => self.key_roots.iter(),
            Side::Value => self.value_roots.iter(),
        }
    }

    /// Returns the roots a key and a value element have in common.
    pub fn shared_roots(&self, key: ElementId, value: ElementId) -> Roots {
        match (self.key_roots.get(&key), self.value_roots.get(&value)) {
            (Some(keys), Some(values)) => keys.intersection(values).copied().collect(),
            _ => Roots::new(),
        }
    }

    /// Files `element` under exactly `roots`, dropping it when `roots` is empty.
    ///
    /// Returns the elements of the other side filed under any root `element`
    /// left or joined; those are the pairs whose membership may have changed.
    pub fn set_roots(&mut self, side: Side, element: ElementId, roots: Roots) -> BTreeSet<ElementId> {
        let old = match side {
            Side::Key => self.key_roots.remove(&element),
            Side::Value => self.value_roots.remove(&element),
        }
        .unwrap_or_default();

        let mut touched = BTreeSet::new();
        for root in old.symmetric_difference(&roots) {
            let joined = roots.contains(root);
            let info = self
                .infos
                .entry(*root)
                .or_insert_with(|| GroupedElementInfo::new(*root));
            let (own, other) = match side {
                Side::Key => (&mut info.keys, &info.values),
                Side::Value => (&mut info.values, &info.keys),
            };
            if joined {
                own.insert(element);
            } else {
                own.remove(&element);
            }
            touched.extend(other.iter().copied());
            if info.is_empty() {
                self.infos.remove(root);
            }
        }

        if !roots.is_empty() {
            match side {
                Side::Key => self.key_roots.insert(element, roots),
                Side::Value => self.value_roots.insert(element, roots),
            };
        }
        touched
    }

    /// Returns the elements of the other side filed under any root of `element`.
    pub fn partners(&self, side: Side, element: ElementId) -> BTreeSet<ElementId> {
        let mut partners = BTreeSet::new();
        for root in self.roots(side, element).into_iter().flatten() {
            if let Some(info) = self.infos.get(root) {
                match side {
                    Side::Key => partners.extend(info.values.iter().copied()),
                    Side::Value => partners.extend(info.keys.iter().copied()),
                }
            }
        }
        partners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(slot: u32) -> ElementId {
        ElementId::new(slot, 0)
    }

    fn roots(slots: &[u32]) -> Roots {
        slots.iter().map(|s| id(*s)).collect()
    }

    #[test]
    fn test_phases_follow_both_sides() {
        let mut table = ProvenanceTable::new();
        table.set_roots(Side::Key, id(10), roots(&[1]));
        assert_eq!(table.info(id(1)).map(|i| i.phase()), Some(RootPhase::KeysOnly));

        let touched = table.set_roots(Side::Value, id(20), roots(&[1]));
        assert_eq!(touched, [id(10)].into_iter().collect());
        assert_eq!(table.info(id(1)).map(|i| i.phase()), Some(RootPhase::Grouped));

        table.set_roots(Side::Key, id(10), Roots::new());
        assert_eq!(table.info(id(1)).map(|i| i.phase()), Some(RootPhase::ValuesOnly));

        table.set_roots(Side::Value, id(20), Roots::new());
        assert!(table.info(id(1)).is_none());
        assert!(table.roots(Side::Value, id(20)).is_none());
    }

    #[test]
    fn test_shared_roots_intersect() {
        let mut table = ProvenanceTable::new();
        table.set_roots(Side::Key, id(10), roots(&[1, 2, 3]));
        table.set_roots(Side::Value, id(20), roots(&[2, 3, 4]));
        assert_eq!(table.shared_roots(id(10), id(20)), roots(&[2, 3]));
        assert!(table.shared_roots(id(10), id(21)).is_empty());
    }

    #[test]
    fn test_set_roots_reports_partners_of_changed_roots_only() {
        let mut table = ProvenanceTable::new();
        table.set_roots(Side::Value, id(20), roots(&[1]));
        table.set_roots(Side::Value, id(21), roots(&[2]));
        table.set_roots(Side::Key, id(10), roots(&[1]));

        let touched = table.set_roots(Side::Key, id(10), roots(&[1, 2]));
        assert_eq!(touched, [id(21)].into_iter().collect());
        assert_eq!(table.partners(Side::Key, id(10)), [id(20), id(21)].into_iter().collect());
    }
}
