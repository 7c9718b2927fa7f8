//! Property-based tests for strata-tree using proptest.

use core::ops::Bound;
use proptest::prelude::*;
use strata_tree::{KeyRange, RedBlackTree, SearchDirection, SimpleComparator, TreeSet};

#[derive(Clone, Debug)]
enum Op {
    InsertAt(usize, i32),
    RemoveAt(usize),
    Replace(usize, i32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..1000, any::<i32>()).prop_map(|(i, v)| Op::InsertAt(i, v)),
        2 => (0usize..1000).prop_map(Op::RemoveAt),
        1 => (0usize..1000, any::<i32>()).prop_map(|(i, v)| Op::Replace(i, v)),
    ]
}

proptest! {
    /// Positional edits match the same edits on a Vec.
    #[test]
    fn positional_edits_match_vec(ops in prop::collection::vec(op_strategy(), 1..300)) {
        let mut tree = RedBlackTree::new();
        let mut model: Vec<i32> = Vec::new();

        for op in ops {
            match op {
                Op::InsertAt(i, v) => {
                    let index = i % (model.len() + 1);
                    let id = tree.insert_at(index, v).unwrap();
                    model.insert(index, v);
                    prop_assert_eq!(tree.index_of(id), Some(index));
                }
                Op::RemoveAt(i) => {
                    if model.is_empty() {
                        continue;
                    }
                    let index = i % model.len();
                    let id = tree.get(index).unwrap();
                    prop_assert_eq!(tree.remove(id), model.remove(index));
                    prop_assert!(!tree.contains(id));
                }
                Op::Replace(i, v) => {
                    if model.is_empty() {
                        continue;
                    }
                    let index = i % model.len();
                    let id = tree.get(index).unwrap();
                    prop_assert_eq!(tree.replace(id, v), Some(model[index]));
                    model[index] = v;
                }
            }
            prop_assert!(tree.validate().is_ok());
        }

        let values: Vec<i32> = tree.iter().map(|(_, v)| *v).collect();
        prop_assert_eq!(&values, &model);
        let reversed: Vec<i32> = tree.iter().rev().map(|(_, v)| *v).collect();
        prop_assert_eq!(reversed, model.iter().rev().copied().collect::<Vec<_>>());
    }

    /// Every handle reports the index at which get() returns it.
    #[test]
    fn index_of_inverts_get(values in prop::collection::vec(any::<i16>(), 0..300)) {
        let mut tree = RedBlackTree::new();
        for v in values {
            tree.insert_sorted(v, |a, b| a.cmp(b), false);
        }
        for index in 0..tree.len() {
            let id = tree.get(index).unwrap();
            prop_assert_eq!(tree.index_of(id), Some(index));
        }
        prop_assert_eq!(tree.get(tree.len()), None);
    }

    /// Sorted insertion yields a stable sort of the input.
    #[test]
    fn sorted_insert_is_stable_sort(values in prop::collection::vec((0i32..20, any::<u32>()), 0..200)) {
        let mut tree = RedBlackTree::new();
        for v in &values {
            tree.insert_sorted(*v, |a, b| a.0.cmp(&b.0), false);
        }
        let mut expected = values.clone();
        expected.sort_by_key(|v| v.0);
        let actual: Vec<_> = tree.iter().map(|(_, v)| *v).collect();
        prop_assert_eq!(actual, expected);
    }

    /// Closest-match search agrees with a linear scan.
    #[test]
    fn find_closest_matches_scan(
        values in prop::collection::vec(0i32..100, 0..100),
        target in 0i32..100,
    ) {
        let mut tree = RedBlackTree::new();
        for v in &values {
            tree.insert_sorted(*v, |a, b| a.cmp(b), false);
        }
        let mut sorted = values.clone();
        sorted.sort();

        let floor = tree
            .find_closest(|v| target.cmp(v), SearchDirection::Less, true)
            .and_then(|id| tree.value(id).copied());
        prop_assert_eq!(floor, sorted.iter().rev().find(|v| **v <= target).copied());

        let higher = tree
            .find_closest(|v| target.cmp(v), SearchDirection::Greater, false)
            .and_then(|id| tree.value(id).copied());
        prop_assert_eq!(higher, sorted.iter().find(|v| **v > target).copied());
    }

    /// Range windows hold exactly the members inside the range.
    #[test]
    fn set_range_matches_filter(
        values in prop::collection::vec(0i32..200, 0..150),
        lower in 0i32..200,
        upper in 0i32..200,
        lower_exclusive in any::<bool>(),
        upper_exclusive in any::<bool>(),
    ) {
        let set: TreeSet<i32> = values.iter().copied().collect();
        let edge = |key: i32, exclusive: bool| if exclusive { Bound::Excluded(key) } else { Bound::Included(key) };
        let range = KeyRange::new(edge(lower, lower_exclusive), edge(upper, upper_exclusive));
        let window: Vec<i32> = set.range(&range).iter().map(|(_, v)| *v).collect();

        let mut expected: Vec<i32> = values.clone();
        expected.sort();
        expected.dedup();
        expected.retain(|v| range.contains_by(v, &SimpleComparator::asc()));
        prop_assert_eq!(window, expected);
    }
}
