//! Property-based tests for strata-collect using proptest.

use proptest::prelude::*;
use std::collections::HashSet;
use strata_collect::{
    CollectionFlow, DistinctCollection, DistinctOptions, MapBuilder, ObservableCollection,
    ObservableTreeList, ValueComparator,
};

#[derive(Clone, Debug)]
enum Op {
    InsertAt(usize, i32),
    RemoveAt(usize),
    SetAt(usize, i32),
    Move(usize, usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..100, 0i32..12).prop_map(|(i, v)| Op::InsertAt(i, v)),
        2 => (0usize..100).prop_map(Op::RemoveAt),
        2 => (0usize..100, 0i32..12).prop_map(|(i, v)| Op::SetAt(i, v)),
        1 => (0usize..100, 0usize..100).prop_map(|(from, to)| Op::Move(from, to)),
    ]
}

/// Applies `op` to the list and the model alike.
fn apply(list: &ObservableTreeList<i32>, model: &mut Vec<i32>, op: Op) {
    match op {
        Op::InsertAt(i, v) => {
            let index = i % (model.len() + 1);
            list.insert_at(index, v).unwrap();
            model.insert(index, v);
        }
        Op::RemoveAt(i) => {
            if model.is_empty() {
                return;
            }
            let index = i % model.len();
            let id = list.element_at(index).unwrap();
            assert_eq!(list.remove(id).unwrap(), model.remove(index));
        }
        Op::SetAt(i, v) => {
            if model.is_empty() {
                return;
            }
            let index = i % model.len();
            let id = list.element_at(index).unwrap();
            list.set(id, v).unwrap();
            model[index] = v;
        }
        Op::Move(from, to) => {
            if model.is_empty() {
                return;
            }
            let from = from % model.len();
            let to = to % model.len();
            let id = list.element_at(from).unwrap();
            let value = model.remove(from);
            // Lands right before the element that currently sits at `to`
            // once `id` is taken out.
            let before = if to < model.len() {
                let target = model_index_to_list(from, to);
                list.element_at(target)
            } else {
                None
            };
            let after = if before.is_none() { list.last().filter(|last| *last != id) } else { None };
            list.move_element(id, after, before, false).unwrap();
            model.insert(to, value);
        }
    }
}

/// Maps an index of the model with one element taken out at `removed` back to
/// the list that still holds it.
fn model_index_to_list(removed: usize, index: usize) -> usize {
    if index >= removed {
        index + 1
    } else {
        index
    }
}

fn first_occurrences(model: &[i32]) -> Vec<i32> {
    let mut seen = HashSet::new();
    model.iter().copied().filter(|v| seen.insert(*v)).collect()
}

proptest! {
    /// A filter view always equals the filtered source.
    #[test]
    fn filter_matches_filtered_vec(ops in prop::collection::vec(op_strategy(), 1..150)) {
        let list = ObservableTreeList::<i32>::new();
        let evens = list.filter(|v| v % 2 == 0);
        let mut model = Vec::new();

        for op in ops {
            apply(&list, &mut model, op);
            let expected: Vec<i32> = model.iter().copied().filter(|v| v % 2 == 0).collect();
            prop_assert_eq!(evens.values(), expected);
        }
    }

    /// A sorted view always equals the sorted source.
    #[test]
    fn sort_matches_sorted_vec(ops in prop::collection::vec(op_strategy(), 1..150)) {
        let list = ObservableTreeList::<i32>::new();
        let sorted = list.sorted(ValueComparator::natural());
        let mut model = Vec::new();

        for op in ops {
            apply(&list, &mut model, op);
            let mut expected = model.clone();
            expected.sort();
            prop_assert_eq!(sorted.values(), expected);
        }
    }

    /// A distinct view never holds two equal values, and with `prefer_first`
    /// it lists each value at its first occurrence in the source.
    #[test]
    fn distinct_holds_each_value_once(ops in prop::collection::vec(op_strategy(), 1..150)) {
        let list = ObservableTreeList::<i32>::new();
        let any = list.distinct(DistinctOptions::default());
        let first = list.distinct(DistinctOptions { prefer_first: true });
        let mut model = Vec::new();

        for op in ops {
            apply(&list, &mut model, op);

            let values = any.values();
            let unique: HashSet<i32> = values.iter().copied().collect();
            prop_assert_eq!(unique.len(), values.len());
            prop_assert_eq!(unique, model.iter().copied().collect::<HashSet<i32>>());

            prop_assert_eq!(first.values(), first_occurrences(&model));
        }
    }

    /// A write through a distinct view that one member refuses leaves every
    /// stage below it as it was.
    #[test]
    fn refused_member_write_leaves_no_trace(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let list = ObservableTreeList::<i32>::new();
        let exact = DistinctCollection::new(list.clone(), DistinctOptions { prefer_first: true });
        let residues = MapBuilder::new(|v: &i32| v % 4)
            .with_reverse(|v: &i32| *v)
            .build(exact.clone());
        let folded = DistinctCollection::new(residues, DistinctOptions { prefer_first: true });
        let mut model = Vec::new();

        for op in ops {
            apply(&list, &mut model, op);
        }
        let exact_handles = exact.elements();
        for id in folded.elements() {
            if folded.members(id).map_or(0, |m| m.len()) < 2 {
                continue;
            }
            // The second member collides upstream with the first one's new value.
            prop_assert!(folded.set(id, 100).is_err());
            prop_assert_eq!(list.values(), model.clone());
            prop_assert_eq!(exact.values(), first_occurrences(&model));
            let folded_model: Vec<i32> = model.iter().map(|v| v % 4).collect();
            prop_assert_eq!(folded.values(), first_occurrences(&folded_model));
            prop_assert_eq!(exact.elements(), exact_handles.clone());
        }
    }

    /// Derived positions agree with the handles they hand out.
    #[test]
    fn derived_index_round_trip(ops in prop::collection::vec(op_strategy(), 1..100)) {
        let list = ObservableTreeList::<i32>::new();
        let view = list.map(|v| v * 3).reverse();
        let mut model = Vec::new();

        for op in ops {
            apply(&list, &mut model, op);
        }
        for (index, id) in view.elements().into_iter().enumerate() {
            prop_assert_eq!(view.index_of(id), Some(index));
            prop_assert_eq!(view.element_at(index), Some(id));
        }
        let expected: Vec<i32> = model.iter().rev().map(|v| v * 3).collect();
        prop_assert_eq!(view.values(), expected);
    }
}
