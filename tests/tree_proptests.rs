//! Property-based tests: differential testing against a `BTreeMap` oracle.
//!
//! The oracle models the tree as `BTreeMap<K, Vec<V>>` with duplicate-free,
//! insertion-ordered value vectors — exactly the visible semantics of the
//! index. Every generated operation is applied to both sides and the results
//! compared; each case ends with a structural audit and a full-scan
//! comparison.

mod common;

use std::collections::BTreeMap;

use crabtree::{BPlusTree, NaturalOrder};
use proptest::prelude::*;

/// A small fan-out amplifies splits and merges at modest key counts.
type Tree = BPlusTree<u16, u16, NaturalOrder, 6>;

#[derive(Debug, Clone)]
enum Op {
    Insert(u16, u16),
    InsertUnique(u16, u16),
    Delete(u16, u16),
    Get(u16),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    // A narrow key domain makes collisions, duplicate pairs and multi-value
    // entries common.
    let key = 0u16..200;
    let value = 0u16..8;
    prop_oneof![
        4 => (key.clone(), value.clone()).prop_map(|(k, v)| Op::Insert(k, v)),
        1 => (key.clone(), value.clone()).prop_map(|(k, v)| Op::InsertUnique(k, v)),
        3 => (key.clone(), value).prop_map(|(k, v)| Op::Delete(k, v)),
        2 => key.prop_map(Op::Get),
    ]
}

struct Oracle {
    map: BTreeMap<u16, Vec<u16>>,
    pairs: usize,
}

impl Oracle {
    fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            pairs: 0,
        }
    }

    fn insert(&mut self, k: u16, v: u16) -> bool {
        let values = self.map.entry(k).or_default();
        if values.contains(&v) {
            return false;
        }
        values.push(v);
        self.pairs += 1;
        true
    }

    fn insert_unique(&mut self, k: u16, v: u16) -> bool {
        if self.map.contains_key(&k) {
            return false;
        }
        self.map.insert(k, vec![v]);
        self.pairs += 1;
        true
    }

    fn delete(&mut self, k: u16, v: u16) -> bool {
        let Some(values) = self.map.get_mut(&k) else {
            return false;
        };
        let Some(pos) = values.iter().position(|x| *x == v) else {
            return false;
        };
        values.remove(pos);
        if values.is_empty() {
            self.map.remove(&k);
        }
        self.pairs -= 1;
        true
    }

    fn get(&self, k: u16) -> Vec<u16> {
        self.map.get(&k).cloned().unwrap_or_default()
    }

    fn scan(&self) -> Vec<(u16, u16)> {
        self.map
            .iter()
            .flat_map(|(&k, values)| values.iter().map(move |&v| (k, v)))
            .collect()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Arbitrary operation interleavings agree with the oracle step by step.
    #[test]
    fn operations_match_oracle(ops in prop::collection::vec(op_strategy(), 0..400)) {
        common::init_tracing();
        let tree = Tree::new();
        let mut oracle = Oracle::new();

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    prop_assert_eq!(tree.insert(k, v), oracle.insert(k, v));
                }
                Op::InsertUnique(k, v) => {
                    prop_assert_eq!(tree.insert_unique(k, v), oracle.insert_unique(k, v));
                }
                Op::Delete(k, v) => {
                    prop_assert_eq!(tree.delete(&k, &v), oracle.delete(k, v));
                }
                Op::Get(k) => {
                    prop_assert_eq!(tree.values(&k), oracle.get(k));
                }
            }
        }

        tree.check_structure();
        prop_assert_eq!(tree.len(), oracle.pairs);
        prop_assert_eq!(tree.iter().collect::<Vec<_>>(), oracle.scan());
    }

    /// The scan is independent of insertion order.
    #[test]
    fn scan_is_permutation_independent(mut keys in prop::collection::vec(0u16..500, 1..300)) {
        common::init_tracing();
        keys.sort_unstable();
        keys.dedup();

        let sorted = Tree::new();
        for &k in &keys {
            prop_assert!(sorted.insert(k, k));
        }

        // Reverse order produces an identical scan.
        let reversed = Tree::new();
        for &k in keys.iter().rev() {
            prop_assert!(reversed.insert(k, k));
        }

        let expected: Vec<(u16, u16)> = keys.iter().map(|&k| (k, k)).collect();
        prop_assert_eq!(sorted.iter().collect::<Vec<_>>(), expected.clone());
        prop_assert_eq!(reversed.iter().collect::<Vec<_>>(), expected);
        sorted.check_structure();
        reversed.check_structure();
    }

    /// begin_at/end_at bracket the key space consistently.
    #[test]
    fn range_cursors_agree_with_oracle(
        keys in prop::collection::btree_set(0u16..300, 1..120),
        probe in 0u16..320,
    ) {
        common::init_tracing();
        let tree = Tree::new();
        for &k in &keys {
            prop_assert!(tree.insert(k, k));
        }

        let lower = keys.iter().find(|&&k| k >= probe).copied();
        prop_assert_eq!(tree.begin_at(&probe).key().copied(), lower);

        let upper = keys.iter().rev().find(|&&k| k <= probe).copied();
        prop_assert_eq!(tree.end_at(&probe).key().copied(), upper);
    }

    /// Insert-then-delete of fresh pairs leaves the original contents.
    #[test]
    fn round_trip_restores_contents(
        base in prop::collection::btree_set(0u16..200, 1..80),
        churn in prop::collection::btree_set(200u16..400, 1..80),
    ) {
        common::init_tracing();
        let tree = Tree::new();
        for &k in &base {
            prop_assert!(tree.insert(k, k));
        }
        let before: Vec<(u16, u16)> = tree.iter().collect();

        for &k in &churn {
            prop_assert!(tree.insert(k, k));
        }
        for &k in &churn {
            prop_assert!(tree.delete(&k, &k));
        }

        tree.check_structure();
        prop_assert_eq!(tree.iter().collect::<Vec<_>>(), before);
    }
}
