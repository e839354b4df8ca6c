//! Test random inserts and removes against an in-memory model.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::scenarios::helpers::*;
use crate::tree::BPlusTree;

const OPERATIONS: usize = 2_000;

fn run_against_model(seed: u64) {
    let test = TestTree::create();
    let mut tree: BPlusTree<u64, u64> = test.open(&numeric_config());
    let mut model = BTreeSet::new();
    let mut rng = StdRng::seed_from_u64(seed);

    for step in 0..OPERATIONS {
        // Few keys and values, so duplicate keys and repeated pairs are common.
        let key = rng.random_range(0..40u64);
        let value = rng.random_range(0..6u64);

        // Bias towards inserts so the tree grows over the run.
        if rng.random_range(0..10) < 6 {
            let inserted = tree.insert(key, value).expect("insert");
            assert_eq!(inserted, model.insert((key, value)), "insert ({key}, {value})");
        } else {
            let removed = tree.remove(&key, &value).expect("remove");
            assert_eq!(removed, model.remove(&(key, value)), "remove ({key}, {value})");
        }

        if step % 50 == 0 {
            let stats = tree.validate().expect("valid");
            assert_eq!(stats.entries, model.len());
        }
    }

    tree.validate().expect("valid");
    let expected: Vec<(u64, u64)> = model.iter().copied().collect();
    assert_eq!(tree.find_all().expect("find_all"), expected);

    for key in 0..40u64 {
        let values: Vec<u64> = model
            .range((key, 0)..=(key, u64::MAX))
            .map(|(_, v)| *v)
            .collect();
        assert_eq!(tree.find_one(&key).expect("find_one"), values.first().copied());
        assert_eq!(tree.find_many(&key).expect("find_many"), values);
        for value in 0..6u64 {
            assert_eq!(
                tree.includes(&key, &value).expect("includes"),
                model.contains(&(key, value))
            );
        }
    }
}

#[test]
fn test_matches_model() {
    for seed in [7, 42, 1234] {
        run_against_model(seed);
    }
}

#[test]
fn test_find_all_is_sorted() {
    let test = TestTree::create();
    let mut tree: BPlusTree<u64, u64> = test.open(&numeric_config());
    let mut rng = StdRng::seed_from_u64(99);

    for _ in 0..300 {
        tree.insert(rng.random_range(0..1_000), rng.random_range(0..1_000))
            .expect("insert");
    }
    let pairs = tree.find_all().expect("find_all");
    assert!(pairs.windows(2).all(|w| w[0] < w[1]));
}
