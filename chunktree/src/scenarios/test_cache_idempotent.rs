//! Test that caching never changes what the tree returns.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::scenarios::helpers::*;
use crate::tree::BPlusTree;

/// Apply the same seeded operations and return the final contents.
fn run(cache_enabled: bool, clear_every: Option<usize>) -> (Vec<(u64, u64)>, String) {
    let test = TestTree::create();
    let mut tree: BPlusTree<u64, u64> = test.open(&numeric_config().with_cache(cache_enabled));
    let mut rng = StdRng::seed_from_u64(17);

    for step in 0..600 {
        let key = rng.random_range(0..50u64);
        let value = rng.random_range(0..4u64);
        if rng.random_bool(0.7) {
            tree.insert(key, value).expect("insert");
        } else {
            tree.remove(&key, &value).expect("remove");
        }
        if clear_every.is_some_and(|n| step % n == 0) {
            tree.clear_cache();
        }
    }
    if !cache_enabled {
        assert_eq!(tree.cache_len(), 0);
        assert_eq!(tree.store_stats().cache_hits, 0);
    }
    tree.validate().expect("valid");
    (
        tree.find_all().expect("find_all"),
        tree.dump().expect("dump"),
    )
}

#[test]
fn test_cache_does_not_change_results() {
    let cached = run(true, None);
    assert_eq!(run(false, None), cached);
    assert_eq!(run(true, Some(13)), cached);
}

#[test]
fn test_cache_saves_disk_reads() {
    let test = TestTree::create();
    let mut tree: BPlusTree<u64, u64> = test.open(&numeric_config());
    for key in 0..40u64 {
        tree.insert(key, key).expect("insert");
    }

    let before = tree.store_stats();
    for key in 0..40u64 {
        assert_eq!(tree.find_one(&key).expect("find_one"), Some(key));
    }
    let after = tree.store_stats();
    assert_eq!(after.disk_reads, before.disk_reads);
    assert!(after.cache_hits > before.cache_hits);

    tree.clear_cache();
    tree.find_one(&0).expect("find_one");
    assert!(tree.store_stats().disk_reads > after.disk_reads);
}
