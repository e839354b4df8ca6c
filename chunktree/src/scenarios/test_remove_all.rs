//! Test removing every pair, in several orders, down to an empty root.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::scenarios::helpers::*;
use crate::tree::BPlusTree;

const COUNT: u64 = 60;

fn remove_all_in_order(order: &[u64]) {
    let test = TestTree::create();
    let mut tree: BPlusTree<u64, u64> = test.open(&numeric_config());

    for key in 0..COUNT {
        tree.insert(key, key * 3).expect("insert");
    }
    assert!(tree.validate().expect("valid").height >= 3);

    for (removed, key) in order.iter().enumerate() {
        assert!(tree.remove(key, &(key * 3)).expect("remove"));
        let stats = tree.validate().expect("valid after remove");
        assert_eq!(stats.entries, order.len() - removed - 1);
        assert!(!tree.includes(key, &(key * 3)).expect("includes"));
    }

    assert!(tree.find_all().expect("find_all").is_empty());
    let stats = tree.validate().expect("valid");
    assert_eq!(stats.height, 1);
    assert_eq!(stats.index_nodes, 1);
    assert_eq!(stats.record_nodes, 0);
    assert!(stats.free_chunks > 0);
    assert_eq!(tree.dump().expect("dump"), "[Node 0 (0/3) leaf]\n");
}

#[test]
fn test_remove_all_ascending() {
    let order: Vec<u64> = (0..COUNT).collect();
    remove_all_in_order(&order);
}

#[test]
fn test_remove_all_descending() {
    let order: Vec<u64> = (0..COUNT).rev().collect();
    remove_all_in_order(&order);
}

#[test]
fn test_remove_all_shuffled() {
    for seed in [1, 2, 3] {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<u64> = (0..COUNT).collect();
        order.shuffle(&mut rng);
        remove_all_in_order(&order);
    }
}
