//! Test a larger workload with the default chunk size.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::codec::FixedStr;
use crate::config::TreeConfig;
use crate::scenarios::helpers::*;
use crate::tree::BPlusTree;

type Label = FixedStr<16>;

fn label(key: u32) -> Label {
    FixedStr::new(format!("item-{key}")).expect("label fits")
}

#[test]
fn test_bulk_insert_and_remove() {
    let test = TestTree::create();
    let mut tree: BPlusTree<u32, Label> = test.open(&TreeConfig::default());
    assert_eq!(tree.layout().chunk_size, TreeConfig::DEFAULT_CHUNK_SIZE);

    let mut keys: Vec<u32> = (0..5_000).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(3));
    for key in &keys {
        assert!(tree.insert(*key, label(*key)).expect("insert"));
    }
    let stats = tree.validate().expect("valid");
    assert_eq!(stats.entries, keys.len());
    assert!(stats.record_nodes > 1);

    for key in (0..5_000).step_by(97) {
        assert_eq!(tree.find_one(&key).expect("find_one"), Some(label(key)));
    }

    for key in keys.iter().filter(|k| *k % 2 == 0) {
        assert!(tree.remove(key, &label(*key)).expect("remove"));
    }
    let stats = tree.validate().expect("valid");
    assert_eq!(stats.entries, keys.len() / 2);
    assert_eq!(tree.find_one(&10).expect("find_one"), None);
    assert_eq!(tree.find_one(&11).expect("find_one"), Some(label(11)));
}
