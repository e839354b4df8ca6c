//! Test splits cascading up two index levels and merges cascading back.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::scenarios::helpers::*;
use crate::tree::BPlusTree;

const SEED: u64 = 0x5eed;

#[test]
fn test_split_and_merge_cascade() {
    let test = TestTree::create();
    let mut tree: BPlusTree<u64, u64> = test.open(&numeric_config());

    // Grow until the root has split twice: root, two intermediate levels,
    // then records.
    let mut inserted = Vec::new();
    let mut key = 0u64;
    while tree.validate().expect("valid while growing").height < 4 {
        assert!(tree.insert(key, key).expect("insert"));
        inserted.push(key);
        key += 1;
        assert!(key < 10_000, "tree never reached four levels");
    }
    let grown = tree.validate().expect("valid");
    assert_eq!(grown.height, 4);
    assert_eq!(grown.entries, inserted.len());

    let mut rng = StdRng::seed_from_u64(SEED);
    inserted.shuffle(&mut rng);

    let mut previous_height = grown.height;
    let mut remaining = inserted.len();
    while previous_height > 2 {
        let key = inserted.pop().expect("pairs left to remove");
        assert!(tree.remove(&key, &key).expect("remove"));
        remaining -= 1;

        let stats = tree.validate().expect("valid while shrinking");
        assert_eq!(stats.entries, remaining);
        assert!(stats.height <= previous_height);
        previous_height = stats.height;
    }

    // Single index level over the records.
    let dump = tree.dump().expect("dump");
    assert!(dump.starts_with("[Node 0 ("));
    assert!(dump.lines().next().is_some_and(|line| line.contains(" leaf]")));

    let mut expected = inserted.clone();
    expected.sort_unstable();
    let found: Vec<u64> = tree
        .find_all()
        .expect("find_all")
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(found, expected);
}
