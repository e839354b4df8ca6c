//! Test that a tree survives closing and reopening its file.

use crate::scenarios::helpers::*;
use crate::tree::BPlusTree;

#[test]
fn test_contents_survive_reopen() {
    let test = TestTree::create();
    let expected = {
        let mut tree: BPlusTree<i32, Name> = test.open(&named_config());
        for key in -20..20 {
            tree.insert(key, name(&format!("n{key}"))).expect("insert");
        }
        for key in (-20..20).step_by(3) {
            tree.remove(&key, &name(&format!("n{key}"))).expect("remove");
        }
        tree.sync().expect("sync");
        tree.find_all().expect("find_all")
    };

    let mut tree: BPlusTree<i32, Name> = test.open(&named_config());
    assert_eq!(tree.find_all().expect("find_all"), expected);
    // Also checks the free-list left by the removals.
    let stats = tree.validate().expect("valid after reopen");
    assert_eq!(stats.entries, expected.len());
    assert!(stats.free_chunks > 0);

    tree.insert(100, name("later")).expect("insert after reopen");
    assert_eq!(tree.find_one(&100).expect("find_one"), Some(name("later")));
    tree.validate().expect("valid");
}

#[test]
fn test_reopen_empty_tree() {
    let test = TestTree::create();
    drop(test.open::<u64, u64>(&numeric_config()));

    let mut tree: BPlusTree<u64, u64> = test.open(&numeric_config());
    assert!(tree.find_all().expect("find_all").is_empty());
    assert_eq!(tree.validate().expect("valid").height, 1);
}
