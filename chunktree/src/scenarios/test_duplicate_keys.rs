//! Test several values stored under one key.

use crate::scenarios::helpers::*;
use crate::tree::BPlusTree;

#[test]
fn test_two_values_under_one_key() {
    let test = TestTree::create();
    let mut tree: BPlusTree<i32, Name> = test.open(&named_config());

    tree.insert(5, name("x")).expect("insert");
    tree.insert(5, name("y")).expect("insert");

    assert_eq!(
        tree.find_many(&5).expect("find_many"),
        vec![name("x"), name("y")]
    );
    let one = tree.find_one(&5).expect("find_one").expect("value present");
    assert!(one == name("x") || one == name("y"));

    assert!(tree.includes(&5, &name("x")).expect("includes"));
    assert!(tree.includes(&5, &name("y")).expect("includes"));
    assert!(!tree.includes(&5, &name("z")).expect("includes"));
    assert!(tree.find_many(&6).expect("find_many").is_empty());
}

#[test]
fn test_duplicates_span_several_records() {
    let test = TestTree::create();
    let mut tree: BPlusTree<u64, u64> = test.open(&numeric_config());

    // Interleave a long run of 7s with neighbouring keys so the run is
    // split across records and index nodes.
    for value in 0..25u64 {
        tree.insert(7, value).expect("insert 7");
        if value < 12 {
            tree.insert(value, 0).expect("insert neighbour");
            tree.insert(100 - value, 0).expect("insert neighbour");
        }
    }
    let stats = tree.validate().expect("valid");
    assert!(stats.record_nodes > 5);

    let expected: Vec<u64> = (0..25).collect();
    assert_eq!(tree.find_many(&7).expect("find_many"), expected);
    assert_eq!(tree.find_one(&7).expect("find_one"), Some(0));
    assert_eq!(tree.find_many(&6).expect("find_many"), vec![0]);
    assert!(tree.find_many(&50).expect("find_many").is_empty());

    // Removing from the middle of the run keeps the rest reachable.
    for value in (0..25u64).step_by(2) {
        assert!(tree.remove(&7, &value).expect("remove"));
        tree.validate().expect("valid");
    }
    let expected: Vec<u64> = (0..25).filter(|v| v % 2 == 1).collect();
    assert_eq!(tree.find_many(&7).expect("find_many"), expected);
    assert_eq!(tree.find_one(&7).expect("find_one"), Some(1));
}
