//! Test that a full record node splits into two linked records.

use crate::scenarios::helpers::*;
use crate::tree::BPlusTree;

#[test]
fn test_record_splits_once_full() {
    let test = TestTree::create();
    let mut tree: BPlusTree<i32, Name> = test.open(&named_config());

    for (key, value) in [(1, "a"), (2, "b"), (3, "c")] {
        assert!(tree.insert(key, name(value)).expect("insert"));
    }
    assert_eq!(
        tree.find_all().expect("find_all"),
        vec![(1, name("a")), (2, name("b")), (3, name("c"))]
    );
    let stats = tree.validate().expect("valid");
    assert_eq!(stats.record_nodes, 1);
    assert_eq!(stats.height, 2);

    // The fourth pair fills the record and splits it in half.
    assert!(tree.insert(4, name("d")).expect("insert"));
    let stats = tree.validate().expect("valid");
    assert_eq!(stats.record_nodes, 2);
    assert_eq!(stats.height, 2);
    assert_eq!(stats.entries, 4);

    let dump = tree.dump().expect("dump");
    let lines: Vec<&str> = dump.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("[Node 0 (2/3) leaf]"));
    assert!(lines[1].starts_with("  [Record 1 (2/3)]"));
    assert!(lines[2].starts_with("  [Record 2 (2/3)]"));

    assert_eq!(
        tree.find_all().expect("find_all"),
        vec![
            (1, name("a")),
            (2, name("b")),
            (3, name("c")),
            (4, name("d"))
        ]
    );
}

#[test]
fn test_insert_into_front_after_split() {
    let test = TestTree::create();
    let mut tree: BPlusTree<i32, Name> = test.open(&named_config());

    for key in [10, 20, 30, 40] {
        tree.insert(key, name("v")).expect("insert");
    }
    // Smaller than every split, so it lands in the first record and
    // lowers the first split.
    tree.insert(-5, name("neg")).expect("insert");
    tree.validate().expect("valid");

    assert_eq!(tree.find_one(&-5).expect("find"), Some(name("neg")));
    let keys: Vec<i32> = tree
        .find_all()
        .expect("find_all")
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![-5, 10, 20, 30, 40]);
}
