//! Structural invariant checking.
//!
//! `validate` walks every node from the root and verifies:
//!
//! - chunk 0 holds the root, and an empty root is a leaf
//! - every split equals the smallest pair of its child's subtree
//! - non-root index nodes hold `k..2k` children, non-lone records `l..2l`
//!   entries, and no node is left full
//! - a non-leaf root has at least two children
//! - all records sit at the same depth and form a sorted doubly linked list
//! - every chunk is either reachable from the root or on the free-list

use std::collections::HashSet;

use crate::codec::Storable;

use super::{BPlusTree, IndexPayload, NO_NODE, Node, NodeId, Pair, ROOT_ID, TreeError};

/// Shape of a tree that passed validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Levels including the root and the records.
    pub height: usize,
    /// Root and intermediate nodes.
    pub index_nodes: usize,
    pub record_nodes: usize,
    /// Stored pairs.
    pub entries: usize,
    /// Chunks on the free-list.
    pub free_chunks: usize,
}

/// A record node as seen during the walk, in key order.
struct RecordSummary<K, V> {
    id: NodeId,
    prev: NodeId,
    next: NodeId,
    first: Pair<K, V>,
    last: Pair<K, V>,
}

struct Walk<K, V> {
    visited: HashSet<NodeId>,
    records: Vec<RecordSummary<K, V>>,
    record_depth: Option<usize>,
    stats: TreeStats,
}

fn violation(message: impl Into<String>) -> TreeError {
    TreeError::InvariantViolation(message.into())
}

impl<K, V> BPlusTree<K, V>
where
    K: Storable + Ord + Clone,
    V: Storable + Ord + Clone,
{
    /// Check every structural invariant of the stored tree.
    pub fn validate(&mut self) -> Result<TreeStats, TreeError> {
        let Node::Root(root) = self.load(ROOT_ID)?.into_inner() else {
            return Err(violation("chunk 0 does not hold the root"));
        };

        let mut walk = Walk {
            visited: HashSet::from([ROOT_ID]),
            records: Vec::new(),
            record_depth: None,
            stats: TreeStats {
                height: 1,
                index_nodes: 1,
                ..TreeStats::default()
            },
        };

        if root.children.is_empty() {
            if !root.leaf || !root.splits.is_empty() {
                return Err(violation("empty root must be a leaf without splits"));
            }
        } else {
            self.check_index_shape(ROOT_ID, &root, true)?;
            if !root.leaf && root.children.len() < 2 {
                return Err(violation("non-leaf root has a single child"));
            }
            let lone_record = root.leaf && root.children.len() == 1;
            self.check_children(&root, 1, lone_record, &mut walk)?;
        }

        Self::check_record_chain(&walk.records)?;

        let free = self.store.free_chunks()?;
        walk.stats.free_chunks = free.len();
        if let Some(id) = free.iter().find(|id| walk.visited.contains(*id)) {
            return Err(violation(format!("chunk {id} is both in the tree and free")));
        }
        let accounted = (walk.visited.len() + free.len()) as u64;
        if accounted != self.store.chunk_count() {
            return Err(violation(format!(
                "{accounted} chunks reachable or free, file has {}",
                self.store.chunk_count()
            )));
        }

        Ok(walk.stats)
    }

    fn check_index_shape(
        &self,
        id: NodeId,
        index: &IndexPayload<K, V>,
        is_root: bool,
    ) -> Result<(), TreeError> {
        let len = index.children.len();
        if index.splits.len() != len {
            return Err(violation(format!(
                "index node {id} has {len} children but {} splits",
                index.splits.len()
            )));
        }
        let max = self.layout.index_capacity() - 1;
        let min = if is_root { 1 } else { self.layout.index_half };
        if len < min || len > max {
            return Err(violation(format!(
                "index node {id} has {len} children, expected {min}..={max}"
            )));
        }
        Ok(())
    }

    fn check_children(
        &mut self,
        index: &IndexPayload<K, V>,
        depth: usize,
        lone_record: bool,
        walk: &mut Walk<K, V>,
    ) -> Result<(), TreeError> {
        for (child, split) in index.children.iter().zip(index.splits.iter()) {
            let min = self.check_node(*child, depth, index.leaf, lone_record, walk)?;
            if min != *split {
                return Err(violation(format!(
                    "split for child {child} is not its subtree minimum"
                )));
            }
        }
        Ok(())
    }

    /// Validate the subtree at `id` and return its smallest pair.
    fn check_node(
        &mut self,
        id: NodeId,
        depth: usize,
        expect_record: bool,
        lone_record: bool,
        walk: &mut Walk<K, V>,
    ) -> Result<Pair<K, V>, TreeError> {
        if !walk.visited.insert(id) {
            return Err(violation(format!("chunk {id} is referenced twice")));
        }

        match self.load(id)?.into_inner() {
            Node::Record(record) if expect_record => {
                let len = record.entries.len();
                let max = self.layout.record_capacity() - 1;
                let min = if lone_record { 1 } else { self.layout.record_half };
                if len < min || len > max {
                    return Err(violation(format!(
                        "record {id} has {len} entries, expected {min}..={max}"
                    )));
                }

                match walk.record_depth {
                    None => walk.record_depth = Some(depth),
                    Some(expected) if expected != depth => {
                        return Err(violation(format!(
                            "record {id} at depth {depth}, others at {expected}"
                        )));
                    }
                    Some(_) => {}
                }
                walk.stats.height = walk.stats.height.max(depth + 1);
                walk.stats.record_nodes += 1;
                walk.stats.entries += len;

                let entries = record.entries.as_slice();
                let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
                    return Err(violation(format!("record {id} is empty")));
                };
                walk.records.push(RecordSummary {
                    id,
                    prev: record.prev,
                    next: record.next,
                    first: first.clone(),
                    last: last.clone(),
                });
                Ok(first.clone())
            }
            Node::Intermediate(index) if !expect_record => {
                self.check_index_shape(id, &index, false)?;
                walk.stats.index_nodes += 1;
                self.check_children(&index, depth + 1, false, walk)?;
                index
                    .splits
                    .first()
                    .cloned()
                    .ok_or_else(|| violation(format!("index node {id} is empty")))
            }
            other => Err(violation(format!(
                "chunk {id} at depth {depth} holds a {:?} node",
                other.tag()
            ))),
        }
    }

    fn check_record_chain(records: &[RecordSummary<K, V>]) -> Result<(), TreeError> {
        for (i, record) in records.iter().enumerate() {
            let expected_prev = if i == 0 { NO_NODE } else { records[i - 1].id };
            let expected_next = records.get(i + 1).map_or(NO_NODE, |r| r.id);
            if record.prev != expected_prev || record.next != expected_next {
                return Err(violation(format!(
                    "record {} links ({}, {}), expected ({expected_prev}, {expected_next})",
                    record.id, record.prev, record.next
                )));
            }
            if i > 0 && records[i - 1].last >= record.first {
                return Err(violation(format!(
                    "record {} does not follow its predecessor in order",
                    record.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use crate::managed::Managed;
    use tempfile::tempdir;

    fn open_tree(dir: &tempfile::TempDir) -> BPlusTree<u64, u64> {
        BPlusTree::open_with_config(
            dir.path().join("tree.db"),
            &TreeConfig::default().with_chunk_size(128),
        )
        .expect("open tree")
    }

    #[test]
    fn test_empty_tree_stats() {
        let dir = tempdir().expect("create temp dir");
        let mut tree = open_tree(&dir);

        let stats = tree.validate().expect("valid");
        assert_eq!(
            stats,
            TreeStats {
                height: 1,
                index_nodes: 1,
                record_nodes: 0,
                entries: 0,
                free_chunks: 0,
            }
        );
    }

    #[test]
    fn test_stats_track_growth() {
        let dir = tempdir().expect("create temp dir");
        let mut tree = open_tree(&dir);

        for key in 0..3u64 {
            tree.insert(key, key).expect("insert");
        }
        let stats = tree.validate().expect("valid");
        assert_eq!(stats.height, 2);
        assert_eq!(stats.record_nodes, 1);
        assert_eq!(stats.entries, 3);

        for key in 3..60u64 {
            tree.insert(key, key).expect("insert");
        }
        let stats = tree.validate().expect("valid");
        assert!(stats.height >= 3);
        assert_eq!(stats.entries, 60);
    }

    #[test]
    fn test_detects_broken_record_link() {
        let dir = tempdir().expect("create temp dir");
        let mut tree = open_tree(&dir);

        // Three records under a leaf root.
        for key in 0..6u64 {
            tree.insert(key, key).expect("insert");
        }
        tree.validate().expect("valid before tampering");

        let Node::Root(root) = tree.load(ROOT_ID).expect("root").into_inner() else {
            panic!("chunk 0 is not the root");
        };
        assert!(root.leaf);
        let first = root.children.as_slice()[0];
        let mut record = tree.load(first).expect("record");
        if let Node::Record(payload) = &mut *record {
            payload.next = NO_NODE;
        }
        record
            .update(&mut tree.store, &tree.layout)
            .expect("write tampered record");

        assert!(matches!(
            tree.validate(),
            Err(TreeError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_detects_leaked_chunk() {
        let dir = tempdir().expect("create temp dir");
        let mut tree = open_tree(&dir);
        tree.insert(1, 1).expect("insert");

        let mut orphan = Managed::new(
            Node::<u64, u64>::record_with(&tree.layout, Pair::new(9, 9)).expect("record"),
        );
        let id = orphan.save(&mut tree.store, &tree.layout).expect("save orphan");
        assert_eq!(id, 2);

        assert!(matches!(
            tree.validate(),
            Err(TreeError::InvariantViolation(_))
        ));

        orphan.destroy(&mut tree.store).expect("destroy orphan");
        assert_eq!(tree.validate().expect("valid").free_chunks, 1);
    }
}
