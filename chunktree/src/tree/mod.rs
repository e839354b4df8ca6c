//! A file-backed B+ tree that allows duplicate keys.
//!
//! Keys and values are stored together as [`Pair`]s and ordered by key, then
//! value, so several values may share a key while every stored pair stays
//! unique. Every node is one chunk of a [`ChunkStore`]; the root is always
//! chunk 0.
//!
//! # Structure
//!
//! - The root and intermediate nodes are index nodes: `children[i]` points at
//!   a subtree whose smallest pair is `splits[i]`.
//! - Index nodes flagged `leaf` point at record nodes.
//! - Record nodes hold the pairs and form a doubly linked list in key order.
//!
//! # Usage
//!
//! ```no_run
//! use chunktree::{BPlusTree, FixedStr};
//!
//! let mut tree: BPlusTree<u32, FixedStr<16>> = BPlusTree::open("index.db")?;
//! tree.insert(1, FixedStr::new("one")?)?;
//! tree.insert(1, FixedStr::new("uno")?)?;
//!
//! let values = tree.find_many(&1)?;
//! assert_eq!(values.len(), 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod node;
mod validate;

use std::fmt::Write as _;
use std::marker::PhantomData;
use std::path::Path;

use tracing::{debug, info};

use crate::codec::{CodecError, Storable};
use crate::config::{ConfigError, TreeConfig};
use crate::managed::{Managed, ManagedError};
use crate::seq::SeqError;
use crate::store::{ChunkStore, StoreError, StoreStats};

pub use node::{IndexPayload, NO_NODE, Node, NodeId, NodeLayout, Pair, ROOT_ID, RecordPayload};
pub use validate::TreeStats;

type TreeNode<K, V> = Managed<Node<K, V>>;

/// A B+ tree stored in a chunked file.
pub struct BPlusTree<K, V> {
    store: ChunkStore,
    layout: NodeLayout,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> BPlusTree<K, V>
where
    K: Storable + Ord + Clone,
    V: Storable + Ord + Clone,
{
    /// Open or create a tree with the default configuration.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TreeError> {
        Self::open_with_config(path, &TreeConfig::default())
    }

    /// Open or create a tree.
    ///
    /// The chunk size must match the one the file was created with.
    pub fn open_with_config(path: impl AsRef<Path>, config: &TreeConfig) -> Result<Self, TreeError> {
        let layout = NodeLayout::for_types::<K, V>(config)?;
        let store = ChunkStore::open(path.as_ref(), config, |store| {
            Self::init_root(store, &layout)
        })?;

        info!(
            index_half = layout.index_half,
            record_half = layout.record_half,
            "opened tree"
        );

        Ok(Self {
            store,
            layout,
            _marker: PhantomData,
        })
    }

    fn init_root(store: &mut ChunkStore, layout: &NodeLayout) -> Result<(), TreeError> {
        let mut root = Managed::new(Node::<K, V>::empty_root(layout));
        let id = root.save(store, layout)?;
        if id != ROOT_ID {
            return Err(TreeError::Corruption(format!(
                "root allocated at chunk {id} instead of {ROOT_ID}"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub const fn layout(&self) -> NodeLayout {
        self.layout
    }

    #[must_use]
    pub const fn store_stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Number of chunks currently cached.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.store.cache_len()
    }

    /// Drop every cached chunk. Later reads go to the file.
    pub fn clear_cache(&mut self) {
        self.store.clear_cache();
    }

    /// Flush the file to disk.
    pub fn sync(&mut self) -> Result<(), TreeError> {
        self.store.sync()?;
        Ok(())
    }

    /// Insert a pair.
    ///
    /// Returns `false` and leaves the tree untouched if the exact pair is
    /// already stored.
    pub fn insert(&mut self, key: K, value: V) -> Result<bool, TreeError> {
        let pair = Pair::new(key, value);
        let mut root = self.load(ROOT_ID)?;
        if !self.insert_into(&pair, &mut root)? {
            return Ok(false);
        }
        if root.should_split(&self.layout) {
            self.split_root(&mut root)?;
        }
        root.update(&mut self.store, &self.layout)?;
        Ok(true)
    }

    /// Remove a pair.
    ///
    /// Returns `false` if the pair is not stored.
    pub fn remove(&mut self, key: &K, value: &V) -> Result<bool, TreeError> {
        let pair = Pair::new(key.clone(), value.clone());
        let mut root = self.load(ROOT_ID)?;
        if !self.remove_from(&pair, &mut root)? {
            return Ok(false);
        }
        self.collapse_root(&mut root)?;
        root.update(&mut self.store, &self.layout)?;
        Ok(true)
    }

    /// Some value stored under `key`, the smallest one.
    pub fn find_one(&mut self, key: &K) -> Result<Option<V>, TreeError> {
        self.find_one_in(key, ROOT_ID)
    }

    /// Every value stored under `key`, in ascending order.
    pub fn find_many(&mut self, key: &K) -> Result<Vec<V>, TreeError> {
        self.find_many_in(key, ROOT_ID)
    }

    /// Every stored pair in ascending order.
    pub fn find_all(&mut self) -> Result<Vec<(K, V)>, TreeError> {
        let mut id = ROOT_ID;
        let first = loop {
            match self.load(id)?.into_inner() {
                Node::Root(index) | Node::Intermediate(index) => {
                    if index.children.is_empty() {
                        return Ok(Vec::new());
                    }
                    id = index.child(0)?;
                }
                Node::Record(record) => break record,
            }
        };

        let mut pairs = Vec::new();
        let mut record = first;
        loop {
            pairs.extend(
                record
                    .entries
                    .iter()
                    .map(|pair| (pair.key.clone(), pair.value.clone())),
            );
            if record.next == NO_NODE {
                return Ok(pairs);
            }
            record = self.load_record(record.next)?;
        }
    }

    /// Whether the exact pair is stored.
    pub fn includes(&mut self, key: &K, value: &V) -> Result<bool, TreeError> {
        let pair = Pair::new(key.clone(), value.clone());
        let mut id = ROOT_ID;
        loop {
            match self.load(id)?.into_inner() {
                Node::Root(index) | Node::Intermediate(index) => {
                    if index.children.is_empty() {
                        return Ok(false);
                    }
                    id = index.child(index.slot_for(&pair))?;
                }
                Node::Record(record) => return Ok(record.entries.includes(&pair)),
            }
        }
    }

    fn load(&mut self, id: NodeId) -> Result<TreeNode<K, V>, TreeError> {
        Ok(Managed::get(&mut self.store, &self.layout, id)?)
    }

    fn load_record(&mut self, id: NodeId) -> Result<RecordPayload<K, V>, TreeError> {
        match self.load(id)?.into_inner() {
            Node::Record(record) => Ok(record),
            other => Err(TreeError::Corruption(format!(
                "expected record at chunk {id}, found {:?}",
                other.tag()
            ))),
        }
    }

    fn insert_into(&mut self, pair: &Pair<K, V>, node: &mut TreeNode<K, V>) -> Result<bool, TreeError> {
        let index = match &mut **node {
            Node::Record(record) => {
                if record.entries.includes(pair) {
                    return Ok(false);
                }
                record.entries.insert(pair.clone())?;
                return Ok(true);
            }
            Node::Root(index) | Node::Intermediate(index) => index,
        };

        if index.children.is_empty() {
            if !index.leaf {
                return Err(TreeError::Corruption(
                    "empty index node is not a leaf".to_string(),
                ));
            }
            let mut record = Managed::new(Node::record_with(&self.layout, pair.clone())?);
            let id = record.save(&mut self.store, &self.layout)?;
            index.children.push(id)?;
            index.splits.insert(pair.clone())?;
            return Ok(true);
        }

        let slot = index.slot_for(pair);
        let mut child = self.load(index.child(slot)?)?;
        if !self.insert_into(pair, &mut child)? {
            return Ok(false);
        }

        let lower = child.min_pair()?;
        index.splits.replace_at(slot, lower)?;
        if child.should_split(&self.layout) {
            self.split(&mut child, index, slot)?;
        }
        child.update(&mut self.store, &self.layout)?;
        Ok(true)
    }

    /// Split a full non-root node, adding its new right sibling to `parent`.
    fn split(
        &mut self,
        node: &mut TreeNode<K, V>,
        parent: &mut IndexPayload<K, V>,
        slot: usize,
    ) -> Result<(), TreeError> {
        let id = node.require_id()?;
        debug!(node = id, len = node.len(), "splitting node");

        let mut sibling = Managed::new(node.split_upper_half(id, &self.layout)?);
        let sibling_id = sibling.save(&mut self.store, &self.layout)?;

        if let Node::Record(record) = &mut **node {
            if record.next != NO_NODE {
                let mut after = self.load(record.next)?;
                set_prev(&mut after, sibling_id)?;
                after.update(&mut self.store, &self.layout)?;
            }
            record.next = sibling_id;
        }

        parent.children.insert(slot + 1, sibling_id)?;
        parent.splits.insert(sibling.min_pair()?)?;
        Ok(())
    }

    /// Split a full root into two intermediate children. The root keeps chunk 0.
    fn split_root(&mut self, root: &mut TreeNode<K, V>) -> Result<(), TreeError> {
        let Node::Root(index) = &mut **root else {
            return Err(TreeError::Corruption("chunk 0 is not the root".to_string()));
        };
        debug!(len = index.children.len(), "splitting root");

        let half = self.layout.index_half;
        let right = IndexPayload {
            leaf: index.leaf,
            children: index.children.split_off(half)?,
            splits: index.splits.split_off(half)?,
        };
        let left = IndexPayload {
            leaf: index.leaf,
            children: index.children.split_off(0)?,
            splits: index.splits.split_off(0)?,
        };

        let mut new_splits = Vec::with_capacity(2);
        for payload in [left, right] {
            let mut child = Managed::new(Node::Intermediate(payload));
            let id = child.save(&mut self.store, &self.layout)?;
            index.children.push(id)?;
            new_splits.push(child.min_pair()?);
        }
        for split in new_splits {
            index.splits.insert(split)?;
        }
        index.leaf = false;
        Ok(())
    }

    fn remove_from(&mut self, pair: &Pair<K, V>, node: &mut TreeNode<K, V>) -> Result<bool, TreeError> {
        let index = match &mut **node {
            Node::Record(record) => {
                return match record.entries.remove(pair) {
                    Ok(_) => Ok(true),
                    Err(SeqError::NotFound) => Ok(false),
                    Err(e) => Err(e.into()),
                };
            }
            Node::Root(index) | Node::Intermediate(index) => index,
        };

        if index.children.is_empty() {
            return Ok(false);
        }

        let slot = index.slot_for(pair);
        let mut child = self.load(index.child(slot)?)?;
        if !self.remove_from(pair, &mut child)? {
            return Ok(false);
        }

        if child.is_empty() {
            debug!(node = child.require_id()?, "destroying empty node");
            child.destroy(&mut self.store)?;
            index.children.remove_at(slot)?;
            index.splits.remove_at(slot)?;
            return Ok(true);
        }

        let lower = child.min_pair()?;
        index.splits.replace_at(slot, lower)?;
        if child.should_merge(&self.layout) {
            self.merge(&mut child, index, slot)?;
        }
        child.update(&mut self.store, &self.layout)?;
        Ok(true)
    }

    /// Rebalance an underfull non-root node with an adjacent sibling.
    ///
    /// The previous sibling is preferred. If it has spare elements one is
    /// borrowed; otherwise the sibling is absorbed into `node` and destroyed.
    /// A lone record node is left alone.
    fn merge(
        &mut self,
        node: &mut TreeNode<K, V>,
        parent: &mut IndexPayload<K, V>,
        slot: usize,
    ) -> Result<(), TreeError> {
        let id = node.require_id()?;
        let has_prev = slot > 0;
        let has_next = slot + 1 < parent.children.len();

        if !has_prev && !has_next {
            if node.is_record() {
                return Ok(());
            }
            return Err(TreeError::Corruption(format!(
                "index node {id} has no sibling to merge with"
            )));
        }

        let sibling_slot = if has_prev { slot - 1 } else { slot + 1 };
        let mut sibling = self.load(parent.child(sibling_slot)?)?;
        let sibling_id = sibling.require_id()?;
        debug!(
            node = id,
            sibling = sibling_id,
            len = node.len(),
            sibling_len = sibling.len(),
            "merging node"
        );

        if sibling.len() > sibling.half_limit(&self.layout) {
            if has_prev {
                node.take_last_from(&mut sibling)?;
                parent.splits.replace_at(slot, node.min_pair()?)?;
            } else {
                node.take_first_from(&mut sibling)?;
                parent
                    .splits
                    .replace_at(sibling_slot, sibling.min_pair()?)?;
            }
            sibling.update(&mut self.store, &self.layout)?;
            return Ok(());
        }

        if has_prev {
            node.absorb_prev(&mut sibling)?;
            if let Node::Record(record) = &**node {
                if record.prev != NO_NODE {
                    let mut before = self.load(record.prev)?;
                    set_next(&mut before, id)?;
                    before.update(&mut self.store, &self.layout)?;
                }
            }
            // The node now starts with the sibling's smallest pair, so it
            // takes over the sibling's split.
            parent.children.remove_at(sibling_slot)?;
            parent.splits.remove_at(slot)?;
        } else {
            node.absorb_next(&mut sibling)?;
            if let Node::Record(record) = &**node {
                if record.next != NO_NODE {
                    let mut after = self.load(record.next)?;
                    set_prev(&mut after, id)?;
                    after.update(&mut self.store, &self.layout)?;
                }
            }
            parent.children.remove_at(sibling_slot)?;
            parent.splits.remove_at(sibling_slot)?;
        }
        sibling.destroy(&mut self.store)?;
        Ok(())
    }

    /// Restore the root's shape after a removal.
    ///
    /// A non-leaf root with a single child takes over that child's payload;
    /// a root without children becomes an empty leaf.
    fn collapse_root(&mut self, root: &mut TreeNode<K, V>) -> Result<(), TreeError> {
        loop {
            let Node::Root(index) = &mut **root else {
                return Err(TreeError::Corruption("chunk 0 is not the root".to_string()));
            };
            if index.children.is_empty() {
                index.leaf = true;
                return Ok(());
            }
            if index.leaf || index.children.len() > 1 {
                return Ok(());
            }

            let mut only = self.load(index.child(0)?)?;
            debug!(child = only.require_id()?, "collapsing root into its only child");
            only.destroy(&mut self.store)?;
            match only.into_inner() {
                Node::Intermediate(payload) => **root = Node::Root(payload),
                other => {
                    return Err(TreeError::Corruption(format!(
                        "non-leaf root has a {:?} child",
                        other.tag()
                    )));
                }
            }
        }
    }

    /// Children of `index` that may hold `key`.
    ///
    /// The first is the last child starting below `key`; the second is the
    /// next child when it starts exactly at `key`.
    fn candidates(key: &K, index: &IndexPayload<K, V>) -> Result<Option<(NodeId, Option<NodeId>)>, TreeError> {
        if index.children.is_empty() {
            return Ok(None);
        }
        let first_ge = index.splits.partition_point(|split| split.key < *key);
        let before = index.child(first_ge.saturating_sub(1))?;
        let at = match index.splits.as_slice().get(first_ge) {
            Some(split) if first_ge > 0 && split.key == *key => Some(index.child(first_ge)?),
            _ => None,
        };
        Ok(Some((before, at)))
    }

    fn find_one_in(&mut self, key: &K, id: NodeId) -> Result<Option<V>, TreeError> {
        match self.load(id)?.into_inner() {
            Node::Root(index) | Node::Intermediate(index) => {
                let Some((before, at)) = Self::candidates(key, &index)? else {
                    return Ok(None);
                };
                if let Some(value) = self.find_one_in(key, before)? {
                    return Ok(Some(value));
                }
                match at {
                    Some(at) => self.find_one_in(key, at),
                    None => Ok(None),
                }
            }
            Node::Record(record) => {
                let ix = record.entries.partition_point(|e| e.key < *key);
                Ok(record
                    .entries
                    .as_slice()
                    .get(ix)
                    .filter(|e| e.key == *key)
                    .map(|e| e.value.clone()))
            }
        }
    }

    fn find_many_in(&mut self, key: &K, id: NodeId) -> Result<Vec<V>, TreeError> {
        match self.load(id)?.into_inner() {
            Node::Root(index) | Node::Intermediate(index) => {
                let Some((before, at)) = Self::candidates(key, &index)? else {
                    return Ok(Vec::new());
                };
                let values = self.find_many_in(key, before)?;
                match at {
                    Some(at) if values.is_empty() => self.find_many_in(key, at),
                    _ => Ok(values),
                }
            }
            Node::Record(record) => {
                let start = record.entries.partition_point(|e| e.key < *key);
                if start >= record.entries.len() {
                    return Ok(Vec::new());
                }
                self.collect_values(key, record, start)
            }
        }
    }

    /// Collect values under `key` from `start` onwards, following `next`
    /// links while the run of matching pairs reaches the end of a record.
    fn collect_values(
        &mut self,
        key: &K,
        mut record: RecordPayload<K, V>,
        mut start: usize,
    ) -> Result<Vec<V>, TreeError> {
        let mut values = Vec::new();
        loop {
            let entries = &record.entries.as_slice()[start..];
            let matched = entries.iter().take_while(|e| e.key == *key).count();
            values.extend(entries[..matched].iter().map(|e| e.value.clone()));
            if matched < entries.len() || record.next == NO_NODE {
                return Ok(values);
            }
            record = self.load_record(record.next)?;
            start = 0;
        }
    }
}

impl<K, V> BPlusTree<K, V>
where
    K: Storable + Ord + Clone + std::fmt::Debug,
    V: Storable + Ord + Clone + std::fmt::Debug,
{
    /// Render every node, depth first, one per line.
    pub fn dump(&mut self) -> Result<String, TreeError> {
        let mut out = String::new();
        self.dump_node(ROOT_ID, 0, &mut out)?;
        Ok(out)
    }

    fn dump_node(&mut self, id: NodeId, depth: usize, out: &mut String) -> Result<(), TreeError> {
        let node = self.load(id)?.into_inner();
        let indent = "  ".repeat(depth);
        match node {
            Node::Root(index) | Node::Intermediate(index) => {
                let _ = write!(
                    out,
                    "{indent}[Node {id} ({}/{}){}]",
                    index.children.len(),
                    self.layout.index_capacity() - 1,
                    if index.leaf { " leaf" } else { "" }
                );
                for (split, child) in index.splits.iter().zip(index.children.iter()) {
                    let _ = write!(out, " ({:?}, {:?}) {child}", split.key, split.value);
                }
                out.push('\n');
                for child in index.children.iter() {
                    self.dump_node(*child, depth + 1, out)?;
                }
            }
            Node::Record(record) => {
                let _ = write!(
                    out,
                    "{indent}[Record {id} ({}/{})]",
                    record.entries.len(),
                    self.layout.record_capacity() - 1
                );
                for entry in record.entries.iter() {
                    let _ = write!(out, " ({:?}, {:?})", entry.key, entry.value);
                }
                out.push('\n');
            }
        }
        Ok(())
    }
}

fn set_prev<K, V>(node: &mut TreeNode<K, V>, prev: NodeId) -> Result<(), TreeError> {
    match &mut **node {
        Node::Record(record) => {
            record.prev = prev;
            Ok(())
        }
        _ => Err(TreeError::Corruption(format!(
            "record link points at non-record chunk {:?}",
            node.id()
        ))),
    }
}

fn set_next<K, V>(node: &mut TreeNode<K, V>, next: NodeId) -> Result<(), TreeError> {
    match &mut **node {
        Node::Record(record) => {
            record.next = next;
            Ok(())
        }
        _ => Err(TreeError::Corruption(format!(
            "record link points at non-record chunk {:?}",
            node.id()
        ))),
    }
}

/// Errors that can occur during tree operations.
#[derive(Debug)]
pub enum TreeError {
    /// The configuration cannot hold nodes of this key and value type.
    Config(ConfigError),
    /// Chunk store error.
    Store(StoreError),
    /// Managed node error.
    Managed(ManagedError),
    /// Node encoding error.
    Codec(CodecError),
    /// A node's bounded sequence was misused.
    Sequence(SeqError),
    /// Stored nodes contradict the tree's structure.
    Corruption(String),
    /// `validate` found a broken invariant.
    InvariantViolation(String),
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Managed(e) => write!(f, "managed node error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::Sequence(e) => write!(f, "sequence error: {e}"),
            Self::Corruption(msg) => write!(f, "corrupt tree: {msg}"),
            Self::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Managed(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Sequence(e) => Some(e),
            Self::Corruption(_) | Self::InvariantViolation(_) => None,
        }
    }
}

impl From<ConfigError> for TreeError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<StoreError> for TreeError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<ManagedError> for TreeError {
    fn from(e: ManagedError) -> Self {
        Self::Managed(e)
    }
}

impl From<CodecError> for TreeError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<SeqError> for TreeError {
    fn from(e: SeqError) -> Self {
        Self::Sequence(e)
    }
}
