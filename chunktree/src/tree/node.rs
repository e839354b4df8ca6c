//! B+ tree node types and serialization.
//!
//! Every node fills exactly one chunk:
//!
//! - Index nodes (root and intermediate) store up to `2k` child pointers and
//!   the same number of split pairs, where `splits[i]` is the smallest pair
//!   in the subtree of `children[i]`.
//! - Record nodes store up to `2l` pairs and are doubly linked in key order.
//!
//! `k` and `l` are derived from the chunk size and the encoded pair size, so
//! a full node always fits in its chunk.

#![allow(clippy::cast_possible_truncation)]

use crate::codec::{Chunk, ChunkCodec, ChunkTag, CodecError, Storable};
use crate::config::{ConfigError, TreeConfig};
use crate::seq::{BoundedSortedVec, BoundedVec, SeqError};
use crate::store::ChunkId;

use super::TreeError;

/// Chunk index of a node.
pub type NodeId = ChunkId;

/// The root always lives in the first chunk.
pub const ROOT_ID: NodeId = 0;

/// Sentinel for a missing record neighbour. The root occupies chunk 0, so no
/// record can.
pub const NO_NODE: NodeId = 0;

/// Bit 0 of the flags byte: the index node's children are record nodes.
const LEAF_FLAG: u8 = 0x01;

/// Node header layout:
/// - `tag`: 1 byte
/// - `flags`: 1 byte
/// - `checksum`: 4 bytes (CRC32)
/// - `count`: 2 bytes (children or entries)
/// - `split_count`: 2 bytes (index nodes only)
///
/// Total: 10 bytes
const NODE_HEADER_SIZE: usize = 10;

/// Record nodes follow the header with `prev` and `next` (4 bytes each).
const RECORD_HEADER_SIZE: usize = NODE_HEADER_SIZE + 8;

/// A key and value stored together so that duplicate keys stay distinct.
///
/// Ordered by key, then by value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pair<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> Pair<K, V> {
    #[must_use]
    pub const fn new(key: K, value: V) -> Self {
        Self { key, value }
    }
}

impl<K: Storable, V: Storable> Storable for Pair<K, V> {
    const SIZE: usize = K::SIZE + V::SIZE;

    fn encode_into(&self, buf: &mut [u8]) -> Result<(), CodecError> {
        if buf.len() < Self::SIZE {
            return Err(CodecError::BufferTooSmall {
                needed: Self::SIZE,
                available: buf.len(),
            });
        }
        self.key.encode_into(&mut buf[..K::SIZE])?;
        self.value.encode_into(&mut buf[K::SIZE..Self::SIZE])
    }

    fn decode_from(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < Self::SIZE {
            return Err(CodecError::BufferTooSmall {
                needed: Self::SIZE,
                available: buf.len(),
            });
        }
        Ok(Self {
            key: K::decode_from(&buf[..K::SIZE])?,
            value: V::decode_from(&buf[K::SIZE..Self::SIZE])?,
        })
    }
}

/// Node capacities for a given chunk size and pair type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    /// Minimum children of a non-root index node (`k`).
    pub index_half: usize,
    /// Minimum entries of a non-lone record node (`l`).
    pub record_half: usize,
    /// Encoded size of one pair.
    pub pair_size: usize,
    pub chunk_size: usize,
}

impl NodeLayout {
    /// Derive `k` and `l` for pairs of `K` and `V`.
    ///
    /// `k = (C - 2·4) / (4 + P) / 2 - 1` and `l = (C - 3·4) / P / 2 - 1`,
    /// where `C` is the chunk size, `P` the pair size and 4 the size of a
    /// node id.
    pub fn for_types<K: Storable, V: Storable>(config: &TreeConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let chunk_size = config.chunk_size;
        let pair_size = Pair::<K, V>::SIZE.max(1);
        let id_size = NodeId::SIZE;

        let index_half = (chunk_size.saturating_sub(2 * id_size) / (id_size + pair_size) / 2)
            .saturating_sub(1);
        if index_half < 2 {
            return Err(ConfigError::FanoutTooSmall {
                node: "index",
                half: index_half,
            });
        }

        let record_half = (chunk_size.saturating_sub(3 * id_size) / pair_size / 2).saturating_sub(1);
        if record_half < 2 {
            return Err(ConfigError::FanoutTooSmall {
                node: "record",
                half: record_half,
            });
        }

        let layout = Self {
            index_half,
            record_half,
            pair_size,
            chunk_size,
        };
        let needed = layout.index_node_size().max(layout.record_node_size());
        if needed > chunk_size {
            return Err(ConfigError::ChunkSizeTooSmall { chunk_size, needed });
        }
        Ok(layout)
    }

    /// Maximum children (and splits) of an index node.
    #[must_use]
    pub const fn index_capacity(&self) -> usize {
        2 * self.index_half
    }

    /// Maximum entries of a record node.
    #[must_use]
    pub const fn record_capacity(&self) -> usize {
        2 * self.record_half
    }

    /// Encoded size of a full index node.
    #[must_use]
    pub const fn index_node_size(&self) -> usize {
        NODE_HEADER_SIZE + self.index_capacity() * (4 + self.pair_size)
    }

    /// Encoded size of a full record node.
    #[must_use]
    pub const fn record_node_size(&self) -> usize {
        RECORD_HEADER_SIZE + self.record_capacity() * self.pair_size
    }

    const fn splits_offset(&self) -> usize {
        NODE_HEADER_SIZE + self.index_capacity() * 4
    }
}

/// Payload of root and intermediate nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPayload<K, V> {
    /// Children are record nodes.
    pub leaf: bool,
    pub children: BoundedVec<NodeId>,
    pub splits: BoundedSortedVec<Pair<K, V>>,
}

impl<K: Ord, V: Ord> IndexPayload<K, V> {
    #[must_use]
    pub fn new(layout: &NodeLayout, leaf: bool) -> Self {
        Self {
            leaf,
            children: BoundedVec::with_capacity(layout.index_capacity()),
            splits: BoundedSortedVec::with_capacity(layout.index_capacity()),
        }
    }

    /// Slot of the child whose subtree should hold `pair`.
    ///
    /// The last child whose split is not greater than `pair`, or the first
    /// child when `pair` is smaller than every split.
    #[must_use]
    pub fn slot_for(&self, pair: &Pair<K, V>) -> usize {
        self.splits.upper_bound(pair).saturating_sub(1)
    }

    /// Child at `slot`.
    pub fn child(&self, slot: usize) -> Result<NodeId, SeqError> {
        self.children.get(slot).copied()
    }
}

/// Payload of record nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPayload<K, V> {
    pub prev: NodeId,
    pub next: NodeId,
    pub entries: BoundedSortedVec<Pair<K, V>>,
}

impl<K: Ord, V: Ord> RecordPayload<K, V> {
    #[must_use]
    pub fn new(layout: &NodeLayout) -> Self {
        Self {
            prev: NO_NODE,
            next: NO_NODE,
            entries: BoundedSortedVec::with_capacity(layout.record_capacity()),
        }
    }
}

/// A tree node. The variant is persisted as the chunk tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node<K, V> {
    Root(IndexPayload<K, V>),
    Intermediate(IndexPayload<K, V>),
    Record(RecordPayload<K, V>),
}

impl<K: Ord + Clone, V: Ord + Clone> Node<K, V> {
    /// The root of an empty tree.
    #[must_use]
    pub fn empty_root(layout: &NodeLayout) -> Self {
        Self::Root(IndexPayload::new(layout, true))
    }

    /// A record node holding a single pair.
    pub fn record_with(layout: &NodeLayout, pair: Pair<K, V>) -> Result<Self, SeqError> {
        let mut record = RecordPayload::new(layout);
        record.entries.insert(pair)?;
        Ok(Self::Record(record))
    }

    #[must_use]
    pub const fn tag(&self) -> ChunkTag {
        match self {
            Self::Root(_) => ChunkTag::Root,
            Self::Intermediate(_) => ChunkTag::Intermediate,
            Self::Record(_) => ChunkTag::Record,
        }
    }

    #[must_use]
    pub const fn is_record(&self) -> bool {
        matches!(self, Self::Record(_))
    }

    /// Number of children (index nodes) or entries (record nodes).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Root(index) | Self::Intermediate(index) => index.children.len(),
            Self::Record(record) => record.entries.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn half_limit(&self, layout: &NodeLayout) -> usize {
        match self {
            Self::Root(_) | Self::Intermediate(_) => layout.index_half,
            Self::Record(_) => layout.record_half,
        }
    }

    #[must_use]
    pub fn should_split(&self, layout: &NodeLayout) -> bool {
        self.len() >= 2 * self.half_limit(layout)
    }

    #[must_use]
    pub fn should_merge(&self, layout: &NodeLayout) -> bool {
        self.len() < self.half_limit(layout)
    }

    /// Smallest pair in the node's subtree.
    #[must_use]
    pub fn lower_bound(&self) -> Option<&Pair<K, V>> {
        match self {
            Self::Root(index) | Self::Intermediate(index) => index.splits.first(),
            Self::Record(record) => record.entries.first(),
        }
    }

    /// Clone of [`Self::lower_bound`], or an error for an empty node.
    pub fn min_pair(&self) -> Result<Pair<K, V>, TreeError> {
        self.lower_bound()
            .cloned()
            .ok_or_else(|| TreeError::Corruption("empty node has no lower bound".to_string()))
    }

    /// Move the upper half of a full non-root node into a new right sibling.
    ///
    /// `id` is this node's chunk; the sibling's `prev` points at it. The
    /// caller saves the sibling and fixes up `next` links.
    pub fn split_upper_half(&mut self, id: NodeId, layout: &NodeLayout) -> Result<Self, TreeError> {
        match self {
            Self::Intermediate(index) => {
                let half = layout.index_half;
                Ok(Self::Intermediate(IndexPayload {
                    leaf: index.leaf,
                    children: index.children.split_off(half)?,
                    splits: index.splits.split_off(half)?,
                }))
            }
            Self::Record(record) => Ok(Self::Record(RecordPayload {
                prev: id,
                next: record.next,
                entries: record.entries.split_off(layout.record_half)?,
            })),
            Self::Root(_) => Err(TreeError::Corruption(
                "root must be split in place".to_string(),
            )),
        }
    }

    /// Move the last element of `prev` to the front of this node.
    pub fn take_last_from(&mut self, prev: &mut Self) -> Result<(), TreeError> {
        match (self, prev) {
            (Self::Record(node), Self::Record(prev)) => {
                node.entries.insert(prev.entries.pop()?)?;
            }
            (Self::Intermediate(node), Self::Intermediate(prev)) => {
                node.children.unshift(prev.children.pop()?)?;
                node.splits.insert(prev.splits.pop()?)?;
            }
            (node, prev) => return Err(mismatch(node, prev)),
        }
        Ok(())
    }

    /// Move the first element of `next` to the end of this node.
    pub fn take_first_from(&mut self, next: &mut Self) -> Result<(), TreeError> {
        match (self, next) {
            (Self::Record(node), Self::Record(next)) => {
                node.entries.insert(next.entries.shift()?)?;
            }
            (Self::Intermediate(node), Self::Intermediate(next)) => {
                node.children.push(next.children.shift()?)?;
                node.splits.insert(next.splits.shift()?)?;
            }
            (node, next) => return Err(mismatch(node, next)),
        }
        Ok(())
    }

    /// Move everything from the left sibling `prev` into this node.
    ///
    /// Record nodes adopt `prev`'s left neighbour.
    pub fn absorb_prev(&mut self, prev: &mut Self) -> Result<(), TreeError> {
        match (self, prev) {
            (Self::Record(node), Self::Record(prev)) => {
                node.entries.prepend(&mut prev.entries)?;
                node.prev = prev.prev;
            }
            (Self::Intermediate(node), Self::Intermediate(prev)) => {
                node.children.prepend(&mut prev.children)?;
                node.splits.prepend(&mut prev.splits)?;
            }
            (node, prev) => return Err(mismatch(node, prev)),
        }
        Ok(())
    }

    /// Move everything from the right sibling `next` into this node.
    ///
    /// Record nodes adopt `next`'s right neighbour.
    pub fn absorb_next(&mut self, next: &mut Self) -> Result<(), TreeError> {
        match (self, next) {
            (Self::Record(node), Self::Record(next)) => {
                node.entries.append(&mut next.entries)?;
                node.next = next.next;
            }
            (Self::Intermediate(node), Self::Intermediate(next)) => {
                node.children.append(&mut next.children)?;
                node.splits.append(&mut next.splits)?;
            }
            (node, next) => return Err(mismatch(node, next)),
        }
        Ok(())
    }
}

fn mismatch<K: Ord + Clone, V: Ord + Clone>(node: &Node<K, V>, sibling: &Node<K, V>) -> TreeError {
    TreeError::Corruption(format!(
        "cannot merge {:?} node with {:?} sibling",
        node.tag(),
        sibling.tag()
    ))
}

impl<K, V> ChunkCodec for Node<K, V>
where
    K: Storable + Ord,
    V: Storable + Ord,
{
    type Layout = NodeLayout;

    fn encode(&self, layout: &NodeLayout, chunk: &mut Chunk) -> Result<(), CodecError> {
        let pair_size = Pair::<K, V>::SIZE;
        match self {
            Self::Root(index) | Self::Intermediate(index) => {
                let capacity = layout.index_capacity();
                if index.children.len() > capacity || index.splits.len() > capacity {
                    return Err(CodecError::Sequence(SeqError::Overflow));
                }
                chunk.check_range(0, layout.index_node_size())?;

                let tag = if matches!(self, Self::Root(_)) {
                    ChunkTag::Root
                } else {
                    ChunkTag::Intermediate
                };
                chunk.write_u8(0, tag as u8);
                chunk.write_u8(1, if index.leaf { LEAF_FLAG } else { 0 });
                chunk.write_u16(6, index.children.len() as u16);
                chunk.write_u16(8, index.splits.len() as u16);

                for (i, child) in index.children.iter().enumerate() {
                    chunk.write_u32(NODE_HEADER_SIZE + i * 4, *child);
                }
                let base = layout.splits_offset();
                for (i, split) in index.splits.iter().enumerate() {
                    chunk.write_value(base + i * pair_size, split)?;
                }
            }
            Self::Record(record) => {
                if record.entries.len() > layout.record_capacity() {
                    return Err(CodecError::Sequence(SeqError::Overflow));
                }
                chunk.check_range(0, layout.record_node_size())?;

                chunk.write_u8(0, ChunkTag::Record as u8);
                chunk.write_u8(1, 0);
                chunk.write_u16(6, record.entries.len() as u16);
                chunk.write_u16(8, 0);
                chunk.write_u32(NODE_HEADER_SIZE, record.prev);
                chunk.write_u32(NODE_HEADER_SIZE + 4, record.next);

                for (i, entry) in record.entries.iter().enumerate() {
                    chunk.write_value(RECORD_HEADER_SIZE + i * pair_size, entry)?;
                }
            }
        }
        chunk.seal();
        Ok(())
    }

    fn decode(layout: &NodeLayout, chunk: &Chunk) -> Result<Self, CodecError> {
        let tag = chunk.tag()?;
        if !matches!(
            tag,
            ChunkTag::Root | ChunkTag::Intermediate | ChunkTag::Record
        ) {
            return Err(CodecError::InvalidTag(tag as u8));
        }
        chunk.check_range(0, NODE_HEADER_SIZE)?;
        chunk.verify_checksum()?;

        let pair_size = Pair::<K, V>::SIZE;
        let count = usize::from(chunk.read_u16(6));

        if tag == ChunkTag::Record {
            let capacity = layout.record_capacity();
            if count > capacity {
                return Err(CodecError::Sequence(SeqError::Overflow));
            }
            chunk.check_range(0, layout.record_node_size())?;
            let entries = (0..count)
                .map(|i| chunk.read_value(RECORD_HEADER_SIZE + i * pair_size))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Self::Record(RecordPayload {
                prev: chunk.read_u32(NODE_HEADER_SIZE),
                next: chunk.read_u32(NODE_HEADER_SIZE + 4),
                entries: BoundedSortedVec::try_from_sorted(entries, capacity)?,
            }));
        }

        let capacity = layout.index_capacity();
        let split_count = usize::from(chunk.read_u16(8));
        if count > capacity || split_count > capacity {
            return Err(CodecError::Sequence(SeqError::Overflow));
        }
        chunk.check_range(0, layout.index_node_size())?;

        let children = (0..count)
            .map(|i| chunk.read_u32(NODE_HEADER_SIZE + i * 4))
            .collect();
        let base = layout.splits_offset();
        let splits = (0..split_count)
            .map(|i| chunk.read_value(base + i * pair_size))
            .collect::<Result<Vec<_>, _>>()?;

        let payload = IndexPayload {
            leaf: chunk.read_u8(1) & LEAF_FLAG != 0,
            children: BoundedVec::try_from_vec(children, capacity)?,
            splits: BoundedSortedVec::try_from_sorted(splits, capacity)?,
        };
        Ok(if tag == ChunkTag::Root {
            Self::Root(payload)
        } else {
            Self::Intermediate(payload)
        })
    }
}
