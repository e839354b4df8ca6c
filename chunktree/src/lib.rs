// Layers, bottom up:
// 1. `seq`: bounded (and sorted) sequences that back node payloads
// 2. `codec`: fixed-width encoding of values and whole chunks, with checksums
// 3. `store`: a file of equal-size chunks with a free-list and a read cache
// 4. `managed`: a value bound to the chunk that persists it
// 5. `tree`: the B+ tree, one node per chunk, root at chunk 0
//
// Every mutation writes through to the file; the cache only serves reads.

pub mod codec;
pub mod config;
pub mod managed;
pub mod seq;
pub mod store;
pub mod tree;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod testing;

pub use codec::{Chunk, ChunkCodec, ChunkTag, CodecError, FixedStr, Storable};
pub use config::{ConfigError, TreeConfig};
pub use managed::{Managed, ManagedError};
pub use seq::{BoundedSortedVec, BoundedVec, SeqError};
pub use store::{ChunkId, ChunkStore, FileMetadata, StoreError, StoreStats};
pub use tree::{BPlusTree, Node, NodeLayout, Pair, TreeError, TreeStats};
