//! Chunked file storage.
//!
//! The file is an array of equally sized chunks. The first chunk on disk
//! holds the file metadata and is not addressable by [`ChunkId`]; chunk `i`
//! lives at byte offset `(i + 1) * chunk_size`.
//!
//! # Free-list
//!
//! Freed chunks form an intrusive stack. The metadata record is either
//! `{ next: first never-used chunk, has_next: false }` or
//! `{ next: head of the free-list, has_next: true }`. Freeing a chunk copies
//! the current metadata record into it (tagged [`ChunkTag::Free`]) and points
//! the metadata at it; allocating pops the head and restores the record it
//! carried. The bottom of the stack always carries the high-water mark.
//!
//! # Cache
//!
//! Reads are cached per chunk until [`ChunkStore::clear_cache`]. Writes go
//! straight to the file and refresh the cache; a write whose bytes equal the
//! cached copy is skipped.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{info, trace};

use crate::codec::{Chunk, ChunkTag, CodecError};
use crate::config::{ConfigError, TreeConfig};

/// Index of an allocatable chunk.
pub type ChunkId = u32;

/// The allocator state stored in the metadata chunk.
///
/// Layout:
/// - `tag`: 1 byte ([`ChunkTag::Metadata`], or [`ChunkTag::Free`] inside a freed chunk)
/// - `has_next`: 1 byte
/// - reserved: 6 bytes
/// - `next`: 8 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    pub next: u64,
    pub has_next: bool,
}

impl FileMetadata {
    /// Encoded size in bytes.
    pub const SIZE: usize = 16;

    /// Metadata of a freshly created file.
    pub const EMPTY: Self = Self {
        next: 0,
        has_next: false,
    };

    fn encode(self, tag: ChunkTag, chunk: &mut Chunk) {
        chunk.write_u8(0, tag as u8);
        chunk.write_u8(1, u8::from(self.has_next));
        chunk.write_u64(8, self.next);
    }

    fn decode(chunk: &Chunk, expected: ChunkTag) -> Result<Self, StoreError> {
        chunk.check_range(0, Self::SIZE)?;
        let tag = chunk.tag()?;
        if tag != expected {
            return Err(StoreError::Corruption(format!(
                "expected {expected:?} chunk, found {tag:?}"
            )));
        }
        let has_next = match chunk.read_u8(1) {
            0 => false,
            1 => true,
            other => {
                return Err(StoreError::Corruption(format!(
                    "invalid has_next flag {other}"
                )));
            }
        };
        Ok(Self {
            next: chunk.read_u64(8),
            has_next,
        })
    }
}

/// I/O counters, mostly useful to tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Chunks read from the file.
    pub disk_reads: u64,
    /// Chunks written to the file (metadata included).
    pub disk_writes: u64,
    /// Writes skipped because the bytes matched the cache.
    pub skipped_writes: u64,
    /// Reads served from the cache.
    pub cache_hits: u64,
}

/// A chunked file with a free-list allocator and a read cache.
pub struct ChunkStore {
    file: File,
    chunk_size: usize,
    /// Number of allocatable chunks physically present in the file.
    chunk_count: u64,
    metadata: FileMetadata,
    cache: HashMap<ChunkId, Box<[u8]>>,
    cache_enabled: bool,
    stats: StoreStats,
}

impl ChunkStore {
    /// Open the file at `path`, creating it if it does not exist.
    ///
    /// On creation the metadata chunk is written and `initializer` is run
    /// once so that the caller can lay down its fixed chunks. Existing files
    /// are opened as-is.
    pub fn open<F, E>(path: &Path, config: &TreeConfig, initializer: F) -> Result<Self, E>
    where
        F: FnOnce(&mut Self) -> Result<(), E>,
        E: From<StoreError>,
    {
        config.validate().map_err(StoreError::Config)?;

        if !path.exists() {
            let mut store = Self::create(path, config)?;
            initializer(&mut store)?;
            return Ok(store);
        }

        Ok(Self::open_existing(path, config)?)
    }

    fn create(path: &Path, config: &TreeConfig) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let mut store = Self {
            file,
            chunk_size: config.chunk_size,
            chunk_count: 0,
            metadata: FileMetadata::EMPTY,
            cache: HashMap::new(),
            cache_enabled: config.cache_enabled,
            stats: StoreStats::default(),
        };
        store.persist_metadata()?;

        info!(path = %path.display(), chunk_size = config.chunk_size, "created chunk file");
        Ok(store)
    }

    fn open_existing(path: &Path, config: &TreeConfig) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let len = file.metadata()?.len();
        let chunk_size = config.chunk_size as u64;
        if len == 0 || len % chunk_size != 0 {
            return Err(StoreError::Corruption(format!(
                "file length {len} is not a positive multiple of chunk size {chunk_size}"
            )));
        }

        let mut buf = vec![0u8; config.chunk_size];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;
        let metadata = FileMetadata::decode(&Chunk::from_bytes(buf), ChunkTag::Metadata)?;

        let chunk_count = len / chunk_size - 1;
        info!(
            path = %path.display(),
            chunk_size = config.chunk_size,
            chunk_count,
            "opened chunk file"
        );

        Ok(Self {
            file,
            chunk_size: config.chunk_size,
            chunk_count,
            metadata,
            cache: HashMap::new(),
            cache_enabled: config.cache_enabled,
            stats: StoreStats::default(),
        })
    }

    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of allocatable chunks in the file, free or in use.
    #[must_use]
    pub const fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    #[must_use]
    pub const fn metadata(&self) -> FileMetadata {
        self.metadata
    }

    #[must_use]
    pub const fn stats(&self) -> StoreStats {
        self.stats
    }

    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Read the first `len` bytes of chunk `index`.
    pub fn read_chunk(&mut self, index: ChunkId, len: usize) -> Result<Vec<u8>, StoreError> {
        self.check_len(len)?;
        self.check_index(index)?;

        if let Some(cached) = self.cache.get(&index) {
            self.stats.cache_hits += 1;
            return Ok(cached[..len].to_vec());
        }

        let mut buf = vec![0u8; self.chunk_size];
        self.file.seek(SeekFrom::Start(self.offset(index)))?;
        self.file.read_exact(&mut buf)?;
        self.stats.disk_reads += 1;

        let out = buf[..len].to_vec();
        if self.cache_enabled {
            self.cache.insert(index, buf.into_boxed_slice());
        }
        Ok(out)
    }

    /// Overwrite chunk `index`, zero-padding `bytes` to the chunk size.
    pub fn write_chunk(&mut self, index: ChunkId, bytes: &[u8]) -> Result<(), StoreError> {
        self.check_len(bytes.len())?;
        self.check_index(index)?;
        self.write_padded(index, bytes)
    }

    /// Store `bytes` in a free chunk and return its index.
    pub fn allocate(&mut self, bytes: &[u8]) -> Result<ChunkId, StoreError> {
        self.check_len(bytes.len())?;

        let meta = self.metadata;
        let index = ChunkId::try_from(meta.next).map_err(|_| {
            StoreError::Corruption(format!("chunk index {} out of range", meta.next))
        })?;

        if meta.has_next {
            let head = Chunk::from_bytes(self.read_chunk(index, FileMetadata::SIZE)?);
            let restored = FileMetadata::decode(&head, ChunkTag::Free)?;
            self.write_padded(index, bytes)?;
            self.set_metadata(restored)?;
        } else {
            if meta.next != self.chunk_count {
                return Err(StoreError::Corruption(format!(
                    "next unused chunk {} does not match chunk count {}",
                    meta.next, self.chunk_count
                )));
            }
            self.chunk_count += 1;
            self.write_padded(index, bytes)?;
            self.set_metadata(FileMetadata {
                next: meta.next + 1,
                has_next: false,
            })?;
        }

        trace!(chunk = index, reused = meta.has_next, "allocated chunk");
        Ok(index)
    }

    /// Return chunk `index` to the free-list.
    pub fn free(&mut self, index: ChunkId) -> Result<(), StoreError> {
        self.check_index(index)?;

        let current = Chunk::from_bytes(self.read_chunk(index, 1)?);
        if current.tag() == Ok(ChunkTag::Free) {
            return Err(StoreError::Corruption(format!(
                "chunk {index} is already free"
            )));
        }

        let mut link = Chunk::new(FileMetadata::SIZE);
        self.metadata.encode(ChunkTag::Free, &mut link);
        self.write_padded(index, link.as_bytes())?;
        self.set_metadata(FileMetadata {
            next: u64::from(index),
            has_next: true,
        })?;
        self.cache.remove(&index);

        trace!(chunk = index, "freed chunk");
        Ok(())
    }

    /// Walk the free-list from its head.
    ///
    /// Also checks that the list ends at the high-water mark and contains no
    /// cycle.
    pub fn free_chunks(&mut self) -> Result<Vec<ChunkId>, StoreError> {
        let mut chunks = Vec::new();
        let mut meta = self.metadata;
        while meta.has_next {
            if chunks.len() as u64 >= self.chunk_count {
                return Err(StoreError::Corruption(
                    "free-list is longer than the file".to_string(),
                ));
            }
            let index = ChunkId::try_from(meta.next).map_err(|_| {
                StoreError::Corruption(format!("chunk index {} out of range", meta.next))
            })?;
            let link = Chunk::from_bytes(self.read_chunk(index, FileMetadata::SIZE)?);
            meta = FileMetadata::decode(&link, ChunkTag::Free)?;
            chunks.push(index);
        }
        if meta.next != self.chunk_count {
            return Err(StoreError::Corruption(format!(
                "free-list ends at chunk {} but the file has {} chunks",
                meta.next, self.chunk_count
            )));
        }
        Ok(chunks)
    }

    /// Drop every cached chunk.
    pub fn clear_cache(&mut self) {
        trace!(entries = self.cache.len(), "cleared chunk cache");
        self.cache.clear();
    }

    /// Flush file contents to disk.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        self.file.sync_all()?;
        Ok(())
    }

    fn offset(&self, index: ChunkId) -> u64 {
        (u64::from(index) + 1) * self.chunk_size as u64
    }

    const fn check_len(&self, len: usize) -> Result<(), StoreError> {
        if len > self.chunk_size {
            return Err(StoreError::ChunkTooLarge {
                len,
                chunk_size: self.chunk_size,
            });
        }
        Ok(())
    }

    fn check_index(&self, index: ChunkId) -> Result<(), StoreError> {
        if u64::from(index) >= self.chunk_count {
            return Err(StoreError::OutOfBounds {
                index,
                chunk_count: self.chunk_count,
            });
        }
        Ok(())
    }

    fn write_padded(&mut self, index: ChunkId, bytes: &[u8]) -> Result<(), StoreError> {
        let mut buf = vec![0u8; self.chunk_size];
        buf[..bytes.len()].copy_from_slice(bytes);

        if self
            .cache
            .get(&index)
            .is_some_and(|cached| **cached == *buf)
        {
            self.stats.skipped_writes += 1;
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(self.offset(index)))?;
        self.file.write_all(&buf)?;
        self.stats.disk_writes += 1;

        if self.cache_enabled {
            self.cache.insert(index, buf.into_boxed_slice());
        }
        Ok(())
    }

    fn set_metadata(&mut self, metadata: FileMetadata) -> Result<(), StoreError> {
        if self.metadata == metadata {
            return Ok(());
        }
        self.metadata = metadata;
        self.persist_metadata()
    }

    fn persist_metadata(&mut self) -> Result<(), StoreError> {
        let mut chunk = Chunk::new(self.chunk_size);
        self.metadata.encode(ChunkTag::Metadata, &mut chunk);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(chunk.as_bytes())?;
        self.stats.disk_writes += 1;
        Ok(())
    }
}

/// Errors that can occur during chunk file operations.
#[derive(Debug)]
pub enum StoreError {
    /// I/O error from the underlying file.
    Io(std::io::Error),
    /// The configuration cannot describe a valid file.
    Config(ConfigError),
    /// The file contents contradict the allocator's invariants.
    Corruption(String),
    /// A payload is larger than one chunk.
    ChunkTooLarge { len: usize, chunk_size: usize },
    /// A chunk index past the end of the file.
    OutOfBounds { index: ChunkId, chunk_count: u64 },
    /// Metadata bytes could not be decoded.
    Codec(CodecError),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Corruption(msg) => write!(f, "corrupt chunk file: {msg}"),
            Self::ChunkTooLarge { len, chunk_size } => {
                write!(f, "payload of {len} bytes exceeds chunk size {chunk_size}")
            }
            Self::OutOfBounds { index, chunk_count } => {
                write!(f, "chunk {index} out of bounds (file has {chunk_count} chunks)")
            }
            Self::Codec(e) => write!(f, "codec error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Corruption(_) | Self::ChunkTooLarge { .. } | Self::OutOfBounds { .. } => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<CodecError> for StoreError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}
