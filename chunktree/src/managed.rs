//! Values bound to a chunk in a [`ChunkStore`].
//!
//! A [`Managed`] value is either unsaved (no chunk yet) or bound to the chunk
//! it was loaded from or saved into. The store is passed to every call, so a
//! managed value never borrows it for longer than one operation.

use std::ops::{Deref, DerefMut};

use crate::codec::{Chunk, ChunkCodec, CodecError};
use crate::store::{ChunkId, ChunkStore, StoreError};

/// An in-memory value paired with the chunk that persists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Managed<T> {
    id: Option<ChunkId>,
    value: T,
}

impl<T> Managed<T> {
    /// Wrap a value that has not been stored yet.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self { id: None, value }
    }

    /// Wrap a value that belongs in chunk `id`, without touching the store.
    #[must_use]
    pub const fn bound(id: ChunkId, value: T) -> Self {
        Self {
            id: Some(id),
            value,
        }
    }

    #[must_use]
    pub const fn id(&self) -> Option<ChunkId> {
        self.id
    }

    /// The bound chunk, or `NotSaved`.
    pub const fn require_id(&self) -> Result<ChunkId, ManagedError> {
        match self.id {
            Some(id) => Ok(id),
            None => Err(ManagedError::NotSaved),
        }
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: ChunkCodec> Managed<T> {
    /// Load the value stored in chunk `id`.
    pub fn get(store: &mut ChunkStore, layout: &T::Layout, id: ChunkId) -> Result<Self, ManagedError> {
        let len = store.chunk_size();
        let bytes = store.read_chunk(id, len)?;
        let value = T::decode(layout, &Chunk::from_bytes(bytes))?;
        Ok(Self {
            id: Some(id),
            value,
        })
    }

    /// Allocate a chunk for an unsaved value and write it.
    pub fn save(&mut self, store: &mut ChunkStore, layout: &T::Layout) -> Result<ChunkId, ManagedError> {
        if let Some(id) = self.id {
            return Err(ManagedError::AlreadySaved(id));
        }
        let chunk = self.encode(store, layout)?;
        let id = store.allocate(chunk.as_bytes())?;
        self.id = Some(id);
        Ok(id)
    }

    /// Write the current value back to its chunk.
    pub fn update(&self, store: &mut ChunkStore, layout: &T::Layout) -> Result<(), ManagedError> {
        let id = self.require_id()?;
        let chunk = self.encode(store, layout)?;
        store.write_chunk(id, chunk.as_bytes())?;
        Ok(())
    }

    /// Free the chunk and unbind the value.
    pub fn destroy(&mut self, store: &mut ChunkStore) -> Result<(), ManagedError> {
        let id = self.require_id()?;
        store.free(id)?;
        self.id = None;
        Ok(())
    }

    fn encode(&self, store: &ChunkStore, layout: &T::Layout) -> Result<Chunk, ManagedError> {
        let mut chunk = Chunk::new(store.chunk_size());
        self.value.encode(layout, &mut chunk)?;
        Ok(chunk)
    }
}

impl<T> Deref for Managed<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T> DerefMut for Managed<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

/// Errors that can occur when loading or persisting a managed value.
#[derive(Debug)]
pub enum ManagedError {
    /// `save` on a value that already has a chunk.
    AlreadySaved(ChunkId),
    /// `update` or `destroy` on a value without a chunk.
    NotSaved,
    /// Chunk store error.
    Store(StoreError),
    /// The value could not be encoded or decoded.
    Codec(CodecError),
}

impl std::fmt::Display for ManagedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadySaved(id) => write!(f, "value is already saved in chunk {id}"),
            Self::NotSaved => write!(f, "value has not been saved"),
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
        }
    }
}

impl std::error::Error for ManagedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::AlreadySaved(_) | Self::NotSaved => None,
        }
    }
}

impl From<StoreError> for ManagedError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<CodecError> for ManagedError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}
