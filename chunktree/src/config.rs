//! Tree configuration.
//!
//! # Invariants
//!
//! - `chunk_size` is at least [`TreeConfig::MIN_CHUNK_SIZE`] and at most
//!   [`TreeConfig::MAX_CHUNK_SIZE`] once `validate()` has passed
//! - the chunk size of an existing file must match the one it was created
//!   with; it is not recorded in the file

/// Configuration for opening a tree file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Size in bytes of every chunk in the file, including the metadata chunk.
    pub chunk_size: usize,
    /// Whether chunk reads are cached in memory.
    pub cache_enabled: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            cache_enabled: true,
        }
    }
}

impl TreeConfig {
    /// Default chunk size (4KB).
    pub const DEFAULT_CHUNK_SIZE: usize = 4096;
    /// Smallest chunk that can hold the metadata record.
    pub const MIN_CHUNK_SIZE: usize = 16;
    /// Largest chunk size; entry counts are stored as u16.
    pub const MAX_CHUNK_SIZE: usize = 1 << 16;

    /// Set the chunk size.
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Enable or disable the chunk cache.
    #[must_use]
    pub const fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Check the values that do not depend on the stored types.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size < Self::MIN_CHUNK_SIZE {
            return Err(ConfigError::ChunkSizeTooSmall {
                chunk_size: self.chunk_size,
                needed: Self::MIN_CHUNK_SIZE,
            });
        }
        if self.chunk_size > Self::MAX_CHUNK_SIZE {
            return Err(ConfigError::ChunkSizeTooLarge {
                chunk_size: self.chunk_size,
                max: Self::MAX_CHUNK_SIZE,
            });
        }
        Ok(())
    }
}

/// Error returned when a configuration cannot be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The chunk cannot hold the required header or a full node.
    ChunkSizeTooSmall { chunk_size: usize, needed: usize },
    /// The chunk size exceeds what the on-disk format can address.
    ChunkSizeTooLarge { chunk_size: usize, max: usize },
    /// The derived node capacity is below the minimum of 2.
    FanoutTooSmall { node: &'static str, half: usize },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChunkSizeTooSmall { chunk_size, needed } => {
                write!(f, "chunk size {chunk_size} too small: need {needed} bytes")
            }
            Self::ChunkSizeTooLarge { chunk_size, max } => {
                write!(f, "chunk size {chunk_size} exceeds maximum {max}")
            }
            Self::FanoutTooSmall { node, half } => {
                write!(f, "{node} half-capacity {half} is below the minimum of 2")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
