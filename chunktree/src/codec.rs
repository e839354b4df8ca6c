//! Fixed-size binary encoding for chunk contents.
//!
//! Everything stored in a chunk has a size known up front: scalar keys and
//! values implement [`Storable`], and whole chunk payloads implement
//! [`ChunkCodec`] against a [`Chunk`] buffer sized to the store's chunk size.
//! All integers are little-endian.

#![allow(clippy::cast_possible_truncation)]

use crate::seq::SeqError;

/// Offset of the CRC32 checksum in every checksummed chunk.
pub const CHECKSUM_OFFSET: usize = 2;

/// Tag byte stored at offset 0 of every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkTag {
    /// File metadata (free-list head or next unused chunk)
    Metadata = 0x01,
    /// Reclaimed chunk on the free-list
    Free = 0x02,
    /// Tree root (always chunk 0)
    Root = 0x03,
    /// Non-root index node
    Intermediate = 0x04,
    /// Record (leaf) node
    Record = 0x05,
}

impl TryFrom<u8> for ChunkTag {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Metadata),
            0x02 => Ok(Self::Free),
            0x03 => Ok(Self::Root),
            0x04 => Ok(Self::Intermediate),
            0x05 => Ok(Self::Record),
            _ => Err(value),
        }
    }
}

/// A value with a fixed encoded width.
pub trait Storable: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Write the value into the first `SIZE` bytes of `buf`.
    fn encode_into(&self, buf: &mut [u8]) -> Result<(), CodecError>;

    /// Read a value from the first `SIZE` bytes of `buf`.
    fn decode_from(buf: &[u8]) -> Result<Self, CodecError>;
}

macro_rules! storable_int {
    ($($ty:ty),*) => {
        $(
            impl Storable for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn encode_into(&self, buf: &mut [u8]) -> Result<(), CodecError> {
                    check_len(buf.len(), Self::SIZE)?;
                    buf[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                    Ok(())
                }

                fn decode_from(buf: &[u8]) -> Result<Self, CodecError> {
                    check_len(buf.len(), Self::SIZE)?;
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(&buf[..Self::SIZE]);
                    Ok(Self::from_le_bytes(bytes))
                }
            }
        )*
    };
}

storable_int!(u8, u16, u32, u64, i32, i64);

impl<const N: usize> Storable for [u8; N] {
    const SIZE: usize = N;

    fn encode_into(&self, buf: &mut [u8]) -> Result<(), CodecError> {
        check_len(buf.len(), N)?;
        buf[..N].copy_from_slice(self);
        Ok(())
    }

    fn decode_from(buf: &[u8]) -> Result<Self, CodecError> {
        check_len(buf.len(), N)?;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&buf[..N]);
        Ok(bytes)
    }
}

const fn check_len(available: usize, needed: usize) -> Result<(), CodecError> {
    if available < needed {
        return Err(CodecError::BufferTooSmall { needed, available });
    }
    Ok(())
}

/// A string of at most `N` bytes stored in a fixed-width slot.
///
/// Layout: a u16 byte length followed by `N` bytes, zero padded.
/// Ordering is byte-wise, which matches `str` ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedStr<const N: usize> {
    value: String,
}

impl<const N: usize> FixedStr<N> {
    /// Wrap `value`, failing if it is longer than `N` bytes.
    pub fn new(value: impl Into<String>) -> Result<Self, CodecError> {
        let value = value.into();
        if value.len() > N || N > usize::from(u16::MAX) {
            return Err(CodecError::StringTooLong {
                len: value.len(),
                max: N,
            });
        }
        Ok(Self { value })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.value
    }
}

impl<const N: usize> TryFrom<&str> for FixedStr<N> {
    type Error = CodecError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<const N: usize> std::fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

impl<const N: usize> Storable for FixedStr<N> {
    const SIZE: usize = 2 + N;

    fn encode_into(&self, buf: &mut [u8]) -> Result<(), CodecError> {
        check_len(buf.len(), Self::SIZE)?;
        let bytes = self.value.as_bytes();
        if bytes.len() > N {
            return Err(CodecError::StringTooLong {
                len: bytes.len(),
                max: N,
            });
        }
        buf[0..2].copy_from_slice(&(bytes.len() as u16).to_le_bytes());
        buf[2..2 + bytes.len()].copy_from_slice(bytes);
        buf[2 + bytes.len()..Self::SIZE].fill(0);
        Ok(())
    }

    fn decode_from(buf: &[u8]) -> Result<Self, CodecError> {
        check_len(buf.len(), Self::SIZE)?;
        let len = usize::from(u16::from_le_bytes([buf[0], buf[1]]));
        if len > N {
            return Err(CodecError::StringTooLong { len, max: N });
        }
        let value = std::str::from_utf8(&buf[2..2 + len])
            .map_err(|_| CodecError::InvalidUtf8)?
            .to_string();
        Ok(Self { value })
    }
}

/// A raw chunk buffer whose size is fixed when it is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    data: Box<[u8]>,
}

impl Chunk {
    /// Create a zeroed chunk of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Wrap raw bytes read from the store.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: bytes.into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data.into_vec()
    }

    /// Fail unless `offset..offset + len` lies inside the chunk.
    pub fn check_range(&self, offset: usize, len: usize) -> Result<(), CodecError> {
        check_len(self.data.len(), offset + len)
    }

    #[must_use]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
    }

    #[must_use]
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    pub fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[offset..offset + 8]);
        u64::from_le_bytes(bytes)
    }

    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Decode a [`Storable`] value at `offset`.
    pub fn read_value<T: Storable>(&self, offset: usize) -> Result<T, CodecError> {
        self.check_range(offset, T::SIZE)?;
        T::decode_from(&self.data[offset..offset + T::SIZE])
    }

    /// Encode a [`Storable`] value at `offset`.
    pub fn write_value<T: Storable>(&mut self, offset: usize, value: &T) -> Result<(), CodecError> {
        self.check_range(offset, T::SIZE)?;
        value.encode_into(&mut self.data[offset..offset + T::SIZE])
    }

    /// Read the tag byte at offset 0.
    pub fn tag(&self) -> Result<ChunkTag, CodecError> {
        self.check_range(0, 1)?;
        ChunkTag::try_from(self.data[0]).map_err(CodecError::InvalidTag)
    }

    /// CRC32 of the chunk with the checksum field treated as zero.
    #[must_use]
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[..CHECKSUM_OFFSET]);
        hasher.update(&[0u8; 4]);
        hasher.update(&self.data[CHECKSUM_OFFSET + 4..]);
        hasher.finalize()
    }

    /// Store the current checksum in the header.
    pub fn seal(&mut self) {
        let checksum = self.compute_checksum();
        self.write_u32(CHECKSUM_OFFSET, checksum);
    }

    /// Compare the stored checksum against the contents.
    pub fn verify_checksum(&self) -> Result<(), CodecError> {
        let stored = self.read_u32(CHECKSUM_OFFSET);
        let computed = self.compute_checksum();
        if stored != computed {
            return Err(CodecError::ChecksumMismatch { stored, computed });
        }
        Ok(())
    }
}

/// A payload that occupies exactly one chunk.
///
/// `Layout` carries the runtime capacities needed to place fields, since the
/// chunk size is chosen when the store is opened.
pub trait ChunkCodec: Sized {
    type Layout;

    /// Serialize into `chunk`, which is zeroed and one chunk long.
    fn encode(&self, layout: &Self::Layout, chunk: &mut Chunk) -> Result<(), CodecError>;

    /// Deserialize from a full chunk.
    fn decode(layout: &Self::Layout, chunk: &Chunk) -> Result<Self, CodecError>;
}

/// Errors that can occur while encoding or decoding chunk contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer is shorter than the encoded form.
    BufferTooSmall { needed: usize, available: usize },
    /// Unknown or unexpected chunk tag.
    InvalidTag(u8),
    /// Stored checksum does not match the contents.
    ChecksumMismatch { stored: u32, computed: u32 },
    /// A decoded sequence violated its bounds or ordering.
    Sequence(SeqError),
    /// A string exceeds its fixed capacity.
    StringTooLong { len: usize, max: usize },
    /// Stored string bytes are not UTF-8.
    InvalidUtf8,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BufferTooSmall { needed, available } => {
                write!(f, "buffer too small: need {needed} bytes, have {available}")
            }
            Self::InvalidTag(tag) => write!(f, "invalid chunk tag: {tag:#04x}"),
            Self::ChecksumMismatch { stored, computed } => write!(
                f,
                "checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
            ),
            Self::Sequence(e) => write!(f, "sequence error: {e}"),
            Self::StringTooLong { len, max } => {
                write!(f, "string of {len} bytes exceeds capacity {max}")
            }
            Self::InvalidUtf8 => write!(f, "stored string is not valid UTF-8"),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sequence(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SeqError> for CodecError {
    fn from(e: SeqError) -> Self {
        Self::Sequence(e)
    }
}
