//! Common helpers for end-to-end tests.

use crate::codec::FixedStr;
use crate::config::TreeConfig;

pub use crate::testing::TestTree;

/// `(i32, FixedStr<6>)` pairs: `k = 2`, `l = 2`.
pub const NAMED_CHUNK_SIZE: usize = 104;

/// `(u64, u64)` pairs: `k = 2`, `l = 2`.
pub const NUMERIC_CHUNK_SIZE: usize = 128;

pub type Name = FixedStr<6>;

#[must_use]
#[allow(clippy::expect_used)]
pub fn name(value: &str) -> Name {
    FixedStr::new(value).expect("name fits")
}

#[must_use]
pub fn named_config() -> TreeConfig {
    TreeConfig::default().with_chunk_size(NAMED_CHUNK_SIZE)
}

#[must_use]
pub fn numeric_config() -> TreeConfig {
    TreeConfig::default().with_chunk_size(NUMERIC_CHUNK_SIZE)
}
