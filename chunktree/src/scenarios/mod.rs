//! End-to-end tests against a real tree file.
//!
//! Each file covers one scenario. Randomized runs use a fixed seed so a
//! failure reproduces exactly.

#![cfg(test)]

mod helpers;

mod test_bulk_default_config;
mod test_cache_idempotent;
mod test_cascade;
mod test_duplicate_keys;
mod test_free_list_reuse;
mod test_model;
mod test_remove_all;
mod test_reopen;
mod test_split_record;
