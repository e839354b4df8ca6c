use std::path::PathBuf;

use tempfile::TempDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::TreeConfig;
use crate::tree::BPlusTree;

/// Route tracing output through the test harness.
///
/// Safe to call from every test; only the first call installs a subscriber.
/// Set `RUST_LOG` to see output, e.g. `RUST_LOG=chunktree=debug`.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chunktree=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A tree file in its own temporary directory, removed on drop.
pub struct TestTree {
    dir: TempDir,
}

impl TestTree {
    #[must_use]
    pub fn create() -> Self {
        init_tracing();
        #[allow(clippy::expect_used)]
        let dir = tempfile::tempdir().expect("create temp dir");
        Self { dir }
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("tree.db")
    }

    /// Open (or reopen) the tree file.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn open<K, V>(&self, config: &TreeConfig) -> BPlusTree<K, V>
    where
        K: crate::codec::Storable + Ord + Clone,
        V: crate::codec::Storable + Ord + Clone,
    {
        BPlusTree::open_with_config(self.path(), config).expect("open tree")
    }
}
