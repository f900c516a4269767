//! Shared test utilities for integration tests.

use std::sync::Arc;

use tempfile::TempDir;
use tether_core::config::TetherConfig;
use tether_core::storage::{FileStore, KeyValueStore};

/// Create a file-backed store inside a fresh temp dir.
/// The TempDir must be held alive for the duration of the test.
pub fn create_file_store() -> (Arc<FileStore>, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let store = Arc::new(FileStore::open(dir.path().join("store.json")));
    (store, dir)
}

/// Same store, viewed through the trait object the credential store takes.
pub fn as_dyn(store: &Arc<FileStore>) -> Arc<dyn KeyValueStore> {
    store.clone()
}

/// Config whose storage and log directories point into `dir`.
pub fn create_test_config(dir: &TempDir) -> TetherConfig {
    let mut config = TetherConfig::default();
    config.storage.directory = dir.path().display().to_string();
    config.logging.directory = dir.path().join("logs").display().to_string();
    config
}
