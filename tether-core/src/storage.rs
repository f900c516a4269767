//! Durable key-value storage.
//!
//! The credential store and the TTL cache sit on top of the `KeyValueStore`
//! trait. `FileStore` persists a flat JSON object next to the config;
//! `MemoryStore` backs tests and ephemeral sessions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::keys;
use crate::error::{TetherError, TetherResult};
use crate::paths;

/// Synchronous string key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. `Ok(None)` when the key is absent.
    fn get(&self, key: &str) -> TetherResult<Option<String>>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> TetherResult<()>;

    /// Remove a key. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> TetherResult<()>;
}

/// In-memory store. Contents are lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> TetherResult<Option<String>> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> TetherResult<()> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> TetherResult<()> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }
}

/// File-backed store holding a single JSON object.
///
/// Every write rewrites the file through a temp file + rename so a crash
/// never leaves a half-written store behind. On unix the file is 0o600.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A missing file starts empty. An unreadable or corrupt file is logged
    /// and also starts empty rather than failing the caller.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = Self::load(&path);
        debug!("file store opened at {} ({} keys)", path.display(), entries.len());
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> BTreeMap<String, String> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                warn!("failed to read store file {}: {e}", path.display());
                return BTreeMap::new();
            }
        };

        match serde_json::from_str(&data) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("failed to parse store file {}: {e}", path.display());
                BTreeMap::new()
            }
        }
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> TetherResult<()> {
        if let Some(parent) = self.path.parent() {
            paths::ensure_private_dir(parent)?;
        }

        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600));
        }

        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> TetherResult<Option<String>> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> TetherResult<()> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> TetherResult<()> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

fn poisoned() -> TetherError {
    TetherError::Storage("store lock poisoned".into())
}

/// A cached value with the time it was written.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    value: serde_json::Value,
    /// Milliseconds since the Unix epoch.
    stored_at: i64,
}

/// Time-bounded JSON cache over any `KeyValueStore`.
///
/// Entries live under the `cache.` key prefix. Freshness is decided at read
/// time by the caller-supplied TTL, so one entry can serve readers with
/// different tolerances.
#[derive(Clone)]
pub struct TtlCache {
    store: Arc<dyn KeyValueStore>,
}

impl TtlCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Return the cached value if it was stored less than `ttl` ago.
    ///
    /// Stale entries are removed. Storage and decode failures read as a miss.
    pub fn get_cache(&self, key: &str, ttl: Duration) -> Option<serde_json::Value> {
        let storage_key = cache_key(key);
        let raw = match self.store.get(&storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("cache read failed for {key}: {e}");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("discarding corrupt cache entry {key}: {e}");
                let _ = self.store.remove(&storage_key);
                return None;
            }
        };

        let age_ms = chrono::Utc::now().timestamp_millis() - entry.stored_at;
        if age_ms >= 0 && (age_ms as u128) < ttl.as_millis() {
            Some(entry.value)
        } else {
            debug!("cache entry {key} expired ({age_ms}ms old)");
            let _ = self.store.remove(&storage_key);
            None
        }
    }

    /// Store `value` under `key`, stamped with the current time.
    pub fn set_cache(&self, key: &str, value: &serde_json::Value) -> TetherResult<()> {
        let entry = CacheEntry {
            value: value.clone(),
            stored_at: chrono::Utc::now().timestamp_millis(),
        };
        self.store.set(&cache_key(key), &serde_json::to_string(&entry)?)
    }

    /// Drop a cached entry.
    pub fn invalidate(&self, key: &str) -> TetherResult<()> {
        self.store.remove(&cache_key(key))
    }
}

fn cache_key(key: &str) -> String {
    format!("{}{key}", keys::CACHE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").unwrap(), None);
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        store.remove("a").unwrap();
        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = FileStore::open(&path);
        store.set("token", "abc").unwrap();
        drop(store);

        let reopened = FileStore::open(&path);
        assert_eq!(reopened.get("token").unwrap().as_deref(), Some("abc"));
    }

    #[test]
    fn test_file_store_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileStore::open(&path);
        assert_eq!(store.get("anything").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(FileStore::open(&path).get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_ttl_cache_hit_and_expiry() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let cache = TtlCache::new(store.clone());

        cache.set_cache("profile", &json!({"name": "ada"})).unwrap();
        assert_eq!(
            cache.get_cache("profile", Duration::from_secs(60)),
            Some(json!({"name": "ada"}))
        );

        // Backdate the entry by two minutes.
        let stale = CacheEntry {
            value: json!(1),
            stored_at: chrono::Utc::now().timestamp_millis() - 120_000,
        };
        store
            .set("cache.profile", &serde_json::to_string(&stale).unwrap())
            .unwrap();
        assert_eq!(cache.get_cache("profile", Duration::from_secs(60)), None);
        assert_eq!(store.get("cache.profile").unwrap(), None);
    }

    #[test]
    fn test_ttl_cache_corrupt_entry_is_a_miss() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store.set("cache.x", "garbage").unwrap();
        let cache = TtlCache::new(store);
        assert_eq!(cache.get_cache("x", Duration::from_secs(60)), None);
    }
}
