//! Persistent string-store capability.
//!
//! The TTL store is written against this trait rather than any concrete
//! storage so the core runs identically over an in-memory map in tests and
//! a directory of files on a real host. The surface deliberately mirrors a
//! browser-style key-value store: writes can fail when the quota is
//! exhausted, everything else is infallible.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Why a write was rejected.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreWriteError {
    /// The backing store is out of space.
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// Any other write failure.
    #[error("storage write failed: {0}")]
    Other(String),
}

/// A string-keyed persistent store.
pub trait PersistentStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get_item(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`, replacing any previous value.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreWriteError>;

    /// Remove the value stored under `key`. Removing a missing key is a no-op.
    fn remove_item(&self, key: &str);

    /// All keys currently present in the store.
    fn keys(&self) -> Vec<String>;
}

/// In-memory store with an optional byte quota.
///
/// The quota counts key and value bytes together, which is enough to
/// exercise the evict-and-retry path in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes once `quota_bytes` would be exceeded.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Current usage in bytes (keys + values).
    pub fn usage_bytes(&self) -> usize {
        let entries = self.entries.lock().expect("store lock poisoned");
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl PersistentStore for MemoryStore {
    fn get_item(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().expect("store lock poisoned");
        entries.get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreWriteError> {
        let mut entries = self.entries.lock().expect("store lock poisoned");
        if let Some(quota) = self.quota_bytes {
            let current: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if current + key.len() + value.len() > quota {
                return Err(StoreWriteError::QuotaExceeded);
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        let mut entries = self.entries.lock().expect("store lock poisoned");
        entries.remove(key);
    }

    fn keys(&self) -> Vec<String> {
        let entries = self.entries.lock().expect("store lock poisoned");
        entries.keys().cloned().collect()
    }
}

/// Directory-backed store: one file per key.
///
/// Keys map to `{key}.entry` files; path separators in keys are replaced so
/// a key can never escape the store directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("{safe}.entry"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl PersistentStore for FileStore {
    fn get_item(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(key)).ok()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreWriteError> {
        std::fs::write(self.path_for(key), value)
            .map_err(|e| StoreWriteError::Other(e.to_string()))
    }

    fn remove_item(&self, key: &str) {
        let _ = std::fs::remove_file(self.path_for(key));
    }

    fn keys(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| {
                let path = e.ok()?.path();
                if path.extension().and_then(|s| s.to_str()) != Some("entry") {
                    return None;
                }
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(String::from)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get_item("a").is_none());

        store.set_item("a", "1").unwrap();
        assert_eq!(store.get_item("a").as_deref(), Some("1"));

        store.remove_item("a");
        assert!(store.get_item("a").is_none());
    }

    #[test]
    fn memory_store_enforces_quota() {
        let store = MemoryStore::with_quota(10);
        store.set_item("ab", "cdef").unwrap(); // 6 bytes

        let err = store.set_item("xy", "zzzzzz").unwrap_err(); // would be 14
        assert!(matches!(err, StoreWriteError::QuotaExceeded));

        // Replacing an existing key is charged against the new value only.
        store.set_item("ab", "cdefgh").unwrap(); // 8 bytes
    }

    #[test]
    fn memory_store_lists_keys() {
        let store = MemoryStore::new();
        store.set_item("one", "1").unwrap();
        store.set_item("two", "2").unwrap();

        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys, vec!["one", "two"]);
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        store.set_item("routes", "{\"a\":1}").unwrap();
        assert_eq!(store.get_item("routes").as_deref(), Some("{\"a\":1}"));
        assert_eq!(store.keys(), vec!["routes"]);

        store.remove_item("routes");
        assert!(store.get_item("routes").is_none());
        assert!(store.keys().is_empty());
    }

    #[test]
    fn file_store_sanitizes_path_separators() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        store.set_item("kmb_app_stop_routes_A/B", "x").unwrap();
        assert_eq!(store.get_item("kmb_app_stop_routes_A/B").as_deref(), Some("x"));

        // No file escaped the store directory.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
