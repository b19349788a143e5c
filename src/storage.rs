//! Typed blob storage
//!
//! A key to blob store with atomic replace-on-persist semantics per key.
//! Values are encoded with bincode through the typed helpers; the backends
//! only ever see opaque bytes. Atomicity is per key, never across keys:
//! the repository tolerates a torn checkpoint by reconciling at load time.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

/// Blob-level storage backend. Single writer per key.
pub trait PersistentStorage: Send + Sync {
    /// Atomically replace the blob at `key`.
    fn persist_blob(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Load the blob at `key`; `Error::NotFound` when absent.
    fn load_blob(&self, key: &str) -> Result<Vec<u8>>;
}

/// Serialize `value` and atomically replace the blob at `key`.
pub fn persist<T: Serialize>(
    storage: &dyn PersistentStorage,
    value: &T,
    key: &str,
) -> Result<()> {
    let bytes = bincode::serialize(value)?;
    storage.persist_blob(key, &bytes)
}

/// Load and decode the value at `key`. Absent keys surface as `NotFound`
/// (expected on first run); undecodable blobs as `CorruptState`.
pub fn load<T: DeserializeOwned>(storage: &dyn PersistentStorage, key: &str) -> Result<T> {
    let bytes = storage.load_blob(key)?;
    bincode::deserialize(&bytes).map_err(|e| Error::CorruptState {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Directory-backed storage: one file per key, replaced atomically via a
/// temp file in the same directory.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(|c| c == '/' || c == '\\' || c == '.') {
            return Err(Error::storage(key, "invalid storage key"));
        }
        Ok(self.dir.join(key))
    }
}

impl PersistentStorage for FileStorage {
    fn persist_blob(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| Error::storage(key, e.to_string()))?;
        tmp.write_all(bytes)
            .and_then(|_| tmp.flush())
            .map_err(|e| Error::storage(key, e.to_string()))?;
        tmp.persist(&path)
            .map_err(|e| Error::storage(key, e.to_string()))?;
        debug!(key, bytes = bytes.len(), "persisted blob");
        Ok(())
    }

    fn load_blob(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(Error::storage(key, e.to_string())),
        }
    }
}

/// In-memory storage for tests and dry runs
#[derive(Default)]
pub struct MemoryStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fail_persist: std::sync::atomic::AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw blob view, for asserting byte-identical checkpoints
    pub fn blob(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(key).cloned()
    }

    /// Inject an undecodable blob
    pub fn put_raw(&self, key: &str, bytes: Vec<u8>) {
        self.blobs.lock().insert(key.to_string(), bytes);
    }

    /// Make subsequent persists fail, to exercise best-effort checkpoints
    pub fn set_fail_persist(&self, fail: bool) {
        self.fail_persist
            .store(fail, std::sync::atomic::Ordering::Relaxed);
    }
}

impl PersistentStorage for MemoryStorage {
    fn persist_blob(&self, key: &str, bytes: &[u8]) -> Result<()> {
        if self.fail_persist.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(Error::storage(key, "persist disabled"));
        }
        self.blobs.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn load_blob(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs.lock().get(key).cloned().ok_or(Error::NotFound {
            key: key.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        let value: BTreeMap<String, u64> =
            [("a".to_string(), 1u64), ("b".to_string(), 2)].into();
        persist(&storage, &value, "test_key").unwrap();
        let back: BTreeMap<String, u64> = load(&storage, "test_key").unwrap();
        assert_eq!(value, back);
    }

    #[test]
    fn test_file_storage_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let err = load::<u64>(&storage, "missing").unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_file_storage_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        persist(&storage, &1u64, "counter").unwrap();
        persist(&storage, &2u64, "counter").unwrap();
        assert_eq!(load::<u64>(&storage, "counter").unwrap(), 2);
        // no stray temp files left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_corrupt_blob_is_reported() {
        let storage = MemoryStorage::new();
        storage.put_raw("state", vec![0xff; 3]);
        let err = load::<Vec<String>>(&storage, "state").unwrap_err();
        assert!(matches!(err, Error::CorruptState { .. }));
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        assert!(storage.persist_blob("../escape", b"x").is_err());
        assert!(storage.persist_blob("", b"x").is_err());
        assert!(storage.load_blob("a/b").is_err());
    }

    #[test]
    fn test_memory_storage_failure_injection() {
        let storage = MemoryStorage::new();
        persist(&storage, &7u64, "k").unwrap();
        storage.set_fail_persist(true);
        assert!(persist(&storage, &8u64, "k").is_err());
        storage.set_fail_persist(false);
        assert_eq!(load::<u64>(&storage, "k").unwrap(), 7);
    }

    #[test]
    fn test_persist_is_deterministic() {
        let storage = MemoryStorage::new();
        let value: BTreeMap<String, Vec<u8>> =
            [("x".to_string(), vec![1, 2, 3]), ("y".to_string(), vec![4])].into();
        persist(&storage, &value, "k").unwrap();
        let first = storage.blob("k").unwrap();
        persist(&storage, &value, "k").unwrap();
        assert_eq!(storage.blob("k").unwrap(), first);
    }
}
