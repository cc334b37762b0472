//! Key-value storage for client state (persisted auth session).
//!
//! Business logic receives a [`KeyValueStorage`] instead of reaching for a
//! process-global store, so tests can swap in [`MemoryStorage`].

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dashmap::DashMap;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Minimal string key-value store.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

/// In-memory storage. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.entries.clear();
        Ok(())
    }
}

/// JSON-file backed storage. Every write rewrites the whole file through a
/// uniquely named temporary sibling and a rename.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, entries)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn modify(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let mut entries = self.read_all()?;
        f(&mut entries);
        self.write_all(&entries)
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.modify(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.modify(|entries| {
            entries.remove(key);
        })
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(storage: &dyn KeyValueStorage) {
        assert_eq!(storage.get("a").unwrap(), None);
        storage.set("a", "1").unwrap();
        storage.set("b", "2").unwrap();
        assert_eq!(storage.get("a").unwrap().as_deref(), Some("1"));
        storage.set("a", "3").unwrap();
        assert_eq!(storage.get("a").unwrap().as_deref(), Some("3"));
        storage.remove("a").unwrap();
        assert_eq!(storage.get("a").unwrap(), None);
        assert_eq!(storage.get("b").unwrap().as_deref(), Some("2"));
        storage.clear().unwrap();
        assert_eq!(storage.get("b").unwrap(), None);
    }

    #[test]
    fn memory_storage_behaves_as_map() {
        exercise(&MemoryStorage::new());
    }

    #[test]
    fn file_storage_behaves_as_map() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FileStorage::new(dir.path().join("nested").join("state.json")));
    }

    #[test]
    fn file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        FileStorage::new(&path).set("token", "abc").unwrap();
        assert_eq!(
            FileStorage::new(&path).get("token").unwrap().as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn concurrent_writers_do_not_share_a_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let storage = FileStorage::new(path);
                    for n in 0..20 {
                        storage.set(&format!("w{i}"), &n.to_string()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Writers race on content but every write lands as a whole file.
        let entries = FileStorage::new(&path).read_all().unwrap();
        assert!(!entries.is_empty());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|name| name != "state.json")
            .collect();
        assert!(leftovers.is_empty(), "stray temp files: {leftovers:?}");
    }

    #[test]
    fn corrupt_file_is_an_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            FileStorage::new(&path).get("x"),
            Err(StorageError::Encoding(_))
        ));
    }
}
