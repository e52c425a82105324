//! In-memory backend.

use crate::{KeyValueStore, StorageResult};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Storage that lives as long as the process. Used by tests and by embedders
/// that keep no state on disk.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries.write().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageKeys;

    #[test]
    fn test_overwrite_then_delete() {
        let storage = MemoryStorage::new();

        storage.set(StorageKeys::PROFILE_CACHE, r#"{"id":"u1"}"#).unwrap();
        storage.set(StorageKeys::PROFILE_CACHE, r#"{"id":"u2"}"#).unwrap();
        assert_eq!(storage.len(), 1);
        assert_eq!(
            storage.get(StorageKeys::PROFILE_CACHE).unwrap().as_deref(),
            Some(r#"{"id":"u2"}"#)
        );

        assert!(storage.delete(StorageKeys::PROFILE_CACHE).unwrap());
        assert!(!storage.delete(StorageKeys::PROFILE_CACHE).unwrap());
        assert!(!storage.has(StorageKeys::PROFILE_CACHE).unwrap());
        assert!(storage.is_empty());
    }
}
