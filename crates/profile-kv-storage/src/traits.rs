use crate::StorageResult;

/// String-keyed, string-valued store with `localStorage` semantics.
///
/// Values are opaque to the backend; callers serialize their own payloads.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Insert or overwrite `key`.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove `key`, reporting whether anything was there.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    fn has(&self, key: &str) -> StorageResult<bool> {
        self.get(key).map(|value| value.is_some())
    }
}
