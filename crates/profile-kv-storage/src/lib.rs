//! Persistent key-value storage for the session-sync core.
//!
//! Backends:
//! - **[`MemoryStorage`]**: process-lifetime map
//! - **[`FileStorage`]**: single JSON file, atomically rewritten
//!
//! Callers only ever touch a handful of [`StorageKeys`]: the profile cache,
//! the logout guard flag, and the identity provider's persisted session.

mod file;
mod keys;
mod memory;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use traits::KeyValueStore;

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific failure
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Shared handle to a storage backend.
pub type StorageHandle = Arc<dyn KeyValueStore>;

/// Open the file-backed store at `path` as a shared handle.
pub fn open_file_storage(path: &Path) -> StorageResult<StorageHandle> {
    Ok(Arc::new(FileStorage::new(path)?))
}
