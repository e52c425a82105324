//! Persistent mirror of the last known profile.

use crate::model::Profile;
use profile_kv_storage::{StorageError, StorageHandle, StorageKeys, StorageResult};
use tracing::{debug, warn};

/// Write-through profile cache over a key-value store.
///
/// Read once when the store is built; every later read of the profile comes
/// from memory.
#[derive(Clone)]
pub struct PersistentCache {
    storage: StorageHandle,
}

impl PersistentCache {
    pub fn new(storage: StorageHandle) -> Self {
        Self { storage }
    }

    /// Store `profile`, or remove the entry when `None`.
    pub fn write(&self, profile: Option<&Profile>) -> StorageResult<()> {
        let Some(profile) = profile else {
            return self.clear();
        };
        let encoded =
            serde_json::to_string(profile).map_err(|e| StorageError::Encoding(e.to_string()))?;
        self.storage.set(StorageKeys::PROFILE_CACHE, &encoded)?;
        debug!(subject_id = %profile.subject_id, "Profile cache written");
        Ok(())
    }

    /// Cached profile, or `None` when absent, unreadable, or corrupt.
    pub fn read(&self) -> Option<Profile> {
        let raw = match self.storage.get(StorageKeys::PROFILE_CACHE) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "Failed to read profile cache");
                return None;
            }
        };

        let profile = match serde_json::from_str::<Profile>(&raw) {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, "Profile cache is corrupt, ignoring");
                return None;
            }
        };

        match profile.validate() {
            Ok(()) => Some(profile),
            Err(e) => {
                warn!(error = %e, "Cached profile is inconsistent, ignoring");
                None
            }
        }
    }

    pub fn clear(&self) -> StorageResult<()> {
        if self.storage.delete(StorageKeys::PROFILE_CACHE)? {
            debug!("Profile cache cleared");
        }
        Ok(())
    }
}
