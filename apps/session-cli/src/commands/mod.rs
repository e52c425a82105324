//! CLI command implementations.

mod auth;
mod profile;

pub use auth::{refresh, sign_in, sign_out, sign_up, status, SignUpArgs, SignUpRole};
pub use profile::{parse_field, retry, update};

use anyhow::{Context, Result};
use auth_config_and_utils::{Config, Paths, SyncSettings};
use profile_kv_storage::open_file_storage;
use session_sync_core::{SessionState, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use supabase_auth_gateway::{SupabaseIdentityProvider, SupabaseProfileStore};
use tracing::debug;

/// A session store wired to Supabase and the local storage file.
pub struct AppContext {
    pub store: SessionStore,
    pub settings: SyncSettings,
}

impl AppContext {
    /// Load configuration, open storage, and resolve the current session.
    pub async fn open() -> Result<Self> {
        let paths = Paths::new()?;
        paths.ensure_dirs()?;
        let config = Config::load(&paths).context("Failed to load configuration")?;

        let storage = open_file_storage(&paths.storage_file())
            .context("Failed to open local storage")?;
        let identity = Arc::new(SupabaseIdentityProvider::from_config(&config, storage.clone())?);
        let profiles = Arc::new(SupabaseProfileStore::new(identity.clone()));

        let store = SessionStore::new(identity, profiles, storage, config.sync.clone());
        store.initialize().await?;
        debug!(phase = ?store.phase(), "Session store ready");

        Ok(Self {
            store,
            settings: config.sync,
        })
    }

    /// Wait until the session matches `signed_in` and nothing is loading.
    pub async fn settle(&self, signed_in: bool) -> Option<SessionState> {
        self.store
            .wait_for(settle_timeout(&self.settings), |state| {
                state.session.is_some() == signed_in && !state.loading()
            })
            .await
    }

    /// Let the logout guard run out so its flag is not left behind.
    pub async fn finish_logout(&self) {
        tokio::time::sleep(self.settings.logout_guard() + Duration::from_millis(50)).await;
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.store.shutdown();
    }
}

/// Longest a full fetch cycle can take: every attempt timing out plus every
/// backoff, plus the post-sign-up delay.
pub fn settle_timeout(settings: &SyncSettings) -> Duration {
    let attempts = settings.max_fetch_retries + 1;
    settings.fetch_timeout() * attempts
        + settings.retry_max_delay() * settings.max_fetch_retries
        + settings.signup_propagation_delay()
}
