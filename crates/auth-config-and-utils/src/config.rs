//! Configuration management.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default Supabase URL (can be overridden at compile time via SUPABASE_URL env var).
pub const DEFAULT_SUPABASE_URL: &str = match option_env!("SUPABASE_URL") {
    Some(url) => url,
    None => "https://project.supabase.co",
};

/// Default Supabase publishable key (can be overridden at compile time via SUPABASE_PUBLISHABLE_KEY env var).
pub const DEFAULT_SUPABASE_PUBLISHABLE_KEY: &str = match option_env!("SUPABASE_PUBLISHABLE_KEY") {
    Some(key) => key,
    None => "publishable-key",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const ENV_LOG_LEVEL: &str = "CAMPAIGN_LOG_LEVEL";
const ENV_SUPABASE_URL: &str = "CAMPAIGN_SUPABASE_URL";
const ENV_SUPABASE_PUBLISHABLE_KEY: &str = "CAMPAIGN_SUPABASE_PUBLISHABLE_KEY";

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Supabase project URL.
    #[serde(default = "default_supabase_url")]
    pub supabase_url: String,
    /// Supabase publishable API key (public, safe to expose).
    #[serde(default = "default_supabase_publishable_key")]
    pub supabase_publishable_key: String,
    /// Timings for profile fetching and logout handling.
    #[serde(default)]
    pub sync: SyncSettings,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_supabase_url() -> String {
    DEFAULT_SUPABASE_URL.to_string()
}

fn default_supabase_publishable_key() -> String {
    DEFAULT_SUPABASE_PUBLISHABLE_KEY.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            supabase_url: default_supabase_url(),
            supabase_publishable_key: default_supabase_publishable_key(),
            sync: SyncSettings::default(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.sync.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a key lookup (the process environment in production).
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(log_level) = non_empty(ENV_LOG_LEVEL) {
            self.log_level = log_level;
        }
        if let Some(url) = non_empty(ENV_SUPABASE_URL) {
            self.supabase_url = url.trim_end_matches('/').to_string();
        }
        if let Some(key) = non_empty(ENV_SUPABASE_PUBLISHABLE_KEY) {
            self.supabase_publishable_key = key;
        }
    }

    /// Get the Supabase URL as a parsed URL.
    pub fn supabase_url(&self) -> CoreResult<Url> {
        Url::parse(&self.supabase_url).map_err(CoreError::from)
    }
}

/// Timings that govern profile fetching and logout handling.
///
/// All values are milliseconds so the config file stays plain JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Upper bound for a single profile read.
    pub fetch_timeout_ms: u64,
    /// Retries allowed while the profile row has not been created yet.
    pub max_fetch_retries: u32,
    /// First backoff delay; doubles on every retry.
    pub retry_base_delay_ms: u64,
    /// Cap on the backoff delay.
    pub retry_max_delay_ms: u64,
    /// How long session events are suppressed after a sign-out.
    pub logout_guard_ms: u64,
    /// Delay between sign-up row writes and the first profile fetch.
    pub signup_propagation_delay_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 10_000,
            max_fetch_retries: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 3_000,
            logout_guard_ms: 1_000,
            signup_propagation_delay_ms: 1_000,
        }
    }
}

impl SyncSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn logout_guard(&self) -> Duration {
        Duration::from_millis(self.logout_guard_ms)
    }

    pub fn signup_propagation_delay(&self) -> Duration {
        Duration::from_millis(self.signup_propagation_delay_ms)
    }

    /// Reject settings that would make the fetch path unusable.
    pub fn validate(&self) -> CoreResult<()> {
        if self.fetch_timeout_ms == 0 {
            return Err(CoreError::Config(
                "sync.fetch_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(CoreError::Config(format!(
                "sync.retry_max_delay_ms ({}) is below sync.retry_base_delay_ms ({})",
                self.retry_max_delay_ms, self.retry_base_delay_ms
            )));
        }
        Ok(())
    }
}
