//! Locations of the files the CLI keeps between runs.
//!
//! ```text
//! ~/.campaign-auth/
//!   config.json     optional overrides for Config
//!   storage.json    persisted session, profile cache, logout guard
//!   logs/dev.jsonl  central JSONL log
//! ```

use crate::{CoreError, CoreResult};
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = ".campaign-auth";

#[derive(Debug, Clone)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    /// Paths rooted at `~/.campaign-auth`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("home directory is not set".to_string()))?;
        Ok(Self::with_base_dir(home.join(APP_DIR_NAME)))
    }

    /// Paths rooted somewhere else, e.g. a temp dir in tests.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    pub fn storage_file(&self) -> PathBuf {
        self.base_dir.join("storage.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("dev.jsonl")
    }

    /// Create the base and log directories. Safe to call repeatedly.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
