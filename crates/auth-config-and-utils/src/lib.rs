//! Core configuration, paths, and logging for the campaign session-sync workspace.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, SyncSettings, DEFAULT_LOG_LEVEL, DEFAULT_SUPABASE_PUBLISHABLE_KEY,
    DEFAULT_SUPABASE_URL,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_for_service};
pub use paths::Paths;
