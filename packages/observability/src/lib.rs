//! # Observability
//!
//! Centralized logging bootstrap for the session-sync workspace.
//!
//! Services are **log producers**: they call [`init`] or [`init_with_config`]
//! once at startup and use standard `tracing` macros everywhere else. They do
//! not know where logs go.
//!
//! All services append structured JSONL to a single central file,
//! `~/.campaign-auth/logs/dev.jsonl` by default, so it can be followed with
//! `tail -f ~/.campaign-auth/logs/dev.jsonl | jq`.
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "campaign-auth".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     });
//!     tracing::info!("ready");
//! }
//! ```

mod writer;

pub use writer::CentralLogWriter;

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written into the startup line.
    pub service_name: String,
    /// Default level filter. `RUST_LOG` takes precedence when set.
    pub default_level: String,
    /// Custom log file path. Defaults to `~/.campaign-auth/logs/dev.jsonl`.
    pub log_path: Option<PathBuf>,
    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Central log file location shared by every service.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".campaign-auth").join("logs").join("dev.jsonl"))
}

/// Initialize logging with default settings.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// Installing a second global subscriber is a no-op, so calling this more
/// than once (tests, embedded use) is harmless.
pub fn init_with_config(config: LogConfig) {
    let log_path = config.log_path.clone().or_else(default_log_path);

    let file_layer = log_path.as_ref().and_then(|path| match CentralLogWriter::new(path) {
        Ok(writer) => Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_writer(writer)
                .with_filter(env_filter(&config.default_level)),
        ),
        Err(e) => {
            eprintln!("failed to open log file {}: {}", path.display(), e);
            None
        }
    });

    // Without a file sink stderr is the only place logs can go.
    let stderr_enabled = config.also_stderr || file_layer.is_none();
    let stderr_layer = stderr_enabled.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    let installed = tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            service = %config.service_name,
            log_path = ?log_path,
            "observability initialized"
        );
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};
