//! Logging initialization.
//!
//! Thin wrapper over the observability crate. Everything is written as
//! structured JSONL to `~/.campaign-auth/logs/dev.jsonl`.

use observability::LogConfig;

/// Service name used when the caller does not provide one.
const DEFAULT_SERVICE_NAME: &str = "campaign-auth";

/// Initialize logging at the given default level.
///
/// `RUST_LOG` overrides `level` when set. Set `CAMPAIGN_LOG_STDERR=1` to
/// mirror logs to stderr.
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("ready");
/// ```
pub fn init_logging(level: &str) {
    init_logging_for_service(DEFAULT_SERVICE_NAME, level);
}

/// Initialize logging with a custom service name.
pub fn init_logging_for_service(service_name: &str, level: &str) {
    observability::init_with_config(LogConfig {
        service_name: service_name.into(),
        default_level: normalize_level(level).into(),
        also_stderr: stderr_requested(std::env::var("CAMPAIGN_LOG_STDERR").ok().as_deref()),
        ..Default::default()
    });
}

fn stderr_requested(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes")
    )
}

/// Map user input onto a level `EnvFilter` understands, defaulting to info.
fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}
