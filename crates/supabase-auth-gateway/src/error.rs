//! Gateway error types.

use profile_kv_storage::StorageError;
use session_sync_core::{AuthError, ProfileStoreError};
use thiserror::Error;

/// Error talking to the Supabase project.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response. The body is summarized, never echoed.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Token storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Returns true for connection failures, timeouts, and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                e.status().is_some_and(|status| status.is_server_error())
            }
            GatewayError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Status code of a rejected request.
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Status { status, .. } => Some(*status),
            GatewayError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<GatewayError> for AuthError {
    fn from(err: GatewayError) -> Self {
        if err.is_transient() {
            return AuthError::NetworkUnavailable;
        }
        match err {
            GatewayError::Status { message, .. } => AuthError::Provider(message),
            other => AuthError::Provider(other.to_string()),
        }
    }
}

impl From<GatewayError> for ProfileStoreError {
    fn from(err: GatewayError) -> Self {
        ProfileStoreError::Backend(err.to_string())
    }
}

/// Result type alias using GatewayError.
pub type GatewayResult<T> = Result<T, GatewayError>;
