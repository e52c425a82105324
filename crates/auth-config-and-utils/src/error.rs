//! Setup errors: loading configuration and preparing the app directory.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A configuration value is missing or out of range.
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    /// `supabase_url` does not parse.
    #[error("Invalid Supabase URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// `config.json` exists but is not valid JSON for [`crate::Config`].
    #[error("Malformed config file: {0}")]
    Json(#[from] serde_json::Error),

    /// The home directory could not be resolved.
    #[error("Cannot locate app directory: {0}")]
    Path(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
