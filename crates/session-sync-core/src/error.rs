//! Error types for session and profile synchronization.

use std::fmt;
use thiserror::Error;

/// Errors surfaced by identity-provider operations.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    /// Invalid email or password
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The provider rejected the request or answered unexpectedly
    #[error("Identity provider error: {0}")]
    Provider(String),

    /// No session is available for an operation that needs one
    #[error("Not logged in")]
    NotLoggedIn,

    /// Session expired and could not be refreshed
    #[error("Session expired")]
    SessionExpired,

    /// Network unavailable (transient error, can retry)
    #[error("Network unavailable")]
    NetworkUnavailable,

    /// Account was created but the profile rows could not be written
    #[error("Profile setup failed: {0}")]
    Profile(#[from] SyncError),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::NetworkUnavailable)
    }
}

/// Why a profile fetch stopped without producing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Cancelled explicitly (sign-out, session cleared)
    Cancelled,
    /// Replaced by a fetch for a different subject
    Superseded,
    /// A single read exceeded the fetch timeout
    TimedOut,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AbortReason::Cancelled => "cancelled",
            AbortReason::Superseded => "superseded",
            AbortReason::TimedOut => "timed out",
        };
        f.write_str(label)
    }
}

/// Which of the two profile records a write targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteSide {
    Base,
    RoleSpecific,
}

impl fmt::Display for WriteSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteSide::Base => f.write_str("base"),
            WriteSide::RoleSpecific => f.write_str("role-specific"),
        }
    }
}

/// Errors surfaced by profile fetching and profile writes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The profile row still did not exist after every retry
    #[error("Profile not provisioned after {attempts} attempts")]
    NotYetProvisioned { attempts: u32 },

    /// The fetch stopped before it produced a result
    #[error("Profile fetch {0}")]
    Aborted(AbortReason),

    /// One record was written, the other was not
    #[error("Profile partially updated: {applied} record written, {failed} record failed: {message}")]
    PartialWrite {
        applied: WriteSide,
        failed: WriteSide,
        message: String,
    },

    /// The profile store failed
    #[error("Profile store error: {0}")]
    Store(String),

    /// The store answered with a row for someone else
    #[error("Profile row belongs to {actual}, expected {expected}")]
    SubjectMismatch { expected: String, actual: String },

    /// The role-specific record does not match the profile's role
    #[error("Role-specific record does not match role {0}")]
    RoleMismatch(String),

    /// The update names a field that is unknown or not writable for this role
    #[error("Unknown profile field: {0}")]
    UnknownField(String),

    /// The update carries a value of the wrong shape for its field
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    /// No authenticated session
    #[error("No active session")]
    NoSession,

    /// No profile is loaded to update
    #[error("No profile loaded")]
    NoProfile,
}

impl SyncError {
    /// True when the failure means the row may simply not exist yet.
    pub fn is_not_yet_provisioned(&self) -> bool {
        matches!(self, SyncError::NotYetProvisioned { .. })
    }
}

/// Errors reported by a [`ProfileStore`](crate::ProfileStore) implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProfileStoreError {
    /// No row exists for the subject
    #[error("Profile row not found")]
    NotFound,

    /// Any other backend failure
    #[error("{0}")]
    Backend(String),
}

/// Result type for identity operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Result type for profile operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for profile store collaborators.
pub type ProfileStoreResult<T> = Result<T, ProfileStoreError>;
