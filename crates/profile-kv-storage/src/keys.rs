//! Storage key constants.

/// Well-known keys in the persistent key-value store.
pub struct StorageKeys;

impl StorageKeys {
    /// Last known profile (JSON), mirrored on every profile change.
    pub const PROFILE_CACHE: &'static str = "profile_cache";

    /// Present while a sign-out is suppressing session events.
    pub const LOGOUT_GUARD: &'static str = "logout_guard";

    /// Identity provider token pair and subject metadata (JSON).
    pub const AUTH_SESSION: &'static str = "auth_session";
}
