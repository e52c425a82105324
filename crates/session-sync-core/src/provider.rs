//! Collaborator traits: the identity provider and the profile store.

use crate::error::{AuthResult, ProfileStoreResult};
use crate::model::{BaseRecord, ProfileRow, Role, RoleDetails, Session};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Kind of session change reported by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    Other,
}

/// One event on the provider's session stream.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthStateChange {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

impl AuthStateChange {
    pub fn new(kind: AuthEventKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }

    pub fn signed_in(session: Session) -> Self {
        Self::new(AuthEventKind::SignedIn, Some(session))
    }

    pub fn signed_out() -> Self {
        Self::new(AuthEventKind::SignedOut, None)
    }
}

/// Which sessions a sign-out ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutScope {
    /// This client only
    Local,
    /// Every session of the account
    Global,
    /// Every session except this one
    Others,
}

impl SignOutScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignOutScope::Local => "local",
            SignOutScope::Global => "global",
            SignOutScope::Others => "others",
        }
    }
}

/// Outcome of account creation.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpResult {
    pub subject_id: String,
    /// `None` while the account awaits email confirmation.
    pub session: Option<Session>,
}

/// Identity provider capability.
///
/// Session changes are delivered through [`subscribe`](Self::subscribe);
/// return values of the other calls are informational only.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Session restored from the provider's own storage, if any.
    async fn get_session(&self) -> AuthResult<Option<Session>>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session>;

    async fn sign_up(&self, email: &str, password: &str, metadata: Value)
        -> AuthResult<SignUpResult>;

    async fn sign_out(&self, scope: SignOutScope) -> AuthResult<()>;

    async fn refresh_session(&self) -> AuthResult<Session>;

    /// Subscribe to session changes. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange>;
}

/// Profile store capability: one joined read plus keyed writes.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Base row joined with both role tables.
    ///
    /// Returns [`ProfileStoreError::NotFound`](crate::ProfileStoreError::NotFound)
    /// when the base row does not exist yet.
    async fn read_profile(&self, subject_id: &str) -> ProfileStoreResult<ProfileRow>;

    async fn insert_base(&self, record: &BaseRecord) -> ProfileStoreResult<()>;

    async fn insert_role_record(
        &self,
        subject_id: &str,
        details: &RoleDetails,
    ) -> ProfileStoreResult<()>;

    async fn update_base(
        &self,
        subject_id: &str,
        fields: &Map<String, Value>,
    ) -> ProfileStoreResult<()>;

    async fn update_role_record(
        &self,
        subject_id: &str,
        role: Role,
        fields: &Map<String, Value>,
    ) -> ProfileStoreResult<()>;
}

pub type IdentityHandle = Arc<dyn IdentityProvider>;
pub type ProfileStoreHandle = Arc<dyn ProfileStore>;
