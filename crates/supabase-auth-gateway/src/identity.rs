//! Supabase Auth (GoTrue) identity provider.
//!
//! Tokens are persisted under [`StorageKeys::AUTH_SESSION`] and never leave
//! this crate; the session store only sees the opaque [`Session`].

use crate::error::{GatewayError, GatewayResult};
use crate::http::{read_json, response_error};
use async_trait::async_trait;
use auth_config_and_utils::Config;
use chrono::{DateTime, Duration, Utc};
use profile_kv_storage::{StorageHandle, StorageKeys};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use session_sync_core::{
    AuthError, AuthEventKind, AuthResult, AuthStateChange, IdentityProvider, Session,
    SignOutScope, SignUpResult,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Tokens are refreshed this long before they actually expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

const EVENT_CAPACITY: usize = 32;

/// Token pair and subject metadata as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
}

impl StoredSession {
    fn from_token_response(data: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            access_token: data.access_token,
            refresh_token: data.refresh_token,
            expires_at: now + Duration::seconds(data.expires_in),
            user_id: data.user.id,
            email: data.user.email,
            user_metadata: data.user.user_metadata,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now + Duration::seconds(EXPIRY_MARGIN_SECS)
    }

    pub fn to_session(&self) -> Session {
        Session {
            subject_id: self.user_id.clone(),
            email: self.email.clone(),
            expires_at: Some(self.expires_at),
            metadata: self.user_metadata.clone(),
        }
    }
}

/// Supabase token response (password and refresh_token grants).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: UserRecord,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Value,
}

/// Sign-up answers with a session when confirmation is off, else the bare user.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(UserRecord),
}

/// Identity provider backed by Supabase Auth.
pub struct SupabaseIdentityProvider {
    http_client: Client,
    supabase_url: String,
    supabase_publishable_key: String,
    storage: StorageHandle,
    events: broadcast::Sender<AuthStateChange>,
}

impl SupabaseIdentityProvider {
    /// Create a provider for the project at `supabase_url`.
    pub fn new(supabase_url: &str, supabase_publishable_key: &str, storage: StorageHandle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            http_client: Client::new(),
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_publishable_key: supabase_publishable_key.to_string(),
            storage,
            events,
        }
    }

    /// Create a provider from the loaded configuration.
    pub fn from_config(config: &Config, storage: StorageHandle) -> GatewayResult<Self> {
        let url = config
            .supabase_url()
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        if config.supabase_publishable_key.trim().is_empty() {
            return Err(GatewayError::Config(
                "supabase_publishable_key is empty".to_string(),
            ));
        }
        Ok(Self::new(
            url.as_str(),
            &config.supabase_publishable_key,
            storage,
        ))
    }

    pub(crate) fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub(crate) fn publishable_key(&self) -> &str {
        &self.supabase_publishable_key
    }

    pub(crate) fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.supabase_url, table)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.supabase_url, path)
    }

    /// Access token for the current session, refreshing it if it expired.
    pub(crate) async fn access_token(&self) -> AuthResult<String> {
        let stored = self.stored_session().ok_or(AuthError::NotLoggedIn)?;
        if !stored.is_expired(Utc::now()) {
            return Ok(stored.access_token);
        }
        debug!(user_id = %stored.user_id, "Access token expired, refreshing");
        let refreshed = self.refresh_tokens(&stored).await?;
        Ok(refreshed.access_token)
    }

    /// Persisted session, if any. A corrupt entry is dropped.
    pub fn stored_session(&self) -> Option<StoredSession> {
        let raw = match self.storage.get(StorageKeys::AUTH_SESSION) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "Failed to read stored session");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!(error = %e, "Stored session is corrupt, discarding");
                self.clear_stored_session();
                None
            }
        }
    }

    fn store_session(&self, stored: &StoredSession) -> GatewayResult<()> {
        let raw = serde_json::to_string(stored)?;
        self.storage.set(StorageKeys::AUTH_SESSION, &raw)?;
        Ok(())
    }

    fn clear_stored_session(&self) {
        if let Err(e) = self.storage.delete(StorageKeys::AUTH_SESSION) {
            warn!(error = %e, "Failed to clear stored session");
        }
    }

    fn emit(&self, kind: AuthEventKind, session: Option<Session>) {
        // No receivers is fine: nobody has subscribed yet.
        let _ = self.events.send(AuthStateChange::new(kind, session));
    }

    async fn refresh_tokens(&self, stored: &StoredSession) -> AuthResult<StoredSession> {
        let refresh_url = self.auth_url("token?grant_type=refresh_token");
        debug!(url = %refresh_url, "Refreshing token");

        let response = self
            .http_client
            .post(&refresh_url)
            .header("apikey", &self.supabase_publishable_key)
            .header("Content-Type", "application/json")
            .json(&json!({ "refresh_token": stored.refresh_token }))
            .send()
            .await
            .map_err(GatewayError::from)?;

        if !response.status().is_success() {
            let err = response_error(response, "Token refresh failed").await;
            if err.is_transient() {
                return Err(err.into());
            }
            self.clear_stored_session();
            return Err(AuthError::SessionExpired);
        }

        let data: TokenResponse = read_json(response).await?;
        let refreshed = StoredSession::from_token_response(data, Utc::now());
        self.store_session(&refreshed)?;
        info!(user_id = %refreshed.user_id, "Token refreshed successfully");
        Ok(refreshed)
    }
}

#[async_trait]
impl IdentityProvider for SupabaseIdentityProvider {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        let Some(stored) = self.stored_session() else {
            return Ok(None);
        };
        if !stored.is_expired(Utc::now()) {
            return Ok(Some(stored.to_session()));
        }

        match self.refresh_tokens(&stored).await {
            Ok(refreshed) => Ok(Some(refreshed.to_session())),
            Err(AuthError::SessionExpired) => {
                info!(user_id = %stored.user_id, "Stored session expired");
                Ok(None)
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Could not refresh stored session, keeping it");
                Ok(Some(stored.to_session()))
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session> {
        let login_url = self.auth_url("token?grant_type=password");
        debug!(url = %login_url, "Attempting email/password login");

        let response = self
            .http_client
            .post(&login_url)
            .header("apikey", &self.supabase_publishable_key)
            .header("Content-Type", "application/json")
            .json(&json!({
                "email": email,
                "password": password,
            }))
            .send()
            .await
            .map_err(GatewayError::from)?;

        if !response.status().is_success() {
            let err = response_error(response, "Login failed").await;
            return Err(match err {
                GatewayError::Status { status, message } if (400..500).contains(&status) => {
                    AuthError::InvalidCredentials(message)
                }
                other => other.into(),
            });
        }

        let data: TokenResponse = read_json(response).await?;
        let stored = StoredSession::from_token_response(data, Utc::now());
        self.store_session(&stored)?;

        let session = stored.to_session();
        info!(user_id = %session.subject_id, "Login successful");
        self.emit(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> AuthResult<SignUpResult> {
        let signup_url = self.auth_url("signup");
        debug!(url = %signup_url, "Creating account");

        let response = self
            .http_client
            .post(&signup_url)
            .header("apikey", &self.supabase_publishable_key)
            .header("Content-Type", "application/json")
            .json(&json!({
                "email": email,
                "password": password,
                "data": metadata,
            }))
            .send()
            .await
            .map_err(GatewayError::from)?;

        if !response.status().is_success() {
            return Err(response_error(response, "Sign-up failed").await.into());
        }

        match read_json::<SignUpResponse>(response).await? {
            SignUpResponse::Session(data) => {
                let stored = StoredSession::from_token_response(data, Utc::now());
                self.store_session(&stored)?;
                let session = stored.to_session();
                info!(user_id = %session.subject_id, "Account created and signed in");
                self.emit(AuthEventKind::SignedIn, Some(session.clone()));
                Ok(SignUpResult {
                    subject_id: session.subject_id.clone(),
                    session: Some(session),
                })
            }
            SignUpResponse::User(user) => {
                info!(user_id = %user.id, "Account created, awaiting email confirmation");
                Ok(SignUpResult {
                    subject_id: user.id,
                    session: None,
                })
            }
        }
    }

    async fn sign_out(&self, scope: SignOutScope) -> AuthResult<()> {
        let stored = self.stored_session();
        self.clear_stored_session();
        self.emit(AuthEventKind::SignedOut, None);

        let Some(stored) = stored else {
            debug!("No stored session to revoke");
            return Ok(());
        };

        let logout_url = self.auth_url(&format!("logout?scope={}", scope.as_str()));
        let response = self
            .http_client
            .post(&logout_url)
            .header("apikey", &self.supabase_publishable_key)
            .header("Authorization", format!("Bearer {}", stored.access_token))
            .send()
            .await
            .map_err(GatewayError::from)?;

        if !response.status().is_success() {
            return Err(response_error(response, "Server logout failed").await.into());
        }
        info!(user_id = %stored.user_id, scope = scope.as_str(), "Logged out");
        Ok(())
    }

    async fn refresh_session(&self) -> AuthResult<Session> {
        let stored = self.stored_session().ok_or(AuthError::NotLoggedIn)?;
        match self.refresh_tokens(&stored).await {
            Ok(refreshed) => {
                let session = refreshed.to_session();
                self.emit(AuthEventKind::TokenRefreshed, Some(session.clone()));
                Ok(session)
            }
            Err(AuthError::SessionExpired) => {
                self.emit(AuthEventKind::SignedOut, None);
                Err(AuthError::SessionExpired)
            }
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }
}
