//! Scripted collaborators for tests.

use crate::error::{AuthError, AuthResult, ProfileStoreError, ProfileStoreResult};
use crate::model::{BaseRecord, Profile, ProfileRow, Role, RoleDetails, Session};
use crate::provider::{
    AuthEventKind, AuthStateChange, IdentityProvider, ProfileStore, SignOutScope, SignUpResult,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Identity provider with an in-memory account table.
pub struct MockIdentityProvider {
    events: broadcast::Sender<AuthStateChange>,
    session: Mutex<Option<Session>>,
    /// email -> (password, subject id)
    accounts: Mutex<HashMap<String, (String, String)>>,
    next_subject: AtomicUsize,
    sign_up_returns_session: AtomicBool,
    refresh_fails: AtomicBool,
    pub sign_in_calls: AtomicUsize,
    pub sign_out_calls: AtomicUsize,
    pub sign_out_scopes: Mutex<Vec<SignOutScope>>,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            session: Mutex::new(None),
            accounts: Mutex::new(HashMap::new()),
            next_subject: AtomicUsize::new(1),
            sign_up_returns_session: AtomicBool::new(true),
            refresh_fails: AtomicBool::new(false),
            sign_in_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
            sign_out_scopes: Mutex::new(Vec::new()),
        }
    }

    pub fn add_account(&self, email: &str, password: &str, subject_id: &str) {
        self.accounts
            .lock()
            .insert(email.to_string(), (password.to_string(), subject_id.to_string()));
    }

    /// Session the provider reports before any sign-in.
    pub fn restore_session(&self, session: Session) {
        *self.session.lock() = Some(session);
    }

    pub fn set_sign_up_returns_session(&self, value: bool) {
        self.sign_up_returns_session.store(value, Ordering::SeqCst);
    }

    pub fn set_refresh_fails(&self, value: bool) {
        self.refresh_fails.store(value, Ordering::SeqCst);
    }

    /// Push an arbitrary event onto the stream.
    pub fn emit(&self, change: AuthStateChange) {
        let _ = self.events.send(change);
    }

    fn session_for(email: &str, subject_id: &str) -> Session {
        Session::new(subject_id).with_email(email)
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        Ok(self.session.lock().clone())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        let subject_id = match self.accounts.lock().get(email) {
            Some((stored, subject_id)) if stored == password => subject_id.clone(),
            _ => {
                return Err(AuthError::InvalidCredentials(
                    "Invalid login credentials".into(),
                ))
            }
        };

        let session = Self::session_for(email, &subject_id);
        *self.session.lock() = Some(session.clone());
        self.emit(AuthStateChange::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _metadata: Value,
    ) -> AuthResult<SignUpResult> {
        if self.accounts.lock().contains_key(email) {
            return Err(AuthError::Provider("User already registered".into()));
        }
        let n = self.next_subject.fetch_add(1, Ordering::SeqCst);
        let subject_id = format!("new-user-{n}");
        self.add_account(email, password, &subject_id);

        if !self.sign_up_returns_session.load(Ordering::SeqCst) {
            return Ok(SignUpResult {
                subject_id,
                session: None,
            });
        }

        let session = Self::session_for(email, &subject_id);
        *self.session.lock() = Some(session.clone());
        self.emit(AuthStateChange::signed_in(session.clone()));
        Ok(SignUpResult {
            subject_id,
            session: Some(session),
        })
    }

    async fn sign_out(&self, scope: SignOutScope) -> AuthResult<()> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        self.sign_out_scopes.lock().push(scope);
        *self.session.lock() = None;
        self.emit(AuthStateChange::signed_out());
        Ok(())
    }

    async fn refresh_session(&self) -> AuthResult<Session> {
        if self.refresh_fails.load(Ordering::SeqCst) {
            *self.session.lock() = None;
            return Err(AuthError::SessionExpired);
        }
        let session = self.session.lock().clone().ok_or(AuthError::NotLoggedIn)?;
        self.emit(AuthStateChange::new(
            AuthEventKind::TokenRefreshed,
            Some(session.clone()),
        ));
        Ok(session)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }
}

/// Profile store over in-memory rows with programmable latency and failures.
#[derive(Default)]
pub struct MockProfileStore {
    rows: Mutex<HashMap<String, ProfileRow>>,
    read_delay: Mutex<Duration>,
    read_error: Mutex<Option<String>>,
    read_log: Mutex<Vec<Instant>>,
    stamp_reads: AtomicBool,
    fail_base_writes: AtomicBool,
    fail_role_writes: AtomicBool,
    pub base_writes: AtomicUsize,
    pub role_writes: AtomicUsize,
}

impl MockProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_row(&self, row: ProfileRow) {
        let key = row.base.id.clone();
        self.insert_row_as(&key, row);
    }

    /// Answer reads for `subject_id` with `row`, whatever its id.
    pub fn insert_row_as(&self, subject_id: &str, row: ProfileRow) {
        self.rows.lock().insert(subject_id.to_string(), row);
    }

    pub fn row(&self, subject_id: &str) -> Option<ProfileRow> {
        self.rows.lock().get(subject_id).cloned()
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = delay;
    }

    pub fn fail_reads(&self, message: &str) {
        *self.read_error.lock() = Some(message.to_string());
    }

    /// Tag each read's `full_name` with its sequence number (`read-1`, ...).
    pub fn stamp_reads(&self) {
        self.stamp_reads.store(true, Ordering::SeqCst);
    }

    pub fn fail_base_writes(&self, fail: bool) {
        self.fail_base_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_role_writes(&self, fail: bool) {
        self.fail_role_writes.store(fail, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.read_log.lock().len()
    }

    pub fn read_instants(&self) -> Vec<Instant> {
        self.read_log.lock().clone()
    }

    fn patched(row: &ProfileRow, apply: impl FnOnce(&mut Profile)) -> ProfileRow {
        let mut profile = Profile::assemble(row.clone());
        apply(&mut profile);
        let mut next = row.clone();
        next.base.fields = profile.base;
        match profile.details {
            Some(RoleDetails::Business(details)) => next.business = Some(details),
            Some(RoleDetails::Influencer(details)) => next.influencer = Some(details),
            None => {}
        }
        next
    }
}

#[async_trait]
impl ProfileStore for MockProfileStore {
    async fn read_profile(&self, subject_id: &str) -> ProfileStoreResult<ProfileRow> {
        let sequence = {
            let mut log = self.read_log.lock();
            log.push(Instant::now());
            log.len()
        };

        let delay = *self.read_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.read_error.lock().clone() {
            return Err(ProfileStoreError::Backend(message));
        }

        let mut row = self
            .rows
            .lock()
            .get(subject_id)
            .cloned()
            .ok_or(ProfileStoreError::NotFound)?;
        if self.stamp_reads.load(Ordering::SeqCst) {
            row.base.fields.full_name = Some(format!("read-{sequence}"));
        }
        Ok(row)
    }

    async fn insert_base(&self, record: &BaseRecord) -> ProfileStoreResult<()> {
        if self.fail_base_writes.load(Ordering::SeqCst) {
            return Err(ProfileStoreError::Backend("base insert rejected".into()));
        }
        self.base_writes.fetch_add(1, Ordering::SeqCst);
        self.insert_row(ProfileRow::new(record.clone()));
        Ok(())
    }

    async fn insert_role_record(
        &self,
        subject_id: &str,
        details: &RoleDetails,
    ) -> ProfileStoreResult<()> {
        if self.fail_role_writes.load(Ordering::SeqCst) {
            return Err(ProfileStoreError::Backend("role insert rejected".into()));
        }
        self.role_writes.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock();
        let row = rows
            .get_mut(subject_id)
            .ok_or_else(|| ProfileStoreError::Backend("foreign key violation".into()))?;
        match details {
            RoleDetails::Business(d) => row.business = Some(d.clone()),
            RoleDetails::Influencer(d) => row.influencer = Some(d.clone()),
        }
        Ok(())
    }

    async fn update_base(
        &self,
        subject_id: &str,
        fields: &Map<String, Value>,
    ) -> ProfileStoreResult<()> {
        if self.fail_base_writes.load(Ordering::SeqCst) {
            return Err(ProfileStoreError::Backend("base update rejected".into()));
        }
        self.base_writes.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock();
        let row = rows.get(subject_id).ok_or(ProfileStoreError::NotFound)?;
        let next = Self::patched(row, |p| {
            let _ = p.apply_base(fields);
        });
        rows.insert(subject_id.to_string(), next);
        Ok(())
    }

    async fn update_role_record(
        &self,
        subject_id: &str,
        role: Role,
        fields: &Map<String, Value>,
    ) -> ProfileStoreResult<()> {
        if self.fail_role_writes.load(Ordering::SeqCst) {
            return Err(ProfileStoreError::Backend(format!(
                "{role} update rejected"
            )));
        }
        self.role_writes.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock();
        let row = rows.get(subject_id).ok_or(ProfileStoreError::NotFound)?;
        let next = Self::patched(row, |p| {
            let _ = p.apply_role(fields);
        });
        rows.insert(subject_id.to_string(), next);
        Ok(())
    }
}
