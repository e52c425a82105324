//! Session store: owns session + profile state and drives the fetcher,
//! cache, and logout coordinator from provider events and explicit calls.

use crate::cache::PersistentCache;
use crate::cancellation::{Acquire, FetchPermit, FetchState};
use crate::error::{AbortReason, AuthResult, SyncError, SyncResult, WriteSide};
use crate::fetcher::{FetchOutcome, ProfileFetcher};
use crate::logout::{LogoutCoordinator, LogoutMode};
use crate::model::{Credentials, Profile, ProfileUpdate, Session, SignUpProfile};
use crate::provider::{
    AuthEventKind, AuthStateChange, IdentityHandle, ProfileStoreHandle, SignOutScope,
};
use crate::session_fsm::{reduce, Effect, SessionPhase, SessionState, StoreEvent};
use auth_config_and_utils::SyncSettings;
use parking_lot::Mutex;
use profile_kv_storage::StorageHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to the provider event listener. Dropping it unsubscribes.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    fn spawn(inner: Arc<StoreInner>, mut events: broadcast::Receiver<AuthStateChange>) -> Self {
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(change) => inner.handle_auth_change(change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Auth event stream lagged, resyncing session");
                        match inner.identity.get_session().await {
                            Ok(session) => inner.handle_auth_change(AuthStateChange::new(
                                AuthEventKind::Other,
                                session,
                            )),
                            Err(e) => warn!(error = %e, "Session resync failed"),
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Auth event stream closed");
                        break;
                    }
                }
            }
        });
        Self { task }
    }

    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct StoreInner {
    identity: IdentityHandle,
    profiles: ProfileStoreHandle,
    cache: PersistentCache,
    fetcher: ProfileFetcher,
    logout: LogoutCoordinator,
    settings: SyncSettings,
    state: watch::Sender<SessionState>,
}

/// Client-side session and profile synchronization.
///
/// Construct once per application, call [`initialize`](Self::initialize),
/// then observe [`watch`](Self::watch) and invoke the operations. All state
/// changes go through a single reducer; logout dominates every concurrently
/// resolving fetch or provider event.
pub struct SessionStore {
    inner: Arc<StoreInner>,
    subscription: Mutex<Option<Subscription>>,
}

impl SessionStore {
    /// Build the store and pre-populate the profile from the cache.
    ///
    /// A logout flag left behind by a previous process means that logout
    /// never finished, so the cache is cleared instead of used.
    pub fn new(
        identity: IdentityHandle,
        profiles: ProfileStoreHandle,
        storage: StorageHandle,
        settings: SyncSettings,
    ) -> Self {
        let cache = PersistentCache::new(storage.clone());
        let logout = LogoutCoordinator::with_storage(settings.logout_guard(), storage);

        let cached = if logout.recover_interrupted() {
            warn!("Previous logout did not finish, discarding cached profile");
            if let Err(e) = cache.clear() {
                warn!(error = %e, "Failed to clear profile cache");
            }
            None
        } else {
            cache.read()
        };
        if let Some(profile) = &cached {
            debug!(subject_id = %profile.subject_id, "Profile pre-populated from cache");
        }

        let fetcher = ProfileFetcher::new(profiles.clone(), logout.clone(), &settings);
        let (state, _) = watch::channel(SessionState::initial(cached));

        Self {
            inner: Arc::new(StoreInner {
                identity,
                profiles,
                cache,
                fetcher,
                logout,
                settings,
                state,
            }),
            subscription: Mutex::new(None),
        }
    }

    /// Subscribe to the provider's event stream and resolve the current
    /// session.
    pub async fn initialize(&self) -> AuthResult<()> {
        let events = self.inner.identity.subscribe();
        let subscription = Subscription::spawn(self.inner.clone(), events);
        let previous = self.subscription.lock().replace(subscription);
        if let Some(previous) = previous {
            previous.unsubscribe();
        }

        match self.inner.identity.get_session().await {
            Ok(session) => {
                debug!(has_session = session.is_some(), "Initial session resolved");
                self.inner.handle_auth_change(AuthStateChange::new(
                    AuthEventKind::InitialSession,
                    session,
                ));
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to resolve initial session");
                self.inner.dispatch(StoreEvent::AuthRequestFinished);
                Err(e)
            }
        }
    }

    /// Stop listening to the provider and cancel any in-flight fetch.
    ///
    /// Session and profile stay as they were; `profile_loading` is cleared.
    pub fn shutdown(&self) {
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        if self.inner.fetcher.cancel() {
            self.inner.dispatch(StoreEvent::ProfileFetchCancelled);
        }
        debug!("Session store shut down");
    }

    /// Sign in with email and password.
    ///
    /// The provider's `SignedIn` event, not the return value, updates the
    /// store.
    pub async fn sign_in(&self, credentials: &Credentials) -> AuthResult<Session> {
        self.inner.logout.clear();
        self.inner.dispatch(StoreEvent::AuthRequestStarted);
        let result = self
            .inner
            .identity
            .sign_in_with_password(&credentials.email, &credentials.password)
            .await;
        self.inner.dispatch(StoreEvent::AuthRequestFinished);

        match &result {
            Ok(session) => info!(subject_id = %session.subject_id, "Signed in"),
            Err(e) => warn!(error = %e, "Sign-in failed"),
        }
        result
    }

    /// Create an account and its profile rows.
    ///
    /// The account is not rolled back when a row write fails.
    pub async fn sign_up(&self, credentials: &Credentials, profile: &SignUpProfile) -> AuthResult<()> {
        self.inner.logout.clear();
        self.inner.dispatch(StoreEvent::AuthRequestStarted);
        let result = self.inner.create_account(credentials, profile).await;
        self.inner.dispatch(StoreEvent::AuthRequestFinished);

        if let Err(e) = &result {
            warn!(error = %e, "Sign-up failed");
        }
        result
    }

    /// Sign out locally. State is cleared before the provider is called.
    pub async fn sign_out(&self) {
        self.inner.logout.begin();
        self.inner.fetcher.cancel();
        self.inner.dispatch(StoreEvent::SignedOut);

        if let Err(e) = self.inner.identity.sign_out(SignOutScope::Local).await {
            warn!(error = %e, "Provider sign-out failed, local state already cleared");
        }
        info!("Signed out");
    }

    /// Write `update` to the profile store, base record first.
    ///
    /// Each side that succeeds is merged into memory and the cache. When the
    /// role-specific write fails after the base write succeeded the call
    /// returns [`SyncError::PartialWrite`] and the base change stays.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> SyncResult<()> {
        let state = self.snapshot();
        if state.session.is_none() {
            return Err(SyncError::NoSession);
        }
        let current = state.profile.ok_or(SyncError::NoProfile)?;

        let split = update.split(current.role)?;
        let mut preview = current.clone();
        preview.apply_base(&split.base)?;
        preview.apply_role(&split.role_specific)?;

        let subject_id = current.subject_id.as_str();
        if !split.base.is_empty() {
            if let Err(e) = self.inner.profiles.update_base(subject_id, &split.base).await {
                warn!(subject_id, error = %e, "Base profile write failed");
                return Err(SyncError::Store(e.to_string()));
            }
            self.inner
                .merge_into_profile(subject_id, |p| p.apply_base(&split.base));
        }

        if !split.role_specific.is_empty() {
            let written = self
                .inner
                .profiles
                .update_role_record(subject_id, current.role, &split.role_specific)
                .await;
            if let Err(e) = written {
                let error = if split.base.is_empty() {
                    SyncError::Store(e.to_string())
                } else {
                    SyncError::PartialWrite {
                        applied: WriteSide::Base,
                        failed: WriteSide::RoleSpecific,
                        message: e.to_string(),
                    }
                };
                warn!(subject_id, error = %error, "Role-specific profile write failed");
                return Err(error);
            }
            self.inner
                .merge_into_profile(subject_id, |p| p.apply_role(&split.role_specific));
        }

        info!(subject_id, fields = update.fields().len(), "Profile updated");
        Ok(())
    }

    /// Refresh the session and re-fetch the profile. A failed refresh
    /// clears session and profile.
    pub async fn refresh_session(&self) -> AuthResult<()> {
        match self.inner.identity.refresh_session().await {
            Ok(session) => {
                if self.inner.logout.is_logging_out() {
                    debug!("LogoutRaceDiscard: refreshed session arrived during logout");
                    return Ok(());
                }
                let subject_id = session.subject_id.clone();
                self.inner.dispatch(StoreEvent::AuthChanged(AuthStateChange::new(
                    AuthEventKind::TokenRefreshed,
                    Some(session),
                )));
                self.inner.spawn_profile_fetch(subject_id.clone());
                info!(subject_id = %subject_id, "Session refreshed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Session refresh failed, clearing session");
                self.inner.fetcher.cancel();
                self.inner.dispatch(StoreEvent::AuthChanged(AuthStateChange::new(
                    AuthEventKind::SignedOut,
                    None,
                )));
                Err(e)
            }
        }
    }

    /// Fetch the profile again for the current session.
    ///
    /// Returns false when there is no session or a logout is in progress.
    /// Must be called from within a Tokio runtime.
    pub fn retry_profile_fetch(&self) -> bool {
        if self.inner.logout.is_logging_out() {
            debug!("Profile retry ignored during logout");
            return false;
        }
        match self.session() {
            Some(session) => {
                debug!(subject_id = %session.subject_id, "Retrying profile fetch");
                self.inner.spawn_profile_fetch(session.subject_id);
                true
            }
            None => false,
        }
    }

    /// Receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.state.borrow().session.clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.inner.state.borrow().profile.clone()
    }

    pub fn loading(&self) -> bool {
        self.inner.state.borrow().loading()
    }

    pub fn auth_loading(&self) -> bool {
        self.inner.state.borrow().auth_loading
    }

    pub fn profile_loading(&self) -> bool {
        self.inner.state.borrow().profile_loading
    }

    pub fn profile_error(&self) -> Option<String> {
        self.inner.state.borrow().profile_error.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.state.borrow().phase
    }

    pub fn fetch_state(&self) -> FetchState {
        self.inner.fetcher.state()
    }

    pub fn logout_mode(&self) -> LogoutMode {
        self.inner.logout.mode()
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    /// Wait until `predicate` holds, up to `timeout`.
    pub async fn wait_for(
        &self,
        timeout: Duration,
        predicate: impl FnMut(&SessionState) -> bool,
    ) -> Option<SessionState> {
        let mut rx = self.inner.state.subscribe();
        let settled = match tokio::time::timeout(timeout, rx.wait_for(predicate)).await {
            Ok(Ok(state)) => Some(state.clone()),
            _ => None,
        };
        settled
    }

    /// Wait until neither loading flag is set. Returns false on timeout.
    pub async fn wait_until_settled(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, |state| !state.loading())
            .await
            .is_some()
    }
}

impl StoreInner {
    /// Run `event` through the reducer and apply its effects.
    ///
    /// Cache and cancel effects run under the state lock so they stay in
    /// reducer order; fetches start after it is released.
    fn dispatch(self: &Arc<Self>, event: StoreEvent) {
        let mut fetches = Vec::new();
        self.state.send_modify(|state| {
            let transition = reduce(state, event);
            if transition.state.phase != state.phase {
                debug!(
                    old_phase = ?state.phase,
                    new_phase = ?transition.state.phase,
                    "Session phase transition"
                );
            }
            *state = transition.state;

            for effect in transition.effects {
                match effect {
                    Effect::FetchProfile { subject_id } => fetches.push(subject_id),
                    Effect::CancelFetch => {
                        self.fetcher.cancel();
                    }
                    Effect::WriteCache(profile) => {
                        if let Err(e) = self.cache.write(Some(&profile)) {
                            warn!(error = %e, "Failed to write profile cache");
                        }
                    }
                    Effect::ClearCache => {
                        if let Err(e) = self.cache.clear() {
                            warn!(error = %e, "Failed to clear profile cache");
                        }
                    }
                }
            }
        });

        for subject_id in fetches {
            self.spawn_profile_fetch(subject_id);
        }
    }

    fn handle_auth_change(self: &Arc<Self>, change: AuthStateChange) {
        if self.logout.is_logging_out() {
            debug!(event = ?change.kind, "LogoutRaceDiscard: auth event during logout");
            return;
        }
        debug!(
            event = ?change.kind,
            subject_id = ?change.session.as_ref().map(|s| s.subject_id.as_str()),
            "Auth state change"
        );
        self.dispatch(StoreEvent::AuthChanged(change));
    }

    fn current_subject(&self) -> Option<String> {
        self.state.borrow().subject_id().map(str::to_string)
    }

    /// Claim the fetch slot now and run the read on a task.
    fn spawn_profile_fetch(self: &Arc<Self>, subject_id: String) {
        let permit = match self.fetcher.begin(&subject_id) {
            Acquire::Granted(permit) => permit,
            Acquire::InFlight => {
                debug!(subject_id = %subject_id, "Profile fetch already in flight");
                return;
            }
        };

        self.dispatch(StoreEvent::ProfileFetchStarted {
            subject_id: subject_id.clone(),
        });
        let inner = self.clone();
        tokio::spawn(async move {
            let outcome = inner.fetcher.run(&permit).await;
            inner.apply_fetch_outcome(subject_id, &permit, outcome);
        });
    }

    fn schedule_profile_fetch(self: &Arc<Self>, subject_id: String, delay: Duration) {
        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if inner.logout.is_logging_out() {
                debug!(subject_id = %subject_id, "LogoutRaceDiscard: scheduled fetch skipped");
                return;
            }
            if inner.current_subject().as_deref() != Some(subject_id.as_str()) {
                debug!(subject_id = %subject_id, "Session changed before scheduled fetch");
                return;
            }
            inner.spawn_profile_fetch(subject_id);
        });
    }

    fn apply_fetch_outcome(
        self: &Arc<Self>,
        subject_id: String,
        permit: &FetchPermit,
        outcome: FetchOutcome,
    ) {
        let discard = self.logout.is_logging_out() || permit.abort_reason().is_some();

        match outcome {
            FetchOutcome::Loaded(_) | FetchOutcome::Failed(_) if discard => {
                debug!(subject_id = %subject_id, "LogoutRaceDiscard: fetch result dropped");
            }
            FetchOutcome::Loaded(profile) => {
                info!(subject_id = %subject_id, role = %profile.role, "Profile loaded");
                self.dispatch(StoreEvent::ProfileLoaded(profile));
            }
            FetchOutcome::Failed(error) => {
                warn!(subject_id = %subject_id, error = %error, "Profile fetch failed");
                self.dispatch(StoreEvent::ProfileFetchFailed {
                    subject_id,
                    message: error.to_string(),
                });
            }
            FetchOutcome::Aborted(AbortReason::TimedOut) => {
                if discard {
                    return;
                }
                warn!(subject_id = %subject_id, "Profile fetch timed out");
                self.dispatch(StoreEvent::ProfileFetchTimedOut { subject_id });
            }
            FetchOutcome::Aborted(reason) => {
                debug!(subject_id = %subject_id, reason = %reason, "Profile fetch aborted");
            }
            FetchOutcome::Discarded => {
                debug!(subject_id = %subject_id, "LogoutRaceDiscard: fetch discarded");
            }
            FetchOutcome::AlreadyInFlight => {}
        }
    }

    async fn create_account(
        self: &Arc<Self>,
        credentials: &Credentials,
        profile: &SignUpProfile,
    ) -> AuthResult<()> {
        let created = self
            .identity
            .sign_up(&credentials.email, &credentials.password, profile.metadata())
            .await?;
        let subject_id = created.subject_id;
        info!(subject_id = %subject_id, role = %profile.role(), "Account created");

        let base = profile.base_record(&subject_id, &credentials.email);
        self.profiles
            .insert_base(&base)
            .await
            .map_err(|e| SyncError::Store(e.to_string()))?;

        if let Err(e) = self
            .profiles
            .insert_role_record(&subject_id, &profile.details)
            .await
        {
            return Err(SyncError::PartialWrite {
                applied: WriteSide::Base,
                failed: WriteSide::RoleSpecific,
                message: e.to_string(),
            }
            .into());
        }

        if created.session.is_some() {
            self.schedule_profile_fetch(subject_id, self.settings.signup_propagation_delay());
        } else {
            info!(subject_id = %subject_id, "Account awaits confirmation, profile loads on sign-in");
        }
        Ok(())
    }

    /// Apply a successful write to the loaded profile, if it is still the
    /// same subject's.
    fn merge_into_profile(
        self: &Arc<Self>,
        subject_id: &str,
        apply: impl FnOnce(&mut Profile) -> SyncResult<()>,
    ) {
        if self.logout.is_logging_out() {
            debug!(subject_id, "LogoutRaceDiscard: profile merge skipped");
            return;
        }
        let loaded = self
            .state
            .borrow()
            .profile
            .clone()
            .filter(|p| p.subject_id == subject_id);
        let Some(mut profile) = loaded else {
            return;
        };
        if let Err(e) = apply(&mut profile) {
            warn!(subject_id, error = %e, "Failed to merge profile write");
            return;
        }
        self.dispatch(StoreEvent::ProfilePatched(profile));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::model::fixtures::full_row;
    use crate::model::{InfluencerDetails, Role, RoleDetails};
    use crate::test_support::{MockIdentityProvider, MockProfileStore};
    use profile_kv_storage::{MemoryStorage, StorageKeys};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    struct Harness {
        store: SessionStore,
        identity: Arc<MockIdentityProvider>,
        profiles: Arc<MockProfileStore>,
        storage: StorageHandle,
    }

    impl Harness {
        fn cached(&self) -> Option<Profile> {
            PersistentCache::new(self.storage.clone()).read()
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(MemoryStorage::new()))
    }

    fn harness_with(storage: StorageHandle) -> Harness {
        let identity = Arc::new(MockIdentityProvider::new());
        identity.add_account("dana@example.com", "correct-horse", "u1");
        let profiles = Arc::new(MockProfileStore::new());
        let store = SessionStore::new(
            identity.clone(),
            profiles.clone(),
            storage.clone(),
            SyncSettings::default(),
        );
        Harness {
            store,
            identity,
            profiles,
            storage,
        }
    }

    fn creds() -> Credentials {
        Credentials::new("dana@example.com", "correct-horse")
    }

    async fn settle(
        store: &SessionStore,
        predicate: impl FnMut(&SessionState) -> bool,
    ) -> SessionState {
        store
            .wait_for(Duration::from_secs(60), predicate)
            .await
            .expect("state never reached")
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("condition never became true");
    }

    async fn signed_in_with(role: Role) -> Harness {
        let h = harness();
        h.profiles.insert_row(full_row("u1", role));
        h.store.initialize().await.unwrap();
        h.store.sign_in(&creds()).await.unwrap();
        settle(&h.store, |s| s.profile.is_some()).await;
        h
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_in_loads_influencer_profile() {
        let h = harness();
        h.profiles.insert_row(full_row("u1", Role::Influencer));
        h.store.initialize().await.unwrap();
        assert!(!h.store.auth_loading());
        assert_eq!(h.store.phase(), SessionPhase::Unauthenticated);

        let session = h.store.sign_in(&creds()).await.unwrap();
        assert_eq!(session.subject_id, "u1");

        let state = settle(&h.store, |s| s.profile.is_some()).await;
        let profile = state.profile.clone().unwrap();
        assert_eq!(profile.role, Role::Influencer);
        let flat = profile.flattened();
        assert_eq!(flat["email"], json!("u1@example.com"));
        assert_eq!(flat["bio"], json!("Trail runner"));
        assert!(!flat.contains_key("company_name"));

        assert_eq!(state.phase, SessionPhase::AuthenticatedWithProfile);
        assert!(!state.loading());
        assert_eq!(h.profiles.reads(), 1);
        assert_eq!(h.cached(), Some(profile));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_credentials_surface_error() {
        let h = harness();
        h.store.initialize().await.unwrap();

        let err = h
            .store
            .sign_in(&Credentials::new("dana@example.com", "wrong"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::InvalidCredentials(_)));
        assert!(!h.store.auth_loading());
        assert!(h.store.session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_sign_in_events_issue_one_read() {
        let h = harness();
        h.profiles.insert_row(full_row("u1", Role::Business));
        h.profiles.set_read_delay(Duration::from_millis(300));
        h.store.initialize().await.unwrap();

        h.store.sign_in(&creds()).await.unwrap();
        for _ in 0..3 {
            h.identity
                .emit(AuthStateChange::signed_in(Session::new("u1")));
        }

        settle(&h.store, |s| s.profile.is_some()).await;
        assert_eq!(h.profiles.reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_out_during_fetch_wins() {
        let h = harness();
        h.profiles.insert_row(full_row("u1", Role::Business));
        h.profiles.set_read_delay(Duration::from_secs(3));
        h.store.initialize().await.unwrap();
        h.store.sign_in(&creds()).await.unwrap();
        eventually(|| h.profiles.reads() == 1).await;

        h.store.sign_out().await;
        assert!(h.store.session().is_none());
        assert!(h.store.profile().is_none());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.store.session().is_none());
        assert!(h.store.profile().is_none());
        assert_eq!(h.store.phase(), SessionPhase::Unauthenticated);
        assert!(!h.store.loading());
        assert_eq!(h.cached(), None);
        assert_eq!(h.profiles.reads(), 1);
        assert_eq!(*h.identity.sign_out_scopes.lock(), vec![SignOutScope::Local]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_out_during_failing_fetch_wins() {
        let h = harness();
        h.profiles.fail_reads("connection reset");
        h.profiles.set_read_delay(Duration::from_secs(2));
        h.store.initialize().await.unwrap();
        h.store.sign_in(&creds()).await.unwrap();
        eventually(|| h.profiles.reads() == 1).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        h.store.sign_out().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        let state = h.store.snapshot();
        assert!(state.session.is_none());
        assert!(state.profile.is_none());
        assert!(state.profile_error.is_none());
        assert!(!state.loading());
        assert_eq!(state.phase, SessionPhase::Unauthenticated);
        assert_eq!(h.profiles.reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_logout_login_keeps_second_fetch_only() {
        let h = harness();
        h.profiles.insert_row(full_row("u1", Role::Influencer));
        h.profiles.stamp_reads();
        h.profiles.set_read_delay(Duration::from_millis(500));
        h.store.initialize().await.unwrap();

        h.store.sign_in(&creds()).await.unwrap();
        eventually(|| h.profiles.reads() == 1).await;
        h.store.sign_out().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        h.store.sign_in(&creds()).await.unwrap();

        let state = settle(&h.store, |s| s.profile.is_some()).await;
        let full_name = |p: Option<Profile>| p.and_then(|p| p.base.full_name);
        assert_eq!(full_name(state.profile), Some("read-2".to_string()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(full_name(h.store.profile()), Some("read-2".to_string()));
        assert_eq!(h.profiles.reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_during_logout_guard_are_dropped() {
        let h = signed_in_with(Role::Influencer).await;

        h.store.sign_out().await;
        h.identity
            .emit(AuthStateChange::signed_in(Session::new("u1")));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.store.session().is_none());
        assert_eq!(h.store.logout_mode(), LogoutMode::LoggingOut);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.store.logout_mode(), LogoutMode::Active);

        h.identity
            .emit(AuthStateChange::signed_in(Session::new("u1")));
        settle(&h.store, |s| s.profile.is_some()).await;
        assert_eq!(h.profiles.reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_profile_fails_after_retries_then_manual_retry() {
        let h = harness();
        h.store.initialize().await.unwrap();
        h.store.sign_in(&creds()).await.unwrap();

        let state = settle(&h.store, |s| s.profile_error.is_some()).await;
        assert_eq!(h.profiles.reads(), 4);
        assert!(state.profile.is_none());
        assert!(!state.profile_loading);
        assert_eq!(state.phase, SessionPhase::AuthenticatedNoProfile);
        assert!(state.profile_error.unwrap().contains("not provisioned"));

        h.profiles.insert_row(full_row("u1", Role::Business));
        assert!(h.store.retry_profile_fetch());
        let state = settle(&h.store, |s| s.profile.is_some()).await;
        assert_eq!(h.profiles.reads(), 5);
        assert!(state.profile_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_without_session_is_noop() {
        let h = harness();
        h.store.initialize().await.unwrap();
        assert!(!h.store.retry_profile_fetch());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_read_times_out_softly() {
        let h = harness();
        h.profiles.insert_row(full_row("u1", Role::Influencer));
        h.profiles.set_read_delay(Duration::from_secs(30));
        h.store.initialize().await.unwrap();
        h.store.sign_in(&creds()).await.unwrap();

        settle(&h.store, |s| s.profile_loading).await;
        let state = settle(&h.store, |s| !s.profile_loading).await;

        assert!(state.profile.is_none());
        assert!(state.profile_error.is_none());
        assert!(!h.store.fetch_state().in_flight);
        assert_eq!(state.phase, SessionPhase::AuthenticatedNoProfile);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_update_keeps_base_change() {
        let h = signed_in_with(Role::Business).await;
        h.profiles.fail_role_writes(true);

        let update = ProfileUpdate::new()
            .set("company_name", "X")
            .set("email", "y@z.com");
        let err = h.store.update_profile(&update).await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::PartialWrite {
                applied: WriteSide::Base,
                failed: WriteSide::RoleSpecific,
                ..
            }
        ));
        let profile = h.store.profile().unwrap();
        assert_eq!(profile.base.email.as_deref(), Some("y@z.com"));
        assert_eq!(
            profile.business().unwrap().company_name.as_deref(),
            Some("Acme Outdoor")
        );
        assert!(profile.influencer().is_none());
        assert_eq!(h.cached(), Some(profile));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_writes_both_sides() {
        let h = signed_in_with(Role::Influencer).await;

        let update = ProfileUpdate::new()
            .set("full_name", "Dana R.")
            .set("follower_count", 52_000);
        h.store.update_profile(&update).await.unwrap();

        let profile = h.store.profile().unwrap();
        assert_eq!(profile.base.full_name.as_deref(), Some("Dana R."));
        assert_eq!(profile.influencer().unwrap().follower_count, Some(52_000));
        assert_eq!(h.profiles.base_writes.load(Ordering::SeqCst), 1);
        assert_eq!(h.profiles.role_writes.load(Ordering::SeqCst), 1);

        let row = h.profiles.row("u1").unwrap();
        assert_eq!(row.influencer.unwrap().follower_count, Some(52_000));
        assert_eq!(h.cached(), Some(profile));
    }

    #[tokio::test(start_paused = true)]
    async fn test_role_only_update_failure_is_store_error() {
        let h = signed_in_with(Role::Business).await;
        h.profiles.fail_role_writes(true);
        let before = h.store.profile();

        let err = h
            .store
            .update_profile(&ProfileUpdate::new().set("industry", "Travel"))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Store(_)));
        assert_eq!(h.store.profile(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_rejects_foreign_fields_before_writing() {
        let h = signed_in_with(Role::Business).await;

        let update = ProfileUpdate::new().set("email", "a@b.co").set("bio", "x");
        let err = h.store.update_profile(&update).await.unwrap_err();

        assert_eq!(err, SyncError::UnknownField("bio".into()));
        assert_eq!(h.profiles.base_writes.load(Ordering::SeqCst), 0);

        let err = h
            .store
            .update_profile(&ProfileUpdate::new().set("phone", 42))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidValue { .. }));
        assert_eq!(h.profiles.base_writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_without_session() {
        let h = harness();
        h.store.initialize().await.unwrap();
        let err = h
            .store
            .update_profile(&ProfileUpdate::new().set("email", "a@b.co"))
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::NoSession);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_refetches_profile() {
        let h = signed_in_with(Role::Influencer).await;

        h.store.refresh_session().await.unwrap();
        eventually(|| h.profiles.reads() == 2).await;
        settle(&h.store, |s| !s.loading()).await;
        assert!(h.store.profile().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_clears_state() {
        let h = signed_in_with(Role::Influencer).await;
        h.identity.set_refresh_fails(true);

        let err = h.store.refresh_session().await.unwrap_err();

        assert!(matches!(err, AuthError::SessionExpired));
        assert!(h.store.session().is_none());
        assert!(h.store.profile().is_none());
        assert_eq!(h.cached(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_up_writes_rows_then_loads_profile() {
        let h = harness();
        h.store.initialize().await.unwrap();
        let signup = SignUpProfile {
            full_name: Some("Ivy Chen".into()),
            phone: None,
            details: RoleDetails::Influencer(InfluencerDetails {
                niche: Some("Food".into()),
                ..Default::default()
            }),
        };

        h.store
            .sign_up(&Credentials::new("ivy@example.com", "pw-123456"), &signup)
            .await
            .unwrap();

        let state = settle(&h.store, |s| s.profile.is_some()).await;
        let profile = state.profile.unwrap();
        assert_eq!(profile.subject_id, "new-user-1");
        assert_eq!(profile.role, Role::Influencer);
        assert_eq!(profile.base.email.as_deref(), Some("ivy@example.com"));
        assert_eq!(profile.influencer().unwrap().niche.as_deref(), Some("Food"));
        assert_eq!(h.profiles.base_writes.load(Ordering::SeqCst), 1);
        assert_eq!(h.profiles.role_writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_up_role_write_failure_is_partial() {
        let h = harness();
        h.store.initialize().await.unwrap();
        h.profiles.fail_role_writes(true);
        let signup = SignUpProfile {
            full_name: None,
            phone: None,
            details: RoleDetails::empty_for(Role::Business).unwrap(),
        };

        let err = h
            .store
            .sign_up(&Credentials::new("acme@example.com", "pw-123456"), &signup)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AuthError::Profile(SyncError::PartialWrite { .. })
        ));
        assert!(h.profiles.row("new-user-1").is_some());
        assert!(!h.store.auth_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_up_pending_confirmation_skips_fetch() {
        let h = harness();
        h.identity.set_sign_up_returns_session(false);
        h.store.initialize().await.unwrap();
        let signup = SignUpProfile {
            full_name: None,
            phone: None,
            details: RoleDetails::empty_for(Role::Influencer).unwrap(),
        };

        h.store
            .sign_up(&Credentials::new("new@example.com", "pw-123456"), &signup)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(h.profiles.reads(), 0);
        assert!(h.store.session().is_none());
        assert_eq!(h.profiles.role_writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_profile_prepopulates_new_store() {
        let storage: StorageHandle = Arc::new(MemoryStorage::new());
        let profile = Profile::assemble(full_row("u1", Role::Influencer));
        PersistentCache::new(storage.clone())
            .write(Some(&profile))
            .unwrap();

        let h = harness_with(storage);
        assert_eq!(h.store.profile(), Some(profile.clone()));
        assert!(h.store.auth_loading());

        let mut row = full_row("u1", Role::Influencer);
        row.base.fields.full_name = Some("canonical".into());
        h.identity.restore_session(Session::new("u1"));
        h.profiles.insert_row(row);
        h.store.initialize().await.unwrap();

        assert_eq!(h.store.phase(), SessionPhase::AuthenticatedWithProfile);
        assert_eq!(h.store.profile(), Some(profile));
        assert!(h.store.profile_loading());

        let state = settle(&h.store, |s| !s.profile_loading).await;
        assert_eq!(h.profiles.reads(), 1);
        let canonical = state.profile.unwrap();
        assert_eq!(canonical.base.full_name.as_deref(), Some("canonical"));
        assert_eq!(h.cached(), Some(canonical));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_profile_for_other_subject_is_replaced() {
        let storage: StorageHandle = Arc::new(MemoryStorage::new());
        PersistentCache::new(storage.clone())
            .write(Some(&Profile::assemble(full_row("previous-user", Role::Business))))
            .unwrap();

        let h = harness_with(storage);
        h.identity.restore_session(Session::new("u1"));
        h.profiles.insert_row(full_row("u1", Role::Influencer));
        h.store.initialize().await.unwrap();

        let state = settle(&h.store, |s| s.profile.is_some()).await;
        assert_eq!(state.profile.unwrap().subject_id, "u1");
        assert_eq!(h.cached().unwrap().subject_id, "u1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_session_at_startup_clears_cache() {
        let storage: StorageHandle = Arc::new(MemoryStorage::new());
        PersistentCache::new(storage.clone())
            .write(Some(&Profile::assemble(full_row("u1", Role::Business))))
            .unwrap();

        let h = harness_with(storage);
        h.store.initialize().await.unwrap();

        assert!(h.store.profile().is_none());
        assert_eq!(h.cached(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_logout_discards_cache() {
        let storage: StorageHandle = Arc::new(MemoryStorage::new());
        PersistentCache::new(storage.clone())
            .write(Some(&Profile::assemble(full_row("u1", Role::Business))))
            .unwrap();
        storage.set(StorageKeys::LOGOUT_GUARD, "1").unwrap();

        let h = harness_with(storage.clone());

        assert!(h.store.profile().is_none());
        assert_eq!(h.cached(), None);
        assert!(!storage.has(StorageKeys::LOGOUT_GUARD).unwrap());
        assert_eq!(h.store.logout_mode(), LogoutMode::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_listening() {
        let h = harness();
        h.profiles.insert_row(full_row("u1", Role::Business));
        h.store.initialize().await.unwrap();
        h.store.shutdown();

        h.identity
            .emit(AuthStateChange::signed_in(Session::new("u1")));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(h.store.session().is_none());
        assert_eq!(h.profiles.reads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_fetch_clears_loading() {
        let h = harness();
        h.profiles.insert_row(full_row("u1", Role::Business));
        h.profiles.set_read_delay(Duration::from_secs(3));
        h.store.initialize().await.unwrap();
        h.store.sign_in(&creds()).await.unwrap();
        eventually(|| h.profiles.reads() == 1).await;
        assert!(h.store.profile_loading());

        h.store.shutdown();

        assert!(!h.store.profile_loading());
        assert!(!h.store.fetch_state().in_flight);
        assert!(h.store.session().is_some());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.store.profile().is_none());
        assert!(h.store.profile_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_observes_changes() {
        let h = harness();
        h.profiles.insert_row(full_row("u1", Role::Business));
        let mut rx = h.store.watch();
        h.store.initialize().await.unwrap();
        h.store.sign_in(&creds()).await.unwrap();

        let state = rx
            .wait_for(|s| s.phase == SessionPhase::AuthenticatedWithProfile)
            .await
            .unwrap()
            .clone();
        assert_eq!(state.subject_id(), Some("u1"));
        assert!(h.store.wait_until_settled(Duration::from_secs(1)).await);
    }
}
