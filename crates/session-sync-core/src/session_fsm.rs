//! Session/profile state and its pure reducer.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐ SessionEstablished ┌────────────────────────┐
//! │ Unauthenticated │ ─────────────────► │ AuthenticatedNoProfile │
//! └─────────────────┘                    └───────────┬────────────┘
//!          ▲                                ProfileResolved │ ▲ ProfileUnavailable
//!          │ SessionCleared                             ▼ │
//!          │                             ┌──────────────────────────┐
//!          └──────────────────────────── │ AuthenticatedWithProfile │
//!                                        └──────────────────────────┘
//! ```
//!
//! Logging out is not a phase: the store drops events while the logout
//! coordinator is up, and sign-out itself always lands in `Unauthenticated`.
//!
//! [`reduce`] maps `(state, event)` to a new state plus the side effects
//! the store must run. It performs no I/O.

use crate::model::{Profile, Session};
use crate::provider::{AuthEventKind, AuthStateChange};
use rust_fsm::*;
use tracing::debug;

state_machine! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub session_machine(Unauthenticated)

    Unauthenticated => {
        SessionEstablished => AuthenticatedNoProfile,
        SessionCleared => Unauthenticated
    },
    AuthenticatedNoProfile => {
        SessionEstablished => AuthenticatedNoProfile,
        ProfileResolved => AuthenticatedWithProfile,
        ProfileUnavailable => AuthenticatedNoProfile,
        SessionCleared => Unauthenticated
    },
    AuthenticatedWithProfile => {
        SessionEstablished => AuthenticatedWithProfile,
        ProfileResolved => AuthenticatedWithProfile,
        ProfileUnavailable => AuthenticatedNoProfile,
        SessionCleared => Unauthenticated
    }
}

pub use session_machine::State as SessionPhase;
use session_machine::Input as PhaseInput;

/// Everything the UI observes.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub session: Option<Session>,
    pub profile: Option<Profile>,
    /// Waiting on the identity provider.
    pub auth_loading: bool,
    /// Waiting on a profile fetch.
    pub profile_loading: bool,
    /// Message of the last terminal fetch failure.
    pub profile_error: Option<String>,
}

impl SessionState {
    /// State at construction: the cached profile is shown while the
    /// provider resolves the session.
    pub fn initial(cached: Option<Profile>) -> Self {
        Self {
            phase: SessionPhase::Unauthenticated,
            session: None,
            profile: cached,
            auth_loading: true,
            profile_loading: false,
            profile_error: None,
        }
    }

    pub fn loading(&self) -> bool {
        self.auth_loading || self.profile_loading
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.subject_id.as_str())
    }

    fn is_current_subject(&self, subject_id: &str) -> bool {
        self.subject_id() == Some(subject_id)
    }

    fn advance(&mut self, input: PhaseInput) {
        match <session_machine::Impl as StateMachineImpl>::transition(&self.phase, &input) {
            Some(next) => self.phase = next,
            None => debug!(phase = ?self.phase, input = ?input, "Ignoring impossible phase input"),
        }
    }

    fn clear_session(&mut self) {
        self.session = None;
        self.profile = None;
        self.auth_loading = false;
        self.profile_loading = false;
        self.profile_error = None;
        self.advance(PhaseInput::SessionCleared);
    }
}

/// Inputs to the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// Session change from the provider stream or an explicit call.
    AuthChanged(AuthStateChange),
    AuthRequestStarted,
    AuthRequestFinished,
    ProfileFetchStarted { subject_id: String },
    ProfileLoaded(Profile),
    ProfileFetchFailed { subject_id: String, message: String },
    /// A read exceeded the timeout: soft failure, no error surfaced.
    ProfileFetchTimedOut { subject_id: String },
    /// The in-flight fetch was dropped by its owner; no error surfaced.
    ProfileFetchCancelled,
    /// Local merge after a successful profile write.
    ProfilePatched(Profile),
    SignedOut,
}

/// Side effects requested by the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchProfile { subject_id: String },
    CancelFetch,
    WriteCache(Profile),
    ClearCache,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: SessionState,
    pub effects: Vec<Effect>,
}

/// Apply `event` to `state`.
///
/// Events about a subject other than the current session leave the state
/// untouched.
pub fn reduce(state: &SessionState, event: StoreEvent) -> Transition {
    let mut next = state.clone();
    let mut effects = Vec::new();

    match event {
        StoreEvent::AuthChanged(AuthStateChange {
            kind,
            session: Some(session),
        }) => {
            let subject_changed = !state.is_current_subject(&session.subject_id);
            let stale_profile = next
                .profile
                .as_ref()
                .is_some_and(|p| p.subject_id != session.subject_id);

            if subject_changed && state.session.is_some() {
                effects.push(Effect::CancelFetch);
            }
            if stale_profile {
                next.profile = None;
                next.profile_error = None;
                next.advance(PhaseInput::ProfileUnavailable);
                effects.push(Effect::ClearCache);
            }

            next.session = Some(session);
            next.auth_loading = false;
            next.advance(PhaseInput::SessionEstablished);
            if next.profile.is_some() {
                next.advance(PhaseInput::ProfileResolved);
            }

            // A cached profile stays visible while the canonical one loads.
            let needs_fetch = match kind {
                AuthEventKind::SignedIn | AuthEventKind::InitialSession => true,
                _ => {
                    next.profile.is_none()
                        && (subject_changed || stale_profile || next.profile_error.is_none())
                }
            };
            if needs_fetch {
                if let Some(subject_id) = next.subject_id().map(str::to_string) {
                    next.profile_loading = true;
                    next.profile_error = None;
                    effects.push(Effect::FetchProfile { subject_id });
                }
            }
        }

        StoreEvent::AuthChanged(AuthStateChange { session: None, .. })
        | StoreEvent::SignedOut => {
            next.clear_session();
            effects.push(Effect::CancelFetch);
            effects.push(Effect::ClearCache);
        }

        StoreEvent::AuthRequestStarted => next.auth_loading = true,
        StoreEvent::AuthRequestFinished => next.auth_loading = false,

        StoreEvent::ProfileFetchStarted { subject_id } => {
            if next.is_current_subject(&subject_id) {
                next.profile_loading = true;
                next.profile_error = None;
            }
        }

        StoreEvent::ProfileLoaded(profile) => {
            if next.is_current_subject(&profile.subject_id) {
                next.profile = Some(profile.clone());
                next.profile_loading = false;
                next.profile_error = None;
                next.advance(PhaseInput::ProfileResolved);
                effects.push(Effect::WriteCache(profile));
            }
        }

        StoreEvent::ProfileFetchFailed {
            subject_id,
            message,
        } => {
            if next.is_current_subject(&subject_id) {
                next.profile = None;
                next.profile_loading = false;
                next.profile_error = Some(message);
                next.advance(PhaseInput::ProfileUnavailable);
                effects.push(Effect::ClearCache);
            }
        }

        StoreEvent::ProfileFetchTimedOut { subject_id } => {
            if next.is_current_subject(&subject_id) {
                next.profile_loading = false;
            }
        }

        StoreEvent::ProfileFetchCancelled => next.profile_loading = false,

        StoreEvent::ProfilePatched(profile) => {
            let matches_loaded = next
                .profile
                .as_ref()
                .is_some_and(|p| p.subject_id == profile.subject_id);
            if matches_loaded && next.is_current_subject(&profile.subject_id) {
                next.profile = Some(profile.clone());
                effects.push(Effect::WriteCache(profile));
            }
        }
    }

    Transition {
        state: next,
        effects,
    }
}
