//! Session and profile synchronization core.
//!
//! This crate provides:
//! - A session store driven by identity-provider events
//! - Profile fetching with in-flight deduplication, bounded retry, and timeouts
//! - A persistent profile cache for instant display at startup
//! - Explicit FSM-based logout suppression that dominates in-flight work

mod cache;
mod cancellation;
mod error;
mod fetcher;
mod logout;
mod model;
mod provider;
mod retry;
mod session_fsm;
mod store;

#[cfg(test)]
mod test_support;

pub use cache::PersistentCache;
pub use cancellation::{Acquire, FetchGuard, FetchPermit, FetchState};
pub use error::{
    AbortReason, AuthError, AuthResult, ProfileStoreError, ProfileStoreResult, SyncError,
    SyncResult, WriteSide,
};
pub use fetcher::{FetchOutcome, ProfileFetcher};
pub use logout::{logout_machine, LogoutCoordinator, LogoutMode};
pub use model::{
    BaseFields, BaseRecord, BusinessDetails, Credentials, InfluencerDetails, Profile, ProfileRow,
    ProfileUpdate, Role, RoleDetails, Session, SignUpProfile, SplitUpdate,
};
pub use provider::{
    AuthEventKind, AuthStateChange, IdentityHandle, IdentityProvider, ProfileStore,
    ProfileStoreHandle, SignOutScope, SignUpResult,
};
pub use retry::{RetryFailure, RetryPolicy};
pub use session_fsm::{
    reduce, session_machine, Effect, SessionPhase, SessionState, StoreEvent, Transition,
};
pub use store::{SessionStore, Subscription};
