//! Profile fetching: one joined read, retried while the row is missing,
//! bounded per read by a timeout, abortable at any point.

use crate::cancellation::{Acquire, FetchGuard, FetchPermit, FetchState};
use crate::error::{AbortReason, ProfileStoreError, SyncError, SyncResult};
use crate::logout::LogoutCoordinator;
use crate::model::Profile;
use crate::provider::ProfileStoreHandle;
use crate::retry::RetryPolicy;
use auth_config_and_utils::SyncSettings;
use std::time::Duration;
use tracing::{debug, warn};

/// How a fetch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Loaded(Profile),
    /// Terminal failure after retries, or a non-retryable read error.
    Failed(SyncError),
    Aborted(AbortReason),
    /// Logout was in progress; the result was dropped.
    Discarded,
    /// Another fetch for the same subject owns the slot.
    AlreadyInFlight,
}

pub struct ProfileFetcher {
    profiles: ProfileStoreHandle,
    guard: FetchGuard,
    logout: LogoutCoordinator,
    policy: RetryPolicy,
    read_timeout: Duration,
}

impl ProfileFetcher {
    pub fn new(
        profiles: ProfileStoreHandle,
        logout: LogoutCoordinator,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            profiles,
            guard: FetchGuard::new(),
            logout,
            policy: RetryPolicy::from(settings),
            read_timeout: settings.fetch_timeout(),
        }
    }

    /// Claim the fetch slot for `subject_id` without starting the read.
    ///
    /// Claiming synchronously lets a caller spawn the read later while a
    /// cancel issued in between still reaches it.
    pub fn begin(&self, subject_id: &str) -> Acquire {
        self.guard.try_acquire(subject_id)
    }

    /// Claim the slot and run the fetch to completion.
    pub async fn fetch(&self, subject_id: &str) -> FetchOutcome {
        match self.begin(subject_id) {
            Acquire::Granted(permit) => self.run(&permit).await,
            Acquire::InFlight => {
                debug!(subject_id, "Profile fetch already in flight");
                FetchOutcome::AlreadyInFlight
            }
        }
    }

    /// Run a fetch whose slot was claimed with [`begin`](Self::begin).
    ///
    /// The slot stays claimed until `permit` is dropped.
    pub async fn run(&self, permit: &FetchPermit) -> FetchOutcome {
        let subject_id = permit.subject_id().to_string();

        if self.logout.is_logging_out() {
            debug!(subject_id = %subject_id, "LogoutRaceDiscard: fetch started during logout");
            return FetchOutcome::Discarded;
        }

        let token = permit.token().clone();
        let subject = subject_id.as_str();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.policy.attempt(
                move |retry| {
                    permit.record_retry(retry);
                    self.read_once(subject)
                },
                SyncError::is_not_yet_provisioned,
            ) => Some(result),
        };

        if self.logout.is_logging_out() {
            debug!(subject_id = %subject_id, "LogoutRaceDiscard: fetch resolved during logout");
            return FetchOutcome::Discarded;
        }
        if let Some(reason) = permit.abort_reason() {
            debug!(subject_id = %subject_id, reason = %reason, "Profile fetch aborted");
            return FetchOutcome::Aborted(reason);
        }

        match result {
            None => FetchOutcome::Aborted(AbortReason::Cancelled),
            Some(Ok(profile)) => FetchOutcome::Loaded(profile),
            Some(Err(failure)) => match failure.error {
                SyncError::Aborted(reason) => FetchOutcome::Aborted(reason),
                SyncError::NotYetProvisioned { .. } => {
                    warn!(
                        subject_id = %subject_id,
                        attempts = failure.attempts,
                        "Profile still missing after retries"
                    );
                    FetchOutcome::Failed(SyncError::NotYetProvisioned {
                        attempts: failure.attempts,
                    })
                }
                other => FetchOutcome::Failed(other),
            },
        }
    }

    /// Cancel the in-flight fetch. Idempotent.
    pub fn cancel(&self) -> bool {
        self.guard.cancel()
    }

    pub fn state(&self) -> FetchState {
        self.guard.state()
    }

    async fn read_once(&self, subject_id: &str) -> SyncResult<Profile> {
        let read = self.profiles.read_profile(subject_id);
        let row = match tokio::time::timeout(self.read_timeout, read).await {
            Err(_) => {
                warn!(
                    subject_id,
                    timeout_ms = self.read_timeout.as_millis() as u64,
                    "Profile read timed out"
                );
                return Err(SyncError::Aborted(AbortReason::TimedOut));
            }
            Ok(Err(ProfileStoreError::NotFound)) => {
                debug!(subject_id, "Profile row not provisioned yet");
                return Err(SyncError::NotYetProvisioned { attempts: 1 });
            }
            Ok(Err(ProfileStoreError::Backend(message))) => {
                warn!(subject_id, error = %message, "Profile read failed");
                return Err(SyncError::Store(message));
            }
            Ok(Ok(row)) => row,
        };

        if row.base.id != subject_id {
            return Err(SyncError::SubjectMismatch {
                expected: subject_id.to_string(),
                actual: row.base.id,
            });
        }

        Ok(Profile::assemble(row))
    }
}
