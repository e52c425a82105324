//! Per-fetch cancellation and mutual exclusion.
//!
//! [`FetchGuard`] owns the single in-flight slot. Every granted fetch gets its
//! own [`FetchPermit`] carrying its own [`CancellationToken`], so cancelling
//! one fetch can never reach a later one.

use crate::error::AbortReason;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Snapshot of the fetch slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchState {
    pub in_flight: bool,
    pub retry_count: u32,
    pub subject_id: Option<String>,
}

struct InFlight {
    id: u64,
    subject_id: String,
    token: CancellationToken,
    superseded: Arc<AtomicBool>,
    retry_count: u32,
}

#[derive(Default)]
struct Slot {
    next_id: u64,
    current: Option<InFlight>,
}

/// Outcome of [`FetchGuard::try_acquire`].
pub enum Acquire {
    /// The caller owns the slot until the permit is dropped.
    Granted(FetchPermit),
    /// A fetch for the same subject is already running.
    InFlight,
}

/// Mutual-exclusion slot for profile fetches.
#[derive(Clone, Default)]
pub struct FetchGuard {
    slot: Arc<Mutex<Slot>>,
}

impl FetchGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `subject_id`.
    ///
    /// A running fetch for the same subject wins and the caller gets
    /// [`Acquire::InFlight`]. A running fetch for a different subject is
    /// cancelled as superseded and replaced.
    pub fn try_acquire(&self, subject_id: &str) -> Acquire {
        let mut slot = self.slot.lock();

        if let Some(current) = slot.current.take() {
            if current.subject_id == subject_id && !current.token.is_cancelled() {
                slot.current = Some(current);
                return Acquire::InFlight;
            }
            debug!(
                previous_subject = %current.subject_id,
                subject_id,
                "Superseding in-flight profile fetch"
            );
            current.superseded.store(true, Ordering::SeqCst);
            current.token.cancel();
        }

        slot.next_id += 1;
        let id = slot.next_id;
        let token = CancellationToken::new();
        let superseded = Arc::new(AtomicBool::new(false));
        slot.current = Some(InFlight {
            id,
            subject_id: subject_id.to_string(),
            token: token.clone(),
            superseded: superseded.clone(),
            retry_count: 0,
        });

        Acquire::Granted(FetchPermit {
            slot: self.slot.clone(),
            id,
            subject_id: subject_id.to_string(),
            token,
            superseded,
        })
    }

    /// Cancel the in-flight fetch, if any, and free the slot.
    ///
    /// Idempotent. Returns whether a fetch was cancelled.
    pub fn cancel(&self) -> bool {
        let current = self.slot.lock().current.take();
        match current {
            Some(current) => {
                current.token.cancel();
                debug!(subject_id = %current.subject_id, "Cancelled in-flight profile fetch");
                true
            }
            None => false,
        }
    }

    pub fn state(&self) -> FetchState {
        let slot = self.slot.lock();
        match &slot.current {
            Some(current) => FetchState {
                in_flight: true,
                retry_count: current.retry_count,
                subject_id: Some(current.subject_id.clone()),
            },
            None => FetchState::default(),
        }
    }
}

/// Ownership of the fetch slot. Dropping it frees the slot if it still
/// belongs to this fetch.
pub struct FetchPermit {
    slot: Arc<Mutex<Slot>>,
    id: u64,
    subject_id: String,
    token: CancellationToken,
    superseded: Arc<AtomicBool>,
}

impl FetchPermit {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Token cancelled when this fetch is aborted.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Why this fetch was aborted, or `None` while it is still live.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        if !self.token.is_cancelled() {
            return None;
        }
        if self.superseded.load(Ordering::SeqCst) {
            Some(AbortReason::Superseded)
        } else {
            Some(AbortReason::Cancelled)
        }
    }

    pub(crate) fn record_retry(&self, retry_count: u32) {
        let mut slot = self.slot.lock();
        if let Some(current) = slot.current.as_mut().filter(|c| c.id == self.id) {
            current.retry_count = retry_count;
        }
    }
}

impl Drop for FetchPermit {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.current.as_ref().is_some_and(|c| c.id == self.id) {
            slot.current = None;
        }
    }
}
