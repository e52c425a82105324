//! Logout suppression.
//!
//! ## State Diagram
//!
//! ```text
//!   ┌──────────┐  LogoutStarted   ┌────────────┐
//!   │  Active  │ ───────────────► │ LoggingOut │
//!   └──────────┘                  └─────┬──────┘
//!        ▲     LoginRequested / GuardElapsed   │
//!        └─────────────────────────────────────┘
//! ```
//!
//! While `LoggingOut`, provider events and fetch results are dropped. The
//! mode ends when a new sign-in starts or after the guard delay, whichever
//! comes first. Each `begin` opens a new epoch so a guard timer left over
//! from an earlier logout cannot end a later one.

use parking_lot::Mutex;
use profile_kv_storage::{StorageHandle, StorageKeys};
use rust_fsm::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

state_machine! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub logout_machine(Active)

    Active => {
        LogoutStarted => LoggingOut,
        LoginRequested => Active
    },
    LoggingOut => {
        LogoutStarted => LoggingOut,
        LoginRequested => Active,
        GuardElapsed => Active
    }
}

pub use logout_machine::State as LogoutMode;
use logout_machine::Input as LogoutInput;

struct Guard {
    machine: logout_machine::StateMachine,
    epoch: u64,
}

struct Inner {
    guard: Mutex<Guard>,
    guard_delay: Duration,
    storage: Option<StorageHandle>,
}

/// Shared logout flag with a self-clearing guard timer.
#[derive(Clone)]
pub struct LogoutCoordinator {
    inner: Arc<Inner>,
}

impl LogoutCoordinator {
    /// Coordinator with an in-memory flag only.
    pub fn new(guard_delay: Duration) -> Self {
        Self::build(guard_delay, None)
    }

    /// Coordinator that mirrors its flag under [`StorageKeys::LOGOUT_GUARD`].
    pub fn with_storage(guard_delay: Duration, storage: StorageHandle) -> Self {
        Self::build(guard_delay, Some(storage))
    }

    fn build(guard_delay: Duration, storage: Option<StorageHandle>) -> Self {
        Self {
            inner: Arc::new(Inner {
                guard: Mutex::new(Guard {
                    machine: logout_machine::StateMachine::new(),
                    epoch: 0,
                }),
                guard_delay,
                storage,
            }),
        }
    }

    pub fn mode(&self) -> LogoutMode {
        *self.inner.guard.lock().machine.state()
    }

    pub fn is_logging_out(&self) -> bool {
        self.mode() == LogoutMode::LoggingOut
    }

    /// Enter `LoggingOut` and arm the guard timer. Returns the new epoch.
    pub fn begin(&self) -> u64 {
        let epoch = {
            let mut guard = self.inner.guard.lock();
            let _ = guard.machine.consume(&LogoutInput::LogoutStarted);
            guard.epoch += 1;
            guard.epoch
        };
        self.inner.persist(true);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = self.inner.clone();
                handle.spawn(async move {
                    tokio::time::sleep(inner.guard_delay).await;
                    inner.expire(epoch);
                });
            }
            Err(_) => {
                warn!("No async runtime, logout guard stays up until the next sign-in");
            }
        }

        info!(
            epoch,
            guard_ms = self.inner.guard_delay.as_millis() as u64,
            "Logout started"
        );
        epoch
    }

    /// Leave `LoggingOut` immediately, ahead of a new sign-in.
    pub fn clear(&self) {
        let was_logging_out = {
            let mut guard = self.inner.guard.lock();
            let was = *guard.machine.state() == LogoutMode::LoggingOut;
            let _ = guard.machine.consume(&LogoutInput::LoginRequested);
            guard.epoch += 1;
            was
        };
        self.inner.persist(false);
        if was_logging_out {
            debug!("Logout guard cleared by sign-in");
        }
    }

    /// Consume a flag left behind by a process that died mid-logout.
    ///
    /// Returns true when one was found.
    pub fn recover_interrupted(&self) -> bool {
        let Some(storage) = &self.inner.storage else {
            return false;
        };
        match storage.delete(StorageKeys::LOGOUT_GUARD) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted logout flag");
                false
            }
        }
    }
}

impl Inner {
    fn expire(&self, epoch: u64) {
        {
            let mut guard = self.guard.lock();
            if guard.epoch != epoch {
                return;
            }
            if guard.machine.consume(&LogoutInput::GuardElapsed).is_err() {
                return;
            }
        }
        self.persist(false);
        debug!(epoch, "Logout guard elapsed");
    }

    fn persist(&self, logging_out: bool) {
        let Some(storage) = &self.storage else {
            return;
        };
        let result = if logging_out {
            storage.set(StorageKeys::LOGOUT_GUARD, "1")
        } else {
            storage.delete(StorageKeys::LOGOUT_GUARD).map(|_| ())
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist logout flag");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use profile_kv_storage::MemoryStorage;

    const GUARD: Duration = Duration::from_millis(1000);

    #[tokio::test(start_paused = true)]
    async fn test_guard_elapses_back_to_active() {
        let logout = LogoutCoordinator::new(GUARD);
        assert_eq!(logout.mode(), LogoutMode::Active);

        logout.begin();
        assert!(logout.is_logging_out());

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(logout.is_logging_out());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!logout.is_logging_out());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_ends_logout_immediately() {
        let logout = LogoutCoordinator::new(GUARD);
        logout.begin();
        logout.clear();
        assert_eq!(logout.mode(), LogoutMode::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_does_not_end_later_logout() {
        let logout = LogoutCoordinator::new(GUARD);

        logout.begin();
        tokio::time::sleep(Duration::from_millis(600)).await;
        logout.clear();
        logout.begin();

        // first timer fires here, 1000ms after the first begin
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(logout.is_logging_out());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!logout.is_logging_out());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flag_is_mirrored_to_storage() {
        let storage: StorageHandle = Arc::new(MemoryStorage::new());
        let logout = LogoutCoordinator::with_storage(GUARD, storage.clone());

        logout.begin();
        assert!(storage.has(StorageKeys::LOGOUT_GUARD).unwrap());

        tokio::time::sleep(GUARD + Duration::from_millis(1)).await;
        assert!(!storage.has(StorageKeys::LOGOUT_GUARD).unwrap());
    }

    #[test]
    fn test_recover_interrupted_consumes_flag() {
        let storage: StorageHandle = Arc::new(MemoryStorage::new());
        storage.set(StorageKeys::LOGOUT_GUARD, "1").unwrap();

        let logout = LogoutCoordinator::with_storage(GUARD, storage.clone());
        assert!(logout.recover_interrupted());
        assert!(!logout.recover_interrupted());
        assert!(!storage.has(StorageKeys::LOGOUT_GUARD).unwrap());
        assert!(!logout.is_logging_out());

        assert!(!LogoutCoordinator::new(GUARD).recover_interrupted());
    }

    #[test]
    fn test_begin_without_runtime_waits_for_sign_in() {
        let logout = LogoutCoordinator::new(GUARD);
        logout.begin();
        assert!(logout.is_logging_out());
        logout.clear();
        assert!(!logout.is_logging_out());
    }
}
