//! Idle watchdog.
//!
//! The daemon holds exclusive port access; if its client dies or the socket
//! wedges nothing else will release it. The watchdog shuts the daemon down
//! when no command has been dispatched for `timeout`.
//!
//! ```text
//!            reset()
//!           ┌───────┐
//!           ▼       │
//!  spawn ─► Armed ──┘
//!           │    │
//!  deadline │    │ cancel()
//!           ▼    ▼
//!        Fired  Cancelled      (both terminal)
//! ```
//!
//! Leaving `Armed` is a single compare-exchange, so at most one of firing or
//! cancelling wins and the action runs at most once.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

struct Inner {
    timeout: Duration,
    deadline: Mutex<Instant>,
    state: AtomicU8,
    wake: Notify,
}

/// Handle to a running watchdog task. Cheap to clone.
#[derive(Clone)]
pub struct Watchdog {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("timeout", &self.inner.timeout)
            .field("state", &self.inner.state.load(Ordering::SeqCst))
            .finish()
    }
}

impl Watchdog {
    /// Arm a watchdog that runs `action` once `timeout` passes without a
    /// [`reset`](Self::reset). Must be called inside a tokio runtime.
    pub fn spawn<F>(timeout: Duration, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = Arc::new(Inner {
            timeout,
            deadline: Mutex::new(Instant::now() + timeout),
            state: AtomicU8::new(ARMED),
            wake: Notify::new(),
        });
        tokio::spawn(run(inner.clone(), action));
        tracing::info!(timeout_ms = timeout.as_millis() as u64, "watchdog armed");
        Self { inner }
    }

    /// Push the deadline to `now + timeout`. No effect once fired or cancelled.
    pub fn reset(&self) {
        if self.inner.state.load(Ordering::SeqCst) != ARMED {
            return;
        }
        *self.deadline_guard() = Instant::now() + self.inner.timeout;
    }

    /// Disarm permanently. Returns `false` if the watchdog had already fired
    /// or been cancelled.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .inner
            .state
            .compare_exchange(ARMED, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if cancelled {
            tracing::debug!("watchdog cancelled");
            self.inner.wake.notify_one();
        }
        cancelled
    }

    pub fn is_armed(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == ARMED
    }

    pub fn has_fired(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == FIRED
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Time left before the current deadline (zero once past).
    pub fn remaining(&self) -> Duration {
        self.deadline_guard().saturating_duration_since(Instant::now())
    }

    fn deadline_guard(&self) -> std::sync::MutexGuard<'_, Instant> {
        self.inner
            .deadline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn run<F>(inner: Arc<Inner>, action: F)
where
    F: FnOnce() + Send + 'static,
{
    loop {
        let deadline = *inner
            .deadline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tokio::select! {
            _ = sleep_until(deadline) => {
                let current = *inner
                    .deadline
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if current > Instant::now() {
                    // Reset while sleeping.
                    continue;
                }
                if inner
                    .state
                    .compare_exchange(ARMED, FIRED, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    tracing::warn!(
                        timeout_ms = inner.timeout.as_millis() as u64,
                        "watchdog expired without a command; shutting down",
                    );
                    action();
                }
                return;
            }
            _ = inner.wake.notified() => {
                if inner.state.load(Ordering::SeqCst) != ARMED {
                    return;
                }
            }
        }
    }
}
