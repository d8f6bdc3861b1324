//! The one shutdown routine.
//!
//! Signals, the watchdog and the `shutdown` command all call
//! [`ShutdownCoordinator::trigger`]. The first caller wins a
//! compare-exchange and runs cleanup; everyone else returns immediately.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::watchdog::Watchdog;

/// Why the daemon is going down; logged once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(&'static str),
    Watchdog,
    Command,
    AcceptLoop,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "received {name}"),
            ShutdownReason::Watchdog => f.write_str("watchdog expired"),
            ShutdownReason::Command => f.write_str("shutdown command"),
            ShutdownReason::AcceptLoop => f.write_str("accept loop failed"),
        }
    }
}

type CleanupStep = (&'static str, Box<dyn FnOnce() + Send>);

#[derive(Default)]
pub struct ShutdownCoordinator {
    started: AtomicBool,
    finished: AtomicBool,
    watchdog: OnceLock<Watchdog>,
    steps: Mutex<Vec<CleanupStep>>,
    reason: OnceLock<ShutdownReason>,
    done: Notify,
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("finished", &self.finished.load(Ordering::SeqCst))
            .field("reason", &self.reason.get())
            .finish()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The watchdog is cancelled first during cleanup. Only the first
    /// attached watchdog is kept.
    pub fn attach_watchdog(&self, watchdog: Watchdog) {
        if self.watchdog.set(watchdog).is_err() {
            tracing::warn!("watchdog already attached to shutdown coordinator");
        }
    }

    /// Queue a cleanup step. Steps run in registration order. A step
    /// registered after shutdown has started runs immediately.
    pub fn register(&self, name: &'static str, step: impl FnOnce() + Send + 'static) {
        if self.started.load(Ordering::SeqCst) {
            tracing::debug!(step = name, "late cleanup step; running now");
            step();
            return;
        }
        self.lock_steps().push((name, Box::new(step)));
    }

    /// Run the shutdown routine. Returns `true` for the caller that
    /// actually performed cleanup.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(%reason, "shutdown already in progress");
            return false;
        }
        let _ = self.reason.set(reason);
        tracing::info!(%reason, "shutting down");

        if let Some(watchdog) = self.watchdog.get() {
            watchdog.cancel();
        }

        let steps = std::mem::take(&mut *self.lock_steps());
        for (name, step) in steps {
            tracing::debug!(step = name, "cleanup");
            step();
        }

        self.finished.store(true, Ordering::SeqCst);
        self.done.notify_waiters();
        tracing::info!("shutdown complete");
        true
    }

    /// [`trigger`](Self::trigger) on the blocking pool. Cleanup steps take
    /// the hardware lock, which a panel operation may hold for seconds, so
    /// async callers must not run them on a runtime worker.
    pub fn trigger_blocking(self: &Arc<Self>, reason: ShutdownReason) -> JoinHandle<bool> {
        let coordinator = Arc::clone(self);
        tokio::task::spawn_blocking(move || coordinator.trigger(reason))
    }

    /// `true` until shutdown starts.
    pub fn is_running(&self) -> bool {
        !self.started.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// Resolve once cleanup has completed.
    pub async fn wait(&self) {
        loop {
            let notified = self.done.notified();
            if self.is_finished() {
                return;
            }
            notified.await;
        }
    }

    fn lock_steps(&self) -> std::sync::MutexGuard<'_, Vec<CleanupStep>> {
        self.steps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn cleanup_runs_once_in_order() {
        let coordinator = ShutdownCoordinator::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["panel", "socket", "marker"] {
            let log = log.clone();
            coordinator.register(name, move || log.lock().unwrap().push(name));
        }

        assert!(coordinator.is_running());
        assert!(coordinator.trigger(ShutdownReason::Command));
        assert!(!coordinator.trigger(ShutdownReason::Signal("SIGTERM")));

        assert_eq!(*log.lock().unwrap(), ["panel", "socket", "marker"]);
        assert!(!coordinator.is_running());
        assert!(coordinator.is_finished());
        assert_eq!(coordinator.reason(), Some(ShutdownReason::Command));
    }

    #[test]
    fn concurrent_triggers_clean_up_once() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let runs = runs.clone();
            coordinator.register("count", move || {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }

        let winners: usize = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                std::thread::spawn(move || coordinator.trigger(ShutdownReason::Watchdog))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| usize::from(handle.join().unwrap()))
            .sum();

        assert_eq!(winners, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_registration_runs_immediately() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger(ShutdownReason::AcceptLoop);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        coordinator.register("late", move || flag.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_the_watchdog() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let watchdog = Watchdog::spawn(Duration::from_secs(20), move || {
            flag.store(true, Ordering::SeqCst)
        });
        coordinator.attach_watchdog(watchdog.clone());

        coordinator.trigger(ShutdownReason::Signal("SIGINT"));
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(!watchdog.is_armed());
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn blocking_trigger_leaves_the_runtime_free() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let lock = Arc::new(Mutex::new(()));
        {
            let lock = lock.clone();
            coordinator.register("hardware", move || drop(lock.lock().unwrap()));
        }

        let (held_tx, held_rx) = std::sync::mpsc::channel();
        let holder = {
            let lock = lock.clone();
            std::thread::spawn(move || {
                let _guard = lock.lock().unwrap();
                held_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(300));
            })
        };
        held_rx.recv().unwrap();

        let cleanup = coordinator.trigger_blocking(ShutdownReason::Watchdog);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!coordinator.is_finished(), "cleanup still waits for the lock");

        assert!(cleanup.await.unwrap());
        assert!(coordinator.is_finished());
        holder.join().unwrap();
    }

    #[tokio::test]
    async fn wait_resolves_after_trigger() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.wait().await })
        };
        tokio::task::yield_now().await;
        coordinator.trigger(ShutdownReason::Command);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait resolved")
            .unwrap();

        // Already finished: returns at once.
        coordinator.wait().await;
    }
}
