//! Cooperative scheduling for a labman session: a single `running` flag
//! shared by every task, a Ctrl-C handler that flips it, a `sleep` that
//! wakes early when it does, and helpers (`monitor`, `sweep`) built on top
//! of it.
//!
//! Nothing here preempts a task mid-iteration: a long-running step always
//! finishes its current unit of work before checking `running` again. This
//! mirrors the original single-threaded, check-the-flag-between-steps
//! shutdown discipline, just spread across tokio tasks instead of
//! generator `send()` calls.

mod error;

pub use error::{Result, SupervisorError};

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use labman_clock::Clock;
use tokio::sync::Notify;

/// How often a repeating task should be re-invoked, or whether it only
/// runs once.
#[derive(Debug, Clone, Copy)]
pub enum TaskKind {
    Once,
    Repeating { interval: Duration },
}

/// Granularity at which `sleep` wakes to re-check the `running` flag.
const WAKE_GRANULARITY: Duration = Duration::from_millis(500);

/// Shared shutdown/scheduling state for a session.
pub struct Supervisor {
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
    clock: Arc<dyn Clock>,
    subprocesses: parking_lot::Mutex<Vec<(String, tokio::process::Child)>>,
}

impl Supervisor {
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            running: Arc::new(AtomicBool::new(true)),
            notify: Arc::new(Notify::new()),
            clock,
            subprocesses: parking_lot::Mutex::new(Vec::new()),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Flip `running` to false and wake every task blocked in `sleep`.
    /// Idempotent; safe to call from a signal handler or from an HTTP
    /// shutdown route.
    pub fn ask_exit(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("shutdown requested");
        }
        self.notify.notify_waiters();
        self.kill_subprocesses();
    }

    /// Install a Ctrl-C handler that calls [`Supervisor::ask_exit`]. Must
    /// be called at most once per process (the underlying `ctrlc` crate
    /// enforces this).
    pub fn install_signal_handler(self: &Arc<Self>) -> Result<()> {
        let this = Arc::clone(self);
        ctrlc::set_handler(move || {
            tracing::info!("received interrupt signal, shutting down");
            this.ask_exit();
        })?;
        Ok(())
    }

    /// Register a subprocess (e.g. an ffmpeg encoder) so it gets killed
    /// when the session shuts down, rather than being orphaned.
    pub fn register_subprocess(&self, name: impl Into<String>, child: tokio::process::Child) {
        self.subprocesses.lock().push((name.into(), child));
    }

    fn kill_subprocesses(&self) {
        let mut procs = self.subprocesses.lock();
        for (name, child) in procs.iter_mut() {
            if let Err(e) = child.start_kill() {
                tracing::warn!(subprocess = %name, error = %e, "failed to kill subprocess");
            }
        }
    }

    /// Sleep for `duration`, waking early (and returning `false`) if
    /// `ask_exit` fires in the meantime. Wakes every 0.5s to re-check even
    /// absent a notification, so a missed wakeup never wedges a task.
    pub async fn sleep(&self, duration: Duration, verbose: bool) -> bool {
        if verbose {
            tracing::debug!(?duration, "sleeping");
        }
        let deadline = self.clock.now_monotonic() + duration.as_secs_f64();
        loop {
            if !self.is_running() {
                return false;
            }
            let remaining = deadline - self.clock.now_monotonic();
            if remaining <= 0.0 {
                return true;
            }
            let chunk = Duration::from_secs_f64(remaining.min(WAKE_GRANULARITY.as_secs_f64()));
            tokio::select! {
                _ = tokio::time::sleep(chunk) => {}
                _ = self.notify.notified() => {}
            }
        }
    }

    /// Run `f` according to `kind` for as long as the session is running.
    /// `Once` runs `f` a single time (even if the session is already
    /// stopping — a shutdown in progress shouldn't race a task's first
    /// chance to run). `Repeating` runs `f`, then sleeps `interval`, and
    /// repeats while `running`.
    pub async fn monitor<F, Fut>(self: &Arc<Self>, name: &str, kind: TaskKind, f: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ()>,
    {
        match kind {
            TaskKind::Once => {
                tracing::debug!(task = name, "running once");
                f().await;
            }
            TaskKind::Repeating { interval } => {
                while self.is_running() {
                    tracing::debug!(task = name, "running iteration");
                    f().await;
                    if !self.sleep(interval, false).await {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Step through `values`, calling `step(value)` for each, checking
    /// `running` before *every* iteration including the first — a sweep
    /// started after shutdown has already begun performs zero steps.
    pub async fn sweep<T, F, Fut>(self: &Arc<Self>, values: Vec<T>, mut step: F) -> Vec<T>
    where
        F: FnMut(&T) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut completed = Vec::with_capacity(values.len());
        for value in values {
            if !self.is_running() {
                break;
            }
            step(&value).await;
            completed.push(value);
        }
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn test_supervisor() -> Arc<Supervisor> {
        Supervisor::new(Arc::new(labman_clock::SystemClock::new()))
    }

    #[tokio::test]
    async fn sleep_returns_true_when_not_interrupted() {
        let sup = test_supervisor();
        let completed = sup.sleep(Duration::from_millis(10), false).await;
        assert!(completed);
    }

    #[tokio::test]
    async fn ask_exit_interrupts_a_sleep_in_progress() {
        let sup = test_supervisor();
        let sup2 = Arc::clone(&sup);
        let handle = tokio::spawn(async move { sup2.sleep(Duration::from_secs(60), false).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        sup.ask_exit();
        let completed = handle.await.unwrap();
        assert!(!completed);
    }

    #[tokio::test]
    async fn sweep_stops_before_first_step_if_already_shut_down() {
        let sup = test_supervisor();
        sup.ask_exit();
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let done = sup
            .sweep(vec![1, 2, 3], move |_v| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(done.is_empty());
    }

    #[tokio::test]
    async fn sweep_stops_midway_when_interrupted_between_steps() {
        let sup = test_supervisor();
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let sup_for_step = Arc::clone(&sup);
        let done = sup
            .sweep(vec![1, 2, 3, 4], move |_v| {
                let c = Arc::clone(&c);
                let sup_for_step = Arc::clone(&sup_for_step);
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                    if n == 2 {
                        sup_for_step.ask_exit();
                    }
                }
            })
            .await;
        assert_eq!(done.len(), 2);
    }
}
