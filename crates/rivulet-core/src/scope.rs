#![forbid(unsafe_code)]

//! Runtime scope: the dispatcher thread and background producers.
//!
//! The timeline never blocks inside its lock waiting for user code.
//! Asynchronous listeners are packaged as jobs and sent over an unbounded
//! channel to a dedicated dispatcher thread, which runs them in arrival
//! order. Background producers (clock ticks, operator pollers) are named
//! worker threads registered with the scope and torn down cooperatively
//! through a [`CancelToken`].
//!
//! # Ordering
//!
//! Jobs enqueued by a single update are enqueued in listener-registration
//! order and executed in that order; the channel is FIFO and there is
//! exactly one dispatcher.
//!
//! # Shutdown
//!
//! Dropping the last `Scope` handle cancels the token, wakes the
//! dispatcher and joins every thread the scope owns. Workers receive only
//! a `CancelToken` (never a `Scope` clone), so shutdown cannot deadlock
//! on a handle cycle.

use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A unit of deferred work: one async listener invocation.
pub(crate) type Job = Box<dyn FnOnce() + Send>;

/// How long `flush` waits for the dispatcher before giving up. Only
/// reachable when the scope was cancelled mid-flush.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Cooperative cancellation flag shared with background workers.
///
/// Cloneable; all clones observe the same flag. `sleep` doubles as the
/// worker loop condition: it returns `false` as soon as the token is
/// cancelled, even mid-wait.
#[derive(Clone)]
pub struct CancelToken {
    shared: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Flip the flag and wake every sleeper.
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.shared;
        let mut cancelled = lock.lock().unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        cvar.notify_all();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.shared;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `dur`, waking early on cancellation.
    ///
    /// Returns `true` if the full duration elapsed, `false` if the token
    /// was cancelled first. Intended as a producer loop condition:
    /// `while token.sleep(period) { .. }`.
    pub fn sleep(&self, dur: Duration) -> bool {
        let (lock, cvar) = &*self.shared;
        let deadline = Instant::now() + dur;
        let mut cancelled = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let (guard, timeout) = cvar
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            cancelled = guard;
            if timeout.timed_out() {
                return !*cancelled;
            }
        }
        false
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

struct ScopeInner {
    jobs: mpsc::Sender<Job>,
    token: CancelToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the runtime scope. Cheaply cloneable.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Create a scope and start its dispatcher thread.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let token = CancelToken::new();
        let loop_token = token.clone();
        let dispatcher = thread::Builder::new()
            .name("rivulet-dispatch".into())
            .spawn(move || dispatch_loop(rx, loop_token))
            .expect("failed to spawn dispatcher thread");

        Self {
            inner: Arc::new(ScopeInner {
                jobs: tx,
                token,
                dispatcher: Mutex::new(Some(dispatcher)),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A sender the timeline uses to enqueue async listener jobs.
    pub(crate) fn job_sender(&self) -> mpsc::Sender<Job> {
        self.inner.jobs.clone()
    }

    /// Enqueue a one-off job on the dispatcher.
    pub fn schedule(&self, job: impl FnOnce() + Send + 'static) {
        let _ = self.inner.jobs.send(Box::new(job));
    }

    /// Spawn a named background worker. The worker receives a
    /// [`CancelToken`] and must exit promptly once it is cancelled.
    pub fn spawn(&self, name: &str, f: impl FnOnce(CancelToken) + Send + 'static) {
        let token = self.inner.token.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || f(token))
            .expect("failed to spawn scope worker");
        self.inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// A token observing this scope's cancellation.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.inner.token.clone()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Cancel the scope: stop the dispatcher after the current job and
    /// ask every worker to exit.
    pub fn cancel(&self) {
        self.inner.token.cancel();
        // Wake the dispatcher in case its queue is empty.
        let _ = self.inner.jobs.send(Box::new(|| {}));
    }

    /// Block until every job enqueued before this call has run.
    ///
    /// Returns `true` on a confirmed drain, `false` if the dispatcher is
    /// gone or the scope was cancelled while waiting.
    pub fn flush(&self) -> bool {
        let (tx, rx) = mpsc::channel::<()>();
        if self.inner.jobs.send(Box::new(move || {
            let _ = tx.send(());
        })).is_err()
        {
            return false;
        }
        rx.recv_timeout(FLUSH_TIMEOUT).is_ok()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.token.cancel();
        let _ = self.jobs.send(Box::new(|| {}));

        let current = thread::current().id();
        if let Some(handle) = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            && handle.thread().id() != current
        {
            let _ = handle.join();
        }
        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in workers {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

fn dispatch_loop(rx: mpsc::Receiver<Job>, token: CancelToken) {
    while let Ok(job) = rx.recv() {
        if token.is_cancelled() {
            break;
        }
        job();
    }
    tracing::trace!("dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn jobs_run_in_enqueue_order() {
        let scope = Scope::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..16 {
            let seen = Arc::clone(&seen);
            scope.schedule(move || seen.lock().unwrap().push(i));
        }
        assert!(scope.flush());
        assert_eq!(*seen.lock().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn flush_on_idle_scope_returns_quickly() {
        let scope = Scope::new();
        assert!(scope.flush());
    }

    #[test]
    fn cancel_stops_workers() {
        let scope = Scope::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&ticks);
        scope.spawn("test-worker", move |token| {
            while token.sleep(Duration::from_millis(5)) {
                counted.fetch_add(1, Ordering::Relaxed);
            }
        });
        std::thread::sleep(Duration::from_millis(30));
        scope.cancel();
        let at_cancel = ticks.load(Ordering::Relaxed);
        assert!(at_cancel >= 1, "worker should have ticked before cancel");
        std::thread::sleep(Duration::from_millis(30));
        // At most one in-flight tick may land after cancellation.
        assert!(ticks.load(Ordering::Relaxed) <= at_cancel + 1);
    }

    #[test]
    fn sleep_returns_false_once_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        assert!(!token.sleep(Duration::from_millis(1)));
        assert!(token.is_cancelled());
    }

    #[test]
    fn sleep_cancelled_mid_wait_wakes_early() {
        let token = CancelToken::new();
        let remote = token.clone();
        let started = Instant::now();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            remote.cancel();
        });
        assert!(!token.sleep(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn drop_joins_threads_without_hanging() {
        let scope = Scope::new();
        scope.spawn("short-lived", |token| {
            while token.sleep(Duration::from_millis(5)) {}
        });
        drop(scope);
    }
}
