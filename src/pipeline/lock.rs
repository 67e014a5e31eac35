//! Process-wide single-slot lock around backend generations.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::trace;

use crate::telemetry;
use crate::{MuninnError, Result};

/// Binary FIFO semaphore serializing access to the backend.
///
/// [`run_exclusive`](Self::run_exclusive) takes the single permit, runs the
/// task and gives the permit back on every exit path: normal return, error,
/// panic unwinding, or the caller dropping the future. Waiters are served in
/// arrival order.
///
/// Not reentrant: calling `run_exclusive` from inside a task that already
/// holds the permit deadlocks.
#[derive(Debug)]
pub struct RequestLock {
    semaphore: Semaphore,
    waiting: AtomicUsize,
}

impl RequestLock {
    /// Create an unlocked lock.
    pub fn new() -> Self {
        Self {
            semaphore: Semaphore::new(1),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Run `task` while holding the permit.
    ///
    /// If the permit is free the task starts without suspending; otherwise
    /// the caller queues behind earlier waiters.
    pub async fn run_exclusive<F, Fut, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let _permit = match self.semaphore.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                let _queued = QueuedWaiter::enter(&self.waiting);
                trace!("waiting for request lock");
                // The semaphore is never closed, so this only fails in theory.
                self.semaphore
                    .acquire()
                    .await
                    .map_err(|_| MuninnError::LockClosed)?
            }
        };
        metrics::histogram!(telemetry::LOCK_WAIT_SECONDS).record(started.elapsed().as_secs_f64());

        task().await
    }

    /// Whether a task currently holds the permit.
    pub fn is_locked(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// Number of callers queued for the permit.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }
}

impl Default for RequestLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps the waiter count accurate even when a queued caller is dropped.
struct QueuedWaiter<'a>(&'a AtomicUsize);

impl<'a> QueuedWaiter<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for QueuedWaiter<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
