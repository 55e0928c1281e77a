//! Long-poll support: waiting for the store revision to advance
//!
//! [`RevisionWatch`] mirrors the committed revision behind its own small lock,
//! so waiters never hold the model lock while they sleep. The model publishes
//! every new revision while it still holds its own lock, which keeps the
//! mirrored value in commit order.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::core::types::Revision;
use crate::system::metrics::Metrics;

/// Result of waiting for a newer revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The revision moved past the awaited one; carries the revision observed
    Advanced(Revision),
    /// The timeout elapsed first
    TimedOut,
    /// The caller cancelled the wait
    Cancelled,
}

impl WaitOutcome {
    fn record(self) -> Self {
        let label = match self {
            WaitOutcome::Advanced(_) => "advanced",
            WaitOutcome::TimedOut => "timed_out",
            WaitOutcome::Cancelled => "cancelled",
        };
        Metrics::global().long_poll.with_label_values(&[label]).inc();
        self
    }
}

/// Committed revision mirror with blocking and async wait primitives
pub struct RevisionWatch {
    current: Mutex<Revision>,
    changed: Condvar,
    sender: watch::Sender<Revision>,
}

impl RevisionWatch {
    /// Create a watch starting at `initial`
    pub fn new(initial: Revision) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            current: Mutex::new(initial),
            changed: Condvar::new(),
            sender,
        }
    }

    /// Latest published revision
    pub fn current(&self) -> Revision {
        *self.current.lock()
    }

    /// Publish a newly committed revision and wake all waiters
    pub(crate) fn publish(&self, revision: Revision) {
        {
            let mut current = self.current.lock();
            *current = revision;
            self.changed.notify_all();
        }
        self.sender.send_replace(revision);
    }

    /// Block until the revision exceeds `after`, `timeout` elapses, or `cancel` fires
    pub fn wait_for_revision(
        &self,
        after: Revision,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> WaitOutcome {
        // A timeout too large to express as an instant waits without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        let mut current = self.current.lock();
        loop {
            if *current > after {
                return WaitOutcome::Advanced(*current).record();
            }
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled.record();
            }
            let Some(deadline) = deadline else {
                self.changed.wait(&mut current);
                continue;
            };
            if self.changed.wait_until(&mut current, deadline).timed_out() {
                let outcome = if *current > after {
                    WaitOutcome::Advanced(*current)
                } else {
                    WaitOutcome::TimedOut
                };
                return outcome.record();
            }
        }
    }

    /// Async variant of [`wait_for_revision`](Self::wait_for_revision)
    ///
    /// Dropping the returned future cancels the wait.
    pub async fn wait_for_revision_async(&self, after: Revision, timeout: Duration) -> WaitOutcome {
        let mut receiver = self.sender.subscribe();
        let waited = tokio::time::timeout(timeout, receiver.wait_for(|rev| *rev > after)).await;
        let outcome = match waited {
            Ok(Ok(rev)) => WaitOutcome::Advanced(*rev),
            // The sender lives as long as `self`, so a closed channel cannot be observed here.
            Ok(Err(_)) => WaitOutcome::Cancelled,
            Err(_) => WaitOutcome::TimedOut,
        };
        outcome.record()
    }
}

/// Cancels blocking waits on one [`RevisionWatch`]
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    watch: Arc<RevisionWatch>,
}

impl CancelToken {
    /// Create a token for waits on `watch`
    pub fn new(watch: Arc<RevisionWatch>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            watch,
        }
    }

    /// Release every wait using this token
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Taking the lock orders the flag store before any waiter's re-check.
        let _current = self.watch.current.lock();
        self.watch.changed.notify_all();
    }

    /// Whether [`cancel`](Self::cancel) was called
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
