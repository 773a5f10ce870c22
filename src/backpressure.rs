//! Queue-size policy protecting output modules from unbounded memory growth.
//!
//! Two thresholds govern an output's inbound queue: above the warning
//! limit, one rate-limited warning is logged (not one per item); above the
//! stop limit, further incoming items are dropped rather than enqueued
//! until the queue drains below that limit again. Drop-newest trades data
//! loss for bounded memory under sustained overload.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Verdict for one incoming item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Enqueue normally.
    Enqueue,
    /// Queue is over the stop limit; drop the item.
    Drop,
}

/// Per-output queue limit enforcement with rate-limited warnings.
#[derive(Debug)]
pub struct BackpressureController {
    warning_limit: usize,
    stop_limit: usize,
    warning_interval: Duration,
    last_warning: Mutex<Option<Instant>>,
    warnings_emitted: AtomicU64,
    dropped: AtomicU64,
}

impl BackpressureController {
    #[must_use]
    pub fn new(warning_limit: usize, stop_limit: usize, warning_interval: Duration) -> Self {
        Self {
            warning_limit,
            stop_limit,
            warning_interval,
            last_warning: Mutex::new(None),
            warnings_emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Decide whether an item may be enqueued given the current queue
    /// length, logging the rate-limited warning as a side effect.
    pub fn admit(&self, consumer: &str, queue_len: usize) -> Admission {
        if queue_len >= self.stop_limit {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            self.warn_rate_limited(consumer, queue_len, true);
            tracing::debug!(consumer, queue_len, "queue over stop limit, dropping item");
            return Admission::Drop;
        }
        if queue_len >= self.warning_limit {
            self.warn_rate_limited(consumer, queue_len, false);
        }
        Admission::Enqueue
    }

    fn warn_rate_limited(&self, consumer: &str, queue_len: usize, dropping: bool) {
        let mut last = self.last_warning.lock();
        let due = last.is_none_or(|at| at.elapsed() >= self.warning_interval);
        if !due {
            return;
        }
        *last = Some(Instant::now());
        drop(last);
        self.warnings_emitted.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            consumer,
            queue_len,
            warning_limit = self.warning_limit,
            stop_limit = self.stop_limit,
            dropping,
            "output queue backlog"
        );
    }

    /// Number of warnings actually logged (post rate limiting).
    #[must_use]
    pub fn warnings_emitted(&self) -> u64 {
        self.warnings_emitted.load(Ordering::Relaxed)
    }

    /// Number of items dropped at the stop limit.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn stop_limit(&self) -> usize {
        self.stop_limit
    }

    #[must_use]
    pub fn warning_limit(&self) -> usize {
        self.warning_limit
    }
}
