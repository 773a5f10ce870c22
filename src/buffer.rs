//! Failure buffering and reconnection backoff for output modules.
//!
//! When an output's persist call fails, the delivery is handed to a
//! [`ReplayBuffer`]: an in-memory, size-bounded FIFO of whole deliveries,
//! each flagged valid or invalid. `invalid = true` marks data lost to a
//! processing/serialization error (kept for inspection, never replayed);
//! `invalid = false` marks data lost to a transient connectivity failure
//! and eligible for replay once the connection is restored, in original
//! FIFO order. Buffering the delivery rather than the bare record keeps
//! the link it traveled, so a replayed record reaches the output with the
//! same provenance as the first attempt. Past capacity, the oldest entries
//! are evicted first.
//!
//! [`Backoff`] implements the reconnection contract for any network-backed
//! output: retry immediately, then increase the inter-attempt sleep by a
//! fixed increment on each further failure up to a capped maximum, then
//! hold at that cap.

use std::collections::VecDeque;
use std::time::Duration;

use crate::dispatch::Delivery;

/// One buffered entry: the failed delivery plus whether it is permanently
/// invalid.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferedDelivery {
    pub delivery: Delivery,
    pub invalid: bool,
}

/// Bounded per-output FIFO of deliveries that failed to persist.
#[derive(Debug)]
pub struct ReplayBuffer {
    entries: VecDeque<BufferedDelivery>,
    capacity: usize,
    evicted: u64,
}

impl ReplayBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    /// Append an entry, evicting the oldest if the buffer is full.
    pub fn push(&mut self, delivery: Delivery, invalid: bool) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
            tracing::debug!(
                capacity = self.capacity,
                evicted_total = self.evicted,
                "replay buffer full, evicting oldest entry"
            );
        }
        self.entries.push_back(BufferedDelivery { delivery, invalid });
    }

    /// Re-queue entries at the front, preserving their relative order.
    /// Used when a replay attempt fails partway through.
    pub fn requeue_front(&mut self, entries: Vec<BufferedDelivery>) {
        for entry in entries.into_iter().rev() {
            if self.entries.len() == self.capacity {
                self.entries.pop_back();
                self.evicted += 1;
            }
            self.entries.push_front(entry);
        }
    }

    /// Drain every entry, returning only the replayable (non-invalid) ones
    /// in original FIFO order. Invalid entries are discarded here; they
    /// were logged when buffered.
    pub fn drain_replayable(&mut self) -> Vec<Delivery> {
        self.entries
            .drain(..)
            .filter(|entry| !entry.invalid)
            .map(|entry| entry.delivery)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total entries evicted to make room since construction.
    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Read-only view of the buffered entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> impl Iterator<Item = &BufferedDelivery> {
        self.entries.iter()
    }
}

/// Linear backoff parameters: the inter-attempt sleep grows by `increment`
/// per consecutive failure and holds at `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub increment: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            increment: Duration::from_secs(2),
            max: Duration::from_secs(30),
        }
    }
}

/// Stateful backoff sequence for one connection.
#[derive(Clone, Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: Duration::ZERO,
        }
    }

    /// The sleep to apply before the next attempt. The first call returns
    /// zero (retry immediately); each subsequent call grows the delay by
    /// the increment, capped at the policy maximum.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current + self.policy.increment).min(self.policy.max);
        delay
    }

    /// Reset to the immediate-retry state after a successful connection.
    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }

    /// The delay the next call to [`next_delay`](Self::next_delay) returns.
    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }
}
