//! Sliding-window record of completed requests.
//!
//! Every settled task leaves one timestamp here. An entry counts against the
//! budget until it is a full window old, at which point pruning drops it.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Timestamps of completed admission attempts within the last window.
#[derive(Debug)]
pub struct TimestampLedger {
    window: Duration,
    entries: VecDeque<Instant>,
}

impl TimestampLedger {
    /// Create an empty ledger for the given window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: VecDeque::new(),
        }
    }

    /// Record a completion at `now`.
    pub fn record(&mut self, now: Instant) {
        // Instants are monotonic, so pushing to the back keeps the deque sorted.
        self.entries.push_back(now);
    }

    /// Drop every entry that is at least one window old. Returns how many were dropped.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        while let Some(oldest) = self.entries.front() {
            if now.saturating_duration_since(*oldest) < self.window {
                break;
            }
            self.entries.pop_front();
        }
        before - self.entries.len()
    }

    /// Number of entries currently counted against the budget.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Instant at which the oldest entry leaves the window, if any.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.entries.front().map(|oldest| *oldest + self.window)
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
