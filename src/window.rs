//! Fixed-window classification.
//!
//! Both checks are pure. Timestamps are milliseconds since the Unix epoch, as stamped by the
//! store's [`Clock`](crate::Clock).

use std::time::Duration;

/// Window length and per-window action limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    window: Duration,
    limit: u64,
}

impl WindowPolicy {
    pub fn new(window: Duration, limit: u64) -> Self {
        Self { window, limit }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Time since `window_start`, or `None` when the start lies in the future (clock skew or a
    /// corrupted timestamp).
    pub fn elapsed(&self, window_start: u64, now: u64) -> Option<Duration> {
        now.checked_sub(window_start).map(Duration::from_millis)
    }

    /// True iff `0 <= now - window_start <= window`.
    ///
    /// A start in the future reads as lapsed so the caller opens a fresh window instead of
    /// wedging on a bad timestamp.
    pub fn is_within_window(&self, window_start: u64, now: u64) -> bool {
        match self.elapsed(window_start, now) {
            Some(elapsed) => elapsed <= self.window,
            None => false,
        }
    }

    /// True iff `count < limit`.
    pub fn is_within_rate(&self, count: u64) -> bool {
        count < self.limit
    }
}
