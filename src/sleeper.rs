//! Pluggable backoff sleeps for the retry policy.
//!
//! Production code sleeps on the tokio timer so a backing-off decision yields its worker to
//! other decisions. Tests swap in [`InstantSleeper`] or [`TrackingSleeper`] to keep runs fast
//! and to assert on the delays that would have been taken.

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Something that can wait for a backoff delay.
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Skips the delay but still yields to the scheduler, so racing decisions in tests get a
/// chance to interleave between attempts.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(&self, _duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::task::yield_now())
    }
}

/// Records every requested delay without waiting.
#[derive(Debug, Clone, Default)]
pub struct TrackingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sleeps requested so far.
    pub fn calls(&self) -> usize {
        self.delays.lock().map(|d| d.len()).unwrap_or(0)
    }

    /// The `idx`-th requested delay.
    pub fn call_at(&self, idx: usize) -> Option<Duration> {
        self.delays.lock().ok().and_then(|d| d.get(idx).copied())
    }

    /// Sum of all requested delays.
    pub fn total(&self) -> Duration {
        self.delays.lock().map(|d| d.iter().sum()).unwrap_or_default()
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
        Box::pin(async {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn instant_sleeper_returns_immediately() {
        let start = std::time::Instant::now();
        InstantSleeper.sleep(Duration::from_secs(30)).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn tracking_sleeper_records_in_order() {
        let sleeper = TrackingSleeper::new();
        sleeper.sleep(Duration::from_millis(150)).await;
        sleeper.sleep(Duration::from_millis(120)).await;

        assert_eq!(sleeper.calls(), 2);
        assert_eq!(sleeper.call_at(0), Some(Duration::from_millis(150)));
        assert_eq!(sleeper.call_at(1), Some(Duration::from_millis(120)));
        assert_eq!(sleeper.call_at(2), None);
        assert_eq!(sleeper.total(), Duration::from_millis(270));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_sleeper_waits_on_the_timer() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_millis(180)).await;
        assert!(start.elapsed() >= Duration::from_millis(180));
    }
}
