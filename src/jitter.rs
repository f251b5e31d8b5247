//! Randomized backoff delays for conflict retries.
//!
//! Racing writers that back off for the same fixed delay tend to collide again on the next
//! attempt. Drawing each delay from a range spreads them out.
//!
//! - `Fixed`: deterministic delay, useful for tests.
//! - `Uniform`: uniform draw from `[min, max]` at millisecond resolution. The default retry
//!   policy uses `100ms..=200ms`.
//!
//! RNG: `rand`'s thread-local RNG by default; deterministic RNGs can be injected with
//! [`Jitter::sample_with_rng`].
//!
//! ```rust
//! use std::time::Duration;
//! use turnstile::Jitter;
//!
//! let jitter = Jitter::uniform(Duration::from_millis(100), Duration::from_millis(200)).unwrap();
//! let delay = jitter.sample();
//! assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(200));
//! ```

use rand::{rng, Rng};
use std::time::Duration;

/// Rejected jitter bounds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("jitter range is empty: min {min:?} exceeds max {max:?}")]
pub struct JitterError {
    pub min: Duration,
    pub max: Duration,
}

/// Strategy for choosing the delay before the next retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Jitter {
    /// Always wait exactly this long.
    Fixed(Duration),
    /// Uniform draw from `[min, max]`, inclusive.
    Uniform { min: Duration, max: Duration },
}

impl Default for Jitter {
    fn default() -> Self {
        Jitter::Uniform { min: Duration::from_millis(100), max: Duration::from_millis(200) }
    }
}

impl Jitter {
    pub fn fixed(delay: Duration) -> Self {
        Jitter::Fixed(delay)
    }

    /// Build a uniform range, rejecting `min > max`.
    pub fn uniform(min: Duration, max: Duration) -> Result<Self, JitterError> {
        if min > max {
            return Err(JitterError { min, max });
        }
        Ok(Jitter::Uniform { min, max })
    }

    /// Longest delay this strategy can produce.
    pub fn upper_bound(&self) -> Duration {
        match self {
            Jitter::Fixed(delay) => *delay,
            Jitter::Uniform { max, .. } => *max,
        }
    }

    /// Draw a delay from the thread-local RNG.
    pub fn sample(&self) -> Duration {
        let mut rng = rng();
        self.sample_with_rng(&mut rng)
    }

    /// Draw a delay from a caller-supplied RNG.
    pub fn sample_with_rng<R: Rng>(&self, rng: &mut R) -> Duration {
        match self {
            Jitter::Fixed(delay) => *delay,
            Jitter::Uniform { min, max } => {
                let lo = as_millis_saturated(*min);
                let hi = as_millis_saturated(*max);
                if lo >= hi {
                    return Duration::from_millis(hi);
                }
                Duration::from_millis(rng.random_range(lo..=hi))
            }
        }
    }
}

fn as_millis_saturated(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}
