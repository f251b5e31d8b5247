//! Rate-limit configuration.
//!
//! [`ThrottleConfig`] is validated on construction and handed to the controller builder;
//! nothing in the crate reads process-wide settings.
//!
//! ```rust
//! use std::time::Duration;
//! use turnstile::ThrottleConfig;
//!
//! let config = ThrottleConfig::builder()
//!     .window(Duration::from_secs(60))
//!     .rate_limit(5)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.max_retries(), 10);
//! ```

use crate::jitter::{Jitter, JitterError};
use std::time::Duration;

const DEFAULT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT: u64 = 5;
const DEFAULT_MAX_RETRIES: usize = 10;
const DEFAULT_BACKOFF_MIN_MS: u64 = 100;
const DEFAULT_BACKOFF_MAX_MS: u64 = 200;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_CYCLES: usize = 10;

/// Fewest steps the state machine needs for its longest legal path
/// (create, increment, reset, increment, classify, decide).
pub const MIN_CYCLES: usize = 6;

/// Errors produced when validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("window must be > 0")]
    ZeroWindow,
    #[error("rate_limit must be > 0")]
    ZeroRateLimit,
    #[error("retry backoff: {0}")]
    Backoff(#[from] JitterError),
    #[error("store_timeout must be > 0")]
    ZeroStoreTimeout,
    #[error("max_cycles must be >= {min} (got {provided})")]
    TooFewCycles { provided: usize, min: usize },
    #[error("retry policy: {0}")]
    Retry(#[from] crate::retry::BuildError),
    #[cfg(feature = "json")]
    #[error("parsing config: {0}")]
    Parse(String),
}

/// Validated settings for a [`RateLimitController`](crate::RateLimitController).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    window: Duration,
    rate_limit: u64,
    max_retries: usize,
    retry_backoff: Jitter,
    store_timeout: Duration,
    max_cycles: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(DEFAULT_WINDOW_SECS),
            rate_limit: DEFAULT_RATE_LIMIT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Jitter::Uniform {
                min: Duration::from_millis(DEFAULT_BACKOFF_MIN_MS),
                max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            },
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            max_cycles: DEFAULT_MAX_CYCLES,
        }
    }
}

impl ThrottleConfig {
    pub fn builder() -> ThrottleConfigBuilder {
        ThrottleConfigBuilder::default()
    }

    /// Length of a rate-limit window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Actions permitted per window.
    pub fn rate_limit(&self) -> u64 {
        self.rate_limit
    }

    /// Retries after the first attempt of a conflicting store write.
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn retry_backoff(&self) -> &Jitter {
        &self.retry_backoff
    }

    /// Upper bound on a single store call.
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Step budget of the decision state machine.
    pub fn max_cycles(&self) -> usize {
        self.max_cycles
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.window.is_zero() {
            return Err(ConfigError::ZeroWindow);
        }
        if self.rate_limit == 0 {
            return Err(ConfigError::ZeroRateLimit);
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::ZeroStoreTimeout);
        }
        if self.max_cycles < MIN_CYCLES {
            return Err(ConfigError::TooFewCycles { provided: self.max_cycles, min: MIN_CYCLES });
        }
        Ok(())
    }
}

/// Builder for [`ThrottleConfig`]; unset fields keep their defaults.
#[derive(Debug, Clone, Default)]
pub struct ThrottleConfigBuilder {
    config: ThrottleConfig,
    backoff_range: Option<(Duration, Duration)>,
}

impl ThrottleConfigBuilder {
    pub fn window(mut self, window: Duration) -> Self {
        self.config.window = window;
        self
    }

    pub fn rate_limit(mut self, limit: u64) -> Self {
        self.config.rate_limit = limit;
        self
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Retry sleeps are drawn uniformly from `[min, max]`.
    pub fn retry_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_range = Some((min, max));
        self
    }

    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_timeout = timeout;
        self
    }

    pub fn max_cycles(mut self, cycles: usize) -> Self {
        self.config.max_cycles = cycles;
        self
    }

    pub fn build(self) -> Result<ThrottleConfig, ConfigError> {
        let mut config = self.config;
        if let Some((min, max)) = self.backoff_range {
            config.retry_backoff = Jitter::uniform(min, max)?;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(feature = "json")]
mod json {
    use super::*;
    use serde::Deserialize;

    /// On-disk shape: flat numeric fields, every one optional.
    #[derive(Debug, Default, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct RawConfig {
        window_secs: Option<u64>,
        rate_limit: Option<u64>,
        max_retries: Option<usize>,
        retry_backoff_range_ms: Option<[u64; 2]>,
        store_timeout_ms: Option<u64>,
        max_cycles: Option<usize>,
    }

    impl ThrottleConfig {
        /// Parse and validate a JSON document such as
        /// `{"window_secs": 60, "rate_limit": 5, "retry_backoff_range_ms": [100, 200]}`.
        pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
            let raw: RawConfig =
                serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;

            let mut builder = ThrottleConfig::builder();
            if let Some(secs) = raw.window_secs {
                builder = builder.window(Duration::from_secs(secs));
            }
            if let Some(limit) = raw.rate_limit {
                builder = builder.rate_limit(limit);
            }
            if let Some(retries) = raw.max_retries {
                builder = builder.max_retries(retries);
            }
            if let Some([min, max]) = raw.retry_backoff_range_ms {
                builder =
                    builder.retry_backoff(Duration::from_millis(min), Duration::from_millis(max));
            }
            if let Some(ms) = raw.store_timeout_ms {
                builder = builder.store_timeout(Duration::from_millis(ms));
            }
            if let Some(cycles) = raw.max_cycles {
                builder = builder.max_cycles(cycles);
            }
            builder.build()
        }
    }
}
