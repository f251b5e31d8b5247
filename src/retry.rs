//! Bounded retry with jittered backoff for operations that can lose a race.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries).
//! - `should_retry` decides whether an error is a lost race worth another attempt; anything
//!   else is returned immediately as [`RetryError::Inner`].
//! - Between attempts the policy sleeps for a [`Jitter`] draw through its [`Sleeper`].
//! - An optional `deadline` caps the total time spent; when the next sleep would cross it the
//!   policy stops early and reports exhaustion.
//!
//! Invariants:
//! - Attempts never exceed `max_attempts`.
//! - The sleeper is invoked at most `max_attempts - 1` times.
//!
//! ```rust
//! use std::time::Duration;
//! use turnstile::{InstantSleeper, Jitter, RetryError, RetryPolicy, StoreError};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::<StoreError>::builder()
//!     .max_attempts(3)
//!     .with_jitter(Jitter::fixed(Duration::from_millis(150)))
//!     .should_retry(StoreError::is_conflict)
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//! let result: Result<(), _> =
//!     policy.execute(|| async { Err(StoreError::WriteConflict { key: 1 }) }).await;
//! assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
//! # });
//! ```

use crate::error::RetryError;
use crate::{Jitter, Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Retry policy combining an attempt budget, jitter, a retry predicate and a sleeper.
#[derive(Clone)]
pub struct RetryPolicy<E> {
    max_attempts: usize,
    jitter: Jitter,
    deadline: Option<Duration>,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("jitter", &self.jitter)
            .field("deadline", &self.deadline)
            .field("sleeper", &self.sleeper)
            .field("should_retry", &"<predicate>")
            .finish()
    }
}

impl<E> RetryPolicy<E>
where
    E: std::fmt::Display + Send + 'static,
{
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or the budget
    /// runs out.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, RetryError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !(self.should_retry)(&err) {
                return Err(RetryError::Inner(err));
            }

            if attempt >= self.max_attempts {
                tracing::warn!(attempts = attempt, error = %err, "retry budget exhausted");
                return Err(RetryError::Exhausted { attempts: attempt, last: err });
            }

            let delay = self.jitter.sample();
            if let Some(deadline) = self.deadline {
                if started.elapsed() + delay > deadline {
                    tracing::warn!(
                        attempts = attempt,
                        deadline_ms = deadline.as_millis() as u64,
                        error = %err,
                        "retry deadline reached"
                    );
                    return Err(RetryError::Exhausted { attempts: attempt, last: err });
                }
            }

            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after conflict"
            );
            self.sleeper.sleep(delay).await;
        }
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder<E> {
    max_attempts: usize,
    jitter: Jitter,
    deadline: Option<Duration>,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    #[error("deadline must be > 0")]
    ZeroDeadline,
}

impl<E> RetryPolicyBuilder<E>
where
    E: std::fmt::Display + Send + 'static,
{
    /// Defaults: 11 attempts (one try plus ten retries), 100 to 200 ms jitter, every error
    /// retried, tokio sleeps, no deadline.
    pub fn new() -> Self {
        Self {
            max_attempts: 11,
            jitter: Jitter::default(),
            deadline: None,
            should_retry: Arc::new(|_| true),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Set total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Stop retrying once this much time has been spent.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Predicate deciding whether an error is retryable.
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub(crate) fn with_shared_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn build(self) -> Result<RetryPolicy<E>, BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        if self.deadline == Some(Duration::ZERO) {
            return Err(BuildError::ZeroDeadline);
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            jitter: self.jitter,
            deadline: self.deadline,
            should_retry: self.should_retry,
            sleeper: self.sleeper,
        })
    }
}

impl<E> Default for RetryPolicyBuilder<E>
where
    E: std::fmt::Display + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
