//! The rate-limit decision state machine.
//!
//! One call to [`RateLimitController::evaluate`] walks the machine from `Init` to a terminal
//! `Allow`/`Deny`, issuing store reads and writes along the way:
//!
//! ```text
//! Init ──found──▶ RecordExists ──increment──▶ WithinWindow ──▶ Allow | Deny
//!   │                ▲     │
//!   └─missing─▶ RecordMissing   └─window lapsed─▶ WindowExpired ──reset──┘
//! ```
//!
//! - The current action is counted before it is judged: the decision sees the post-increment
//!   count and permits the action iff the actions before it number fewer than the limit.
//! - When the window has lapsed, the counter is reset and the action is counted again in the
//!   fresh window, so it is the first action of that window (`Allow { count: 1 }`).
//! - Every write goes through the conflict-retry policy and every store call is bounded by
//!   the store timeout.
//! - A step budget aborts runaway cycling.
//!
//! Any fatal condition aborts the decision and reports [`Decision::Error`]; the controller
//! never answers `Allow` for state it could not confirm.
//!
//! ```rust
//! use std::time::Duration;
//! use turnstile::{Decision, InMemoryCounterStore, RateLimitController, ThrottleConfig};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = ThrottleConfig::builder().rate_limit(2).build().unwrap();
//! let controller = RateLimitController::builder(InMemoryCounterStore::new())
//!     .config(config)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(controller.evaluate("10.1.1.1").await, Decision::Allow { count: 1 });
//! assert_eq!(controller.evaluate("10.1.1.1").await, Decision::Allow { count: 2 });
//! assert_eq!(controller.evaluate("10.1.1.1").await, Decision::Deny { count: 3 });
//! # });
//! ```

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, ThrottleConfig};
use crate::error::{ErrorKind, StoreError, ThrottleError};
use crate::handler::{NoopHandler, OutcomeHandler};
use crate::record::{ClientId, CounterRecord};
use crate::retry::RetryPolicy;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::store::{CounterStore, Created, Reset, Updated};
use crate::window::WindowPolicy;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Answer returned to the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Permitted; `count` is this action's position in the current window.
    Allow { count: u64 },
    /// Over the limit; `count` includes this action.
    Deny { count: u64 },
    /// The decision was abandoned. Treat as a denial.
    Error { kind: ErrorKind },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    /// Window count for `Allow`/`Deny`, `None` for errors.
    pub fn count(&self) -> Option<u64> {
        match self {
            Decision::Allow { count } | Decision::Deny { count } => Some(*count),
            Decision::Error { .. } => None,
        }
    }
}

/// Terminal outcome with the committed record that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow(CounterRecord),
    Deny(CounterRecord),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow(_))
    }

    pub fn record(&self) -> &CounterRecord {
        match self {
            Verdict::Allow(r) | Verdict::Deny(r) => r,
        }
    }
}

impl From<Verdict> for Decision {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Allow(r) => Decision::Allow { count: r.count },
            Verdict::Deny(r) => Decision::Deny { count: r.count },
        }
    }
}

/// States of one decision. Each carries the record it acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Init,
    RecordMissing,
    RecordExists(CounterRecord),
    WithinWindow(CounterRecord),
    WindowExpired(CounterRecord),
    Allow(CounterRecord),
    Deny(CounterRecord),
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Init => "init",
            State::RecordMissing => "record_missing",
            State::RecordExists(_) => "record_exists",
            State::WithinWindow(_) => "within_window",
            State::WindowExpired(_) => "window_expired",
            State::Allow(_) => "allow",
            State::Deny(_) => "deny",
        }
    }
}

/// Fixed-window rate limiter over a [`CounterStore`].
///
/// Cheap to clone; clones share the store, clock and handler.
pub struct RateLimitController<S> {
    store: Arc<S>,
    handler: Arc<dyn OutcomeHandler>,
    clock: Arc<dyn Clock>,
    policy: WindowPolicy,
    retry: RetryPolicy<StoreError>,
    store_timeout: Duration,
    max_cycles: usize,
}

impl<S> Clone for RateLimitController<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            handler: Arc::clone(&self.handler),
            clock: Arc::clone(&self.clock),
            policy: self.policy,
            retry: self.retry.clone(),
            store_timeout: self.store_timeout,
            max_cycles: self.max_cycles,
        }
    }
}

impl<S> std::fmt::Debug for RateLimitController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitController")
            .field("policy", &self.policy)
            .field("retry", &self.retry)
            .field("store_timeout", &self.store_timeout)
            .field("max_cycles", &self.max_cycles)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<S> RateLimitController<S>
where
    S: CounterStore + 'static,
{
    pub fn builder(store: S) -> ControllerBuilder<S> {
        ControllerBuilder::new(store)
    }

    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Decide whether the action from `identifier` is permitted.
    ///
    /// Failures are logged and reported as [`Decision::Error`].
    pub async fn evaluate(&self, identifier: &str) -> Decision {
        match self.decide(identifier).await {
            Ok(verdict) => verdict.into(),
            Err(err) => {
                tracing::error!(identifier, kind = %err.kind(), error = %err, "rate-limit decision aborted");
                Decision::Error { kind: err.kind() }
            }
        }
    }

    /// Like [`evaluate`](Self::evaluate) but returns the committed record or the full error.
    /// The outcome handler runs before this returns.
    pub async fn decide(&self, identifier: &str) -> Result<Verdict, ThrottleError> {
        let client: ClientId = identifier.parse()?;
        let canonical = client.canonical();
        let verdict = self.run(&client).await?;

        match &verdict {
            Verdict::Allow(record) => {
                tracing::debug!(identifier = %canonical, count = record.count, "action allowed");
                self.handler.on_allow(&canonical, record).await;
            }
            Verdict::Deny(record) => {
                tracing::warn!(
                    identifier = %canonical,
                    count = record.count,
                    limit = self.policy.limit(),
                    "rate limit exceeded"
                );
                self.handler.on_deny(&canonical, record).await;
            }
        }
        Ok(verdict)
    }

    async fn run(&self, client: &ClientId) -> Result<Verdict, ThrottleError> {
        let key = client.key();
        let mut state = State::Init;
        let mut steps = 0;

        loop {
            state = match state {
                State::Allow(record) => return Ok(Verdict::Allow(record)),
                State::Deny(record) => return Ok(Verdict::Deny(record)),
                current => {
                    if steps == self.max_cycles {
                        tracing::error!(key, steps, state = current.name(), "state machine cycle budget exceeded");
                        return Err(ThrottleError::CycleExceeded { key, limit: self.max_cycles });
                    }
                    steps += 1;
                    tracing::trace!(key, step = steps, state = current.name(), "transition");
                    self.step(client, current).await?
                }
            };
        }
    }

    async fn step(&self, client: &ClientId, state: State) -> Result<State, ThrottleError> {
        let key = client.key();
        match state {
            State::Init => Ok(match self.read(key).await? {
                Some(record) => State::RecordExists(record),
                None => State::RecordMissing,
            }),

            State::RecordMissing => {
                let store = &self.store;
                let identifier = client.canonical();
                let id = identifier.as_str();
                match self.call("create_if_absent", key, move || store.create_if_absent(key, id)).await? {
                    Created::Inserted => tracing::info!(key, identifier = id, "counter record created"),
                    Created::AlreadyExists => {
                        tracing::debug!(key, "counter record created concurrently")
                    }
                }
                match self.read(key).await? {
                    Some(record) => Ok(State::RecordExists(record)),
                    None => Err(inconsistent(key, "record absent after create")),
                }
            }

            State::RecordExists(_) => {
                let store = &self.store;
                let record = match self.call("increment", key, move || store.increment(key)).await? {
                    Updated::Applied(record) => record,
                    Updated::NotFound => return Err(inconsistent(key, "record vanished before increment")),
                };

                let now = self.clock.now_millis();
                if self.policy.is_within_window(record.window_start, now) {
                    return Ok(State::WithinWindow(record));
                }
                if self.policy.elapsed(record.window_start, now).is_none() {
                    tracing::warn!(
                        key,
                        window_start = record.window_start,
                        now,
                        "window start lies in the future; starting a fresh window"
                    );
                }
                Ok(State::WindowExpired(record))
            }

            State::WindowExpired(record) => {
                let store = &self.store;
                let observed = record.window_start;
                match self.call("reset_window", key, move || store.reset_window(key, observed)).await? {
                    Reset::Applied(fresh) => {
                        tracing::info!(key, window_start = fresh.window_start, discarded = record.count, "window reset")
                    }
                    Reset::Superseded(current) => tracing::debug!(
                        key,
                        window_start = current.window_start,
                        "window already reset by a concurrent decision"
                    ),
                    Reset::NotFound => return Err(inconsistent(key, "record vanished before reset")),
                }
                match self.read(key).await? {
                    Some(fresh) => Ok(State::RecordExists(fresh)),
                    None => Err(inconsistent(key, "record absent after reset")),
                }
            }

            State::WithinWindow(record) => {
                let prior = record.count.saturating_sub(1);
                if self.policy.is_within_rate(prior) {
                    Ok(State::Allow(record))
                } else {
                    Ok(State::Deny(record))
                }
            }

            terminal @ (State::Allow(_) | State::Deny(_)) => Ok(terminal),
        }
    }

    async fn read(&self, key: u32) -> Result<Option<CounterRecord>, ThrottleError> {
        let store = &self.store;
        self.call("get", key, move || store.get(key)).await
    }

    /// Run one store operation under the retry policy, each attempt bounded by the store
    /// timeout.
    async fn call<T, F, Fut>(&self, operation: &'static str, key: u32, mut op: F) -> Result<T, ThrottleError>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, StoreError>> + Send,
    {
        let timeout = self.store_timeout;
        self.retry
            .execute(|| {
                let attempt = op();
                async move {
                    tokio::time::timeout(timeout, attempt)
                        .await
                        .unwrap_or(Err(StoreError::Timeout { after: timeout }))
                }
            })
            .await
            .map_err(|err| ThrottleError::from_store(operation, key, err))
    }
}

fn inconsistent(key: u32, reason: &'static str) -> ThrottleError {
    tracing::error!(key, reason, "counter store inconsistent");
    ThrottleError::StoreInconsistent { key, reason }
}

/// Builder for [`RateLimitController`].
pub struct ControllerBuilder<S> {
    store: S,
    config: ThrottleConfig,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    handler: Arc<dyn OutcomeHandler>,
    retry_deadline: Option<Duration>,
}

impl<S> ControllerBuilder<S>
where
    S: CounterStore + 'static,
{
    /// Defaults: [`ThrottleConfig::default`], system clock, tokio sleeps, no-op handler.
    pub fn new(store: S) -> Self {
        Self {
            store,
            config: ThrottleConfig::default(),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            handler: Arc::new(NoopHandler),
            retry_deadline: None,
        }
    }

    pub fn config(mut self, config: ThrottleConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock used to classify windows. Must agree with the store's clock.
    pub fn clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Sleeper used between conflict retries.
    pub fn sleeper<Z>(mut self, sleeper: Z) -> Self
    where
        Z: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn handler<H>(mut self, handler: H) -> Self
    where
        H: OutcomeHandler + 'static,
    {
        self.handler = Arc::new(handler);
        self
    }

    /// Cap the total time one store operation may spend retrying conflicts.
    pub fn retry_deadline(mut self, deadline: Duration) -> Self {
        self.retry_deadline = Some(deadline);
        self
    }

    pub fn build(self) -> Result<RateLimitController<S>, ConfigError> {
        let config = self.config;
        let mut retry = RetryPolicy::builder()
            .max_attempts(config.max_retries().saturating_add(1))
            .with_jitter(config.retry_backoff().clone())
            .should_retry(StoreError::is_conflict)
            .with_shared_sleeper(self.sleeper);
        if let Some(deadline) = self.retry_deadline {
            retry = retry.deadline(deadline);
        }

        tracing::debug!(
            window_secs = config.window().as_secs(),
            rate_limit = config.rate_limit(),
            max_retries = config.max_retries(),
            "rate-limit controller configured"
        );

        Ok(RateLimitController {
            store: Arc::new(self.store),
            handler: self.handler,
            clock: self.clock,
            policy: WindowPolicy::new(config.window(), config.rate_limit()),
            retry: retry.build()?,
            store_timeout: config.store_timeout(),
            max_cycles: config.max_cycles(),
        })
    }
}
