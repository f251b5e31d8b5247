#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Turnstile
//!
//! Fixed-window rate limiting over a transactional counter store.
//!
//! Each client (an IPv4 address) owns one counter record holding the start of its current
//! window and the number of actions counted in it. Every action is counted, then judged:
//! the first `rate_limit` actions of a window are allowed and the rest denied until the
//! window lapses and the counter is reset.
//!
//! ## Features
//!
//! - **State-machine controller** that never allows an action it could not count
//! - **Conflict retries** with bounded attempts and uniform jitter
//! - **Pluggable stores**: in-memory, JSON file (feature `json`), fault injection for tests
//! - **Tower middleware** for gating any service by client address
//!
//! ## Quick Start
//!
//! ```rust
//! use turnstile::{Decision, InMemoryCounterStore, RateLimitController};
//!
//! #[tokio::main]
//! async fn main() {
//!     let controller = RateLimitController::builder(InMemoryCounterStore::new())
//!         .build()
//!         .expect("default config is valid");
//!
//!     match controller.evaluate("192.0.2.7").await {
//!         Decision::Allow { count } => println!("allowed, action #{count}"),
//!         Decision::Deny { count } => println!("denied, {count} actions this window"),
//!         Decision::Error { kind } => println!("refused: {kind}"),
//!     }
//! }
//! ```

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod handler;
pub mod jitter;
pub mod middleware;
pub mod record;
pub mod retry;
pub mod sleeper;
pub mod store;
pub mod window;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ThrottleConfig, ThrottleConfigBuilder};
pub use controller::{ControllerBuilder, Decision, RateLimitController, State, Verdict};
pub use error::{ErrorKind, RetryError, StoreError, ThrottleError};
pub use handler::{NoopHandler, OutcomeHandler};
pub use jitter::{Jitter, JitterError};
pub use middleware::{ThrottleLayer, ThrottleService, ThrottleServiceError};
pub use record::{ClientId, CounterRecord};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
#[cfg(feature = "json")]
pub use store::FileCounterStore;
pub use store::{CounterStore, Created, Fault, FaultyStore, InMemoryCounterStore, Op, Reset, Updated};
pub use window::WindowPolicy;
