//! Transactional counter storage.
//!
//! [`CounterStore`] is the only shared state between concurrent decisions. Each operation is
//! its own transaction: it either applies completely or not at all, and concurrent callers
//! never observe a half-applied write. Logical outcomes (missing record, duplicate create,
//! superseded reset) are return values; [`StoreError`] is reserved for failures.
//!
//! Backends:
//! - [`InMemoryCounterStore`]: process-local table, mostly for tests and single-node use.
//! - [`FileCounterStore`]: durable JSON snapshot with atomic replace (feature `json`).
//! - [`FaultyStore`]: wraps another store and injects scripted failures.

use crate::error::StoreError;
use crate::record::CounterRecord;
use async_trait::async_trait;
use std::sync::Arc;

pub mod faulty;
#[cfg(feature = "json")]
pub mod file;
pub mod memory;

pub use faulty::{Fault, FaultyStore, Op};
#[cfg(feature = "json")]
pub use file::FileCounterStore;
pub use memory::InMemoryCounterStore;

/// Result of [`CounterStore::create_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Created {
    Inserted,
    /// Another caller created the record first. Equivalent to success.
    AlreadyExists,
}

/// Result of [`CounterStore::increment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Updated {
    /// The committed record after the increment.
    Applied(CounterRecord),
    NotFound,
}

/// Result of [`CounterStore::reset_window`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reset {
    /// The window was restarted; the committed record is returned.
    Applied(CounterRecord),
    /// The window had already moved past the observed start (another caller reset it). The
    /// record is returned unchanged.
    Superseded(CounterRecord),
    NotFound,
}

/// Storage interface for per-client counters.
///
/// Timestamps written by the store (`window_start` on create and reset) come from the
/// store's own clock, the way a database stamps `CURRENT_TIMESTAMP`.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read a record. Never mutates.
    async fn get(&self, key: u32) -> Result<Option<CounterRecord>, StoreError>;

    /// Insert `{count: 0, window_start: now}` unless a record for `key` exists.
    async fn create_if_absent(&self, key: u32, identifier: &str) -> Result<Created, StoreError>;

    /// Atomically add one to the count and return the committed record.
    async fn increment(&self, key: u32) -> Result<Updated, StoreError>;

    /// Atomically set `window_start = now` and `count = 0`, provided the record still has
    /// `window_start == observed_start`.
    async fn reset_window(&self, key: u32, observed_start: u64) -> Result<Reset, StoreError>;
}

#[async_trait]
impl<S> CounterStore for Arc<S>
where
    S: CounterStore + ?Sized,
{
    async fn get(&self, key: u32) -> Result<Option<CounterRecord>, StoreError> {
        (**self).get(key).await
    }

    async fn create_if_absent(&self, key: u32, identifier: &str) -> Result<Created, StoreError> {
        (**self).create_if_absent(key, identifier).await
    }

    async fn increment(&self, key: u32) -> Result<Updated, StoreError> {
        (**self).increment(key).await
    }

    async fn reset_window(&self, key: u32, observed_start: u64) -> Result<Reset, StoreError> {
        (**self).reset_window(key, observed_start).await
    }
}

/// Apply a guarded reset to `record` in place.
pub(crate) fn apply_reset(record: &mut CounterRecord, observed_start: u64, now: u64) -> Reset {
    if record.window_start != observed_start {
        return Reset::Superseded(record.clone());
    }
    record.window_start = now;
    record.count = 0;
    Reset::Applied(record.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_applies_only_to_observed_window() {
        let mut rec = CounterRecord { key: 1, identifier: "0.0.0.1".into(), window_start: 100, count: 9 };

        match apply_reset(&mut rec, 50, 500) {
            Reset::Superseded(current) => assert_eq!(current.count, 9),
            other => panic!("expected superseded, got {other:?}"),
        }

        match apply_reset(&mut rec, 100, 500) {
            Reset::Applied(current) => {
                assert_eq!(current.count, 0);
                assert_eq!(current.window_start, 500);
            }
            other => panic!("expected applied, got {other:?}"),
        }
        assert_eq!(rec.window_start, 500);
    }
}
