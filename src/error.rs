//! Error types for the counter store, the retry policy and rate-limit decisions.
//!
//! Logical store outcomes (record missing, record already created, window already reset) are
//! not errors; they are modelled as return values in [`crate::store`]. Everything here is a
//! failure: transient ([`StoreError::WriteConflict`]) or fatal for the current decision.

use std::fmt;
use std::time::Duration;

/// Failures reported by a [`CounterStore`](crate::store::CounterStore) backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A concurrent transaction touched the same record; the caller may retry.
    #[error("write conflict on key {key}")]
    WriteConflict { key: u32 },
    /// Connectivity or transaction-layer failure. Never retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The call did not complete in time. Whether it committed is unknown.
    #[error("store call timed out after {after:?}")]
    Timeout { after: Duration },
}

impl StoreError {
    /// Whether the failure is a lost race that is worth retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::WriteConflict { .. })
    }

    pub(crate) fn unavailable(context: impl fmt::Display) -> Self {
        Self::Unavailable(context.to_string())
    }
}

/// Outcome of a retried operation that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every permitted attempt failed with a retryable error.
    Exhausted { attempts: usize, last: E },
    /// The operation failed with an error the policy does not retry.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { attempts, last } => {
                write!(f, "retry exhausted after {} attempts; last error: {}", attempts, last)
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Inner(e) => Some(e),
        }
    }
}

impl<E> RetryError<E> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// The last error observed, whichever way the policy gave up.
    pub fn into_last(self) -> E {
        match self {
            Self::Exhausted { last, .. } | Self::Inner(last) => last,
        }
    }
}

/// Coarse classification of a failed decision, reported in
/// [`Decision::Error`](crate::controller::Decision::Error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The identifier is not an IPv4 address.
    InvalidIdentifier,
    /// Write conflicts outlasted the retry budget.
    RetryExhausted,
    /// The store failed at the connectivity or transaction layer.
    StoreUnavailable,
    /// A store call did not finish within the configured timeout.
    StoreTimeout,
    /// A write that guarantees a record exists was not visible afterwards.
    StoreInconsistent,
    /// The state machine exceeded its step budget.
    InternalCycleExceeded,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidIdentifier => "invalid_identifier",
            ErrorKind::RetryExhausted => "retry_exhausted",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::StoreTimeout => "store_timeout",
            ErrorKind::StoreInconsistent => "store_inconsistent",
            ErrorKind::InternalCycleExceeded => "internal_cycle_exceeded",
        };
        f.write_str(s)
    }
}

/// Fatal failure of a single rate-limit decision. The decision is abandoned (fail-closed);
/// other decisions are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ThrottleError {
    #[error("invalid client identifier {0:?}: expected an IPv4 address")]
    InvalidIdentifier(String),
    #[error("{operation} on key {key} gave up after {attempts} conflicting attempts")]
    RetryExhausted { operation: &'static str, key: u32, attempts: usize },
    #[error("{operation} on key {key} failed")]
    StoreUnavailable {
        operation: &'static str,
        key: u32,
        #[source]
        source: StoreError,
    },
    #[error("{operation} on key {key} exceeded the store timeout of {timeout:?}")]
    StoreTimeout { operation: &'static str, key: u32, timeout: Duration },
    #[error("store inconsistent for key {key}: {reason}")]
    StoreInconsistent { key: u32, reason: &'static str },
    #[error("state machine for key {key} exceeded {limit} steps")]
    CycleExceeded { key: u32, limit: usize },
}

impl ThrottleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidIdentifier(_) => ErrorKind::InvalidIdentifier,
            Self::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Self::StoreTimeout { .. } => ErrorKind::StoreTimeout,
            Self::StoreInconsistent { .. } => ErrorKind::StoreInconsistent,
            Self::CycleExceeded { .. } => ErrorKind::InternalCycleExceeded,
        }
    }

    /// Translate a failed store call into a decision failure.
    pub(crate) fn from_store(operation: &'static str, key: u32, err: RetryError<StoreError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, .. } => {
                Self::RetryExhausted { operation, key, attempts }
            }
            // A conflict surfacing as Inner means the policy was told not to retry it; it is
            // still contention, so classify it as such.
            RetryError::Inner(StoreError::WriteConflict { .. }) => {
                Self::RetryExhausted { operation, key, attempts: 1 }
            }
            RetryError::Inner(StoreError::Timeout { after }) => {
                Self::StoreTimeout { operation, key, timeout: after }
            }
            RetryError::Inner(source) => Self::StoreUnavailable { operation, key, source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn conflict_is_retryable_unavailable_is_not() {
        assert!(StoreError::WriteConflict { key: 1 }.is_conflict());
        assert!(!StoreError::Unavailable("down".into()).is_conflict());
        assert!(!StoreError::Timeout { after: Duration::from_secs(1) }.is_conflict());
    }

    #[test]
    fn retry_error_display_and_source() {
        let err = RetryError::Exhausted { attempts: 11, last: StoreError::WriteConflict { key: 9 } };
        let msg = err.to_string();
        assert!(msg.contains("11 attempts"));
        assert!(msg.contains("write conflict on key 9"));
        assert!(err.source().is_some());
        assert!(err.is_exhausted());
        assert_eq!(err.into_last(), StoreError::WriteConflict { key: 9 });
    }

    #[test]
    fn store_failures_map_to_kinds() {
        let exhausted = ThrottleError::from_store(
            "increment",
            3,
            RetryError::Exhausted { attempts: 4, last: StoreError::WriteConflict { key: 3 } },
        );
        assert_eq!(exhausted.kind(), ErrorKind::RetryExhausted);

        let down = ThrottleError::from_store(
            "get",
            3,
            RetryError::Inner(StoreError::Unavailable("connection reset".into())),
        );
        assert_eq!(down.kind(), ErrorKind::StoreUnavailable);
        assert!(down.source().unwrap().to_string().contains("connection reset"));

        let slow = ThrottleError::from_store(
            "reset_window",
            3,
            RetryError::Inner(StoreError::Timeout { after: Duration::from_secs(5) }),
        );
        assert_eq!(slow.kind(), ErrorKind::StoreTimeout);
    }

    #[test]
    fn kind_display_is_snake_case() {
        assert_eq!(ErrorKind::InternalCycleExceeded.to_string(), "internal_cycle_exceeded");
        assert_eq!(ErrorKind::StoreTimeout.to_string(), "store_timeout");
    }
}
