//! Client identifiers and the per-client counter record.

use crate::error::ThrottleError;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// A parsed client identifier.
///
/// Clients are identified by IPv4 address. The storage key is the address as a 32-bit
/// big-endian integer, which is collision-free over the whole address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Ipv4Addr);

impl ClientId {
    pub fn new(addr: Ipv4Addr) -> Self {
        Self(addr)
    }

    /// Primary lookup key in the counter store.
    pub fn key(&self) -> u32 {
        u32::from(self.0)
    }

    /// Canonical dotted-quad form, persisted next to the key for diagnostics.
    pub fn canonical(&self) -> String {
        self.0.to_string()
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.0
    }
}

impl FromStr for ClientId {
    type Err = ThrottleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<Ipv4Addr>()
            .map(Self)
            .map_err(|_| ThrottleError::InvalidIdentifier(s.to_string()))
    }
}

impl From<Ipv4Addr> for ClientId {
    fn from(addr: Ipv4Addr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Persisted rate-limit state for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(serde::Serialize, serde::Deserialize))]
pub struct CounterRecord {
    pub key: u32,
    pub identifier: String,
    /// Milliseconds since the Unix epoch at which the current window began.
    pub window_start: u64,
    /// Actions recorded in the current window, the current one included once incremented.
    pub count: u64,
}

impl CounterRecord {
    /// A fresh record: empty window starting at `now`.
    pub fn new(key: u32, identifier: impl Into<String>, now: u64) -> Self {
        Self { key, identifier: identifier.into(), window_start: now, count: 0 }
    }
}
