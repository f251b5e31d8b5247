use super::{CounterStore, Created, Reset, Updated};
use crate::error::StoreError;
use crate::record::CounterRecord;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Store operation a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Create,
    Increment,
    Reset,
}

/// A scripted failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Abort the transaction with [`StoreError::WriteConflict`]; the inner store is untouched.
    Conflict,
    /// Fail with [`StoreError::Unavailable`]; the inner store is untouched.
    Unavailable(String),
    /// Wait, then run the operation normally.
    Delay(Duration),
}

#[derive(Debug, Default)]
struct Script {
    pending: HashMap<Op, VecDeque<Fault>>,
    calls: HashMap<Op, usize>,
}

/// Wraps a store and injects queued faults, one per call, per operation.
///
/// Once an operation's queue is empty, calls pass straight through. Clones share the script.
#[derive(Debug, Clone)]
pub struct FaultyStore<S> {
    inner: S,
    script: Arc<Mutex<Script>>,
}

impl<S> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, script: Arc::default() }
    }

    /// Queue `fault` for the next `times` calls of `op`.
    pub fn inject(self, op: Op, fault: Fault, times: usize) -> Self {
        if let Ok(mut script) = self.script.lock() {
            let queue = script.pending.entry(op).or_default();
            queue.extend(std::iter::repeat(fault).take(times));
        }
        self
    }

    /// How many times `op` has been called, faulted or not.
    pub fn calls(&self, op: Op) -> usize {
        self.script.lock().map(|s| s.calls.get(&op).copied().unwrap_or(0)).unwrap_or(0)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn next_fault(&self, op: Op) -> Result<Option<Fault>, StoreError> {
        let mut script =
            self.script.lock().map_err(|_| StoreError::unavailable("fault script lock poisoned"))?;
        *script.calls.entry(op).or_insert(0) += 1;
        Ok(script.pending.get_mut(&op).and_then(VecDeque::pop_front))
    }

    async fn before(&self, op: Op, key: u32) -> Result<(), StoreError> {
        match self.next_fault(op)? {
            None => Ok(()),
            Some(Fault::Conflict) => Err(StoreError::WriteConflict { key }),
            Some(Fault::Unavailable(reason)) => Err(StoreError::Unavailable(reason)),
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<S> CounterStore for FaultyStore<S>
where
    S: CounterStore,
{
    async fn get(&self, key: u32) -> Result<Option<CounterRecord>, StoreError> {
        self.before(Op::Get, key).await?;
        self.inner.get(key).await
    }

    async fn create_if_absent(&self, key: u32, identifier: &str) -> Result<Created, StoreError> {
        self.before(Op::Create, key).await?;
        self.inner.create_if_absent(key, identifier).await
    }

    async fn increment(&self, key: u32) -> Result<Updated, StoreError> {
        self.before(Op::Increment, key).await?;
        self.inner.increment(key).await
    }

    async fn reset_window(&self, key: u32, observed_start: u64) -> Result<Reset, StoreError> {
        self.before(Op::Reset, key).await?;
        self.inner.reset_window(key, observed_start).await
    }
}
