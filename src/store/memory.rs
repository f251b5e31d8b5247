use super::{apply_reset, CounterStore, Created, Reset, Updated};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::record::CounterRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory counter table.
///
/// Every operation runs under one table lock, so transactions are serialized and never
/// conflict. Clones share the table.
#[derive(Clone, Debug)]
pub struct InMemoryCounterStore {
    records: Arc<Mutex<HashMap<u32, CounterRecord>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self { records: Arc::default(), clock: Arc::new(SystemClock) }
    }

    /// Use `clock` to stamp window starts.
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.table().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records, ordered by key.
    pub fn records(&self) -> Vec<CounterRecord> {
        let mut all: Vec<_> =
            self.table().map(|t| t.values().cloned().collect()).unwrap_or_default();
        all.sort_by_key(|r| r.key);
        all
    }

    /// Overwrite a record directly. Useful for seeding fixtures, e.g. a skewed window start.
    pub fn put(&self, record: CounterRecord) -> Result<(), StoreError> {
        self.table()?.insert(record.key, record);
        Ok(())
    }

    fn table(&self) -> Result<MutexGuard<'_, HashMap<u32, CounterRecord>>, StoreError> {
        self.records.lock().map_err(|_| StoreError::unavailable("counter table lock poisoned"))
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, key: u32) -> Result<Option<CounterRecord>, StoreError> {
        Ok(self.table()?.get(&key).cloned())
    }

    async fn create_if_absent(&self, key: u32, identifier: &str) -> Result<Created, StoreError> {
        let now = self.clock.now_millis();
        let mut table = self.table()?;
        if table.contains_key(&key) {
            return Ok(Created::AlreadyExists);
        }
        table.insert(key, CounterRecord::new(key, identifier, now));
        Ok(Created::Inserted)
    }

    async fn increment(&self, key: u32) -> Result<Updated, StoreError> {
        let mut table = self.table()?;
        Ok(match table.get_mut(&key) {
            Some(record) => {
                record.count = record.count.saturating_add(1);
                Updated::Applied(record.clone())
            }
            None => Updated::NotFound,
        })
    }

    async fn reset_window(&self, key: u32, observed_start: u64) -> Result<Reset, StoreError> {
        let now = self.clock.now_millis();
        let mut table = self.table()?;
        Ok(match table.get_mut(&key) {
            Some(record) => apply_reset(record, observed_start, now),
            None => Reset::NotFound,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn store() -> (InMemoryCounterStore, ManualClock) {
        let clock = ManualClock::starting_at(1_000);
        (InMemoryCounterStore::new().with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let (store, _) = store();
        assert_eq!(store.get(1).await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let (store, clock) = store();
        assert_eq!(store.create_if_absent(9, "0.0.0.9").await.unwrap(), Created::Inserted);
        clock.advance(Duration::from_secs(5));
        assert_eq!(store.create_if_absent(9, "0.0.0.9").await.unwrap(), Created::AlreadyExists);

        let rec = store.get(9).await.unwrap().unwrap();
        assert_eq!(rec.window_start, 1_000, "second create must not restamp the window");
        assert_eq!(rec.count, 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn increment_returns_committed_count() {
        let (store, _) = store();
        assert_eq!(store.increment(3).await.unwrap(), Updated::NotFound);

        store.create_if_absent(3, "0.0.0.3").await.unwrap();
        for expected in 1..=3 {
            match store.increment(3).await.unwrap() {
                Updated::Applied(rec) => assert_eq!(rec.count, expected),
                Updated::NotFound => panic!("record vanished"),
            }
        }
    }

    #[tokio::test]
    async fn reset_restamps_and_zeroes_together() {
        let (store, clock) = store();
        store.create_if_absent(4, "0.0.0.4").await.unwrap();
        store.increment(4).await.unwrap();
        clock.advance(Duration::from_secs(61));

        match store.reset_window(4, 1_000).await.unwrap() {
            Reset::Applied(rec) => {
                assert_eq!(rec.count, 0);
                assert_eq!(rec.window_start, 62_000);
            }
            other => panic!("expected applied, got {other:?}"),
        }

        // A second reset with the stale start is superseded and leaves the record alone.
        store.increment(4).await.unwrap();
        match store.reset_window(4, 1_000).await.unwrap() {
            Reset::Superseded(rec) => assert_eq!(rec.count, 1),
            other => panic!("expected superseded, got {other:?}"),
        }
        assert_eq!(store.reset_window(5, 1_000).await.unwrap(), Reset::NotFound);
    }

    #[tokio::test]
    async fn clones_share_table() {
        let (store, _) = store();
        let other = store.clone();
        store.create_if_absent(1, "0.0.0.1").await.unwrap();
        assert!(other.get(1).await.unwrap().is_some());
        assert_eq!(other.records().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let (store, _) = store();
        store.create_if_absent(8, "0.0.0.8").await.unwrap();

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment(8).await })
            })
            .collect();

        let mut seen = Vec::new();
        for task in tasks {
            if let Updated::Applied(rec) = task.await.unwrap().unwrap() {
                seen.push(rec.count);
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=64).collect::<Vec<_>>());
        assert_eq!(store.get(8).await.unwrap().unwrap().count, 64);
    }
}
