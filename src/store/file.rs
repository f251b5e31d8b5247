use super::{apply_reset, CounterStore, Created, Reset, Updated};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::record::CounterRecord;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

type Table = BTreeMap<u32, CounterRecord>;

/// Durable counter table persisted as a JSON array of records.
///
/// Writes follow a write-ahead-then-swap protocol: the next table is serialized to a sibling
/// `.tmp` file, fsynced, and renamed over the data file; only then is the in-memory view
/// replaced. A failed persist leaves both the file and the view at the previous state.
///
/// Each write runs on its own task, so a caller that stops waiting (a store timeout, a
/// dropped request) cannot leave the file and the view apart: the write either finishes
/// both steps or neither.
///
/// Every write clones the whole table and rewrites the whole file, so a write costs
/// O(records). Suited to small tables; back large ones with a database.
///
/// One process owns the file. Sharing it between processes is not supported.
#[derive(Debug)]
pub struct FileCounterStore {
    shared: Arc<Shared>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    table: Mutex<Table>,
}

impl FileCounterStore {
    /// Open or create the store at `path`. A missing file starts an empty table.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let table = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Table::new(),
            Ok(bytes) => decode(&path, &bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Table::new(),
            Err(e) => {
                return Err(StoreError::unavailable(format_args!(
                    "reading {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        tracing::debug!(path = %path.display(), records = table.len(), "counter file opened");
        Ok(Self {
            shared: Arc::new(Shared { path, table: Mutex::new(table) }),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.shared.table.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run one write transaction to completion on a spawned task.
    ///
    /// `plan` sees the live table and the current time and returns the outcome plus the next
    /// table, or `None` when nothing changes.
    async fn transact<T, F>(&self, plan: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Table, u64) -> (T, Option<Table>) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let clock = Arc::clone(&self.clock);
        let task = tokio::spawn(async move {
            let mut live = shared.table.lock().await;
            let (outcome, next) = plan(&*live, clock.now_millis());
            if let Some(next) = next {
                shared.persist(&next).await?;
                *live = next;
            }
            Ok::<_, StoreError>(outcome)
        });
        task.await
            .map_err(|e| StoreError::unavailable(format_args!("counter file write aborted: {}", e)))?
    }
}

impl Shared {
    async fn persist(&self, next: &Table) -> Result<(), StoreError> {
        let records: Vec<&CounterRecord> = next.values().collect();
        let bytes = serde_json::to_vec_pretty(&records)
            .map_err(|e| StoreError::unavailable(format_args!("encoding counters: {}", e)))?;

        let tmp = tmp_path(&self.path);
        write_synced(&tmp, &bytes).await.map_err(|e| {
            StoreError::unavailable(format_args!("writing {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            StoreError::unavailable(format_args!("replacing {}: {}", self.path.display(), e))
        })
    }
}

fn decode(path: &Path, bytes: &[u8]) -> Result<Table, StoreError> {
    let records: Vec<CounterRecord> = serde_json::from_slice(bytes).map_err(|e| {
        StoreError::unavailable(format_args!("corrupt counter file {}: {}", path.display(), e))
    })?;
    Ok(records.into_iter().map(|r| (r.key, r)).collect())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_else(|| OsString::from("counters"));
    name.push(".tmp");
    path.with_file_name(name)
}

async fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

#[async_trait]
impl CounterStore for FileCounterStore {
    async fn get(&self, key: u32) -> Result<Option<CounterRecord>, StoreError> {
        Ok(self.shared.table.lock().await.get(&key).cloned())
    }

    async fn create_if_absent(&self, key: u32, identifier: &str) -> Result<Created, StoreError> {
        let identifier = identifier.to_owned();
        self.transact(move |live, now| {
            if live.contains_key(&key) {
                return (Created::AlreadyExists, None);
            }
            let mut next = live.clone();
            next.insert(key, CounterRecord::new(key, identifier, now));
            (Created::Inserted, Some(next))
        })
        .await
    }

    async fn increment(&self, key: u32) -> Result<Updated, StoreError> {
        self.transact(move |live, _| {
            let Some(current) = live.get(&key) else {
                return (Updated::NotFound, None);
            };
            let mut record = current.clone();
            record.count = record.count.saturating_add(1);

            let mut next = live.clone();
            next.insert(key, record.clone());
            (Updated::Applied(record), Some(next))
        })
        .await
    }

    async fn reset_window(&self, key: u32, observed_start: u64) -> Result<Reset, StoreError> {
        self.transact(move |live, now| {
            let Some(current) = live.get(&key) else {
                return (Reset::NotFound, None);
            };
            let mut record = current.clone();
            let outcome = apply_reset(&mut record, observed_start, now);
            if let Reset::Applied(_) = outcome {
                let mut next = live.clone();
                next.insert(key, record);
                return (outcome, Some(next));
            }
            (outcome, None)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn tmp_path_is_a_sibling() {
        let tmp = tmp_path(Path::new("/var/lib/turnstile/counters.json"));
        assert_eq!(tmp, PathBuf::from("/var/lib/turnstile/counters.json.tmp"));
    }

    #[tokio::test]
    async fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCounterStore::open(dir.path().join("absent.json")).await.unwrap();
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn corrupt_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let err = FileCounterStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(ref msg) if msg.contains("corrupt")));
    }

    #[tokio::test]
    async fn failed_persist_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters.json");
        let store = FileCounterStore::open(&path)
            .await
            .unwrap()
            .with_clock(ManualClock::starting_at(10));
        store.create_if_absent(1, "0.0.0.1").await.unwrap();

        // Remove the directory out from under the store so the next persist fails.
        drop(dir);

        let err = store.increment(1).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.get(1).await.unwrap().unwrap().count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn abandoned_writes_keep_file_and_view_in_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters.json");
        let store = FileCounterStore::open(&path).await.unwrap();
        store.create_if_absent(1, "0.0.0.1").await.unwrap();

        let mut last = 0;
        for i in 0..300u64 {
            let budget = std::time::Duration::from_micros(50 + (i % 40) * 50);
            let _ = tokio::time::timeout(budget, store.increment(1)).await;

            // Snapshot under the table lock so no write can land between the two reads.
            let live = store.shared.table.lock().await;
            let view = live.get(&1).map(|r| r.count).unwrap();
            let disk = decode(&path, &tokio::fs::read(&path).await.unwrap()).unwrap();
            assert_eq!(disk.get(&1).map(|r| r.count), Some(view), "iteration {i}");
            assert!(view >= last, "count went backwards at iteration {i}");
            last = view;
        }
    }
}
