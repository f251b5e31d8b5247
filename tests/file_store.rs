#![cfg(feature = "json")]
#![allow(missing_docs)]

mod common;

use common::test_helpers::{builder, T0};
use std::time::Duration;
use turnstile::{CounterRecord, CounterStore, Decision, FileCounterStore, ManualClock};

#[tokio::test]
async fn counts_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counters.json");
    let clock = ManualClock::starting_at(T0);

    {
        let store = FileCounterStore::open(&path).await.unwrap().with_clock(clock.clone());
        let controller = builder(store, &clock, 3).build().unwrap();
        for expected in 1..=3 {
            assert_eq!(controller.evaluate("10.1.2.3").await, Decision::Allow { count: expected });
        }
    }

    clock.advance(Duration::from_secs(5));
    let store = FileCounterStore::open(&path).await.unwrap().with_clock(clock.clone());
    assert_eq!(store.len().await, 1);
    let controller = builder(store, &clock, 3).build().unwrap();
    assert_eq!(controller.evaluate("10.1.2.3").await, Decision::Deny { count: 4 });

    clock.advance(Duration::from_secs(60));
    assert_eq!(controller.evaluate("10.1.2.3").await, Decision::Allow { count: 1 });
}

#[tokio::test]
async fn file_holds_plain_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counters.json");
    let clock = ManualClock::starting_at(T0);
    let store = FileCounterStore::open(&path).await.unwrap().with_clock(clock.clone());
    let controller = builder(store, &clock, 5).build().unwrap();

    controller.evaluate("10.0.0.2").await;
    controller.evaluate("10.0.0.1").await;
    controller.evaluate("10.0.0.1").await;

    let bytes = std::fs::read(&path).unwrap();
    let records: Vec<CounterRecord> = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(
        records,
        vec![
            CounterRecord { key: 0x0a00_0001, identifier: "10.0.0.1".into(), window_start: T0, count: 2 },
            CounterRecord { key: 0x0a00_0002, identifier: "10.0.0.2".into(), window_start: T0, count: 1 },
        ]
    );
    assert!(!dir.path().join("counters.json.tmp").exists());
}

#[tokio::test]
async fn corrupt_file_refuses_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counters.json");
    std::fs::write(&path, b"{ not json").unwrap();

    let err = FileCounterStore::open(&path).await.unwrap_err();
    assert!(err.to_string().contains("corrupt counter file"));
}

#[tokio::test]
async fn guarded_reset_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counters.json");
    let clock = ManualClock::starting_at(T0);
    let store = FileCounterStore::open(&path).await.unwrap().with_clock(clock.clone());

    store.create_if_absent(9, "0.0.0.9").await.unwrap();
    store.increment(9).await.unwrap();
    clock.advance(Duration::from_secs(90));
    store.reset_window(9, T0).await.unwrap();

    let reopened = FileCounterStore::open(&path).await.unwrap();
    let record = reopened.get(9).await.unwrap().unwrap();
    assert_eq!(record.count, 0);
    assert_eq!(record.window_start, T0 + 90_000);
}
