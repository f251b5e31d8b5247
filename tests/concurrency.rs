#![allow(missing_docs)]

mod common;

use common::test_helpers::{builder, memory_store};
use std::time::Duration;
use turnstile::{CounterStore, Created, Decision, InMemoryCounterStore, RateLimitController};

async fn burst(controller: &RateLimitController<InMemoryCounterStore>, k: usize) -> Vec<Decision> {
    let tasks: Vec<_> = (0..k)
        .map(|_| {
            let controller = controller.clone();
            tokio::spawn(async move { controller.evaluate("198.51.100.20").await })
        })
        .collect();

    let mut decisions = Vec::with_capacity(k);
    for task in tasks {
        decisions.push(task.await.expect("task panicked"));
    }
    decisions
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_contact_loses_no_increment() {
    let (store, clock) = memory_store();
    let controller = builder(store, &clock, 1_000).build().unwrap();

    let decisions = burst(&controller, 64).await;

    let mut counts: Vec<u64> = decisions.iter().map(|d| d.count().expect("no errors")).collect();
    counts.sort_unstable();
    assert_eq!(counts, (1..=64).collect::<Vec<_>>());

    let records = controller.store().records();
    assert_eq!(records.len(), 1, "exactly one record created");
    assert_eq!(records[0].count, 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_burst_allows_exactly_the_limit() {
    let (store, clock) = memory_store();
    let controller = builder(store, &clock, 5).build().unwrap();

    let decisions = burst(&controller, 40).await;

    let allowed = decisions.iter().filter(|d| d.is_allowed()).count();
    assert_eq!(allowed, 5);
    assert!(decisions
        .iter()
        .filter(|d| !d.is_allowed())
        .all(|d| matches!(d, Decision::Deny { count } if *count > 5)));
    assert_eq!(controller.store().records()[0].count, 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_resets_count_every_action_in_new_window() {
    let (store, clock) = memory_store();
    let controller = builder(store, &clock, 1_000).build().unwrap();
    burst(&controller, 10).await;

    clock.advance(Duration::from_secs(120));
    let decisions = burst(&controller, 32).await;

    let mut counts: Vec<u64> = decisions.iter().map(|d| d.count().expect("no errors")).collect();
    counts.sort_unstable();
    assert_eq!(counts, (1..=32).collect::<Vec<_>>());

    let record = controller.store().records().pop().unwrap();
    assert_eq!(record.count, 32);
    assert_eq!(record.window_start, common::test_helpers::T0 + 120_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_yield_single_record() {
    let store = InMemoryCounterStore::new();
    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.create_if_absent(77, "0.0.0.77").await })
        })
        .collect();

    let mut inserted = 0;
    for task in tasks {
        if task.await.unwrap().unwrap() == Created::Inserted {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);
    assert_eq!(store.len(), 1);
}
