//! Load generator: several clients hammer the limiter from two addresses and report how
//! many of their actions were allowed.
//!
//! Run with `cargo run --example concurrent_clients`.
use std::time::Duration;
use tokio::time::{interval, Instant};
use turnstile::{Decision, InMemoryCounterStore, RateLimitController, ThrottleConfig};

#[derive(Debug, Default)]
struct Tally {
    allowed: usize,
    denied: usize,
    errors: usize,
}

async fn client(
    name: String,
    identifier: &'static str,
    every: Duration,
    run_for: Duration,
    controller: RateLimitController<InMemoryCounterStore>,
) -> (String, Tally) {
    let mut tally = Tally::default();
    let mut ticker = interval(every);
    let deadline = Instant::now() + run_for;

    while Instant::now() < deadline {
        ticker.tick().await;
        match controller.evaluate(identifier).await {
            Decision::Allow { .. } => tally.allowed += 1,
            Decision::Deny { .. } => tally.denied += 1,
            Decision::Error { .. } => tally.errors += 1,
        }
    }
    (name, tally)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).with_target(false).init();

    let config = ThrottleConfig::builder()
        .window(Duration::from_secs(2))
        .rate_limit(5)
        .retry_backoff(Duration::from_millis(10), Duration::from_millis(20))
        .build()?;
    let controller = RateLimitController::builder(InMemoryCounterStore::new()).config(config).build()?;

    let plan = [
        ("client-1", "192.0.2.1", 100),
        ("client-2", "192.0.2.1", 150),
        ("client-3", "192.0.2.2", 250),
        ("client-4", "192.0.2.2", 400),
    ];

    let tasks: Vec<_> = plan
        .into_iter()
        .map(|(name, identifier, every_ms)| {
            tokio::spawn(client(
                name.to_string(),
                identifier,
                Duration::from_millis(every_ms),
                Duration::from_secs(5),
                controller.clone(),
            ))
        })
        .collect();

    for task in tasks {
        let (name, tally) = task.await?;
        println!(
            "{name}: total {} allowed {} denied {} errors {}",
            tally.allowed + tally.denied + tally.errors,
            tally.allowed,
            tally.denied,
            tally.errors
        );
    }

    for record in controller.store().records() {
        println!("{} window_start={} count={}", record.identifier, record.window_start, record.count);
    }
    Ok(())
}
