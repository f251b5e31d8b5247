use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use turnstile::{
    ControllerBuilder, CounterStore, InMemoryCounterStore, InstantSleeper, ManualClock,
    RateLimitController, ThrottleConfig,
};

/// Arbitrary fixed start so window arithmetic is easy to read in assertions.
pub const T0: u64 = 1_700_000_000_000;

pub fn config(limit: u64) -> ThrottleConfig {
    ThrottleConfig::builder()
        .window(Duration::from_secs(60))
        .rate_limit(limit)
        .build()
        .expect("valid config")
}

/// In-memory store and a manual clock shared with it.
pub fn memory_store() -> (InMemoryCounterStore, ManualClock) {
    let clock = ManualClock::starting_at(T0);
    (InMemoryCounterStore::new().with_clock(clock.clone()), clock)
}

/// Builder preloaded with `clock`, instant retry sleeps and `config(limit)`.
pub fn builder<S>(store: S, clock: &ManualClock, limit: u64) -> ControllerBuilder<S>
where
    S: CounterStore + 'static,
{
    RateLimitController::builder(store)
        .config(config(limit))
        .clock(clock.clone())
        .sleeper(InstantSleeper)
}

pub fn controller(limit: u64) -> (RateLimitController<InMemoryCounterStore>, ManualClock) {
    let (store, clock) = memory_store();
    let controller = builder(store, &clock, limit).build().expect("controller");
    (controller, clock)
}

/// Captures formatted log output for assertions.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Install as the thread-default subscriber until the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(self.clone()))
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .without_time()
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureGuard;
    fn make_writer(&'a self) -> Self::Writer {
        CaptureGuard(self.0.clone())
    }
}

pub struct CaptureGuard(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CaptureGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
