//! Throughput reporting shared by concurrent workers.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic counter shared between threads.
pub trait Counter: Send + Sync {
    /// Add one and return the new value.
    fn increment(&self) -> u64;

    /// Current value.
    fn get(&self) -> u64;
}

/// Counter backed by an atomic fetch-and-add.
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Counter for AtomicCounter {
    fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Periodic progress logger.
///
/// Every time the processed count reaches a multiple of `step`, one line is
/// logged with the processed and valid counts and the time since the last
/// report. Every boundary is reported; threads crossing boundaries at the
/// same time take turns on the window.
pub struct Progress {
    label: &'static str,
    step: u64,
    processed: Box<dyn Counter>,
    valid: Box<dyn Counter>,
    window: Mutex<Instant>,
}

impl Progress {
    /// Create a reporter with atomic counters.
    pub fn new(label: &'static str, step: u64) -> Self {
        Self::with_counters(
            label,
            step,
            Box::new(AtomicCounter::new()),
            Box::new(AtomicCounter::new()),
        )
    }

    /// Create a reporter with custom counters.
    pub fn with_counters(
        label: &'static str,
        step: u64,
        processed: Box<dyn Counter>,
        valid: Box<dyn Counter>,
    ) -> Self {
        Self {
            label,
            step: step.max(1),
            processed,
            valid,
            window: Mutex::new(Instant::now()),
        }
    }

    /// Count one processed record, reporting if a step boundary was crossed.
    ///
    /// Returns `true` when this call emitted a report.
    pub fn record(&self) -> bool {
        let count = self.processed.increment();
        self.tick(count)
    }

    /// Count one record that passed filtering.
    pub fn valid(&self) {
        self.valid.increment();
    }

    /// Report if `count` is a step boundary.
    pub fn tick(&self, count: u64) -> bool {
        if count == 0 || count % self.step != 0 {
            return false;
        }

        let mut window = self.window.lock();

        log::info!(
            "{}: {} processed, {} valid ({:?})",
            self.label,
            count,
            self.valid.get(),
            window.elapsed()
        );
        *window = Instant::now();
        true
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.get()
    }

    pub fn valid_count(&self) -> u64 {
        self.valid.get()
    }

    pub fn step(&self) -> u64 {
        self.step
    }
}
