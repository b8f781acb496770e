//! Batched transactional sink.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{check_drained, BatchStore, SinkHandle, SinkStats};
use crate::pool::Submit;
use crate::progress::{AtomicCounter, Counter};
use crate::record::Record;
use crate::{Error, Result};

/// Batch sink settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkConfig {
    /// Records per transaction
    pub batch_size: usize,
    /// Records buffered between producers and the store
    pub channel_capacity: usize,
}

impl SinkConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            channel_capacity: 1024,
        }
    }
}

/// Writes records to a [`BatchStore`] in fixed-size transactions.
///
/// One thread owns the store. It opens a transaction when a batch starts,
/// inserts records one at a time and commits after `batch_size` records; the
/// remaining partial batch is committed when the input closes.
///
/// Failing to open or commit a transaction is fatal: the consumer stops,
/// further submissions fail with [`Error::SinkClosed`], and [`finish`]
/// returns the store error. A failed insert only drops that record.
///
/// [`finish`]: BatchSink::finish
pub struct BatchSink {
    sender: Sender<Record>,
    submitted: Arc<AtomicCounter>,
    completed: Arc<AtomicCounter>,
    consumer: JoinHandle<Result<SinkStats>>,
}

impl BatchSink {
    /// Start the consumer thread.
    pub fn spawn<S>(store: S, config: SinkConfig) -> Result<Self>
    where
        S: BatchStore + Send + 'static,
    {
        let (sender, receiver) = bounded(config.channel_capacity);
        let submitted = Arc::new(AtomicCounter::new());
        let completed = Arc::new(AtomicCounter::new());

        let batch_size = config.batch_size.max(1);
        let consumer_completed = Arc::clone(&completed);
        let consumer = thread::Builder::new()
            .name("batch-sink".to_string())
            .spawn(move || {
                run_batches(store, receiver, batch_size, &*consumer_completed).map_err(|e| {
                    log::error!("Batch sink aborted: {}", e);
                    e
                })
            })?;

        Ok(Self {
            sender,
            submitted,
            completed,
            consumer,
        })
    }

    /// Producer handle sharing this sink's counters.
    pub fn handle(&self) -> SinkHandle {
        SinkHandle::new(self.sender.clone(), Arc::clone(&self.submitted))
    }

    /// Submit one record, blocking while the channel is full.
    pub fn submit(&self, record: Record) -> Result<()> {
        self.handle().submit(record)
    }

    /// Records submitted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.get()
    }

    /// Records the consumer has finished with so far.
    pub fn completed(&self) -> u64 {
        self.completed.get()
    }

    /// Close the input and wait for the consumer to commit everything.
    pub fn finish(self) -> Result<SinkStats> {
        drop(self.sender);

        let mut stats = self
            .consumer
            .join()
            .unwrap_or_else(|_| Err(Error::WorkerPanicked("batch-sink".to_string())))?;

        stats.submitted = self.submitted.get();
        stats.completed = self.completed.get();
        log::info!(
            "Batch sink finished: {} written, {} rejected, {} commits",
            stats.written,
            stats.rejected,
            stats.commits
        );
        check_drained(stats)
    }
}

fn run_batches<S: BatchStore>(
    mut store: S,
    receiver: Receiver<Record>,
    batch_size: usize,
    completed: &AtomicCounter,
) -> Result<SinkStats> {
    let mut stats = SinkStats::default();
    let mut pending = 0usize;

    for record in receiver.iter() {
        if pending == 0 {
            store.begin()?;
        }

        match store.insert(&record) {
            Ok(()) => stats.written += 1,
            Err(e) => {
                stats.rejected += 1;
                log::warn!("Error inserting {:?}: {}", record.hostname(), e);
            }
        }
        pending += 1;
        completed.increment();

        if pending == batch_size {
            store.commit()?;
            stats.commits += 1;
            pending = 0;
        }
    }

    if pending > 0 {
        store.commit()?;
        stats.commits += 1;
    }

    Ok(stats)
}
