//! Filtering worker pool.
//!
//! A fixed number of threads share one input channel. Each worker applies the
//! [`Filter`] and forwards survivors to a shared output. Output order is not
//! related to input order. [`WorkerPool::join`] is the completion barrier:
//! it returns once the input is exhausted and every worker has finished its
//! last record, at which point all output handles have been dropped.

use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::filter::Filter;
use crate::progress::Progress;
use crate::record::Record;
use crate::{Error, Result};

/// Destination for records that passed filtering.
pub trait Submit: Clone + Send + 'static {
    /// Hand a record downstream, blocking while the destination is full.
    fn submit(&self, record: Record) -> Result<()>;
}

impl Submit for Sender<Record> {
    fn submit(&self, record: Record) -> Result<()> {
        self.send(record).map_err(|_| Error::SinkClosed)
    }
}

/// Per-worker or per-pool totals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Records pulled from the input
    pub processed: u64,
    /// Records that passed the filter and were submitted
    pub accepted: u64,
}

impl PoolStats {
    fn merge(&mut self, other: PoolStats) {
        self.processed += other.processed;
        self.accepted += other.accepted;
    }
}

/// Running set of filter workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<Result<PoolStats>>>,
}

impl WorkerPool {
    /// Spawn `workers` threads consuming `input`.
    ///
    /// Every worker gets its own clone of `output`; the original is dropped
    /// here, so the output closes when the last worker exits.
    pub fn start<S: Submit>(
        workers: usize,
        input: Receiver<Record>,
        output: S,
        filter: Arc<Filter>,
        progress: Arc<Progress>,
    ) -> Result<Self> {
        let workers = workers.max(1);
        let mut handles = Vec::with_capacity(workers);

        for id in 0..workers {
            let input = input.clone();
            let output = output.clone();
            let filter = Arc::clone(&filter);
            let progress = Arc::clone(&progress);

            let handle = thread::Builder::new()
                .name(format!("filter-{}", id))
                .spawn(move || run_worker(input, output, &filter, &progress))?;
            handles.push(handle);
        }

        log::debug!("Started {} filter workers", workers);
        Ok(Self { handles })
    }

    /// Number of workers in the pool.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to drain and exit.
    ///
    /// All workers are joined even if one fails; the first error is returned.
    pub fn join(self) -> Result<PoolStats> {
        let mut total = PoolStats::default();
        let mut first_error = None;

        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("filter").to_string();
            let outcome = handle
                .join()
                .unwrap_or_else(|_| Err(Error::WorkerPanicked(name)));

            match outcome {
                Ok(stats) => total.merge(stats),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }
}

fn run_worker<S: Submit>(
    input: Receiver<Record>,
    output: S,
    filter: &Filter,
    progress: &Progress,
) -> Result<PoolStats> {
    let mut stats = PoolStats::default();

    for record in input.iter() {
        stats.processed += 1;
        progress.record();

        if !filter.accepts(&record) {
            continue;
        }

        progress.valid();
        stats.accepted += 1;
        output.submit(record)?;
    }

    Ok(stats)
}
