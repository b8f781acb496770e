//! Bounded fingerprinting scheduler.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::{Fingerprinter, Job, Outcome};
use crate::{Error, Result};

/// Producer side of the job queue.
#[derive(Clone)]
pub struct JobQueue {
    sender: Sender<Job>,
}

impl JobQueue {
    /// Queue a job, blocking while all workers are busy.
    pub fn schedule(&self, job: Job) -> Result<()> {
        self.sender.send(job).map_err(|_| Error::SinkClosed)
    }
}

/// Runs jobs on a fixed number of worker threads.
///
/// Results are delivered through [`Scheduler::results`] in completion order.
/// The result stream ends once [`Scheduler::close`] has been called, every
/// [`JobQueue`] has been dropped and all queued jobs have finished.
pub struct Scheduler {
    queue: Option<JobQueue>,
    results: Receiver<Outcome>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(fingerprinter: Arc<dyn Fingerprinter>, workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let (job_tx, job_rx) = bounded::<Job>(workers * 2);
        let (result_tx, result_rx) = bounded::<Outcome>(workers * 2);

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let fingerprinter = Arc::clone(&fingerprinter);

            let handle = thread::Builder::new()
                .name(format!("fingerprint-{}", id))
                .spawn(move || run_jobs(&*fingerprinter, jobs, results))?;
            handles.push(handle);
        }

        Ok(Self {
            queue: Some(JobQueue { sender: job_tx }),
            results: result_rx,
            workers: handles,
        })
    }

    /// A producer handle, unless the scheduler was closed.
    pub fn queue(&self) -> Option<JobQueue> {
        self.queue.clone()
    }

    /// Queue a job.
    pub fn schedule(&self, job: Job) -> Result<()> {
        match &self.queue {
            Some(queue) => queue.schedule(job),
            None => Err(Error::SinkClosed),
        }
    }

    /// Stop accepting jobs from this handle.
    pub fn close(&mut self) {
        self.queue = None;
    }

    /// Blocking iterator over results.
    pub fn results(&self) -> crossbeam_channel::Iter<'_, Outcome> {
        self.results.iter()
    }

    /// Wait for the worker threads to exit.
    pub fn join(mut self) -> Result<()> {
        self.close();
        drop(self.results);
        for handle in self.workers {
            handle
                .join()
                .map_err(|_| Error::WorkerPanicked("fingerprint".to_string()))?;
        }
        Ok(())
    }
}

fn run_jobs(fingerprinter: &dyn Fingerprinter, jobs: Receiver<Job>, results: Sender<Outcome>) {
    for job in jobs.iter() {
        let started = Instant::now();
        let outcome = match fingerprinter.fingerprint(&job) {
            Ok((host, matches)) => Outcome {
                host,
                matches,
                error: None,
                duration: started.elapsed(),
            },
            Err(e) => Outcome {
                host: job.host,
                matches: Vec::new(),
                error: Some(e.to_string()),
                duration: started.elapsed(),
            },
        };

        if results.send(outcome).is_err() {
            break;
        }
    }
}
