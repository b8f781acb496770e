//! Line-delimited JSON sink.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{check_drained, SinkHandle, SinkStats};
use crate::progress::{AtomicCounter, Counter};
use crate::record::Record;
use crate::{Error, Result};

/// Encodes every record as one JSON object per line.
///
/// A single thread owns the writer. Write errors are fatal.
pub struct JsonSink {
    sender: Sender<Record>,
    submitted: Arc<AtomicCounter>,
    completed: Arc<AtomicCounter>,
    consumer: JoinHandle<Result<SinkStats>>,
}

impl JsonSink {
    /// Start encoding into `writer`.
    pub fn spawn<W>(writer: W, channel_capacity: usize) -> Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (sender, receiver) = bounded(channel_capacity);
        let submitted = Arc::new(AtomicCounter::new());
        let completed = Arc::new(AtomicCounter::new());

        let consumer_completed = Arc::clone(&completed);
        let consumer = thread::Builder::new()
            .name("json-sink".to_string())
            .spawn(move || encode_all(writer, receiver, &*consumer_completed))?;

        Ok(Self {
            sender,
            submitted,
            completed,
            consumer,
        })
    }

    /// Start encoding to standard output.
    pub fn stdout(channel_capacity: usize) -> Result<Self> {
        Self::spawn(std::io::stdout(), channel_capacity)
    }

    /// Producer handle sharing this sink's counters.
    pub fn handle(&self) -> SinkHandle {
        SinkHandle::new(self.sender.clone(), Arc::clone(&self.submitted))
    }

    /// Close the input, flush and wait for the writer thread.
    pub fn finish(self) -> Result<SinkStats> {
        drop(self.sender);

        let mut stats = self
            .consumer
            .join()
            .unwrap_or_else(|_| Err(Error::WorkerPanicked("json-sink".to_string())))?;

        stats.submitted = self.submitted.get();
        stats.completed = self.completed.get();
        check_drained(stats)
    }
}

fn encode_all<W: Write>(
    writer: W,
    receiver: Receiver<Record>,
    completed: &AtomicCounter,
) -> Result<SinkStats> {
    let mut out = BufWriter::new(writer);
    let mut stats = SinkStats::default();

    for record in receiver.iter() {
        serde_json::to_writer(&mut out, &record)?;
        out.write_all(b"\n")?;
        stats.written += 1;
        completed.increment();
    }

    out.flush()?;
    Ok(stats)
}
