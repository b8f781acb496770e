//! Destinations for records that passed filtering.
//!
//! - [`BatchSink`]: transactional batches against a [`BatchStore`]
//! - [`JsonSink`]: one JSON object per line to any writer
//!
//! Both run a single consumer thread behind a bounded channel, so a slow
//! destination blocks producers instead of growing memory. Producers submit
//! through cloned [`SinkHandle`]s.

mod batch;
mod json;

pub use batch::{BatchSink, SinkConfig};
pub use json::JsonSink;

use crossbeam_channel::Sender;
use std::sync::Arc;

use crate::pool::Submit;
use crate::progress::{AtomicCounter, Counter};
use crate::record::Record;
use crate::{Error, Result};

/// Store that accepts records in transactions.
pub trait BatchStore {
    /// Open a transaction.
    fn begin(&mut self) -> Result<()>;

    /// Insert one record into the open transaction.
    fn insert(&mut self, record: &Record) -> Result<()>;

    /// Commit the open transaction.
    fn commit(&mut self) -> Result<()>;
}

impl<T: BatchStore + ?Sized> BatchStore for Box<T> {
    fn begin(&mut self) -> Result<()> {
        (**self).begin()
    }

    fn insert(&mut self, record: &Record) -> Result<()> {
        (**self).insert(record)
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }
}

/// Totals reported by a sink once drained.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    /// Records handed to the sink
    pub submitted: u64,
    /// Records the consumer finished with
    pub completed: u64,
    /// Records written
    pub written: u64,
    /// Records the store refused
    pub rejected: u64,
    /// Transactions committed
    pub commits: u64,
}

/// Cloneable producer side of a sink.
#[derive(Clone)]
pub struct SinkHandle {
    sender: Sender<Record>,
    submitted: Arc<AtomicCounter>,
}

impl SinkHandle {
    fn new(sender: Sender<Record>, submitted: Arc<AtomicCounter>) -> Self {
        Self { sender, submitted }
    }
}

impl Submit for SinkHandle {
    fn submit(&self, record: Record) -> Result<()> {
        self.sender.send(record).map_err(|_| Error::SinkClosed)?;
        self.submitted.increment();
        Ok(())
    }
}

/// A running sink of either kind.
pub enum Sink {
    Json(JsonSink),
    Batch(BatchSink),
}

impl Sink {
    /// Producer handle for the running sink.
    pub fn handle(&self) -> SinkHandle {
        match self {
            Sink::Json(sink) => sink.handle(),
            Sink::Batch(sink) => sink.handle(),
        }
    }

    /// Close the sink and wait until every submitted record is handled.
    pub fn finish(self) -> Result<SinkStats> {
        match self {
            Sink::Json(sink) => sink.finish(),
            Sink::Batch(sink) => sink.finish(),
        }
    }
}

/// Check the drain barrier once the consumer has exited.
fn check_drained(stats: SinkStats) -> Result<SinkStats> {
    if stats.completed != stats.submitted {
        return Err(Error::Undrained {
            completed: stats.completed,
            submitted: stats.submitted,
        });
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_drained() {
        let stats = SinkStats {
            submitted: 4,
            completed: 4,
            written: 4,
            ..SinkStats::default()
        };
        assert_eq!(check_drained(stats).unwrap(), stats);

        let short = SinkStats {
            completed: 3,
            ..stats
        };
        let err = check_drained(short).unwrap_err();
        assert!(matches!(
            err,
            Error::Undrained {
                completed: 3,
                submitted: 4
            }
        ));
        assert_eq!(err.to_string(), "sink drained 3 of 4 submitted records");
    }
}
