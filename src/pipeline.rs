//! One ingestion run: source, decoder, filter workers and sink.

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::filter::Filter;
use crate::pool::WorkerPool;
use crate::progress::Progress;
use crate::sink::{Sink, SinkStats};
use crate::source::{Decoder, LineSource};
use crate::{Error, Result};

/// Lifecycle of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Built, not started
    Idle,
    /// Opening the source and starting threads
    Opening,
    /// Decoding and filtering records
    Streaming,
    /// Input exhausted, waiting for workers and sink
    Draining,
    /// Every record handled
    Closed,
    /// Stopped on a fatal error
    FatalAborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Opening => "opening",
            RunState::Streaming => "streaming",
            RunState::Draining => "draining",
            RunState::Closed => "closed",
            RunState::FatalAborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Totals of a finished run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// Lines read from the source
    pub lines: u64,
    /// Lines that did not decode
    pub malformed: u64,
    /// Records the workers examined
    pub processed: u64,
    /// Records that passed the filter
    pub accepted: u64,
    pub sink: SinkStats,
}

/// Streams one input file through the filter into a sink.
///
/// Decoding happens on the calling thread, which feeds a bounded queue read
/// by the worker pool. A pipeline runs once; the sink is consumed by the run.
pub struct Pipeline {
    config: PipelineConfig,
    filter: Arc<Filter>,
    sink: Mutex<Option<Sink>>,
    state: Mutex<RunState>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, filter: Arc<Filter>, sink: Sink) -> Self {
        Self {
            config,
            filter,
            sink: Mutex::new(Some(sink)),
            state: Mutex::new(RunState::Idle),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn transition(&self, next: RunState) {
        let mut state = self.state.lock();
        log::debug!("Pipeline {} -> {}", *state, next);
        *state = next;
    }

    /// Process `path` to the end.
    ///
    /// Returns once every accepted record has been written, or with the
    /// first fatal error after the threads have been shut down.
    pub fn run(&self, path: impl AsRef<Path>) -> Result<RunStats> {
        let sink = self
            .sink
            .lock()
            .take()
            .ok_or_else(|| Error::Config("pipeline has already run".to_string()))?;

        match self.execute(path.as_ref(), sink) {
            Ok(stats) => {
                self.transition(RunState::Closed);
                log::info!(
                    "Finished parsing: {} lines, {} malformed, {} processed, {} valid",
                    stats.lines,
                    stats.malformed,
                    stats.processed,
                    stats.accepted
                );
                Ok(stats)
            }
            Err(e) => {
                self.transition(RunState::FatalAborted);
                Err(e)
            }
        }
    }

    fn execute(&self, path: &Path, sink: Sink) -> Result<RunStats> {
        self.transition(RunState::Opening);

        let source = match LineSource::open(path) {
            Ok(source) => source,
            Err(e) => {
                abandon(sink);
                return Err(e);
            }
        };

        let (input, queue) = bounded(self.config.queue_capacity);
        let progress = Arc::new(Progress::new("parse", self.config.progress_step));
        let pool = match WorkerPool::start(
            self.config.workers,
            queue,
            sink.handle(),
            Arc::clone(&self.filter),
            progress,
        ) {
            Ok(pool) => pool,
            Err(e) => {
                abandon(sink);
                return Err(e);
            }
        };

        self.transition(RunState::Streaming);

        let mut decoder = Decoder::new(source, self.config.format);
        let mut stream_error = None;
        for item in decoder.by_ref() {
            match item {
                Ok(record) => {
                    // Every worker is gone; join reports why.
                    if input.send(record).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("Reading {:?} failed: {}", path, e);
                    stream_error = Some(e);
                    break;
                }
            }
        }
        drop(input);

        self.transition(RunState::Draining);
        let pool_result = pool.join();
        let sink_result = sink.finish();

        if let Some(e) = stream_error {
            return Err(e);
        }
        let sink_stats = sink_result?;
        let pool_stats = pool_result?;

        Ok(RunStats {
            lines: decoder.lines_read(),
            malformed: decoder.malformed(),
            processed: pool_stats.processed,
            accepted: pool_stats.accepted,
            sink: sink_stats,
        })
    }
}

/// Shut down a sink that never received input.
fn abandon(sink: Sink) {
    if let Err(e) = sink.finish() {
        log::debug!("Discarding sink: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{InputFormat, Record};
    use crate::rule::{CidrRule, DomainRule, DynamicRule};
    use crate::sink::{BatchSink, BatchStore, JsonSink, SinkConfig};
    use std::io::Write;

    fn write_input(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn fdns_config() -> PipelineConfig {
        PipelineConfig::default()
            .with_format(InputFormat::Rapid7Fdns)
            .with_workers(3)
    }

    #[derive(Default)]
    struct CollectStore {
        rows: Arc<Mutex<Vec<String>>>,
        fail_commit: bool,
    }

    impl BatchStore for CollectStore {
        fn begin(&mut self) -> Result<()> {
            Ok(())
        }

        fn insert(&mut self, record: &Record) -> Result<()> {
            self.rows.lock().push(record.hostname().to_string());
            Ok(())
        }

        fn commit(&mut self) -> Result<()> {
            if self.fail_commit {
                return Err(Error::Config("disk full".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_filters_into_batch_sink() {
        let input = write_input(&[
            r#"{"timestamp":"1","name":"www.example.com","type":"a","value":"192.0.2.1"}"#,
            r#"{"timestamp":"2","name":"other.org","type":"a","value":"10.0.0.7"}"#,
            r#"{"timestamp":"3","name":"other.org","type":"a","value":"10.0.1.7"}"#,
            r#"{"timestamp":"4","name":"notexample.com","type":"a","value":"192.0.2.9"}"#,
        ]);

        let mut allow = DomainRule::new();
        allow.add_pattern("example.com").unwrap();
        let mut ranges = CidrRule::new();
        ranges.add_pattern("10.0.0.0/24").unwrap();
        let filter = Filter::new().with_allow(allow).with_ranges(ranges);

        let store = CollectStore::default();
        let rows = Arc::clone(&store.rows);
        let sink = Sink::Batch(BatchSink::spawn(store, SinkConfig::default().with_batch_size(2)).unwrap());

        let pipeline = Pipeline::new(fdns_config(), Arc::new(filter), sink);
        assert_eq!(pipeline.state(), RunState::Idle);

        let stats = pipeline.run(input.path()).unwrap();
        assert_eq!(pipeline.state(), RunState::Closed);
        assert_eq!(stats.lines, 4);
        assert_eq!(stats.processed, 4);
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.sink.written, 2);
        assert_eq!(stats.sink.commits, 1);

        let mut rows = rows.lock().clone();
        rows.sort();
        assert_eq!(rows, vec!["other.org".to_string(), "www.example.com".to_string()]);
    }

    #[test]
    fn test_malformed_lines_counted() {
        let input = write_input(&[
            r#"{"name":"a.example.com","value":"192.0.2.1"}"#,
            "{not json",
            r#"{"name":"b.example.com","value":"192.0.2.2"}"#,
        ]);

        let sink = Sink::Json(JsonSink::spawn(std::io::sink(), 16).unwrap());
        let pipeline = Pipeline::new(fdns_config(), Arc::new(Filter::new()), sink);

        let stats = pipeline.run(input.path()).unwrap();
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.sink.written, 2);
    }

    #[test]
    fn test_missing_input_aborts() {
        let sink = Sink::Json(JsonSink::spawn(std::io::sink(), 16).unwrap());
        let pipeline = Pipeline::new(fdns_config(), Arc::new(Filter::new()), sink);

        let result = pipeline.run("/nonexistent/dump.json.gz");
        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(pipeline.state(), RunState::FatalAborted);
    }

    #[test]
    fn test_commit_failure_aborts() {
        let lines: Vec<String> = (0..50)
            .map(|i| format!(r#"{{"name":"h{}.example.com","value":"192.0.2.1"}}"#, i))
            .collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let input = write_input(&refs);

        let store = CollectStore {
            fail_commit: true,
            ..CollectStore::default()
        };
        let sink = Sink::Batch(
            BatchSink::spawn(
                store,
                SinkConfig::default().with_batch_size(5).with_channel_capacity(1),
            )
            .unwrap(),
        );
        let pipeline = Pipeline::new(fdns_config(), Arc::new(Filter::new()), sink);

        let result = pipeline.run(input.path());
        assert!(matches!(result, Err(Error::Config(msg)) if msg == "disk full"));
        assert_eq!(pipeline.state(), RunState::FatalAborted);
    }

    #[test]
    fn test_runs_once() {
        let input = write_input(&[]);
        let sink = Sink::Json(JsonSink::spawn(std::io::sink(), 16).unwrap());
        let pipeline = Pipeline::new(fdns_config(), Arc::new(Filter::new()), sink);

        let stats = pipeline.run(input.path()).unwrap();
        assert_eq!(stats, RunStats::default());
        assert!(matches!(pipeline.run(input.path()), Err(Error::Config(_))));
    }
}
