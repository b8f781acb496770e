//! Run configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::record::InputFormat;
use crate::sink::SinkConfig;
use crate::{Error, Result};

/// Where ingested records go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One JSON object per line on stdout
    #[default]
    Json,
    /// Batched inserts into the host store
    Sqlite,
}

impl OutputFormat {
    pub fn name(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Sqlite => "sqlite",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "sqlite" | "db" => Ok(OutputFormat::Sqlite),
            other => Err(Error::Config(format!("unknown output format: {}", other))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Settings of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Format of the input lines
    pub format: InputFormat,
    /// Filter worker threads
    pub workers: usize,
    /// Decoded records buffered ahead of the workers
    pub queue_capacity: usize,
    /// Records between progress lines
    pub progress_step: u64,
    pub sink: SinkConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            format: InputFormat::Rapid7Http,
            workers: default_workers(),
            queue_capacity: 4096,
            progress_step: 1_000_000,
            sink: SinkConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_format(mut self, format: InputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_progress_step(mut self, step: u64) -> Self {
        self.progress_step = step.max(1);
        self
    }

    pub fn with_sink(mut self, sink: SinkConfig) -> Self {
        self.sink = sink;
        self
    }
}

/// Settings of one enrichment run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeConfig {
    /// Concurrent fingerprinting jobs
    pub workers: usize,
    /// Fingerprint definitions, downloaded when missing
    pub appsfile: PathBuf,
    /// Results between progress lines
    pub progress_step: u64,
}

impl Default for AnalyzeConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            appsfile: PathBuf::from("./apps.json"),
            progress_step: 100,
        }
    }
}

impl AnalyzeConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_appsfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.appsfile = path.into();
        self
    }

    pub fn with_progress_step(mut self, step: u64) -> Self {
        self.progress_step = step.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("SQLite".parse::<OutputFormat>().unwrap(), OutputFormat::Sqlite);
        assert!("postgres".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Sqlite.to_string(), "sqlite");
    }

    #[test]
    fn test_pipeline_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.format, InputFormat::Rapid7Http);
        assert_eq!(config.progress_step, 1_000_000);
        assert_eq!(config.sink.batch_size, 100);
        assert!(config.workers >= 1);
    }

    #[test]
    fn test_pipeline_builders_clamp() {
        let config = PipelineConfig::default()
            .with_format(InputFormat::Rapid7Fdns)
            .with_workers(0)
            .with_progress_step(0)
            .with_sink(SinkConfig::default().with_batch_size(7));

        assert_eq!(config.format, InputFormat::Rapid7Fdns);
        assert_eq!(config.workers, 1);
        assert_eq!(config.progress_step, 1);
        assert_eq!(config.sink.batch_size, 7);
    }

    #[test]
    fn test_analyze_defaults() {
        let config = AnalyzeConfig::default();
        assert_eq!(config.workers, 10);
        assert_eq!(config.appsfile, PathBuf::from("./apps.json"));
        assert_eq!(config.progress_step, 100);
    }
}
