//! Scanfilter - streaming filter for internet-wide scan dumps.
//!
//! This crate reads newline-delimited JSON dumps (forward DNS or HTTP GET
//! scans, optionally gzip compressed), keeps the records that match a set of
//! domain suffix and CIDR rules, and writes the survivors either as JSON lines
//! or into a SQLite host store in batched transactions.
//!
//! # Features
//!
//! - **Suffix matching**: `example.com` matches `www.example.com`, never
//!   `notexample.com`
//! - **IP-CIDR matching**: IPv4 and IPv6 ranges, accepted regardless of domain
//! - **Parallel filtering**: a fixed worker pool behind bounded channels
//! - **Batched writes**: one transaction per batch, bad rows do not abort it
//! - **Enrichment**: fingerprint stored hosts and write detected technologies
//!   back to the store
//! - **CT lookups**: expand domain rules into certificate names
//!
//! # Quick Start
//!
//! ```ignore
//! use scanfilter::{Filter, Pipeline, PipelineConfig, RuleSet, Sink, JsonSink};
//! use std::sync::Arc;
//!
//! let allow = RuleSet::from_file("domains.txt")?;
//! let filter = Filter::from_rulesets(Some(allow), None);
//!
//! let config = PipelineConfig::default();
//! let sink = Sink::Json(JsonSink::stdout(config.sink.channel_capacity)?);
//! let pipeline = Pipeline::new(config, Arc::new(filter), sink);
//!
//! let stats = pipeline.run("fdns_a.json.gz")?;
//! println!("{} of {} records kept", stats.accepted, stats.processed);
//! ```
//!
//! # Filter Order
//!
//! 1. IP inside a configured range: accepted
//! 2. Allow domains configured: the domain must match one
//! 3. Deny domains configured: the domain must not match any
//! 4. Otherwise accepted

mod error;

pub mod analyze;
pub mod config;
pub mod ct;
pub mod filter;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod record;
pub mod rule;
pub mod ruleset;
pub mod sink;
pub mod source;
pub mod store;

// Re-export core types
pub use error::{CidrRuleError, DomainRuleError, Error, Result};
pub use filter::Filter;
pub use record::{DnsEntry, Headers, HostRecord, InputFormat, Record};
pub use ruleset::RuleSet;

// Re-export run configuration and driver
pub use config::{AnalyzeConfig, OutputFormat, PipelineConfig};
pub use pipeline::{Pipeline, RunState, RunStats};

// Re-export sinks and store
pub use sink::{BatchSink, BatchStore, JsonSink, Sink, SinkConfig, SinkStats};
pub use store::{SqliteStore, StoreConfig};

// Re-export enrichment
pub use analyze::{Enricher, Scheduler, Wappalyzer};
pub use ct::CtClient;
