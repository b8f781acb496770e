//! Host enrichment with technology fingerprints.
//!
//! Stored hostnames are streamed into a [`Scheduler`], which runs a bounded
//! number of [`Fingerprinter`] workers. The [`Enricher`] consumes the results
//! and writes a `name -> version` JSON map back for every host that matched.

mod driver;
mod scheduler;
mod wappalyzer;

pub use driver::{apps_json, enrich, normalize_host, EnrichStats, Enricher};
pub use scheduler::{JobQueue, Scheduler};
pub use wappalyzer::{ensure_definitions, Definitions, Wappalyzer, WAPPALYZER_URL};

use serde::Serialize;
use std::time::Duration;

use crate::record::Headers;
use crate::Result;

/// Unit of work for a fingerprinter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Host or URL to analyze
    pub host: String,
    /// Response body when already known
    pub body: Option<String>,
    /// Response headers when already known
    pub headers: Option<Headers>,
}

impl Job {
    /// Job whose response must be fetched.
    pub fn online(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            body: None,
            headers: None,
        }
    }

    /// Job over a response captured earlier.
    pub fn offline(host: impl Into<String>, body: impl Into<String>, headers: Headers) -> Self {
        Self {
            host: host.into(),
            body: Some(body.into()),
            headers: Some(headers),
        }
    }

    pub fn is_online(&self) -> bool {
        self.body.is_none() && self.headers.is_none()
    }
}

/// A detected technology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppMatch {
    pub name: String,
    pub version: String,
}

impl AppMatch {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Result of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Host as analyzed, possibly with a URL scheme
    pub host: String,
    pub matches: Vec<AppMatch>,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Technology detection engine.
pub trait Fingerprinter: Send + Sync {
    /// Analyze one job.
    ///
    /// Returns the host as it was analyzed (for online jobs this is the URL
    /// that was fetched) and the detected technologies.
    fn fingerprint(&self, job: &Job) -> Result<(String, Vec<AppMatch>)>;
}

/// Lazy cursor over stored hostnames.
pub trait HostnameSource {
    /// Call `visit` for every stored hostname, stopping at the first error.
    ///
    /// Returns the number of hostnames visited.
    fn scan(&mut self, visit: &mut dyn FnMut(String) -> Result<()>) -> Result<u64>;
}

impl HostnameSource for Vec<String> {
    fn scan(&mut self, visit: &mut dyn FnMut(String) -> Result<()>) -> Result<u64> {
        let mut count = 0;
        for hostname in self.drain(..) {
            visit(hostname)?;
            count += 1;
        }
        Ok(count)
    }
}

/// Keyed writer for per-host technology maps.
pub trait AppStore {
    /// Store the JSON map for a host, returning the number of rows changed.
    fn update_apps(&mut self, hostname: &str, apps: &str) -> Result<usize>;
}
