//! Enrichment driver.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use super::{AppMatch, AppStore, HostnameSource, Job, Outcome, Scheduler};
use crate::filter::Filter;
use crate::progress::Progress;
use crate::record::Record;
use crate::{Error, Result};

/// Totals of one enrichment run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnrichStats {
    /// Hostnames read from the store
    pub scanned: u64,
    /// Hostnames skipped by the filter
    pub filtered: u64,
    /// Results received from the scheduler
    pub results: u64,
    /// Results carrying an error
    pub failed: u64,
    /// Results without any match
    pub unmatched: u64,
    /// Hosts written back
    pub updated: u64,
    /// Writes that failed
    pub update_errors: u64,
}

/// Strip a leading `https://` or `http://` from an analyzed host.
///
/// Only those literal prefixes are removed, in that order; no other URL
/// parsing is done.
pub fn normalize_host(host: &str) -> &str {
    let host = host.strip_prefix("https://").unwrap_or(host);
    host.strip_prefix("http://").unwrap_or(host)
}

/// Serialize matches as a `name -> version` JSON object.
pub fn apps_json(matches: &[AppMatch]) -> Result<String> {
    let apps: BTreeMap<&str, &str> = matches
        .iter()
        .map(|m| (m.name.as_str(), m.version.as_str()))
        .collect();
    Ok(serde_json::to_string(&apps)?)
}

/// Streams stored hosts through a scheduler and writes results back.
pub struct Enricher {
    filter: Arc<Filter>,
    progress_step: u64,
}

impl Enricher {
    pub fn new() -> Self {
        Self {
            filter: Arc::new(Filter::new()),
            progress_step: 100,
        }
    }

    /// Only analyze hostnames the filter accepts.
    pub fn with_filter(mut self, filter: Arc<Filter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_progress_step(mut self, step: u64) -> Self {
        self.progress_step = step;
        self
    }

    /// Run one enrichment pass.
    ///
    /// The source is scanned on its own thread while results are consumed
    /// and written on the calling thread, so `store` is the only writer.
    /// Failed writes are logged and skipped; a failed scan is returned once
    /// the results in flight have drained.
    pub fn run<H, A>(&self, mut source: H, store: &mut A, mut scheduler: Scheduler) -> Result<EnrichStats>
    where
        H: HostnameSource + Send + 'static,
        A: AppStore + ?Sized,
    {
        let queue = scheduler
            .queue()
            .ok_or_else(|| Error::Config("scheduler already closed".to_string()))?;
        scheduler.close();

        let filter = Arc::clone(&self.filter);
        let producer = thread::Builder::new()
            .name("host-scan".to_string())
            .spawn(move || -> Result<(u64, u64)> {
                let mut filtered = 0;
                let scanned = source.scan(&mut |hostname| {
                    if !filter.accepts_domain(&hostname) {
                        filtered += 1;
                        return Ok(());
                    }
                    queue.schedule(Job::online(hostname))
                })?;
                Ok((scanned, filtered))
            })?;

        let progress = Progress::new("analyze", self.progress_step);
        let mut stats = EnrichStats::default();

        for outcome in scheduler.results() {
            stats.results += 1;
            progress.record();

            if let Some(error) = &outcome.error {
                log::debug!("Skipping {}: {}", outcome.host, error);
                stats.failed += 1;
                continue;
            }
            if outcome.matches.is_empty() {
                stats.unmatched += 1;
                continue;
            }

            let hostname = normalize_host(&outcome.host);
            let apps = match apps_json(&outcome.matches) {
                Ok(apps) => apps,
                Err(e) => {
                    log::warn!("Error encoding matches for {}: {}", hostname, e);
                    stats.update_errors += 1;
                    continue;
                }
            };

            match store.update_apps(hostname, &apps) {
                Ok(_) => {
                    stats.updated += 1;
                    progress.valid();
                }
                Err(e) => {
                    log::warn!("Error updating {}: {}", hostname, e);
                    stats.update_errors += 1;
                }
            }
        }

        scheduler.join()?;
        let (scanned, filtered) = producer
            .join()
            .unwrap_or_else(|_| Err(Error::WorkerPanicked("host-scan".to_string())))?;
        stats.scanned = scanned;
        stats.filtered = filtered;

        log::info!(
            "Enrichment finished: {} scanned, {} updated, {} failed, {} without matches",
            stats.scanned,
            stats.updated,
            stats.failed,
            stats.unmatched
        );
        Ok(stats)
    }

    /// Analyze responses captured in a scan dump without fetching anything.
    ///
    /// HTTP records the filter accepts become offline jobs; DNS records are
    /// counted as filtered. Every outcome with at least one match is handed
    /// to `visit` on the calling thread. A failing `visit` is logged and
    /// counted; a failing record source is returned after the drain.
    pub fn run_offline<I>(
        &self,
        records: I,
        mut scheduler: Scheduler,
        visit: &mut dyn FnMut(&Outcome) -> Result<()>,
    ) -> Result<EnrichStats>
    where
        I: Iterator<Item = Result<Record>> + Send + 'static,
    {
        let queue = scheduler
            .queue()
            .ok_or_else(|| Error::Config("scheduler already closed".to_string()))?;
        scheduler.close();

        let filter = Arc::clone(&self.filter);
        let producer = thread::Builder::new()
            .name("dump-scan".to_string())
            .spawn(move || -> Result<(u64, u64)> {
                let (mut scanned, mut filtered) = (0, 0);
                for record in records {
                    let record = record?;
                    scanned += 1;
                    if !filter.accepts(&record) {
                        filtered += 1;
                        continue;
                    }
                    match record {
                        Record::Host(host) => {
                            queue.schedule(Job::offline(host.address, host.body, host.headers))?
                        }
                        Record::Dns(_) => filtered += 1,
                    }
                }
                Ok((scanned, filtered))
            })?;

        let progress = Progress::new("analyze", self.progress_step);
        let mut stats = EnrichStats::default();

        for outcome in scheduler.results() {
            stats.results += 1;
            progress.record();

            if let Some(error) = &outcome.error {
                log::debug!("Skipping {}: {}", outcome.host, error);
                stats.failed += 1;
                continue;
            }
            if outcome.matches.is_empty() {
                stats.unmatched += 1;
                continue;
            }

            match visit(&outcome) {
                Ok(()) => {
                    stats.updated += 1;
                    progress.valid();
                }
                Err(e) => {
                    log::warn!("Error reporting {}: {}", outcome.host, e);
                    stats.update_errors += 1;
                }
            }
        }

        scheduler.join()?;
        let (scanned, filtered) = producer
            .join()
            .unwrap_or_else(|_| Err(Error::WorkerPanicked("dump-scan".to_string())))?;
        stats.scanned = scanned;
        stats.filtered = filtered;

        log::info!(
            "Offline analysis finished: {} records, {} reported, {} without matches",
            stats.scanned,
            stats.updated,
            stats.unmatched
        );
        Ok(stats)
    }
}

impl Default for Enricher {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one unfiltered enrichment pass, logging every `step` results.
pub fn enrich<H, A>(source: H, store: &mut A, scheduler: Scheduler, step: u64) -> Result<EnrichStats>
where
    H: HostnameSource + Send + 'static,
    A: AppStore + ?Sized,
{
    Enricher::new()
        .with_progress_step(step)
        .run(source, store, scheduler)
}
