//! Certificate Transparency name lookups.
//!
//! Queries a crt.sh compatible search endpoint for every certificate issued
//! below a domain and returns the distinct names found in them.

use ahash::AHashSet;
use serde::Deserialize;
use std::time::Duration;

use crate::Result;

/// Default search endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://crt.sh/";

#[derive(Deserialize)]
struct Entry {
    #[serde(default)]
    name_value: String,
}

/// Client for a CT log search service.
pub struct CtClient {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl CtClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Search URL for all names below `domain`.
    pub fn query_url(&self, domain: &str) -> String {
        format!(
            "{}?q=%25.{}&output=json",
            self.endpoint,
            domain.trim_start_matches('.')
        )
    }

    /// Distinct certificate names below `domain`, in first-seen order.
    pub fn names(&self, domain: &str) -> Result<Vec<String>> {
        let url = self.query_url(domain);
        log::debug!("Querying {}", url);

        let body = self.client.get(&url).send()?.error_for_status()?.text()?;
        parse_response(&body)
    }
}

/// Extract names from a JSON search response.
///
/// `name_value` may hold several newline-separated names. Wildcard prefixes
/// are dropped and names are lowercased before deduplication.
pub fn parse_response(body: &str) -> Result<Vec<String>> {
    let entries: Vec<Entry> = serde_json::from_str(body)?;
    let mut seen = AHashSet::new();
    let mut names = Vec::new();

    for entry in &entries {
        for name in entry.name_value.lines() {
            let name = name.trim();
            let name = name.strip_prefix("*.").unwrap_or(name).to_ascii_lowercase();
            if name.is_empty() {
                continue;
            }
            if seen.insert(name.clone()) {
                names.push(name);
            }
        }
    }

    Ok(names)
}
