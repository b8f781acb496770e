//! Wappalyzer-style technology fingerprinting.
//!
//! Definitions come from an `apps.json` file:
//!
//! ```json
//! {"apps": {"Nginx": {"headers": {"Server": "nginx(?:/([\\d.]+))?\\;version:\\1"}}}}
//! ```
//!
//! Each app lists regex patterns for response headers, the html body,
//! script sources and meta tags. A pattern may carry `\;`-separated tags,
//! of which `version:` is used to build the reported version from capture
//! groups. Patterns the `regex` crate cannot compile (look-arounds,
//! back-references) are skipped.

use once_cell::sync::Lazy;
use regex::{Captures, Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{AppMatch, Fingerprinter, Job};
use crate::record::Headers;
use crate::{Error, Result};

/// Upstream location of the definitions file.
pub const WAPPALYZER_URL: &str =
    "https://raw.githubusercontent.com/AliasIO/Wappalyzer/master/src/apps.json";

/// Request timeout for online jobs.
const FETCH_TIMEOUT: Duration = Duration::from_secs(8);

static SCRIPT_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<script[^>]+src\s*=\s*["']([^"']+)["']"#).unwrap()
});

static META_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]+name\s*=\s*["']([^"']+)["'][^>]+content\s*=\s*["']([^"']*)["']"#)
        .unwrap()
});

/// A string or a list of strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Deserialize)]
struct DefinitionsFile {
    #[serde(alias = "technologies")]
    apps: BTreeMap<String, AppWire>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct AppWire {
    headers: BTreeMap<String, String>,
    html: OneOrMany,
    script: OneOrMany,
    meta: BTreeMap<String, OneOrMany>,
    implies: OneOrMany,
}

/// Compiled pattern with an optional version template.
#[derive(Debug)]
struct Pattern {
    regex: Regex,
    version: Option<String>,
}

impl Pattern {
    fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.split("\\;");
        let expr = parts.next().unwrap_or_default();
        let version = parts
            .filter_map(|tag| tag.strip_prefix("version:"))
            .map(str::to_string)
            .next();

        let regex = RegexBuilder::new(expr)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::InvalidPattern(format!("{}: {}", expr, e)))?;

        Ok(Self { regex, version })
    }

    /// Version string on match (empty when unknown), `None` otherwise.
    fn find(&self, text: &str) -> Option<String> {
        let caps = self.regex.captures(text)?;
        Some(match &self.version {
            Some(template) => expand_version(template, &caps),
            None => String::new(),
        })
    }
}

/// Replace `\1`..`\9` in a version template with capture groups.
fn expand_version(template: &str, caps: &Captures<'_>) -> String {
    let mut out = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(group) = chars.peek().and_then(|d| d.to_digit(10)) {
                chars.next();
                if let Some(m) = caps.get(group as usize) {
                    out.push_str(m.as_str());
                }
                continue;
            }
        }
        out.push(c);
    }

    out.trim().to_string()
}

fn compile_all(app: &str, raw: Vec<String>) -> Vec<Pattern> {
    raw.iter()
        .filter_map(|p| match Pattern::parse(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                log::debug!("Skipping pattern of {}: {}", app, e);
                None
            }
        })
        .collect()
}

fn compile_named(app: &str, raw: Vec<(String, String)>) -> Vec<(String, Pattern)> {
    raw.into_iter()
        .filter_map(|(name, p)| match Pattern::parse(&p) {
            Ok(pattern) => Some((name.to_ascii_lowercase(), pattern)),
            Err(e) => {
                log::debug!("Skipping pattern of {}: {}", app, e);
                None
            }
        })
        .collect()
}

#[derive(Debug)]
struct App {
    name: String,
    headers: Vec<(String, Pattern)>,
    html: Vec<Pattern>,
    script: Vec<Pattern>,
    meta: Vec<(String, Pattern)>,
    implies: Vec<String>,
}

impl App {
    fn compile(name: String, wire: AppWire) -> Self {
        let meta = wire
            .meta
            .into_iter()
            .flat_map(|(tag, patterns)| {
                patterns
                    .into_vec()
                    .into_iter()
                    .map(move |p| (tag.clone(), p))
            })
            .collect();

        Self {
            headers: compile_named(&name, wire.headers.into_iter().collect()),
            html: compile_all(&name, wire.html.into_vec()),
            script: compile_all(&name, wire.script.into_vec()),
            meta: compile_named(&name, meta),
            implies: wire
                .implies
                .into_vec()
                .into_iter()
                .filter_map(|i| i.split("\\;").next().map(str::to_string))
                .collect(),
            name,
        }
    }

    /// Detected version, if any pattern of this app matches the page.
    fn detect(&self, page: &Page<'_>) -> Option<String> {
        let mut found: Option<String> = None;
        let mut note = |version: String| {
            if found.as_ref().map_or(true, |v| v.is_empty()) {
                found = Some(version);
            }
        };

        for (name, pattern) in &self.headers {
            for (header, values) in &page.headers {
                if header != name {
                    continue;
                }
                for value in values.iter() {
                    if let Some(v) = pattern.find(value) {
                        note(v);
                    }
                }
            }
        }
        for pattern in &self.html {
            if let Some(v) = pattern.find(page.body) {
                note(v);
            }
        }
        for pattern in &self.script {
            for src in &page.scripts {
                if let Some(v) = pattern.find(src) {
                    note(v);
                }
            }
        }
        for (name, pattern) in &self.meta {
            for (tag, content) in &page.meta {
                if tag == name {
                    if let Some(v) = pattern.find(content) {
                        note(v);
                    }
                }
            }
        }

        found
    }
}

/// Parts of a response that patterns run against.
struct Page<'a> {
    body: &'a str,
    headers: Vec<(String, &'a [String])>,
    scripts: Vec<&'a str>,
    meta: Vec<(String, &'a str)>,
}

impl<'a> Page<'a> {
    fn new(body: &'a str, headers: &'a Headers) -> Self {
        Self {
            body,
            headers: headers
                .iter()
                .map(|(name, values)| (name.to_ascii_lowercase(), values))
                .collect(),
            scripts: SCRIPT_SRC
                .captures_iter(body)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str())
                .collect(),
            meta: META_TAG
                .captures_iter(body)
                .filter_map(|c| Some((c.get(1)?.as_str().to_ascii_lowercase(), c.get(2)?.as_str())))
                .collect(),
        }
    }
}

/// Compiled fingerprint definitions.
#[derive(Debug, Default)]
pub struct Definitions {
    apps: Vec<App>,
}

impl Definitions {
    /// Parse definitions from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: DefinitionsFile = serde_json::from_str(json)?;
        let apps = file
            .apps
            .into_iter()
            .map(|(name, wire)| App::compile(name, wire))
            .collect();
        Ok(Self { apps })
    }

    /// Load definitions from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let definitions = Self::from_json(&fs::read_to_string(path)?)?;
        log::info!("Loaded {} app definitions from {:?}", definitions.len(), path);
        Ok(definitions)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Detect technologies in a response.
    ///
    /// Apps are reported once, in definition order, followed by the apps
    /// they imply.
    pub fn analyze(&self, body: &str, headers: &Headers) -> Vec<AppMatch> {
        let page = Page::new(body, headers);
        let mut matches: Vec<AppMatch> = Vec::new();

        for app in &self.apps {
            if let Some(version) = app.detect(&page) {
                matches.push(AppMatch::new(app.name.clone(), version));
            }
        }

        let mut i = 0;
        while i < matches.len() {
            let implied: Vec<String> = self
                .apps
                .iter()
                .find(|app| app.name == matches[i].name)
                .map(|app| app.implies.clone())
                .unwrap_or_default();
            for name in implied {
                if !matches.iter().any(|m| m.name == name) {
                    matches.push(AppMatch::new(name, ""));
                }
            }
            i += 1;
        }

        matches
    }
}

/// Fingerprinter over compiled definitions.
///
/// Offline jobs are analyzed as given. Online jobs are fetched first; hosts
/// without a scheme are requested as `http://host`.
pub struct Wappalyzer {
    definitions: Definitions,
    client: reqwest::blocking::Client,
}

impl Wappalyzer {
    pub fn new(definitions: Definitions) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()?;
        Ok(Self {
            definitions,
            client,
        })
    }

    /// Load definitions from `path` and build a fingerprinter.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(Definitions::load(path)?)
    }

    pub fn definitions(&self) -> &Definitions {
        &self.definitions
    }

    fn fetch(&self, url: &str) -> Result<(String, Headers)> {
        let response = self.client.get(url).send()?;

        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.append(name.as_str(), [value.to_string()]);
            }
        }

        Ok((response.text()?, headers))
    }
}

impl Fingerprinter for Wappalyzer {
    fn fingerprint(&self, job: &Job) -> Result<(String, Vec<AppMatch>)> {
        if !job.is_online() {
            let empty = Headers::new();
            let body = job.body.as_deref().unwrap_or_default();
            let headers = job.headers.as_ref().unwrap_or(&empty);
            return Ok((job.host.clone(), self.definitions.analyze(body, headers)));
        }

        let url = if job.host.contains("://") {
            job.host.clone()
        } else {
            format!("http://{}", job.host)
        };
        let (body, headers) = self.fetch(&url)?;
        Ok((url, self.definitions.analyze(&body, &headers)))
    }
}

/// Download the definitions file to `path` unless it already exists.
///
/// The file is written to a temporary sibling and renamed into place.
/// Returns whether a download happened.
pub fn ensure_definitions(path: impl AsRef<Path>, url: &str) -> Result<bool> {
    let path = path.as_ref();
    if path.exists() {
        return Ok(false);
    }

    log::info!("Apps file {:?} was not found, downloading from {}", path, url);

    let response = ureq::get(url).call().map_err(|e| match e {
        ureq::Error::Status(code, _) => Error::Download(format!("HTTP error: {}", code)),
        ureq::Error::Transport(t) => Error::Download(format!("Transport error: {}", t)),
    })?;

    let mut data = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut data)
        .map_err(|e| Error::Download(format!("Failed to read response: {}", e)))?;

    serde_json::from_slice::<DefinitionsFile>(&data)
        .map_err(|e| Error::Download(format!("Invalid definitions: {}", e)))?;

    let temp_path = temp_path(path);
    let mut temp_file = fs::File::create(&temp_path)?;
    temp_file.write_all(&data)?;
    temp_file.sync_all()?;
    drop(temp_file);

    fs::rename(&temp_path, path)?;
    log::info!("Saved {} bytes to {:?}", data.len(), path);

    Ok(true)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
