//! Error types for scanfilter.

use thiserror::Error;

/// Error type for scanfilter operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error (open, read, decompress)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Download error
    #[error("download error: {0}")]
    Download(String),

    /// Invalid fingerprint pattern
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The sink stopped accepting records
    #[error("sink closed before the run finished")]
    SinkClosed,

    /// The sink finished with records unaccounted for
    #[error("sink drained {completed} of {submitted} submitted records")]
    Undrained { completed: u64, submitted: u64 },

    /// A worker thread panicked
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
}

/// Result type alias for scanfilter operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for domain rule operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DomainRuleError {
    /// Empty pattern
    #[error("empty domain pattern")]
    EmptyPattern,
}

/// Error type for CIDR rule operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CidrRuleError {
    /// Invalid CIDR notation
    #[error("invalid CIDR notation: {0}")]
    InvalidCidr(String),
}
