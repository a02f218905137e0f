use std::fmt;

use thiserror::Error;

use crate::retry::Transient;

/// Failure of one collector invocation. Contained at the collector boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectionError {
    /// The whole invocation exceeded its budget.
    #[error("timed out after {0}s")]
    Timeout(u64),

    /// A single request inside the collector timed out.
    #[error("request timed out: {0}")]
    RequestTimeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("parse failure: {0}")]
    ParseFailure(String),

    #[error("source unreachable: {0}")]
    Unreachable(String),

    /// Server-side failure (5xx). Reported as unreachable, but worth retrying.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionErrorKind {
    Timeout,
    RateLimited,
    ParseFailure,
    Unreachable,
    Cancelled,
}

impl CollectionError {
    pub fn kind(&self) -> CollectionErrorKind {
        match self {
            CollectionError::Timeout(_) | CollectionError::RequestTimeout(_) => {
                CollectionErrorKind::Timeout
            }
            CollectionError::RateLimited(_) => CollectionErrorKind::RateLimited,
            CollectionError::ParseFailure(_) => CollectionErrorKind::ParseFailure,
            CollectionError::Unreachable(_) | CollectionError::Unavailable(_) => {
                CollectionErrorKind::Unreachable
            }
            CollectionError::Cancelled => CollectionErrorKind::Cancelled,
        }
    }
}

impl fmt::Display for CollectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CollectionErrorKind::Timeout => "timeout",
            CollectionErrorKind::RateLimited => "rate_limited",
            CollectionErrorKind::ParseFailure => "parse_failure",
            CollectionErrorKind::Unreachable => "unreachable",
            CollectionErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl Transient for CollectionError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            CollectionError::Timeout(_)
                | CollectionError::RequestTimeout(_)
                | CollectionError::RateLimited(_)
                | CollectionError::Unavailable(_)
        )
    }
}

/// Failure of one enrichment call (email finder, page fetch, web search).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// A clean negative answer. Mapped to the `NotFound` outcome.
    #[error("not found")]
    NotFound,

    #[error("rejected: {0}")]
    Rejected(String),
}

impl Transient for EnrichmentError {
    fn is_transient(&self) -> bool {
        matches!(self, EnrichmentError::Transient(_))
    }
}

/// Failure talking to the persistence backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink write failed after {written} rows: {message}")]
    WriteFailure { written: usize, message: String },

    #[error("sink authentication failed: {0}")]
    AuthFailure(String),
}

impl SinkError {
    pub fn write(message: impl Into<String>) -> Self {
        SinkError::WriteFailure {
            written: 0,
            message: message.into(),
        }
    }

    /// Rows that made it to the backend before the failure.
    pub fn written(&self) -> usize {
        match self {
            SinkError::WriteFailure { written, .. } => *written,
            SinkError::AuthFailure(_) => 0,
        }
    }
}

impl Transient for SinkError {
    /// Partial writes are never retried; replaying them would duplicate rows.
    fn is_transient(&self) -> bool {
        matches!(self, SinkError::WriteFailure { written: 0, .. })
    }
}

/// Low-level HTTP failure from page fetching or web search.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("network error: {0}")]
    Network(String),
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Transient for FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Network(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return FetchError::Timeout(e.to_string());
        }
        match e.status() {
            Some(status) => FetchError::Status {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => FetchError::Network(e.to_string()),
        }
    }
}

impl From<FetchError> for CollectionError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Timeout(msg) => CollectionError::RequestTimeout(msg),
            FetchError::Status { status: 429, url } => {
                CollectionError::RateLimited(format!("HTTP 429 for {url}"))
            }
            FetchError::Status { status, url } if status >= 500 => {
                CollectionError::Unavailable(format!("HTTP {status} for {url}"))
            }
            FetchError::Status { status, url } => {
                CollectionError::Unreachable(format!("HTTP {status} for {url}"))
            }
            FetchError::Network(msg) => CollectionError::Unreachable(msg),
        }
    }
}

impl From<FetchError> for EnrichmentError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Timeout(msg) | FetchError::Network(msg) => EnrichmentError::Transient(msg),
            FetchError::Status { status, url } => match status {
                401 | 403 => EnrichmentError::AuthFailure(format!("HTTP {status} for {url}")),
                404 => EnrichmentError::NotFound,
                429 | 500.. => EnrichmentError::Transient(format!("HTTP {status} for {url}")),
                _ => EnrichmentError::Rejected(format!("HTTP {status} for {url}")),
            },
        }
    }
}

/// Why a collector item could not become a record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedItem {
    #[error("item has no name")]
    MissingName,

    #[error("{0}: neither a usable website nor a twitter handle")]
    NoContactHandle(String),
}

/// Application-level error used by the run coordinator and the binary.
#[derive(Error, Debug)]
pub enum Web3ScoutError {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
