//! Typed errors for extraction and fetching.
//!
//! Library code returns these enums; the binary and the batch runner wrap them
//! in `anyhow` for reporting.

use std::path::PathBuf;
use thiserror::Error;

/// A canonical-model invariant was violated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} is mandatory and cannot be empty")]
    EmptyField { field: &'static str },

    #[error("{field} must be in range [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{low_field} ({low}) must be <= {high_field} ({high})")]
    Inverted {
        low_field: &'static str,
        low: f64,
        high_field: &'static str,
        high: f64,
    },

    #[error("temporal extent start ({start}) must not be after end ({end})")]
    TemporalOrder { start: String, end: String },

    #[error("{field} is not a finite number")]
    NotFinite { field: &'static str },

    #[error("{field} has only {found} of 4 coordinates")]
    Incomplete { field: &'static str, found: usize },
}

/// Failures surfaced by a metadata extractor or the extractor factory.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("metadata file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("unsupported format for file: {path}. Supported formats: {}", known_formats.join(", "))]
    UnsupportedFormat {
        path: String,
        known_formats: Vec<String>,
    },

    #[error("failed to extract metadata from {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },

    #[error("metadata validation failed for {}: {source}", path.display())]
    Validation {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },
}

impl ExtractionError {
    pub fn extraction(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Extraction {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// A single request never reached an HTTP response.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    /// Connection failures and timeouts are worth another attempt; anything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Connect(_) | TransportError::Timeout(_))
    }
}

/// One download attempt against one URL failed.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to download {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to download {url}: HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to download {url}: got HTML ({content_type}) while {expected} was requested")]
    UnexpectedHtml {
        url: String,
        content_type: String,
        expected: &'static str,
    },

    #[error("failed to download {url}: response does not look like JSON or XML")]
    InvalidContent { url: String },

    #[error("failed to download {url}: file system error at {}: {source}", path.display())]
    Io {
        url: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Every fetch candidate for an identifier has been exhausted, or the fetcher
/// could not be set up.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to fetch metadata for {identifier}: {reason}")]
    Exhausted {
        identifier: String,
        reason: String,
        #[source]
        last: Option<DownloadError>,
    },

    #[error("unsupported catalogue: {name}. Supported catalogues: {}", known.join(", "))]
    UnknownCatalogue { name: String, known: Vec<String> },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    pub fn identifier(&self) -> Option<&str> {
        match self {
            FetchError::Exhausted { identifier, .. } => Some(identifier),
            _ => None,
        }
    }
}
