//! Remote metadata fetcher.
//!
//! Turns a dataset identifier into a local file plus its format by walking an
//! ordered list of catalogue URLs (content negotiation first, static per-format
//! endpoints after) until one yields a plausible JSON or XML document.

pub mod catalogue;
pub mod http;
pub mod retry;

pub use catalogue::{Candidate, Catalogue};
pub use http::{HttpClient, HttpResponse, ReqwestTransport, Transport};
pub use retry::{with_backoff, RetryPolicy};

use crate::config::{DEFAULT_CATALOGUE, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS};
use crate::error::{DownloadError, FetchError};
use rustc_hash::FxHasher;
use serde::Serialize;
use std::fmt;
use std::hash::Hasher;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Formats a catalogue can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataFormat {
    Json,
    Xml,
}

impl MetadataFormat {
    /// Also the file extension and the factory's format token.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataFormat::Json => "json",
            MetadataFormat::Xml => "xml",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            MetadataFormat::Json => "application/json",
            MetadataFormat::Xml => "application/xml",
        }
    }
}

impl fmt::Display for MetadataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetadataFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(MetadataFormat::Json),
            "xml" => Ok(MetadataFormat::Xml),
            other => Err(format!("unknown metadata format '{other}' (expected json or xml)")),
        }
    }
}

/// Delays and caps for the two HTTP retry layers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub transport: RetryPolicy,
    /// `max_attempts` here is ignored; `FetchConfig::max_retries` decides.
    pub status: RetryPolicy,
}

impl Backoff {
    /// Same caps, no sleeping.
    pub fn immediate() -> Self {
        let transport = RetryPolicy::transport();
        Self {
            transport: RetryPolicy::immediate(transport.max_attempts),
            status: RetryPolicy::immediate(1),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            transport: RetryPolicy::transport(),
            status: RetryPolicy::status(DEFAULT_MAX_RETRIES),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// Key into the catalogue table, e.g. `ceh`.
    pub catalogue: String,
    pub timeout: Duration,
    /// Extra attempts after a 429 or 5xx.
    pub max_retries: u32,
    pub preferred_format: Option<MetadataFormat>,
    pub download_dir: PathBuf,
    pub backoff: Backoff,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            catalogue: DEFAULT_CATALOGUE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            preferred_format: None,
            download_dir: std::env::temp_dir(),
            backoff: Backoff::default(),
        }
    }
}

impl FetchConfig {
    fn status_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.saturating_add(1),
            ..self.backoff.status
        }
    }
}

/// A downloaded metadata document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchedMetadata {
    pub identifier: String,
    pub path: PathBuf,
    pub format: MetadataFormat,
    pub url: String,
    pub bytes: u64,
}

pub struct MetadataFetcher<T = ReqwestTransport> {
    catalogue: &'static Catalogue,
    client: HttpClient<T>,
    config: FetchConfig,
}

impl MetadataFetcher<ReqwestTransport> {
    /// Fails on an unknown catalogue or when the HTTP client cannot be built.
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        Catalogue::lookup(&config.catalogue)?;
        let transport = ReqwestTransport::new(config.timeout)?;
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> MetadataFetcher<T> {
    pub fn with_transport(config: FetchConfig, transport: T) -> Result<Self, FetchError> {
        let catalogue = Catalogue::lookup(&config.catalogue)?;
        let client = HttpClient::new(transport, config.backoff.transport, config.status_policy());
        info!(
            catalogue = catalogue.name,
            timeout_secs = config.timeout.as_secs(),
            max_retries = config.max_retries,
            "initialized metadata fetcher"
        );
        Ok(Self {
            catalogue,
            client,
            config,
        })
    }

    pub fn catalogue(&self) -> &'static Catalogue {
        self.catalogue
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        self.client.transport()
    }

    /// Uses the configured preferred format, if any.
    pub fn fetch(&self, identifier: &str) -> Result<FetchedMetadata, FetchError> {
        self.fetch_with(identifier, self.config.preferred_format)
    }

    /// Tries every candidate, preferred format first; the first download that
    /// passes the content check wins.
    pub fn fetch_with(
        &self,
        identifier: &str,
        preferred: Option<MetadataFormat>,
    ) -> Result<FetchedMetadata, FetchError> {
        let identifier = checked_identifier(identifier)?;
        let candidates = self.catalogue.candidates(identifier, preferred);
        self.try_candidates(identifier, candidates)
    }

    /// JSON only; fails if the catalogue only has XML for this identifier.
    pub fn fetch_json(&self, identifier: &str) -> Result<FetchedMetadata, FetchError> {
        self.fetch_only(identifier, MetadataFormat::Json)
    }

    /// XML only; fails if the catalogue only has JSON for this identifier.
    pub fn fetch_xml(&self, identifier: &str) -> Result<FetchedMetadata, FetchError> {
        self.fetch_only(identifier, MetadataFormat::Xml)
    }

    fn fetch_only(&self, identifier: &str, format: MetadataFormat) -> Result<FetchedMetadata, FetchError> {
        let identifier = checked_identifier(identifier)?;
        let candidates = self
            .catalogue
            .candidates(identifier, Some(format))
            .into_iter()
            .filter(|c| c.format == format)
            .collect();
        self.try_candidates(identifier, candidates).map_err(|e| match e {
            FetchError::Exhausted {
                identifier, last, ..
            } => FetchError::Exhausted {
                identifier,
                reason: format!("{} format not available", format.as_str().to_uppercase()),
                last,
            },
            other => other,
        })
    }

    fn try_candidates(
        &self,
        identifier: &str,
        candidates: Vec<Candidate>,
    ) -> Result<FetchedMetadata, FetchError> {
        info!(identifier, candidates = candidates.len(), "fetching metadata");

        let mut last: Option<DownloadError> = None;
        for candidate in candidates {
            let path = self.download_path(identifier, candidate.format);
            debug!(url = %candidate.url, format = %candidate.format, "trying candidate");

            match self.client.download(
                &candidate.url,
                candidate.accept(),
                candidate.format.as_str(),
                &path,
            ) {
                Ok(bytes) => {
                    info!(identifier, url = %candidate.url, format = %candidate.format, "fetched metadata");
                    return Ok(FetchedMetadata {
                        identifier: identifier.to_string(),
                        path,
                        format: candidate.format,
                        url: candidate.url,
                        bytes,
                    });
                }
                Err(e) => {
                    warn!(url = %candidate.url, error = %e, "candidate failed");
                    last = Some(e);
                }
            }
        }

        Err(FetchError::Exhausted {
            identifier: identifier.to_string(),
            reason: last
                .as_ref()
                .map_or_else(|| "no candidate URLs".to_string(), |e| e.to_string()),
            last,
        })
    }

    /// `<download_dir>/metadata_<identifier>.<ext>`, identifier made path-safe.
    pub fn download_path(&self, identifier: &str, format: MetadataFormat) -> PathBuf {
        download_path(&self.config.download_dir, identifier, format)
    }
}

/// Trimmed identifier; blank ones are rejected before any URL is built.
fn checked_identifier(identifier: &str) -> Result<&str, FetchError> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(FetchError::Exhausted {
            identifier: String::new(),
            reason: "identifier is empty".to_string(),
            last: None,
        });
    }
    Ok(identifier)
}

pub fn download_path(dir: &Path, identifier: &str, format: MetadataFormat) -> PathBuf {
    dir.join(format!(
        "metadata_{}.{}",
        sanitize_identifier(identifier),
        format.as_str()
    ))
}

/// Keeps ASCII alphanumerics, `-`, `_` and `.`; everything else becomes `_`.
/// A rewritten identifier gets a hash of the original appended, so `a/b` and
/// `a_b` never share a file.
pub fn sanitize_identifier(identifier: &str) -> String {
    let identifier = identifier.trim();
    let safe: String = identifier
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe == identifier {
        return safe;
    }
    let mut hasher = FxHasher::default();
    hasher.write(identifier.as_bytes());
    format!("{safe}-{:08x}", hasher.finish() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_tokens() {
        assert_eq!("JSON".parse::<MetadataFormat>(), Ok(MetadataFormat::Json));
        assert_eq!(" xml ".parse::<MetadataFormat>(), Ok(MetadataFormat::Xml));
        assert!("ttl".parse::<MetadataFormat>().is_err());
        assert_eq!(MetadataFormat::Xml.mime_type(), "application/xml");
        assert_eq!(MetadataFormat::Json.to_string(), "json");
    }

    #[test]
    fn sanitizes_identifiers() {
        assert!(sanitize_identifier("a/b\\c").starts_with("a_b_c-"));
        assert_eq!(
            sanitize_identifier(" 0b1c2d3e-4f50-4a6b-8c7d-9e0f1a2b3c4d\n"),
            "0b1c2d3e-4f50-4a6b-8c7d-9e0f1a2b3c4d"
        );
        assert!(sanitize_identifier("../etc").starts_with(".._etc-"));
        assert!(!sanitize_identifier("../etc").contains('/'));
    }

    #[test]
    fn rewritten_identifiers_do_not_collide() {
        let slashed = sanitize_identifier("a/b");
        assert_eq!(slashed.len(), "a_b-".len() + 8);
        assert_ne!(slashed, sanitize_identifier("a_b"));
        assert_ne!(slashed, sanitize_identifier("a\\b"));
        assert_eq!(slashed, sanitize_identifier("a/b"));
        assert_eq!(sanitize_identifier("a_b"), "a_b");
    }

    #[test]
    fn download_path_layout() {
        let dir = Path::new("/tmp/dl");
        assert_eq!(
            download_path(dir, "x-y", MetadataFormat::Json),
            Path::new("/tmp/dl/metadata_x-y.json")
        );
        let rewritten = download_path(dir, "x/y", MetadataFormat::Xml);
        assert_eq!(rewritten.parent(), Some(dir));
        let name = rewritten.file_name().and_then(|n| n.to_str()).unwrap();
        assert!(name.starts_with("metadata_x_y-") && name.ends_with(".xml"), "{name}");
    }

    #[test]
    fn status_policy_follows_max_retries() {
        let config = FetchConfig {
            max_retries: 5,
            ..FetchConfig::default()
        };
        assert_eq!(config.status_policy().max_attempts, 6);
        assert_eq!(config.status_policy().base_delay, config.backoff.status.base_delay);
    }

    #[test]
    fn unknown_catalogue_fails_at_construction() {
        let config = FetchConfig {
            catalogue: "nowhere".to_string(),
            ..FetchConfig::default()
        };
        assert!(matches!(
            MetadataFetcher::new(config),
            Err(FetchError::UnknownCatalogue { .. })
        ));
    }
}
