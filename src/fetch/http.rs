//! HTTP plumbing for the fetcher: a `Transport` seam, the pooled reqwest
//! implementation, and `HttpClient`, which layers the two retry policies.

use super::retry::{with_backoff, RetryPolicy};
use crate::config::{POOL_MAX_IDLE_PER_HOST, RETRYABLE_STATUS, USER_AGENT};
use crate::error::{DownloadError, FetchError, TransportError};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, trace};

/// `Accept` sent when the caller does not negotiate a format.
pub const DEFAULT_ACCEPT: &str = "application/xml, application/json, text/xml, */*";

/// A complete response, body included.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
    }
}

/// One GET, no retries. Implementations must be shareable across worker threads.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str, accept: Option<&str>) -> Result<HttpResponse, TransportError>;
}

/// Keep-alive pooled blocking client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn get(&self, url: &str, accept: Option<&str>) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, accept.unwrap_or(DEFAULT_ACCEPT))
            .send()
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response.bytes().map_err(classify_reqwest_error)?.to_vec();

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

/// Retrying GET on top of a `Transport`.
///
/// Two layers: the inner one repeats a request that came back with 429 or a
/// 5xx, the outer one repeats the whole exchange when the connection failed or
/// timed out. Anything else fails the URL at once.
pub struct HttpClient<T> {
    transport: T,
    transport_retry: RetryPolicy,
    status_retry: RetryPolicy,
}

impl<T: Transport> HttpClient<T> {
    pub fn new(transport: T, transport_retry: RetryPolicy, status_retry: RetryPolicy) -> Self {
        Self {
            transport,
            transport_retry,
            status_retry,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Successful (2xx) response or the error of the final attempt.
    pub fn get(&self, url: &str, accept: Option<&str>) -> Result<HttpResponse, DownloadError> {
        with_backoff(
            &self.transport_retry,
            "transport",
            |e: &DownloadError| matches!(e, DownloadError::Transport { source, .. } if source.is_transient()),
            |_| {
                with_backoff(
                    &self.status_retry,
                    "status",
                    |e: &DownloadError| {
                        matches!(e, DownloadError::Status { status, .. } if RETRYABLE_STATUS.contains(status))
                    },
                    |attempt| self.attempt(url, accept, attempt),
                )
            },
        )
    }

    fn attempt(&self, url: &str, accept: Option<&str>, attempt: u32) -> Result<HttpResponse, DownloadError> {
        trace!(url, attempt, accept = accept.unwrap_or(DEFAULT_ACCEPT), "GET");
        let response = self
            .transport
            .get(url, accept)
            .map_err(|source| DownloadError::Transport {
                url: url.to_string(),
                source,
            })?;
        if !response.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }
        debug!(url, status = response.status, bytes = response.body.len(), "response received");
        Ok(response)
    }

    /// GETs `url` and writes the body to `destination`, creating parent
    /// directories. Rejects HTML when `expected` names a non-HTML format and
    /// bodies that are neither JSON nor XML.
    pub fn download(
        &self,
        url: &str,
        accept: Option<&str>,
        expected: &'static str,
        destination: &Path,
    ) -> Result<u64, DownloadError> {
        let response = self.get(url, accept)?;

        if response.is_html() && expected != "html" {
            return Err(DownloadError::UnexpectedHtml {
                url: url.to_string(),
                content_type: response.content_type.unwrap_or_default(),
                expected,
            });
        }
        if !looks_like_document(&response.body) {
            return Err(DownloadError::InvalidContent {
                url: url.to_string(),
            });
        }

        let io_error = |source| DownloadError::Io {
            url: url.to_string(),
            path: destination.to_path_buf(),
            source,
        };
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        fs::write(destination, &response.body).map_err(io_error)?;

        let bytes = response.body.len() as u64;
        info!(url, path = %destination.display(), bytes, "downloaded metadata");
        Ok(bytes)
    }
}

/// Non-empty and the first non-whitespace byte opens a JSON value or an XML document.
pub fn looks_like_document(body: &[u8]) -> bool {
    let body = body.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(body);
    matches!(
        body.iter().find(|b| !b.is_ascii_whitespace()),
        Some(b'{' | b'[' | b'<')
    )
}
