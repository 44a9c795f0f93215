use std::time::Duration;

/// Per-request HTTP timeout (seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Extra attempts against one URL after a retryable HTTP status
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Attempts per URL when the connection itself fails or times out
pub const TRANSPORT_ATTEMPTS: u32 = 3;

/// Transport-level backoff (connection errors, timeouts): 2s, 4s, 8s capped at 10s
pub const TRANSPORT_BACKOFF_BASE: Duration = Duration::from_secs(2);
pub const TRANSPORT_BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Status-level backoff (429 / 5xx): 1s, 2s, 4s ...
pub const STATUS_BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const STATUS_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Fraction of each delay added as random jitter
pub const BACKOFF_JITTER: f64 = 0.25;

/// Status codes treated as transient by the connection pool layer
pub const RETRYABLE_STATUS: &[u16] = &[429, 500, 502, 503, 504];

/// Idle keep-alive connections kept per host
pub const POOL_MAX_IDLE_PER_HOST: usize = 20;

pub const USER_AGENT: &str = concat!("geometa/", env!("CARGO_PKG_VERSION"));

/// Catalogue used when none is configured
pub const DEFAULT_CATALOGUE: &str = "ceh";

/// ISO 639-2 code assumed when a record declares no language
pub const DEFAULT_LANGUAGE: &str = "eng";

/// Worker threads for batch fetch/extract pipelines
pub const DEFAULT_WORKERS: usize = 4;

/// Progress update interval (tick every N identifiers)
pub const PROGRESS_INTERVAL: u64 = 10;
