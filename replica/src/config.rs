//! Configuration management for the replica.

use std::env;
use std::time::Duration;

/// Replica configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Side identifier stamped into every version this replica writes
    pub side: String,
    /// Base URI of the document store member
    pub resource: String,
    /// Heartbeat interval requested from the change feed
    pub heartbeat: Duration,
    /// Timeout for unary store requests
    pub request_timeout: Duration,
    /// Timeout for establishing new connections
    pub connect_timeout: Duration,
    /// Maximum concurrent connections per (side, resource) pair
    pub max_connections: usize,
    /// Retry policy for revision conflicts
    pub retry: RetryPolicy,
}

impl ReplicaConfig {
    /// Build a configuration with defaults for everything but identity.
    pub fn new(side: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            side: side.into(),
            resource: resource.into(),
            heartbeat: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_connections: 8,
            retry: RetryPolicy::default(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let side = env::var("CONVERGE_SIDE").map_err(|_| ConfigError::MissingSide)?;
        let resource = env::var("CONVERGE_STORE_URI").map_err(|_| ConfigError::MissingStoreUri)?;

        let heartbeat = read_millis("CONVERGE_HEARTBEAT_MS", 30_000)?;
        let request_timeout = read_millis("CONVERGE_REQUEST_TIMEOUT_MS", 30_000)?;
        let connect_timeout = read_millis("CONVERGE_CONNECT_TIMEOUT_MS", 10_000)?;

        let max_connections = env::var("CONVERGE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "8".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("CONVERGE_MAX_CONNECTIONS"))?;

        let mut retry = RetryPolicy::default();
        if let Ok(raw) = env::var("CONVERGE_MAX_RETRIES") {
            retry.max_attempts = raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CONVERGE_MAX_RETRIES"))?;
        }

        Ok(Self {
            side,
            resource,
            heartbeat,
            request_timeout,
            connect_timeout,
            max_connections,
            retry,
        })
    }

    /// Override the change feed heartbeat interval.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

fn read_millis(key: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let millis = match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue(key))?,
        Err(_) => default_ms,
    };
    Ok(Duration::from_millis(millis))
}

/// Bounded retry with exponential backoff for operations that race
/// concurrent writers.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts before giving up with `RetriesExhausted`
    pub max_attempts: u32,
    /// Delay before the first retry
    pub backoff_base: Duration,
    /// Upper bound on any single delay
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 64,
            backoff_base: Duration::from_millis(10),
            backoff_cap: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Retry only a handful of times with short delays. For tests and
    /// callers that prefer failing fast.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 4,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(20),
        }
    }

    /// Delay before the given attempt, 1-based. Doubles each attempt up
    /// to the cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.backoff_base.saturating_mul(1 << exponent);
        delay.min(self.backoff_cap)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("CONVERGE_SIDE environment variable is required")]
    MissingSide,

    #[error("CONVERGE_STORE_URI environment variable is required")]
    MissingStoreUri,

    #[error("Invalid value for {0}")]
    InvalidValue(&'static str),
}
