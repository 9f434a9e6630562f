use std::time::Duration;

use serde::Deserialize;
use tendril_core::Backoff;

use crate::breaker::BreakerConfig;
use crate::codec::{DEFAULT_COMPRESSION_LEVEL, DEFAULT_COMPRESSION_THRESHOLD};
use crate::error::CacheError;

/// Cache client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backend selection.
    pub kv: KvConfig,

    /// Upper bound on a single backend call, including pool wait.
    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub operation_timeout: Duration,

    /// Timeout for establishing a pooled connection.
    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub connect_timeout: Duration,

    /// TTL applied when callers do not pick one.
    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub default_ttl: Duration,

    /// Serialised payloads of at least this many bytes are compressed.
    pub compression_threshold: usize,

    /// zstd level used for compressed payloads.
    pub compression_level: i32,

    pub retry: RetryConfig,

    pub breaker: BreakerConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kv: KvConfig::default(),
            operation_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(1),
            default_ttl: Duration::from_secs(600),
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.operation_timeout.is_zero() {
            return Err(CacheError::Configuration(
                "operation_timeout must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(CacheError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(self.breaker.failure_ratio > 0.0 && self.breaker.failure_ratio <= 1.0) {
            return Err(CacheError::Configuration(format!(
                "breaker.failure_ratio must be in (0, 1], got {}",
                self.breaker.failure_ratio
            )));
        }
        if self.breaker.min_requests == 0 {
            return Err(CacheError::Configuration(
                "breaker.min_requests must be at least 1".to_string(),
            ));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(CacheError::Configuration(format!(
                "compression_level must be between 1 and 22, got {}",
                self.compression_level
            )));
        }
        #[cfg(feature = "valkey")]
        if let KvConfig::Valkey { pool_size: 0, .. } = self.kv {
            return Err(CacheError::Configuration(
                "kv.pool_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum KvConfig {
    #[default]
    Memory,
    #[cfg(feature = "valkey")]
    Valkey {
        url: String,
        #[serde(default)]
        namespace: Option<String>,
        #[serde(default = "default_pool_size")]
        pool_size: usize,
    },
}

/// Retry policy for transient backend failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,

    /// Linear backoff step: attempt `n` waits `n * base_delay`.
    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::Linear(self.base_delay)
    }
}

#[cfg(feature = "valkey")]
fn default_pool_size() -> usize {
    10
}
