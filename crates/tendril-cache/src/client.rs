//! Fault-tolerant cache client.
//!
//! [`ResilientCache`] wraps a [`KvBackend`] with:
//! - a per-attempt timeout, so no call blocks past `operation_timeout`
//! - bounded retries with linear backoff for transient failures
//! - a [`CircuitBreaker`] that fails fast while the backend is down
//! - transparent payload compression via [`PayloadCodec`]
//!
//! Every failure comes back as a [`CacheError`]; callers treat any error as
//! "cache unavailable" and fall back to the source of truth.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tendril_core::Backoff;
use tokio::time::Instant;
use tracing::debug;

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::codec::PayloadCodec;
use crate::config::{CacheConfig, KvConfig};
use crate::error::{CacheError, KvError};
use crate::memory::MemoryKv;
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot, CacheOp};
use crate::traits::KvBackend;

#[cfg(feature = "valkey")]
use crate::valkey::ValkeyKv;

pub struct ResilientCache {
    backend: Arc<dyn KvBackend>,
    breaker: CircuitBreaker,
    codec: PayloadCodec,
    metrics: CacheMetrics,
    operation_timeout: Duration,
    default_ttl: Duration,
    max_attempts: u32,
    backoff: Backoff,
    closed: AtomicBool,
}

impl ResilientCache {
    /// Wrap an existing backend.
    pub fn new(backend: Arc<dyn KvBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            breaker: CircuitBreaker::new(config.breaker.clone()),
            codec: PayloadCodec::new(config.compression_threshold, config.compression_level),
            metrics: CacheMetrics::new(),
            operation_timeout: config.operation_timeout,
            default_ttl: config.default_ttl,
            max_attempts: config.retry.max_attempts.max(1),
            backoff: config.retry.backoff(),
            closed: AtomicBool::new(false),
        }
    }

    /// Build the backend named in the configuration.
    ///
    /// Building a Valkey backend does not contact the server; use
    /// [`health`](Self::health) to check reachability.
    pub fn connect(config: &CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;

        let backend: Arc<dyn KvBackend> = match &config.kv {
            KvConfig::Memory => Arc::new(MemoryKv::new()),
            #[cfg(feature = "valkey")]
            KvConfig::Valkey {
                url,
                namespace,
                pool_size,
            } => Arc::new(ValkeyKv::new(
                url,
                namespace.clone(),
                *pool_size,
                config.connect_timeout,
            )?),
        };

        Ok(Self::new(backend, config))
    }

    /// In-memory cache with default settings.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKv::new()), &CacheConfig::default())
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Serialise and store `value` under `key`.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.ensure_open()?;

        let payload =
            serde_json::to_vec(value).map_err(|e| CacheError::Serialisation(e.to_string()))?;
        let blob = self.codec.encode(&payload)?;

        let backend = &self.backend;
        let blob = blob.as_slice();
        let ttl = (!ttl.is_zero()).then_some(ttl);
        self.run(CacheOp::Set, self.max_attempts, move || {
            backend.put(key, blob, ttl)
        })
        .await?;

        debug!(key, size = blob.len(), "cache set");
        Ok(())
    }

    /// Fetch and deserialise the value under `key`.
    ///
    /// A missing key is [`CacheError::NotFound`].
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        self.ensure_open()?;

        let backend = &self.backend;
        let blob = self
            .run(CacheOp::Get, self.max_attempts, move || backend.get(key))
            .await?;

        let Some(blob) = blob else {
            self.metrics.record_miss();
            return Err(CacheError::NotFound(key.to_string()));
        };
        self.metrics.record_hit();

        let payload = self.codec.decode(&blob)?;
        serde_json::from_slice(&payload).map_err(|e| CacheError::Serialisation(e.to_string()))
    }

    /// Remove `key`. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.ensure_open()?;

        let backend = &self.backend;
        self.run(CacheOp::Delete, self.max_attempts, move || {
            backend.delete(key)
        })
        .await
    }

    /// Single round-trip to the backend, through the breaker.
    pub async fn health(&self) -> Result<(), CacheError> {
        self.ensure_open()?;

        let backend = &self.backend;
        self.run(CacheOp::Health, 1, move || backend.ping()).await
    }

    /// Release backend resources. Later calls fail with [`CacheError::Closed`].
    pub async fn close(&self) -> Result<(), CacheError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match tokio::time::timeout(self.operation_timeout, self.backend.close()).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::Timeout),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.is_closed() {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }

    async fn run<T, F, Fut>(&self, op: CacheOp, max_attempts: u32, mut f: F) -> Result<T, CacheError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, KvError>>,
    {
        let start = Instant::now();
        let mut attempt = 1;

        let result = loop {
            match self.attempt(op, &mut f).await {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff.delay(attempt);
                    debug!(
                        op = op.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying cache operation"
                    );
                    self.metrics.record_retry(op);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => break other,
            }
        };

        self.metrics.record(
            op,
            start.elapsed(),
            result.as_ref().err().map(CacheError::error_type),
        );
        result
    }

    async fn attempt<T, F, Fut>(&self, op: CacheOp, f: &mut F) -> Result<T, CacheError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, KvError>>,
    {
        let permit = match self.breaker.allow_request() {
            Ok(permit) => permit,
            Err(e) => {
                self.metrics.record_rejected(op);
                return Err(e);
            }
        };

        match tokio::time::timeout(self.operation_timeout, f()).await {
            Ok(Ok(value)) => {
                permit.success();
                Ok(value)
            }
            Ok(Err(e)) => {
                let err = CacheError::from(e);
                // A malformed value is a healthy backend answering.
                if err.is_retryable() {
                    permit.failure();
                } else {
                    permit.success();
                }
                Err(err)
            }
            Err(_) => {
                permit.failure();
                Err(CacheError::Timeout)
            }
        }
    }
}

impl std::fmt::Debug for ResilientCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientCache")
            .field("breaker", &self.breaker.state())
            .field("codec", &self.codec)
            .field("operation_timeout", &self.operation_timeout)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
