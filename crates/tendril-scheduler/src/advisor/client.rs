use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tendril_cache::ResilientCache;
use tendril_core::{Backoff, ScheduleResult};
use tracing::{debug, warn};

use super::{AdvisorBackend, HttpAdvisor, Recommendation, TaskContext};
use crate::config::AdvisorConfig;
use crate::error::{AdvisorError, ConfigError};

/// Cached, retrying, deadline-bounded access to an [`AdvisorBackend`].
///
/// Every failure surfaces as [`tendril_core::ScheduleError::Dependency`] so callers can
/// fall back to the rule-based schedule.
#[derive(Clone)]
pub struct RecommendationClient {
    backend: Option<Arc<dyn AdvisorBackend>>,
    cache: Option<Arc<ResilientCache>>,
    max_attempts: u32,
    backoff: Backoff,
    cache_ttl: Duration,
    min_confidence: f64,
}

impl std::fmt::Debug for RecommendationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecommendationClient")
            .field("enabled", &self.is_enabled())
            .field("cached", &self.cache.is_some())
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl RecommendationClient {
    /// Client over an explicit backend.
    pub fn new(backend: Arc<dyn AdvisorBackend>, config: &AdvisorConfig) -> Self {
        Self {
            backend: Some(backend),
            cache: None,
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff(),
            cache_ttl: config.cache_ttl,
            min_confidence: config.min_confidence,
        }
    }

    /// Client that never calls out and always reports the advisor as disabled.
    pub fn disabled() -> Self {
        let config = AdvisorConfig::default();
        Self {
            backend: None,
            cache: None,
            max_attempts: 1,
            backoff: Backoff::None,
            cache_ttl: config.cache_ttl,
            min_confidence: config.min_confidence,
        }
    }

    /// Build an HTTP-backed client, or a disabled one if the config says so.
    pub fn from_config(config: &AdvisorConfig) -> Result<Self, ConfigError> {
        if !config.enabled {
            return Ok(Self::disabled());
        }
        let endpoint = config.endpoint.clone().ok_or_else(|| {
            ConfigError::Invalid("advisor.endpoint is required when the advisor is enabled".into())
        })?;
        let backend = HttpAdvisor::new(endpoint, config.api_key.clone(), config.attempt_timeout)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(Self::new(Arc::new(backend), config))
    }

    /// Cache recommendations under their context fingerprint.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ResilientCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    /// Ask for a recommendation, giving up after `timeout` in total.
    pub async fn recommend(
        &self,
        context: &TaskContext,
        timeout: Duration,
    ) -> ScheduleResult<Recommendation> {
        let Some(backend) = &self.backend else {
            return Err(AdvisorError::Disabled.into());
        };

        let key = context.cache_key();
        if let Some(rec) = self.cached(&key).await {
            counter!("tendril.advisor.requests", "outcome" => "cache_hit").increment(1);
            return Ok(rec);
        }

        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, self.call_with_retry(backend, context)).await {
            Ok(result) => result,
            Err(_) => Err(AdvisorError::Timeout),
        };
        histogram!("tendril.advisor.duration").record(start.elapsed().as_secs_f64());

        match result {
            Ok(rec) => {
                counter!("tendril.advisor.requests", "outcome" => "success").increment(1);
                self.store(&key, &rec).await;
                Ok(rec)
            }
            Err(e) => {
                counter!("tendril.advisor.requests", "outcome" => e.error_type()).increment(1);
                Err(e.into())
            }
        }
    }

    /// Drop any cached recommendation for `context`.
    pub async fn invalidate(&self, context: &TaskContext) {
        let Some(cache) = &self.cache else {
            return;
        };
        let key = context.cache_key();
        if let Err(e) = cache.delete(&key).await {
            warn!(key = %key, error = %e, "failed to invalidate cached recommendation");
        }
    }

    async fn call_with_retry(
        &self,
        backend: &Arc<dyn AdvisorBackend>,
        context: &TaskContext,
    ) -> Result<Recommendation, AdvisorError> {
        let mut attempt = 1;
        loop {
            match backend.recommend(context).await {
                Ok(rec) => return Ok(rec),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    debug!(attempt, error = %e, "advisor request failed, retrying");
                    tokio::time::sleep(self.backoff.delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn cached(&self, key: &str) -> Option<Recommendation> {
        let cache = self.cache.as_ref()?;
        match cache.get::<Recommendation>(key).await {
            Ok(rec) => match rec.validate() {
                Ok(()) => Some(rec),
                Err(e) => {
                    warn!(key = %key, error = %e, "ignoring invalid cached recommendation");
                    None
                }
            },
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                debug!(key = %key, error = %e, "recommendation cache read failed");
                None
            }
        }
    }

    async fn store(&self, key: &str, rec: &Recommendation) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = cache.set(key, rec, self.cache_ttl).await {
            warn!(key = %key, error = %e, "failed to cache recommendation");
        }
    }
}
