//! Service configuration.
//!
//! Loaded from `tendril.toml` and `TENDRIL_`-prefixed environment variables.
//! Nested keys use a double underscore, e.g. `TENDRIL_CACHE__OPERATION_TIMEOUT=250ms`.

use std::path::Path;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use tendril_cache::CacheConfig;
use tendril_core::{Backoff, GraceWindow, MissedOccurrencePolicy, ScheduleCalculator};
use tendril_notify::NotificationConfig;

use crate::error::ConfigError;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "tendril.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "TENDRIL_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TendrilConfig {
    pub cache: CacheConfig,
    pub advisor: AdvisorConfig,
    pub notifications: NotificationConfig,
    pub schedule: ScheduleConfig,
    pub sweeper: SweeperConfig,
    /// Prometheus exporter. Metrics stay in-process when absent.
    pub metrics: Option<MetricsConfig>,
}

impl TendrilConfig {
    /// Load from `tendril.toml` in the working directory plus the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(CONFIG_FILE)
    }

    /// Load from a specific file plus the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document, ignoring the environment.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the service misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.notifications
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.advisor.validate()?;
        self.schedule.validate()?;
        self.sweeper.validate()?;
        Ok(())
    }
}

/// Recommendation service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub enabled: bool,

    /// URL the task context is posted to.
    pub endpoint: Option<String>,

    /// Sent as a bearer token when set.
    pub api_key: Option<String>,

    /// Limit on a single HTTP request.
    #[serde(
        alias = "timeout",
        deserialize_with = "tendril_core::serde_duration::deserialize"
    )]
    pub attempt_timeout: Duration,

    /// Deadline for one consultation, covering every attempt and the
    /// delays between them.
    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub total_timeout: Duration,

    pub max_attempts: u32,

    /// Base delay between attempts; grows linearly.
    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub retry_delay: Duration,

    /// How long recommendations stay cached under their context fingerprint.
    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub cache_ttl: Duration,

    /// Recommendations below this confidence are ignored.
    pub min_confidence: f64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            api_key: None,
            attempt_timeout: Duration::from_secs(3),
            total_timeout: Duration::from_secs(8),
            max_attempts: 2,
            retry_delay: Duration::from_millis(200),
            cache_ttl: Duration::from_secs(3600),
            min_confidence: 0.5,
        }
    }
}

impl AdvisorConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::Linear(self.retry_delay)
    }

    /// Worst-case time for `max_attempts` timed-out attempts plus backoff.
    pub fn retry_budget(&self) -> Duration {
        let backoff = self.backoff();
        let waits = (1..self.max_attempts)
            .map(|attempt| backoff.delay(attempt))
            .fold(Duration::ZERO, Duration::saturating_add);
        self.attempt_timeout
            .saturating_mul(self.max_attempts)
            .saturating_add(waits)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.endpoint.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Invalid(
                "advisor.endpoint is required when the advisor is enabled".to_string(),
            ));
        }
        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "advisor.attempt_timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "advisor.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.enabled && self.total_timeout < self.retry_budget() {
            return Err(ConfigError::Invalid(format!(
                "advisor.total_timeout ({:?}) must cover {} attempts of {:?} plus backoff ({:?})",
                self.total_timeout,
                self.max_attempts,
                self.attempt_timeout,
                self.retry_budget()
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::Invalid(format!(
                "advisor.min_confidence must be in [0, 1], got {}",
                self.min_confidence
            )));
        }
        Ok(())
    }
}

/// Schedule arithmetic settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Completion this long before the slot still counts as on time.
    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub grace_before: Duration,

    /// Completion this long after the slot still counts as on time.
    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub grace_after: Duration,

    pub missed_policy: MissedOccurrencePolicy,

    /// TTL of cached task snapshots.
    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub snapshot_ttl: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            grace_before: Duration::from_secs(3 * 3600),
            grace_after: Duration::from_secs(3 * 3600),
            missed_policy: MissedOccurrencePolicy::default(),
            snapshot_ttl: Duration::from_secs(600),
        }
    }
}

const MAX_GRACE: Duration = Duration::from_secs(24 * 3600);

impl ScheduleConfig {
    /// Build the calculator these settings describe.
    pub fn calculator(&self) -> Result<ScheduleCalculator, ConfigError> {
        let before = ChronoDuration::from_std(self.grace_before)
            .map_err(|e| ConfigError::Invalid(format!("schedule.grace_before: {e}")))?;
        let after = ChronoDuration::from_std(self.grace_after)
            .map_err(|e| ConfigError::Invalid(format!("schedule.grace_after: {e}")))?;
        Ok(ScheduleCalculator::new(
            GraceWindow::new(before, after),
            self.missed_policy,
        ))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.grace_before > MAX_GRACE || self.grace_after > MAX_GRACE {
            return Err(ConfigError::Invalid(
                "schedule grace windows must not exceed one day".to_string(),
            ));
        }
        Ok(())
    }
}

/// Due-task sweeper settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,

    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub interval: Duration,

    /// Tasks due within this window are enqueued ahead of time.
    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub lookahead: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            lookahead: Duration::from_secs(300),
        }
    }
}

impl SweeperConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "sweeper.interval must be greater than zero".to_string(),
            ));
        }
        if self.enabled && self.lookahead < self.interval {
            return Err(ConfigError::Invalid(
                "sweeper.lookahead must be at least sweeper.interval".to_string(),
            ));
        }
        Ok(())
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::io::Write;

    use tendril_cache::KvConfig;
    use tendril_core::TaskType;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TendrilConfig::default();
        config.validate().unwrap();
        assert!(!config.advisor.enabled);
        assert!(config.sweeper.enabled);
        assert!(config.metrics.is_none());
        assert_eq!(config.schedule.grace_before, Duration::from_secs(3 * 3600));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = TendrilConfig::parse("").unwrap();
        assert_eq!(config.advisor.attempt_timeout, Duration::from_secs(3));
        assert_eq!(config.advisor.total_timeout, Duration::from_secs(8));
        assert!(matches!(config.cache.kv, KvConfig::Memory));
    }

    #[test]
    fn parses_every_section() {
        let config = TendrilConfig::parse(
            r#"
            [cache]
            operation_timeout = "250ms"

            [cache.kv]
            backend = "valkey"
            url = "redis://cache:6379"
            namespace = "garden"

            [cache.retry]
            max_attempts = 4

            [cache.breaker]
            failure_ratio = 0.5

            [advisor]
            enabled = true
            endpoint = "http://advisor.local/recommend"
            attempt_timeout = "2s"
            total_timeout = "5s"
            min_confidence = 0.7

            [notifications]
            workers = 4
            retry_delay = "10s"

            [notifications.rate_limits]
            water = 12

            [schedule]
            grace_after = "1h"
            missed_policy = "catch_up"

            [sweeper]
            interval = "30s"
            lookahead = "10m"

            [metrics]
            listen_addr = "127.0.0.1:9100"
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.operation_timeout, Duration::from_millis(250));
        assert!(matches!(
            &config.cache.kv,
            KvConfig::Valkey { url, namespace, .. }
                if url == "redis://cache:6379" && namespace.as_deref() == Some("garden")
        ));
        assert_eq!(config.cache.retry.max_attempts, 4);
        assert!((config.cache.breaker.failure_ratio - 0.5).abs() < f64::EPSILON);
        assert!(config.advisor.enabled);
        assert_eq!(config.advisor.attempt_timeout, Duration::from_secs(2));
        assert_eq!(config.advisor.total_timeout, Duration::from_secs(5));
        assert_eq!(config.notifications.workers, Some(4));
        assert_eq!(config.notifications.retry_delay, Duration::from_secs(10));
        assert_eq!(config.notifications.rate_limits.per_hour(TaskType::Water), 12);
        assert_eq!(config.schedule.grace_after, Duration::from_secs(3600));
        assert_eq!(config.schedule.missed_policy, MissedOccurrencePolicy::CatchUp);
        assert_eq!(config.sweeper.lookahead, Duration::from_secs(600));
        assert_eq!(config.metrics.unwrap().listen_addr, "127.0.0.1:9100");
    }

    #[test]
    fn enabled_advisor_requires_endpoint() {
        let err = TendrilConfig::parse("[advisor]\nenabled = true\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("endpoint")));
    }

    #[test]
    fn default_advisor_deadline_leaves_room_for_every_attempt() {
        let advisor = AdvisorConfig::default();
        assert_eq!(advisor.retry_budget(), Duration::from_millis(6200));
        assert!(advisor.total_timeout >= advisor.retry_budget());
    }

    #[test]
    fn rejects_total_timeout_shorter_than_retries() {
        let err = TendrilConfig::parse(
            "[advisor]\nenabled = true\nendpoint = \"http://advisor.local\"\n\
             attempt_timeout = \"3s\"\ntotal_timeout = \"3s\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("total_timeout")));
    }

    #[test]
    fn legacy_timeout_key_sets_attempt_timeout() {
        let config = TendrilConfig::parse("[advisor]\ntimeout = \"1s\"\n").unwrap();
        assert_eq!(config.advisor.attempt_timeout, Duration::from_secs(1));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let err = TendrilConfig::parse("[advisor]\nmin_confidence = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_grace_longer_than_a_day() {
        let err = TendrilConfig::parse("[schedule]\ngrace_before = \"25h\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("grace")));
    }

    #[test]
    fn rejects_zero_workers() {
        let err = TendrilConfig::parse("[notifications]\nworkers = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_lookahead_shorter_than_interval() {
        let err = TendrilConfig::parse("[sweeper]\ninterval = \"10m\"\nlookahead = \"1m\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("lookahead")));
    }

    #[test]
    fn rejects_bad_duration_strings() {
        let err = TendrilConfig::parse("[sweeper]\ninterval = \"soon\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sweeper]\ninterval = \"5s\"").unwrap();

        let config = TendrilConfig::load_from(file.path()).unwrap();
        assert_eq!(config.sweeper.interval, Duration::from_secs(5));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TendrilConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.sweeper.interval, Duration::from_secs(60));
    }

    #[test]
    fn calculator_uses_configured_grace() {
        let schedule = ScheduleConfig {
            grace_before: Duration::from_secs(1800),
            ..ScheduleConfig::default()
        };
        let calculator = schedule.calculator().unwrap();
        assert_eq!(calculator.grace().before, ChronoDuration::minutes(30));
        assert_eq!(calculator.policy(), MissedOccurrencePolicy::SkipToNext);
    }
}
