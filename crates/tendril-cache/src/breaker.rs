//! Circuit breaker guarding the cache backend.
//!
//! The circuit breaker stops calls to a failing backend so callers fall back
//! to the source of truth immediately. It has three states:
//!
//! - **Closed**: Normal operation. Outcomes are counted over a rolling window
//!   made of [`WINDOW_BUCKETS`] time buckets; once the window holds at least
//!   `min_requests` calls with a failure ratio of at least `failure_ratio`,
//!   the breaker opens. Buckets expire one at a time, so the window slides in
//!   steps of `window / WINDOW_BUCKETS`.
//! - **Open**: Every call is rejected without touching the backend until
//!   `cooldown` has elapsed.
//! - **HalfOpen**: Exactly one probe call is let through. Success closes the
//!   breaker, failure opens it again.
//!
//! All state lives behind a single mutex, so concurrent callers observe
//! transitions in one order.

use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::time::Instant;

use crate::error::CacheError;

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Minimum calls in the window before the failure ratio is considered.
    pub min_requests: u32,

    /// Failure ratio (0, 1] at which the breaker opens.
    pub failure_ratio: f64,

    /// Length of the rolling window over which outcomes are counted.
    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub window: Duration,

    /// Time spent open before a probe is allowed.
    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            min_requests: 3,
            failure_ratio: 0.6,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests pass through.
    Closed,
    /// Backend is failing - requests are rejected.
    Open,
    /// Testing recovery - a single probe passes through.
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Number of buckets the rolling window is split into.
pub const WINDOW_BUCKETS: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    slot: u64,
    requests: u32,
    failures: u32,
}

/// Call outcomes over the last `window`, in fixed-width time buckets.
#[derive(Debug)]
struct RollingWindow {
    origin: Instant,
    bucket_len: Duration,
    buckets: [Bucket; WINDOW_BUCKETS],
}

impl RollingWindow {
    fn new(origin: Instant, window: Duration) -> Self {
        let bucket_len = (window / WINDOW_BUCKETS as u32).max(Duration::from_millis(1));
        Self {
            origin,
            bucket_len,
            buckets: [Bucket::default(); WINDOW_BUCKETS],
        }
    }

    fn slot(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin).as_nanos();
        u64::try_from(elapsed / self.bucket_len.as_nanos()).unwrap_or(u64::MAX)
    }

    fn record(&mut self, now: Instant, failed: bool) {
        let slot = self.slot(now);
        let bucket = &mut self.buckets[(slot % WINDOW_BUCKETS as u64) as usize];
        if bucket.slot != slot {
            *bucket = Bucket {
                slot,
                ..Bucket::default()
            };
        }
        bucket.requests += 1;
        if failed {
            bucket.failures += 1;
        }
    }

    /// `(requests, failures)` in buckets still inside the window.
    fn totals(&self, now: Instant) -> (u32, u32) {
        let current = self.slot(now);
        self.buckets
            .iter()
            .filter(|b| b.slot <= current && current - b.slot < WINDOW_BUCKETS as u64)
            .fold((0, 0), |(requests, failures), b| {
                (requests + b.requests, failures + b.failures)
            })
    }
}

#[derive(Debug)]
enum Inner {
    Closed {
        window: RollingWindow,
    },
    Open {
        until: Instant,
    },
    HalfOpen {
        probe_in_flight: bool,
    },
}

impl Inner {
    fn closed(now: Instant, config: &BreakerConfig) -> Self {
        Self::Closed {
            window: RollingWindow::new(now, config.window),
        }
    }

    const fn state(&self) -> CircuitState {
        match self {
            Self::Closed { .. } => CircuitState::Closed,
            Self::Open { .. } => CircuitState::Open,
            Self::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

/// Circuit breaker for a single backend.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(config: BreakerConfig) -> Self {
        let inner = Inner::closed(Instant::now(), &config);
        Self {
            config,
            inner: Mutex::new(inner),
        }
    }

    /// Check whether a call may proceed.
    ///
    /// The returned permit must be resolved with [`BreakerPermit::success`] or
    /// [`BreakerPermit::failure`]. Dropping it unresolved (for example when
    /// the caller is cancelled) records nothing but frees the half-open probe
    /// slot.
    pub fn allow_request(&self) -> Result<BreakerPermit<'_>, CacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match &mut *inner {
            Inner::Closed { .. } => Ok(BreakerPermit::new(self, false)),
            Inner::Open { until } => {
                if now >= *until {
                    *inner = Inner::HalfOpen {
                        probe_in_flight: true,
                    };
                    tracing::info!("circuit breaker transitioning to half-open");
                    Ok(BreakerPermit::new(self, true))
                } else {
                    Err(CacheError::CircuitOpen)
                }
            }
            Inner::HalfOpen { probe_in_flight } => {
                if *probe_in_flight {
                    Err(CacheError::CircuitOpen)
                } else {
                    *probe_in_flight = true;
                    Ok(BreakerPermit::new(self, true))
                }
            }
        }
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state()
    }

    /// Failures counted in the rolling window while closed.
    pub fn failure_count(&self) -> u32 {
        match &*self.inner.lock() {
            Inner::Closed { window } => window.totals(Instant::now()).1,
            _ => 0,
        }
    }

    fn on_success(&self, probe: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match &mut *inner {
            Inner::Closed { window } => window.record(now, false),
            Inner::HalfOpen { .. } if probe => {
                *inner = Inner::closed(now, &self.config);
                tracing::info!("circuit breaker closed after successful probe");
            }
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match &mut *inner {
            Inner::Closed { window } => {
                window.record(now, true);
                let (requests, failures) = window.totals(now);

                let ratio = f64::from(failures) / f64::from(requests);
                if requests >= self.config.min_requests && ratio >= self.config.failure_ratio {
                    tracing::warn!(
                        requests,
                        failures,
                        "circuit breaker opened due to failures"
                    );
                    *inner = Inner::Open {
                        until: now + self.config.cooldown,
                    };
                }
            }
            Inner::HalfOpen { .. } if probe => {
                *inner = Inner::Open {
                    until: now + self.config.cooldown,
                };
                tracing::warn!("circuit breaker reopened after failed probe");
            }
            _ => {}
        }
    }

    fn on_abandoned(&self, probe: bool) {
        if !probe {
            return;
        }
        let mut inner = self.inner.lock();
        if let Inner::HalfOpen { probe_in_flight } = &mut *inner {
            *probe_in_flight = false;
        }
    }
}

/// Permission for one call through the breaker.
#[must_use = "resolve the permit with success() or failure()"]
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            resolved: false,
        }
    }

    /// Whether this permit is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.on_abandoned(self.probe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            min_requests: 3,
            failure_ratio: 0.6,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(1),
        }
    }

    fn fail(cb: &CircuitBreaker) {
        cb.allow_request().expect("request allowed").failure();
    }

    fn succeed(cb: &CircuitBreaker) {
        cb.allow_request().expect("request allowed").success();
    }

    #[tokio::test(start_paused = true)]
    async fn starts_closed() {
        let cb = CircuitBreaker::new(test_config());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_three_failures() {
        let cb = CircuitBreaker::new(test_config());

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(matches!(cb.allow_request(), Err(CacheError::CircuitOpen)));
    }

    #[tokio::test(start_paused = true)]
    async fn ratio_below_threshold_stays_closed() {
        let cb = CircuitBreaker::new(test_config());

        // 2 failures out of 4 = 0.5
        succeed(&cb);
        succeed(&cb);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);

        // 3 out of 5 = 0.6
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_forgets_old_failures() {
        let cb = CircuitBreaker::new(test_config());

        fail(&cb);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(61)).await;
        fail(&cb);

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_straddling_a_minute_boundary_still_open() {
        let cb = CircuitBreaker::new(test_config());

        tokio::time::advance(Duration::from_secs(59)).await;
        fail(&cb);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cb.failure_count(), 2);
        fail(&cb);

        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn old_buckets_slide_out_one_at_a_time() {
        let cb = CircuitBreaker::new(test_config());

        fail(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;
        fail(&cb);
        assert_eq!(cb.failure_count(), 2);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cb.failure_count(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn single_probe_after_cooldown_then_closes() {
        let cb = CircuitBreaker::new(test_config());
        for _ in 0..3 {
            fail(&cb);
        }

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(cb.allow_request().is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        let probe = cb.allow_request().expect("probe allowed");
        assert!(probe.is_probe());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Only one probe at a time.
        assert!(matches!(cb.allow_request(), Err(CacheError::CircuitOpen)));

        probe.success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens() {
        let cb = CircuitBreaker::new(test_config());
        for _ in 0..3 {
            fail(&cb);
        }
        tokio::time::advance(Duration::from_secs(1)).await;

        cb.allow_request().expect("probe").failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.allow_request().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.allow_request().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_probe_frees_the_slot() {
        let cb = CircuitBreaker::new(test_config());
        for _ in 0..3 {
            fail(&cb);
        }
        tokio::time::advance(Duration::from_secs(1)).await;

        drop(cb.allow_request().expect("probe"));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow_request().expect("second probe").is_probe());
    }
}
