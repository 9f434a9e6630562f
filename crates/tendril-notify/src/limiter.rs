//! Per-task-type rate limiting.
//!
//! Each task type gets a GCRA limiter (via `governor`) whose emission interval
//! is one hour divided by the hourly budget, with a burst of one. Cells are
//! therefore at least `3600s / limit` apart, which caps dispatches in any
//! rolling hour at the budget.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock as GovernorClock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tendril_core::TaskType;

use crate::config::RateLimitConfig;
use crate::error::NotifyError;

const HOUR: Duration = Duration::from_secs(3600);

/// Admission control consulted by workers before each delivery attempt.
pub trait RateLimitPolicy: Send + Sync {
    /// Take a token for `task_type`, or return how long until one is free.
    fn try_acquire(&self, task_type: TaskType) -> Result<(), Duration>;
}

type DirectLimiter<C> =
    RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as GovernorClock>::Instant>>;

/// Hourly budget per task type.
pub struct TaskTypeLimiter<C: GovernorClock = DefaultClock> {
    clock: C,
    limiters: HashMap<TaskType, DirectLimiter<C>>,
}

impl TaskTypeLimiter<DefaultClock> {
    pub fn new(config: &RateLimitConfig) -> Result<Self, NotifyError> {
        Self::with_clock(config, DefaultClock::default())
    }
}

impl<C: GovernorClock> TaskTypeLimiter<C> {
    pub fn with_clock(config: &RateLimitConfig, clock: C) -> Result<Self, NotifyError> {
        let mut limiters = HashMap::new();
        for task_type in TaskType::ALL {
            let quota = hourly_quota(config.per_hour(task_type)).ok_or_else(|| {
                NotifyError::Configuration(format!("rate_limits.{task_type} must be at least 1"))
            })?;
            limiters.insert(task_type, RateLimiter::direct_with_clock(quota, &clock));
        }
        Ok(Self { clock, limiters })
    }
}

fn hourly_quota(per_hour: u32) -> Option<Quota> {
    let per_hour = NonZeroU32::new(per_hour)?;
    // Round up so `limit` periods never fit inside an hour.
    let nanos = HOUR.as_nanos().div_ceil(u128::from(per_hour.get()));
    let period = Duration::from_nanos(u64::try_from(nanos).ok()?);
    Quota::with_period(period).map(|q| q.allow_burst(NonZeroU32::MIN))
}

impl<C> RateLimitPolicy for TaskTypeLimiter<C>
where
    C: GovernorClock + Send + Sync,
    C::Instant: Send + Sync,
{
    fn try_acquire(&self, task_type: TaskType) -> Result<(), Duration> {
        let Some(limiter) = self.limiters.get(&task_type) else {
            return Ok(());
        };
        limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

/// Policy that admits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

impl RateLimitPolicy for Unlimited {
    fn try_acquire(&self, _task_type: TaskType) -> Result<(), Duration> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use governor::clock::FakeRelativeClock;
    use proptest::prelude::*;

    use super::*;

    fn limits(water: u32) -> RateLimitConfig {
        RateLimitConfig {
            water,
            ..RateLimitConfig::default()
        }
    }

    #[test]
    fn first_dispatch_is_admitted_then_spaced() {
        let clock = FakeRelativeClock::default();
        let limiter = TaskTypeLimiter::with_clock(&limits(100), clock.clone()).unwrap();

        assert!(limiter.try_acquire(TaskType::Water).is_ok());
        let wait = limiter.try_acquire(TaskType::Water).unwrap_err();
        assert_eq!(wait, Duration::from_secs(36));

        clock.advance(Duration::from_secs(36));
        assert!(limiter.try_acquire(TaskType::Water).is_ok());
    }

    #[test]
    fn task_types_have_independent_budgets() {
        let clock = FakeRelativeClock::default();
        let limiter = TaskTypeLimiter::with_clock(&limits(1), clock).unwrap();

        assert!(limiter.try_acquire(TaskType::Water).is_ok());
        assert!(limiter.try_acquire(TaskType::Water).is_err());
        assert!(limiter.try_acquire(TaskType::Fertilizer).is_ok());
        assert!(limiter.try_acquire(TaskType::Composting).is_ok());
    }

    #[test]
    fn sustained_load_admits_budget_per_hour() {
        let clock = FakeRelativeClock::default();
        let limiter = TaskTypeLimiter::with_clock(&limits(100), clock.clone()).unwrap();

        // One attempt per second for three hours.
        let mut admitted = 0;
        for _ in 0..3 * 3600 {
            if limiter.try_acquire(TaskType::Water).is_ok() {
                admitted += 1;
            }
            clock.advance(Duration::from_secs(1));
        }
        assert_eq!(admitted, 300);
    }

    #[test]
    fn zero_budget_is_rejected() {
        let result = TaskTypeLimiter::with_clock(&limits(0), FakeRelativeClock::default());
        assert!(matches!(result, Err(NotifyError::Configuration(_))));
    }

    proptest! {
        #[test]
        fn never_exceeds_budget_in_any_rolling_hour(
            limit in 1u32..200,
            steps in proptest::collection::vec(0u64..120_000, 1..600),
        ) {
            let clock = FakeRelativeClock::default();
            let limiter = TaskTypeLimiter::with_clock(&limits(limit), clock.clone()).unwrap();

            let mut now_ms = 0u64;
            let mut admitted = Vec::new();
            for step in steps {
                clock.advance(Duration::from_millis(step));
                now_ms += step;
                // Several attempts at the same instant model a burst.
                for _ in 0..3 {
                    if limiter.try_acquire(TaskType::Water).is_ok() {
                        admitted.push(now_ms);
                    }
                }
            }

            let hour_ms = 3_600_000;
            for (i, start) in admitted.iter().enumerate() {
                let in_window = admitted[i..]
                    .iter()
                    .take_while(|t| **t < start + hour_ms)
                    .count();
                prop_assert!(in_window as u32 <= limit);
            }
        }
    }
}
