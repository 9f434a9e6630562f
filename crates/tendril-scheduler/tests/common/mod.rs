//! Common test utilities for scheduler integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tendril_cache::ResilientCache;
use tendril_core::{
    Clock, Frequency, ManualClock, ScheduleCalculator, ScheduleRequest, TaskType, Unit,
};
use tendril_notify::{MemorySink, NotificationConfig, NotificationManager};
use tendril_scheduler::{
    AdvisorBackend, AdvisorConfig, AdvisorError, MemoryTaskStore, Recommendation,
    RecommendationClient, SchedulerService, TaskContext, TaskStore,
};

/// 2025-06-01 10:00 UTC, the fixed "now" every scenario starts from.
pub fn start_time() -> DateTime<Utc> {
    utc(2025, 6, 1, 10, 0)
}

pub fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .unwrap()
}

/// Daily watering, 500 ml at 09:00.
pub fn water_request() -> ScheduleRequest {
    ScheduleRequest {
        crop_id: "tomato-1".to_string(),
        task_type: TaskType::Water,
        frequency: Frequency::Daily,
        amount: 500.0,
        unit: Unit::Millilitres,
        preferred_time: "09:00".to_string(),
        channel: None,
    }
}

pub const ADVISOR_TIMEOUT: Duration = Duration::from_secs(3);

/// Scheduler service wired to in-memory collaborators and a manual clock.
pub struct TestScheduler {
    pub service: SchedulerService,
    pub store: Arc<MemoryTaskStore>,
    pub notifications: Arc<NotificationManager>,
    pub sink: Arc<MemorySink>,
    pub cache: Arc<ResilientCache>,
    pub clock: Arc<ManualClock>,
}

impl TestScheduler {
    /// Advisor disabled.
    pub fn new() -> Self {
        Self::with_advisor(RecommendationClient::disabled())
    }

    pub fn with_advisor(advisor: RecommendationClient) -> Self {
        let store = Arc::new(MemoryTaskStore::new());
        Self::build(store.clone(), store, advisor)
    }

    /// Service reads and writes through `store_view`; `store` is the
    /// underlying memory store the test inspects.
    pub fn build(
        store: Arc<MemoryTaskStore>,
        store_view: Arc<dyn TaskStore>,
        advisor: RecommendationClient,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let sink = Arc::new(MemorySink::new());
        let cache = Arc::new(ResilientCache::in_memory());

        let config = NotificationConfig {
            workers: Some(1),
            ..NotificationConfig::default()
        };
        let notifications = Arc::new(
            NotificationManager::start(config, sink.clone(), clock.clone() as Arc<dyn Clock>)
                .unwrap(),
        );

        let service = SchedulerService::builder(store_view, notifications.clone())
            .advisor(advisor.with_cache(cache.clone()))
            .cache(cache.clone())
            .calculator(ScheduleCalculator::default())
            .clock(clock.clone())
            .advisor_timeout(ADVISOR_TIMEOUT)
            .build();

        Self {
            service,
            store,
            notifications,
            sink,
            cache,
            clock,
        }
    }
}

pub fn advisor_config() -> AdvisorConfig {
    AdvisorConfig {
        enabled: true,
        endpoint: Some("http://advisor.test".to_string()),
        max_attempts: 1,
        ..AdvisorConfig::default()
    }
}

/// Advisor that always gives the same answer and counts calls.
pub struct StaticAdvisor {
    pub recommendation: Recommendation,
    calls: AtomicU32,
}

impl StaticAdvisor {
    pub fn new(amount: Option<f64>, timing: Option<&str>, confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            recommendation: Recommendation {
                amount,
                timing: timing.map(str::to_owned),
                confidence,
            },
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdvisorBackend for StaticAdvisor {
    async fn recommend(&self, _context: &TaskContext) -> Result<Recommendation, AdvisorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.recommendation.clone())
    }
}

/// Advisor that never answers.
pub struct HangingAdvisor;

#[async_trait]
impl AdvisorBackend for HangingAdvisor {
    async fn recommend(&self, _context: &TaskContext) -> Result<Recommendation, AdvisorError> {
        std::future::pending().await
    }
}
