//! Schedule orchestration.
//!
//! [`SchedulerService`] ties the calculator, the task store, the advisor,
//! the cache and the notification manager together. Only the store is
//! load-bearing: advisor, cache and notification failures are logged at
//! `warn` and the operation carries on without them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tendril_cache::ResilientCache;
use tendril_core::{
    Clock, Dependency, MaintenanceTask, PreferredTime, ScheduleCalculator, ScheduleError,
    ScheduleRequest, ScheduleResult, SystemClock, TaskId,
};
use tendril_notify::{NotificationJob, NotificationManager};
use tracing::{debug, info, warn};

use crate::advisor::{RecommendationClient, TaskContext};
use crate::config::AdvisorConfig;
use crate::locks::TaskLocks;
use crate::store::TaskStore;

/// Cache key of a task snapshot.
pub fn snapshot_key(id: &TaskId) -> String {
    format!("task:{id}")
}

/// Amount and time after consulting the advisor.
#[derive(Debug, Clone, Copy)]
struct Advice {
    amount: f64,
    preferred_time: PreferredTime,
    ai_recommended: bool,
}

/// Maintenance schedule service.
pub struct SchedulerService {
    store: Arc<dyn TaskStore>,
    notifications: Arc<NotificationManager>,
    advisor: RecommendationClient,
    cache: Option<Arc<ResilientCache>>,
    calculator: ScheduleCalculator,
    clock: Arc<dyn Clock>,
    locks: TaskLocks,
    advisor_timeout: Duration,
    snapshot_ttl: Duration,
}

impl std::fmt::Debug for SchedulerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerService")
            .field("advisor", &self.advisor)
            .field("cached", &self.cache.is_some())
            .field("calculator", &self.calculator)
            .finish_non_exhaustive()
    }
}

impl SchedulerService {
    pub fn builder(
        store: Arc<dyn TaskStore>,
        notifications: Arc<NotificationManager>,
    ) -> SchedulerServiceBuilder {
        SchedulerServiceBuilder {
            store,
            notifications,
            advisor: RecommendationClient::disabled(),
            cache: None,
            calculator: ScheduleCalculator::default(),
            clock: Arc::new(SystemClock),
            advisor_timeout: AdvisorConfig::default().total_timeout,
            snapshot_ttl: Duration::from_secs(600),
        }
    }

    /// Create a task and schedule its first reminder.
    pub async fn create_schedule(&self, request: ScheduleRequest) -> ScheduleResult<MaintenanceTask> {
        let start = Instant::now();
        let result = self.create_inner(request).await;
        record("create", &result, start);
        result
    }

    /// Replace a task's parameters and recompute its schedule from now.
    pub async fn update_schedule(
        &self,
        id: &TaskId,
        request: ScheduleRequest,
    ) -> ScheduleResult<MaintenanceTask> {
        let start = Instant::now();
        let result = self.update_inner(id, request).await;
        record("update", &result, start);
        result
    }

    /// Record a completion, advance the schedule and update the streak.
    pub async fn complete_task(&self, id: &TaskId) -> ScheduleResult<MaintenanceTask> {
        let start = Instant::now();
        let result = self.complete_inner(id).await;
        record("complete", &result, start);
        result
    }

    /// Read a task, preferring the cached snapshot.
    pub async fn get_schedule(&self, id: &TaskId) -> ScheduleResult<MaintenanceTask> {
        let start = Instant::now();
        let result = self.get_inner(id).await;
        record("get", &result, start);
        result
    }

    async fn create_inner(&self, request: ScheduleRequest) -> ScheduleResult<MaintenanceTask> {
        let preferred = request.validate()?;
        let advice = self
            .advise(&TaskContext::from_request(&request), request.amount, preferred)
            .await;

        let now = self.clock.now();
        let next = ScheduleCalculator::compute_next_run(request.frequency, advice.preferred_time, now)?;

        let task = MaintenanceTask {
            id: TaskId::generate(),
            crop_id: request.crop_id,
            task_type: request.task_type,
            frequency: request.frequency,
            amount: advice.amount,
            unit: request.unit,
            preferred_time: advice.preferred_time,
            ai_recommended: advice.ai_recommended,
            active: true,
            next_scheduled_time: next,
            last_completed_time: None,
            completion_streak: 0,
            channel: request.channel.unwrap_or_default(),
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let saved = self.store.save(&task).await?;
        info!(
            task_id = %saved.id,
            crop_id = %saved.crop_id,
            task_type = %saved.task_type,
            frequency = %saved.frequency,
            next_run = %saved.next_scheduled_time,
            ai_recommended = saved.ai_recommended,
            "schedule created"
        );

        self.write_snapshot(&saved).await;
        self.reschedule_reminder(&saved).await;
        Ok(saved)
    }

    async fn update_inner(
        &self,
        id: &TaskId,
        request: ScheduleRequest,
    ) -> ScheduleResult<MaintenanceTask> {
        let _guard = self.locks.lock(id).await;

        let existing = self.load(id).await?;
        let preferred = request.validate()?;

        self.advisor
            .invalidate(&TaskContext::from_task(&existing))
            .await;
        let advice = self
            .advise(&TaskContext::from_request(&request), request.amount, preferred)
            .await;

        let now = self.clock.now();
        let next = ScheduleCalculator::compute_next_run(request.frequency, advice.preferred_time, now)?;

        let task = MaintenanceTask {
            crop_id: request.crop_id,
            task_type: request.task_type,
            frequency: request.frequency,
            amount: advice.amount,
            unit: request.unit,
            preferred_time: advice.preferred_time,
            ai_recommended: advice.ai_recommended,
            next_scheduled_time: next,
            channel: request.channel.unwrap_or(existing.channel),
            updated_at: now,
            ..existing
        };

        let saved = self.store.save(&task).await?;
        info!(
            task_id = %saved.id,
            task_type = %saved.task_type,
            frequency = %saved.frequency,
            next_run = %saved.next_scheduled_time,
            ai_recommended = saved.ai_recommended,
            active = saved.active,
            "schedule updated"
        );

        self.write_snapshot(&saved).await;
        self.reschedule_reminder(&saved).await;
        Ok(saved)
    }

    async fn complete_inner(&self, id: &TaskId) -> ScheduleResult<MaintenanceTask> {
        let _guard = self.locks.lock(id).await;

        let existing = self.load(id).await?;
        if !existing.active {
            return Err(ScheduleError::validation(format!("task {id} is inactive")));
        }

        let completed_at = self.clock.now();
        let plan = self.calculator.plan_completion(&existing, completed_at)?;

        let task = MaintenanceTask {
            next_scheduled_time: plan.next_run,
            last_completed_time: Some(completed_at),
            completion_streak: plan.outcome.streak,
            updated_at: completed_at,
            ..existing
        };

        let saved = self.store.save(&task).await?;
        info!(
            task_id = %saved.id,
            task_type = %saved.task_type,
            on_time = plan.outcome.on_time,
            missed = plan.outcome.missed_occurrences,
            streak = saved.completion_streak,
            next_run = %saved.next_scheduled_time,
            "task completed"
        );

        self.write_snapshot(&saved).await;
        self.reschedule_reminder(&saved).await;
        Ok(saved)
    }

    async fn get_inner(&self, id: &TaskId) -> ScheduleResult<MaintenanceTask> {
        let key = snapshot_key(id);

        if let Some(cache) = &self.cache {
            match cache.get::<MaintenanceTask>(&key).await {
                Ok(task) => {
                    debug!(task_id = %id, "task snapshot cache hit");
                    return Ok(task);
                }
                Err(e) if e.is_not_found() => {
                    debug!(task_id = %id, "task snapshot cache miss");
                }
                Err(e) => {
                    let err = ScheduleError::dependency(Dependency::Cache, e.to_string());
                    warn!(task_id = %id, error = %err, "reading task from store");
                }
            }
        }

        // Back-fill under the task lock so a slow read cannot overwrite the
        // snapshot of a write that committed after it.
        let _guard = self.locks.lock(id).await;
        let task = self.load(id).await?;
        self.write_snapshot(&task).await;
        Ok(task)
    }

    async fn load(&self, id: &TaskId) -> ScheduleResult<MaintenanceTask> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound(id.clone()))
    }

    async fn advise(&self, context: &TaskContext, amount: f64, preferred: PreferredTime) -> Advice {
        let fallback = Advice {
            amount,
            preferred_time: preferred,
            ai_recommended: false,
        };

        if !self.advisor.is_enabled() {
            return fallback;
        }

        let rec = match self.advisor.recommend(context, self.advisor_timeout).await {
            Ok(rec) => rec,
            Err(e) => {
                warn!(
                    crop_id = %context.crop_id,
                    task_type = %context.task_type,
                    error = %e,
                    "advisor unavailable, using rule-based schedule"
                );
                return fallback;
            }
        };

        if rec.confidence < self.advisor.min_confidence() {
            debug!(
                confidence = rec.confidence,
                min_confidence = self.advisor.min_confidence(),
                "ignoring low-confidence recommendation"
            );
            return fallback;
        }

        let timing = rec.preferred_time();
        if rec.amount.is_none() && timing.is_none() {
            return fallback;
        }

        Advice {
            amount: rec.amount.unwrap_or(amount),
            preferred_time: timing.unwrap_or(preferred),
            ai_recommended: true,
        }
    }

    /// Replace any queued reminder with one for the task's next run.
    async fn reschedule_reminder(&self, task: &MaintenanceTask) {
        let cancelled = self.notifications.cancel_task(&task.id);
        if cancelled > 0 {
            debug!(task_id = %task.id, cancelled, "cancelled stale reminders");
        }

        if !task.active {
            debug!(task_id = %task.id, "task inactive, no reminder scheduled");
            return;
        }

        if let Err(e) = self
            .notifications
            .enqueue(NotificationJob::for_task(task))
            .await
        {
            let err = ScheduleError::dependency(Dependency::Notifications, e.to_string());
            warn!(
                task_id = %task.id,
                error = %err,
                "failed to enqueue reminder, leaving it to the sweeper"
            );
        }
    }

    /// Write-through of the saved task. A failed write drops the stale entry.
    async fn write_snapshot(&self, task: &MaintenanceTask) {
        let Some(cache) = &self.cache else {
            return;
        };
        let key = snapshot_key(&task.id);
        let Err(e) = cache.set(&key, task, self.snapshot_ttl).await else {
            return;
        };

        let err = ScheduleError::dependency(Dependency::Cache, e.to_string());
        warn!(task_id = %task.id, error = %err, "failed to cache task snapshot");
        if let Err(e) = cache.delete(&key).await {
            debug!(task_id = %task.id, error = %e, "failed to drop stale task snapshot");
        }
    }
}

fn record<T>(op: &'static str, result: &ScheduleResult<T>, start: Instant) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.error_type(),
    };
    counter!("tendril.scheduler.operations", "op" => op, "outcome" => outcome).increment(1);
    histogram!("tendril.scheduler.operation.duration", "op" => op)
        .record(start.elapsed().as_secs_f64());
}

/// Builder for [`SchedulerService`].
pub struct SchedulerServiceBuilder {
    store: Arc<dyn TaskStore>,
    notifications: Arc<NotificationManager>,
    advisor: RecommendationClient,
    cache: Option<Arc<ResilientCache>>,
    calculator: ScheduleCalculator,
    clock: Arc<dyn Clock>,
    advisor_timeout: Duration,
    snapshot_ttl: Duration,
}

impl SchedulerServiceBuilder {
    #[must_use]
    pub fn advisor(mut self, advisor: RecommendationClient) -> Self {
        self.advisor = advisor;
        self
    }

    /// Cache for task snapshots.
    #[must_use]
    pub fn cache(mut self, cache: Arc<ResilientCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn calculator(mut self, calculator: ScheduleCalculator) -> Self {
        self.calculator = calculator;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Total time allowed for one advisor consultation.
    #[must_use]
    pub fn advisor_timeout(mut self, timeout: Duration) -> Self {
        self.advisor_timeout = timeout;
        self
    }

    #[must_use]
    pub fn snapshot_ttl(mut self, ttl: Duration) -> Self {
        self.snapshot_ttl = ttl;
        self
    }

    pub fn build(self) -> SchedulerService {
        SchedulerService {
            store: self.store,
            notifications: self.notifications,
            advisor: self.advisor,
            cache: self.cache,
            calculator: self.calculator,
            clock: self.clock,
            locks: TaskLocks::new(),
            advisor_timeout: self.advisor_timeout,
            snapshot_ttl: self.snapshot_ttl,
        }
    }
}
