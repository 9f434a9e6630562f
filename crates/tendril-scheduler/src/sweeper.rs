//! Periodic re-enqueueing of due reminders.
//!
//! The notification queue lives in memory. After a restart, or when an
//! enqueue was refused under load, the sweeper finds tasks whose next run is
//! close and hands their reminders to the manager again. Enqueue replaces a
//! queued job with the same key, so sweeping twice never duplicates a
//! reminder. Overdue tasks are only picked up by the startup recovery sweep;
//! later sweeps look ahead of the clock so delivered reminders are not sent
//! again.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tendril_core::{Clock, ScheduleResult};
use tendril_notify::{NotificationJob, NotificationManager, NotifyError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SweeperConfig;
use crate::store::TaskStore;

/// Background task that enqueues reminders for due tasks.
pub struct DueSweeper {
    store: Arc<dyn TaskStore>,
    notifications: Arc<NotificationManager>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    lookahead: ChronoDuration,
}

impl DueSweeper {
    pub fn new(
        store: Arc<dyn TaskStore>,
        notifications: Arc<NotificationManager>,
        clock: Arc<dyn Clock>,
        config: &SweeperConfig,
    ) -> Self {
        Self {
            store,
            notifications,
            clock,
            interval: config.interval,
            lookahead: ChronoDuration::from_std(config.lookahead)
                .unwrap_or_else(|_| ChronoDuration::minutes(5)),
        }
    }

    /// Sweep on every interval tick until cancelled. The first tick runs
    /// [`recover`](Self::recover) immediately.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            lookahead_secs = self.lookahead.num_seconds(),
            "due sweeper started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut recovered = false;

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                _ = ticker.tick() => {
                    let result = if recovered {
                        self.sweep_once().await
                    } else {
                        self.recover().await
                    };
                    match result {
                        Ok(_) => recovered = true,
                        Err(e) => error!(error = %e, "due sweep failed"),
                    }
                }
            }
        }

        info!("due sweeper stopped");
    }

    /// Enqueue reminders for active tasks due after now and within the
    /// lookahead. Returns the number of reminders enqueued.
    pub async fn sweep_once(&self) -> ScheduleResult<usize> {
        self.sweep(false).await
    }

    /// Like [`sweep_once`](Self::sweep_once) but also enqueues overdue
    /// tasks, which are delivered straight away.
    pub async fn recover(&self) -> ScheduleResult<usize> {
        self.sweep(true).await
    }

    async fn sweep(&self, include_overdue: bool) -> ScheduleResult<usize> {
        let now = self.clock.now();
        let due = self.store.list_due(now + self.lookahead).await?;

        let mut enqueued = 0;
        let pending = due
            .iter()
            .filter(|task| task.active)
            .filter(|task| include_overdue || task.next_scheduled_time > now);
        for task in pending {
            match self.notifications.enqueue(NotificationJob::for_task(task)).await {
                Ok(()) => enqueued += 1,
                Err(NotifyError::ShuttingDown) => {
                    debug!("notifications shutting down, stopping sweep");
                    break;
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "failed to enqueue due reminder");
                }
            }
        }

        debug!(due = due.len(), enqueued, include_overdue, "due sweep finished");
        Ok(enqueued)
    }
}
