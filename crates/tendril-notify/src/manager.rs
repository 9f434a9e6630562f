//! Notification manager.
//!
//! Owns the job queue, the rate limiter and a fixed pool of workers. The pool
//! size is fixed at start; producers never spawn work of their own.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::gauge;
use parking_lot::Mutex;
use tendril_core::{Clock, TaskId};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::NotificationConfig;
use crate::error::{NotifyError, NotifyResult};
use crate::job::{DeadLetter, JobKey, JobState, NotificationJob};
use crate::limiter::{RateLimitPolicy, TaskTypeLimiter};
use crate::queue::{JobQueue, PushError};
use crate::sink::NotificationSink;
use crate::stats::{NotificationStats, StatsSnapshot};
use crate::worker::{NotificationWorker, Shared};

pub struct NotificationManager {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    workers: Mutex<Option<JoinSet<()>>>,
    worker_count: usize,
    accepting: AtomicBool,
}

impl NotificationManager {
    /// Start the worker pool with per-task-type hourly limits from `config`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: NotificationConfig,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> NotifyResult<Self> {
        config.validate()?;
        let limiter = Arc::new(TaskTypeLimiter::new(&config.rate_limits)?);
        Self::start_with_limiter(config, sink, clock, limiter)
    }

    /// Start the worker pool with a custom admission policy.
    pub fn start_with_limiter(
        config: NotificationConfig,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        limiter: Arc<dyn RateLimitPolicy>,
    ) -> NotifyResult<Self> {
        config.validate()?;

        let worker_count = config.worker_count();
        let shared = Arc::new(Shared {
            queue: JobQueue::new(config.queue_capacity),
            sink,
            limiter,
            clock,
            states: DashMap::new(),
            stats: NotificationStats::default(),
            dead_letters: Mutex::new(VecDeque::new()),
            config,
        });

        let cancel = CancellationToken::new();
        let mut workers = JoinSet::new();
        for id in 0..worker_count {
            let worker = NotificationWorker::new(id, Arc::clone(&shared));
            workers.spawn(worker.run(cancel.clone()));
        }

        info!(
            workers = worker_count,
            queue_capacity = shared.config.queue_capacity,
            "notification manager started"
        );

        Ok(Self {
            shared,
            cancel,
            workers: Mutex::new(Some(workers)),
            worker_count,
            accepting: AtomicBool::new(true),
        })
    }

    /// Queue a reminder for delivery at its `scheduled_at`.
    ///
    /// A job with the same `(task_id, occurrence)` as a queued one replaces
    /// it. When the queue is full this waits up to the configured
    /// `enqueue_timeout` and then fails with [`NotifyError::QueueFull`].
    pub async fn enqueue(&self, job: NotificationJob) -> NotifyResult<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(NotifyError::ShuttingDown);
        }

        let key = job.key();
        let task_type = job.task_type;
        let due = self.shared.due_instant(job.scheduled_at);

        self.shared.states.insert(key.clone(), JobState::Pending);
        let result = self
            .shared
            .queue
            .push(job, due, self.shared.config.enqueue_timeout)
            .await;

        match result {
            Ok(()) => {
                debug!(job = %key, task_type = %task_type, "notification queued");
                self.shared.stats.enqueued(task_type);
                gauge!("tendril.notify.queue_depth").set(self.shared.queue.len() as f64);
                Ok(())
            }
            Err(PushError::Full(_)) => {
                self.shared
                    .states
                    .remove_if(&key, |_, state| *state == JobState::Pending);
                self.shared.stats.rejected(task_type);
                warn!(job = %key, task_type = %task_type, "notification queue full");
                Err(NotifyError::QueueFull)
            }
            Err(PushError::Closed(_)) => {
                self.shared.states.remove(&key);
                Err(NotifyError::ShuttingDown)
            }
        }
    }

    /// Drop every queued reminder for a task. Returns how many were removed.
    ///
    /// A delivery already in flight completes but is not retried.
    pub fn cancel_task(&self, task_id: &TaskId) -> usize {
        let removed = self.shared.queue.remove_task(task_id);
        self.shared.states.retain(|key, _| &key.task_id != task_id);
        if removed > 0 {
            self.shared.stats.cancelled(removed);
            debug!(task_id = %task_id, removed, "cancelled queued notifications");
        }
        removed
    }

    /// Queued reminders for a task, earliest occurrence first.
    pub fn queued_jobs(&self, task_id: &TaskId) -> Vec<NotificationJob> {
        let mut jobs = self.shared.queue.jobs_for(task_id);
        jobs.sort_by_key(|job| job.occurrence);
        jobs
    }

    pub fn job_state(&self, key: &JobKey) -> Option<JobState> {
        self.shared.states.get(key).map(|state| *state)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Most recent dead-lettered jobs, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.dead_letters.lock().iter().cloned().collect()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Stop the pool.
    ///
    /// New enqueues are refused and queued jobs are dropped. Workers finish
    /// the delivery they are running; any still running after `timeout` are
    /// aborted and [`NotifyError::ShutdownTimeout`] is returned. No worker
    /// task outlives this call.
    pub async fn shutdown(&self, timeout: Duration) -> NotifyResult<()> {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        info!("shutting down notification manager");
        self.cancel.cancel();
        let dropped = self.shared.queue.close();
        if !dropped.is_empty() {
            warn!(dropped = dropped.len(), "dropped queued notifications on shutdown");
        }

        let Some(mut workers) = self.workers.lock().take() else {
            return Ok(());
        };

        let drained = tokio::time::timeout(timeout, async {
            while let Some(result) = workers.join_next().await {
                if let Err(e) = result {
                    if e.is_panic() {
                        error!(error = %e, "notification worker panicked");
                    }
                }
            }
        })
        .await;

        if drained.is_ok() {
            info!("notification manager stopped");
            return Ok(());
        }

        let aborted = workers.len();
        warn!(aborted, "notification workers did not drain in time, aborting");
        workers.abort_all();
        while workers.join_next().await.is_some() {}

        Err(NotifyError::ShutdownTimeout { aborted })
    }
}

impl Drop for NotificationManager {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.shared.queue.close();
    }
}

impl std::fmt::Debug for NotificationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationManager")
            .field("workers", &self.worker_count)
            .field("queue_len", &self.queue_len())
            .field("accepting", &self.is_accepting())
            .finish_non_exhaustive()
    }
}
