//! Notification worker implementation.
//!
//! Workers pull due jobs from the shared queue, ask the rate limiter for a
//! token, and hand the job to the sink.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tendril_core::Clock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::NotificationConfig;
use crate::error::DeliveryError;
use crate::job::{DeadLetter, JobKey, JobState, NotificationJob};
use crate::limiter::RateLimitPolicy;
use crate::queue::JobQueue;
use crate::sink::NotificationSink;
use crate::stats::NotificationStats;

/// State shared between the manager and its workers.
pub(crate) struct Shared {
    pub queue: JobQueue,
    pub sink: Arc<dyn NotificationSink>,
    pub limiter: Arc<dyn RateLimitPolicy>,
    pub clock: Arc<dyn Clock>,
    pub states: DashMap<JobKey, JobState>,
    pub stats: NotificationStats,
    pub dead_letters: Mutex<VecDeque<DeadLetter>>,
    pub config: NotificationConfig,
}

impl Shared {
    /// Monotonic instant at which a wall-clock time falls due.
    pub fn due_instant(&self, at: DateTime<Utc>) -> Instant {
        let delay = (at - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
        Instant::now() + delay
    }

    /// Move a live job to `next`. Returns false if the job is no longer
    /// tracked (cancelled while in flight).
    fn transition(&self, key: &JobKey, next: JobState) -> bool {
        let Some(mut state) = self.states.get_mut(key) else {
            return false;
        };
        let from = *state;
        if !from.can_transition_to(next) {
            warn!(job = %key, from = %from, to = %next, "unexpected job transition");
        }
        *state = next;
        true
    }

    fn finish(&self, key: &JobKey) {
        self.states.remove(key);
    }

    fn requeue(&self, job: NotificationJob, delay: Duration) {
        let key = job.key();
        if self.queue.try_push(job, Instant::now() + delay, true).is_err() {
            debug!(job = %key, "queue closed, dropping requeued notification");
            self.finish(&key);
        }
    }

    fn dead_letter(&self, job: NotificationJob, error: &DeliveryError) {
        let key = job.key();
        error!(
            job = %key,
            task_type = %job.task_type,
            retries = job.retry_count,
            error = %error,
            "notification dead-lettered"
        );
        self.stats.dead_lettered(job.task_type);

        let mut dead = self.dead_letters.lock();
        if dead.len() >= self.config.dead_letter_capacity {
            dead.pop_front();
        }
        dead.push_back(DeadLetter {
            job,
            error: error.to_string(),
            failed_at: self.clock.now(),
        });
        drop(dead);

        self.finish(&key);
    }
}

/// Worker that delivers notifications from the queue.
pub(crate) struct NotificationWorker {
    id: usize,
    shared: Arc<Shared>,
}

impl NotificationWorker {
    pub fn new(id: usize, shared: Arc<Shared>) -> Self {
        Self { id, shared }
    }

    /// Run the worker loop until the cancellation token is triggered.
    ///
    /// A job already taken from the queue is finished before the worker
    /// observes cancellation.
    pub async fn run(self, cancel: CancellationToken) {
        debug!(worker_id = self.id, "notification worker started");

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!(worker_id = self.id, "notification worker shutting down");
                    break;
                }

                next = self.shared.queue.next() => {
                    match next {
                        Some(job) => self.process(job).await,
                        None => break,
                    }
                }
            }
        }

        debug!(worker_id = self.id, "notification worker stopped");
    }

    async fn process(&self, mut job: NotificationJob) {
        let shared = &self.shared;
        let key = job.key();

        if !shared.transition(&key, JobState::InFlight) {
            debug!(job = %key, "notification cancelled before delivery");
            return;
        }

        if let Err(wait) = shared.limiter.try_acquire(job.task_type) {
            debug!(
                job = %key,
                task_type = %job.task_type,
                wait_ms = wait.as_millis() as u64,
                "rate limited, deferring notification"
            );
            shared.stats.deferred(job.task_type);
            if shared.transition(&key, JobState::Pending) {
                shared.requeue(job, wait);
            }
            return;
        }

        let result = match tokio::time::timeout(
            shared.config.delivery_timeout,
            shared.sink.deliver(&job),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout),
        };

        match result {
            Ok(()) => {
                info!(
                    worker_id = self.id,
                    job = %key,
                    task_type = %job.task_type,
                    channel = %job.channel,
                    "notification delivered"
                );
                shared.stats.delivered(job.task_type);
                shared.transition(&key, JobState::Delivered);
                shared.finish(&key);
            }
            Err(e) if e.is_retryable() && job.retry_count < shared.config.max_retries => {
                job.retry_count += 1;
                warn!(
                    job = %key,
                    attempt = job.retry_count,
                    max_retries = shared.config.max_retries,
                    error = %e,
                    "notification delivery failed, retrying"
                );
                shared.stats.retried(job.task_type);
                if shared.transition(&key, JobState::Retrying) {
                    shared.requeue(job, shared.config.retry_delay);
                }
            }
            Err(e) => {
                shared.transition(&key, JobState::Failed);
                shared.dead_letter(job, &e);
            }
        }
    }
}
