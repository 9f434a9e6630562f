//! Bounded job queue with delayed delivery.
//!
//! Jobs are keyed by [`JobKey`]. Pushing a job whose key is already queued
//! replaces it in place, so a task occurrence is never queued twice. Jobs
//! with a future due instant wait in a min-heap until they are due; ready
//! jobs are served FIFO.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::pin::pin;

use parking_lot::Mutex;
use tendril_core::TaskId;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::job::{JobKey, NotificationJob};

/// Why a push was refused. The job is handed back.
#[derive(Debug)]
pub enum PushError {
    Full(NotificationJob),
    Closed(NotificationJob),
}

struct Entry {
    job: NotificationJob,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobKey, Entry>,
    ready: VecDeque<(u64, JobKey)>,
    delayed: BinaryHeap<Reverse<(Instant, u64, JobKey)>>,
    next_seq: u64,
    closed: bool,
}

impl Inner {
    fn is_current(&self, key: &JobKey, seq: u64) -> bool {
        self.jobs.get(key).is_some_and(|e| e.seq == seq)
    }

    fn promote_due(&mut self, now: Instant) {
        while let Some(Reverse((due, _, _))) = self.delayed.peek() {
            if *due > now {
                break;
            }
            if let Some(Reverse((_, seq, key))) = self.delayed.pop() {
                if self.is_current(&key, seq) {
                    self.ready.push_back((seq, key));
                }
            }
        }
    }

    fn pop_ready(&mut self) -> Option<NotificationJob> {
        while let Some((seq, key)) = self.ready.pop_front() {
            if self.is_current(&key, seq) {
                return self.jobs.remove(&key).map(|e| e.job);
            }
        }
        None
    }

    fn next_due(&mut self) -> Option<Instant> {
        while let Some(Reverse((due, seq, key))) = self.delayed.peek() {
            if self.is_current(key, *seq) {
                return Some(*due);
            }
            self.delayed.pop();
        }
        None
    }
}

/// Shared job queue used by the notification workers.
pub struct JobQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    available: Notify,
    space: Notify,
}

impl JobQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity,
            available: Notify::new(),
            space: Notify::new(),
        }
    }

    /// Queue a job for delivery at `due`.
    ///
    /// Fails with [`PushError::Full`] when the queue holds `capacity` jobs,
    /// unless `bypass_capacity` is set (used for retries of jobs that already
    /// held a slot). Replacing a queued job never needs a free slot.
    pub fn try_push(
        &self,
        job: NotificationJob,
        due: Instant,
        bypass_capacity: bool,
    ) -> Result<(), PushError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(PushError::Closed(job));
        }

        let key = job.key();
        let replacing = inner.jobs.contains_key(&key);
        if !replacing && !bypass_capacity && inner.jobs.len() >= self.capacity {
            return Err(PushError::Full(job));
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;

        if due <= Instant::now() {
            inner.ready.push_back((seq, key.clone()));
        } else {
            inner.delayed.push(Reverse((due, seq, key.clone())));
        }
        if replacing {
            debug!(job = %key, "replacing queued notification");
        }
        inner.jobs.insert(key, Entry { job, seq });
        drop(inner);

        self.available.notify_one();
        Ok(())
    }

    /// Queue a job, waiting up to `wait` for a free slot.
    pub async fn push(
        &self,
        job: NotificationJob,
        due: Instant,
        wait: std::time::Duration,
    ) -> Result<(), PushError> {
        let deadline = Instant::now() + wait;
        let mut job = job;

        loop {
            let mut space = pin!(self.space.notified());
            space.as_mut().enable();

            match self.try_push(job, due, false) {
                Err(PushError::Full(returned)) => job = returned,
                other => return other,
            }

            if tokio::time::timeout_at(deadline, space).await.is_err() {
                return Err(PushError::Full(job));
            }
        }
    }

    /// Wait for the next due job. Returns `None` once the queue is closed.
    pub async fn next(&self) -> Option<NotificationJob> {
        loop {
            let mut available = pin!(self.available.notified());
            available.as_mut().enable();

            let wake_at = {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return None;
                }
                inner.promote_due(Instant::now());
                if let Some(job) = inner.pop_ready() {
                    drop(inner);
                    self.space.notify_one();
                    return Some(job);
                }
                inner.next_due()
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        () = available => {}
                        () = tokio::time::sleep_until(at) => {}
                    }
                }
                None => available.await,
            }
        }
    }

    /// Remove every queued job for a task. Returns how many were removed.
    pub fn remove_task(&self, task_id: &TaskId) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.jobs.len();
        inner.jobs.retain(|key, _| &key.task_id != task_id);
        let removed = before - inner.jobs.len();
        drop(inner);

        for _ in 0..removed {
            self.space.notify_one();
        }
        removed
    }

    /// Queued jobs for a task, in no particular order.
    pub fn jobs_for(&self, task_id: &TaskId) -> Vec<NotificationJob> {
        self.inner
            .lock()
            .jobs
            .values()
            .filter(|e| &e.job.task_id == task_id)
            .map(|e| e.job.clone())
            .collect()
    }

    pub fn contains(&self, key: &JobKey) -> bool {
        self.inner.lock().jobs.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop accepting jobs and wake every waiter.
    ///
    /// Jobs still queued are dropped and returned.
    pub fn close(&self) -> Vec<NotificationJob> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.ready.clear();
        inner.delayed.clear();
        let dropped = inner.jobs.drain().map(|(_, e)| e.job).collect();
        drop(inner);

        self.available.notify_waiters();
        self.space.notify_waiters();
        dropped
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use tendril_core::{NotificationChannel, TaskType};

    use super::*;

    fn job(task: &str, hour: u32) -> NotificationJob {
        let at = Utc.with_ymd_and_hms(2026, 5, 1, hour, 0, 0).unwrap();
        NotificationJob {
            task_id: TaskId::new(task),
            crop_id: "crop".to_string(),
            task_type: TaskType::Water,
            channel: NotificationChannel::Push,
            occurrence: at,
            scheduled_at: at,
            retry_count: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ready_jobs_are_fifo() {
        let queue = JobQueue::new(10);
        let now = Instant::now();
        queue.try_push(job("a", 9), now, false).unwrap();
        queue.try_push(job("b", 9), now, false).unwrap();

        assert_eq!(queue.next().await.unwrap().task_id.as_str(), "a");
        assert_eq!(queue.next().await.unwrap().task_id.as_str(), "b");
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_jobs_wait_until_due() {
        let queue = JobQueue::new(10);
        let start = Instant::now();
        queue
            .try_push(job("late", 9), start + Duration::from_secs(60), false)
            .unwrap();
        queue
            .try_push(job("soon", 9), start + Duration::from_secs(10), false)
            .unwrap();

        let first = queue.next().await.unwrap();
        assert_eq!(first.task_id.as_str(), "soon");
        assert!(Instant::now() >= start + Duration::from_secs(10));

        let second = queue.next().await.unwrap();
        assert_eq!(second.task_id.as_str(), "late");
        assert!(Instant::now() >= start + Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_replaces_instead_of_duplicating() {
        let queue = JobQueue::new(1);
        let now = Instant::now();
        queue.try_push(job("a", 9), now + Duration::from_secs(60), false).unwrap();

        let mut replacement = job("a", 9);
        replacement.retry_count = 1;
        queue.try_push(replacement, now, false).unwrap();

        assert_eq!(queue.len(), 1);
        let got = queue.next().await.unwrap();
        assert_eq!(got.retry_count, 1);

        // The stale delayed entry is never served.
        let stale = tokio::time::timeout(Duration::from_secs(120), queue.next()).await;
        assert!(stale.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_rejects_after_wait() {
        let queue = JobQueue::new(1);
        let now = Instant::now();
        queue.try_push(job("a", 9), now, false).unwrap();

        let start = Instant::now();
        let result = queue.push(job("b", 9), now, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(PushError::Full(_))));
        assert!(Instant::now() - start >= Duration::from_millis(50));

        // Retries bypass capacity.
        queue.try_push(job("b", 9), now, true).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_push_proceeds_when_space_frees() {
        let queue = Arc::new(JobQueue::new(1));
        queue.try_push(job("a", 9), Instant::now(), false).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .push(job("b", 9), Instant::now(), Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.next().await.unwrap().task_id.as_str(), "a");

        producer.await.unwrap().unwrap();
        assert_eq!(queue.next().await.unwrap().task_id.as_str(), "b");
    }

    #[tokio::test]
    async fn remove_task_drops_all_its_jobs() {
        let queue = JobQueue::new(10);
        let now = Instant::now();
        queue.try_push(job("a", 9), now, false).unwrap();
        queue.try_push(job("a", 10), now, false).unwrap();
        queue.try_push(job("b", 9), now, false).unwrap();

        assert_eq!(queue.remove_task(&TaskId::new("a")), 2);
        assert!(queue.jobs_for(&TaskId::new("a")).is_empty());
        assert_eq!(queue.next().await.unwrap().task_id.as_str(), "b");
    }

    #[tokio::test]
    async fn close_wakes_waiters_and_rejects_pushes() {
        let queue = Arc::new(JobQueue::new(10));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .expect("task");
        assert!(got.is_none());
        assert!(matches!(
            queue.try_push(job("a", 9), Instant::now(), false),
            Err(PushError::Closed(_))
        ));
    }
}
