use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use tendril_core::TaskType;

/// Delivery counters owned by one manager.
#[derive(Debug, Default)]
pub(crate) struct NotificationStats {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    retried: AtomicU64,
    deferred: AtomicU64,
    dead_lettered: AtomicU64,
    cancelled: AtomicU64,
}

impl NotificationStats {
    pub fn enqueued(&self, task_type: TaskType) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        counter!("tendril.notify.enqueued", "task_type" => task_type.as_str()).increment(1);
    }

    pub fn rejected(&self, task_type: TaskType) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        counter!("tendril.notify.rejected", "task_type" => task_type.as_str()).increment(1);
    }

    pub fn delivered(&self, task_type: TaskType) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        counter!("tendril.notify.delivered", "task_type" => task_type.as_str()).increment(1);
    }

    pub fn retried(&self, task_type: TaskType) {
        self.retried.fetch_add(1, Ordering::Relaxed);
        counter!("tendril.notify.retried", "task_type" => task_type.as_str()).increment(1);
    }

    pub fn deferred(&self, task_type: TaskType) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
        counter!("tendril.notify.rate_limited", "task_type" => task_type.as_str()).increment(1);
    }

    pub fn dead_lettered(&self, task_type: TaskType) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        counter!("tendril.notify.dead_lettered", "task_type" => task_type.as_str()).increment(1);
    }

    pub fn cancelled(&self, count: usize) {
        let count = count as u64;
        self.cancelled.fetch_add(count, Ordering::Relaxed);
        counter!("tendril.notify.cancelled").increment(count);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Jobs accepted by `enqueue`.
    pub enqueued: u64,
    /// Jobs refused because the queue stayed full.
    pub rejected: u64,
    pub delivered: u64,
    /// Failed attempts that were scheduled for another try.
    pub retried: u64,
    /// Attempts postponed by the rate limiter.
    pub deferred: u64,
    pub dead_lettered: u64,
    /// Jobs removed by `cancel_task`.
    pub cancelled: u64,
}
