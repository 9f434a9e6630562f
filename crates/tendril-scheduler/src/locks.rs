//! Per-task mutual exclusion.

use std::sync::Arc;

use dashmap::DashMap;
use tendril_core::TaskId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Table of async mutexes keyed by task id.
///
/// Operations on the same task run one at a time; different tasks never
/// contend. Entries are removed once no one holds or waits on them.
#[derive(Debug, Default, Clone)]
pub struct TaskLocks {
    locks: Arc<DashMap<TaskId, Arc<Mutex<()>>>>,
}

impl TaskLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    pub async fn lock(&self, id: &TaskId) -> TaskLockGuard {
        let mutex = self
            .locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        TaskLockGuard {
            guard: Some(guard),
            id: id.clone(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of ids with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one task. Released on drop.
#[derive(Debug)]
pub struct TaskLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    id: TaskId,
    locks: Arc<DashMap<TaskId, Arc<Mutex<()>>>>,
}

impl Drop for TaskLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table's own reference left: nobody holds or waits.
        self.locks
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn entries_are_removed_after_release() {
        let locks = TaskLocks::new();
        let guard = locks.lock(&TaskId::new("t1")).await;
        assert_eq!(locks.len(), 1);
        drop(guard);
        assert!(locks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn same_task_is_serialised() {
        let locks = TaskLocks::new();
        let id = TaskId::new("t1");

        let first = locks.lock(&id).await;

        let waiter = {
            let locks = locks.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        assert_eq!(locks.len(), 1);

        drop(first);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_tasks_do_not_contend() {
        let locks = TaskLocks::new();
        let _a = locks.lock(&TaskId::new("a")).await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.lock(&TaskId::new("b")))
            .await
            .expect("independent task lock");
        assert_eq!(locks.len(), 2);
    }
}
