//! In-memory task store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tendril_core::{MaintenanceTask, TaskId};

use super::TaskStore;
use crate::error::StoreError;

/// Versioned in-memory task store.
///
/// Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, MaintenanceTask>>,
}

impl MemoryTaskStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip a task's `active` flag the way an external owner would.
    ///
    /// Bumps the version. Returns false if the task does not exist.
    pub fn set_active(&self, id: &TaskId, active: bool) -> bool {
        let mut tasks = self.tasks.write();
        match tasks.get_mut(id) {
            Some(task) => {
                task.active = active;
                task.version += 1;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get(&self, id: &TaskId) -> Result<Option<MaintenanceTask>, StoreError> {
        Ok(self.tasks.read().get(id).cloned())
    }

    async fn save(&self, task: &MaintenanceTask) -> Result<MaintenanceTask, StoreError> {
        let mut tasks = self.tasks.write();

        let found = tasks.get(&task.id).map_or(0, |stored| stored.version);
        if found != task.version {
            return Err(StoreError::Conflict {
                id: task.id.clone(),
                expected: task.version,
                found,
            });
        }

        let mut saved = task.clone();
        saved.version = found + 1;
        tasks.insert(saved.id.clone(), saved.clone());
        Ok(saved)
    }

    async fn list_due(&self, before: DateTime<Utc>) -> Result<Vec<MaintenanceTask>, StoreError> {
        let mut due: Vec<_> = self
            .tasks
            .read()
            .values()
            .filter(|task| task.next_scheduled_time <= before)
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.next_scheduled_time
                .cmp(&b.next_scheduled_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(due)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::{Duration, TimeZone};
    use tendril_core::{Frequency, NotificationChannel, PreferredTime, TaskType, Unit};

    use super::*;

    fn task(id: &str, next: DateTime<Utc>) -> MaintenanceTask {
        let created = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        MaintenanceTask {
            id: TaskId::new(id),
            crop_id: "tomato-1".to_string(),
            task_type: TaskType::Water,
            frequency: Frequency::Daily,
            amount: 500.0,
            unit: Unit::Millilitres,
            preferred_time: PreferredTime::from_hm(9, 0).unwrap(),
            ai_recommended: false,
            active: true,
            next_scheduled_time: next,
            last_completed_time: None,
            completion_streak: 0,
            channel: NotificationChannel::Push,
            created_at: created,
            updated_at: created,
            version: 0,
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn save_assigns_versions() {
        let store = MemoryTaskStore::new();

        let first = store.save(&task("t1", at(9))).await.unwrap();
        assert_eq!(first.version, 1);

        let second = store.save(&first).await.unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(store.get(&TaskId::new("t1")).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn stale_save_is_rejected() {
        let store = MemoryTaskStore::new();
        let saved = store.save(&task("t1", at(9))).await.unwrap();
        store.save(&saved).await.unwrap();

        let err = store.save(&saved).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: 1,
                found: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn creating_an_existing_id_conflicts() {
        let store = MemoryTaskStore::new();
        store.save(&task("t1", at(9))).await.unwrap();

        let err = store.save(&task("t1", at(10))).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn missing_task_is_none() {
        let store = MemoryTaskStore::new();
        assert!(store.get(&TaskId::new("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_due_orders_by_next_run() {
        let store = MemoryTaskStore::new();
        store.save(&task("late", at(15))).await.unwrap();
        store.save(&task("early", at(8))).await.unwrap();
        store.save(&task("future", at(9) + Duration::days(1))).await.unwrap();

        let due = store.list_due(at(15)).await.unwrap();
        let ids: Vec<_> = due.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["early", "late"]);
    }

    #[tokio::test]
    async fn set_active_bumps_version() {
        let store = MemoryTaskStore::new();
        store.save(&task("t1", at(9))).await.unwrap();

        assert!(store.set_active(&TaskId::new("t1"), false));
        let stored = store.get(&TaskId::new("t1")).await.unwrap().unwrap();
        assert!(!stored.active);
        assert_eq!(stored.version, 2);
        assert!(!store.set_active(&TaskId::new("missing"), false));
    }
}
