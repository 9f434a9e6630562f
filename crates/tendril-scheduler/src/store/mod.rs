//! Task persistence.
//!
//! The scheduler reads and writes tasks through [`TaskStore`]. Saves are
//! optimistic: the caller passes the task at the version it loaded, and the
//! store refuses the write if someone else saved in between.

mod memory;

pub use memory::MemoryTaskStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tendril_core::{MaintenanceTask, TaskId};

use crate::error::StoreError;

/// Persistence collaborator for maintenance tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Load a task. `Ok(None)` if it does not exist.
    async fn get(&self, id: &TaskId) -> Result<Option<MaintenanceTask>, StoreError>;

    /// Persist a task and return it with its new version.
    ///
    /// `task.version` must equal the stored version (0 for a new task),
    /// otherwise [`StoreError::Conflict`] is returned and nothing is written.
    async fn save(&self, task: &MaintenanceTask) -> Result<MaintenanceTask, StoreError>;

    /// Tasks whose next run is at or before `before`, earliest first.
    ///
    /// Inactive tasks are included; callers decide what to do with them.
    async fn list_due(&self, before: DateTime<Utc>) -> Result<Vec<MaintenanceTask>, StoreError>;
}
