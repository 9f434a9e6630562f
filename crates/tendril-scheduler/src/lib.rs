//! Tendril maintenance scheduler.
//!
//! [`SchedulerService`] creates, updates and completes recurring crop-care
//! tasks. It asks the advisor for suggested amounts and times, caches task
//! snapshots, and keeps one pending reminder per task with the notification
//! manager. The [`DueSweeper`] re-enqueues reminders after a restart.

pub mod advisor;
pub mod config;
pub mod error;
pub mod locks;
pub mod service;
pub mod store;
pub mod sweeper;
pub mod telemetry;

pub use advisor::{AdvisorBackend, HttpAdvisor, Recommendation, RecommendationClient, TaskContext};
pub use config::{
    AdvisorConfig, MetricsConfig, ScheduleConfig, SweeperConfig, TendrilConfig,
};
pub use error::{AdvisorError, ConfigError, StoreError};
pub use locks::TaskLocks;
pub use service::{SchedulerService, SchedulerServiceBuilder};
pub use store::{MemoryTaskStore, TaskStore};
pub use sweeper::DueSweeper;
