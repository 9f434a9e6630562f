//! Domain model and schedule arithmetic for tendril.
//!
//! This crate has no I/O. It provides:
//! - The maintenance task model and request validation
//! - [`ScheduleCalculator`], which derives next-run times and completion streaks
//! - The caller-facing [`ScheduleError`] taxonomy
//! - Injectable [`Clock`]s and [`Backoff`] strategies used by the service crates

pub mod backoff;
pub mod calendar;
pub mod error;
pub mod serde_duration;
pub mod time;
pub mod types;

pub use backoff::Backoff;
pub use calendar::{
    CompletionOutcome, CompletionPlan, GraceWindow, MissedOccurrencePolicy, ScheduleCalculator,
};
pub use error::{Dependency, ScheduleError, ScheduleResult};
pub use time::{Clock, ManualClock, PreferredTime, SystemClock, DAYLIGHT_END, DAYLIGHT_START};
pub use types::{
    Frequency, MaintenanceTask, NotificationChannel, ScheduleRequest, TaskId, TaskType, Unit,
};
