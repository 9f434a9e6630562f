//! Notification jobs and their delivery state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tendril_core::{MaintenanceTask, NotificationChannel, TaskId, TaskType};

/// Identity of a job: one reminder per task occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub task_id: TaskId,
    pub occurrence: DateTime<Utc>,
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.task_id, self.occurrence.to_rfc3339())
    }
}

/// A reminder for one occurrence of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJob {
    pub task_id: TaskId,
    pub crop_id: String,
    pub task_type: TaskType,
    pub channel: NotificationChannel,
    /// The occurrence this reminder is for.
    pub occurrence: DateTime<Utc>,
    /// When the job becomes eligible for delivery.
    pub scheduled_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl NotificationJob {
    /// Reminder for the task's next scheduled occurrence.
    pub fn for_task(task: &MaintenanceTask) -> Self {
        Self {
            task_id: task.id.clone(),
            crop_id: task.crop_id.clone(),
            task_type: task.task_type,
            channel: task.channel,
            occurrence: task.next_scheduled_time,
            scheduled_at: task.next_scheduled_time,
            retry_count: 0,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey {
            task_id: self.task_id.clone(),
            occurrence: self.occurrence,
        }
    }
}

/// Delivery state of a live job.
///
/// ```text
/// Pending -> InFlight -> Delivered
///               |
///               +-> Retrying -> InFlight
///               |
///               +-> Failed
/// ```
///
/// A rate-limited job goes from `InFlight` back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    InFlight,
    Retrying,
    Delivered,
    Failed,
}

impl JobState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight)
                | (Self::Retrying, Self::InFlight)
                | (Self::InFlight, Self::Delivered)
                | (Self::InFlight, Self::Retrying)
                | (Self::InFlight, Self::Failed)
                | (Self::InFlight, Self::Pending)
        )
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Retrying => "retrying",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job that exhausted its retries.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub job: NotificationJob,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case(JobState::Pending, JobState::InFlight, true)]
    #[case(JobState::InFlight, JobState::Delivered, true)]
    #[case(JobState::InFlight, JobState::Retrying, true)]
    #[case(JobState::Retrying, JobState::InFlight, true)]
    #[case(JobState::InFlight, JobState::Failed, true)]
    #[case(JobState::InFlight, JobState::Pending, true)]
    #[case(JobState::Pending, JobState::Delivered, false)]
    #[case(JobState::Delivered, JobState::InFlight, false)]
    #[case(JobState::Failed, JobState::Retrying, false)]
    #[case(JobState::Retrying, JobState::Delivered, false)]
    fn transitions(#[case] from: JobState, #[case] to: JobState, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Delivered.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Retrying.is_terminal());
    }

    #[test]
    fn key_is_task_and_occurrence() {
        let at = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let job = NotificationJob {
            task_id: TaskId::new("t-1"),
            crop_id: "crop".to_string(),
            task_type: TaskType::Water,
            channel: NotificationChannel::Push,
            occurrence: at,
            scheduled_at: at,
            retry_count: 2,
        };

        let mut later = job.clone();
        later.scheduled_at = at + chrono::Duration::minutes(5);
        later.retry_count = 0;
        assert_eq!(job.key(), later.key());
        assert_eq!(job.key().to_string(), "t-1@2026-05-01T09:00:00+00:00");
    }
}
