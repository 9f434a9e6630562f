//! Core domain types for maintenance schedules.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ScheduleError, ScheduleResult};
use crate::time::PreferredTime;

/// Longest permitted custom interval.
pub const MAX_CUSTOM_DAYS: u32 = 365;

/// Unique identifier for a maintenance task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a task ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new random task ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of care action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Water,
    Fertilizer,
    Composting,
    Pruning,
    PestControl,
}

impl TaskType {
    /// All task types, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Water,
        Self::Fertilizer,
        Self::Composting,
        Self::Pruning,
        Self::PestControl,
    ];

    /// Units an amount of this task type may be measured in.
    pub const fn allowed_units(&self) -> &'static [Unit] {
        match self {
            Self::Water => &[Unit::Millilitres, Unit::Litres],
            Self::Fertilizer => &[Unit::Grams, Unit::Kilograms, Unit::Millilitres],
            Self::Composting => &[Unit::Kilograms, Unit::Litres],
            Self::Pruning => &[Unit::Count],
            Self::PestControl => &[Unit::Millilitres, Unit::Grams],
        }
    }

    /// Stable label for logs, metrics and cache keys.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Water => "water",
            Self::Fertilizer => "fertilizer",
            Self::Composting => "composting",
            Self::Pruning => "pruning",
            Self::PestControl => "pest_control",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of measure for a task amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "ml")]
    Millilitres,
    #[serde(rename = "l")]
    Litres,
    #[serde(rename = "g")]
    Grams,
    #[serde(rename = "kg")]
    Kilograms,
    #[serde(rename = "count")]
    Count,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Millilitres => "ml",
            Self::Litres => "l",
            Self::Grams => "g",
            Self::Kilograms => "kg",
            Self::Count => "count",
        };
        f.write_str(s)
    }
}

/// How often a task recurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    TwiceDaily,
    Weekly,
    BiWeekly,
    Monthly,
    /// Every N days.
    Custom(u32),
}

impl Frequency {
    /// Reject custom intervals outside 1..=365 days.
    pub fn validate(&self) -> ScheduleResult<()> {
        match self {
            Self::Custom(days) if *days == 0 || *days > MAX_CUSTOM_DAYS => {
                Err(ScheduleError::validation(format!(
                    "custom frequency must be between 1 and {MAX_CUSTOM_DAYS} days, got {days}"
                )))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::TwiceDaily => write!(f, "twice-daily"),
            Self::Weekly => write!(f, "weekly"),
            Self::BiWeekly => write!(f, "bi-weekly"),
            Self::Monthly => write!(f, "monthly"),
            Self::Custom(days) => write!(f, "every {days} days"),
        }
    }
}

/// Delivery channel for reminders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    #[default]
    Push,
    Email,
    Webhook,
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Email => write!(f, "email"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

/// A recurring care action on a crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceTask {
    pub id: TaskId,
    /// Owning crop. Not managed here.
    pub crop_id: String,
    pub task_type: TaskType,
    pub frequency: Frequency,
    pub amount: f64,
    pub unit: Unit,
    pub preferred_time: PreferredTime,
    /// True only when an advisor recommendation was obtained and applied.
    pub ai_recommended: bool,
    /// Soft toggle, flipped by the persistence layer.
    pub active: bool,
    pub next_scheduled_time: DateTime<Utc>,
    pub last_completed_time: Option<DateTime<Utc>>,
    pub completion_streak: u32,
    #[serde(default)]
    pub channel: NotificationChannel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped on every save.
    #[serde(default)]
    pub version: u64,
}

impl MaintenanceTask {
    /// The anchor the current `next_scheduled_time` was derived from.
    #[must_use]
    pub fn anchor_time(&self) -> DateTime<Utc> {
        self.last_completed_time.unwrap_or(self.created_at)
    }
}

/// Parameters for creating or updating a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub crop_id: String,
    pub task_type: TaskType,
    pub frequency: Frequency,
    pub amount: f64,
    pub unit: Unit,
    /// Raw `HH:MM` input.
    pub preferred_time: String,
    #[serde(default)]
    pub channel: Option<NotificationChannel>,
}

impl ScheduleRequest {
    /// Check every field invariant and return the parsed preferred time.
    pub fn validate(&self) -> ScheduleResult<PreferredTime> {
        if self.crop_id.trim().is_empty() {
            return Err(ScheduleError::validation("crop id must not be empty"));
        }

        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(ScheduleError::validation(format!(
                "amount must be a positive number, got {}",
                self.amount
            )));
        }

        if !self.task_type.allowed_units().contains(&self.unit) {
            return Err(ScheduleError::validation(format!(
                "unit {} is not valid for {} tasks",
                self.unit, self.task_type
            )));
        }

        self.frequency.validate()?;

        let preferred = PreferredTime::parse(&self.preferred_time)?;
        preferred.ensure_daylight()?;
        Ok(preferred)
    }
}
