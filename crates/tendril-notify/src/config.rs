use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;
use tendril_core::TaskType;

use crate::error::NotifyError;

/// Notification manager configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Worker count. Defaults to the number of available CPUs.
    pub workers: Option<usize>,

    /// Maximum number of queued jobs.
    pub queue_capacity: usize,

    /// How long `enqueue` waits for space before failing with `QueueFull`.
    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub enqueue_timeout: Duration,

    /// Delivery attempts after the first before a job is dead-lettered.
    pub max_retries: u32,

    /// Delay between delivery attempts.
    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub retry_delay: Duration,

    /// Upper bound on a single sink call.
    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub delivery_timeout: Duration,

    /// Time allowed for in-flight jobs to finish on shutdown.
    #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
    pub shutdown_timeout: Duration,

    /// Dead-lettered jobs kept for inspection.
    pub dead_letter_capacity: usize,

    pub rate_limits: RateLimitConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            workers: None,
            queue_capacity: 1024,
            enqueue_timeout: Duration::from_millis(100),
            max_retries: 3,
            retry_delay: Duration::from_secs(30),
            delivery_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
            dead_letter_capacity: 256,
            rate_limits: RateLimitConfig::default(),
        }
    }
}

impl NotificationConfig {
    /// Resolved worker count.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
    }

    pub fn validate(&self) -> Result<(), NotifyError> {
        if self.workers == Some(0) {
            return Err(NotifyError::Configuration(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(NotifyError::Configuration(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.delivery_timeout.is_zero() {
            return Err(NotifyError::Configuration(
                "delivery_timeout must be greater than zero".to_string(),
            ));
        }
        for task_type in TaskType::ALL {
            if self.rate_limits.per_hour(task_type) == 0 {
                return Err(NotifyError::Configuration(format!(
                    "rate_limits.{task_type} must be at least 1"
                )));
            }
        }
        Ok(())
    }
}

/// Hourly notification budget per task type.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub water: u32,
    pub fertilizer: u32,
    pub composting: u32,
    pub pruning: u32,
    pub pest_control: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            water: 100,
            fertilizer: 50,
            composting: 30,
            pruning: 30,
            pest_control: 20,
        }
    }
}

impl RateLimitConfig {
    pub const fn per_hour(&self, task_type: TaskType) -> u32 {
        match task_type {
            TaskType::Water => self.water,
            TaskType::Fertilizer => self.fertilizer,
            TaskType::Composting => self.composting,
            TaskType::Pruning => self.pruning,
            TaskType::PestControl => self.pest_control,
        }
    }
}
