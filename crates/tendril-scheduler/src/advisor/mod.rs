//! AI recommendations for new and updated schedules.
//!
//! The service asks a [`RecommendationClient`] for advice on every create and
//! update. The client caches answers under a fingerprint of the task context,
//! retries transient failures, and gives up after a deadline so a slow
//! advisor never blocks scheduling.

mod client;
mod http;

pub use client::RecommendationClient;
pub use http::HttpAdvisor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tendril_core::{Frequency, MaintenanceTask, PreferredTime, ScheduleRequest, TaskType, Unit};

use crate::error::AdvisorError;

/// Remote source of recommendations.
#[async_trait]
pub trait AdvisorBackend: Send + Sync {
    async fn recommend(&self, context: &TaskContext) -> Result<Recommendation, AdvisorError>;
}

/// What the advisor is asked about.
///
/// Amount and preferred time are what the advisor answers with, so they are
/// not part of the question. A task keeps the same context, and therefore the
/// same cache key, however its amount and time were chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    pub crop_id: String,
    pub task_type: TaskType,
    pub frequency: Frequency,
    pub unit: Unit,
}

impl TaskContext {
    pub fn from_request(request: &ScheduleRequest) -> Self {
        Self {
            crop_id: request.crop_id.clone(),
            task_type: request.task_type,
            frequency: request.frequency,
            unit: request.unit,
        }
    }

    pub fn from_task(task: &MaintenanceTask) -> Self {
        Self {
            crop_id: task.crop_id.clone(),
            task_type: task.task_type,
            frequency: task.frequency,
            unit: task.unit,
        }
    }

    /// Hex SHA-256 of the context's JSON form.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&json))
    }

    /// Cache key for recommendations about this context.
    pub fn cache_key(&self) -> String {
        format!("rec:{}", self.fingerprint())
    }
}

/// Advice returned by the advisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    /// Suggested amount in the task's unit.
    #[serde(default)]
    pub amount: Option<f64>,
    /// Suggested time of day, `HH:MM`.
    #[serde(default)]
    pub timing: Option<String>,
    /// 0.0 to 1.0.
    pub confidence: f64,
}

impl Recommendation {
    /// Reject answers that cannot be applied to any task.
    pub fn validate(&self) -> Result<(), AdvisorError> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(AdvisorError::InvalidResponse(format!(
                "confidence must be in [0, 1], got {}",
                self.confidence
            )));
        }
        if let Some(amount) = self.amount {
            if !amount.is_finite() || amount <= 0.0 {
                return Err(AdvisorError::InvalidResponse(format!(
                    "amount must be positive, got {amount}"
                )));
            }
        }
        Ok(())
    }

    /// Suggested preferred time, if it parses and lies in daylight hours.
    pub fn preferred_time(&self) -> Option<PreferredTime> {
        self.timing
            .as_deref()
            .and_then(|timing| PreferredTime::parse(timing).ok())
            .filter(PreferredTime::is_daylight)
    }
}
