use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::error::DeliveryError;
use crate::job::NotificationJob;

/// Outbound delivery channel for reminders.
///
/// Implementations own the transport (push gateway, mail relay, webhook
/// client). A sink must be safe to call from several workers at once.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, job: &NotificationJob) -> Result<(), DeliveryError>;
}

/// Sink that writes each reminder to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, job: &NotificationJob) -> Result<(), DeliveryError> {
        info!(
            task_id = %job.task_id,
            crop_id = %job.crop_id,
            task_type = %job.task_type,
            channel = %job.channel,
            occurrence = %job.occurrence,
            attempt = job.retry_count + 1,
            "maintenance reminder"
        );
        Ok(())
    }
}

/// Sink that records deliveries in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<NotificationJob>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<NotificationJob> {
        self.delivered.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.delivered.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn deliver(&self, job: &NotificationJob) -> Result<(), DeliveryError> {
        self.delivered.lock().push(job.clone());
        Ok(())
    }
}
