use thiserror::Error;

/// Errors returned by the notification manager.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The queue stayed full for the whole enqueue wait.
    #[error("notification queue is full")]
    QueueFull,

    #[error("notification manager is shutting down")]
    ShuttingDown,

    /// Workers did not drain within the shutdown timeout and were aborted.
    #[error("shutdown timed out, {aborted} workers aborted")]
    ShutdownTimeout { aborted: usize },

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl NotifyError {
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::ShuttingDown => "shutting_down",
            Self::ShutdownTimeout { .. } => "shutdown_timeout",
            Self::Configuration(_) => "configuration",
        }
    }
}

/// Errors returned by a [`NotificationSink`](crate::NotificationSink).
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("delivery timed out")]
    Timeout,

    /// Transient transport failure; the job is retried.
    #[error("transport error: {0}")]
    Transport(String),

    /// The sink refused the job outright; retrying will not help.
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

impl DeliveryError {
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transport(_))
    }
}

pub type NotifyResult<T> = Result<T, NotifyError>;
