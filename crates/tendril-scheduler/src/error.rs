//! Error types for the scheduler service and its collaborators.

use tendril_core::{Dependency, ScheduleError, TaskId};
use thiserror::Error;

/// Errors returned by a [`TaskStore`](crate::store::TaskStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored version differs from the one the caller loaded.
    #[error("version conflict on task {id}: expected {expected}, found {found}")]
    Conflict {
        id: TaskId,
        expected: u64,
        found: u64,
    },

    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be encoded or decoded.
    #[error("serialisation error: {0}")]
    Serialisation(String),
}

impl StoreError {
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => "conflict",
            Self::Unavailable(_) => "unavailable",
            Self::Serialisation(_) => "serialisation",
        }
    }
}

impl From<StoreError> for ScheduleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { id, .. } => Self::Conflict(id),
            other => Self::fatal(other.to_string()),
        }
    }
}

/// Errors from a recommendation backend.
#[derive(Debug, Error)]
pub enum AdvisorError {
    /// The advisor did not answer within the attempt timeout.
    #[error("advisor request timed out")]
    Timeout,

    /// Network or protocol failure.
    #[error("advisor transport error: {0}")]
    Transport(String),

    /// The advisor answered with a non-success status.
    #[error("advisor returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// The advisor answered with a body we cannot use.
    #[error("invalid advisor response: {0}")]
    InvalidResponse(String),

    /// Recommendations are turned off in configuration.
    #[error("advisor disabled")]
    Disabled,
}

impl AdvisorError {
    /// Whether another attempt may succeed.
    ///
    /// Server-side statuses and rate limiting are retried; other client
    /// errors are not.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::InvalidResponse(_) | Self::Disabled => false,
        }
    }

    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transport(_) => "transport",
            Self::Status { .. } => "status",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Disabled => "disabled",
        }
    }
}

impl From<AdvisorError> for ScheduleError {
    fn from(err: AdvisorError) -> Self {
        Self::dependency(Dependency::Advisor, err.to_string())
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or parsed.
    #[error("failed to load configuration: {0}")]
    Load(String),

    /// A value was parsed but makes no sense.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
