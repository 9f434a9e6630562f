//! Caller-facing error taxonomy for schedule operations.

use std::fmt;

use thiserror::Error;

use crate::types::TaskId;

/// External dependency that failed while an operation was in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// The AI recommendation service.
    Advisor,
    /// The key-value cache.
    Cache,
    /// The notification dispatcher.
    Notifications,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Advisor => write!(f, "advisor"),
            Self::Cache => write!(f, "cache"),
            Self::Notifications => write!(f, "notifications"),
        }
    }
}

/// Errors returned by schedule operations.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Bad task-type/unit/time-window combination. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No task exists with the given id.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// A concurrent writer changed the task between load and save.
    #[error("concurrent update conflict on task {0}")]
    Conflict(TaskId),

    /// A recoverable dependency failure. Callers degrade instead of failing.
    #[error("{dependency} unavailable: {message}")]
    Dependency {
        /// Which dependency failed.
        dependency: Dependency,
        /// Error message.
        message: String,
    },

    /// Persistence failure. Always surfaced to the caller.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl ScheduleError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a dependency error.
    pub fn dependency(dependency: Dependency, message: impl Into<String>) -> Self {
        Self::Dependency {
            dependency,
            message: message.into(),
        }
    }

    /// Create a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Stable label for logs and metrics.
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Dependency { .. } => "dependency",
            Self::Fatal(_) => "fatal",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    ///
    /// Conflicts resolve once the competing writer finishes; dependency
    /// failures may clear up. Validation and not-found errors never do.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Dependency { .. })
    }
}

/// Result type for schedule operations.
pub type ScheduleResult<T> = Result<T, ScheduleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_types_are_stable() {
        assert_eq!(ScheduleError::validation("x").error_type(), "validation");
        assert_eq!(
            ScheduleError::NotFound(TaskId::new("t1")).error_type(),
            "not_found"
        );
        assert_eq!(
            ScheduleError::dependency(Dependency::Cache, "down").error_type(),
            "dependency"
        );
        assert_eq!(ScheduleError::fatal("disk").error_type(), "fatal");
    }

    #[test]
    fn only_conflicts_and_dependencies_are_retryable() {
        assert!(ScheduleError::Conflict(TaskId::new("t1")).is_retryable());
        assert!(ScheduleError::dependency(Dependency::Advisor, "timeout").is_retryable());
        assert!(!ScheduleError::validation("bad unit").is_retryable());
        assert!(!ScheduleError::fatal("store down").is_retryable());
    }

    #[test]
    fn dependency_display_names_the_dependency() {
        let err = ScheduleError::dependency(Dependency::Advisor, "timed out");
        assert_eq!(err.to_string(), "advisor unavailable: timed out");
    }
}
