use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by [`ResilientCache`](crate::ResilientCache).
///
/// Every failure mode of the cache is a value of this type; callers branch on
/// it and fall back to the source of truth.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Circuit breaker open")]
    CircuitOpen,

    #[error("Cache client closed")]
    Closed,

    #[error("Operation timed out")]
    Timeout,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),

    #[error("Serialisation error: {0}")]
    Serialisation(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    /// Transient failures worth another attempt.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection(_) | Self::Backend(_))
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::CircuitOpen => "circuit_open",
            Self::Closed => "closed",
            Self::Timeout => "timeout",
            Self::Connection(_) => "connection",
            Self::Backend(_) => "backend",
            Self::InvalidValue(_) => "invalid_value",
            Self::Serialisation(_) => "serialisation",
            Self::Codec(_) => "codec",
            Self::Configuration(_) => "configuration",
        }
    }
}

impl From<KvError> for CacheError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::Connection(msg) => Self::Connection(msg),
            KvError::Timeout => Self::Timeout,
            KvError::InvalidValue(msg) => Self::InvalidValue(msg),
            KvError::Backend(msg) => Self::Backend(msg),
        }
    }
}
