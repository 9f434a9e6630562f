//! Retry delay strategies.
//!
//! Retry loops take a [`Backoff`] value instead of sleeping a hard-coded
//! amount, so tests can run them with [`Backoff::None`].

use std::time::Duration;

/// Delay to wait before a retry attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// The same delay before every retry.
    Fixed(Duration),
    /// `attempt * base` before retry number `attempt` (1-based).
    Linear(Duration),
}

impl Backoff {
    /// Delay before retry number `attempt`, counting from 1.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed(delay) => *delay,
            Self::Linear(base) => base.saturating_mul(attempt.max(1)),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Linear(Duration::from_millis(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_grows_with_attempt() {
        let backoff = Backoff::Linear(Duration::from_millis(50));
        assert_eq!(backoff.delay(1), Duration::from_millis(50));
        assert_eq!(backoff.delay(3), Duration::from_millis(150));
        // Attempt zero is treated as the first retry.
        assert_eq!(backoff.delay(0), Duration::from_millis(50));
    }

    #[test]
    fn fixed_and_none() {
        assert_eq!(Backoff::Fixed(Duration::from_secs(2)).delay(7), Duration::from_secs(2));
        assert_eq!(Backoff::None.delay(4), Duration::ZERO);
    }
}
