//! Reminder dispatch for tendril.
//!
//! [`NotificationManager`] turns "task is due" events into deliveries through
//! a [`NotificationSink`]. It runs a fixed pool of workers over a bounded
//! queue, limits dispatches per task type per hour, retries transient
//! failures with a fixed delay, and dead-letters jobs that run out of retries.

pub mod config;
pub mod error;
pub mod job;
pub mod limiter;
pub mod manager;
pub mod queue;
pub mod sink;
mod stats;
mod worker;

pub use config::{NotificationConfig, RateLimitConfig};
pub use error::{DeliveryError, NotifyError, NotifyResult};
pub use job::{DeadLetter, JobKey, JobState, NotificationJob};
pub use limiter::{RateLimitPolicy, TaskTypeLimiter, Unlimited};
pub use manager::NotificationManager;
pub use sink::{LogSink, MemorySink, NotificationSink};
pub use stats::StatsSnapshot;
