//! Fault-tolerant key-value cache for tendril.
//!
//! The cache holds task snapshots and advisor recommendations. It is never
//! the source of truth: every operation returns a [`CacheError`] on failure
//! instead of blocking or panicking, and callers fall back to persistence.
//!
//! # Backends
//!
//! - `memory` (always available): in-process map with TTL expiry
//! - `valkey` (feature, default on): Valkey/Redis via a deadpool pool

pub mod breaker;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod traits;

#[cfg(feature = "valkey")]
pub mod valkey;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use client::ResilientCache;
pub use codec::PayloadCodec;
pub use config::{CacheConfig, KvConfig, RetryConfig};
pub use error::{CacheError, KvError};
pub use memory::MemoryKv;
pub use metrics::{CacheMetricsSnapshot, CacheOp};
pub use traits::KvBackend;

#[cfg(feature = "valkey")]
pub use valkey::ValkeyKv;
