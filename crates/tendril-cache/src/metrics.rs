//! Cache operation metrics.
//!
//! Counters are owned by the cache instance so isolated instances (and tests)
//! never share state. Every recording is mirrored to the `metrics` facade,
//! which is a no-op unless the process installs a recorder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, histogram};

/// Kind of cache operation being measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    Get,
    Set,
    Delete,
    Health,
}

impl CacheOp {
    pub const ALL: [Self; 4] = [Self::Get, Self::Set, Self::Delete, Self::Health];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Health => "health",
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Get => 0,
            Self::Set => 1,
            Self::Delete => 2,
            Self::Health => 3,
        }
    }
}

#[derive(Debug, Default)]
struct OpCounters {
    calls: AtomicU64,
    errors: AtomicU64,
    total_micros: AtomicU64,
}

/// Instance-owned cache metrics.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    ops: [OpCounters; 4],
    hits: AtomicU64,
    misses: AtomicU64,
    retries: AtomicU64,
    rejected: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, op: CacheOp, latency: Duration, error_type: Option<&'static str>) {
        let counters = &self.ops[op.index()];
        counters.calls.fetch_add(1, Ordering::Relaxed);
        counters.total_micros.fetch_add(
            u64::try_from(latency.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );

        histogram!("tendril.cache.operation.duration", "op" => op.as_str())
            .record(latency.as_secs_f64());

        if let Some(error_type) = error_type {
            counters.errors.fetch_add(1, Ordering::Relaxed);
            counter!(
                "tendril.cache.errors",
                "op" => op.as_str(),
                "error_type" => error_type
            )
            .increment(1);
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!("tendril.cache.hits").increment(1);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!("tendril.cache.misses").increment(1);
    }

    pub fn record_retry(&self, op: CacheOp) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        counter!("tendril.cache.retries", "op" => op.as_str()).increment(1);
    }

    /// A call rejected by the open circuit breaker.
    pub fn record_rejected(&self, op: CacheOp) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        counter!("tendril.cache.rejected", "op" => op.as_str()).increment(1);
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        let ops = CacheOp::ALL.map(|op| {
            let c = &self.ops[op.index()];
            OpSnapshot {
                op,
                calls: c.calls.load(Ordering::Relaxed),
                errors: c.errors.load(Ordering::Relaxed),
                total_latency: Duration::from_micros(c.total_micros.load(Ordering::Relaxed)),
            }
        });

        CacheMetricsSnapshot {
            ops,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpSnapshot {
    pub op: CacheOp,
    pub calls: u64,
    pub errors: u64,
    pub total_latency: Duration,
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub ops: [OpSnapshot; 4],
    pub hits: u64,
    pub misses: u64,
    pub retries: u64,
    pub rejected: u64,
}

impl CacheMetricsSnapshot {
    pub fn op(&self, op: CacheOp) -> &OpSnapshot {
        &self.ops[op.index()]
    }
}
