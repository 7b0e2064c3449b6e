//! Per-cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Cache statistics: operation counters plus a running mean of operation
/// latency.
///
/// Counters use atomic operations with `Relaxed` ordering for minimal
/// overhead; the latency mean is a Welford-style update under a small
/// mutex.
///
/// # Examples
///
/// ```
/// use fn_cache::CacheStats;
///
/// let stats = CacheStats::new();
/// stats.record_hit();
/// stats.record_hit();
/// stats.record_miss();
///
/// assert_eq!(stats.hits(), 2);
/// assert_eq!(stats.misses(), 1);
/// assert!((stats.hit_rate() - 0.6666).abs() < 0.001);
/// ```
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    latency: Mutex<LatencyMean>,
}

#[derive(Debug, Default, Clone, Copy)]
struct LatencyMean {
    samples: u64,
    mean_us: f64,
}

/// A point-in-time copy of one cache's statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub total_requests: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub avg_latency_us: f64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds one operation's duration into the running latency mean.
    pub fn record_latency(&self, elapsed: Duration) {
        let micros = elapsed.as_secs_f64() * 1_000_000.0;
        let mut latency = self.latency.lock();
        latency.samples += 1;
        latency.mean_us += (micros - latency.mean_us) / latency.samples as f64;
    }

    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Total lookups (hits + misses).
    #[inline]
    pub fn total_requests(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Fraction of lookups answered from cache, 0.0 when nothing was asked.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.misses() as f64 / total as f64
        }
    }

    /// Mean operation latency in microseconds.
    pub fn avg_latency_us(&self) -> f64 {
        self.latency.lock().mean_us
    }

    /// Copies every counter into an immutable snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            sets: self.sets(),
            deletes: self.deletes(),
            errors: self.errors(),
            total_requests: self.total_requests(),
            hit_rate: self.hit_rate(),
            miss_rate: self.miss_rate(),
            avg_latency_us: self.avg_latency_us(),
        }
    }

    /// Resets every counter to zero.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        *self.latency.lock() = LatencyMean::default();
    }
}
