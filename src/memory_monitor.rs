//! Memory usage reporting for in-memory caches.
//!
//! The monitor walks every live registered manager on demand and reports
//! entry counts and approximate byte footprints. A background sampler can
//! be started to log one summary line per tick; it runs until cancelled.

use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{CachePolicy, StorageBackend};
use crate::registry;

/// Memory footprint of one cache manager.
///
/// For external backends the engine cannot see inside the server, so
/// `entries`, `approx_bytes` and `capacity` are `None` ("unknown").
#[derive(Debug, Clone, Serialize)]
pub struct MemoryUsage {
    pub manager: String,
    pub backend: StorageBackend,
    pub policy: CachePolicy,
    pub entries: Option<usize>,
    pub approx_bytes: Option<usize>,
    pub capacity: Option<usize>,
    pub evictions: u64,
}

static SAMPLER: Lazy<Mutex<Option<JoinHandle<()>>>> = Lazy::new(|| Mutex::new(None));

/// Walks every live manager and reports its current footprint.
pub fn get_memory_usage() -> Vec<MemoryUsage> {
    registry::live_managers()
        .iter()
        .map(|manager| manager.memory_usage())
        .collect()
}

/// Starts the background sampler, replacing any previous one.
///
/// Each tick logs one summary line over all registered caches. Must be
/// called from within a tokio runtime.
pub fn start_memory_monitoring(interval: Duration) {
    let mut sampler = SAMPLER.lock();
    if let Some(previous) = sampler.take() {
        previous.abort();
    }
    *sampler = Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick of a tokio interval fires immediately; skip it so
        // every logged line covers a full interval.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let usage = get_memory_usage();
            let entries: usize = usage.iter().filter_map(|u| u.entries).sum();
            let bytes: usize = usage.iter().filter_map(|u| u.approx_bytes).sum();
            let unknown = usage.iter().filter(|u| u.entries.is_none()).count();
            info!(
                caches = usage.len(),
                entries,
                approx_bytes = bytes,
                external = unknown,
                "cache memory usage"
            );
        }
    }));
}

/// Cancels the background sampler. No-op when none is running.
pub fn stop_memory_monitoring() {
    if let Some(sampler) = SAMPLER.lock().take() {
        sampler.abort();
    }
}
