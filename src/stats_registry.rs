//! Global registry of per-cache statistics.
//!
//! Every manager registers its [`CacheStats`] under its cache name at
//! construction, so statistics can be queried process-wide without a handle
//! to the individual cache.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::stats::{CacheStats, StatsSnapshot};

static STATS_REGISTRY: Lazy<RwLock<HashMap<String, Arc<CacheStats>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers a cache's statistics under a name. Called by the manager at
/// construction; a later registration under the same name replaces the
/// earlier one.
pub(crate) fn register(name: &str, stats: Arc<CacheStats>) {
    STATS_REGISTRY.write().insert(name.to_string(), stats);
}

/// Snapshot of one cache's statistics, or `None` when no cache with that
/// name was registered.
pub fn get(name: &str) -> Option<StatsSnapshot> {
    STATS_REGISTRY.read().get(name).map(|stats| stats.snapshot())
}

/// Snapshots of every registered cache, keyed by cache name.
pub fn get_all() -> HashMap<String, StatsSnapshot> {
    STATS_REGISTRY
        .read()
        .iter()
        .map(|(name, stats)| (name.clone(), stats.snapshot()))
        .collect()
}

/// Names of all registered caches.
pub fn list() -> Vec<String> {
    STATS_REGISTRY.read().keys().cloned().collect()
}

/// Resets the counters of one cache. Returns false when the name is
/// unknown.
pub fn reset(name: &str) -> bool {
    match STATS_REGISTRY.read().get(name) {
        Some(stats) => {
            stats.reset();
            true
        }
        None => false,
    }
}

/// Resets the counters of every registered cache.
pub fn reset_all() {
    for stats in STATS_REGISTRY.read().values() {
        stats.reset();
    }
}
