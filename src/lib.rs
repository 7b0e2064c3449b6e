//! # fn-cache
//!
//! A function-result cache: wrap a procedure (blocking or suspending) so
//! that repeated invocations with equivalent arguments reuse a previously
//! computed result until it expires, is evicted, or is invalidated.
//!
//! ## Features
//!
//! - **Two disciplines**: TTL expiry and bounded LRU (optionally layered
//!   with TTL)
//! - **Two tiers**: process-local in-memory storage, or a shared Redis
//!   server behind the same interface
//! - **O(1) bulk invalidation**: version counters are embedded in every
//!   key, so bumping a counter invalidates everything that embedded the
//!   old value without touching the data
//! - **Per-user invalidation**: an argument can be declared the user id,
//!   giving each user an independent version counter
//! - **Singleflight**: concurrent callers with the same key share one
//!   execution of the underlying procedure
//! - **Cache warming**: register a preload provider and prime every cache
//!   with [`preload_all`]
//! - **Global switch**: [`disable_global_cache`] short-circuits every
//!   cache in the process at once
//! - **Observability**: per-cache hit/miss/set/delete/error counters with
//!   a running latency mean, and an on-demand memory footprint report
//!
//! ## Quick start
//!
//! ```
//! use fn_cache::CachedBuilder;
//!
//! let user_name = CachedBuilder::<u64, String>::new("app::user_name")
//!     .ttl_seconds(300)
//!     .build(|id: u64| {
//!         // stand-in for a slow lookup
//!         format!("user_{id}")
//!     })
//!     .unwrap();
//!
//! assert_eq!(user_name.call(42), "user_42");
//! assert_eq!(user_name.call(42), "user_42"); // served from cache
//! assert_eq!(user_name.stats().hits, 1);
//! ```
//!
//! Suspending procedures use [`CachedBuilder::build_async`]; the manager
//! behind any wrapper is reachable through `manager()` for direct
//! get/set/delete/invalidate access.
//!
//! ## Module organization
//!
//! - [`cached`] - the invocation wrapper and its builder
//! - [`manager`] - the cache manager binding storage, serializer, versions
//!   and statistics
//! - [`storage`] - the storage contract and the TTL, LRU and Redis
//!   backends
//! - [`key`] - deterministic key derivation
//! - [`serializer`] - the four payload codecs
//! - [`stats_registry`] - process-wide statistics access
//! - [`memory_monitor`] - memory usage reports and the background sampler

mod cached;
mod config;
mod entry;
mod error;
mod key;
mod manager;
mod registry;
mod serializer;
mod stats;
mod version;

pub mod memory_monitor;
pub mod stats_registry;
pub mod storage;

use std::collections::HashMap;

pub use cached::{
    CachedAsyncFn, CachedBuilder, CachedFn, CallOptions, PreloadProvider, TtlFn,
};
pub use config::{
    CacheConfig, CachePolicy, RedisSettings, StorageBackend, DEFAULT_PREFIX, GLOBAL_VERSION_KEY,
    USER_VERSION_KEY_TEMPLATE,
};
pub use error::{CacheError, CacheResult};
pub use key::{DerivedKey, KeyBuilder, KeyFn};
pub use manager::UniversalCacheManager;
pub use memory_monitor::{
    get_memory_usage, start_memory_monitoring, stop_memory_monitoring, MemoryUsage,
};
pub use registry::{
    disable_global_cache, enable_global_cache, invalidate_all, invalidate_user,
    is_global_cache_enabled, preload_all,
};
pub use serializer::SerializerKind;
pub use stats::{CacheStats, StatsSnapshot};

/// Snapshots of every registered cache's statistics, keyed by cache name.
pub fn get_statistics() -> HashMap<String, StatsSnapshot> {
    stats_registry::get_all()
}

/// Snapshot of one cache's statistics.
pub fn get_statistics_for(name: &str) -> Option<StatsSnapshot> {
    stats_registry::get(name)
}

/// Resets the statistics of every registered cache.
pub fn reset_statistics() {
    stats_registry::reset_all()
}
