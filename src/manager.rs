//! The cache manager.
//!
//! A manager binds one storage, one serializer, a key prefix, the version
//! registry, and a statistics block into a single object. All key rewriting
//! (prefix + version counters) happens here; storages only ever see the
//! final physical key.
//!
//! # Error policy
//!
//! No failure inside the engine may deprive the caller of a correct result:
//! a failing `get` is a miss, a failing `set` or `delete` still reports
//! success (the data is simply not cached), and every failure increments
//! the error counter and emits one log line.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{CacheConfig, CachePolicy, StorageBackend};
use crate::error::{CacheError, CacheResult};
use crate::key::escape;
use crate::memory_monitor::MemoryUsage;
use crate::registry;
use crate::stats::CacheStats;
use crate::stats_registry;
use crate::storage::{CacheStorage, LruStorage, RedisStorage, TtlStorage};
use crate::version::VersionRegistry;

/// A cache manager over one storage backend.
///
/// Every operation exists in a suspending form and, for in-memory backends,
/// a blocking `_sync` form. On the Redis backend the blocking forms degrade
/// to miss/no-op because the underlying client is network-bound.
///
/// Managers register themselves with the process-wide registry at
/// construction, which makes them reachable by [`preload_all`],
/// [`invalidate_all`] and the memory monitor, and subject to the global
/// on/off flag.
///
/// [`preload_all`]: crate::preload_all
/// [`invalidate_all`]: crate::invalidate_all
///
/// # Examples
///
/// ```
/// use fn_cache::{CacheConfig, UniversalCacheManager};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let manager = UniversalCacheManager::new(CacheConfig::default()).unwrap();
/// manager.set("greeting", &"hello".to_string(), None, None).await;
/// let value: Option<String> = manager.get("greeting", None).await;
/// assert_eq!(value, Some("hello".to_string()));
/// # }
/// ```
pub struct UniversalCacheManager {
    config: CacheConfig,
    storage: Arc<dyn CacheStorage>,
    versions: VersionRegistry,
    stats: Arc<CacheStats>,
}

impl std::fmt::Debug for UniversalCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniversalCacheManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl UniversalCacheManager {
    /// Builds a manager and registers it with the global registry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] for incompatible options (zero LRU
    /// capacity, Redis backend without settings). The Redis connection
    /// itself is established lazily, so an unreachable server is a
    /// transport error at call time, not a construction error.
    pub fn new(config: CacheConfig) -> CacheResult<Arc<Self>> {
        config.validate()?;

        let storage: Arc<dyn CacheStorage> = match config.backend {
            StorageBackend::Memory => match config.policy {
                CachePolicy::Ttl => Arc::new(TtlStorage::new()),
                CachePolicy::Lru => Arc::new(LruStorage::new(config.max_entries)),
            },
            StorageBackend::Redis => {
                let settings = config
                    .redis
                    .clone()
                    .ok_or_else(|| CacheError::Config("missing redis settings".into()))?;
                Arc::new(RedisStorage::new(settings, config.prefix.clone()))
            }
        };

        let versions = VersionRegistry::new(
            Arc::clone(&storage),
            config.global_version_key.clone(),
            config.user_version_key_template.clone(),
        );
        let stats = Arc::new(CacheStats::new());
        stats_registry::register(&config.name, Arc::clone(&stats));

        let manager = Arc::new(Self {
            config,
            storage,
            versions,
            stats,
        });
        registry::register_manager(&manager);
        Ok(manager)
    }

    /// Looks up `key`, rewritten with the current version counters.
    ///
    /// Returns `None` on a miss, on expiry, when the global flag is off,
    /// and on any storage or decode failure. An entry whose bytes no
    /// longer decode (codec drift across process versions) is deleted so
    /// it cannot keep failing, and counts as one error.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, user_id: Option<&str>) -> Option<T> {
        if !registry::is_global_cache_enabled() {
            return None;
        }
        let started = Instant::now();
        let physical = self.versioned_key(key, user_id).await;
        let found = match self.storage.get(&physical).await {
            Ok(Some(bytes)) => match self.config.serializer.decode::<T>(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(cache = %self.config.name, key = %physical, error = %e,
                        "dropping undecodable cache entry");
                    self.stats.record_error();
                    let _ = self.storage.delete(&physical).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(cache = %self.config.name, key = %physical, error = %e, "cache get failed");
                self.stats.record_error();
                None
            }
        };
        self.finish_lookup(found.is_some(), started);
        found
    }

    /// Stores `value` under `key`, rewritten with the current version
    /// counters.
    ///
    /// `ttl` of `None` applies the configured default; zero stores without
    /// expiry; a negative TTL (from a dynamic-TTL function) makes the store
    /// a no-op. Returns false only when the value could not be serialized;
    /// storage failures are logged and dropped.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<i64>,
        user_id: Option<&str>,
    ) -> bool {
        if !registry::is_global_cache_enabled() {
            return false;
        }
        let expiry = match self.effective_ttl(ttl) {
            Some(expiry) => expiry,
            None => return true, // dynamic TTL vetoed caching this value
        };
        let started = Instant::now();
        let bytes = match self.config.serializer.encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(cache = %self.config.name, key, error = %e, "cache value not encodable");
                self.stats.record_error();
                return false;
            }
        };
        let physical = self.versioned_key(key, user_id).await;
        match self.storage.set(&physical, bytes, expiry).await {
            Ok(()) => self.stats.record_set(),
            Err(e) => {
                warn!(cache = %self.config.name, key = %physical, error = %e, "cache set failed");
                self.stats.record_error();
            }
        }
        self.stats.record_latency(started.elapsed());
        true
    }

    /// Deletes `key`, rewritten with the current version counters.
    /// Idempotent; storage failures are logged and swallowed.
    pub async fn delete(&self, key: &str, user_id: Option<&str>) -> bool {
        let started = Instant::now();
        let physical = self.versioned_key(key, user_id).await;
        match self.storage.delete(&physical).await {
            Ok(()) => self.stats.record_delete(),
            Err(e) => {
                warn!(cache = %self.config.name, key = %physical, error = %e, "cache delete failed");
                self.stats.record_error();
            }
        }
        self.stats.record_latency(started.elapsed());
        true
    }

    /// Bumps the global version counter, logically invalidating every key
    /// in O(1). Returns the new version, or `None` when the counter could
    /// not be moved.
    pub async fn increment_global_version(&self) -> Option<i64> {
        match self.versions.bump_global().await {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(cache = %self.config.name, error = %e, "global version bump failed");
                self.stats.record_error();
                None
            }
        }
    }

    /// Bumps one user's version counter.
    pub async fn increment_user_version(&self, user_id: &str) -> Option<i64> {
        match self.versions.bump_user(user_id).await {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(cache = %self.config.name, user_id, error = %e, "user version bump failed");
                self.stats.record_error();
                None
            }
        }
    }

    /// Logically invalidates every entry of this cache (global version
    /// bump).
    pub async fn invalidate_all(&self) {
        self.increment_global_version().await;
    }

    /// Logically invalidates every entry cached for one user.
    pub async fn invalidate_user(&self, user_id: &str) {
        self.increment_user_version(user_id).await;
    }

    /// Physically purges the storage. On Redis only this cache's prefix is
    /// touched.
    pub async fn clear(&self) -> bool {
        match self.storage.clear().await {
            Ok(()) => true,
            Err(e) => {
                warn!(cache = %self.config.name, error = %e, "cache clear failed");
                self.stats.record_error();
                false
            }
        }
    }

    /// Blocking counterpart of [`get`](Self::get). On the Redis backend
    /// this logs once at debug level and reports a miss.
    pub fn get_sync<T: DeserializeOwned>(&self, key: &str, user_id: Option<&str>) -> Option<T> {
        if !registry::is_global_cache_enabled() {
            return None;
        }
        let started = Instant::now();
        let physical = self.versioned_key_sync(key, user_id);
        let found = match self.storage.get_sync(&physical) {
            Ok(Some(bytes)) => match self.config.serializer.decode::<T>(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(cache = %self.config.name, key = %physical, error = %e,
                        "dropping undecodable cache entry");
                    self.stats.record_error();
                    let _ = self.storage.delete_sync(&physical);
                    None
                }
            },
            Ok(None) => None,
            Err(CacheError::Unsupported(what)) => {
                debug!(cache = %self.config.name, "{what} unavailable, skipping cache read");
                None
            }
            Err(e) => {
                warn!(cache = %self.config.name, key = %physical, error = %e, "cache get failed");
                self.stats.record_error();
                None
            }
        };
        self.finish_lookup(found.is_some(), started);
        found
    }

    /// Blocking counterpart of [`set`](Self::set).
    pub fn set_sync<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<i64>,
        user_id: Option<&str>,
    ) -> bool {
        if !registry::is_global_cache_enabled() {
            return false;
        }
        let expiry = match self.effective_ttl(ttl) {
            Some(expiry) => expiry,
            None => return true,
        };
        let started = Instant::now();
        let bytes = match self.config.serializer.encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(cache = %self.config.name, key, error = %e, "cache value not encodable");
                self.stats.record_error();
                return false;
            }
        };
        let physical = self.versioned_key_sync(key, user_id);
        match self.storage.set_sync(&physical, bytes, expiry) {
            Ok(()) => self.stats.record_set(),
            Err(CacheError::Unsupported(what)) => {
                debug!(cache = %self.config.name, "{what} unavailable, skipping cache write");
            }
            Err(e) => {
                warn!(cache = %self.config.name, key = %physical, error = %e, "cache set failed");
                self.stats.record_error();
            }
        }
        self.stats.record_latency(started.elapsed());
        true
    }

    /// Blocking counterpart of [`delete`](Self::delete).
    pub fn delete_sync(&self, key: &str, user_id: Option<&str>) -> bool {
        let started = Instant::now();
        let physical = self.versioned_key_sync(key, user_id);
        match self.storage.delete_sync(&physical) {
            Ok(()) => self.stats.record_delete(),
            Err(CacheError::Unsupported(what)) => {
                debug!(cache = %self.config.name, "{what} unavailable, skipping cache delete");
            }
            Err(e) => {
                warn!(cache = %self.config.name, key = %physical, error = %e, "cache delete failed");
                self.stats.record_error();
            }
        }
        self.stats.record_latency(started.elapsed());
        true
    }

    /// Blocking counterpart of [`clear`](Self::clear).
    pub fn clear_sync(&self) -> bool {
        match self.storage.clear_sync() {
            Ok(()) => true,
            Err(CacheError::Unsupported(what)) => {
                debug!(cache = %self.config.name, "{what} unavailable, skipping cache clear");
                false
            }
            Err(e) => {
                warn!(cache = %self.config.name, error = %e, "cache clear failed");
                self.stats.record_error();
                false
            }
        }
    }

    /// Blocking counterpart of [`increment_global_version`](Self::increment_global_version).
    pub fn increment_global_version_sync(&self) -> Option<i64> {
        match self.versions.bump_global_sync() {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(cache = %self.config.name, error = %e, "global version bump failed");
                self.stats.record_error();
                None
            }
        }
    }

    /// Blocking counterpart of [`increment_user_version`](Self::increment_user_version).
    pub fn increment_user_version_sync(&self, user_id: &str) -> Option<i64> {
        match self.versions.bump_user_sync(user_id) {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(cache = %self.config.name, user_id, error = %e, "user version bump failed");
                self.stats.record_error();
                None
            }
        }
    }

    pub fn invalidate_all_sync(&self) {
        self.increment_global_version_sync();
    }

    pub fn invalidate_user_sync(&self, user_id: &str) {
        self.increment_user_version_sync(user_id);
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Current memory footprint report for the monitor. External backends
    /// report unknown entry counts and sizes.
    pub fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage {
            manager: self.config.name.clone(),
            backend: self.config.backend,
            policy: self.config.policy,
            entries: self.storage.entry_count(),
            approx_bytes: self.storage.estimated_bytes(),
            capacity: self.storage.capacity(),
            evictions: self.storage.eviction_count(),
        }
    }

    /// Composes the physical storage key:
    /// `<prefix><key>@g<global>[@u<user>:<user-version>]`.
    async fn versioned_key(&self, key: &str, user_id: Option<&str>) -> String {
        let global = self.versions.global_version().await;
        let mut physical = format!("{}{}@g{}", self.config.prefix, key, global);
        if let Some(user_id) = user_id {
            let user_version = self.versions.user_version(user_id).await;
            physical.push_str(&format!("@u{}:{}", escape(user_id), user_version));
        }
        physical
    }

    fn versioned_key_sync(&self, key: &str, user_id: Option<&str>) -> String {
        let global = self.versions.global_version_sync();
        let mut physical = format!("{}{}@g{}", self.config.prefix, key, global);
        if let Some(user_id) = user_id {
            let user_version = self.versions.user_version_sync(user_id);
            physical.push_str(&format!("@u{}:{}", escape(user_id), user_version));
        }
        physical
    }

    fn finish_lookup(&self, hit: bool, started: Instant) {
        if hit {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        self.stats.record_latency(started.elapsed());
    }

    /// Resolves a caller TTL into a storage expiry.
    ///
    /// `None` means "do not store at all" (negative dynamic TTL);
    /// `Some(None)` stores without expiry; `Some(Some(d))` expires after
    /// `d`.
    fn effective_ttl(&self, ttl: Option<i64>) -> Option<Option<Duration>> {
        let seconds = ttl.unwrap_or(self.config.ttl_seconds as i64);
        match seconds {
            s if s < 0 => None,
            0 => Some(None),
            s => Some(Some(Duration::from_secs(s as u64))),
        }
    }
}
