//! Storage backends.
//!
//! A storage persists serialized payloads by string key and honors a
//! per-entry TTL. Two in-memory disciplines (TTL and LRU) and a Redis
//! adapter are provided; the manager never touches payload bytes itself.

mod memory_lru;
mod memory_ttl;
mod redis;

pub use memory_lru::LruStorage;
pub use memory_ttl::TtlStorage;
pub use self::redis::RedisStorage;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;

/// The uniform contract every backend implements.
///
/// Each operation exists in a suspending form and a blocking `_sync` form.
/// In-memory backends support both; the Redis backend is network-bound and
/// answers every `_sync` call with [`CacheError::Unsupported`]
/// (the manager degrades that to a miss or no-op).
///
/// A `ttl` of `None` means "no expiry". Keys are opaque strings; values are
/// opaque byte strings produced by the configured serializer.
///
/// [`CacheError::Unsupported`]: crate::CacheError::Unsupported
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Returns the stored payload if present and not expired.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Writes a payload, overwriting any previous entry under the key.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()>;

    /// Removes the entry if present. Idempotent.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Removes every entry this storage owns. The Redis backend scopes the
    /// purge to its key prefix and never flushes the whole server.
    async fn clear(&self) -> CacheResult<()>;

    /// Atomically adds `delta` to the integer stored under `key` (creating
    /// it at zero first) and returns the new value. Backs the version
    /// counters.
    async fn incr(&self, key: &str, delta: i64) -> CacheResult<i64>;

    fn get_sync(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;
    fn set_sync(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()>;
    fn delete_sync(&self, key: &str) -> CacheResult<()>;
    fn clear_sync(&self) -> CacheResult<()>;
    fn incr_sync(&self, key: &str, delta: i64) -> CacheResult<i64>;

    /// Number of live entries, when the backend can answer cheaply.
    fn entry_count(&self) -> Option<usize> {
        None
    }

    /// Approximate byte footprint of keys and payloads.
    fn estimated_bytes(&self) -> Option<usize> {
        None
    }

    /// Configured capacity, for bounded backends.
    fn capacity(&self) -> Option<usize> {
        None
    }

    /// Number of capacity-driven evictions performed so far.
    fn eviction_count(&self) -> u64 {
        0
    }
}

pub(crate) fn parse_counter(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}
