//! In-memory TTL storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::storage::{parse_counter, CacheStorage};

/// Reap expired entries opportunistically every this many writes.
const SWEEP_EVERY: usize = 1024;

/// A mapping from key to (payload, absolute expiry instant).
///
/// Expired entries are skipped and removed lazily on read; there is no
/// background reaper. Every [`SWEEP_EVERY`]th write additionally sweeps the
/// whole map so that keys which are never read again do not accumulate.
///
/// All operations take a single `RwLock` around the backing map; reads use
/// the shared side so concurrent lookups do not block each other.
pub struct TtlStorage {
    entries: RwLock<HashMap<String, CacheEntry>>,
    writes: AtomicUsize,
    expirations: AtomicU64,
}

impl TtlStorage {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Number of entries whose expiry was observed on read or sweep.
    pub fn expiration_count(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    fn read(&self, key: &str) -> Option<Vec<u8>> {
        let expired = {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.is_expired() => true,
                Some(entry) => return Some(entry.payload.clone()),
                None => return None,
            }
        };
        if expired {
            // Re-check under the write lock; a concurrent set may have
            // replaced the entry since the read lock was released.
            let mut entries = self.entries.write();
            if entries.get(key).is_some_and(|e| e.is_expired()) {
                entries.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
            }
        }
        None
    }

    fn write(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), CacheEntry::new(value, ttl));

        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY == 0 {
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired());
            let swept = before - entries.len();
            self.expirations.fetch_add(swept as u64, Ordering::Relaxed);
        }
    }
}

impl Default for TtlStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStorage for TtlStorage {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.get_sync(key)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        self.set_sync(key, value, ttl)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.delete_sync(key)
    }

    async fn clear(&self) -> CacheResult<()> {
        self.clear_sync()
    }

    async fn incr(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.incr_sync(key, delta)
    }

    fn get_sync(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.read(key))
    }

    fn set_sync(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        self.write(key, value, ttl);
        Ok(())
    }

    fn delete_sync(&self, key: &str) -> CacheResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn clear_sync(&self) -> CacheResult<()> {
        self.entries.write().clear();
        Ok(())
    }

    fn incr_sync(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let mut entries = self.entries.write();
        let current = match entries.get(key) {
            Some(entry) if !entry.is_expired() => parse_counter(&entry.payload)
                .ok_or_else(|| {
                    CacheError::Serialization(format!("counter {key} holds a non-integer value"))
                })?,
            _ => 0,
        };
        let next = current + delta;
        entries.insert(
            key.to_string(),
            CacheEntry::new(next.to_string().into_bytes(), None),
        );
        Ok(next)
    }

    fn entry_count(&self) -> Option<usize> {
        Some(self.entries.read().len())
    }

    fn estimated_bytes(&self) -> Option<usize> {
        let entries = self.entries.read();
        Some(
            entries
                .iter()
                .map(|(key, entry)| key.capacity() + entry.approx_size())
                .sum(),
        )
    }
}
