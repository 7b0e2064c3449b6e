//! In-memory LRU storage.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::storage::{parse_counter, CacheStorage};

/// A bounded, access-ordered mapping.
///
/// The backing map holds the payloads; a separate queue tracks recency with
/// the most recently used key at the tail. A hit moves the key to the tail;
/// an insert pushes to the tail and evicts from the head until the map fits
/// the capacity again. TTL is layered on top: a read that finds an expired
/// entry treats it as a miss and removes it (this does not count as an
/// eviction).
///
/// Lock order is always map before order queue.
pub struct LruStorage {
    map: RwLock<HashMap<String, CacheEntry>>,
    order: Mutex<VecDeque<String>>,
    max_entries: usize,
    evictions: AtomicU64,
}

impl LruStorage {
    /// Creates an LRU storage bounded to `max_entries` entries.
    ///
    /// The capacity is validated by the manager configuration before any
    /// storage is built, so zero never reaches this constructor in practice.
    pub fn new(max_entries: usize) -> Self {
        Self {
            map: RwLock::new(HashMap::with_capacity(max_entries)),
            order: Mutex::new(VecDeque::with_capacity(max_entries)),
            max_entries,
            evictions: AtomicU64::new(0),
        }
    }

    /// Moves `key` to the tail of the order queue (most recently used).
    fn touch(&self, key: &str) {
        let mut order = self.order.lock();
        if let Some(pos) = order.iter().position(|k| k == key) {
            order.remove(pos);
            order.push_back(key.to_string());
        }
    }

    fn remove_key(&self, key: &str) {
        self.map.write().remove(key);
        let mut order = self.order.lock();
        if let Some(pos) = order.iter().position(|k| k == key) {
            order.remove(pos);
        }
    }

    fn read(&self, key: &str) -> Option<Vec<u8>> {
        let expired = {
            let map = self.map.read();
            match map.get(key) {
                Some(entry) if entry.is_expired() => true,
                Some(entry) => {
                    let payload = entry.payload.clone();
                    drop(map);
                    self.touch(key);
                    return Some(payload);
                }
                None => return None,
            }
        };
        if expired {
            self.remove_key(key);
        }
        None
    }

    fn write(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        self.map
            .write()
            .insert(key.to_string(), CacheEntry::new(value, ttl));

        let mut order = self.order.lock();
        if let Some(pos) = order.iter().position(|k| k == key) {
            order.remove(pos);
        }
        order.push_back(key.to_string());

        if order.len() > self.max_entries {
            let mut map = self.map.write();
            while order.len() > self.max_entries {
                match order.pop_front() {
                    Some(evict_key) => {
                        if map.remove(&evict_key).is_some() {
                            self.evictions.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

#[async_trait]
impl CacheStorage for LruStorage {
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
        self.remove_key(key);
        Ok(())
    }

    fn clear_sync(&self) -> CacheResult<()> {
        self.map.write().clear();
        self.order.lock().clear();
        Ok(())
    }

    fn incr_sync(&self, key: &str, delta: i64) -> CacheResult<i64> {
        // Counters bypass the recency queue so a busy cache cannot evict
        // its own version counters.
        let mut map = self.map.write();
        let current = match map.get(key) {
            Some(entry) if !entry.is_expired() => {
                parse_counter(&entry.payload).ok_or_else(|| {
                    CacheError::Serialization(format!("counter {key} holds a non-integer value"))
                })?
            }
            _ => 0,
        };
        let next = current + delta;
        map.insert(
            key.to_string(),
            CacheEntry::new(next.to_string().into_bytes(), None),
        );
        Ok(next)
    }

    fn entry_count(&self) -> Option<usize> {
        Some(self.map.read().len())
    }

    fn estimated_bytes(&self) -> Option<usize> {
        let map = self.map.read();
        Some(
            map.iter()
                .map(|(key, entry)| key.capacity() + entry.approx_size())
                .sum(),
        )
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.max_entries)
    }

    fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}
