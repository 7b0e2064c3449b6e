//! Redis storage adapter.
//!
//! A thin translation of the storage contract onto Redis commands: GET,
//! SET/SETEX, DEL, INCRBY, and a prefix-scoped SCAN loop for `clear`. The
//! adapter never transforms payloads; serialization happens in the manager.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::RedisSettings;
use crate::error::{CacheError, CacheResult};
use crate::storage::CacheStorage;

/// Batch size for the SCAN loop used by `clear`.
const SCAN_COUNT: usize = 500;

/// Storage backed by a shared Redis server.
///
/// The connection is established lazily on first use and shared afterwards
/// (the underlying [`ConnectionManager`] reconnects on its own). Every
/// command runs under the configured per-command deadline; a missed
/// deadline surfaces as [`CacheError::Transport`] like any other transport
/// failure.
///
/// Only the suspending operation family is available; the blocking family
/// answers [`CacheError::Unsupported`].
pub struct RedisStorage {
    settings: RedisSettings,
    prefix: String,
    conn: OnceCell<ConnectionManager>,
}

impl RedisStorage {
    /// Creates the adapter. No connection is attempted yet; an unreachable
    /// server shows up as a transport error on the first operation.
    pub fn new(settings: RedisSettings, prefix: impl Into<String>) -> Self {
        Self {
            settings,
            prefix: prefix.into(),
            conn: OnceCell::new(),
        }
    }

    async fn connection(&self) -> CacheResult<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let client = redis::Client::open(self.settings.url())?;
                let manager =
                    tokio::time::timeout(self.settings.connect_timeout, ConnectionManager::new(client))
                        .await
                        .map_err(|_| {
                            CacheError::Transport(format!(
                                "connecting to redis at {}:{} timed out",
                                self.settings.host, self.settings.port
                            ))
                        })??;
                debug!(
                    host = %self.settings.host,
                    port = self.settings.port,
                    "redis connection established"
                );
                Ok::<_, CacheError>(manager)
            })
            .await?;
        Ok(conn.clone())
    }

    /// Runs a single command under the per-command deadline.
    async fn timed<T, F>(&self, what: &str, fut: F) -> CacheResult<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.settings.command_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CacheError::Transport(format!("redis {what} timed out"))),
        }
    }
}

#[async_trait]
impl CacheStorage for RedisStorage {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        self.timed("GET", conn.get::<_, Option<Vec<u8>>>(key)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        match ttl.map(|t| t.as_secs()).filter(|&secs| secs > 0) {
            Some(secs) => {
                self.timed("SETEX", conn.set_ex::<_, _, ()>(key, value, secs))
                    .await
            }
            None => self.timed("SET", conn.set::<_, _, ()>(key, value)).await,
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        self.timed("DEL", conn.del::<_, ()>(key)).await
    }

    async fn clear(&self) -> CacheResult<()> {
        // Scan-and-delete in batches, scoped to this cache's prefix. Never
        // FLUSHDB: the server may be shared with other applications.
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", self.prefix);
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = self
                .timed(
                    "SCAN",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT)
                        .query_async(&mut conn),
                )
                .await?;
            if !keys.is_empty() {
                self.timed("DEL", conn.del::<_, ()>(keys)).await?;
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let mut conn = self.connection().await?;
        self.timed("INCRBY", conn.incr::<_, _, i64>(key, delta))
            .await
    }

    fn get_sync(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        Err(CacheError::Unsupported("blocking access"))
    }

    fn set_sync(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> CacheResult<()> {
        Err(CacheError::Unsupported("blocking access"))
    }

    fn delete_sync(&self, _key: &str) -> CacheResult<()> {
        Err(CacheError::Unsupported("blocking access"))
    }

    fn clear_sync(&self) -> CacheResult<()> {
        Err(CacheError::Unsupported("blocking access"))
    }

    fn incr_sync(&self, _key: &str, _delta: i64) -> CacheResult<i64> {
        Err(CacheError::Unsupported("blocking access"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tests below require a Redis server on 127.0.0.1:6379 and are ignored
    // by default.

    fn test_storage(prefix: &str) -> RedisStorage {
        RedisStorage::new(RedisSettings::default(), prefix)
    }

    #[test]
    fn test_sync_family_is_rejected() {
        let storage = test_storage("fn_cache_test:");
        assert!(matches!(
            storage.get_sync("k").unwrap_err(),
            CacheError::Unsupported(_)
        ));
        assert!(matches!(
            storage.set_sync("k", vec![], None).unwrap_err(),
            CacheError::Unsupported(_)
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn test_round_trip() {
        let storage = test_storage("fn_cache_test:rt:");
        storage.clear().await.unwrap();

        storage
            .set(
                "fn_cache_test:rt:k1",
                b"v1".to_vec(),
                Some(Duration::from_secs(60)),
            )
            .await
            .unwrap();
        assert_eq!(
            storage.get("fn_cache_test:rt:k1").await.unwrap(),
            Some(b"v1".to_vec())
        );

        storage.delete("fn_cache_test:rt:k1").await.unwrap();
        assert_eq!(storage.get("fn_cache_test:rt:k1").await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore]
    async fn test_ttl_expiry() {
        let storage = test_storage("fn_cache_test:ttl:");
        storage
            .set(
                "fn_cache_test:ttl:k",
                b"v".to_vec(),
                Some(Duration::from_secs(1)),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(storage.get("fn_cache_test:ttl:k").await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore]
    async fn test_clear_is_prefix_scoped() {
        let ours = test_storage("fn_cache_test:ours:");
        let theirs = test_storage("fn_cache_test:theirs:");

        ours.set("fn_cache_test:ours:k", b"1".to_vec(), None)
            .await
            .unwrap();
        theirs
            .set("fn_cache_test:theirs:k", b"2".to_vec(), None)
            .await
            .unwrap();

        ours.clear().await.unwrap();

        assert_eq!(ours.get("fn_cache_test:ours:k").await.unwrap(), None);
        assert_eq!(
            theirs.get("fn_cache_test:theirs:k").await.unwrap(),
            Some(b"2".to_vec())
        );
        theirs.clear().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_incr() {
        let storage = test_storage("fn_cache_test:incr:");
        storage.delete("fn_cache_test:incr:c").await.unwrap();
        assert_eq!(storage.incr("fn_cache_test:incr:c", 1).await.unwrap(), 1);
        assert_eq!(storage.incr("fn_cache_test:incr:c", 1).await.unwrap(), 2);
        storage.delete("fn_cache_test:incr:c").await.unwrap();
    }
}
