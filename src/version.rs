//! Version counters backing O(1) bulk invalidation.
//!
//! One global counter and zero or more per-user counters live in the same
//! storage as the cached payloads. The current counter values are inlined
//! into every composed key, so incrementing a counter logically invalidates
//! every key that embedded its previous value without touching the data.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::CacheResult;
use crate::storage::{parse_counter, CacheStorage};

/// The version a counter reports before anything was ever stored, and the
/// value degraded to when the counter cannot be read.
const INITIAL_VERSION: i64 = 1;

/// Reads and bumps the version counters of one cache manager.
pub(crate) struct VersionRegistry {
    storage: Arc<dyn CacheStorage>,
    global_key: String,
    user_key_template: String,
}

impl VersionRegistry {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        global_key: String,
        user_key_template: String,
    ) -> Self {
        Self {
            storage,
            global_key,
            user_key_template,
        }
    }

    fn user_key(&self, user_id: &str) -> String {
        self.user_key_template.replace("{user_id}", user_id)
    }

    /// Current global version. A missing counter is initialized to 1; a
    /// transport failure degrades to 1 after logging (derived keys then
    /// miss, which is always safe).
    pub async fn global_version(&self) -> i64 {
        self.read_or_init(&self.global_key).await
    }

    /// Current version for one user. Same initialization and degradation
    /// rules as the global counter.
    pub async fn user_version(&self, user_id: &str) -> i64 {
        self.read_or_init(&self.user_key(user_id)).await
    }

    /// Increments the global counter, returning the new version.
    pub async fn bump_global(&self) -> CacheResult<i64> {
        // Initialize first so the bump always moves past a version some key
        // may already have embedded.
        self.read_or_init(&self.global_key).await;
        self.storage.incr(&self.global_key, 1).await
    }

    /// Increments one user's counter, returning the new version.
    pub async fn bump_user(&self, user_id: &str) -> CacheResult<i64> {
        let key = self.user_key(user_id);
        self.read_or_init(&key).await;
        self.storage.incr(&key, 1).await
    }

    pub fn global_version_sync(&self) -> i64 {
        self.read_or_init_sync(&self.global_key)
    }

    pub fn user_version_sync(&self, user_id: &str) -> i64 {
        self.read_or_init_sync(&self.user_key(user_id))
    }

    pub fn bump_global_sync(&self) -> CacheResult<i64> {
        self.read_or_init_sync(&self.global_key);
        self.storage.incr_sync(&self.global_key, 1)
    }

    pub fn bump_user_sync(&self, user_id: &str) -> CacheResult<i64> {
        let key = self.user_key(user_id);
        self.read_or_init_sync(&key);
        self.storage.incr_sync(&key, 1)
    }

    // Initialization goes through `incr` rather than `set`: an increment
    // on a missing counter writes and returns 1, and counters written via
    // `incr` are exempt from LRU eviction (an evicted counter would reset
    // to 1 and could resurrect logically invalidated entries). When two
    // first readers race, the loser observes a higher value from its own
    // increment, which is still a valid current version.

    async fn read_or_init(&self, key: &str) -> i64 {
        match self.storage.get(key).await {
            Ok(Some(bytes)) => parse_counter(&bytes).unwrap_or_else(|| {
                warn!(key, "version counter holds a non-integer value");
                INITIAL_VERSION
            }),
            Ok(None) => match self.storage.incr(key, 1).await {
                Ok(version) => version,
                Err(e) => {
                    debug!(key, error = %e, "could not initialize version counter");
                    INITIAL_VERSION
                }
            },
            Err(e) => {
                debug!(key, error = %e, "version counter unreadable, assuming initial");
                INITIAL_VERSION
            }
        }
    }

    fn read_or_init_sync(&self, key: &str) -> i64 {
        match self.storage.get_sync(key) {
            Ok(Some(bytes)) => parse_counter(&bytes).unwrap_or_else(|| {
                warn!(key, "version counter holds a non-integer value");
                INITIAL_VERSION
            }),
            Ok(None) => match self.storage.incr_sync(key, 1) {
                Ok(version) => version,
                Err(e) => {
                    debug!(key, error = %e, "could not initialize version counter");
                    INITIAL_VERSION
                }
            },
            Err(e) => {
                debug!(key, error = %e, "version counter unreadable, assuming initial");
                INITIAL_VERSION
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GLOBAL_VERSION_KEY, USER_VERSION_KEY_TEMPLATE};
    use crate::storage::TtlStorage;

    fn registry() -> VersionRegistry {
        VersionRegistry::new(
            Arc::new(TtlStorage::new()),
            GLOBAL_VERSION_KEY.to_string(),
            USER_VERSION_KEY_TEMPLATE.to_string(),
        )
    }

    #[tokio::test]
    async fn test_first_read_initializes_to_one() {
        let versions = registry();
        assert_eq!(versions.global_version().await, 1);
        // The initialization was written through, not just returned.
        assert_eq!(versions.global_version().await, 1);
    }

    #[tokio::test]
    async fn test_bump_is_monotonic() {
        let versions = registry();
        let mut last = versions.global_version().await;
        for _ in 0..5 {
            let bumped = versions.bump_global().await.unwrap();
            assert!(bumped > last);
            last = bumped;
        }
        assert_eq!(versions.global_version().await, last);
    }

    #[tokio::test]
    async fn test_bump_without_prior_read_still_invalidates() {
        let versions = registry();
        let bumped = versions.bump_global().await.unwrap();
        assert!(bumped > 1);
    }

    #[tokio::test]
    async fn test_user_counters_are_independent() {
        let versions = registry();
        assert_eq!(versions.user_version("42").await, 1);
        versions.bump_user("42").await.unwrap();
        assert_eq!(versions.user_version("42").await, 2);
        assert_eq!(versions.user_version("43").await, 1);
        assert_eq!(versions.global_version().await, 1);
    }

    #[test]
    fn test_sync_family_matches_async_semantics() {
        let versions = registry();
        assert_eq!(versions.global_version_sync(), 1);
        assert_eq!(versions.bump_global_sync().unwrap(), 2);
        assert_eq!(versions.global_version_sync(), 2);
        assert_eq!(versions.user_version_sync("7"), 1);
        assert_eq!(versions.bump_user_sync("7").unwrap(), 2);
    }
}
