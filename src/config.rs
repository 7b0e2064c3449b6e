//! Cache configuration.
//!
//! All options are fixed at manager construction; incompatible combinations
//! are rejected there and never surface at call time.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};
use crate::serializer::SerializerKind;

/// Default key prefix shared by every cache unless overridden.
pub const DEFAULT_PREFIX: &str = "cache:";

/// Storage key of the global version counter.
pub const GLOBAL_VERSION_KEY: &str = "fn_cache:global:version";

/// Storage key template of the per-user version counters. `{user_id}` is
/// replaced by the user identifier.
pub const USER_VERSION_KEY_TEMPLATE: &str = "fn_cache:user:version:{user_id}";

/// The expiry/eviction discipline of a cache.
///
/// * `Ttl` - entries expire a fixed number of seconds after insertion.
/// * `Lru` - a bounded cache evicting the least recently used entry,
///   optionally combined with TTL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachePolicy {
    Ttl,
    Lru,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::Ttl
    }
}

/// Converts a string slice to a `CachePolicy`.
///
/// The conversion is case-insensitive and defaults to TTL for unrecognized
/// values.
impl From<&str> for CachePolicy {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "lru" => CachePolicy::Lru,
            _ => CachePolicy::Ttl,
        }
    }
}

/// Where cached payloads live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageBackend {
    /// Process-local storage guarded by mutexes. Supports both the blocking
    /// and the suspending manager API.
    Memory,
    /// A shared Redis server. Network-bound, so only the suspending API is
    /// available.
    Redis,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Memory
    }
}

impl From<&str> for StorageBackend {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "redis" => StorageBackend::Redis,
            _ => StorageBackend::Memory,
        }
    }
}

/// Connection parameters for the Redis backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub db: u8,
    pub password: Option<String>,
    /// Deadline for establishing the connection.
    pub connect_timeout: Duration,
    /// Deadline for each individual command.
    pub command_timeout: Duration,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            password: None,
            connect_timeout: Duration::from_secs(1),
            command_timeout: Duration::from_secs(1),
        }
    }
}

impl RedisSettings {
    /// Builds the connection URL understood by the Redis client.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// Full configuration of one cache manager.
///
/// # Environment Variables
///
/// [`CacheConfig::from_env`] reads the following, all optional:
///
/// - `FN_CACHE_REDIS_HOST` - Redis host (default: 127.0.0.1)
/// - `FN_CACHE_REDIS_PORT` - Redis port (default: 6379)
/// - `FN_CACHE_REDIS_DB` - Redis database index (default: 0)
/// - `FN_CACHE_REDIS_PASSWORD` - Redis password (default: none)
/// - `FN_CACHE_DEFAULT_TTL` - default TTL in seconds (default: 600)
/// - `FN_CACHE_MAX_ENTRIES` - LRU capacity (default: 1000)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Identifier of this cache, used as the statistics id and as the
    /// procedure identity when the cache backs a wrapped function.
    pub name: String,
    pub policy: CachePolicy,
    pub backend: StorageBackend,
    /// Default TTL in seconds applied when a set carries no explicit TTL.
    /// Zero means "no expiry".
    pub ttl_seconds: u64,
    /// Capacity of the LRU discipline. Ignored under TTL.
    pub max_entries: usize,
    /// Prefix prepended to every composed cache key.
    pub prefix: String,
    pub serializer: SerializerKind,
    /// Storage key of the global version counter.
    pub global_version_key: String,
    /// Storage key template of per-user version counters; must contain
    /// `{user_id}`.
    pub user_version_key_template: String,
    /// Connection parameters, required when `backend` is Redis.
    pub redis: Option<RedisSettings>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            policy: CachePolicy::Ttl,
            backend: StorageBackend::Memory,
            ttl_seconds: 600,
            max_entries: 1000,
            prefix: DEFAULT_PREFIX.to_string(),
            serializer: SerializerKind::Json,
            global_version_key: GLOBAL_VERSION_KEY.to_string(),
            user_version_key_template: USER_VERSION_KEY_TEMPLATE.to_string(),
            redis: None,
        }
    }
}

impl CacheConfig {
    /// Creates a configuration from defaults overridden by environment
    /// variables. Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ttl) = env_parse::<u64>("FN_CACHE_DEFAULT_TTL") {
            config.ttl_seconds = ttl;
        }
        if let Some(max) = env_parse::<usize>("FN_CACHE_MAX_ENTRIES") {
            config.max_entries = max;
        }

        let mut redis = RedisSettings::default();
        let mut redis_configured = false;
        if let Ok(host) = env::var("FN_CACHE_REDIS_HOST") {
            redis.host = host;
            redis_configured = true;
        }
        if let Some(port) = env_parse::<u16>("FN_CACHE_REDIS_PORT") {
            redis.port = port;
            redis_configured = true;
        }
        if let Some(db) = env_parse::<u8>("FN_CACHE_REDIS_DB") {
            redis.db = db;
            redis_configured = true;
        }
        if let Ok(password) = env::var("FN_CACHE_REDIS_PASSWORD") {
            redis.password = Some(password);
            redis_configured = true;
        }
        if redis_configured {
            config.redis = Some(redis);
        }

        config
    }

    /// Validates option compatibility.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] for an LRU cache without capacity, a
    /// Redis backend without connection settings, or a user version key
    /// template missing the `{user_id}` placeholder.
    pub fn validate(&self) -> CacheResult<()> {
        if self.policy == CachePolicy::Lru && self.max_entries == 0 {
            return Err(CacheError::Config(
                "lru capacity must be greater than zero".into(),
            ));
        }
        if self.backend == StorageBackend::Redis && self.redis.is_none() {
            return Err(CacheError::Config(
                "redis backend selected without connection settings".into(),
            ));
        }
        if !self.user_version_key_template.contains("{user_id}") {
            return Err(CacheError::Config(
                "user version key template must contain {user_id}".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
