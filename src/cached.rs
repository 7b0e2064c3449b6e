//! The invocation wrapper: turns a plain procedure into a cache-backed one.
//!
//! [`CachedBuilder`] collects the cache configuration and produces either a
//! [`CachedFn`] (blocking, in-memory backends) or a [`CachedAsyncFn`]
//! (suspending, any backend). A call runs: derive key → acquire the
//! per-key flight lock → probe cache → on hit return → on miss execute the
//! procedure, store, release.
//!
//! The per-key flight lock is the singleflight guarantee: at most one
//! execution of the underlying procedure per distinct cache key is in
//! flight at any instant within the process. Waiters probe the cache once
//! the owner releases the lock and observe its stored result instead of
//! launching a duplicate, so each wrapped call performs exactly one
//! lookup. A panicking or cancelled owner releases the lock, so the next
//! waiter simply becomes the new owner and retries; nothing is cached for
//! the failed attempt.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::config::{CacheConfig, CachePolicy, RedisSettings, StorageBackend};
use crate::error::{CacheError, CacheResult};
use crate::key::{KeyBuilder, KeyFn};
use crate::manager::UniversalCacheManager;
use crate::registry;
use crate::serializer::SerializerKind;
use crate::stats::StatsSnapshot;

/// Dynamic-TTL function: maps a computed value to its TTL in seconds. A
/// negative return means "do not cache this value".
pub type TtlFn<T> = Arc<dyn Fn(&T) -> i64 + Send + Sync>;

/// Preload provider: yields the argument tuples used to warm the cache at
/// startup.
pub type PreloadProvider<A> = Arc<dyn Fn() -> Vec<A> + Send + Sync>;

/// Per-call cache controls, stripped before the underlying procedure runs.
#[derive(Clone, Copy, Debug)]
pub struct CallOptions {
    /// When false, skip the lookup and force execution.
    pub cache_read: bool,
    /// When false, do not store the result.
    pub cache_write: bool,
    /// When false (suspending callers only), schedule the store
    /// concurrently and return immediately.
    pub wait_for_write: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            cache_read: true,
            cache_write: true,
            wait_for_write: true,
        }
    }
}

impl CallOptions {
    /// The option set used by cache warming: always execute, always store.
    pub fn warming() -> Self {
        Self {
            cache_read: false,
            ..Self::default()
        }
    }
}

/// Configures and builds a cache-backed procedure.
///
/// `proc_id` is the stable procedure identity embedded in every cache key;
/// by convention it is the module-qualified function name.
///
/// # Examples
///
/// ```
/// use fn_cache::CachedBuilder;
///
/// let expensive = CachedBuilder::<u32, u64>::new("demo::square")
///     .ttl_seconds(60)
///     .build(|n: u32| {
///         // imagine something slow here
///         (n as u64) * (n as u64)
///     })
///     .unwrap();
///
/// assert_eq!(expensive.call(12), 144);
/// assert_eq!(expensive.call(12), 144); // served from cache
/// ```
pub struct CachedBuilder<A, T> {
    config: CacheConfig,
    key_fn: Option<KeyFn<A>>,
    key_params: Option<Vec<String>>,
    user_id_param: Option<String>,
    ttl_fn: Option<TtlFn<T>>,
    preload: Option<PreloadProvider<A>>,
}

impl<A, T> CachedBuilder<A, T> {
    /// Starts a builder with environment-derived defaults and the given
    /// procedure identity.
    pub fn new(proc_id: impl Into<String>) -> Self {
        let mut config = CacheConfig::from_env();
        config.name = proc_id.into();
        Self {
            config,
            key_fn: None,
            key_params: None,
            user_id_param: None,
            ttl_fn: None,
            preload: None,
        }
    }

    /// Replaces the whole configuration, keeping the procedure identity.
    pub fn config(mut self, config: CacheConfig) -> Self {
        let name = self.config.name.clone();
        self.config = config;
        self.config.name = name;
        self
    }

    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.config.policy = policy;
        self
    }

    pub fn backend(mut self, backend: StorageBackend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn ttl_seconds(mut self, ttl: u64) -> Self {
        self.config.ttl_seconds = ttl;
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.config.max_entries = max;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    pub fn serializer(mut self, serializer: SerializerKind) -> Self {
        self.config.serializer = serializer;
        self
    }

    pub fn redis(mut self, settings: RedisSettings) -> Self {
        self.config.redis = Some(settings);
        self
    }

    /// Replaces the argument portion of the key entirely.
    pub fn key_fn(mut self, key_fn: impl Fn(&A) -> String + Send + Sync + 'static) -> Self {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    /// Restricts key participation to the named arguments.
    pub fn key_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_params = Some(params.into_iter().map(Into::into).collect());
        self
    }

    /// Names the argument carrying the user id, enabling per-user
    /// invalidation for this function.
    pub fn user_id_param(mut self, param: impl Into<String>) -> Self {
        self.user_id_param = Some(param.into());
        self
    }

    /// Derives the TTL from each computed value; a negative result skips
    /// the store.
    pub fn ttl_fn(mut self, ttl_fn: impl Fn(&T) -> i64 + Send + Sync + 'static) -> Self {
        self.ttl_fn = Some(Arc::new(ttl_fn));
        self
    }

    /// Registers a provider of argument tuples for startup warming via
    /// [`preload_all`](crate::preload_all).
    pub fn preload_provider(mut self, provider: impl Fn() -> Vec<A> + Send + Sync + 'static) -> Self {
        self.preload = Some(Arc::new(provider));
        self
    }

    fn key_builder(&self) -> KeyBuilder<A> {
        let mut keys = KeyBuilder::new(self.config.name.clone());
        if let Some(key_fn) = &self.key_fn {
            keys = keys.with_key_fn(Arc::clone(key_fn));
        }
        if let Some(params) = &self.key_params {
            keys = keys.with_key_params(params.clone());
        }
        if let Some(param) = &self.user_id_param {
            keys = keys.with_user_id_param(param.clone());
        }
        keys
    }
}

impl<A, T> CachedBuilder<A, T>
where
    A: Serialize + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Builds the blocking wrapper.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] for invalid options, including a
    /// Redis backend: the Redis client is network-bound, so Redis-backed
    /// functions must use [`build_async`](Self::build_async).
    pub fn build<F>(self, func: F) -> CacheResult<CachedFn<A, T, F>>
    where
        F: Fn(A) -> T + Send + Sync + 'static,
    {
        if self.config.backend == StorageBackend::Redis {
            return Err(CacheError::Config(
                "the redis backend requires the async wrapper".into(),
            ));
        }
        let keys = self.key_builder();
        let manager = UniversalCacheManager::new(self.config)?;
        let inner = Arc::new(SyncInner {
            func,
            manager,
            keys,
            ttl_fn: self.ttl_fn,
            flights: DashMap::new(),
        });
        if let Some(provider) = self.preload {
            let task_inner = Arc::clone(&inner);
            registry::register_preload_task(Arc::new(move || {
                let inner = Arc::clone(&task_inner);
                let provider = Arc::clone(&provider);
                async move {
                    for args in provider() {
                        let _ = inner.invoke(args, CallOptions::warming());
                    }
                }
                .boxed()
            }));
        }
        Ok(CachedFn { inner })
    }
}

impl<A, T> CachedBuilder<A, T>
where
    A: Serialize + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Builds the suspending wrapper. Works over any backend.
    pub fn build_async<F, Fut>(self, func: F) -> CacheResult<CachedAsyncFn<A, T, F, Fut>>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let keys = self.key_builder();
        let manager = UniversalCacheManager::new(self.config)?;
        let inner = Arc::new(AsyncInner {
            func,
            manager,
            keys,
            ttl_fn: self.ttl_fn,
            flights: DashMap::new(),
            _marker: PhantomData,
        });
        if let Some(provider) = self.preload {
            let task_inner = Arc::clone(&inner);
            registry::register_preload_task(Arc::new(move || {
                let inner = Arc::clone(&task_inner);
                let provider = Arc::clone(&provider);
                async move {
                    for args in provider() {
                        let _ = inner.invoke(args, CallOptions::warming()).await;
                    }
                }
                .boxed()
            }));
        }
        Ok(CachedAsyncFn { inner })
    }
}

/// A blocking cache-backed procedure. Cheap to clone; clones share the
/// same cache and flight table.
pub struct CachedFn<A, T, F> {
    inner: Arc<SyncInner<A, T, F>>,
}

impl<A, T, F> Clone for CachedFn<A, T, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, T, F> std::fmt::Debug for CachedFn<A, T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFn").finish_non_exhaustive()
    }
}

struct SyncInner<A, T, F> {
    func: F,
    manager: Arc<UniversalCacheManager>,
    keys: KeyBuilder<A>,
    ttl_fn: Option<TtlFn<T>>,
    flights: DashMap<String, Arc<parking_lot::Mutex<()>>>,
}

impl<A, T, F> CachedFn<A, T, F>
where
    A: Serialize + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    F: Fn(A) -> T + Send + Sync + 'static,
{
    pub fn call(&self, args: A) -> T {
        self.inner.invoke(args, CallOptions::default())
    }

    /// Calls with explicit per-call controls. `wait_for_write` has no
    /// meaning for blocking callers and is ignored.
    pub fn call_with(&self, args: A, opts: CallOptions) -> T {
        self.inner.invoke(args, opts)
    }

    /// Physically purges this function's cache.
    pub fn clear_cache(&self) -> bool {
        self.inner.manager.clear_sync()
    }

    pub fn manager(&self) -> &Arc<UniversalCacheManager> {
        &self.inner.manager
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.manager.stats().snapshot()
    }
}

impl<A, T, F> SyncInner<A, T, F>
where
    A: Serialize + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    F: Fn(A) -> T + Send + Sync + 'static,
{
    fn invoke(&self, args: A, opts: CallOptions) -> T {
        if !registry::is_global_cache_enabled() {
            return (self.func)(args);
        }
        let derived = match self.keys.derive(&args) {
            Ok(derived) => derived,
            Err(e) => {
                warn!(proc = %self.keys.proc_id(), error = %e,
                    "key derivation failed, bypassing cache for this call");
                return (self.func)(args);
            }
        };
        let user_id = derived.user_id.as_deref();

        let lock = {
            let entry = self.flights.entry(derived.key.clone()).or_default();
            Arc::clone(entry.value())
        };
        let guard = lock.lock();

        // One lookup per call, performed under the flight lock: a waiter
        // probing here observes whatever the previous owner stored.
        if opts.cache_read {
            if let Some(hit) = self.manager.get_sync::<T>(&derived.key, user_id) {
                drop(guard);
                self.release(&derived.key, &lock);
                return hit;
            }
        }

        let result = (self.func)(args);

        if opts.cache_write {
            let ttl = self.ttl_fn.as_ref().map(|f| f(&result));
            if !matches!(ttl, Some(t) if t < 0) {
                self.manager.set_sync(&derived.key, &result, ttl, user_id);
            }
        }

        drop(guard);
        self.release(&derived.key, &lock);
        result
    }

    fn release(&self, key: &str, lock: &Arc<parking_lot::Mutex<()>>) {
        // Drop the flight entry once nobody else holds it: one reference in
        // the map plus ours.
        if Arc::strong_count(lock) <= 2 {
            self.flights.remove_if(key, |_, l| Arc::strong_count(l) <= 2);
        }
    }
}

/// A suspending cache-backed procedure. Cheap to clone; clones share the
/// same cache and flight table.
pub struct CachedAsyncFn<A, T, F, Fut> {
    inner: Arc<AsyncInner<A, T, F, Fut>>,
}

impl<A, T, F, Fut> Clone for CachedAsyncFn<A, T, F, Fut> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct AsyncInner<A, T, F, Fut> {
    func: F,
    manager: Arc<UniversalCacheManager>,
    keys: KeyBuilder<A>,
    ttl_fn: Option<TtlFn<T>>,
    flights: DashMap<String, Arc<AsyncMutex<()>>>,
    _marker: PhantomData<fn() -> Fut>,
}

impl<A, T, F, Fut> CachedAsyncFn<A, T, F, Fut>
where
    A: Serialize + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    pub async fn call(&self, args: A) -> T {
        self.inner.invoke(args, CallOptions::default()).await
    }

    pub async fn call_with(&self, args: A, opts: CallOptions) -> T {
        self.inner.invoke(args, opts).await
    }

    /// Physically purges this function's cache.
    pub async fn clear_cache(&self) -> bool {
        self.inner.manager.clear().await
    }

    pub fn manager(&self) -> &Arc<UniversalCacheManager> {
        &self.inner.manager
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.manager.stats().snapshot()
    }
}

impl<A, T, F, Fut> AsyncInner<A, T, F, Fut>
where
    A: Serialize + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    async fn invoke(&self, args: A, opts: CallOptions) -> T {
        if !registry::is_global_cache_enabled() {
            return (self.func)(args).await;
        }
        let derived = match self.keys.derive(&args) {
            Ok(derived) => derived,
            Err(e) => {
                warn!(proc = %self.keys.proc_id(), error = %e,
                    "key derivation failed, bypassing cache for this call");
                return (self.func)(args).await;
            }
        };
        let user_id = derived.user_id.clone();

        let lock = {
            let entry = self.flights.entry(derived.key.clone()).or_default();
            Arc::clone(entry.value())
        };
        let guard = lock.lock().await;

        // One lookup per call, performed under the flight lock: a waiter
        // probing here observes whatever the previous owner stored.
        if opts.cache_read {
            if let Some(hit) = self.manager.get::<T>(&derived.key, user_id.as_deref()).await {
                drop(guard);
                self.release(&derived.key, &lock);
                return hit;
            }
        }

        let result = (self.func)(args).await;

        if opts.cache_write {
            let ttl = self.ttl_fn.as_ref().map(|f| f(&result));
            if !matches!(ttl, Some(t) if t < 0) {
                if opts.wait_for_write {
                    self.manager
                        .set(&derived.key, &result, ttl, user_id.as_deref())
                        .await;
                } else {
                    let manager = Arc::clone(&self.manager);
                    let key = derived.key.clone();
                    let value = result.clone();
                    tokio::spawn(async move {
                        manager.set(&key, &value, ttl, user_id.as_deref()).await;
                    });
                }
            }
        }

        drop(guard);
        self.release(&derived.key, &lock);
        result
    }

    fn release(&self, key: &str, lock: &Arc<AsyncMutex<()>>) {
        if Arc::strong_count(lock) <= 2 {
            self.flights.remove_if(key, |_, l| Arc::strong_count(l) <= 2);
        }
    }
}
