//! Process-wide cache registry.
//!
//! One lazily initialized singleton holds the global on/off flag, a weak
//! reference to every manager ever constructed, and every registered
//! preload task. The flag is an atomic read on the hot path; the lists are
//! locked only for insertion, and iteration works on a pruned snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::info;

use crate::manager::UniversalCacheManager;

/// A registered warm-up task: invoking it primes one wrapped function with
/// every argument tuple its preload provider yields.
pub(crate) type PreloadTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

static GLOBAL_CACHE_ENABLED: AtomicBool = AtomicBool::new(true);

static REGISTRY: Lazy<CacheRegistry> = Lazy::new(CacheRegistry::default);

#[derive(Default)]
struct CacheRegistry {
    managers: Mutex<Vec<Weak<UniversalCacheManager>>>,
    preloaders: Mutex<Vec<PreloadTask>>,
}

/// Turns every cache in the process back on.
pub fn enable_global_cache() {
    GLOBAL_CACHE_ENABLED.store(true, Ordering::SeqCst);
}

/// Turns every cache in the process off: every get misses, every set is a
/// no-op, and wrapped functions execute on each call.
pub fn disable_global_cache() {
    GLOBAL_CACHE_ENABLED.store(false, Ordering::SeqCst);
}

/// Current state of the global on/off flag.
pub fn is_global_cache_enabled() -> bool {
    GLOBAL_CACHE_ENABLED.load(Ordering::SeqCst)
}

pub(crate) fn register_manager(manager: &Arc<UniversalCacheManager>) {
    REGISTRY.managers.lock().push(Arc::downgrade(manager));
}

pub(crate) fn register_preload_task(task: PreloadTask) {
    REGISTRY.preloaders.lock().push(task);
}

/// Snapshot of every still-live manager. Dead weak references are pruned
/// as a side effect.
pub(crate) fn live_managers() -> Vec<Arc<UniversalCacheManager>> {
    let mut managers = REGISTRY.managers.lock();
    managers.retain(|weak| weak.strong_count() > 0);
    managers.iter().filter_map(Weak::upgrade).collect()
}

/// Runs every registered preload task, warming each wrapped function with
/// the argument tuples its provider yields.
pub async fn preload_all() {
    let tasks: Vec<PreloadTask> = REGISTRY.preloaders.lock().clone();
    info!(tasks = tasks.len(), "cache preloading started");
    for task in tasks {
        task().await;
    }
    info!("cache preloading finished");
}

/// Bumps the global version counter of every live manager, logically
/// invalidating every cache in the process.
pub async fn invalidate_all() {
    for manager in live_managers() {
        manager.invalidate_all().await;
    }
}

/// Bumps one user's version counter on every live manager.
pub async fn invalidate_user(user_id: &str) {
    for manager in live_managers() {
        manager.invalidate_user(user_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    // The on/off flag is process-wide, so toggling it here would race with
    // the other unit tests in this binary; its behavior is covered by the
    // dedicated global-switch integration tests.

    #[test]
    fn test_dead_managers_are_pruned() {
        let before = live_managers().len();
        {
            let _manager = UniversalCacheManager::new(CacheConfig {
                name: "registry_prune_test".to_string(),
                ..Default::default()
            })
            .unwrap();
            assert_eq!(live_managers().len(), before + 1);
        }
        assert_eq!(live_managers().len(), before);
    }
}
