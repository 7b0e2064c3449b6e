//! Version-counter invalidation scenarios against a single manager.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use fn_cache::CachedBuilder;

#[tokio::test]
async fn test_global_invalidation_forces_recompute() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let h = CachedBuilder::<u32, u32>::new("invalidation::h")
        .build_async(move |n: u32| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                n * 7
            }
        })
        .unwrap();

    assert_eq!(h.call(7).await, 49);
    assert_eq!(h.call(7).await, 49);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    h.manager().invalidate_all().await;

    assert_eq!(h.call(7).await, 49);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    // The recomputed value was cached under the new version.
    assert_eq!(h.call(7).await, 49);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[derive(Serialize, Clone)]
struct KArgs {
    uid: u64,
    x: u32,
}

#[tokio::test]
async fn test_user_invalidation_is_scoped_to_one_user() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let k = CachedBuilder::<KArgs, u64>::new("invalidation::k")
        .user_id_param("uid")
        .build_async(move |args: KArgs| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                args.uid + args.x as u64
            }
        })
        .unwrap();

    // Warm both users.
    k.call(KArgs { uid: 42, x: 1 }).await;
    k.call(KArgs { uid: 42, x: 1 }).await;
    k.call(KArgs { uid: 43, x: 1 }).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    k.manager().invalidate_user("42").await;

    // User 42 misses and recomputes.
    k.call(KArgs { uid: 42, x: 1 }).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // User 43 was never invalidated and still hits.
    k.call(KArgs { uid: 43, x: 1 }).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_repeated_bumps_are_monotonic() {
    let manager = fn_cache::UniversalCacheManager::new(fn_cache::CacheConfig {
        name: "invalidation::versions".to_string(),
        ..Default::default()
    })
    .unwrap();

    let mut last = 0;
    for _ in 0..10 {
        let version = manager.increment_global_version().await.unwrap();
        assert!(version > last);
        last = version;
    }
}

#[tokio::test]
async fn test_entry_may_survive_physically_but_is_never_returned() {
    let manager = fn_cache::UniversalCacheManager::new(fn_cache::CacheConfig {
        name: "invalidation::physical".to_string(),
        ..Default::default()
    })
    .unwrap();

    manager.set("k", &123u32, None, None).await;
    assert_eq!(manager.get::<u32>("k", None).await, Some(123));
    let before = manager.memory_usage().entries.unwrap();

    manager.invalidate_all().await;

    // The old entry still physically exists...
    assert!(manager.memory_usage().entries.unwrap() >= before);
    // ...but the manager never serves it.
    assert_eq!(manager.get::<u32>("k", None).await, None);
}
