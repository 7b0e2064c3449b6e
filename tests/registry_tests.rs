//! Process-wide registry fan-out: preloading and bulk invalidation.
//!
//! `preload_all` and `invalidate_all` reach every cache in the process, so
//! this binary runs the whole flow as one ordered test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use fn_cache::{get_statistics, CachedBuilder, CallOptions};

#[derive(Serialize, Clone)]
struct Lookup {
    uid: u64,
}

#[tokio::test]
async fn test_preload_then_bulk_invalidation() {
    // A sync function with a preload provider.
    let sync_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&sync_calls);
    let warm_sync = CachedBuilder::<u32, String>::new("registry::warm_sync")
        .preload_provider(|| vec![1, 2, 3])
        .build(move |n| {
            counter.fetch_add(1, Ordering::SeqCst);
            format!("name_{n}")
        })
        .unwrap();

    // An async per-user function with a preload provider.
    let async_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&async_calls);
    let warm_async = CachedBuilder::<Lookup, u64>::new("registry::warm_async")
        .user_id_param("uid")
        .preload_provider(|| vec![Lookup { uid: 42 }, Lookup { uid: 43 }])
        .build_async(move |args: Lookup| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                args.uid * 10
            }
        })
        .unwrap();

    // Warming executes each provider tuple once, with cache_read off and
    // cache_write on.
    fn_cache::preload_all().await;
    assert_eq!(sync_calls.load(Ordering::SeqCst), 3);
    assert_eq!(async_calls.load(Ordering::SeqCst), 2);

    // Every preloaded tuple is now a hit.
    for n in 1..=3 {
        assert_eq!(warm_sync.call(n), format!("name_{n}"));
    }
    assert_eq!(warm_async.call(Lookup { uid: 42 }).await, 420);
    assert_eq!(sync_calls.load(Ordering::SeqCst), 3);
    assert_eq!(async_calls.load(Ordering::SeqCst), 2);

    // Warming again re-executes (cache_read is forced off) and refreshes.
    fn_cache::preload_all().await;
    assert_eq!(sync_calls.load(Ordering::SeqCst), 6);
    assert_eq!(async_calls.load(Ordering::SeqCst), 4);

    // Per-user invalidation fans out across every registered manager.
    fn_cache::invalidate_user("42").await;
    assert_eq!(warm_async.call(Lookup { uid: 42 }).await, 420);
    assert_eq!(async_calls.load(Ordering::SeqCst), 5);
    assert_eq!(warm_async.call(Lookup { uid: 43 }).await, 430);
    assert_eq!(async_calls.load(Ordering::SeqCst), 5);

    // Global invalidation reaches both caches.
    fn_cache::invalidate_all().await;
    warm_sync.call(1);
    assert_eq!(sync_calls.load(Ordering::SeqCst), 7);
    assert_eq!(warm_async.call(Lookup { uid: 43 }).await, 430);
    assert_eq!(async_calls.load(Ordering::SeqCst), 6);

    // Statistics are reachable process-wide under the procedure names.
    let stats = get_statistics();
    assert!(stats.contains_key("registry::warm_sync"));
    assert!(stats.contains_key("registry::warm_async"));
    assert!(stats["registry::warm_sync"].sets >= 6);
}

#[tokio::test]
async fn test_warming_options_shape() {
    // The option set used during warming: execute, then store.
    let opts = CallOptions::warming();
    assert!(!opts.cache_read);
    assert!(opts.cache_write);
    assert!(opts.wait_for_write);
}
