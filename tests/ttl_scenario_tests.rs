//! End-to-end TTL behavior of a wrapped function.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fn_cache::CachedBuilder;

#[test]
fn test_ttl_hit_then_expiry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let f = CachedBuilder::<u32, String>::new("ttl_scenario::f")
        .ttl_seconds(2)
        .build(move |n| {
            counter.fetch_add(1, Ordering::SeqCst);
            format!("v{n}")
        })
        .unwrap();

    // t=0: first call executes.
    assert_eq!(f.call(1), "v1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // t=1: within the TTL, served from cache.
    thread::sleep(Duration::from_secs(1));
    assert_eq!(f.call(1), "v1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // t=3: past the TTL, executes again.
    thread::sleep(Duration::from_secs(2));
    assert_eq!(f.call(1), "v1");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_set_then_get_within_ttl() {
    let f = CachedBuilder::<(u32, u32), u32>::new("ttl_scenario::sum")
        .ttl_seconds(60)
        .build(|(a, b)| a + b)
        .unwrap();

    for a in 0..5u32 {
        for b in 0..5u32 {
            assert_eq!(f.call((a, b)), a + b);
            // Immediately readable back.
            assert_eq!(f.call((a, b)), a + b);
        }
    }
    let stats = f.stats();
    assert_eq!(stats.hits, 25);
    assert_eq!(stats.misses + stats.hits, stats.total_requests);
}

#[test]
fn test_hits_plus_misses_equals_total_calls() {
    let f = CachedBuilder::<u32, u32>::new("ttl_scenario::ident")
        .ttl_seconds(60)
        .build(|n| n)
        .unwrap();

    for i in 0..10 {
        f.call(i % 3);
    }
    let stats = f.stats();
    assert_eq!(stats.total_requests, 10);
    assert_eq!(stats.misses, 3);
    assert_eq!(stats.hits, 7);
}
