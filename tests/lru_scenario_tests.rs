//! End-to-end LRU behavior of a wrapped function.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fn_cache::{CachePolicy, CachedBuilder};

#[test]
fn test_capacity_two_eviction() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let g = CachedBuilder::<String, String>::new("lru_scenario::g")
        .policy(CachePolicy::Lru)
        .max_entries(2)
        .build(move |s| {
            counter.fetch_add(1, Ordering::SeqCst);
            s.to_uppercase()
        })
        .unwrap();

    assert_eq!(g.call("a".into()), "A");
    assert_eq!(g.call("b".into()), "B");
    assert_eq!(g.call("c".into()), "C");
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // "b" and "c" are retained.
    assert_eq!(g.call("b".into()), "B");
    assert_eq!(g.call("c".into()), "C");
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // "a" was evicted, so it executes again.
    assert_eq!(g.call("a".into()), "A");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test]
fn test_retained_set_is_most_recently_used() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let g = CachedBuilder::<u32, u32>::new("lru_scenario::h")
        .policy(CachePolicy::Lru)
        .max_entries(3)
        .build(move |n| {
            counter.fetch_add(1, Ordering::SeqCst);
            n
        })
        .unwrap();

    for i in 0..3 {
        g.call(i);
    }
    // Refresh 0's recency, then push two new keys: 1 and 2 get evicted.
    g.call(0);
    g.call(10);
    g.call(11);
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    g.call(0); // still cached
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    g.call(1); // evicted, recomputes
    assert_eq!(calls.load(Ordering::SeqCst), 6);
}

#[test]
fn test_size_never_exceeds_capacity() {
    let g = CachedBuilder::<u32, u32>::new("lru_scenario::bounded")
        .policy(CachePolicy::Lru)
        .max_entries(4)
        .build(|n| n)
        .unwrap();

    for i in 0..50 {
        g.call(i);
        let usage = g.manager().memory_usage();
        assert!(usage.entries.unwrap() <= 4 + 1); // +1 for the version counter
    }
    let usage = g.manager().memory_usage();
    assert_eq!(usage.capacity, Some(4));
    assert!(usage.evictions >= 46);
}
