use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bigcore::{PoolError, PoolRegistry, DEFAULT_THREAD_COUNT};
use crossbeam_utils::thread::scope;

#[test]
fn first_initialization_wins() {
    let registry = PoolRegistry::new();
    let first = registry.initialize_with_threads(2).unwrap();
    let second = registry.initialize_with_threads(5).unwrap();

    assert_eq!(second.thread_count(), 2);
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn lazy_initialization_uses_the_default_size() {
    let registry = PoolRegistry::new();
    let pool = registry.get_or_init().unwrap();
    assert_eq!(pool.thread_count(), DEFAULT_THREAD_COUNT);
    assert_eq!(DEFAULT_THREAD_COUNT, 3);
}

#[test]
fn lazy_access_returns_the_explicit_pool() {
    let registry = PoolRegistry::new();
    registry.initialize_with_threads(4).unwrap();
    assert_eq!(registry.get_or_init().unwrap().thread_count(), 4);
}

#[test]
fn shutdown_is_idempotent_and_safe_when_empty() {
    let registry = PoolRegistry::new();
    registry.shutdown();

    let pool = registry.initialize_with_threads(2).unwrap();
    registry.shutdown();
    registry.shutdown();

    assert!(registry.get().is_none());
    assert!(pool.is_stopping());
    assert!(matches!(pool.enqueue(|| ()), Err(PoolError::PoolStopped)));

    let fresh = registry.get_or_init().unwrap();
    assert!(!fresh.is_stopping());
}

#[test]
fn shutdown_waits_for_queued_work() {
    let registry = PoolRegistry::new();
    let pool = registry.initialize_with_threads(1).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..20 {
        let counter = Arc::clone(&counter);
        pool.spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(1));
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    registry.shutdown();
    assert_eq!(counter.load(Ordering::SeqCst), 20);
}

#[test]
fn racing_initializers_share_one_pool() {
    let registry = PoolRegistry::new();
    let registry = &registry;
    let pools: Vec<_> = scope(|s| {
        let handles: Vec<_> = (1..=8)
            .map(|threads| s.spawn(move |_| registry.initialize_with_threads(threads).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
    .unwrap();

    for pool in &pools {
        assert!(Arc::ptr_eq(pool, &pools[0]));
    }
}

#[test]
fn tasks_can_use_the_registry_while_running() {
    let registry = Arc::new(PoolRegistry::new());
    let pool = registry.initialize_with_threads(2).unwrap();

    let inner = Arc::clone(&registry);
    let seen = pool
        .enqueue(move || inner.get().map(|p| p.thread_count()))
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(seen, Some(2));
}
