//! The process-wide pool is shared by every test in a binary, so its whole
//! lifecycle is exercised in a single test.

use bigcore::{global_pool, global_registry, initialize_global_pool, shutdown_global_pool};

#[test]
fn global_pool_lifecycle() {
    shutdown_global_pool();
    assert!(global_registry().get().is_none());

    let lazy = global_pool().unwrap();
    assert_eq!(lazy.thread_count(), 3);
    assert_eq!(initialize_global_pool(6).unwrap().thread_count(), 3);
    assert_eq!(lazy.enqueue(|| 1 + 1).unwrap().join().unwrap(), 2);

    shutdown_global_pool();
    assert!(lazy.is_stopping());
    shutdown_global_pool();

    let explicit = initialize_global_pool(2).unwrap();
    assert_eq!(explicit.thread_count(), 2);
    assert_eq!(global_pool().unwrap().thread_count(), 2);
    shutdown_global_pool();
}
