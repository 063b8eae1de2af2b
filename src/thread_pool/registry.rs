use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use super::WorkerPool;
use crate::config::{PoolConfig, DEFAULT_THREAD_COUNT};
use crate::Result;

/// Owns at most one [`WorkerPool`] and guards its creation and teardown.
///
/// Pass a registry to the code that needs a pool. The lock only covers
/// creating, fetching and destroying the pool; tasks run without it.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    slot: Mutex<Option<Arc<WorkerPool>>>,
}

impl PoolRegistry {
    /// An empty registry.
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<WorkerPool>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates the pool from `config` unless one already exists.
    ///
    /// The first call wins: later calls return the existing pool and their
    /// configuration is ignored.
    ///
    /// # Errors
    ///
    /// Propagates pool construction errors.
    pub fn initialize(&self, config: &PoolConfig) -> Result<Arc<WorkerPool>> {
        let mut slot = self.lock();
        if let Some(pool) = slot.as_ref() {
            debug!(
                "Worker pool already initialized with {} threads, ignoring request for {}",
                pool.thread_count(),
                config.threads
            );
            return Ok(Arc::clone(pool));
        }

        let pool = Arc::new(WorkerPool::with_config(config)?);
        info!("Worker pool initialized with {} threads", pool.thread_count());
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }

    /// [`initialize`](Self::initialize) with the default configuration and
    /// the given thread count.
    pub fn initialize_with_threads(&self, threads: usize) -> Result<Arc<WorkerPool>> {
        self.initialize(&PoolConfig::with_threads(threads))
    }

    /// Returns the pool, creating one with [`DEFAULT_THREAD_COUNT`] workers
    /// if nothing was initialized. Implicit creation is logged as a warning.
    pub fn get_or_init(&self) -> Result<Arc<WorkerPool>> {
        let mut slot = self.lock();
        if let Some(pool) = slot.as_ref() {
            return Ok(Arc::clone(pool));
        }

        let pool = Arc::new(WorkerPool::new(DEFAULT_THREAD_COUNT)?);
        warn!(
            "Worker pool auto-initialized with {} threads, initialize it explicitly",
            DEFAULT_THREAD_COUNT
        );
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }

    /// Returns the pool if one exists.
    pub fn get(&self) -> Option<Arc<WorkerPool>> {
        self.lock().clone()
    }

    /// Shuts the pool down and clears the slot. No-op when empty.
    ///
    /// Returns after every worker is joined. The registry stays locked
    /// meanwhile, so a queued task that calls back into this registry
    /// deadlocks the shutdown.
    pub fn shutdown(&self) {
        let mut slot = self.lock();
        if let Some(pool) = slot.take() {
            pool.shutdown();
            info!("Worker pool shutdown");
        }
    }
}

static GLOBAL_POOL: PoolRegistry = PoolRegistry::new();

/// The process-wide registry. Prefer passing a [`PoolRegistry`] around;
/// this exists for process entry points.
pub fn global_registry() -> &'static PoolRegistry {
    &GLOBAL_POOL
}

/// Initializes the process-wide pool. Later calls are ignored.
pub fn initialize_global_pool(threads: usize) -> Result<Arc<WorkerPool>> {
    GLOBAL_POOL.initialize_with_threads(threads)
}

/// The process-wide pool, created with the default size on first use.
///
/// Safe to call from a task while the pool runs. Do not call it from a task
/// that may still be queued when [`shutdown_global_pool`] runs: shutdown
/// keeps the registry locked until every worker is joined, so the task
/// blocks here and the shutdown never finishes.
pub fn global_pool() -> Result<Arc<WorkerPool>> {
    GLOBAL_POOL.get_or_init()
}

/// Shuts the process-wide pool down, waiting for queued tasks.
///
/// See [`global_pool`] for the one call tasks must avoid meanwhile.
pub fn shutdown_global_pool() {
    GLOBAL_POOL.shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_does_not_create() {
        let registry = PoolRegistry::new();
        assert!(registry.get().is_none());
        registry.initialize_with_threads(1).unwrap();
        assert_eq!(registry.get().unwrap().thread_count(), 1);
    }

    #[test]
    fn zero_threads_leaves_the_slot_empty() {
        let registry = PoolRegistry::new();
        assert!(registry.initialize_with_threads(0).is_err());
        assert!(registry.get().is_none());
    }
}
