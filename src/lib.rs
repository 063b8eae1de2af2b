#![deny(missing_docs)]

//! A worker pool for asymmetric multicore CPUs.
//!
//! Every worker pins itself to the configured performance cores before it
//! takes its first task. Tasks are closures queued in FIFO order; each
//! returns a [`TaskHandle`] that yields the closure's value or the panic it
//! raised. Pinning is best effort: where the OS refuses it, or the platform
//! has no support, workers simply run unconstrained.

/// Pinning the calling thread to a class of cores.
pub mod affinity;
mod config;
mod error;
pub mod memory;
pub mod thread_pool;

pub use affinity::{AffinityBackend, AffinityClass, AffinityController, NoOpBackend};
pub use config::{CoreTopology, PoolConfig, DEFAULT_THREAD_COUNT};
pub use error::{PoolError, Result};
pub use thread_pool::{
    current_task, global_pool, global_registry, initialize_global_pool, shutdown_global_pool,
    PoolRegistry, TaskHandle, TaskTicket, WorkerPool,
};
