//! The worker pool, its task handles and the registry that owns a shared pool.

mod registry;
mod task;
mod worker_pool;

pub use self::registry::{
    global_pool, global_registry, initialize_global_pool, shutdown_global_pool, PoolRegistry,
};
pub use self::task::{current_task, TaskHandle, TaskTicket};
pub use self::worker_pool::WorkerPool;
