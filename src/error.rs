use std::io;
use thiserror::Error;

use crate::affinity::AffinityClass;

/// Error type for bigcore operations.
#[derive(Error, Debug)]
pub enum PoolError {
    /// IO error, e.g. the OS refused to spawn a worker thread.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    /// A pool must have at least one worker.
    #[error("Thread count must be at least 1")]
    InvalidThreadCount,

    /// The pool has begun shutting down and accepts no new tasks.
    #[error("Enqueue on stopped worker pool")]
    PoolStopped,

    /// The task panicked while running on a worker.
    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    /// The task was dropped before it could deliver a result.
    #[error("Task was abandoned before completing")]
    TaskAbandoned,

    /// A configured CPU index does not fit in the OS affinity mask.
    #[error("CPU index {0} is out of range for the affinity mask")]
    CpuOutOfRange(usize),

    /// The OS rejected an affinity change.
    #[error("Failed to apply {class:?} affinity: {source}")]
    AffinityRejected {
        /// The class of cores that was requested.
        class: AffinityClass,
        /// The OS error.
        source: io::Error,
    },

    /// Alignment was not a power of two.
    #[error("Alignment {0} is not a power of two")]
    InvalidAlignment(usize),

    /// The requested size overflows once rounded up to the alignment.
    #[error("Allocation of {size} bytes aligned to {alignment} is too large")]
    AllocationTooLarge {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        alignment: usize,
    },
}

/// Result type alias for bigcore operations.
pub type Result<T> = std::result::Result<T, PoolError>;
