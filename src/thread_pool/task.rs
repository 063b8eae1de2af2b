use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crossbeam::channel::{self, Receiver, Select, TryRecvError};

use crate::{PoolError, Result};

thread_local! {
    static CURRENT: Cell<Option<TaskTicket>> = const { Cell::new(None) };
}

/// Where a task sits in the pool's submission and claim order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTicket {
    /// Position in submission order, assigned by `enqueue`.
    pub submitted: u64,
    /// Position in claim order, assigned when a worker dequeues the task.
    pub claimed: u64,
}

/// The ticket of the task running on the calling thread, if any.
///
/// Only set while a worker is executing a task body.
pub fn current_task() -> Option<TaskTicket> {
    CURRENT.with(Cell::get)
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A queued unit of work.
///
/// The result slot is captured inside the job, so the queue only ever
/// sees one erased type.
pub(crate) struct Task {
    seq: u64,
    job: Job,
}

impl Task {
    /// Wraps `f` so that its value or its panic lands in the returned handle.
    pub(crate) fn with_handle<F, T>(seq: u64, f: F) -> (Task, TaskHandle<T>)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        let job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f))
                .map_err(|payload| PoolError::TaskPanicked(panic_message(payload.as_ref())));
            // The caller may have dropped the handle; the result is simply discarded.
            let _ = tx.send(result);
        });
        (Task { seq, job }, TaskHandle { rx })
    }

    /// Wraps a job whose outcome nobody waits for.
    pub(crate) fn detached<F>(seq: u64, f: F) -> Task
    where
        F: FnOnce() + Send + 'static,
    {
        Task {
            seq,
            job: Box::new(f),
        }
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    /// Runs the job with `ticket` visible through [`current_task`].
    ///
    /// Returns the panic payload if the job itself unwinds. Jobs built by
    /// `with_handle` never do.
    pub(crate) fn run(self, ticket: TaskTicket) -> std::result::Result<(), String> {
        CURRENT.with(|c| c.set(Some(ticket)));
        let outcome = panic::catch_unwind(AssertUnwindSafe(self.job))
            .map_err(|payload| panic_message(payload.as_ref()));
        CURRENT.with(|c| c.set(None));
        outcome
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("seq", &self.seq).finish()
    }
}

/// Extracts the message from a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// A one-shot handle to the result of an enqueued task.
///
/// Dropping the handle does not cancel the task; it still runs and its
/// result is discarded.
#[must_use = "dropping a TaskHandle discards the task's result"]
pub struct TaskHandle<T> {
    rx: Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task has run and returns its value.
    ///
    /// # Errors
    ///
    /// `TaskPanicked` if the task panicked, `TaskAbandoned` if it was
    /// dropped without running.
    pub fn join(self) -> Result<T> {
        self.rx.recv().unwrap_or(Err(PoolError::TaskAbandoned))
    }

    /// Returns the result if the task has finished, or the handle back
    /// if it has not.
    pub fn try_join(self) -> std::result::Result<Result<T>, Self> {
        match self.rx.try_recv() {
            Ok(result) => Ok(result),
            Err(TryRecvError::Disconnected) => Ok(Err(PoolError::TaskAbandoned)),
            Err(TryRecvError::Empty) => Err(self),
        }
    }

    /// Whether [`join`](Self::join) would return without blocking.
    ///
    /// Also true for a task that was dropped without running.
    pub fn is_finished(&self) -> bool {
        // A receive is ready once a value is queued or the sender is gone.
        let mut select = Select::new();
        select.recv(&self.rx);
        select.try_ready().is_ok()
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}
