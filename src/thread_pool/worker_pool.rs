use std::collections::VecDeque;
use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use log::{debug, error, info};

use super::task::{Task, TaskHandle, TaskTicket};
use crate::affinity::AffinityController;
use crate::config::PoolConfig;
use crate::{PoolError, Result};

/// Pending tasks plus the counters that order them.
#[derive(Debug, Default)]
struct Queue {
    tasks: VecDeque<Task>,
    /// Sequence number handed to the next submitted task.
    submitted: u64,
    /// Number of tasks dequeued so far.
    claimed: u64,
}

/// State shared between the pool handle and its workers.
#[derive(Debug, Default)]
struct Shared {
    queue: Mutex<Queue>,
    /// Signalled when a task is queued or the pool starts stopping.
    available: Condvar,
    /// Signalled when a worker empties the queue.
    drained: Condvar,
    stopping: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        // Task bodies never run under this lock, so poisoning cannot
        // leave the queue half-updated.
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends the task built by `make` unless the pool is stopping.
    fn submit<R>(&self, make: impl FnOnce(u64) -> (Task, R)) -> Result<R> {
        let mut queue = self.lock();
        if self.stopping.load(Ordering::Acquire) {
            return Err(PoolError::PoolStopped);
        }
        let (task, ret) = make(queue.submitted);
        queue.submitted += 1;
        queue.tasks.push_back(task);
        drop(queue);

        self.available.notify_one();
        Ok(ret)
    }

    /// Blocks until there is a task to run. Returns `None` once the pool is
    /// stopping and the queue is empty.
    fn next_task(&self) -> Option<(Task, TaskTicket)> {
        let mut queue = self.lock();
        loop {
            if let Some(task) = queue.tasks.pop_front() {
                let ticket = TaskTicket {
                    submitted: task.seq(),
                    claimed: queue.claimed,
                };
                queue.claimed += 1;
                if queue.tasks.is_empty() {
                    self.drained.notify_all();
                }
                return Some((task, ticket));
            }
            if self.stopping.load(Ordering::Acquire) {
                return None;
            }
            queue = self
                .available
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn stop(&self) {
        {
            // Flipped under the queue lock so no submitter can slip a task in
            // after a worker has seen "stopping and empty".
            let _queue = self.lock();
            self.stopping.store(true, Ordering::Release);
        }
        self.available.notify_all();
    }
}

/// A fixed-size pool of worker threads pinned to the performance cores.
///
/// Workers pull tasks from a single FIFO queue. Tasks are claimed in
/// submission order but may finish in any order. A task that panics is
/// reported through its [`TaskHandle`] and the worker carries on.
///
/// Dropping the pool shuts it down: every queued task still runs before
/// the workers exit.
#[derive(Debug)]
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Fixed at construction; read without taking `workers`.
    worker_ids: Vec<ThreadId>,
    threads: usize,
    affinity: AffinityController,
}

impl WorkerPool {
    /// Creates a pool of `threads` workers with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidThreadCount` for zero threads, or `Io` if a worker
    /// thread cannot be spawned.
    pub fn new(threads: usize) -> Result<Self> {
        Self::with_config(&PoolConfig::with_threads(threads))
    }

    /// Creates a pool from a full configuration.
    pub fn with_config(config: &PoolConfig) -> Result<Self> {
        config.topology.validate();
        Self::with_controller(config.threads, AffinityController::detect(config))
    }

    /// Creates a pool whose workers pin themselves through `affinity`.
    ///
    /// All workers are running when this returns. If one of them cannot be
    /// spawned, the ones already started are stopped and joined.
    pub fn with_controller(threads: usize, affinity: AffinityController) -> Result<Self> {
        if threads == 0 {
            return Err(PoolError::InvalidThreadCount);
        }
        info!(
            "Creating worker pool with {} workers ({} affinity)",
            threads,
            affinity.backend_name()
        );

        let shared = Arc::new(Shared::default());
        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            match spawn_worker(id, Arc::clone(&shared), affinity.clone()) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!("Failed to spawn worker {}: {}", id, e);
                    shared.stop();
                    join_all(workers);
                    return Err(e.into());
                }
            }
        }

        let worker_ids = workers.iter().map(|w| w.thread().id()).collect();
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            worker_ids,
            threads,
            affinity,
        })
    }

    /// Queues `f` and returns a handle to its eventual result.
    ///
    /// Only blocks for the append itself. The closure captures whatever
    /// arguments it needs; return `()` when there is no result.
    ///
    /// # Errors
    ///
    /// Returns `PoolStopped` once shutdown has begun. The closure is
    /// dropped without running.
    pub fn enqueue<F, T>(&self, f: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.shared.submit(|seq| Task::with_handle(seq, f))
    }

    /// Queues a job nobody waits for. A panic in it is logged.
    ///
    /// # Errors
    ///
    /// Returns `PoolStopped` once shutdown has begun.
    pub fn spawn<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.submit(|seq| (Task::detached(seq, job), ()))
    }

    /// Blocks until the queue has been observed empty.
    ///
    /// This is a weak barrier: a task a worker claimed just before may still
    /// be running when this returns. To know a task has finished, join its
    /// handle. Calling this from a task of the same pool deadlocks if every
    /// worker ends up waiting here.
    pub fn wait_for_tasks(&self) {
        let queue = self.shared.lock();
        let _queue = self
            .shared
            .drained
            .wait_while(queue, |q| !q.tasks.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Number of worker threads, fixed for the pool's lifetime.
    pub fn thread_count(&self) -> usize {
        self.threads
    }

    /// Number of tasks queued but not yet claimed by a worker.
    pub fn pending_tasks(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    /// Whether shutdown has begun.
    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::Acquire)
    }

    /// The controller the workers pinned themselves with.
    pub fn affinity(&self) -> &AffinityController {
        &self.affinity
    }

    /// Stops accepting tasks, drains the queue and joins every worker.
    ///
    /// Calling it again is a no-op. When called from one of this pool's own
    /// workers it only stops the pool and returns: workers still drain the
    /// queue, and joining is left to a caller outside the pool (or to
    /// `Drop`). Workers never touch the join handles, so a task can
    /// shut its pool down while another thread is already joining it.
    pub fn shutdown(&self) {
        self.shared.stop();

        if self.is_worker_thread() {
            debug!("Worker pool stopped from one of its own workers, not joining");
            return;
        }

        // Held until every worker is joined, so a concurrent second call
        // returns only after the drain as well.
        let mut guard = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_empty() {
            return;
        }
        join_all(mem::take(&mut *guard));
        info!("Worker pool destroyed");
    }

    /// Whether the calling thread is one of this pool's workers.
    pub fn is_worker_thread(&self) -> bool {
        self.worker_ids.contains(&thread::current().id())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawns a worker that pins itself and then consumes tasks until the pool stops.
fn spawn_worker(
    id: usize,
    shared: Arc<Shared>,
    affinity: AffinityController,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("pool-worker-{id}"))
        .spawn(move || {
            affinity.pin_to_performance_cores();
            debug!("Worker {id} started");

            while let Some((task, ticket)) = shared.next_task() {
                debug!("Worker {id} executing task {}", ticket.submitted);
                if let Err(msg) = task.run(ticket) {
                    error!("Worker {id} job panicked, continuing: {msg}");
                }
            }

            debug!("Worker {id}: pool stopped, shutting down");
        })
}

fn join_all(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        let name = worker.thread().name().unwrap_or("<unnamed>").to_owned();
        if worker.join().is_err() {
            error!("Worker {} terminated abnormally", name);
        }
    }
}
