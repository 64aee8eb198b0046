//! Worker pool implementation for parallel batch construction.
//!
//! Provides a fixed-size thread pool that manages worker lifecycle, task
//! distribution, and result collection. The orchestrating thread keeps all
//! file I/O; workers only run CPU work on owned tasks.
//!
//! # Key features
//! - Bounded channels prevent memory bloat
//! - Graceful shutdown on drop
//! - Thread-local worker IDs for log events
//! - Generic over task and output types
//! - A panicking task becomes an error output instead of a lost result
//!
//! Workers pull from a single shared queue, so completion order is arbitrary.
//! Callers that need submission order tag their tasks and restore it.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::dataloader::common::thread::WORKER_ID;
use crate::error::{LoaderError, Result};

/// Thread pool for parallel batch construction.
///
/// Manages worker lifecycle and communication through bounded channels:
/// - Task channel: Main thread -> Workers (work distribution)
/// - Output channel: Workers -> Main thread (result collection)
/// - Shutdown flag: Enables graceful termination
///
/// # Type Parameters
/// - `Task`: Work items sent to workers
/// - `Output`: Results returned from workers
pub(crate) struct WorkerPool<Task, Output> {
    workers: Vec<thread::JoinHandle<()>>,
    task_tx: Option<Sender<Task>>,
    output_rx: Receiver<Result<Output>>,
    shutdown: Arc<AtomicBool>,
}

impl<Task, Output> WorkerPool<Task, Output>
where
    Task: Send + 'static,
    Output: Send + 'static,
{
    /// Spawns `num_workers` threads that each run `process` on every task they
    /// receive, checking the shutdown flag every `poll_interval` while idle.
    ///
    /// Both channels hold `buffer_size` items. A caller that never has more
    /// than `buffer_size` tasks outstanding never blocks on either side.
    pub(crate) fn new<F>(
        num_workers: usize,
        buffer_size: usize,
        poll_interval: Duration,
        process: F,
    ) -> Result<Self>
    where
        F: Fn(Task) -> Output + Send + Sync + 'static,
    {
        if num_workers == 0 {
            return Err(LoaderError::worker(
                "Cannot create WorkerPool with 0 workers. \
                Either set num_workers > 0 or use single-threaded mode.",
            ));
        }

        if buffer_size == 0 {
            return Err(LoaderError::worker(
                "Cannot create WorkerPool with buffer_size 0. \
                Buffer size must be > 0 to prevent deadlocks.",
            ));
        }

        let (task_tx, task_rx) = bounded::<Task>(buffer_size);
        let (output_tx, output_rx) = bounded::<Result<Output>>(buffer_size);

        let shutdown = Arc::new(AtomicBool::new(false));
        let process = Arc::new(process);
        let mut workers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let task_rx = task_rx.clone();
            let output_tx = output_tx.clone();
            let shutdown_clone = shutdown.clone();
            let process_clone = process.clone();

            let handle = thread::Builder::new()
                .name(format!("triplet-worker-{}", worker_id))
                .spawn(move || {
                    WORKER_ID.with(|id| id.set(worker_id));
                    worker_loop(worker_id, task_rx, output_tx, shutdown_clone, poll_interval, &*process_clone);
                })
                .map_err(|e| {
                    LoaderError::worker(format!("Failed to spawn worker thread {}: {}", worker_id, e))
                })?;

            workers.push(handle);
        }

        debug!(workers = num_workers, buffer_size, "worker pool started");
        Ok(Self {
            workers,
            task_tx: Some(task_tx),
            output_rx,
            shutdown,
        })
    }

    /// Queues a task for the next idle worker.
    pub(crate) fn submit(&self, task: Task) -> Result<()> {
        let task_tx = self
            .task_tx
            .as_ref()
            .ok_or_else(|| LoaderError::worker("Worker pool is shut down"))?;
        task_tx
            .send(task)
            .map_err(|_| LoaderError::worker("Task channel closed - workers may have crashed"))
    }

    /// Receives the next finished output.
    ///
    /// Blocks until an output is available, or until `timeout` elapses when
    /// one is given. A task that panicked is returned as a `Worker` error.
    pub(crate) fn recv(&self, timeout: Option<Duration>) -> Result<Output> {
        let received = match timeout {
            Some(timeout) => self.output_rx.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => LoaderError::worker(format!(
                    "Worker timeout after {:?} - possible deadlock or slow encoder",
                    timeout
                )),
                RecvTimeoutError::Disconnected => disconnected(),
            }),
            None => self.output_rx.recv().map_err(|_| disconnected()),
        };
        received?
    }
}

fn disconnected() -> LoaderError {
    LoaderError::worker("Worker channel disconnected - workers may have crashed")
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn worker_loop<Task, Output, F>(
    worker_id: usize,
    task_rx: Receiver<Task>,
    output_tx: Sender<Result<Output>>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
    process: &F,
) where
    F: Fn(Task) -> Output,
{
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match task_rx.recv_timeout(poll_interval) {
            Ok(task) => {
                let output = panic::catch_unwind(AssertUnwindSafe(|| process(task)))
                    .map_err(|payload| {
                        LoaderError::worker(format!(
                            "Worker {} panicked: {}",
                            worker_id,
                            panic_message(payload.as_ref())
                        ))
                    });
                if output_tx.send(output).is_err() {
                    break; // Main thread dropped receiver
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

impl<Task, Output> Drop for WorkerPool<Task, Output> {
    fn drop(&mut self) {
        // Signal shutdown to all workers
        self.shutdown.store(true, Ordering::Relaxed);

        // Close both channels so no worker stays blocked on a send or receive
        self.task_tx.take();
        self.output_rx = crossbeam_channel::never();

        // Wait for workers to finish
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        debug!("worker pool shut down");
    }
}
