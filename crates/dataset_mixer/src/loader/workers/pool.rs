//! Worker pool implementation for parallel record materialization.
//!
//! Provides a thread pool that manages worker lifecycle, task routing and result
//! collection.
//!
//! # Key features
//! - Bounded channels prevent memory bloat
//! - Graceful shutdown on drop
//! - Thread-local worker IDs for debugging
//! - Generic over task and output types
//!
//! # Distribution
//!
//! Every worker owns a dedicated task channel and the main thread decides which
//! worker receives each task. Routing is therefore a pure function of the task
//! sequence, never of thread timing.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::loader::common::thread::set_worker_id;

/// Thread pool for parallel materialization.
///
/// Manages worker lifecycle and communication through bounded channels:
/// - Task channels: Main thread -> Worker `i` (work distribution)
/// - Output channel: Workers -> Main thread (result collection)
/// - Shutdown flag: Enables graceful termination
///
/// # Type Parameters
/// - `Task`: Work items sent to workers
/// - `Output`: Results returned from workers
pub(crate) struct WorkerPool<Task, Output> {
    workers: Vec<thread::JoinHandle<()>>,
    worker_task_txs: Vec<Sender<Task>>,
    output_rx: Receiver<Output>,
    shutdown: Arc<AtomicBool>,
}

impl<Task, Output> WorkerPool<Task, Output>
where
    Task: Send + 'static,
    Output: Send + 'static,
{
    /// Creates a pool of `num_workers` threads, each with a task queue of
    /// `buffer_size` and a shared output queue of `buffer_size * num_workers`.
    pub(crate) fn new<F>(num_workers: usize, buffer_size: usize, worker_fn: F) -> Result<Self>
    where
        F: Fn(Receiver<Task>, Sender<Output>, Arc<AtomicBool>) + Send + Sync + 'static,
    {
        if num_workers == 0 {
            return Err(anyhow!(
                "Cannot create WorkerPool with 0 workers. \
                Either set num_workers > 0 or materialize inline."
            ));
        }

        if buffer_size == 0 {
            return Err(anyhow!(
                "Cannot create WorkerPool with buffer_size 0. \
                Buffer size must be > 0 to prevent deadlocks."
            ));
        }

        let mut worker_task_txs = Vec::with_capacity(num_workers);
        let mut task_receivers = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let (tx, rx) = bounded(buffer_size);
            worker_task_txs.push(tx);
            task_receivers.push(rx);
        }

        let (output_tx, output_rx) = bounded(buffer_size * num_workers);

        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_fn = Arc::new(worker_fn);
        let mut workers = Vec::with_capacity(num_workers);

        for (worker_id, task_rx) in task_receivers.into_iter().enumerate() {
            let output_tx = output_tx.clone();
            let shutdown_clone = shutdown.clone();
            let worker_fn_clone = worker_fn.clone();

            // Already-started workers see their task channel disconnect if this fails.
            let handle = thread::Builder::new()
                .name(format!("mixer-worker-{}", worker_id))
                .spawn(move || {
                    set_worker_id(worker_id);
                    worker_fn_clone(task_rx, output_tx, shutdown_clone);
                })
                .with_context(|| format!("Failed to spawn worker thread {}", worker_id))?;

            workers.push(handle);
        }

        Ok(Self {
            workers,
            worker_task_txs,
            output_rx,
            shutdown,
        })
    }

    pub(crate) fn num_workers(&self) -> usize {
        self.worker_task_txs.len()
    }

    /// Sends a task to a specific worker, blocking while its queue is full.
    pub(crate) fn send_to(&self, worker_id: usize, task: Task) -> Result<()> {
        self.worker_task_txs[worker_id]
            .send(task)
            .map_err(|_| anyhow!("Worker {} channel closed", worker_id))
    }

    /// Receives the next output from any worker.
    /// Blocks until a result is available or timeout occurs.
    pub(crate) fn recv_timeout(&self, timeout: Duration) -> Result<Output> {
        self.output_rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => anyhow!(
                "Worker timeout after {:?} - possible deadlock or slow data loading",
                timeout
            ),
            RecvTimeoutError::Disconnected => {
                anyhow!("Worker channel disconnected - workers may have crashed")
            }
        })
    }
}

impl<Task, Output> Drop for WorkerPool<Task, Output> {
    fn drop(&mut self) {
        // Signal shutdown to all workers
        self.shutdown.store(true, Ordering::Relaxed);

        // Drop all task senders to close channels
        self.worker_task_txs.clear();

        // Wait for workers to finish
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
