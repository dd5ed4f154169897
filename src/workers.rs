//! Bounded thread pool for per-group collection work (filtering, visibility).
//!
//! Uses crossbeam for an MPMC job queue with closure-based task execution.
//! One pool is shared by every collection unless a collection asks for its
//! own thread count.

use crossbeam::channel::{unbounded, RecvTimeoutError, Sender};
use log::{debug, error, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Outcome of a [`WorkerPool::run_all`] fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutReport {
    pub completed: usize,
    pub total: usize,
    pub timed_out: bool,
}

impl FanOutReport {
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

/// Fixed-size worker pool.
///
/// Workers pull closures off a shared channel until the pool is dropped.
pub struct WorkerPool {
    sender: Sender<Job>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Create a pool with `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let (tx, rx) = unbounded::<Job>();
        let mut handles = Vec::with_capacity(num_threads);

        for worker_id in 0..num_threads {
            let rx = rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("kymo-worker-{worker_id}"))
                .spawn(move || {
                    debug!("Worker {worker_id} started");
                    while let Ok(job) = rx.recv() {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!("Worker {worker_id}: job panicked");
                        }
                    }
                    debug!("Worker {worker_id} stopped");
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => error!("Failed to spawn worker thread {worker_id}: {e}"),
            }
        }

        debug!("WorkerPool initialized: {} threads", handles.len());
        Self {
            sender: tx,
            handles,
        }
    }

    /// Pool sized to the available parallelism.
    pub fn with_available_parallelism() -> Self {
        Self::new(num_cpus::get())
    }

    /// Process-wide pool shared by collections that do not set a thread count.
    pub fn shared() -> Arc<WorkerPool> {
        static SHARED: OnceLock<Arc<WorkerPool>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::with_available_parallelism())))
    }

    pub fn num_threads(&self) -> usize {
        self.handles.len()
    }

    /// Queue a closure. Runs asynchronously, no return value.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(e) = self.sender.send(Box::new(f)) {
            error!("Failed to enqueue job: {e}");
        }
    }

    /// Run every job on the pool and block until all finish or `timeout`
    /// elapses.
    ///
    /// Jobs still queued or running at the deadline keep going in the
    /// background; the report tells the caller how many finished in time.
    pub fn run_all<I>(&self, jobs: I, timeout: Duration) -> FanOutReport
    where
        I: IntoIterator<Item = Job>,
    {
        let (done_tx, done_rx) = unbounded::<()>();
        let mut total = 0;
        for job in jobs {
            let done = done_tx.clone();
            self.execute(move || {
                job();
                let _ = done.send(());
            });
            total += 1;
        }
        drop(done_tx);

        let deadline = Instant::now() + timeout;
        let mut completed = 0;
        let mut timed_out = false;
        while completed < total {
            match done_rx.recv_deadline(deadline) {
                Ok(()) => completed += 1,
                Err(RecvTimeoutError::Timeout) => {
                    timed_out = true;
                    break;
                }
                // Every sender is gone: the remaining jobs panicked.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if completed < total && !timed_out {
            warn!("{} of {total} pool jobs did not complete", total - completed);
        }
        FanOutReport {
            completed,
            total,
            timed_out,
        }
    }
}

// Sender drops → channel closes → workers exit their recv() loop.
impl Drop for WorkerPool {
    fn drop(&mut self) {
        debug!("WorkerPool shutting down ({} threads)", self.handles.len());
    }
}
