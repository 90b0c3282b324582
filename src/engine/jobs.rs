//! The worker pool.
//!
//! A small fixed pool of OS threads runs blocking [`Job`]s so the engine
//! task never blocks. `run` executes off-thread; the finished job travels
//! back over the engine's completion queue and `finish` runs on the engine
//! task, where it may mutate the world. Workers never touch users or
//! channels: a job owns its inputs and its output buffer, nothing else.
//!
//! Cancellation is cooperative: `JobHandle::cancel` sets a flag that `run`
//! is expected to poll.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::state::world::World;

/// A unit of blocking work.
pub trait Job: Send + 'static {
    fn name(&self) -> &'static str {
        "job"
    }

    /// Runs on a worker thread. Long loops should poll `cancelled`.
    fn run(&mut self, cancelled: &AtomicBool);

    /// Runs back on the engine task once `run` is done.
    fn finish(self: Box<Self>, world: &mut World);
}

/// Cooperative cancellation handle.
#[derive(Clone)]
pub struct JobHandle {
    cancelled: Arc<AtomicBool>,
}

impl JobHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

struct Queued {
    job: Box<dyn Job>,
    cancelled: Arc<AtomicBool>,
}

struct Shared {
    queue: Mutex<VecDeque<Queued>>,
    available: Condvar,
    shutdown: AtomicBool,
}

/// The pool. Results are reinjected into the engine through `done_tx`,
/// which doubles as the wake-up for the engine's select loop.
pub struct WorkerPool {
    shared: Arc<Shared>,
    threads: Vec<std::thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize, done_tx: mpsc::Sender<Box<dyn Job>>) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let threads = (0..size.max(1))
            .map(|i| {
                let shared = Arc::clone(&shared);
                let done_tx = done_tx.clone();
                std::thread::Builder::new()
                    .name(format!("ember-worker-{i}"))
                    .spawn(move || worker_loop(shared, done_tx))
                    .expect("cannot spawn worker thread")
            })
            .collect();
        Self { shared, threads }
    }

    /// Queue a job. Returns its cancellation handle.
    pub fn submit(&self, job: Box<dyn Job>) -> JobHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        debug!(job = job.name(), "Job submitted");
        self.shared.queue.lock().push_back(Queued {
            job,
            cancelled: Arc::clone(&cancelled),
        });
        self.shared.available.notify_one();
        JobHandle { cancelled }
    }

    /// Stop accepting work and join the threads once the queue drains.
    pub fn shutdown(mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        self.shared.available.notify_all();
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, done_tx: mpsc::Sender<Box<dyn Job>>) {
    loop {
        let queued = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(q) = queue.pop_front() {
                    break q;
                }
                if shared.shutdown.load(Ordering::Relaxed) {
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };
        let Queued { mut job, cancelled } = queued;
        if !cancelled.load(Ordering::Relaxed) {
            job.run(&cancelled);
        }
        if done_tx.blocking_send(job).is_err() {
            // Engine gone; nothing left to finish against.
            warn!("Job completion queue closed; dropping result");
            return;
        }
    }
}
