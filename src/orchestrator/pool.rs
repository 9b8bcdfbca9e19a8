//! Bounded worker pool.
//!
//! A fixed number of OS threads consume jobs from a shared queue. The
//! pool size caps how many tasks run concurrently, independent of how
//! many are queued. Dropping the pool closes the queue and joins the
//! workers after in-flight jobs finish.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of worker threads over a shared job queue.
pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create a pool with `size` worker threads.
    pub fn new(size: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..size.max(1))
            .map(|index| {
                let rx = Arc::clone(&rx);
                std::thread::Builder::new()
                    .name(format!("muster-worker-{}", index))
                    .spawn(move || worker_loop(&rx))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            tx: Some(tx),
            workers,
        }
    }

    /// Enqueue a job. Runs as soon as a worker is free.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(tx) = &self.tx {
            // Send only fails when all workers are gone, i.e. during
            // shutdown; the job is dropped with the queue then.
            let _ = tx.send(Box::new(job));
        }
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

fn worker_loop(rx: &Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = {
            let guard = rx.lock();
            guard.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => {
                debug!("worker queue closed, exiting");
                break;
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets workers drain remaining jobs and exit.
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
