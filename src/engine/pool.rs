//! Fixed-size worker pool for per-object background jobs
//!
//! Pass searches and ground-track sampling run here so the tick loop
//! never waits on them. Admission control is the per-object claim bit,
//! not the queue: callers claim the object first, then submit.

use crossbeam_channel::{unbounded, Sender};
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

pub const DEFAULT_WORKERS: usize = 4;

pub struct WorkerPool {
    tx: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let (tx, rx) = unbounded::<Task>();
        let workers = (0..size.max(1))
            .map(|i| {
                let rx = rx.clone();
                std::thread::Builder::new()
                    .name(format!("worker-{i}"))
                    .spawn(move || {
                        while let Ok(task) = rx.recv() {
                            task();
                        }
                    })
                    .expect("spawn worker thread")
            })
            .collect();
        Self {
            tx: Some(tx),
            workers,
        }
    }

    /// Enqueue a task. Silently dropped if the pool is already shutting
    /// down, which only happens on the way out of the process.
    pub fn submit<F: FnOnce() + Send + 'static>(&self, task: F) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Box::new(task));
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets each worker drain and exit.
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_all_tasks_run_before_drop_returns() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(4);
            for _ in 0..64 {
                let counter = counter.clone();
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn test_claim_bit_admits_single_job() {
        use crate::engine::object::test_support::{ISS_LINE1, ISS_LINE2, ISS_NAME};
        use crate::engine::TrackedObject;

        let obj = Arc::new(TrackedObject::from_elements(ISS_NAME, ISS_LINE1, ISS_LINE2).unwrap());
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(2);
            for _ in 0..8 {
                // Same admission dance the orchestrator does each tick.
                if obj.try_claim() {
                    let obj = obj.clone();
                    let ran = ran.clone();
                    pool.submit(move || {
                        ran.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(50));
                        obj.release_claim();
                    });
                }
            }
        }
        // Eight attempts while the first job holds the claim for 50 ms can
        // admit only a handful; at least one ran, never all eight.
        let ran = ran.load(Ordering::SeqCst);
        assert!(ran >= 1);
        assert!(ran < 8);
    }
}
