//! Fixed-size worker pool fed by a crossbeam channel

use crossbeam_channel::{unbounded, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one)
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = unbounded::<Task>();
        let workers = (0..size)
            .filter_map(|id| {
                let rx = receiver.clone();
                thread::Builder::new()
                    .name(format!("fan-calib-worker-{id}"))
                    .spawn(move || {
                        while let Ok(task) = rx.recv() {
                            task();
                        }
                        debug!(worker = id, "worker exiting");
                    })
                    .map_err(|e| warn!(worker = id, error = %e, "failed to spawn worker"))
                    .ok()
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a task without blocking. Returns false if the pool is shut down.
    pub fn execute<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.sender {
            Some(tx) if !self.workers.is_empty() => tx.send(Box::new(task)).is_ok(),
            _ => false,
        }
    }

    /// Stop accepting tasks, let workers drain the queue, and join them
    pub fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_every_task_before_drop_returns() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(3);
            assert_eq!(pool.size(), 3);
            for _ in 0..20 {
                let c = Arc::clone(&count);
                assert!(pool.execute(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }
        assert_eq!(count.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn shutdown_rejects_new_tasks() {
        let mut pool = WorkerPool::new(2);
        pool.shutdown();
        assert_eq!(pool.size(), 0);
        assert!(!pool.execute(|| {}));
    }

    #[test]
    fn zero_size_still_gets_a_worker() {
        assert_eq!(WorkerPool::new(0).size(), 1);
    }
}
