//! Worker pool: persistent-thread-per-slot lifecycle management.
//!
//! `threads` OS threads are spawned at construction, each running the same
//! per-descriptor loop body supplied by the caller (the dispatcher core
//! owns that loop body — it needs access to dispatcher-private state to
//! perform the per-descriptor bookkeeping described by the worker pool's
//! contract). This module owns only thread spawn/naming/join, grounded on
//! this workspace's interpreter pool, which spawns one persistent,
//! named thread per slot rather than pulling from a transient thread pool
//! per call.

use std::sync::Mutex;
use std::thread::{self, JoinHandle};

/// Owns the worker pool's `JoinHandle`s and the thread naming convention.
/// `F` is invoked once per spawned thread with that thread's slot id; it is
/// expected to loop internally until the work queue it closes over is
/// closed and drained.
pub struct WorkerPool {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn spawn<F>(threads: usize, name_prefix: &str, worker_loop: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let worker_loop = std::sync::Arc::new(worker_loop);
        let mut handles = Vec::with_capacity(threads);
        for id in 0..threads {
            let f = std::sync::Arc::clone(&worker_loop);
            let handle = thread::Builder::new()
                .name(format!("{name_prefix}-{id}"))
                .spawn(move || f(id))
                .expect("failed to spawn dispatch worker thread");
            handles.push(handle);
        }
        WorkerPool {
            handles: Mutex::new(handles),
        }
    }

    /// Number of worker threads this pool was constructed with.
    pub fn size(&self) -> usize {
        self.handles.lock().expect("worker pool mutex poisoned").len()
    }

    /// Joins every worker thread, consuming the handles. Intended to be
    /// called once, after the queue those workers drain has been closed.
    pub fn join_all(&self) {
        let mut handles = self.handles.lock().expect("worker pool mutex poisoned");
        for handle in handles.drain(..) {
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
    fn spawns_requested_thread_count() {
        let pool = WorkerPool::spawn(3, "test-worker", |_id| {});
        assert_eq!(pool.size(), 3);
        pool.join_all();
    }

    #[test]
    fn each_worker_runs_its_loop_body() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_for_workers = Arc::clone(&seen);
        let pool = WorkerPool::spawn(4, "test-worker", move |_id| {
            seen_for_workers.fetch_add(1, Ordering::SeqCst);
        });
        pool.join_all();
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }
}
