//! Fixed-size worker pool for consumer callbacks.
//!
//! Tasks go into one FIFO queue guarded by a mutex; workers sleep on a
//! condition variable until a task or shutdown arrives. A panicking task
//! is caught and counted, and its worker keeps servicing the queue.
//!
//! Shutdown stops new submissions, lets workers drain every task already
//! accepted, then joins them.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::error::CaptureError;

/// A unit of work queued on the pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    tasks: VecDeque<Task>,
    /// Tasks popped but not yet finished.
    active: usize,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    /// Signalled when a task is queued or shutdown begins.
    available: Condvar,
    /// Signalled when the pool becomes idle.
    idle: Condvar,
    completed: AtomicU64,
    panicked: AtomicU64,
}

/// Shared pool of dispatch threads.
///
/// Long-lived: one pool can serve any number of session start/stop
/// cycles, or several sessions at once behind an `Arc`.
pub struct DispatchPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl DispatchPool {
    /// Spawn a pool with `workers` threads (at least one).
    pub fn new(workers: usize) -> Result<Self, CaptureError> {
        let size = workers.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                tasks: VecDeque::new(),
                active: 0,
                shutdown: false,
            }),
            available: Condvar::new(),
            idle: Condvar::new(),
            completed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
        });

        let pool = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(size)),
            size,
        };

        for index in 0..size {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("deltacap-dispatch-{index}"))
                .spawn(move || worker_loop(shared))?;
            pool.workers.lock().push(handle);
        }

        debug!(workers = size, "dispatch pool started");
        Ok(pool)
    }

    /// Queue `task` and wake one idle worker.
    pub fn enqueue<F>(&self, task: F) -> Result<(), CaptureError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock();
        if queue.shutdown {
            return Err(CaptureError::PoolClosed);
        }
        queue.tasks.push_back(Box::new(task));
        drop(queue);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.size
    }

    /// Tasks that ran to completion or panicked.
    pub fn completed(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    /// Tasks that panicked.
    pub fn panicked(&self) -> u64 {
        self.shared.panicked.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.queue.lock().shutdown
    }

    /// Block until the queue is empty and no task is running, or until
    /// `timeout` elapses. Returns `true` if the pool went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.shared.queue.lock();
        while !queue.tasks.is_empty() || queue.active > 0 {
            if self.shared.idle.wait_until(&mut queue, deadline).timed_out() {
                return queue.tasks.is_empty() && queue.active == 0;
            }
        }
        true
    }

    /// Refuse new tasks, drain the accepted ones, and join all workers.
    ///
    /// Idempotent. Must not be called from inside a pool task.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.shutdown = true;
        }
        self.shared.available.notify_all();

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            if handle.join().is_err() {
                error!("dispatch worker exited abnormally");
            }
        }
        debug!(
            completed = self.completed(),
            panicked = self.panicked(),
            "dispatch pool stopped"
        );
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DispatchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchPool")
            .field("workers", &self.size)
            .field("completed", &self.completed())
            .field("panicked", &self.panicked())
            .finish()
    }
}

/// `available_parallelism`, or 1 when it cannot be determined.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    queue.active += 1;
                    break task;
                }
                if queue.shutdown {
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            shared.panicked.fetch_add(1, Ordering::Relaxed);
            error!("frame consumer panicked; continuing");
        }
        shared.completed.fetch_add(1, Ordering::Relaxed);

        let mut queue = shared.queue.lock();
        queue.active -= 1;
        if queue.active == 0 && queue.tasks.is_empty() {
            shared.idle.notify_all();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn runs_every_task() {
        let pool = DispatchPool::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        assert!(pool.wait_idle(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert_eq!(pool.completed(), 100);
    }

    #[test]
    fn panicking_task_does_not_poison_the_pool() {
        let pool = DispatchPool::new(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        pool.enqueue(|| panic!("consumer blew up")).unwrap();
        let c = Arc::clone(&counter);
        pool.enqueue(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert!(pool.wait_idle(Duration::from_secs(5)));
        assert_eq!(pool.panicked(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_drains_accepted_tasks() {
        let pool = DispatchPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            pool.enqueue(move || {
                thread::sleep(Duration::from_millis(2));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn enqueue_after_shutdown_is_rejected() {
        let pool = DispatchPool::new(1).unwrap();
        pool.shutdown();
        pool.shutdown();
        assert!(pool.is_shut_down());
        assert!(matches!(pool.enqueue(|| {}), Err(CaptureError::PoolClosed)));
    }

    #[test]
    fn single_worker_preserves_fifo_order() {
        let pool = DispatchPool::new(1).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let seen = Arc::clone(&seen);
            pool.enqueue(move || seen.lock().push(i)).unwrap();
        }
        assert!(pool.wait_idle(Duration::from_secs(5)));
        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn zero_workers_is_promoted_to_one() {
        let pool = DispatchPool::new(0).unwrap();
        assert_eq!(pool.worker_count(), 1);
        assert!(default_worker_count() >= 1);
    }
}
