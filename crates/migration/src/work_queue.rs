//! Bounded FIFO work queue with a fixed worker pool
//!
//! Each migration stage runs its item migrators on one `WorkQueue`. The
//! queue holds at most `capacity` pending tasks; `submit` blocks while it is
//! full, so enumerating a large export never buffers more than that many
//! migrators ahead of the workers.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::error;

/// Error returned when submitting to a queue that was shut down.
#[derive(Debug)]
pub struct QueueClosed;

impl std::fmt::Display for QueueClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "work queue is shut down")
    }
}

impl std::error::Error for QueueClosed {}

/// Queue metrics snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Number of tasks waiting in the queue.
    pub queue_depth: usize,
    /// Number of tasks currently being executed by workers.
    pub active_tasks: usize,
    /// Total number of tasks finished, panicked ones included.
    pub tasks_completed: u64,
    /// Number of tasks that panicked.
    pub tasks_panicked: u64,
    /// Number of worker threads.
    pub worker_count: usize,
}

type Task = Box<dyn FnOnce() + Send>;

struct QueueInner {
    queue: Mutex<VecDeque<Task>>,
    work_ready: Condvar,
    space_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    active_tasks: AtomicUsize,
    capacity: usize,
    tasks_completed: AtomicU64,
    tasks_panicked: AtomicU64,
}

/// A bounded FIFO task queue drained by a fixed pool of worker threads.
pub struct WorkQueue {
    inner: Arc<QueueInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl WorkQueue {
    /// Create a queue with `num_threads` workers named `{name}-0`, `{name}-1`, ...
    ///
    /// # Errors
    ///
    /// Returns the spawn error if a worker thread cannot be started; workers
    /// already started are stopped first.
    pub fn new(name: &str, num_threads: usize, capacity: usize) -> io::Result<Self> {
        let inner = Arc::new(QueueInner {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            work_ready: Condvar::new(),
            space_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            active_tasks: AtomicUsize::new(0),
            capacity: capacity.max(1),
            tasks_completed: AtomicU64::new(0),
            tasks_panicked: AtomicU64::new(0),
        });

        let queue = WorkQueue {
            inner,
            workers: Mutex::new(Vec::with_capacity(num_threads)),
            num_threads,
        };
        for i in 0..num_threads {
            let inner_clone = Arc::clone(&queue.inner);
            let spawned = std::thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || worker_loop(&inner_clone));
            match spawned {
                Ok(handle) => queue.workers.lock().push(handle),
                Err(e) => {
                    queue.shutdown();
                    return Err(e);
                }
            }
        }
        Ok(queue)
    }

    /// Submit a task, blocking while the queue is full.
    ///
    /// Returns `Err(QueueClosed)` if the queue has been shut down.
    pub fn submit(&self, work: impl FnOnce() + Send + 'static) -> Result<(), QueueClosed> {
        {
            let mut queue = self.inner.queue.lock();
            loop {
                if self.inner.shutdown.load(AtomicOrdering::Acquire) {
                    return Err(QueueClosed);
                }
                if queue.len() < self.inner.capacity {
                    break;
                }
                self.inner.space_ready.wait(&mut queue);
            }
            queue.push_back(Box::new(work));
        }
        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Block until all queued and in-flight tasks have completed.
    ///
    /// Workers remain running after drain completes.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while !queue.is_empty() || self.inner.active_tasks.load(AtomicOrdering::Acquire) > 0 {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Signal workers to exit and join them. Queued tasks still run.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, AtomicOrdering::Release);
        {
            // Holding the lock while notifying prevents a lost wakeup
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
            self.inner.space_ready.notify_all();
        }

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Return a snapshot of queue metrics.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queue_depth: self.inner.queue.lock().len(),
            active_tasks: self.inner.active_tasks.load(AtomicOrdering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(AtomicOrdering::Relaxed),
            tasks_panicked: self.inner.tasks_panicked.load(AtomicOrdering::Relaxed),
            worker_count: self.num_threads,
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements `active_tasks` and wakes drain waiters on drop, even when the
/// task panicked.
struct ActiveTaskGuard<'a> {
    inner: &'a QueueInner,
}

impl<'a> Drop for ActiveTaskGuard<'a> {
    fn drop(&mut self) {
        let queue = self.inner.queue.lock();
        let prev_active = self.inner.active_tasks.fetch_sub(1, AtomicOrdering::Release);
        self.inner
            .tasks_completed
            .fetch_add(1, AtomicOrdering::Relaxed);
        if prev_active == 1 && queue.is_empty() {
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop(inner: &QueueInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    inner.active_tasks.fetch_add(1, AtomicOrdering::Release);
                    break task;
                }
                if inner.shutdown.load(AtomicOrdering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };
        inner.space_ready.notify_one();

        let _guard = ActiveTaskGuard { inner };
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            inner.tasks_panicked.fetch_add(1, AtomicOrdering::Relaxed);
            error!(
                target: "cnxrepo::runner",
                "work queue task panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}
