//! Cross-thread task handoff into a single-consumer reactor.
//!
//! Any thread may [`post`](EventBridge::post) a task; only the thread that
//! owns the context `C` runs them, by calling [`drain`](EventBridge::drain).
//! Tasks receive the context by `&mut`, so reactor-owned state is never
//! shared with producer threads.
//!
//! # Ordering
//!
//! A single mutex-guarded FIFO: tasks run in the order their `post` calls
//! acquired the lock, whichever thread made them. The lock is held only to
//! append or to swap the queue out, never while a task runs.
//!
//! # Wakeups
//!
//! [`tokio::sync::Notify`] stores a permit when nobody is waiting, so a post
//! that races a drain still wakes the next [`wait`](EventBridge::wait).

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A deferred task, consumed exactly once on the reactor.
pub type PendingTask<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

/// Multi-producer task queue drained by one reactor.
pub struct EventBridge<C> {
    queue: Mutex<Vec<PendingTask<C>>>,
    notify: Notify,
    closed: AtomicBool,
}

impl<C> Default for EventBridge<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> EventBridge<C> {
    /// Create an open, empty bridge.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue `task` for the reactor and wake it.
    ///
    /// Returns false (dropping the task) once the bridge is closed.
    pub fn post<F>(&self, task: F) -> bool
    where F: FnOnce(&mut C) + Send + 'static {
        {
            let mut queue = self.queue.lock();
            if self.closed.load(Ordering::Acquire) {
                return false;
            }
            queue.push(Box::new(task));
        }
        self.notify.notify_one();
        true
    }

    /// Run every queued task against `ctx`, in enqueue order.
    ///
    /// Tasks posted while draining run on the next call. Stops early if a
    /// task closes the bridge. Returns the number of tasks run.
    pub fn drain(&self, ctx: &mut C) -> usize {
        let tasks = std::mem::take(&mut *self.queue.lock());
        let mut ran = 0;
        for task in tasks {
            if self.is_closed() {
                break;
            }
            task(ctx);
            ran += 1;
        }
        ran
    }

    /// Wait until a task is posted or the bridge is closed.
    pub async fn wait(&self) {
        if self.is_closed() {
            return;
        }
        self.notify.notified().await;
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Refuse further posts, drop queued tasks and wake the reactor.
    pub fn close(&self) {
        let dropped = {
            let mut queue = self.queue.lock();
            self.closed.store(true, Ordering::Release);
            std::mem::take(&mut *queue)
        };
        drop(dropped);
        self.notify.notify_one();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<C> fmt::Debug for EventBridge<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBridge")
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}
