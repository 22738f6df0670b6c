//! In-memory bounded priority queue of pending tasks.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::core::Task;
use crate::util::serde::{Priority, TaskId};

/// Returned by [`TaskQueue::enqueue`] when the queue is at `max_size`. The
/// rejected task is handed back so the caller can route it elsewhere.
#[derive(Debug, Error)]
#[error("queue full (max_size = {max_size})")]
pub struct QueueFull {
    /// The task that was not accepted.
    pub task: Box<Task>,
    /// Capacity of the queue that rejected it.
    pub max_size: usize,
}

impl QueueFull {
    /// Take the rejected task back.
    #[must_use]
    pub fn into_task(self) -> Task {
        *self.task
    }
}

/// Ordering key: higher priority first, then earlier `created_at`, then
/// insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<Priority>,
    created_at_ms: u128,
    seq: u64,
}

#[derive(Default)]
struct Pending {
    entries: BTreeMap<QueueKey, Task>,
    index: HashMap<TaskId, QueueKey>,
    next_seq: u64,
}

impl Pending {
    fn take(&mut self, key: QueueKey) -> Option<Task> {
        let task = self.entries.remove(&key)?;
        self.index.remove(task.task_id());
        Some(task)
    }
}

/// Bounded, thread-safe priority queue.
///
/// A single mutex guards the pending map so `enqueue`, `dequeue` and
/// `get_size` stay consistent across producers; a `Notify` wakes the
/// consumer waiting in [`TaskQueue::dequeue`].
pub struct TaskQueue {
    max_size: usize,
    pending: Mutex<Pending>,
    notify: Notify,
}

impl TaskQueue {
    /// Create a queue holding at most `max_size` tasks.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            pending: Mutex::new(Pending::default()),
            notify: Notify::new(),
        }
    }

    /// Add a task, replacing any entry with the same id. Fails without
    /// touching the queue when it is full; callers must treat that as
    /// backpressure, not drop the task.
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] carrying the rejected task.
    pub fn enqueue(&self, task: Task) -> Result<(), QueueFull> {
        {
            let mut pending = self.pending.lock();
            if pending.entries.len() >= self.max_size {
                return Err(QueueFull {
                    task: Box::new(task),
                    max_size: self.max_size,
                });
            }
            if let Some(old) = pending.index.get(task.task_id()).copied() {
                pending.take(old);
            }
            let key = QueueKey {
                priority: Reverse(task.priority()),
                created_at_ms: task.created_at_ms(),
                seq: pending.next_seq,
            };
            pending.next_seq += 1;
            pending.index.insert(task.task_id().to_string(), key);
            pending.entries.insert(key, task);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Remove and return the highest-priority task without waiting.
    #[must_use]
    pub fn try_dequeue(&self) -> Option<Task> {
        let mut pending = self.pending.lock();
        let key = *pending.entries.keys().next()?;
        pending.take(key)
    }

    /// Remove and return the highest-priority task, waiting up to `timeout`
    /// for one to arrive. Returns `None` on expiry.
    pub async fn dequeue(&self, timeout: Duration) -> Option<Task> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(task) = self.try_dequeue() {
                return Some(task);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || tokio::time::timeout(remaining, notified).await.is_err() {
                return self.try_dequeue();
            }
        }
    }

    /// Wait up to `timeout` until the queue is non-empty, without removing
    /// anything. Returns whether a task is pending.
    pub async fn wait_for_task(&self, timeout: Duration) -> bool {
        let notified = self.notify.notified();
        if !self.is_empty() {
            return true;
        }
        let _ = tokio::time::timeout(timeout, notified).await;
        !self.is_empty()
    }

    /// Remove the best-ordered task satisfying `pred`.
    pub fn dequeue_where<F>(&self, mut pred: F) -> Option<Task>
    where
        F: FnMut(&Task) -> bool,
    {
        let mut pending = self.pending.lock();
        let key = pending
            .entries
            .iter()
            .find(|(_, task)| pred(task))
            .map(|(key, _)| *key)?;
        pending.take(key)
    }

    /// Remove every task satisfying `pred`, in queue order.
    pub fn drain_where<F>(&self, mut pred: F) -> Vec<Task>
    where
        F: FnMut(&Task) -> bool,
    {
        let mut pending = self.pending.lock();
        let keys: Vec<QueueKey> = pending
            .entries
            .iter()
            .filter(|(_, task)| pred(task))
            .map(|(key, _)| *key)
            .collect();
        keys.into_iter().filter_map(|key| pending.take(key)).collect()
    }

    /// Remove every task, in queue order.
    #[must_use]
    pub fn drain(&self) -> Vec<Task> {
        let mut pending = self.pending.lock();
        pending.index.clear();
        std::mem::take(&mut pending.entries).into_values().collect()
    }

    /// Remove a specific task.
    #[must_use]
    pub fn remove(&self, task_id: &str) -> Option<Task> {
        let mut pending = self.pending.lock();
        let key = pending.index.get(task_id).copied()?;
        pending.take(key)
    }

    /// Copy of the task that would be dequeued next.
    #[must_use]
    pub fn peek_next(&self) -> Option<Task> {
        self.pending.lock().entries.values().next().cloned()
    }

    /// Whether `task_id` is pending here.
    #[must_use]
    pub fn contains(&self, task_id: &str) -> bool {
        self.pending.lock().index.contains_key(task_id)
    }

    /// Number of pending tasks.
    #[must_use]
    pub fn get_size(&self) -> usize {
        self.pending.lock().entries.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().entries.is_empty()
    }

    /// Whether another task would be accepted right now.
    #[must_use]
    pub fn has_room(&self) -> bool {
        self.get_size() < self.max_size
    }

    /// Maximum number of pending tasks.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}
