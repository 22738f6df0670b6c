//! API-facing request/response models.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{PoolStatus, RetryPolicy, Task, WorkerSystem};
use crate::util::serde::{Priority, TaskId};

/// Task submission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Handler registry key.
    pub task_type: String,
    /// JSON object handed to the handler.
    pub payload: Value,
    /// Priority.
    #[serde(default)]
    pub priority: Priority,
    /// Handler timeout; the worker default applies when unset.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Retry policy; no retries when unset.
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    /// Do not run before this time (ms since epoch).
    #[serde(default)]
    pub scheduled_for_ms: Option<u128>,
    /// Tasks that must complete first.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TaskRequest {
    /// Request with default priority and no options.
    #[must_use]
    pub fn new(task_type: impl Into<String>, payload: Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            priority: Priority::default(),
            timeout_seconds: None,
            retry_policy: None,
            scheduled_for_ms: None,
            depends_on: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Delay activation until `at_ms`.
    #[must_use]
    pub fn scheduled_for(mut self, at_ms: u128) -> Self {
        self.scheduled_for_ms = Some(at_ms);
        self
    }

    /// Require `task_id` to complete first.
    #[must_use]
    pub fn depends_on(mut self, task_id: impl Into<TaskId>) -> Self {
        self.depends_on.push(task_id.into());
        self
    }

    /// Attach a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Build the PENDING task.
    #[must_use]
    pub fn into_task(self) -> Task {
        let mut task = Task::new(self.task_type, self.payload).with_priority(self.priority);
        if let Some(seconds) = self.timeout_seconds {
            task = task.with_timeout(seconds);
        }
        if let Some(policy) = self.retry_policy {
            task = task.with_retry_policy(policy);
        }
        if let Some(at_ms) = self.scheduled_for_ms {
            task = task.scheduled_for(at_ms);
        }
        for dep in self.depends_on {
            task = task.depends_on(dep);
        }
        for tag in self.tags {
            task = task.with_tag(tag);
        }
        task
    }
}

/// System status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Whether the scheduler is running.
    pub running: bool,
    /// Registered task types, sorted.
    pub registered_task_types: Vec<String>,
    /// Pool projection.
    pub pool_status: PoolStatus,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag: running with at least one worker.
    pub ok: bool,
    /// Registered workers.
    pub workers: usize,
    /// Tasks waiting in the pool queue.
    pub queue_size: usize,
}

/// Return a health payload.
#[must_use]
pub fn health(system: &WorkerSystem) -> Health {
    let workers = system.pool().workers().len();
    Health {
        ok: system.is_running() && workers > 0,
        workers,
        queue_size: system.pool().queue_size(),
    }
}
