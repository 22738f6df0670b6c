//! Task record, progress tracking and the task status state machine.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::SchedulerError;
use super::retry::RetryPolicy;
use crate::util::clock::now_ms;
use crate::util::serde::{new_id, Priority, TaskId, WorkerId};

/// Status of a task in the scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted, not yet routed.
    Pending,
    /// Waiting in a queue for capacity.
    Queued,
    /// Claimed by a worker, not started.
    Assigned,
    /// Handler is executing.
    Running,
    /// Handler finished successfully.
    Completed,
    /// Handler returned an error.
    Failed,
    /// Handler exceeded its timeout.
    Timeout,
    /// Cancelled before completion.
    Cancelled,
    /// Waiting out a backoff delay before being queued again.
    Retrying,
}

impl TaskStatus {
    /// Whether the state machine allows moving from `self` to `target`.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        use TaskStatus::{
            Assigned, Cancelled, Completed, Failed, Pending, Queued, Retrying, Running, Timeout,
        };

        matches!(
            (self, target),
            (Pending, Queued | Assigned | Cancelled)
                | (Queued, Assigned | Cancelled)
                | (Assigned, Running | Queued | Cancelled)
                | (Running, Completed | Failed | Timeout | Cancelled | Queued)
                | (Failed | Timeout, Retrying)
                | (Retrying, Queued | Failed | Cancelled)
        )
    }

    /// Statuses in which no handler is running and none will start without a
    /// retry decision.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled)
    }

    /// Lowercase name used in logs and records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Retrying => "retrying",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a task's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    /// Previous status.
    pub from: TaskStatus,
    /// New status.
    pub to: TaskStatus,
    /// When the transition happened (ms since epoch).
    pub at_ms: u128,
    /// Optional reason.
    pub reason: Option<String>,
}

/// Progress of a running task, written by the executing worker only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Completion percentage in `[0, 100]`.
    pub percentage: f64,
    /// Label of the step currently executing.
    pub current_step: Option<String>,
    /// Total number of steps, when known.
    pub total_steps: Option<u32>,
    /// Steps finished so far.
    pub completed_steps: u32,
    /// Estimated seconds until completion.
    pub estimated_remaining_seconds: Option<f64>,
    /// Free-form details.
    pub details: BTreeMap<String, Value>,
    /// Last update (ms since epoch).
    pub last_updated_ms: u128,
}

impl TaskProgress {
    /// Raise the percentage to `percentage`, clamped to `[0, 100]`. Lower
    /// values are ignored so progress never goes backwards.
    pub fn advance_to(&mut self, percentage: f64) {
        if !percentage.is_finite() {
            return;
        }
        let clamped = percentage.clamp(0.0, 100.0);
        if clamped > self.percentage {
            self.percentage = clamped;
        }
        self.last_updated_ms = now_ms();
    }

    /// Mark one more step finished and derive the percentage from the step
    /// counters when the total is known.
    pub fn complete_step(&mut self) {
        self.completed_steps = self.completed_steps.saturating_add(1);
        if let Some(total) = self.total_steps.filter(|t| *t > 0) {
            let done = self.completed_steps.min(total);
            self.advance_to(f64::from(done) * 100.0 / f64::from(total));
        } else {
            self.last_updated_ms = now_ms();
        }
    }

    /// Derive the remaining time from elapsed time and the current percentage.
    pub fn estimate_remaining(&mut self, elapsed_secs: f64) {
        if self.percentage > 0.0 && self.percentage < 100.0 && elapsed_secs.is_finite() {
            let rate = elapsed_secs / self.percentage;
            self.estimated_remaining_seconds = Some(rate * (100.0 - self.percentage));
        }
    }
}

/// One schedulable unit of work.
///
/// Identity fields (`task_id`, `task_type`, `priority`, `created_at_ms`,
/// `retry_policy`) are fixed once the task is built; everything else is
/// bookkeeping owned by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub(crate) task_id: TaskId,
    pub(crate) task_type: String,
    pub(crate) payload: Value,
    pub(crate) priority: Priority,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) timeout_seconds: Option<u64>,
    pub(crate) created_at_ms: u128,
    pub(crate) scheduled_for_ms: Option<u128>,
    pub(crate) depends_on: BTreeSet<TaskId>,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) progress: TaskProgress,
    pub(crate) assigned_worker_id: Option<WorkerId>,
    pub(crate) status: TaskStatus,
    pub(crate) attempts: u32,
    pub(crate) error: Option<String>,
    pub(crate) result: Option<Value>,
    pub(crate) updated_at_ms: u128,
    pub(crate) started_at_ms: Option<u128>,
    pub(crate) finished_at_ms: Option<u128>,
    pub(crate) history: Vec<StatusTransition>,
}

impl Task {
    /// Build a PENDING task with a fresh id and default settings.
    #[must_use]
    pub fn new(task_type: impl Into<String>, payload: Value) -> Self {
        let now = now_ms();
        Self {
            task_id: new_id(),
            task_type: task_type.into(),
            payload,
            priority: Priority::Normal,
            retry_policy: RetryPolicy::default(),
            timeout_seconds: None,
            created_at_ms: now,
            scheduled_for_ms: None,
            depends_on: BTreeSet::new(),
            tags: BTreeSet::new(),
            progress: TaskProgress::default(),
            assigned_worker_id: None,
            status: TaskStatus::Pending,
            attempts: 0,
            error: None,
            result: None,
            updated_at_ms: now,
            started_at_ms: None,
            finished_at_ms: None,
            history: Vec::new(),
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the handler timeout in seconds.
    #[must_use]
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Do not run before `at_ms` (ms since epoch).
    #[must_use]
    pub fn scheduled_for(mut self, at_ms: u128) -> Self {
        self.scheduled_for_ms = Some(at_ms);
        self
    }

    /// Require `task_id` to complete first.
    #[must_use]
    pub fn depends_on(mut self, task_id: impl Into<TaskId>) -> Self {
        self.depends_on.insert(task_id.into());
        self
    }

    /// Attach a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Override the creation timestamp. Only meaningful before submission.
    #[must_use]
    pub fn with_created_at(mut self, created_at_ms: u128) -> Self {
        self.created_at_ms = created_at_ms;
        self
    }

    /// Unique id.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Handler registry key.
    #[must_use]
    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    /// Opaque payload.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Requested timeout, if any.
    #[must_use]
    pub const fn timeout_seconds(&self) -> Option<u64> {
        self.timeout_seconds
    }

    /// Creation time (ms since epoch).
    #[must_use]
    pub const fn created_at_ms(&self) -> u128 {
        self.created_at_ms
    }

    /// Activation time, if delayed.
    #[must_use]
    pub const fn scheduled_for_ms(&self) -> Option<u128> {
        self.scheduled_for_ms
    }

    /// Prerequisite task ids.
    #[must_use]
    pub const fn dependencies(&self) -> &BTreeSet<TaskId> {
        &self.depends_on
    }

    /// Tags.
    #[must_use]
    pub const fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Current progress.
    #[must_use]
    pub const fn progress(&self) -> &TaskProgress {
        &self.progress
    }

    /// Worker the task is assigned to.
    #[must_use]
    pub fn assigned_worker_id(&self) -> Option<&str> {
        self.assigned_worker_id.as_deref()
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Number of times a handler has started for this task.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Last failure message.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Handler result, once completed.
    #[must_use]
    pub const fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Set once the task reached a final status with no retry pending.
    #[must_use]
    pub const fn finished_at_ms(&self) -> Option<u128> {
        self.finished_at_ms
    }

    /// Status history, oldest first.
    #[must_use]
    pub fn history(&self) -> &[StatusTransition] {
        &self.history
    }

    /// Whether the task has reached a final status.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished_at_ms.is_some()
    }

    /// Whether the activation time (if any) has passed.
    #[must_use]
    pub fn is_due(&self, now_ms: u128) -> bool {
        self.scheduled_for_ms.is_none_or(|at| at <= now_ms)
    }

    /// Move to `to`, recording the transition.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidTransition` if the state machine does
    /// not allow it.
    pub fn transition(
        &mut self,
        to: TaskStatus,
        reason: Option<String>,
    ) -> Result<(), SchedulerError> {
        if !self.status.can_transition_to(to) {
            return Err(SchedulerError::InvalidTransition {
                task_id: self.task_id.clone(),
                from: self.status,
                to,
            });
        }
        let now = now_ms();
        self.history.push(StatusTransition {
            from: self.status,
            to,
            at_ms: now,
            reason,
        });
        self.status = to;
        self.updated_at_ms = now;
        if matches!(to, TaskStatus::Completed | TaskStatus::Cancelled) {
            self.finished_at_ms = Some(now);
        }
        Ok(())
    }

    /// Count a new handler start. Progress belongs to one RUNNING period,
    /// so whatever the previous attempt reported is discarded.
    pub(crate) fn begin_attempt(&mut self) {
        self.attempts += 1;
        self.started_at_ms = Some(now_ms());
        self.progress = TaskProgress::default();
    }

    /// Seal a FAILED or TIMEOUT task once no retry will follow.
    pub(crate) fn mark_finished(&mut self) {
        if self.finished_at_ms.is_none() {
            self.finished_at_ms = Some(now_ms());
        }
    }

    /// Return the task to QUEUED, dropping its worker assignment.
    pub(crate) fn requeue(&mut self, reason: &str) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Queued, Some(reason.to_string()))?;
        self.assigned_worker_id = None;
        Ok(())
    }

    /// Cancel a task that has not finished yet.
    pub(crate) fn cancel(&mut self, reason: &str) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Cancelled, Some(reason.to_string()))?;
        self.error = Some(format!("cancelled: {reason}"));
        Ok(())
    }

    /// Read-only projection handed to external observers.
    #[must_use]
    pub fn record(&self) -> TaskRecord {
        TaskRecord {
            task_id: self.task_id.clone(),
            task_type: self.task_type.clone(),
            status: self.status,
            priority: self.priority,
            progress: self.progress.clone(),
            retry_policy: self.retry_policy.clone(),
            assigned_worker_id: self.assigned_worker_id.clone(),
            attempts: self.attempts,
            error: self.error.clone(),
            result: self.result.clone(),
            tags: self.tags.iter().cloned().collect(),
            created_at_ms: self.created_at_ms,
            updated_at_ms: self.updated_at_ms,
            started_at_ms: self.started_at_ms,
            finished_at_ms: self.finished_at_ms,
            history: self.history.clone(),
        }
    }
}

/// Status projection returned by `get_task_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task identifier.
    pub task_id: TaskId,
    /// Handler registry key.
    pub task_type: String,
    /// Current status.
    pub status: TaskStatus,
    /// Priority.
    pub priority: Priority,
    /// Progress snapshot.
    pub progress: TaskProgress,
    /// Retry policy.
    pub retry_policy: RetryPolicy,
    /// Worker currently holding the task.
    pub assigned_worker_id: Option<WorkerId>,
    /// Handler starts so far.
    pub attempts: u32,
    /// Human-readable failure, if any.
    pub error: Option<String>,
    /// Handler result, if completed.
    pub result: Option<Value>,
    /// Tags.
    pub tags: Vec<String>,
    /// Creation time.
    pub created_at_ms: u128,
    /// Last change.
    pub updated_at_ms: u128,
    /// Start of the latest attempt.
    pub started_at_ms: Option<u128>,
    /// Set once final.
    pub finished_at_ms: Option<u128>,
    /// Status history.
    pub history: Vec<StatusTransition>,
}
