//! Error types for scheduler operations.

use thiserror::Error;

use super::task::TaskStatus;

/// Synchronous errors returned to callers of the scheduler API.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Unknown task type, malformed payload or invalid submission fields.
    #[error("validation error: {0}")]
    Validation(String),
    /// A bounded queue is at its maximum size.
    #[error("capacity exceeded: {0}")]
    Capacity(String),
    /// No capable worker exists and the pool queue is full.
    #[error("no worker available: {0}")]
    WorkerUnavailable(String),
    /// No task with this id is known.
    #[error("task not found: {0}")]
    TaskNotFound(String),
    /// No worker with this id is registered.
    #[error("worker not found: {0}")]
    WorkerNotFound(String),
    /// The task state machine rejected a transition.
    #[error("task {task_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        /// Task whose status was being changed.
        task_id: String,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The scheduler is not running.
    #[error("scheduler is shut down")]
    Shutdown,
    /// Storage collaborator failure.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Execution-time failures. These are captured on the task record and are
/// never returned to the submitter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskFailure {
    /// The handler returned an error or panicked.
    #[error("{0}")]
    Handler(String),
    /// The handler ran longer than the task timeout.
    #[error("task timed out after {seconds}s")]
    Timeout {
        /// Effective timeout that was exceeded.
        seconds: u64,
    },
    /// The task was cancelled before it finished.
    #[error("cancelled: {0}")]
    Cancelled(String),
    /// No handler is registered for the task type.
    #[error("no handler registered for task type `{0}`")]
    NoHandler(String),
    /// The task could not be put back on a queue.
    #[error("could not requeue task: {0}")]
    Requeue(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
