//! Storage contract the scheduler expects from its persistence collaborator.
//!
//! The scheduler writes a task record on every status change and a worker
//! record on registration, heartbeat and removal. That is enough to
//! reconstruct scheduler state after a restart; resuming tasks across
//! restarts is left to the host.

pub mod memory;

pub use memory::InMemoryTaskStore;

use crate::core::{SchedulerError, Task, TaskStatus, WorkerRecord};

/// Persistence backend for task and worker records.
pub trait TaskStore: Send + Sync {
    /// Insert or replace a task record.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Storage` on backend failure.
    fn save_task(&self, task: &Task) -> Result<(), SchedulerError>;

    /// Load a task record.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Storage` on backend failure.
    fn load_task(&self, task_id: &str) -> Result<Option<Task>, SchedulerError>;

    /// Delete a task record, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Storage` on backend failure.
    fn delete_task(&self, task_id: &str) -> Result<bool, SchedulerError>;

    /// List task records, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Storage` on backend failure.
    fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, SchedulerError>;

    /// Insert or replace a worker record.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Storage` on backend failure.
    fn save_worker(&self, record: &WorkerRecord) -> Result<(), SchedulerError>;

    /// Load a worker record.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Storage` on backend failure.
    fn load_worker(&self, worker_id: &str) -> Result<Option<WorkerRecord>, SchedulerError>;

    /// List all worker records.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Storage` on backend failure.
    fn list_workers(&self) -> Result<Vec<WorkerRecord>, SchedulerError>;
}

/// Write a task record, logging instead of failing. Used on the execution
/// path where there is no caller to report to.
pub(crate) fn persist_task(store: &dyn TaskStore, task: &Task) {
    if let Err(e) = store.save_task(task) {
        tracing::error!(task_id = %task.task_id(), error = %e, "failed to persist task record");
    }
}

/// Write a worker record, logging instead of failing.
pub(crate) fn persist_worker(store: &dyn TaskStore, record: &WorkerRecord) {
    if let Err(e) = store.save_worker(record) {
        tracing::error!(worker_id = %record.metadata.worker_id, error = %e, "failed to persist worker record");
    }
}
