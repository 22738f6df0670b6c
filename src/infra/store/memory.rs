//! In-memory storage backend.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::TaskStore;
use crate::core::{SchedulerError, Task, TaskStatus, WorkerRecord};

/// Process-local store for development, tests and single-process hosts.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
    workers: RwLock<HashMap<String, WorkerRecord>>,
}

impl InMemoryTaskStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of task records.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.read().len()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn save_task(&self, task: &Task) -> Result<(), SchedulerError> {
        self.tasks
            .write()
            .insert(task.task_id().to_string(), task.clone());
        Ok(())
    }

    fn load_task(&self, task_id: &str) -> Result<Option<Task>, SchedulerError> {
        Ok(self.tasks.read().get(task_id).cloned())
    }

    fn delete_task(&self, task_id: &str) -> Result<bool, SchedulerError> {
        Ok(self.tasks.write().remove(task_id).is_some())
    }

    fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, SchedulerError> {
        let tasks = self.tasks.read();
        let mut out: Vec<Task> = tasks
            .values()
            .filter(|t| status.is_none_or(|s| t.status() == s))
            .cloned()
            .collect();
        out.sort_by_key(Task::created_at_ms);
        Ok(out)
    }

    fn save_worker(&self, record: &WorkerRecord) -> Result<(), SchedulerError> {
        self.workers
            .write()
            .insert(record.metadata.worker_id.clone(), record.clone());
        Ok(())
    }

    fn load_worker(&self, worker_id: &str) -> Result<Option<WorkerRecord>, SchedulerError> {
        Ok(self.workers.read().get(worker_id).cloned())
    }

    fn list_workers(&self) -> Result<Vec<WorkerRecord>, SchedulerError> {
        let mut out: Vec<WorkerRecord> = self.workers.read().values().cloned().collect();
        out.sort_by_key(|r| r.metadata.registration_time_ms);
        Ok(out)
    }
}
