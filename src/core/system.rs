//! `WorkerSystem`: the facade the host application talks to.
//!
//! It owns the handler registry, the task store and the worker pool. There
//! is no global instance; hosts keep the system in an `Arc` or pass it by
//! reference.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use super::audit::AuditSink;
use super::error::SchedulerError;
use super::handler::{HandlerRegistry, TaskHandler};
use super::retry::RetryPolicy;
use super::task::{TaskRecord, TaskStatus};
use super::worker::WorkerMetadata;
use super::worker_pool::WorkerPool;
use crate::builders::WorkerSystemBuilder;
use crate::config::{SchedulerConfig, WorkerConfig};
use crate::infra::store::TaskStore;
use crate::runtime::api::{SystemStatus, TaskRequest};
use crate::util::serde::{Priority, TaskId, WorkerId};

/// Task scheduler facade.
///
/// ```rust,ignore
/// use worker_scheduler::config::{SchedulerConfig, WorkerConfig};
/// use worker_scheduler::core::{handler_fn, WorkerSystem};
/// use worker_scheduler::util::serde::Priority;
///
/// let system = WorkerSystem::new(SchedulerConfig::default())?;
/// system.register_task_type("echo", handler_fn(|task, _ctx| async move {
///     Ok(task.payload().clone())
/// }))?;
/// system.start()?;
/// system.create_worker(WorkerConfig::named("w1"))?;
///
/// let id = system.submit_task("echo", serde_json::json!({"x": 1}), Priority::High, None, None)?;
/// let record = system.get_task_status(&id)?;
/// ```
pub struct WorkerSystem {
    handlers: Arc<HandlerRegistry>,
    store: Arc<dyn TaskStore>,
    pool: Arc<WorkerPool>,
}

impl WorkerSystem {
    /// System with an in-memory store and no audit sink.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` does not validate.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        WorkerSystemBuilder::new().with_config(config).build()
    }

    /// System with an in-memory store recording audit events into `audit`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` does not validate.
    pub fn with_audit(config: SchedulerConfig, audit: Arc<dyn AuditSink>) -> Result<Self, SchedulerError> {
        WorkerSystemBuilder::new()
            .with_config(config)
            .with_audit(audit)
            .build()
    }

    /// System over explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` does not validate.
    pub fn with_components(
        config: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Result<Self, SchedulerError> {
        let handlers = Arc::new(HandlerRegistry::new());
        let pool = WorkerPool::new(config, Arc::clone(&handlers), Arc::clone(&store), audit)?;
        Ok(Self { handlers, store, pool })
    }

    /// Start the background scheduler.
    ///
    /// # Errors
    ///
    /// Returns `Shutdown` after [`WorkerSystem::shutdown`].
    pub fn start(&self) -> Result<(), SchedulerError> {
        self.pool.start()?;
        info!(task_types = ?self.handlers.task_types(), "worker system started");
        Ok(())
    }

    /// Stop the scheduler and every worker; queued work is cancelled.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        info!("worker system shut down");
    }

    /// Whether the scheduler is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }

    /// Bind a handler to `task_type`. Registering the same type again
    /// replaces the handler and leaves the set of types unchanged.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty task type.
    pub fn register_task_type(
        &self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), SchedulerError> {
        let task_type = task_type.into();
        if task_type.trim().is_empty() {
            return Err(SchedulerError::Validation("task type must not be empty".into()));
        }
        let replaced = self.handlers.register(task_type.clone(), handler);
        info!(task_type = %task_type, replaced, "task type registered");
        Ok(())
    }

    /// Registered task types, sorted.
    #[must_use]
    pub fn list_task_types(&self) -> Vec<String> {
        self.handlers.task_types()
    }

    /// Create and start a worker. Without explicit capabilities the worker
    /// accepts every task type registered at this point.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` for an invalid config or a worker with no
    ///   capabilities
    /// - `Shutdown` after shutdown
    pub fn create_worker(&self, config: WorkerConfig) -> Result<WorkerId, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let metadata = WorkerMetadata::from_config(&config, self.pool.config(), self.handlers.task_types());
        if metadata.capabilities.is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "worker has no capabilities and no task types are registered".into(),
            ));
        }
        let worker = self.pool.register_worker(metadata)?;
        Ok(worker.worker_id().to_string())
    }

    /// Remove a worker gracefully.
    ///
    /// # Errors
    ///
    /// Returns `WorkerNotFound` for unknown ids.
    pub async fn unregister_worker(&self, worker_id: &str) -> Result<(), SchedulerError> {
        self.pool.unregister_worker(worker_id).await
    }

    /// Submit a task with the common fields.
    ///
    /// # Errors
    ///
    /// See [`WorkerSystem::submit`].
    pub fn submit_task(
        &self,
        task_type: &str,
        payload: Value,
        priority: Priority,
        timeout_seconds: Option<u64>,
        retry_policy: Option<RetryPolicy>,
    ) -> Result<TaskId, SchedulerError> {
        let mut request = TaskRequest::new(task_type, payload).with_priority(priority);
        request.timeout_seconds = timeout_seconds;
        request.retry_policy = retry_policy;
        self.submit(request)
    }

    /// Submit a fully specified task.
    ///
    /// # Errors
    ///
    /// - `Validation` for an unknown task type, a non-object payload, a zero
    ///   timeout, an invalid retry policy, an empty tag or an unknown
    ///   dependency; nothing is recorded in that case
    /// - `Capacity`, `WorkerUnavailable`, `Shutdown` or `Storage` from the
    ///   pool
    pub fn submit(&self, request: TaskRequest) -> Result<TaskId, SchedulerError> {
        self.validate(&request)?;
        self.pool.submit_task(request.into_task())
    }

    fn validate(&self, request: &TaskRequest) -> Result<(), SchedulerError> {
        let invalid = |msg: String| Err(SchedulerError::Validation(msg));
        if !self.handlers.contains(&request.task_type) {
            return invalid(format!("unknown task type `{}`", request.task_type));
        }
        if !request.payload.is_object() {
            return invalid("payload must be a JSON object".into());
        }
        if request.timeout_seconds == Some(0) {
            return invalid("timeout_seconds must be greater than 0".into());
        }
        if let Some(policy) = &request.retry_policy {
            policy.validate().map_err(SchedulerError::Validation)?;
        }
        if request.tags.iter().any(|t| t.trim().is_empty()) {
            return invalid("tags must not be empty".into());
        }
        for dep in &request.depends_on {
            if self.store.load_task(dep)?.is_none() {
                return invalid(format!("unknown dependency `{dep}`"));
            }
        }
        Ok(())
    }

    /// Current record of a task.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` for unknown ids and `Storage` on backend
    /// failure.
    pub fn get_task_status(&self, task_id: &str) -> Result<TaskRecord, SchedulerError> {
        self.store
            .load_task(task_id)?
            .map(|task| task.record())
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))
    }

    /// Records of all tasks, optionally filtered by status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on backend failure.
    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>, SchedulerError> {
        Ok(self
            .store
            .list_tasks(status)?
            .iter()
            .map(super::task::Task::record)
            .collect())
    }

    /// Cancel a task. Returns `false` when it had already finished.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` for unknown ids.
    pub fn cancel_task(&self, task_id: &str) -> Result<bool, SchedulerError> {
        self.pool.cancel_task(task_id)
    }

    /// System projection.
    #[must_use]
    pub fn get_system_status(&self) -> SystemStatus {
        SystemStatus {
            running: self.is_running(),
            registered_task_types: self.handlers.task_types(),
            pool_status: self.pool.get_status(),
        }
    }

    /// The worker pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// The task store.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }
}
