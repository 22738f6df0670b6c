//! Builder assembling a `WorkerSystem` from configuration and collaborators.

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::{AuditSink, SchedulerError, TaskHandler, WorkerSystem};
use crate::infra::store::{InMemoryTaskStore, TaskStore};

/// Collects configuration, storage, audit and handlers, then builds a
/// stopped [`WorkerSystem`].
#[derive(Default)]
pub struct WorkerSystemBuilder {
    config: SchedulerConfig,
    store: Option<Arc<dyn TaskStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    handlers: Vec<(String, Arc<dyn TaskHandler>)>,
}

impl WorkerSystemBuilder {
    /// Builder with default configuration and an in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config`.
    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist records through `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Record scheduling decisions into `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Register `handler` for `task_type` at build time.
    #[must_use]
    pub fn with_handler(mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.push((task_type.into(), handler));
        self
    }

    /// Current configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Build the system.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate and
    /// `Validation` for an empty handler task type.
    pub fn build(self) -> Result<WorkerSystem, SchedulerError> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let system = WorkerSystem::with_components(self.config, store, self.audit)?;
        for (task_type, handler) in self.handlers {
            system.register_task_type(task_type, handler)?;
        }
        Ok(system)
    }
}
