//! Per-worker configuration.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::SchedulerConfig;

/// Settings for one worker, passed to `WorkerSystem::create_worker`.
///
/// Unset optional fields fall back to the [`SchedulerConfig`] defaults; an
/// empty capability set means "every task type registered at creation".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Display name. Defaults to `worker-<id prefix>`.
    pub worker_name: Option<String>,
    /// Free-form classification, e.g. `"io"` or `"cpu"`.
    pub worker_type: String,
    /// Task types this worker accepts.
    pub capabilities: BTreeSet<String>,
    /// Maximum tasks executing at once.
    pub max_concurrent_tasks: Option<usize>,
    /// Heartbeat period.
    pub heartbeat_interval_ms: Option<u64>,
    /// Timeout for tasks that do not set their own.
    pub task_timeout_seconds: Option<u64>,
    /// Memory hint, informational.
    pub memory_limit_mb: Option<u64>,
    /// CPU hint, informational.
    pub cpu_limit: Option<f64>,
}

impl WorkerConfig {
    /// Config with the given name and scheduler defaults otherwise.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            worker_name: Some(name.into()),
            worker_type: "general".into(),
            ..Self::default()
        }
    }

    /// Add a capability.
    #[must_use]
    pub fn with_capability(mut self, task_type: impl Into<String>) -> Self {
        self.capabilities.insert(task_type.into());
        self
    }

    /// Set the concurrency bound.
    #[must_use]
    pub fn with_max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = Some(n);
        self
    }

    /// Set the heartbeat period.
    #[must_use]
    pub fn with_heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = Some(ms);
        self
    }

    /// Set the default task timeout.
    #[must_use]
    pub fn with_task_timeout_seconds(mut self, secs: u64) -> Self {
        self.task_timeout_seconds = Some(secs);
        self
    }

    /// Set the worker type.
    #[must_use]
    pub fn with_worker_type(mut self, worker_type: impl Into<String>) -> Self {
        self.worker_type = worker_type.into();
        self
    }

    /// Set the resource hints.
    #[must_use]
    pub fn with_limits(mut self, memory_limit_mb: Option<u64>, cpu_limit: Option<f64>) -> Self {
        self.memory_limit_mb = memory_limit_mb;
        self.cpu_limit = cpu_limit;
        self
    }

    /// Validate the explicitly set values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_tasks == Some(0) {
            return Err("max_concurrent_tasks must be greater than 0".into());
        }
        if self.heartbeat_interval_ms == Some(0) {
            return Err("heartbeat_interval_ms must be greater than 0".into());
        }
        if self.task_timeout_seconds == Some(0) {
            return Err("task_timeout_seconds must be greater than 0".into());
        }
        if self.cpu_limit.is_some_and(|c| !c.is_finite() || c <= 0.0) {
            return Err("cpu_limit must be a positive number".into());
        }
        if self.capabilities.iter().any(String::is_empty) {
            return Err("capabilities must not contain empty task types".into());
        }
        Ok(())
    }

    /// Concurrency after applying scheduler defaults.
    #[must_use]
    pub fn effective_max_concurrent_tasks(&self, defaults: &SchedulerConfig) -> usize {
        self.max_concurrent_tasks
            .unwrap_or(defaults.default_max_concurrent_tasks)
    }

    /// Heartbeat period after applying scheduler defaults.
    #[must_use]
    pub fn effective_heartbeat_interval_ms(&self, defaults: &SchedulerConfig) -> u64 {
        self.heartbeat_interval_ms
            .unwrap_or(defaults.default_heartbeat_interval_ms)
    }

    /// Task timeout after applying scheduler defaults.
    #[must_use]
    pub fn effective_task_timeout_seconds(&self, defaults: &SchedulerConfig) -> u64 {
        self.task_timeout_seconds
            .unwrap_or(defaults.default_task_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(WorkerConfig::named("w").validate().is_ok());
        assert!(WorkerConfig::named("w").with_max_concurrent_tasks(0).validate().is_err());
        assert!(WorkerConfig::named("w").with_task_timeout_seconds(0).validate().is_err());
        assert!(WorkerConfig::named("w").with_capability("").validate().is_err());
    }

    #[test]
    fn test_effective_values_fall_back_to_scheduler() {
        let defaults = SchedulerConfig::default().with_default_max_concurrent_tasks(7);
        let cfg = WorkerConfig::named("w").with_heartbeat_interval_ms(100);
        assert_eq!(cfg.effective_max_concurrent_tasks(&defaults), 7);
        assert_eq!(cfg.effective_heartbeat_interval_ms(&defaults), 100);
        assert_eq!(cfg.effective_task_timeout_seconds(&defaults), 300);
    }
}
