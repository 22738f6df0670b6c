//! Scheduler-wide configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix of the environment variables read by [`SchedulerConfig::from_env`].
pub const ENV_PREFIX: &str = "WORKER_SCHEDULER_";

/// Root scheduler configuration.
///
/// Every field has a default, so a partial JSON document or a sparse
/// environment is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Capacity of the pool-level queue.
    pub pool_queue_size: usize,
    /// Capacity of each worker's backlog.
    pub worker_queue_size: usize,
    /// Period of the background scheduler pass.
    pub scheduler_interval_ms: u64,
    /// A worker is evicted once its heartbeat is older than this many
    /// heartbeat intervals.
    pub heartbeat_timeout_multiplier: u32,
    /// How long `unregister_worker` waits for in-flight tasks.
    pub unregister_grace_period_ms: u64,
    /// Worker task timeout used when a worker config does not set one.
    pub default_task_timeout_secs: u64,
    /// Heartbeat interval used when a worker config does not set one.
    pub default_heartbeat_interval_ms: u64,
    /// Concurrency used when a worker config does not set one.
    pub default_max_concurrent_tasks: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_queue_size: 1000,
            worker_queue_size: 100,
            scheduler_interval_ms: 1000,
            heartbeat_timeout_multiplier: 3,
            unregister_grace_period_ms: 30_000,
            default_task_timeout_secs: 300,
            default_heartbeat_interval_ms: 30_000,
            default_max_concurrent_tasks: num_cpus::get().max(1),
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        let positive = [
            ("pool_queue_size", self.pool_queue_size as u64),
            ("worker_queue_size", self.worker_queue_size as u64),
            ("scheduler_interval_ms", self.scheduler_interval_ms),
            ("heartbeat_timeout_multiplier", u64::from(self.heartbeat_timeout_multiplier)),
            ("default_task_timeout_secs", self.default_task_timeout_secs),
            ("default_heartbeat_interval_ms", self.default_heartbeat_interval_ms),
            ("default_max_concurrent_tasks", self.default_max_concurrent_tasks as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(format!("{name} must be greater than 0"));
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from the environment.
    ///
    /// A `.env` file is loaded first when present. Each field can be set
    /// with `WORKER_SCHEDULER_<FIELD>` (upper case); unset fields keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable that failed to parse, or the
    /// validation failure.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Keys carry the
    /// [`ENV_PREFIX`].
    ///
    /// # Errors
    ///
    /// Same as [`SchedulerConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn read<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            field: &str,
            target: &mut T,
        ) -> Result<(), String> {
            let key = format!("{ENV_PREFIX}{}", field.to_ascii_uppercase());
            if let Some(raw) = lookup(&key) {
                *target = raw
                    .trim()
                    .parse()
                    .map_err(|_| format!("{key}: cannot parse `{raw}`"))?;
            }
            Ok(())
        }

        let mut cfg = Self::default();
        read(&lookup, "pool_queue_size", &mut cfg.pool_queue_size)?;
        read(&lookup, "worker_queue_size", &mut cfg.worker_queue_size)?;
        read(&lookup, "scheduler_interval_ms", &mut cfg.scheduler_interval_ms)?;
        read(&lookup, "heartbeat_timeout_multiplier", &mut cfg.heartbeat_timeout_multiplier)?;
        read(&lookup, "unregister_grace_period_ms", &mut cfg.unregister_grace_period_ms)?;
        read(&lookup, "default_task_timeout_secs", &mut cfg.default_task_timeout_secs)?;
        read(&lookup, "default_heartbeat_interval_ms", &mut cfg.default_heartbeat_interval_ms)?;
        read(&lookup, "default_max_concurrent_tasks", &mut cfg.default_max_concurrent_tasks)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Set the pool queue capacity.
    #[must_use]
    pub const fn with_pool_queue_size(mut self, size: usize) -> Self {
        self.pool_queue_size = size;
        self
    }

    /// Set the worker backlog capacity.
    #[must_use]
    pub const fn with_worker_queue_size(mut self, size: usize) -> Self {
        self.worker_queue_size = size;
        self
    }

    /// Set the scheduler pass period.
    #[must_use]
    pub const fn with_scheduler_interval_ms(mut self, ms: u64) -> Self {
        self.scheduler_interval_ms = ms;
        self
    }

    /// Set the heartbeat eviction multiplier.
    #[must_use]
    pub const fn with_heartbeat_timeout_multiplier(mut self, multiplier: u32) -> Self {
        self.heartbeat_timeout_multiplier = multiplier;
        self
    }

    /// Set the unregistration grace period.
    #[must_use]
    pub const fn with_unregister_grace_period_ms(mut self, ms: u64) -> Self {
        self.unregister_grace_period_ms = ms;
        self
    }

    /// Set the default worker task timeout.
    #[must_use]
    pub const fn with_default_task_timeout_secs(mut self, secs: u64) -> Self {
        self.default_task_timeout_secs = secs;
        self
    }

    /// Set the default heartbeat interval.
    #[must_use]
    pub const fn with_default_heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.default_heartbeat_interval_ms = ms;
        self
    }

    /// Set the default worker concurrency.
    #[must_use]
    pub const fn with_default_max_concurrent_tasks(mut self, n: usize) -> Self {
        self.default_max_concurrent_tasks = n;
        self
    }

    /// Scheduler pass period.
    #[must_use]
    pub const fn scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_interval_ms)
    }

    /// Unregistration grace period.
    #[must_use]
    pub const fn unregister_grace_period(&self) -> Duration {
        Duration::from_millis(self.unregister_grace_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = SchedulerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.heartbeat_timeout_multiplier, 3);
        assert!(cfg.default_max_concurrent_tasks >= 1);
    }

    #[test]
    fn test_from_lookup_overrides_fields() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("WORKER_SCHEDULER_POOL_QUEUE_SIZE", "5"),
            ("WORKER_SCHEDULER_SCHEDULER_INTERVAL_MS", " 50 "),
        ]);
        let cfg = SchedulerConfig::from_lookup(|k| vars.get(k).map(ToString::to_string)).unwrap();
        assert_eq!(cfg.pool_queue_size, 5);
        assert_eq!(cfg.scheduler_interval_ms, 50);
        assert_eq!(cfg.worker_queue_size, 100);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = SchedulerConfig::from_lookup(|k| {
            (k == "WORKER_SCHEDULER_WORKER_QUEUE_SIZE").then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(err.contains("WORKER_SCHEDULER_WORKER_QUEUE_SIZE"));
    }
}
