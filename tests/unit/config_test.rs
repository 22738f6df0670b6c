//! Tests for configuration validation

use worker_scheduler::config::{SchedulerConfig, WorkerConfig};

#[test]
fn test_scheduler_config_validation() {
    let valid = SchedulerConfig::default()
        .with_pool_queue_size(50)
        .with_scheduler_interval_ms(20);
    assert!(valid.validate().is_ok());
}

#[test]
fn test_scheduler_config_invalid_queue_size() {
    let invalid = SchedulerConfig::default().with_pool_queue_size(0);
    let err = invalid.validate().unwrap_err();
    assert!(err.contains("pool_queue_size"));
}

#[test]
fn test_scheduler_config_invalid_multiplier() {
    let invalid = SchedulerConfig::default().with_heartbeat_timeout_multiplier(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_from_json() {
    let json = r#"{ "pool_queue_size": 20, "scheduler_interval_ms": 100 }"#;
    let cfg = SchedulerConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.pool_queue_size, 20);
    assert_eq!(cfg.scheduler_interval_ms, 100);
    assert_eq!(cfg.worker_queue_size, 100);
    assert_eq!(cfg.unregister_grace_period_ms, 30_000);
}

#[test]
fn test_scheduler_config_from_json_invalid() {
    assert!(SchedulerConfig::from_json_str(r#"{ "worker_queue_size": 0 }"#).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_worker_config_validation() {
    let valid = WorkerConfig::named("w1")
        .with_capability("invoice.scrape")
        .with_max_concurrent_tasks(4)
        .with_limits(Some(512), Some(1.5));
    assert!(valid.validate().is_ok());

    assert!(WorkerConfig::named("w1").with_max_concurrent_tasks(0).validate().is_err());
    assert!(WorkerConfig::named("w1").with_heartbeat_interval_ms(0).validate().is_err());
    assert!(WorkerConfig::named("w1").with_limits(None, Some(-1.0)).validate().is_err());
    assert!(WorkerConfig::named("w1").with_capability("").validate().is_err());
}

#[test]
fn test_worker_config_falls_back_to_scheduler_defaults() {
    let defaults = SchedulerConfig::default()
        .with_default_max_concurrent_tasks(3)
        .with_default_heartbeat_interval_ms(1_000)
        .with_default_task_timeout_secs(60);

    let bare = WorkerConfig::named("w1");
    assert_eq!(bare.effective_max_concurrent_tasks(&defaults), 3);
    assert_eq!(bare.effective_heartbeat_interval_ms(&defaults), 1_000);
    assert_eq!(bare.effective_task_timeout_seconds(&defaults), 60);

    let tuned = bare.with_max_concurrent_tasks(8).with_task_timeout_seconds(5);
    assert_eq!(tuned.effective_max_concurrent_tasks(&defaults), 8);
    assert_eq!(tuned.effective_task_timeout_seconds(&defaults), 5);
}

#[test]
fn test_worker_config_from_json() {
    let json = r#"{ "worker_name": "scraper", "capabilities": ["invoice.scrape"], "max_concurrent_tasks": 2 }"#;
    let cfg: WorkerConfig = serde_json::from_str(json).unwrap();
    assert_eq!(cfg.worker_name.as_deref(), Some("scraper"));
    assert!(cfg.capabilities.contains("invoice.scrape"));
    assert_eq!(cfg.max_concurrent_tasks, Some(2));
    assert_eq!(cfg.heartbeat_interval_ms, None);
}
