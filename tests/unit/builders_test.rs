//! Tests for builder modules

use std::sync::Arc;

use serde_json::json;
use worker_scheduler::builders::WorkerSystemBuilder;
use worker_scheduler::config::SchedulerConfig;
use worker_scheduler::core::{handler_fn, InMemoryAuditSink, SchedulerError};
use worker_scheduler::infra::store::InMemoryTaskStore;

#[test]
fn test_system_builder_defaults() {
    let builder = WorkerSystemBuilder::new();
    assert_eq!(builder.config(), &SchedulerConfig::default());

    let system = builder.build().unwrap();
    assert!(!system.is_running());
    assert!(system.list_task_types().is_empty());
}

#[test]
fn test_system_builder_registers_handlers() {
    let echo = handler_fn(|task, _ctx| async move { Ok(task.payload().clone()) });
    let system = WorkerSystemBuilder::new()
        .with_config(SchedulerConfig::default().with_pool_queue_size(10))
        .with_store(Arc::new(InMemoryTaskStore::new()))
        .with_audit(Arc::new(InMemoryAuditSink::new(100)))
        .with_handler("report.generate", Arc::clone(&echo))
        .with_handler("invoice.scrape", echo)
        .build()
        .unwrap();

    assert_eq!(system.list_task_types(), ["invoice.scrape", "report.generate"]);
    assert_eq!(system.pool().config().pool_queue_size, 10);
}

#[test]
fn test_system_builder_rejects_invalid_config() {
    let err = WorkerSystemBuilder::new()
        .with_config(SchedulerConfig::default().with_scheduler_interval_ms(0))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));
}

#[test]
fn test_system_builder_rejects_empty_task_type() {
    let err = WorkerSystemBuilder::new()
        .with_handler("", handler_fn(|_task, _ctx| async { Ok(json!(null)) }))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, SchedulerError::Validation(_)));
}
