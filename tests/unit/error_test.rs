//! Tests for error types

use worker_scheduler::core::{SchedulerError, TaskFailure};

#[test]
fn test_validation_error() {
    let err = SchedulerError::Validation("unknown task type `ghost.run`".to_string());
    assert_eq!(format!("{}", err), "validation error: unknown task type `ghost.run`");
}

#[test]
fn test_capacity_error() {
    let err = SchedulerError::Capacity("pool queue full".to_string());
    assert_eq!(format!("{}", err), "capacity exceeded: pool queue full");
}

#[test]
fn test_shutdown_error() {
    assert_eq!(format!("{}", SchedulerError::Shutdown), "scheduler is shut down");
}

#[test]
fn test_storage_error() {
    let err = SchedulerError::Storage("connection failed".to_string());
    assert_eq!(format!("{}", err), "storage error: connection failed");
}

#[test]
fn test_task_failure_messages() {
    assert_eq!(TaskFailure::Cancelled("by request".into()).to_string(), "cancelled: by request");
    assert_eq!(
        TaskFailure::Requeue("queue full".into()).to_string(),
        "could not requeue task: queue full"
    );
}
