//! Tests for the request and status types

use worker_scheduler::config::{SchedulerConfig, WorkerConfig};
use worker_scheduler::core::{handler_fn, RetryPolicy, TaskStatus, WorkerSystem};
use worker_scheduler::runtime::{health, TaskRequest};
use worker_scheduler::util::Priority;

use serde_json::json;

#[test]
fn test_task_request_into_task() {
    let task = TaskRequest::new("invoice.scrape", json!({ "id": 7 }))
        .with_priority(Priority::High)
        .with_timeout(30)
        .with_retry_policy(RetryPolicy::exponential(3))
        .scheduled_for(1_000)
        .depends_on("parent")
        .with_tag("billing")
        .into_task();

    assert_eq!(task.task_type(), "invoice.scrape");
    assert_eq!(task.status(), TaskStatus::Pending);
    assert_eq!(task.priority(), Priority::High);
    assert_eq!(task.timeout_seconds(), Some(30));
    assert_eq!(task.retry_policy().max_attempts, 3);
    assert_eq!(task.scheduled_for_ms(), Some(1_000));
    assert!(task.dependencies().contains("parent"));
    assert!(task.tags().contains("billing"));
}

#[test]
fn test_task_request_from_json_defaults() {
    let request: TaskRequest =
        serde_json::from_str(r#"{ "task_type": "echo", "payload": { "x": 1 } }"#).unwrap();
    assert_eq!(request.priority, Priority::Normal);
    assert!(request.timeout_seconds.is_none());
    assert!(request.depends_on.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health_reflects_workers() {
    let system = WorkerSystem::new(SchedulerConfig::default()).unwrap();
    system
        .register_task_type("echo", handler_fn(|task, _ctx| async move { Ok(task.payload().clone()) }))
        .unwrap();
    assert!(!health(&system).ok);

    system.start().unwrap();
    assert!(!health(&system).ok);

    system.create_worker(WorkerConfig::named("w1")).unwrap();
    let h = health(&system);
    assert!(h.ok);
    assert_eq!(h.workers, 1);
    assert_eq!(h.queue_size, 0);

    let status = system.get_system_status();
    assert!(status.running);
    assert_eq!(status.registered_task_types, ["echo"]);
    assert_eq!(status.pool_status.workers.len(), 1);

    system.shutdown().await;
    assert!(!health(&system).ok);
}
