//! Tests for audit sink

use worker_scheduler::core::{build_audit_event, AuditAction, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);

    let event = build_audit_event(
        "task1",
        Some("invoice.scrape"),
        Some("worker1"),
        AuditAction::Assign,
        Some("direct".to_string()),
    );

    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].event_id, event.event_id);
    assert_eq!(events[0].task_id, "task1");
    assert_eq!(events[0].action, AuditAction::Assign);
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event("task1", None, None, AuditAction::Submit, None));
    sink.record(build_audit_event("task2", None, None, AuditAction::Submit, None));
    sink.record(build_audit_event("task3", None, None, AuditAction::Submit, None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task_id, "task2"); // First one popped
    assert_eq!(events[1].task_id, "task3");
}

#[test]
fn test_clones_share_buffer_and_filter_by_task() {
    let sink = InMemoryAuditSink::new(16);
    let other = sink.clone();

    other.record(build_audit_event("a", None, None, AuditAction::Submit, None));
    sink.record(build_audit_event("b", None, None, AuditAction::Submit, None));
    other.record(build_audit_event("a", None, None, AuditAction::Complete, None));

    let actions: Vec<AuditAction> = sink.events_for("a").iter().map(|e| e.action).collect();
    assert_eq!(actions, [AuditAction::Submit, AuditAction::Complete]);
    assert_eq!(sink.events().len(), 3);
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event(
        "task1",
        Some("report.generate"),
        None,
        AuditAction::Fail,
        Some("boom".to_string()),
    );

    assert!(!event.event_id.is_empty());
    assert_eq!(event.task_id, "task1");
    assert_eq!(event.task_type.as_deref(), Some("report.generate"));
    assert_eq!(event.worker_id, None);
    assert_eq!(event.action.to_string(), "fail");
    assert_eq!(event.detail, Some("boom".to_string()));
    assert!(event.created_at_ms > 0);
}
