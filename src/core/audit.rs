//! Audit trail of scheduling decisions.
//!
//! The pool records one event per lifecycle decision (submit, assign, retry,
//! evict, ...) when a sink is attached.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;
use crate::util::serde::new_id;

/// Scheduling decision recorded by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Task accepted by the pool.
    Submit,
    /// Task placed on the pool queue.
    Enqueue,
    /// Task handed to a worker.
    Assign,
    /// Handler started.
    Start,
    /// Handler succeeded.
    Complete,
    /// Handler failed with no retry left.
    Fail,
    /// Handler timed out with no retry left.
    Timeout,
    /// Retry scheduled after a backoff delay.
    Retry,
    /// Task returned to the pool queue by an evicted or departing worker.
    Requeue,
    /// Task cancelled.
    Cancel,
    /// Worker removed for missing heartbeats.
    Evict,
    /// Submission refused.
    Reject,
}

impl AuditAction {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Enqueue => "enqueue",
            Self::Assign => "assign",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Timeout => "timeout",
            Self::Retry => "retry",
            Self::Requeue => "requeue",
            Self::Cancel => "cancel",
            Self::Evict => "evict",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related task, empty for worker-only events.
    pub task_id: String,
    /// Task type, if known.
    pub task_type: Option<String>,
    /// Worker involved, if any.
    pub worker_id: Option<String>,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction. Sinks are shared between the pool and its
/// background loops, so recording takes `&self`.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev. Clones share one buffer.
#[derive(Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer; the oldest events
    /// are dropped first.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Events recorded for one task, oldest first.
    #[must_use]
    pub fn events_for(&self, task_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    task_id: impl Into<String>,
    task_type: Option<&str>,
    worker_id: Option<&str>,
    action: AuditAction,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: new_id(),
        task_id: task_id.into(),
        task_type: task_type.map(str::to_string),
        worker_id: worker_id.map(str::to_string),
        action,
        created_at_ms: now_ms(),
        detail,
    }
}
