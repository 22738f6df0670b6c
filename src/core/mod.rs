//! Core scheduling abstractions: tasks, retry policy, handlers, workers, the
//! pool and the `WorkerSystem` facade.

pub mod audit;
pub mod error;
pub mod handler;
pub mod retry;
pub mod system;
pub mod task;
pub mod worker;
pub mod worker_pool;

pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use error::{AppResult, SchedulerError, TaskFailure};
pub use handler::{handler_fn, CancelSignal, FnHandler, HandlerRegistry, ProgressReporter, TaskContext, TaskHandler};
pub use retry::RetryPolicy;
pub use system::WorkerSystem;
pub use task::{StatusTransition, Task, TaskProgress, TaskRecord, TaskStatus};
pub use worker::{Worker, WorkerMetadata, WorkerRecord, WorkerStats, WorkerStatus};
pub use worker_pool::{PoolStats, PoolStatus, WorkerPool};
