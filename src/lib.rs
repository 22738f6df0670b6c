//! # Worker Scheduler
//!
//! An in-process task queue and worker-pool scheduler for async Rust
//! applications.
//!
//! The host registers opaque handlers per task type, creates workers, and
//! submits tasks. The scheduler takes care of the rest:
//!
//! - **Priority + FIFO ordering**: `Critical > Urgent > High > Normal > Low`,
//!   ties broken by creation time
//! - **Backpressure**: bounded pool queue and bounded per-worker backlogs;
//!   submissions fail fast with a capacity error instead of growing memory
//! - **Bounded concurrency**: each worker runs at most
//!   `max_concurrent_tasks` handlers at once, each in its own tokio task
//! - **Timeouts and retries**: per-task timeouts, exponential backoff and
//!   error-pattern based retry policies
//! - **Liveness**: workers heartbeat; silent workers are evicted and their
//!   tasks re-queued
//! - **Progress**: handlers report percentage, steps and details while
//!   running
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use worker_scheduler::config::{SchedulerConfig, WorkerConfig};
//! use worker_scheduler::core::{handler_fn, RetryPolicy, WorkerSystem};
//! use worker_scheduler::util::serde::Priority;
//!
//! let system = WorkerSystem::new(SchedulerConfig::default())?;
//! system.register_task_type("invoice.scrape", handler_fn(|task, ctx| async move {
//!     ctx.progress().report(50.0, "downloading");
//!     Ok(serde_json::json!({ "pages": 3 }))
//! }))?;
//! system.start()?;
//! system.create_worker(WorkerConfig::named("scraper").with_max_concurrent_tasks(4))?;
//!
//! let task_id = system.submit_task(
//!     "invoice.scrape",
//!     serde_json::json!({ "vendor": "acme" }),
//!     Priority::High,
//!     Some(60),
//!     Some(RetryPolicy::exponential(3).retry_on_pattern("connection (reset|refused)")),
//! )?;
//! let record = system.get_task_status(&task_id)?;
//! ```
//!
//! Persistence goes through the [`infra::store::TaskStore`] trait; an
//! in-memory implementation is used by default.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: tasks, workers, pool and facade.
pub mod core;
/// Configuration models for the scheduler and its workers.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Infrastructure adapters for queues and storage backends.
pub mod infra;
/// API request and response models.
pub mod runtime;
/// Shared utilities.
pub mod util;
