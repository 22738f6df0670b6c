//! Task handler traits, the handler registry, and the execution context a
//! handler receives (progress reporting and cooperative cancellation).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::watch;

use super::error::AppResult;
use super::task::{Task, TaskStatus};
use crate::infra::store::{persist_task, TaskStore};

/// Execution logic bound to a task type.
///
/// Handlers run inside their own tokio task. They may suspend freely; a
/// suspension never blocks sibling tasks on the same worker. Returning an
/// error marks the task FAILED with the error text (`{err:#}`), which is
/// what retry patterns are matched against.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use worker_scheduler::core::{AppResult, Task, TaskContext, TaskHandler};
///
/// struct InvoiceScraper;
///
/// #[async_trait]
/// impl TaskHandler for InvoiceScraper {
///     async fn handle(&self, task: Task, ctx: TaskContext) -> AppResult<serde_json::Value> {
///         ctx.progress().set_total_steps(2);
///         ctx.progress().complete_step("login");
///         if ctx.is_cancelled() {
///             anyhow::bail!("cancelled");
///         }
///         ctx.progress().complete_step("download");
///         Ok(serde_json::json!({ "invoice": task.payload()["id"] }))
///     }
/// }
/// ```
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Execute `task`, reporting progress through `ctx`.
    async fn handle(&self, task: Task, ctx: TaskContext) -> AppResult<Value>;
}

/// Adapter turning an async closure into a [`TaskHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Task, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<Value>> + Send + 'static,
{
    async fn handle(&self, task: Task, ctx: TaskContext) -> AppResult<Value> {
        (self.0)(task, ctx).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(Task, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<Value>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Task-type to handler bindings, shared by the facade and every worker.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `task_type` to `handler`, replacing any previous binding.
    /// Returns whether a binding was replaced.
    pub fn register(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> bool {
        self.handlers
            .write()
            .insert(task_type.into(), handler)
            .is_some()
    }

    /// Handler for `task_type`.
    #[must_use]
    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().get(task_type).cloned()
    }

    /// Whether `task_type` has a handler.
    #[must_use]
    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.read().contains_key(task_type)
    }

    /// Registered task types, sorted.
    #[must_use]
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }
}

/// Sending half of a task's cancellation signal, held by the worker.
#[derive(Debug, Clone)]
pub(crate) struct CancelHandle {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl CancelHandle {
    /// Request cancellation. The first reason wins.
    pub(crate) fn cancel(&self, reason: &str) {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.to_string());
            true
        });
    }
}

/// Receiving half of a task's cancellation signal. Cancellation is
/// cooperative: handlers observe it at their own suspension points.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<Option<String>>,
}

impl CancelSignal {
    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Reason given for the cancellation, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// Resolve once cancellation is requested. Never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(Option::is_some).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub(crate) fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(None);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

/// Progress channel handed to a handler.
///
/// Updates apply only while the task is RUNNING on this execution; once the
/// worker has finalized or released the task they are ignored. Every applied
/// update is written through to the store.
#[derive(Clone)]
pub struct ProgressReporter {
    task: Arc<Mutex<Task>>,
    store: Arc<dyn TaskStore>,
    started: Instant,
}

impl ProgressReporter {
    pub(crate) fn new(task: Arc<Mutex<Task>>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            task,
            store,
            started: Instant::now(),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut super::task::TaskProgress)) {
        let mut task = self.task.lock();
        if task.status() != TaskStatus::Running {
            return;
        }
        apply(&mut task.progress);
        task.progress
            .estimate_remaining(self.started.elapsed().as_secs_f64());
        task.progress.last_updated_ms = crate::util::clock::now_ms();
        persist_task(self.store.as_ref(), &task);
    }

    /// Report a percentage and the step being worked on. Percentages below
    /// the current value are ignored.
    pub fn report(&self, percentage: f64, current_step: impl Into<String>) {
        let step = current_step.into();
        self.update(|p| {
            p.advance_to(percentage);
            p.current_step = Some(step);
        });
    }

    /// Declare how many steps the task has.
    pub fn set_total_steps(&self, total: u32) {
        self.update(|p| p.total_steps = Some(total));
    }

    /// Finish a step; the percentage follows the step counters when the
    /// total is known.
    pub fn complete_step(&self, label: impl Into<String>) {
        let label = label.into();
        self.update(|p| {
            p.complete_step();
            p.current_step = Some(label);
        });
    }

    /// Attach a free-form detail.
    pub fn set_detail(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.update(|p| {
            p.details.insert(key, value);
        });
    }

    /// Current progress percentage.
    #[must_use]
    pub fn percentage(&self) -> f64 {
        self.task.lock().progress().percentage
    }
}

/// Everything a handler gets besides the task itself.
#[derive(Clone)]
pub struct TaskContext {
    progress: ProgressReporter,
    cancel: CancelSignal,
}

impl TaskContext {
    pub(crate) const fn new(progress: ProgressReporter, cancel: CancelSignal) -> Self {
        Self { progress, cancel }
    }

    /// Progress channel.
    #[must_use]
    pub const fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Cancellation signal.
    #[must_use]
    pub const fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}
