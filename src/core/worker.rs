//! Worker: a bounded-concurrency execution context with its own backlog.
//!
//! A worker runs two background tokio tasks once started:
//!
//! - a **heartbeat loop** refreshing `last_heartbeat_ms` and persisting the
//!   worker record every `heartbeat_interval_ms`;
//! - a **processing loop** that waits for backlog work, acquires a
//!   concurrency permit and only then dequeues, so the task with the best
//!   priority at the moment capacity frees is the one that runs.
//!
//! Each executing task lives in its own tokio task holding one permit of a
//! `max_concurrent_tasks` semaphore. The handler itself runs in a nested
//! tokio task so panics, timeouts and aborts are contained.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::audit::{build_audit_event, AuditAction, AuditSink};
use super::error::{AppResult, TaskFailure};
use super::handler::{cancel_pair, CancelHandle, CancelSignal, HandlerRegistry, ProgressReporter, TaskContext};
use super::task::{Task, TaskStatus};
use crate::config::{SchedulerConfig, WorkerConfig};
use crate::infra::queue::{QueueFull, TaskQueue};
use crate::infra::store::{persist_task, persist_worker, TaskStore};
use crate::util::clock::now_ms;
use crate::util::serde::{new_id, TaskId, WorkerId};

/// How long the processing loop waits on an empty backlog before checking
/// the shutdown signal again.
const BACKLOG_POLL: Duration = Duration::from_millis(500);

/// Lifecycle status of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Not started, evicted or unregistered.
    Offline,
    /// Running, nothing in flight.
    Idle,
    /// Running with at least one task in flight.
    Busy,
    /// Unregistering: no new work, waiting for in-flight tasks.
    Draining,
}

impl WorkerStatus {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Draining => "draining",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMetadata {
    /// Unique id.
    pub worker_id: WorkerId,
    /// Display name.
    pub worker_name: String,
    /// Free-form classification.
    pub worker_type: String,
    /// Task types this worker accepts.
    pub capabilities: BTreeSet<String>,
    /// Concurrency bound.
    pub max_concurrent_tasks: usize,
    /// Memory hint.
    pub memory_limit_mb: Option<u64>,
    /// CPU hint.
    pub cpu_limit: Option<f64>,
    /// Heartbeat period.
    pub heartbeat_interval_ms: u64,
    /// Timeout for tasks that do not set their own.
    pub task_timeout_seconds: u64,
    /// When the worker was created (ms since epoch).
    pub registration_time_ms: u128,
}

impl WorkerMetadata {
    /// Resolve a [`WorkerConfig`] against scheduler defaults. An empty
    /// capability set is replaced by `fallback_capabilities`.
    #[must_use]
    pub fn from_config<I>(config: &WorkerConfig, defaults: &SchedulerConfig, fallback_capabilities: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let worker_id = new_id();
        let worker_name = config
            .worker_name
            .clone()
            .unwrap_or_else(|| format!("worker-{}", worker_id.chars().take(8).collect::<String>()));
        let capabilities = if config.capabilities.is_empty() {
            fallback_capabilities.into_iter().collect()
        } else {
            config.capabilities.clone()
        };
        Self {
            worker_id,
            worker_name,
            worker_type: config.worker_type.clone(),
            capabilities,
            max_concurrent_tasks: config.effective_max_concurrent_tasks(defaults),
            memory_limit_mb: config.memory_limit_mb,
            cpu_limit: config.cpu_limit,
            heartbeat_interval_ms: config.effective_heartbeat_interval_ms(defaults),
            task_timeout_seconds: config.effective_task_timeout_seconds(defaults),
            registration_time_ms: now_ms(),
        }
    }
}

/// Execution counters of one worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Tasks completed.
    pub completed: u64,
    /// Tasks failed (including attempts that were retried).
    pub failed: u64,
    /// Tasks that hit their timeout.
    pub timed_out: u64,
    /// Tasks cancelled on this worker.
    pub cancelled: u64,
    /// Tasks in flight.
    pub running: usize,
    /// Tasks waiting in the backlog.
    pub backlog: usize,
    /// Mean handler wall time.
    pub avg_processing_ms: f64,
}

/// Persisted projection of a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Static description.
    pub metadata: WorkerMetadata,
    /// Lifecycle status.
    pub status: WorkerStatus,
    /// Last heartbeat (ms since epoch).
    pub last_heartbeat_ms: u128,
    /// Counters.
    pub stats: WorkerStats,
}

#[derive(Debug, Default)]
struct WorkerCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    processed: AtomicU64,
    total_processing_ms: AtomicU64,
}

impl WorkerCounters {
    fn record_processing(&self, elapsed: Duration) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.total_processing_ms.fetch_add(ms, Ordering::Relaxed);
    }

    #[allow(clippy::cast_precision_loss)]
    fn avg_processing_ms(&self) -> f64 {
        let processed = self.processed.load(Ordering::Relaxed);
        if processed == 0 {
            return 0.0;
        }
        self.total_processing_ms.load(Ordering::Relaxed) as f64 / processed as f64
    }
}

/// Messages from workers to the pool's event loop.
#[derive(Debug)]
pub(crate) enum PoolEvent {
    /// A concurrency permit was released.
    SlotFreed {
        /// Worker that freed the slot.
        worker_id: WorkerId,
    },
    /// A task entered RETRYING and should be queued again after `delay`.
    Retry {
        /// Snapshot of the task in RETRYING.
        task: Box<Task>,
        /// Backoff delay.
        delay: Duration,
    },
    /// A task reached a worker that no longer runs anything; it must go
    /// back to the pool queue.
    Requeue {
        /// The task, still ASSIGNED.
        task: Box<Task>,
    },
}

/// Collaborators shared by every worker of a pool.
#[derive(Clone)]
pub(crate) struct WorkerDeps {
    pub(crate) handlers: Arc<HandlerRegistry>,
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) audit: Option<Arc<dyn AuditSink>>,
    pub(crate) events: mpsc::UnboundedSender<PoolEvent>,
    pub(crate) backlog_size: usize,
}

type SharedTask = Arc<Mutex<Task>>;

struct InFlight {
    task: SharedTask,
    cancel: CancelHandle,
    abort: AbortHandle,
}

enum Outcome {
    Completed(Value),
    Failed(TaskFailure),
    TimedOut(TaskFailure),
    Cancelled(String),
}

impl Outcome {
    /// Once cancellation was requested, anything but success ends the task
    /// as cancelled and is never retried.
    fn or_cancelled(self, signal: &CancelSignal) -> Self {
        match (self, signal.reason()) {
            (Self::Completed(value), _) => Self::Completed(value),
            (_, Some(reason)) => Self::Cancelled(reason),
            (outcome, None) => outcome,
        }
    }
}

/// Aborts the wrapped handler task when dropped, so a timed-out or aborted
/// execution never leaves the handler running.
struct AbortOnDrop(JoinHandle<AppResult<Value>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// A registered execution context.
pub struct Worker {
    metadata: WorkerMetadata,
    status: Mutex<WorkerStatus>,
    last_heartbeat_ms: AtomicU64,
    backlog: TaskQueue,
    slots: Arc<Semaphore>,
    in_flight: Mutex<HashMap<TaskId, InFlight>>,
    accepting: AtomicBool,
    closed: AtomicBool,
    counters: WorkerCounters,
    shutdown_tx: watch::Sender<bool>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    processing: Mutex<Option<JoinHandle<()>>>,
    idle: Notify,
    deps: WorkerDeps,
}

impl Worker {
    pub(crate) fn new(metadata: WorkerMetadata, deps: WorkerDeps) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            backlog: TaskQueue::new(deps.backlog_size),
            slots: Arc::new(Semaphore::new(metadata.max_concurrent_tasks)),
            status: Mutex::new(WorkerStatus::Offline),
            last_heartbeat_ms: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            counters: WorkerCounters::default(),
            shutdown_tx,
            heartbeat: Mutex::new(None),
            processing: Mutex::new(None),
            idle: Notify::new(),
            metadata,
            deps,
        })
    }

    /// Spawn the heartbeat and processing loops and start accepting work.
    pub(crate) fn start(self: &Arc<Self>) {
        self.accepting.store(true, Ordering::Release);
        self.set_status(WorkerStatus::Idle);
        self.beat();

        let heartbeat = tokio::spawn(Arc::clone(self).heartbeat_loop(self.shutdown_tx.subscribe()));
        *self.heartbeat.lock() = Some(heartbeat);
        let processing = tokio::spawn(Arc::clone(self).processing_loop(self.shutdown_tx.subscribe()));
        *self.processing.lock() = Some(processing);

        info!(
            worker_id = %self.metadata.worker_id,
            worker_name = %self.metadata.worker_name,
            max_concurrent_tasks = self.metadata.max_concurrent_tasks,
            capabilities = ?self.metadata.capabilities,
            "worker started"
        );
    }

    async fn heartbeat_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.metadata.heartbeat_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => self.beat(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(worker_id = %self.metadata.worker_id, "heartbeat loop exited");
    }

    async fn processing_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                ready = self.backlog.wait_for_task(BACKLOG_POLL) => {
                    if !ready {
                        continue;
                    }
                }
                _ = shutdown.changed() => break,
            }
            let permit = tokio::select! {
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };
            let Some(task) = self.backlog.try_dequeue() else {
                continue;
            };
            self.launch(task, permit);
        }
        debug!(worker_id = %self.metadata.worker_id, "processing loop exited");
    }

    fn beat(&self) {
        let now = u64::try_from(now_ms()).unwrap_or(u64::MAX);
        self.last_heartbeat_ms.store(now, Ordering::Release);
        persist_worker(self.deps.store.as_ref(), &self.record());
    }

    /// Hand a task to this worker.
    ///
    /// The task runs at once when a permit is free and the backlog is empty;
    /// otherwise it waits in the backlog. A refused task is handed back in
    /// the status it had reached (PENDING/QUEUED when refused up front,
    /// ASSIGNED if the backlog filled up concurrently).
    pub(crate) fn submit_task(self: &Arc<Self>, mut task: Task) -> Result<(), QueueFull> {
        if !self.is_accepting() || !self.can_execute(task.task_type()) {
            return Err(self.refuse(task));
        }
        let permit = if self.backlog.is_empty() {
            Arc::clone(&self.slots).try_acquire_owned().ok()
        } else {
            None
        };
        if permit.is_none() && !self.backlog.has_room() {
            return Err(self.refuse(task));
        }
        if let Err(e) = task.transition(
            TaskStatus::Assigned,
            Some(format!("worker {}", self.metadata.worker_id)),
        ) {
            warn!(task_id = %task.task_id(), error = %e, "cannot assign task");
            return Err(self.refuse(task));
        }
        task.assigned_worker_id = Some(self.metadata.worker_id.clone());
        persist_task(self.deps.store.as_ref(), &task);
        self.audit(&task, AuditAction::Assign, None);
        debug!(
            task_id = %task.task_id(),
            worker_id = %self.metadata.worker_id,
            direct = permit.is_some(),
            "task assigned"
        );

        match permit {
            Some(permit) => {
                self.launch(task, permit);
                Ok(())
            }
            None => {
                self.backlog.enqueue(task)?;
                self.refresh_status();
                Ok(())
            }
        }
    }

    fn refuse(&self, task: Task) -> QueueFull {
        QueueFull {
            task: Box::new(task),
            max_size: self.backlog.max_size(),
        }
    }

    fn launch(self: &Arc<Self>, task: Task, permit: OwnedSemaphorePermit) {
        let task_id = task.task_id().to_string();
        let mut in_flight = self.in_flight.lock();
        if self.closed.load(Ordering::Acquire) {
            drop(in_flight);
            drop(permit);
            let _ = self.deps.events.send(PoolEvent::Requeue { task: Box::new(task) });
            return;
        }
        let shared: SharedTask = Arc::new(Mutex::new(task));
        let (cancel, signal) = cancel_pair();
        let handle = tokio::spawn(Arc::clone(self).run_task(Arc::clone(&shared), permit, signal));
        in_flight.insert(
            task_id,
            InFlight {
                task: shared,
                cancel,
                abort: handle.abort_handle(),
            },
        );
        drop(in_flight);
        self.refresh_status();
    }

    async fn run_task(self: Arc<Self>, shared: SharedTask, permit: OwnedSemaphorePermit, signal: CancelSignal) {
        let started = Instant::now();
        let outcome = self.execute(&shared, &signal).await;
        self.finalize(&shared, outcome, &signal, started.elapsed());
        drop(permit);
        self.idle.notify_waiters();
        let _ = self.deps.events.send(PoolEvent::SlotFreed {
            worker_id: self.metadata.worker_id.clone(),
        });
        self.refresh_status();
    }

    async fn execute(&self, shared: &SharedTask, signal: &CancelSignal) -> Option<Outcome> {
        let (task, limit) = {
            let mut task = shared.lock();
            if let Some(reason) = signal.reason() {
                return Some(Outcome::Cancelled(reason));
            }
            if let Err(e) = task.transition(TaskStatus::Running, None) {
                debug!(task_id = %task.task_id(), error = %e, "task no longer runnable");
                return None;
            }
            task.begin_attempt();
            persist_task(self.deps.store.as_ref(), &task);
            let limit = task.timeout_seconds.unwrap_or(self.metadata.task_timeout_seconds);
            (task.clone(), limit)
        };
        info!(
            task_id = %task.task_id(),
            task_type = %task.task_type(),
            worker_id = %self.metadata.worker_id,
            attempt = task.attempts(),
            "task started"
        );
        self.audit(&task, AuditAction::Start, None);

        let Some(handler) = self.deps.handlers.get(task.task_type()) else {
            return Some(Outcome::Failed(TaskFailure::NoHandler(task.task_type().to_string())));
        };
        let ctx = TaskContext::new(
            ProgressReporter::new(Arc::clone(shared), Arc::clone(&self.deps.store)),
            signal.clone(),
        );
        let mut handler_task = AbortOnDrop(tokio::spawn(async move { handler.handle(task, ctx).await }));

        let outcome = match tokio::time::timeout(Duration::from_secs(limit), &mut handler_task.0).await {
            Ok(Ok(Ok(value))) => Outcome::Completed(value),
            Ok(Ok(Err(err))) => Outcome::Failed(TaskFailure::Handler(format!("{err:#}"))),
            Ok(Err(join_err)) if join_err.is_panic() => {
                let payload = join_err.into_panic();
                Outcome::Failed(TaskFailure::Handler(format!(
                    "handler panicked: {}",
                    panic_message(payload.as_ref())
                )))
            }
            Ok(Err(_)) => Outcome::Cancelled("handler aborted".to_string()),
            Err(_) => Outcome::TimedOut(TaskFailure::Timeout { seconds: limit }),
        };
        Some(outcome)
    }

    /// Record the outcome of an execution. Cancellation requests arrive
    /// only while the task is in flight, so once it is removed here the
    /// signal is final.
    fn finalize(&self, shared: &SharedTask, outcome: Option<Outcome>, signal: &CancelSignal, elapsed: Duration) {
        let task_id = shared.lock().task_id().to_string();
        if self.in_flight.lock().remove(&task_id).is_none() {
            debug!(task_id = %task_id, "task released before it finished; outcome discarded");
            return;
        }
        if let Some(outcome) = outcome {
            self.apply_outcome(shared, outcome.or_cancelled(signal), elapsed);
        }
    }

    fn apply_outcome(&self, shared: &SharedTask, outcome: Outcome, elapsed: Duration) {
        self.counters.record_processing(elapsed);
        let (snapshot, retry) = {
            let mut task = shared.lock();
            let applied = match outcome {
                Outcome::Completed(value) => {
                    task.result = Some(value);
                    task.error = None;
                    task.transition(TaskStatus::Completed, None)
                }
                Outcome::Failed(failure) => {
                    task.error = Some(failure.to_string());
                    task.transition(TaskStatus::Failed, None)
                }
                Outcome::TimedOut(failure) => {
                    task.error = Some(failure.to_string());
                    task.transition(TaskStatus::Timeout, None)
                }
                Outcome::Cancelled(reason) => task.cancel(&reason),
            };
            if let Err(e) = applied {
                warn!(task_id = %task.task_id(), error = %e, "could not record task outcome");
                return;
            }

            let status = task.status();
            let counter = match status {
                TaskStatus::Completed => &self.counters.completed,
                TaskStatus::Failed => &self.counters.failed,
                TaskStatus::Timeout => &self.counters.timed_out,
                _ => &self.counters.cancelled,
            };
            counter.fetch_add(1, Ordering::Relaxed);

            let mut retry = None;
            if matches!(status, TaskStatus::Failed | TaskStatus::Timeout) {
                let error = task.error().unwrap_or_default().to_string();
                if task.retry_policy().should_retry(task.attempts(), status, &error) {
                    let delay = task.retry_policy().backoff_delay(task.attempts());
                    let reason = format!("retry in {:.3}s", delay.as_secs_f64());
                    match task.transition(TaskStatus::Retrying, Some(reason)) {
                        Ok(()) => retry = Some(delay),
                        Err(e) => warn!(task_id = %task.task_id(), error = %e, "cannot schedule retry"),
                    }
                }
                if retry.is_none() {
                    task.mark_finished();
                }
            }
            persist_task(self.deps.store.as_ref(), &task);
            (task.clone(), retry)
        };

        match (snapshot.status(), retry) {
            (_, Some(delay)) => {
                warn!(
                    task_id = %snapshot.task_id(),
                    attempt = snapshot.attempts(),
                    delay = ?delay,
                    error = snapshot.error().unwrap_or_default(),
                    "task attempt failed; retry scheduled"
                );
                self.audit(&snapshot, AuditAction::Retry, snapshot.error().map(str::to_string));
                let _ = self.deps.events.send(PoolEvent::Retry {
                    task: Box::new(snapshot),
                    delay,
                });
            }
            (TaskStatus::Completed, None) => {
                info!(task_id = %snapshot.task_id(), elapsed = ?elapsed, "task completed");
                self.audit(&snapshot, AuditAction::Complete, None);
            }
            (TaskStatus::Timeout, None) => {
                warn!(task_id = %snapshot.task_id(), elapsed = ?elapsed, "task timed out");
                self.audit(&snapshot, AuditAction::Timeout, snapshot.error().map(str::to_string));
            }
            (TaskStatus::Cancelled, None) => {
                info!(task_id = %snapshot.task_id(), "task cancelled");
                self.audit(&snapshot, AuditAction::Cancel, snapshot.error().map(str::to_string));
            }
            (_, None) => {
                warn!(
                    task_id = %snapshot.task_id(),
                    error = snapshot.error().unwrap_or_default(),
                    "task failed"
                );
                self.audit(&snapshot, AuditAction::Fail, snapshot.error().map(str::to_string));
            }
        }
    }

    /// Cancel a task held by this worker. Backlog tasks are cancelled at
    /// once; in-flight tasks receive the cancellation signal. Returns
    /// whether the task was found here.
    pub(crate) fn cancel_task(&self, task_id: &str, reason: &str) -> bool {
        if let Some(mut task) = self.backlog.remove(task_id) {
            if let Err(e) = task.cancel(reason) {
                warn!(task_id, error = %e, "cannot cancel backlog task");
            }
            self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            persist_task(self.deps.store.as_ref(), &task);
            self.audit(&task, AuditAction::Cancel, Some(reason.to_string()));
            return true;
        }
        match self.in_flight.lock().get(task_id) {
            Some(entry) => {
                entry.cancel.cancel(reason);
                true
            }
            None => false,
        }
    }

    /// Drop everything at once: stop both loops, abort in-flight tasks and
    /// hand back every held task re-queued (QUEUED, no worker).
    pub(crate) fn evict(&self, reason: &str) -> Vec<Task> {
        self.accepting.store(false, Ordering::Release);
        self.set_status(WorkerStatus::Offline);
        let _ = self.shutdown_tx.send(true);
        self.stop_heartbeat();

        let entries = self.close();
        let mut released = Vec::with_capacity(entries.len());
        for entry in entries {
            entry.cancel.cancel(reason);
            entry.abort.abort();
            let mut task = entry.task.lock();
            match task.requeue(reason) {
                Ok(()) => released.push(task.clone()),
                Err(e) => warn!(task_id = %task.task_id(), error = %e, "cannot requeue in-flight task"),
            }
        }
        released.extend(self.release_backlog(reason));
        persist_worker(self.deps.store.as_ref(), &self.record());
        released
    }

    /// Graceful stop: refuse new work, hand back the backlog re-queued, wait
    /// up to `grace` for in-flight tasks, then cancel whatever is still
    /// running.
    pub(crate) async fn shutdown(&self, grace: Duration, reason: &str) -> Vec<Task> {
        self.accepting.store(false, Ordering::Release);
        self.set_status(WorkerStatus::Draining);
        persist_worker(self.deps.store.as_ref(), &self.record());
        self.stop_processing().await;

        let released = self.release_backlog(reason);

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let notified = self.idle.notified();
            if self.is_drained() {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        for entry in self.close() {
            entry.cancel.cancel(reason);
            entry.abort.abort();
            let mut task = entry.task.lock();
            match task.cancel(reason) {
                Ok(()) => {
                    self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                    persist_task(self.deps.store.as_ref(), &task);
                    self.audit(&task, AuditAction::Cancel, Some(reason.to_string()));
                    warn!(task_id = %task.task_id(), "in-flight task cancelled after grace period");
                }
                Err(e) => warn!(task_id = %task.task_id(), error = %e, "cannot cancel in-flight task"),
            }
        }

        let _ = self.shutdown_tx.send(true);
        self.stop_heartbeat();
        self.set_status(WorkerStatus::Offline);
        persist_worker(self.deps.store.as_ref(), &self.record());
        info!(worker_id = %self.metadata.worker_id, "worker stopped");
        released
    }

    /// Nothing in flight and every permit returned, so every outcome has
    /// been recorded.
    fn is_drained(&self) -> bool {
        self.in_flight.lock().is_empty()
            && self.slots.available_permits() == self.metadata.max_concurrent_tasks
    }

    async fn stop_processing(&self) {
        let handle = self.processing.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    fn close(&self) -> Vec<InFlight> {
        let mut in_flight = self.in_flight.lock();
        self.closed.store(true, Ordering::Release);
        in_flight.drain().map(|(_, entry)| entry).collect()
    }

    fn release_backlog(&self, reason: &str) -> Vec<Task> {
        self.backlog
            .drain()
            .into_iter()
            .filter_map(|mut task| match task.requeue(reason) {
                Ok(()) => Some(task),
                Err(e) => {
                    warn!(task_id = %task.task_id(), error = %e, "cannot requeue backlog task");
                    None
                }
            })
            .collect()
    }

    /// Stop emitting heartbeats while leaving execution untouched. The pool
    /// evicts the worker once its heartbeat goes stale.
    pub fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }
    }

    fn set_status(&self, status: WorkerStatus) {
        *self.status.lock() = status;
    }

    fn refresh_status(&self) {
        let busy = !self.in_flight.lock().is_empty();
        let mut status = self.status.lock();
        if matches!(*status, WorkerStatus::Idle | WorkerStatus::Busy) {
            *status = if busy { WorkerStatus::Busy } else { WorkerStatus::Idle };
        }
    }

    fn audit(&self, task: &Task, action: AuditAction, detail: Option<String>) {
        if let Some(sink) = &self.deps.audit {
            sink.record(build_audit_event(
                task.task_id(),
                Some(task.task_type()),
                Some(&self.metadata.worker_id),
                action,
                detail,
            ));
        }
    }

    /// Worker id.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.metadata.worker_id
    }

    /// Static description.
    #[must_use]
    pub const fn metadata(&self) -> &WorkerMetadata {
        &self.metadata
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        *self.status.lock()
    }

    /// Last heartbeat (ms since epoch).
    #[must_use]
    pub fn last_heartbeat_ms(&self) -> u128 {
        u128::from(self.last_heartbeat_ms.load(Ordering::Acquire))
    }

    /// Whether the heartbeat is older than `multiplier` intervals.
    #[must_use]
    pub fn is_stale(&self, now_ms: u128, multiplier: u32) -> bool {
        let limit = u128::from(multiplier) * u128::from(self.metadata.heartbeat_interval_ms);
        now_ms.saturating_sub(self.last_heartbeat_ms()) > limit
    }

    /// Whether new work is accepted.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
            && matches!(self.status(), WorkerStatus::Idle | WorkerStatus::Busy)
    }

    /// Whether this worker handles `task_type`.
    #[must_use]
    pub fn can_execute(&self, task_type: &str) -> bool {
        self.metadata.capabilities.contains(task_type)
    }

    /// Tasks in flight plus tasks in the backlog.
    #[must_use]
    pub fn load(&self) -> usize {
        self.in_flight.lock().len() + self.backlog.get_size()
    }

    /// Whether a new task would start without waiting behind others.
    #[must_use]
    pub fn has_spare_capacity(&self) -> bool {
        self.is_accepting() && self.load() < self.metadata.max_concurrent_tasks
    }

    /// Whether `task_id` is in flight or in the backlog here.
    #[must_use]
    pub fn holds(&self, task_id: &str) -> bool {
        self.in_flight.lock().contains_key(task_id) || self.backlog.contains(task_id)
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            running: self.in_flight.lock().len(),
            backlog: self.backlog.get_size(),
            avg_processing_ms: self.counters.avg_processing_ms(),
        }
    }

    /// Persistable snapshot.
    #[must_use]
    pub fn record(&self) -> WorkerRecord {
        WorkerRecord {
            metadata: self.metadata.clone(),
            status: self.status(),
            last_heartbeat_ms: self.last_heartbeat_ms(),
            stats: self.stats(),
        }
    }
}
