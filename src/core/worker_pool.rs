//! Worker pool: the worker registry, the pool-level queue and the background
//! scheduler.
//!
//! Submissions are routed to a capable worker with spare capacity when the
//! task is ready, otherwise they wait in the pool queue. Two background
//! tokio tasks keep things moving:
//!
//! - the **scheduler loop** runs a pass every `scheduler_interval_ms`, or
//!   sooner when woken by a freed slot or a requeue. A pass evicts workers
//!   with stale heartbeats, cancels tasks whose dependencies can no longer
//!   complete and drains ready tasks onto workers;
//! - the **event loop** consumes worker events (freed slots, retries,
//!   requeues) from an mpsc channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::audit::{build_audit_event, AuditAction, AuditSink};
use super::error::{SchedulerError, TaskFailure};
use super::handler::HandlerRegistry;
use super::task::{Task, TaskStatus};
use super::worker::{PoolEvent, Worker, WorkerDeps, WorkerMetadata, WorkerRecord};
use crate::config::SchedulerConfig;
use crate::infra::queue::{QueueFull, TaskQueue};
use crate::infra::store::{persist_task, TaskStore};
use crate::util::clock::now_ms;
use crate::util::serde::TaskId;

/// Pool-level counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Tasks accepted.
    pub submitted: u64,
    /// Submissions refused for capacity or worker availability.
    pub rejected: u64,
    /// Retries scheduled.
    pub retries: u64,
    /// Tasks returned to the pool queue by departing workers.
    pub requeued: u64,
    /// Tasks cancelled by the pool (request, dependency, shutdown).
    pub cancelled: u64,
    /// Workers evicted for missing heartbeats.
    pub evicted_workers: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    retries: AtomicU64,
    requeued: AtomicU64,
    cancelled: AtomicU64,
    evicted_workers: AtomicU64,
}

impl PoolCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            evicted_workers: self.evicted_workers.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Whether the background loops are running.
    pub running: bool,
    /// Registered workers.
    pub workers: Vec<WorkerRecord>,
    /// Tasks waiting in the pool queue.
    pub queue_size: usize,
    /// Pool queue capacity.
    pub queue_capacity: usize,
    /// Tasks waiting out a retry delay.
    pub retrying: usize,
    /// Counters.
    pub stats: PoolStats,
}

/// Where a queued task stands with respect to its dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Readiness {
    Ready,
    Waiting,
    Broken(TaskId),
}

struct Registry {
    workers: Vec<Arc<Worker>>,
    next: usize,
}

/// Registry of workers plus the pool-level queue.
pub struct WorkerPool {
    config: SchedulerConfig,
    queue: TaskQueue,
    registry: Mutex<Registry>,
    retrying: Mutex<HashMap<TaskId, Task>>,
    deps: WorkerDeps,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PoolEvent>>>,
    wake: Notify,
    running: AtomicBool,
    stopped: AtomicBool,
    stop_scheduler: watch::Sender<bool>,
    stop_events: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    counters: PoolCounters,
}

impl WorkerPool {
    /// Create a stopped pool.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if `config` does not validate.
    pub fn new(
        config: SchedulerConfig,
        handlers: Arc<HandlerRegistry>,
        store: Arc<dyn TaskStore>,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Result<Arc<Self>, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let deps = WorkerDeps {
            handlers,
            store,
            audit,
            events: events_tx,
            backlog_size: config.worker_queue_size,
        };
        let (stop_scheduler, _) = watch::channel(false);
        let (stop_events, _) = watch::channel(false);

        Ok(Arc::new(Self {
            queue: TaskQueue::new(config.pool_queue_size),
            registry: Mutex::new(Registry {
                workers: Vec::new(),
                next: 0,
            }),
            retrying: Mutex::new(HashMap::new()),
            deps,
            events_rx: Mutex::new(Some(events_rx)),
            wake: Notify::new(),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop_scheduler,
            stop_events,
            loops: Mutex::new(Vec::new()),
            counters: PoolCounters::default(),
            config,
        }))
    }

    /// Spawn the scheduler and event loops. Starting a running pool is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Shutdown` once the pool has been shut down.
    pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SchedulerError::Shutdown);
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(events_rx) = self.events_rx.lock().take() else {
            return Err(SchedulerError::Shutdown);
        };

        let scheduler = tokio::spawn(Arc::clone(self).scheduler_loop(self.stop_scheduler.subscribe()));
        let events = tokio::spawn(Arc::clone(self).event_loop(events_rx, self.stop_events.subscribe()));
        self.loops.lock().extend([scheduler, events]);

        info!(
            pool_queue_size = self.config.pool_queue_size,
            scheduler_interval_ms = self.config.scheduler_interval_ms,
            "worker pool started"
        );
        Ok(())
    }

    /// Whether the background loops are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Scheduler configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    async fn scheduler_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.scheduler_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = self.wake.notified() => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
            self.run_scheduling_pass();
        }
        debug!("scheduler loop exited");
    }

    async fn event_loop(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<PoolEvent>,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                event = events.recv() => event,
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
            };
            let Some(event) = event else {
                break;
            };
            match event {
                PoolEvent::SlotFreed { worker_id } => {
                    debug!(worker_id = %worker_id, "slot freed");
                    self.wake.notify_one();
                }
                PoolEvent::Retry { task, delay } => self.schedule_retry(*task, delay),
                PoolEvent::Requeue { task } => self.return_to_queue(*task, "worker stopped"),
            }
        }
        debug!("event loop exited");
    }

    /// One scheduler pass: evict stale workers, cancel tasks with broken
    /// dependencies, then drain ready tasks onto workers with capacity.
    pub fn run_scheduling_pass(&self) {
        self.evict_stale_workers();
        self.cancel_broken_dependents();
        self.drain_queue();
    }

    fn evict_stale_workers(&self) {
        let now = now_ms();
        let multiplier = self.config.heartbeat_timeout_multiplier;
        let stale: Vec<Arc<Worker>> = {
            let mut registry = self.registry.lock();
            let (stale, live): (Vec<_>, Vec<_>) = registry
                .workers
                .drain(..)
                .partition(|w| w.is_stale(now, multiplier));
            registry.workers = live;
            if registry.next >= registry.workers.len() {
                registry.next = 0;
            }
            stale
        };

        for worker in stale {
            warn!(
                worker_id = %worker.worker_id(),
                last_heartbeat_ms = %worker.last_heartbeat_ms(),
                "worker heartbeat timed out; evicting"
            );
            PoolCounters::bump(&self.counters.evicted_workers);
            self.audit_worker(worker.worker_id(), AuditAction::Evict, None);
            for task in worker.evict("worker heartbeat timed out") {
                self.return_to_queue(task, "worker evicted");
            }
        }
    }

    fn cancel_broken_dependents(&self) {
        let broken = self
            .queue
            .drain_where(|task| matches!(self.readiness(task), Readiness::Broken(_)));
        for mut task in broken {
            let reason = match self.readiness(&task) {
                Readiness::Broken(dep) => format!("dependency {dep} did not complete"),
                _ => "dependency did not complete".to_string(),
            };
            self.cancel_held(&mut task, &reason);
        }
    }

    fn drain_queue(&self) {
        loop {
            let open: Vec<Arc<Worker>> = self
                .registry
                .lock()
                .workers
                .iter()
                .filter(|w| w.has_spare_capacity())
                .cloned()
                .collect();
            if open.is_empty() {
                return;
            }
            let now = now_ms();
            let next = self.queue.dequeue_where(|task| {
                task.is_due(now)
                    && open.iter().any(|w| w.can_execute(task.task_type()))
                    && self.readiness(task) == Readiness::Ready
            });
            let Some(task) = next else {
                return;
            };
            if let Err(task) = self.assign(task) {
                self.put_back(task);
                return;
            }
        }
    }

    /// Route a ready task to a capable worker with spare capacity.
    fn assign(&self, task: Task) -> Result<(), Task> {
        let task_type = task.task_type().to_string();
        let Some(worker) = self.find_suitable_worker(&task_type) else {
            return Err(task);
        };
        worker.submit_task(task).map_err(QueueFull::into_task)
    }

    /// Round-robin over workers matching `task_type` that are accepting work
    /// and have spare capacity. The index advances under the registry lock.
    #[must_use]
    pub fn find_suitable_worker(&self, task_type: &str) -> Option<Arc<Worker>> {
        self.pick_worker(|w| w.can_execute(task_type) && w.has_spare_capacity())
    }

    fn pick_worker(&self, pred: impl Fn(&Worker) -> bool) -> Option<Arc<Worker>> {
        let mut registry = self.registry.lock();
        let count = registry.workers.len();
        for offset in 0..count {
            let idx = (registry.next + offset) % count;
            if pred(&registry.workers[idx]) {
                registry.next = (idx + 1) % count;
                return Some(Arc::clone(&registry.workers[idx]));
            }
        }
        None
    }

    fn has_capable_worker(&self, task_type: &str) -> bool {
        self.registry
            .lock()
            .workers
            .iter()
            .any(|w| w.can_execute(task_type) && w.is_accepting())
    }

    fn readiness(&self, task: &Task) -> Readiness {
        let mut waiting = false;
        for dep in task.dependencies() {
            match self.deps.store.load_task(dep) {
                Ok(Some(prereq)) if prereq.status() == TaskStatus::Completed => {}
                Ok(Some(prereq)) if prereq.is_finished() => return Readiness::Broken(dep.clone()),
                Ok(Some(_)) => waiting = true,
                Ok(None) => return Readiness::Broken(dep.clone()),
                Err(e) => {
                    warn!(task_id = %task.task_id(), dependency = %dep, error = %e, "cannot load dependency");
                    waiting = true;
                }
            }
        }
        if waiting {
            Readiness::Waiting
        } else {
            Readiness::Ready
        }
    }

    /// Submit a task.
    ///
    /// The PENDING record is persisted first. A ready task goes straight to
    /// a suitable worker; anything else waits in the pool queue. When the
    /// pool queue is full a ready task may overflow into a capable worker's
    /// backlog.
    ///
    /// # Errors
    ///
    /// - `Shutdown` when the pool is not running
    /// - `Capacity` when the pool queue and the worker backlogs are full
    /// - `WorkerUnavailable` when the pool queue is full and no worker can
    ///   run the task type
    /// - `Storage` when the initial record cannot be written
    ///
    /// A rejected task leaves no record behind.
    pub fn submit_task(&self, mut task: Task) -> Result<TaskId, SchedulerError> {
        if !self.is_running() {
            return Err(SchedulerError::Shutdown);
        }
        let task_id = task.task_id().to_string();
        self.deps.store.save_task(&task)?;

        let ready = task.is_due(now_ms()) && self.readiness(&task) == Readiness::Ready;
        if ready {
            match self.assign(task) {
                Ok(()) => {
                    self.accepted(&task_id, None);
                    return Ok(task_id);
                }
                Err(returned) => task = returned,
            }
        }

        if let Err(e) = ensure_queued(&mut task, "awaiting capacity") {
            self.discard(&task_id);
            return Err(e);
        }
        persist_task(self.deps.store.as_ref(), &task);
        let task_type = task.task_type().to_string();
        let rejected = match self.queue.enqueue(task) {
            Ok(()) => {
                self.accepted(&task_id, Some(AuditAction::Enqueue));
                self.wake.notify_one();
                return Ok(task_id);
            }
            Err(full) => full,
        };

        let max_size = rejected.max_size;
        let task = rejected.into_task();
        if ready && self.overflow(task).is_ok() {
            self.accepted(&task_id, None);
            return Ok(task_id);
        }

        self.discard(&task_id);
        PoolCounters::bump(&self.counters.rejected);
        self.audit_task(&task_id, Some(&task_type), AuditAction::Reject, None);
        if self.has_capable_worker(&task_type) {
            warn!(task_id = %task_id, max_size, "pool queue and worker backlogs full");
            Err(SchedulerError::Capacity(format!(
                "pool queue full ({max_size} tasks) and no worker backlog has room"
            )))
        } else {
            warn!(task_id = %task_id, task_type = %task_type, "no worker can take task");
            Err(SchedulerError::WorkerUnavailable(format!(
                "pool queue full ({max_size} tasks) and no worker handles `{task_type}`"
            )))
        }
    }

    fn accepted(&self, task_id: &str, action: Option<AuditAction>) {
        PoolCounters::bump(&self.counters.submitted);
        self.audit_task(task_id, None, AuditAction::Submit, None);
        if let Some(action) = action {
            self.audit_task(task_id, None, action, None);
        }
        debug!(task_id, "task accepted");
    }

    fn discard(&self, task_id: &str) {
        if let Err(e) = self.deps.store.delete_task(task_id) {
            error!(task_id, error = %e, "failed to delete rejected task record");
        }
    }

    /// Put a ready task into any capable worker's backlog.
    fn overflow(&self, task: Task) -> Result<(), Task> {
        let task_type = task.task_type().to_string();
        let Some(worker) = self.pick_worker(|w| w.can_execute(&task_type) && w.is_accepting()) else {
            return Err(task);
        };
        worker.submit_task(task).map_err(QueueFull::into_task)
    }

    /// Put a task taken from the pool queue back after a failed assignment.
    fn put_back(&self, mut task: Task) {
        if let Err(e) = ensure_queued(&mut task, "assignment refused") {
            warn!(task_id = %task.task_id(), error = %e, "cannot return task to queue");
            return;
        }
        persist_task(self.deps.store.as_ref(), &task);
        if let Err(full) = self.queue.enqueue(task) {
            let failure = TaskFailure::Requeue(full.to_string());
            let mut task = full.into_task();
            self.cancel_held(&mut task, &failure.to_string());
        }
    }

    /// Return a task released by a departing worker to the pool queue.
    fn return_to_queue(&self, mut task: Task, reason: &str) {
        if !self.is_running() {
            self.cancel_held(&mut task, "scheduler shut down");
            return;
        }
        if let Err(e) = ensure_queued(&mut task, reason) {
            warn!(task_id = %task.task_id(), error = %e, "cannot requeue task");
            return;
        }
        PoolCounters::bump(&self.counters.requeued);
        self.audit_task(task.task_id(), Some(task.task_type()), AuditAction::Requeue, Some(reason.to_string()));
        info!(task_id = %task.task_id(), reason, "task requeued");
        persist_task(self.deps.store.as_ref(), &task);

        let Err(full) = self.queue.enqueue(task) else {
            self.wake.notify_one();
            return;
        };
        let max_size = full.max_size;
        let task = full.into_task();
        let ready = task.is_due(now_ms()) && self.readiness(&task) == Readiness::Ready;
        let mut task = if ready {
            match self.overflow(task) {
                Ok(()) => return,
                Err(task) => task,
            }
        } else {
            task
        };
        let failure = TaskFailure::Requeue(format!("pool queue full ({max_size} tasks)"));
        error!(task_id = %task.task_id(), "{failure}");
        self.cancel_held(&mut task, &failure.to_string());
    }

    fn schedule_retry(self: &Arc<Self>, task: Task, delay: Duration) {
        let task_id = task.task_id().to_string();
        if !self.is_running() {
            let mut task = task;
            self.cancel_held(&mut task, "scheduler shut down");
            return;
        }
        self.retrying.lock().insert(task_id.clone(), task);
        PoolCounters::bump(&self.counters.retries);
        debug!(task_id = %task_id, delay = ?delay, "retry scheduled");

        let pool = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pool.requeue_retry(&task_id);
        });
    }

    /// Move a task whose backoff delay elapsed from RETRYING to QUEUED. A
    /// full pool queue fails it for good.
    fn requeue_retry(&self, task_id: &str) {
        let Some(mut task) = self.retrying.lock().remove(task_id) else {
            debug!(task_id, "retry no longer pending");
            return;
        };

        let mut queued = task.clone();
        if let Err(e) = queued.transition(TaskStatus::Queued, Some("retry".to_string())) {
            warn!(task_id, error = %e, "cannot requeue retry");
            return;
        }
        queued.assigned_worker_id = None;
        persist_task(self.deps.store.as_ref(), &queued);

        match self.queue.enqueue(queued) {
            Ok(()) => {
                info!(task_id, attempt = task.attempts() + 1, "retry queued");
                self.wake.notify_one();
            }
            Err(full) => {
                let failure = TaskFailure::Requeue(full.to_string());
                error!(task_id, error = %failure, "retry dropped");
                task.error = Some(failure.to_string());
                if let Err(e) = task.transition(TaskStatus::Failed, Some(failure.to_string())) {
                    warn!(task_id, error = %e, "cannot fail retry");
                }
                task.mark_finished();
                persist_task(self.deps.store.as_ref(), &task);
                self.audit_task(task_id, Some(task.task_type()), AuditAction::Fail, task.error.clone());
            }
        }
    }

    /// Cancel a task the pool currently holds (not running on a worker).
    fn cancel_held(&self, task: &mut Task, reason: &str) {
        if let Err(e) = task.cancel(reason) {
            warn!(task_id = %task.task_id(), error = %e, "cannot cancel task");
            return;
        }
        PoolCounters::bump(&self.counters.cancelled);
        persist_task(self.deps.store.as_ref(), task);
        self.audit_task(task.task_id(), Some(task.task_type()), AuditAction::Cancel, Some(reason.to_string()));
        info!(task_id = %task.task_id(), reason, "task cancelled");
    }

    /// Cancel a task wherever it is. Queued and retrying tasks are cancelled
    /// at once; running tasks receive the cancellation signal. Returns
    /// `Ok(false)` if the task already finished.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` for unknown ids and `Storage` on backend
    /// failure.
    pub fn cancel_task(&self, task_id: &str) -> Result<bool, SchedulerError> {
        const REASON: &str = "cancelled by request";

        if let Some(mut task) = self.queue.remove(task_id) {
            self.cancel_held(&mut task, REASON);
            return Ok(true);
        }
        let retrying = self.retrying.lock().remove(task_id);
        if let Some(mut task) = retrying {
            self.cancel_held(&mut task, REASON);
            return Ok(true);
        }
        if self.workers().iter().any(|w| w.cancel_task(task_id, REASON)) {
            return Ok(true);
        }
        match self.deps.store.load_task(task_id)? {
            Some(_) => Ok(false),
            None => Err(SchedulerError::TaskNotFound(task_id.to_string())),
        }
    }

    /// Create, start and register a worker.
    ///
    /// # Errors
    ///
    /// Returns `Shutdown` once the pool has been shut down.
    pub fn register_worker(&self, metadata: WorkerMetadata) -> Result<Arc<Worker>, SchedulerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SchedulerError::Shutdown);
        }
        let worker = Worker::new(metadata, self.deps.clone());
        worker.start();
        self.registry.lock().workers.push(Arc::clone(&worker));
        info!(worker_id = %worker.worker_id(), "worker registered");
        self.wake.notify_one();
        Ok(worker)
    }

    /// Remove a worker gracefully: it stops taking work, its backlog returns
    /// to the pool queue, in-flight tasks get `unregister_grace_period_ms`
    /// to finish and are cancelled after that.
    ///
    /// # Errors
    ///
    /// Returns `WorkerNotFound` for unknown ids.
    pub async fn unregister_worker(&self, worker_id: &str) -> Result<(), SchedulerError> {
        let worker = {
            let mut registry = self.registry.lock();
            let idx = registry
                .workers
                .iter()
                .position(|w| w.worker_id() == worker_id)
                .ok_or_else(|| SchedulerError::WorkerNotFound(worker_id.to_string()))?;
            let worker = registry.workers.remove(idx);
            if registry.next >= registry.workers.len() {
                registry.next = 0;
            }
            worker
        };

        let released = worker
            .shutdown(self.config.unregister_grace_period(), "worker unregistered")
            .await;
        for task in released {
            self.return_to_queue(task, "worker unregistered");
        }
        info!(worker_id, "worker unregistered");
        self.wake.notify_one();
        Ok(())
    }

    /// Registered workers.
    #[must_use]
    pub fn workers(&self) -> Vec<Arc<Worker>> {
        self.registry.lock().workers.clone()
    }

    /// Look up a registered worker.
    #[must_use]
    pub fn worker(&self, worker_id: &str) -> Option<Arc<Worker>> {
        self.registry
            .lock()
            .workers
            .iter()
            .find(|w| w.worker_id() == worker_id)
            .cloned()
    }

    /// Tasks waiting in the pool queue.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.queue.get_size()
    }

    /// Pool projection.
    #[must_use]
    pub fn get_status(&self) -> PoolStatus {
        PoolStatus {
            running: self.is_running(),
            workers: self.workers().iter().map(|w| w.record()).collect(),
            queue_size: self.queue.get_size(),
            queue_capacity: self.queue.max_size(),
            retrying: self.retrying.lock().len(),
            stats: self.counters.snapshot(),
        }
    }

    /// Stop the scheduler, unregister every worker and cancel whatever is
    /// still queued or waiting to retry. Idempotent.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.running.store(false, Ordering::Release);
        let _ = self.stop_scheduler.send(true);
        info!("worker pool shutting down");

        let workers: Vec<Arc<Worker>> = {
            let mut registry = self.registry.lock();
            registry.next = 0;
            registry.workers.drain(..).collect()
        };
        let grace = self.config.unregister_grace_period();
        let stops: Vec<JoinHandle<Vec<Task>>> = workers
            .into_iter()
            .map(|worker| tokio::spawn(async move { worker.shutdown(grace, "scheduler shut down").await }))
            .collect();
        for stop in stops {
            match stop.await {
                Ok(released) => {
                    for mut task in released {
                        self.cancel_held(&mut task, "scheduler shut down");
                    }
                }
                Err(e) => error!(error = %e, "worker shutdown task failed"),
            }
        }

        for mut task in self.queue.drain() {
            self.cancel_held(&mut task, "scheduler shut down");
        }
        let retrying: Vec<Task> = self.retrying.lock().drain().map(|(_, task)| task).collect();
        for mut task in retrying {
            self.cancel_held(&mut task, "scheduler shut down");
        }

        let _ = self.stop_events.send(true);
        let loops: Vec<JoinHandle<()>> = self.loops.lock().drain(..).collect();
        for handle in loops {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(error = %e, "pool loop failed");
                }
            }
        }
        info!("worker pool shut down");
    }

    fn audit_task(&self, task_id: &str, task_type: Option<&str>, action: AuditAction, detail: Option<String>) {
        if let Some(sink) = &self.deps.audit {
            sink.record(build_audit_event(task_id, task_type, None, action, detail));
        }
    }

    fn audit_worker(&self, worker_id: &str, action: AuditAction, detail: Option<String>) {
        if let Some(sink) = &self.deps.audit {
            sink.record(build_audit_event("", None, Some(worker_id), action, detail));
        }
    }
}

/// Bring a task the pool is about to queue into QUEUED.
fn ensure_queued(task: &mut Task, reason: &str) -> Result<(), SchedulerError> {
    match task.status() {
        TaskStatus::Queued => Ok(()),
        TaskStatus::Pending => task.transition(TaskStatus::Queued, Some(reason.to_string())),
        _ => task.requeue(reason),
    }
}
