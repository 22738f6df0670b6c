//! Benchmarks for the worker scheduler.
//!
//! Benchmarks cover:
//! - Task queue operations (enqueue/dequeue, mixed priority ordering)
//! - Capability-filtered dequeue
//! - End-to-end submission through a running `WorkerSystem`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use std::hint::black_box;
use std::time::Duration;

use serde_json::json;
use tokio::runtime::Runtime;

use worker_scheduler::config::{SchedulerConfig, WorkerConfig};
use worker_scheduler::core::{handler_fn, Task, WorkerSystem};
use worker_scheduler::infra::queue::TaskQueue;
use worker_scheduler::util::serde::Priority;

// ============================================================================
// Helpers
// ============================================================================

fn build_task(i: u64, priority: Priority) -> Task {
    Task::new("bench", json!({ "id": i })).with_priority(priority)
}

fn random_priority(rng: &mut impl Rng) -> Priority {
    Priority::ALL[rng.random_range(0..Priority::ALL.len())]
}

// ============================================================================
// Queue Benchmarks
// ============================================================================

fn bench_queue_enqueue_dequeue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_enqueue_dequeue");

    for size in [100_u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let q = TaskQueue::new(size as usize);
                for i in 0..size {
                    let _ = q.enqueue(build_task(i, Priority::Normal));
                }
                while let Some(task) = q.try_dequeue() {
                    black_box(task);
                }
            });
        });
    }
    group.finish();
}

fn bench_queue_mixed_priorities(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_mixed_priorities");

    for size in [100_u64, 1_000, 5_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut rng = rand::rng();
            let priorities: Vec<Priority> = (0..size).map(|_| random_priority(&mut rng)).collect();
            b.iter(|| {
                let q = TaskQueue::new(size as usize);
                for (i, priority) in priorities.iter().enumerate() {
                    let _ = q.enqueue(build_task(i as u64, *priority));
                }
                let mut count = 0;
                while q.try_dequeue().is_some() {
                    count += 1;
                }
                black_box(count);
            });
        });
    }
    group.finish();
}

fn bench_queue_dequeue_where(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_dequeue_where");

    for size in [100_u64, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let q = TaskQueue::new(size as usize);
                for i in 0..size {
                    let task_type = if i % 2 == 0 { "even" } else { "odd" };
                    let _ = q.enqueue(Task::new(task_type, json!({ "id": i })));
                }
                while let Some(task) = q.dequeue_where(|t| t.task_type() == "odd") {
                    black_box(task);
                }
                black_box(q.get_size());
            });
        });
    }
    group.finish();
}

// ============================================================================
// System Benchmarks
// ============================================================================

fn bench_system_submit_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("system_submit_and_drain");
    group.sample_size(10);

    for task_count in [100_u64, 500] {
        group.throughput(Throughput::Elements(task_count));
        group.bench_with_input(
            BenchmarkId::from_parameter(task_count),
            &task_count,
            |b, &task_count| {
                let Ok(rt) = Runtime::new() else { return };
                b.to_async(rt).iter(|| async move {
                    let config = SchedulerConfig::default()
                        .with_pool_queue_size(task_count as usize)
                        .with_scheduler_interval_ms(5);
                    let Ok(system) = WorkerSystem::new(config) else { return };
                    let _ = system.register_task_type(
                        "bench",
                        handler_fn(|task, _ctx| async move { Ok(task.payload().clone()) }),
                    );
                    let _ = system.start();
                    let _ = system.create_worker(WorkerConfig::named("bench-1").with_max_concurrent_tasks(8));
                    let _ = system.create_worker(WorkerConfig::named("bench-2").with_max_concurrent_tasks(8));

                    let accepted = (0..task_count)
                        .filter(|i| {
                            system
                                .submit_task("bench", json!({ "id": i }), Priority::Normal, None, None)
                                .is_ok()
                        })
                        .count() as u64;
                    while system.get_system_status().pool_status.workers.iter().map(|w| w.stats.completed).sum::<u64>()
                        < accepted
                    {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    system.shutdown().await;
                });
            },
        );
    }
    group.finish();
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(
    queue_benches,
    bench_queue_enqueue_dequeue,
    bench_queue_mixed_priorities,
    bench_queue_dequeue_where
);

criterion_group!(system_benches, bench_system_submit_and_drain);

criterion_main!(queue_benches, system_benches);
