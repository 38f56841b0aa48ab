//! Benchmarks for the scheduling hot paths.
//!
//! Benchmarks cover:
//! - Postpone queue admission and scanning
//! - Slot counter take/release
//! - Event bus fan-out
//! - End-to-end scheduling through a running scheduler

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use prometheus_orchestrator::builders::build_scheduler_thread;
use prometheus_orchestrator::config::SchedulerConfig;
use prometheus_orchestrator::core::{
    BoundedCounter, Emitter, Event, FnTask, ManualScheduleSource, Payload, PostponePolicy,
    PostponeQueue, ScheduleRecord, SharedRecord, Signal, SignalSet, SignalSource, Task,
    SCHEDULED_TASK_COMPLETED,
};

static BENCH_TICK: LazyLock<Signal> = LazyLock::new(|| Signal::typed::<u64>("bench_tick"));
static BENCH_SIGNALS: LazyLock<SignalSet> =
    LazyLock::new(|| SignalSet::declare(&[&*BENCH_TICK]));

fn build_record(i: u64, policy: PostponePolicy) -> SharedRecord {
    ScheduleRecord::new(Arc::new(FnTask::new(|| Ok(Payload::none()))))
        .with_group_id(format!("group-{}", i % 8))
        .with_postpone_policy(policy)
        .into_shared()
}

// ============================================================================
// Postpone Queue Benchmarks
// ============================================================================

fn bench_postpone_wait(c: &mut Criterion) {
    let mut group = c.benchmark_group("postpone_wait");

    for size in [100, 1_000, 5_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let records: Vec<_> = (0..size)
                .map(|i| build_record(i, PostponePolicy::Wait))
                .collect();
            b.iter(|| {
                let queue = PostponeQueue::new();
                for r in &records {
                    queue.postpone(Arc::clone(r)).unwrap();
                }
                while let Some(r) = queue.next_record(|_| true) {
                    black_box(r);
                }
            });
        });
    }
    group.finish();
}

fn bench_postpone_keep_last(c: &mut Criterion) {
    let mut group = c.benchmark_group("postpone_keep_last");

    for size in [100, 1_000, 5_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let records: Vec<_> = (0..size)
                .map(|i| build_record(i, PostponePolicy::KeepLast))
                .collect();
            b.iter(|| {
                let queue = PostponeQueue::new();
                for r in &records {
                    queue.postpone(Arc::clone(r)).unwrap();
                }
                black_box(queue.len());
            });
        });
    }
    group.finish();
}

fn bench_postpone_filtered_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("postpone_filtered_scan");

    for size in [100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let queue = PostponeQueue::new();
                for i in 0..size {
                    queue.postpone(build_record(i, PostponePolicy::Wait)).unwrap();
                }
                // Only the last group is admissible: every call scans the queue.
                let mut picked = 0;
                while queue
                    .next_record(|r| r.group_id() == Some("group-7"))
                    .is_some()
                {
                    picked += 1;
                }
                black_box(picked);
            });
        });
    }
    group.finish();
}

// ============================================================================
// Slot Counter / Bus Benchmarks
// ============================================================================

fn bench_slot_counter(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_counter");

    for limit in [1_usize, 8, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(limit), &limit, |b, &limit| {
            let slots = BoundedCounter::new(limit);
            b.iter(|| {
                while slots.decrement().is_ok() {}
                for _ in 0..limit {
                    slots.increment().unwrap();
                }
                black_box(slots.get());
            });
        });
    }
    group.finish();
}

fn bench_emit_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("emit_fan_out");

    for subscribers in [1_u64, 16, 128] {
        group.throughput(Throughput::Elements(subscribers));
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                let emitter = Emitter::new("bench", &BENCH_SIGNALS);
                let hits = Arc::new(AtomicUsize::new(0));
                for _ in 0..subscribers {
                    let hits = Arc::clone(&hits);
                    emitter
                        .subscribe_strong(&BENCH_TICK, move |_: &Event| {
                            hits.fetch_add(1, Ordering::Relaxed);
                        })
                        .unwrap();
                }
                b.iter(|| emitter.emit(&BENCH_TICK, Payload::new(black_box(7_u64))).unwrap());
            },
        );
    }
    group.finish();
}

// ============================================================================
// End-to-End Scenario
// ============================================================================

fn bench_end_to_end_scenario(c: &mut Criterion) {
    let mut group = c.benchmark_group("end_to_end_scenario");
    group.sample_size(10);

    for task_count in [100_u64, 1_000] {
        group.throughput(Throughput::Elements(task_count));
        group.bench_with_input(
            BenchmarkId::from_parameter(task_count),
            &task_count,
            |b, &task_count| {
                b.iter(|| {
                    let (scheduler, thread) =
                        build_scheduler_thread(&SchedulerConfig::with_max_threads(4)).unwrap();
                    let done = Arc::new(AtomicUsize::new(0));
                    let counter = Arc::clone(&done);
                    scheduler
                        .emitter()
                        .subscribe_strong(&SCHEDULED_TASK_COMPLETED, move |_: &Event| {
                            counter.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                    let source = Arc::new(ManualScheduleSource::new());
                    scheduler.subscribe(Arc::clone(&source)).unwrap();
                    thread.start().unwrap();
                    assert!(scheduler.await_start(Duration::from_secs(10)));

                    for i in 0..task_count {
                        source.schedule(build_record(i, PostponePolicy::Wait)).unwrap();
                    }
                    let deadline = Instant::now() + Duration::from_secs(60);
                    #[allow(clippy::cast_possible_truncation)]
                    while done.load(Ordering::SeqCst) < task_count as usize
                        && Instant::now() < deadline
                    {
                        std::thread::yield_now();
                    }
                    thread.stop().unwrap();
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
    bench_postpone_wait,
    bench_postpone_keep_last,
    bench_postpone_filtered_scan
);

criterion_group!(primitive_benches, bench_slot_counter, bench_emit_fan_out);

criterion_group!(scenario_benches, bench_end_to_end_scenario);

criterion_main!(queue_benches, primitive_benches, scenario_benches);
