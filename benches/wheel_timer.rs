use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tierwheel::{TimerTask, WheelTimer};

// ==================== Benchmark Task Types ====================

struct NoopTask {
    id: AtomicU64,
}

impl NoopTask {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            id: AtomicU64::new(0),
        })
    }
}

impl TimerTask for NoopTask {
    fn set_id(&self, id: u64) {
        self.id.store(id, Ordering::Relaxed);
    }

    fn id(&self) -> u64 {
        self.id.load(Ordering::Relaxed)
    }

    fn execute(&self) {}
}

// ==================== Schedule Benchmarks ====================

fn bench_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule_1k");
    for max_delay in [64i64, 4096, 262_144] {
        group.bench_with_input(
            BenchmarkId::from_parameter(max_delay),
            &max_delay,
            |b, &max_delay| {
                b.iter_batched_ref(
                    || WheelTimer::new("bench", 0),
                    |timer| {
                        for _ in 0..1024 {
                            timer.add(NoopTask::new(), black_box(fastrand::i64(1..max_delay)));
                        }
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

// ==================== Cancel Benchmarks ====================

fn bench_cancel(c: &mut Criterion) {
    c.bench_function("cancel_1k", |b| {
        b.iter_batched(
            || {
                let timer = WheelTimer::new("bench", 0);
                let tasks: Vec<_> = (0..1024)
                    .map(|_| {
                        let task = NoopTask::new();
                        timer.add(task.clone(), fastrand::i64(1..4096));
                        task
                    })
                    .collect();
                (timer, tasks)
            },
            |(timer, tasks)| {
                for task in &tasks {
                    black_box(timer.remove(task.as_ref()));
                }
            },
            BatchSize::SmallInput,
        );
    });
}

// ==================== Advance Benchmarks ====================

fn bench_advance(c: &mut Criterion) {
    c.bench_function("advance_fire_10k", |b| {
        b.iter_batched_ref(
            || {
                let timer = WheelTimer::new("bench", 0);
                for _ in 0..10_240 {
                    timer.add(NoopTask::new(), fastrand::i64(1..8192));
                }
                timer
            },
            |timer| {
                black_box(timer.advance_clock(8192));
            },
            BatchSize::SmallInput,
        );
    });

    c.bench_function("advance_idle_sweep", |b| {
        b.iter_batched_ref(
            || {
                let timer = WheelTimer::new("bench", 0);
                timer.add(NoopTask::new(), 1_000_000);
                timer
            },
            |timer| {
                for bound in (0..100_000i64).step_by(1000) {
                    black_box(timer.advance_clock(bound));
                }
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_schedule, bench_cancel, bench_advance);
criterion_main!(benches);
