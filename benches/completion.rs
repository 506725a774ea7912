//! Baseline benchmarks for the completion and subscription paths.
//!
//! - Promise completion with varying subscriber counts
//! - Late subscription to a completed future
//! - Channel send fan-out through the replay buffer

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rivulet::{Executor, Fallible, Future, Producer, Promise};

fn bench_promise_complete(c: &mut Criterion) {
    let mut group = c.benchmark_group("promise_complete");

    for subscribers in [0usize, 1, 4, 16] {
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                b.iter(|| {
                    let promise: Promise<u64> = Promise::new();
                    let subs: Vec<_> = (0..subscribers)
                        .map(|_| {
                            promise.subscribe(&Executor::immediate(), |result, _| {
                                black_box(result.success_ref().copied());
                            })
                        })
                        .collect();
                    promise.succeed(black_box(42));
                    black_box(subs)
                });
            },
        );
    }
    group.finish();
}

fn bench_late_subscription(c: &mut Criterion) {
    let future = Future::value(7u64);
    c.bench_function("late_subscription", |b| {
        b.iter(|| {
            future.subscribe(&Executor::immediate(), |result, _| {
                black_box(result.success_ref().copied());
            })
        });
    });
}

fn bench_fallible_lifting(c: &mut Criterion) {
    c.bench_function("fallible_map_success", |b| {
        b.iter(|| black_box(Fallible::success(black_box(21u64)).map_success(|v| v * 2)));
    });
}

fn bench_channel_send(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_send");
    group.throughput(Throughput::Elements(1));

    for subscribers in [1usize, 4, 16] {
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                let producer: Producer<u64> = Producer::new(8);
                let subs: Vec<_> = (0..subscribers)
                    .map(|_| {
                        producer.channel().on_update(&Executor::immediate(), |update| {
                            black_box(update);
                        })
                    })
                    .collect();
                let mut i = 0u64;
                b.iter(|| {
                    i += 1;
                    producer.send(black_box(i), None);
                });
                drop(subs);
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_promise_complete,
    bench_late_subscription,
    bench_fallible_lifting,
    bench_channel_send
);
criterion_main!(benches);
