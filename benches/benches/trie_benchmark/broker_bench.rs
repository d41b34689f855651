use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde_json::json;
use topicbus::{Broker, MessageBus, Subscription};

const SEGMENTS: [&str; 6] = ["orders", "users", "eu", "us", "created", "deleted"];

fn random_topic(
    rng: &mut SmallRng,
    depth: usize,
) -> String {
    (0..depth)
        .map(|_| SEGMENTS[rng.gen_range(0..SEGMENTS.len())])
        .collect::<Vec<_>>()
        .join(".")
}

fn random_pattern(
    rng: &mut SmallRng,
    depth: usize,
) -> String {
    let mut parts: Vec<&str> = (0..depth)
        .map(|_| match rng.gen_range(0..8) {
            0 => "*",
            _ => SEGMENTS[rng.gen_range(0..SEGMENTS.len())],
        })
        .collect();
    if rng.gen_bool(0.2) {
        parts.push("**");
    }
    parts.join(".")
}

fn bench_subscribe(c: &mut Criterion) {
    let broker = Broker::new();
    c.bench_function("broker_subscribe_cancel", |b| {
        b.iter(|| {
            let sub = broker.subscribe(black_box("orders.eu.created")).unwrap();
            sub.cancel();
        })
    });
}

fn bench_publish_exact(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_exact");
    for subs in [0usize, 1, 10, 100] {
        let broker = Broker::new();
        let _subs: Vec<Subscription> = (0..subs)
            .map(|_| broker.subscribe("orders.eu.created").unwrap())
            .collect();
        group.throughput(Throughput::Elements(subs.max(1) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(subs), &subs, |b, _| {
            b.iter(|| {
                broker
                    .publish(black_box("orders.eu.created"), json!(1))
                    .unwrap()
            })
        });
    }
    group.finish();
}

/// Публикация в дерево со случайными шаблонами разной глубины.
fn bench_publish_wildcards(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_wildcards");
    for patterns in [10usize, 100, 1_000] {
        let mut rng = SmallRng::seed_from_u64(42);
        let broker = Broker::new();
        let _subs: Vec<Subscription> = (0..patterns)
            .map(|_| {
                let depth = rng.gen_range(1..=4);
                broker.subscribe(&random_pattern(&mut rng, depth)).unwrap()
            })
            .collect();
        let topics: Vec<String> = (0..64)
            .map(|_| {
                let depth = rng.gen_range(1..=4);
                random_topic(&mut rng, depth)
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(patterns), &topics, |b, topics| {
            let mut i = 0;
            b.iter(|| {
                broker
                    .publish(black_box(&topics[i % topics.len()]), json!(null))
                    .unwrap();
                i += 1;
            })
        });
    }
    group.finish();
}

fn bench_count(c: &mut Criterion) {
    let mut rng = SmallRng::seed_from_u64(7);
    let broker = Broker::new();
    for _ in 0..1_000 {
        let depth = rng.gen_range(1..=4);
        broker.subscribe(&random_pattern(&mut rng, depth)).unwrap();
    }
    c.bench_function("broker_count_1000", |b| {
        b.iter(|| black_box(broker.count().unwrap()))
    });
}

criterion_group!(
    benches,
    bench_subscribe,
    bench_publish_exact,
    bench_publish_wildcards,
    bench_count
);
criterion_main!(benches);
