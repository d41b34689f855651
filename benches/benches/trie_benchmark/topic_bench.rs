use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use topicbus::Topic;

fn bench_parse(c: &mut Criterion) {
    c.bench_function("topic_parse_literal", |b| {
        b.iter(|| Topic::parse(black_box("orders.eu.created.v2")).unwrap())
    });
    c.bench_function("topic_parse_wildcards", |b| {
        b.iter(|| Topic::parse(black_box("orders.*.created.**")).unwrap())
    });
    c.bench_function("topic_parse_invalid", |b| {
        b.iter(|| Topic::parse(black_box("orders..created")).is_err())
    });
}

fn bench_matches(c: &mut Criterion) {
    let pattern = Topic::parse("orders.*.created.**").unwrap();
    let topic = Topic::parse("orders.eu.created.v2").unwrap();
    c.bench_function("topic_matches", |b| {
        b.iter(|| black_box(&pattern).matches(black_box(&topic)))
    });
}

criterion_group!(benches, bench_parse, bench_matches);
criterion_main!(benches);
