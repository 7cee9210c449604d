//! Translation throughput benchmarks
//!
//! Measures end-to-end translation of representative queries and the cost of
//! parallel batch translation.

use aqlbridge::metrics::Metrics;
use aqlbridge::{BindVars, Translator};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

const QUERIES: &[(&str, &str)] = &[
    ("filter", "FOR u IN users FILTER u.active == true && u.age >= 18 RETURN u.name"),
    (
        "collect",
        "FOR u IN users COLLECT dept = u.department AGGREGATE total = SUM(u.salary) \
         WITH COUNT INTO cnt RETURN {dept, total, cnt}",
    ),
    (
        "join",
        "FOR u IN users FOR o IN orders FILTER o.user == u._key SORT o.total DESC \
         LIMIT 10 RETURN {name: u.name, total: o.total}",
    ),
    (
        "traversal",
        "FOR v, e IN 1..3 OUTBOUND 'accounts/1' transfers FILTER v.active == true RETURN v",
    ),
    (
        "subquery",
        "FOR u IN users RETURN {name: u.name, orders: (FOR o IN orders \
         FILTER o.user == u._key RETURN o.total)}",
    ),
];

fn translator() -> Translator {
    Translator::default().with_metrics(Arc::new(Metrics::new()))
}

/// Single query translation by query shape
fn bench_translate(c: &mut Criterion) {
    let translator = translator();
    let vars = BindVars::new();
    let mut group = c.benchmark_group("translate");

    for (name, query) in QUERIES {
        group.throughput(Throughput::Bytes(query.len() as u64));
        group.bench_with_input(BenchmarkId::new("query", name), query, |b, query| {
            b.iter(|| black_box(translator.translate(black_box(query), &vars)));
        });
    }

    group.finish();
}

/// Front end and lowering only
fn bench_explain(c: &mut Criterion) {
    let translator = translator();
    let mut group = c.benchmark_group("explain");

    for (name, query) in QUERIES {
        group.bench_with_input(BenchmarkId::new("query", name), query, |b, query| {
            b.iter(|| black_box(translator.explain(black_box(query))));
        });
    }

    group.finish();
}

/// Parallel batch translation
fn bench_batch(c: &mut Criterion) {
    let translator = translator();
    let mut group = c.benchmark_group("translate_all");

    for size in [16usize, 256] {
        let batch: Vec<(String, BindVars)> = QUERIES
            .iter()
            .cycle()
            .take(size)
            .map(|(_, q)| (q.to_string(), BindVars::new()))
            .collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("batch", size), &batch, |b, batch| {
            b.iter(|| black_box(translator.translate_all(batch)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_translate, bench_explain, bench_batch);
criterion_main!(benches);
