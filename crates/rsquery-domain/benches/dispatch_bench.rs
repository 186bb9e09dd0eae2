//! Dispatch benchmarks using criterion.
//!
//! Measures the overhead of stepping, merging and dispatching fan-out
//! queries, with and without a request cache.
//!
//! Run with: cargo bench --bench dispatch_bench

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rsquery_domain::{make_cache, Dispatcher, Query, Request, Resolver};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GetItem(u64);

impl Request for GetItem {
    type Value = u64;
    type Error = String;
}

fn item_resolver() -> Resolver<GetItem> {
    Resolver::from_batch_fn("items", |requests: Vec<GetItem>| async move {
        Ok::<_, String>(requests.into_iter().map(|r| Ok(r.0 * 2)).collect::<Vec<_>>())
    })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("failed to build benchmark runtime")
}

fn bench_fan_out(c: &mut Criterion) {
    let rt = runtime();
    let resolver = item_resolver();
    let dispatcher = Dispatcher::default();
    let mut group = c.benchmark_group("fan_out");

    for size in [10u64, 100, 1_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::new("uncached", size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async {
                let query = Query::for_each_par(0..size, |id| Query::fetch(GetItem(id), &resolver));
                black_box(dispatcher.run(query).await)
            });
        });
        group.bench_with_input(BenchmarkId::new("cached_duplicates", size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async {
                let cache = make_cache::<GetItem>(1_024, Duration::from_secs(60))
                    .expect("valid cache config");
                let query = Query::for_each_par(0..size, |id| {
                    Query::fetch_cached(GetItem(id % 10), &resolver, &cache)
                });
                black_box(dispatcher.run(query).await)
            });
        });
    }
    group.finish();
}

fn bench_sequential_rounds(c: &mut Criterion) {
    let rt = runtime();
    let resolver = item_resolver();
    let dispatcher = Dispatcher::default();

    c.bench_function("sequential_rounds_100", |b| {
        b.to_async(&rt).iter(|| async {
            let query = Query::for_each_seq(0..100u64, |id| Query::fetch(GetItem(id), &resolver));
            black_box(dispatcher.run(query).await)
        });
    });
}

criterion_group!(benches, bench_fan_out, bench_sequential_rounds);
criterion_main!(benches);
