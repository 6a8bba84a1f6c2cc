use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stream_sketches::quantiles::{QuantilesSketch, ReqMode, ReqSketch};

/// Benchmark: compact-levels update
fn bench_quantiles_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("quantiles_update");

    for k in [32, 128, 512] {
        group.bench_with_input(BenchmarkId::new("update", k), &k, |b, &k| {
            let mut sketch = QuantilesSketch::with_seed(k, 42).unwrap();
            let mut counter = 0.0f64;
            b.iter(|| {
                sketch.update(black_box(counter));
                counter += 1.0;
            });
        });
    }

    group.finish();
}

/// Benchmark: compact-levels quantile query
fn bench_quantiles_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("quantiles_query");

    for n in [10_000, 100_000] {
        let mut sketch = QuantilesSketch::with_seed(128, 42).unwrap();
        for i in 0..n {
            sketch.update(i as f64);
        }
        group.bench_with_input(BenchmarkId::new("median", n), &n, |b, _| {
            b.iter(|| sketch.quantile(black_box(0.5)));
        });
    }

    group.finish();
}

/// Benchmark: same-k merge
fn bench_quantiles_merge(c: &mut Criterion) {
    let mut left = QuantilesSketch::with_seed(128, 1).unwrap();
    let mut right = QuantilesSketch::with_seed(128, 2).unwrap();
    for i in 0..50_000 {
        left.update(i as f64);
        right.update((50_000 + i) as f64);
    }

    c.bench_function("quantiles_merge", |b| {
        b.iter(|| {
            let mut target = left.clone();
            target.merge(black_box(&right)).unwrap();
            target
        });
    });
}

/// Benchmark: relative-error update
fn bench_req_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("req_update");

    for k in [8, 12, 32] {
        group.bench_with_input(BenchmarkId::new("update", k), &k, |b, &k| {
            let mut sketch = ReqSketch::with_seed(k, ReqMode::HighRankAccuracy, 42).unwrap();
            let mut counter = 0.0f64;
            b.iter(|| {
                sketch.update(black_box(counter));
                counter += 1.0;
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_quantiles_update,
    bench_quantiles_query,
    bench_quantiles_merge,
    bench_req_update
);
criterion_main!(benches);
