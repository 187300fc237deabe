// benches/interception_bench.rs
//! Benchmarks for the socket construction hot path
//!
//! - provider resolution through an idle and an active registry
//! - socket construction, direct and through the logging provider
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use socky::{Interceptor, LoggingProvider, SocketArgs};
use std::sync::Arc;

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("Resolve");

    let idle = Interceptor::new();
    group.bench_function("idle", |b| b.iter(|| black_box(idle.resolve())));

    let active = Interceptor::new();
    active.enable(Arc::new(LoggingProvider::new()), false).unwrap();
    group.bench_function("active", |b| b.iter(|| black_box(active.resolve())));

    group.finish();
}

fn bench_socket(c: &mut Criterion) {
    let mut group = c.benchmark_group("Socket");

    let interceptor = Arc::new(Interceptor::new());
    let factory = interceptor.factory();
    group.bench_function("native", |b| {
        b.iter(|| black_box(factory.socket(SocketArgs::stream()).unwrap()))
    });

    interceptor.enable(Arc::new(LoggingProvider::new()), false).unwrap();
    group.bench_function("logging", |b| {
        b.iter(|| black_box(factory.socket(SocketArgs::stream()).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_resolve, bench_socket);
criterion_main!(benches);
