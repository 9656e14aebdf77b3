//! Enter/exit hook overhead
//!
//! Measures one recorded call (enter + exit) through the recorder in both
//! output modes, plus the cost of a filtered call and of size correlation.
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench hook_overhead
//! ```

use circ::clock::MonotonicClock;
use circ::config::Configuration;
use circ::policy::FunctionId;
use circ::recorder::{Recorder, ThreadKey};
use circ::runtime::TraceRuntime;
use circ::size_stack::{FrameAddr, Placement, SizeSource, StructId};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::io;

const THREAD: ThreadKey = ThreadKey(1);

fn runtime(config: Configuration) -> TraceRuntime<io::Sink, MonotonicClock> {
    TraceRuntime::new(Recorder::new(config, io::sink(), MonotonicClock))
}

/// Benchmark: one recorded call in buffered mode with varying flush thresholds
fn bench_buffered_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffered_call");

    for capacity in [1, 1024, 20_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                let mut rt = runtime(Configuration {
                    initial_capacity: capacity,
                    ..Configuration::default()
                });
                b.iter(|| {
                    let function = black_box(FunctionId(0x401136));
                    rt.on_enter(THREAD, function, || None).unwrap();
                    rt.on_exit(THREAD, function, || None).unwrap();
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: one recorded call with a write + flush per record
fn bench_direct_call(c: &mut Criterion) {
    let mut rt = runtime(Configuration {
        direct_output: true,
        ..Configuration::default()
    });

    c.bench_function("direct_call", |b| {
        b.iter(|| {
            let function = black_box(FunctionId(0x401136));
            rt.on_enter(THREAD, function, || None).unwrap();
            rt.on_exit(THREAD, function, || None).unwrap();
        });
    });
}

/// Benchmark: a filtered call, the cheapest path through the hooks
fn bench_filtered_call(c: &mut Criterion) {
    let mut config = Configuration::default();
    config.policies.insert_filter(FunctionId(0x401136));
    let mut rt = runtime(config);

    c.bench_function("filtered_call", |b| {
        b.iter(|| {
            let function = black_box(FunctionId(0x401136));
            rt.on_enter(THREAD, function, || None).unwrap();
            rt.on_exit(THREAD, function, || None).unwrap();
        });
    });
}

/// Benchmark: declaration plus a recorded call that consumes it
fn bench_correlated_call(c: &mut Criterion) {
    let mut rt = runtime(Configuration::default());
    rt.register_size(StructId(1), Placement::Outer, SizeSource::Value(0));
    let frame = || Some(FrameAddr(0x7ffd_0000));

    c.bench_function("correlated_call", |b| {
        let mut size = 0u64;
        b.iter(|| {
            size += 1;
            rt.declare_use(THREAD, StructId(1), Some(black_box(size)), |_| frame());
            rt.on_enter(THREAD, FunctionId(0x401136), frame).unwrap();
            rt.on_exit(THREAD, FunctionId(0x401136), frame).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_buffered_call,
    bench_direct_call,
    bench_filtered_call,
    bench_correlated_call
);
criterion_main!(benches);
