//! Benchmarks for the per-request overhead of the scheduler.
//!
//! Benchmark targets:
//! - Policy decision: <1us
//! - Untriggered request cycle: <5us
//! - Forced pass over 1000 deferred values: <1ms

// Criterion macros generate items without docs - this is expected for benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use oobgc::{
    CompositePolicy, DeferredHeap, IntervalTrigger, PathTrigger, ReclamationController,
    RequestContext, RequestCycle, TriggerPolicy, WorkerId,
};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn composite() -> TriggerPolicy {
    TriggerPolicy::Composite(
        CompositePolicy::default()
            .with(TriggerPolicy::Path(
                PathTrigger::new("^/(reports|exports)/").unwrap(),
            ))
            .with(TriggerPolicy::Interval(IntervalTrigger::new(100).unwrap())),
    )
}

fn bench_decide(c: &mut Criterion) {
    let mut group = c.benchmark_group("decide");
    let ctx = RequestContext::new("/api/v1/users/42", WorkerId::new("1"));

    let mut interval = TriggerPolicy::Interval(IntervalTrigger::new(10).unwrap());
    group.bench_function("interval", |b| {
        b.iter(|| interval.decide(black_box(&ctx)));
    });

    let mut policy = composite();
    group.bench_function("composite", |b| {
        b.iter(|| policy.decide(black_box(&ctx)));
    });

    group.finish();
}

fn bench_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_cycle");
    group.measurement_time(Duration::from_secs(5));

    let heap = Arc::new(DeferredHeap::default());
    let handler_heap = Arc::clone(&heap);
    let handler = move |_ctx: &mut RequestContext| {
        handler_heap.defer(0_u64);
        http::Response::new(())
    };
    let policy = TriggerPolicy::Interval(IntervalTrigger::new(1000).unwrap());
    let mut cycle = RequestCycle::new(handler, policy, heap, WorkerId::new("1"));
    let request = http::Request::get("/api/v1/users/42").body(()).unwrap();

    group.bench_function("untriggered", |b| {
        b.iter(|| black_box(cycle.call(&request).close()));
    });

    group.finish();
}

fn bench_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("forced_pass");

    for count in [10_u64, 1000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let heap = DeferredHeap::default();
            heap.disable();
            b.iter(|| {
                for _ in 0..count {
                    heap.defer_sized(vec![0_u8; 64], 64);
                }
                black_box(heap.run().unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decide, bench_cycle, bench_pass);
criterion_main!(benches);
