//! Admission hot-path benchmarks.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use memgate_admission::{
    AdmissionController, AllocatorConfig, CancellableTask, FailureMode, GlobalMemoryArbitrator,
    ProcessArbitrator, QueryMemTracker, ThreadContext,
};

fn attached_ctx(soft_limit: i64) -> ThreadContext {
    ThreadContext::attach_query(
        Arc::new(QueryMemTracker::new("query-bench", soft_limit)),
        Arc::new(CancellableTask::new("bench")),
    )
}

fn bench_check_within_limits(c: &mut Criterion) {
    let sizes: &[u64] = &[64, 4096, 1 << 20];
    let mut group = c.benchmark_group("check_within_limits");
    let ctl = AdmissionController::new(
        AllocatorConfig::default(),
        Arc::new(GlobalMemoryArbitrator::unlimited()),
    );
    let ctx = attached_ctx(-1);

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("proceed", size), &size, |b, &sz| {
            b.iter(|| criterion::black_box(ctl.check(&ctx, sz)));
        });
    }
    group.finish();
}

fn bench_check_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_paths");

    let bypass_ctl = AdmissionController::new(
        AllocatorConfig::default(),
        Arc::new(GlobalMemoryArbitrator::new(0)),
    );
    let bypass_ctx = attached_ctx(0);
    group.bench_function("bypassed", |b| {
        let _guard = bypass_ctx.skip_memory_check();
        b.iter(|| criterion::black_box(bypass_ctl.check(&bypass_ctx, 64)));
    });

    let arb = Arc::new(GlobalMemoryArbitrator::new(1024));
    arb.consume(1024);
    let fail_ctl = AdmissionController::new(
        AllocatorConfig::default()
            .with_memory_gc_disabled(true)
            .with_admission_log_capacity(0),
        arb,
    );
    let fail_ctx = attached_ctx(-1);
    group.bench_function("hard_limit_unwind", |b| {
        b.iter(|| criterion::black_box(fail_ctl.check(&fail_ctx, 64)));
    });

    let cancel_ctl = AdmissionController::new(
        AllocatorConfig::default()
            .with_failure_mode(FailureMode::Cancel)
            .with_admission_log_capacity(0),
        Arc::new(GlobalMemoryArbitrator::unlimited()),
    );
    let cancelled_ctx = attached_ctx(0);
    cancelled_ctx.cancel_query("bench setup");
    group.bench_function("soft_limit_already_cancelled", |b| {
        b.iter(|| criterion::black_box(cancel_ctl.check(&cancelled_ctx, 64)));
    });

    group.finish();
}

criterion_group!(benches, bench_check_within_limits, bench_check_paths);
criterion_main!(benches);
