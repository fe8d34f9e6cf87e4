//! Allocator benchmarks: admission plus backend, per backend.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use memgate_admission::{AllocatorConfig, GlobalMemoryArbitrator, QueryMemTracker, ThreadContext};
use memgate_alloc::{
    Allocator, DefaultAllocator, ExternalLibraryBackend, MemoryBackend, RecordingBackend,
    SystemBackend,
};

fn allocator<B: MemoryBackend>(backend: B) -> Allocator<B> {
    Allocator::with_config(
        backend,
        AllocatorConfig::default(),
        Arc::new(GlobalMemoryArbitrator::unlimited()),
    )
}

fn cycle<B: MemoryBackend>(alloc: &Allocator<B>, ctx: &ThreadContext, size: usize) {
    if let Ok(Some(ptr)) = alloc.alloc(ctx, size, 16) {
        criterion::black_box(ptr);
        // SAFETY: ptr was just allocated with (size, 16).
        let _ = unsafe { alloc.free(ctx, ptr, size, 16) };
    }
}

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 256, 4096, 32768];
    let mut group = c.benchmark_group("gated_alloc_free_cycle");
    let ctx = ThreadContext::detached(Arc::new(QueryMemTracker::unlimited("bench")));
    let system = allocator(SystemBackend);
    let external = allocator(ExternalLibraryBackend::default());
    let recording = allocator(RecordingBackend::new(SystemBackend));

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, &sz| {
            b.iter(|| cycle(&system, &ctx, sz));
        });
        group.bench_with_input(BenchmarkId::new("external", size), &size, |b, &sz| {
            b.iter(|| cycle(&external, &ctx, sz));
        });
        group.bench_with_input(BenchmarkId::new("recording", size), &size, |b, &sz| {
            b.iter(|| cycle(&recording, &ctx, sz));
        });
    }
    group.finish();
}

fn bench_realloc_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("gated_realloc_growth");
    let ctx = ThreadContext::detached(Arc::new(QueryMemTracker::unlimited("bench")));
    let alloc: DefaultAllocator = allocator(SystemBackend);

    group.bench_function("64B_to_64KiB_doubling", |b| {
        b.iter(|| {
            let Ok(Some(mut ptr)) = alloc.alloc(&ctx, 64, 16) else {
                return;
            };
            let mut size = 64;
            while size < 64 * 1024 {
                // SAFETY: ptr is live with (size, 16) and replaced on success.
                match unsafe { alloc.realloc(&ctx, ptr, size, size * 2, 16) } {
                    Ok(Some(grown)) => {
                        ptr = grown;
                        size *= 2;
                    }
                    _ => break,
                }
            }
            // SAFETY: ptr is live with (size, 16).
            let _ = unsafe { alloc.free(&ctx, ptr, size, 16) };
        });
    });
    group.finish();
}

criterion_group!(benches, bench_alloc_free_cycle, bench_realloc_growth);
criterion_main!(benches);
