//! Benchmarks to measure the overhead of tracked allocation compared to plain allocation.

#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::alloc::{GlobalAlloc, Layout, System};
use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use tracked_alloc::{CallSite, MemoryTracker, ReportTarget};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

const SIZE: usize = 256;

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracked_alloc_overhead");

    // Baseline measurement - untracked allocation from the same underlying allocator.
    group.bench_function("system_alloc_free", |b| {
        let layout = Layout::from_size_align(SIZE, 16).unwrap();

        b.iter(|| {
            // SAFETY: The layout is not zero-sized.
            let ptr = unsafe { System.alloc(layout) };
            black_box(ptr);
            // SAFETY: Allocated above with the same layout.
            unsafe { System.dealloc(ptr, layout) };
        });
    });

    let tracker = MemoryTracker::builder()
        .report_target(ReportTarget::Discard)
        .build();
    let call_site = CallSite::new("tracking_overhead.rs", "entrypoint", 1);

    group.bench_function("tracked_alloc_free", |b| {
        b.iter(|| {
            let block = tracker
                .allocate(black_box(SIZE), &call_site, None)
                .unwrap();
            tracker.free(block.as_ptr()).unwrap();
        });
    });

    group.bench_function("tracked_validate", |b| {
        let block = tracker.allocate(SIZE, &call_site, None).unwrap();

        b.iter(|| black_box(tracker.validate(block.as_ptr())));

        tracker.free(block.as_ptr()).unwrap();
    });

    group.bench_function("tracked_reallocate", |b| {
        let mut block = tracker.allocate(SIZE, &call_site, None).unwrap();
        let mut grow = true;

        b.iter(|| {
            let new_size = if grow { SIZE * 2 } else { SIZE };
            grow = !grow;

            block = tracker
                .reallocate(block.as_ptr(), new_size, &call_site, None)
                .unwrap();
        });

        tracker.free(block.as_ptr()).unwrap();
    });

    // Validation cost with many live blocks in the table.
    group.bench_function("tracked_validate_crowded", |b| {
        let crowd: Vec<_> = (0..10_000)
            .map(|_| tracker.allocate(16, &call_site, None).unwrap())
            .collect();
        let block = crowd[crowd.len() / 2];

        b.iter(|| black_box(tracker.validate(block.as_ptr())));

        for block in crowd {
            tracker.free(block.as_ptr()).unwrap();
        }
    });

    group.finish();
}
