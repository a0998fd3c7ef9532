//! Tests that tracked operations from several threads keep the tracker consistent.

use std::sync::{Arc, Barrier};
use std::thread;

use tracked_alloc::{CallSite, MemoryTracker, ReportTarget, Runtime};

const THREADS: usize = 8;
const ITERATIONS: usize = 200;

fn call_site(thread_index: usize) -> CallSite {
    CallSite::new(
        "thread_safety_tests.rs",
        "worker",
        u32::try_from(thread_index).unwrap(),
    )
}

#[test]
fn concurrent_allocate_free_reconciles() {
    let tracker = Arc::new(
        MemoryTracker::builder()
            .report_target(ReportTarget::Discard)
            .build(),
    );
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|thread_index| {
            let tracker = Arc::clone(&tracker);
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                barrier.wait();

                let mut kept = Vec::new();

                for i in 0..ITERATIONS {
                    let size = (thread_index + 1) * (i % 7 + 1);
                    let block = tracker
                        .allocate(size, &call_site(thread_index), None)
                        .unwrap();

                    // Each thread writes its own byte pattern into the whole payload.
                    // SAFETY: The block payload is exactly `size` bytes.
                    unsafe {
                        block
                            .as_ptr()
                            .write_bytes(u8::try_from(thread_index).unwrap(), size);
                    }

                    if i % 4 == 0 {
                        kept.push(block.addr().get());
                    } else {
                        assert!(tracker.validate(block.as_ptr()));
                        tracker.free(block.as_ptr()).unwrap();
                    }
                }

                kept
            })
        })
        .collect();

    let kept: Vec<usize> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();

    let stats = tracker.stats();
    let total = u64::try_from(THREADS * ITERATIONS).unwrap();

    assert_eq!(stats.allocs(), total);
    assert_eq!(stats.allocs() - stats.frees(), u64::try_from(kept.len()).unwrap());
    assert_eq!(stats.live_blocks(), kept.len());

    let report = tracker.report();
    assert_eq!(report.leaked_bytes(), stats.current_allocated());

    for address in kept {
        // Every address handed out is still a live, intact block.
        assert!(
            report
                .leaks()
                .iter()
                .any(|leak| leak.address() == address)
        );
    }
}

#[test]
fn concurrent_reallocate_keeps_blocks_intact() {
    let runtime = Arc::new(Runtime::with_builder(
        MemoryTracker::builder().report_target(ReportTarget::Discard),
    ));

    let handles: Vec<_> = (0..THREADS)
        .map(|thread_index| {
            let runtime = Arc::clone(&runtime);

            thread::spawn(move || {
                let memory = runtime.memory();
                let mut block = memory
                    .allocate(1, &call_site(thread_index), None)
                    .unwrap();

                for size in 2..=64 {
                    block = memory
                        .reallocate(block.as_ptr(), size, &call_site(thread_index), None)
                        .unwrap();
                    assert!(memory.validate(block.as_ptr()));
                }

                memory.free(block.as_ptr()).unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let runtime = Arc::into_inner(runtime).unwrap();
    let report = runtime.shutdown().unwrap();

    assert!(report.is_clean());
    assert_eq!(report.stats().current_allocated(), 0);
    assert_eq!(report.stats().allocs(), report.stats().frees());
}
