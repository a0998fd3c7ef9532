//! Integration tests for `tracked_alloc` exercising the public API end to end.
//!
//! The tests deliberately write out of bounds of tracked payloads. Such writes stay inside the
//! raw block (they land in the header or footer guard), which is exactly what the tracker exists
//! to detect.

#![allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "tests deliberately write into tracked blocks, including their guards"
)]

use std::ptr::{self, NonNull};
use std::slice;

use tracked_alloc::{
    CallSite, Error, ErrorKind, MAX_FILE_LEN, MAX_FUNCTION_LEN, MemoryTracker, OwnerRef,
    ReportTarget, call_site,
};

fn tracker() -> MemoryTracker {
    MemoryTracker::builder()
        .report_target(ReportTarget::Discard)
        .build()
}

fn main_entry(line: u32) -> CallSite {
    CallSite::new("main", "entry", line)
}

fn fill(block: NonNull<u8>, value: u8, len: usize) {
    unsafe { ptr::write_bytes(block.as_ptr(), value, len) };
}

#[test]
fn allocated_block_is_valid() {
    let tracker = tracker();

    let p = tracker.allocate(256, &main_entry(20), None).unwrap();

    assert!(tracker.validate(p.as_ptr()));
    assert_eq!(tracker.check(p.as_ptr()), Ok(()));
}

#[test]
fn overrun_by_one_byte_is_corrupt_footer() {
    let tracker = tracker();
    let p = tracker.allocate(256, &main_entry(20), None).unwrap();

    fill(p, b'A', 257);

    assert!(!tracker.validate(p.as_ptr()));
    assert_eq!(
        tracker.check(p.as_ptr()),
        Err(Error::CorruptFooter {
            address: p.addr().get()
        })
    );
}

#[test]
fn free_of_intact_block_releases_it() {
    let tracker = tracker();
    let corrupted = tracker.allocate(256, &main_entry(20), None).unwrap();
    let twin = tracker.allocate(256, &main_entry(20), None).unwrap();
    fill(corrupted, b'A', 257);

    let before = tracker.stats();
    tracker.free(twin.as_ptr()).unwrap();
    let after = tracker.stats();

    assert_eq!(after.live_blocks(), before.live_blocks() - 1);
    assert_eq!(after.frees(), before.frees() + 1);
}

#[test]
fn second_free_is_untracked_pointer() {
    let tracker = tracker();
    let p = tracker.allocate(256, &main_entry(20), None).unwrap();
    tracker.free(p.as_ptr()).unwrap();
    let frees = tracker.stats().frees();

    let result = tracker.free(p.as_ptr());

    assert_eq!(result.unwrap_err().kind(), ErrorKind::UntrackedPointer);
    assert_eq!(tracker.stats().frees(), frees);
}

#[test]
fn unfreed_block_is_reported_at_teardown() {
    let tracker = tracker();
    tracker.allocate(128, &main_entry(21), None).unwrap();

    let report = tracker.finish();

    assert_eq!(report.leaks().len(), 1);
    let leak = &report.leaks()[0];
    assert_eq!(leak.requested_size(), 128);
    assert_eq!(leak.file(), "main");
    assert_eq!(leak.function(), "entry");
    assert_eq!(leak.line(), 21);
}

#[test]
fn reallocate_moves_block() {
    let tracker = tracker();
    let q = tracker.allocate(64, &main_entry(30), None).unwrap();
    let original: Vec<u8> = (0..64).collect();
    unsafe { ptr::copy_nonoverlapping(original.as_ptr(), q.as_ptr(), 64) };

    let r = tracker
        .reallocate(q.as_ptr(), 256, &main_entry(31), None)
        .unwrap();

    assert_ne!(r, q);
    let moved = unsafe { slice::from_raw_parts(r.as_ptr(), 64) };
    assert_eq!(moved, original.as_slice());
    assert_eq!(
        tracker.check(q.as_ptr()).unwrap_err().kind(),
        ErrorKind::UntrackedPointer
    );
    assert!(tracker.validate(r.as_ptr()));
}

#[test]
fn round_trip_restores_accounting_for_all_sizes() {
    let tracker = tracker();
    // Some unrelated live block, so that the gauge does not start at zero.
    let _anchor = tracker.allocate(40, &main_entry(1), None).unwrap();

    for size in (0..=64).chain([100, 1000, 4096, 65536]) {
        let before = tracker.stats();

        let block = tracker.allocate(size, &main_entry(2), None).unwrap();
        tracker.free(block.as_ptr()).unwrap();

        let after = tracker.stats();
        assert_eq!(after.current_allocated(), before.current_allocated());
        assert_eq!(after.live_blocks(), before.live_blocks());
        assert_eq!(after.allocs(), before.allocs() + 1);
        assert_eq!(after.frees(), before.frees() + 1);
    }
}

#[test]
fn writing_exactly_the_requested_size_is_fine() {
    let tracker = tracker();

    for size in [0, 1, 7, 16, 33, 512] {
        let block = tracker.allocate(size, &main_entry(1), None).unwrap();

        fill(block, 0xEE, size);
        assert!(tracker.validate(block.as_ptr()));

        fill(block, 0xEE, size + 1);
        assert_eq!(
            tracker.check(block.as_ptr()).unwrap_err().kind(),
            ErrorKind::CorruptFooter
        );
    }
}

#[test]
fn underrun_is_corrupt_header_for_validate_and_free() {
    let tracker = tracker();
    let block = tracker.allocate(32, &main_entry(1), None).unwrap();

    unsafe { block.as_ptr().sub(1).write(0) };

    assert!(!tracker.validate(block.as_ptr()));
    assert_eq!(
        tracker.free(block.as_ptr()),
        Err(Error::CorruptHeader {
            address: block.addr().get()
        })
    );
}

#[test]
fn corrupt_block_stays_tracked_after_free_attempt() {
    let tracker = tracker();
    let block = tracker.allocate(16, &main_entry(9), None).unwrap();
    fill(block, 1, 17);

    tracker.free(block.as_ptr()).unwrap_err();
    // Still reported as corrupt rather than as unknown.
    assert_eq!(
        tracker.free(block.as_ptr()).unwrap_err().kind(),
        ErrorKind::CorruptFooter
    );

    let report = tracker.finish();
    assert_eq!(report.leaks().len(), 1);
    assert_eq!(report.leaks()[0].line(), 9);
}

#[test]
fn long_names_are_truncated() {
    let tracker = tracker();
    let long_file = "a_source_file_with_a_remarkably_long_name.rs";
    let long_function = "a_function_with_an_even_more_remarkably_long_name";

    tracker
        .allocate(8, &CallSite::new(long_file, long_function, 5), None)
        .unwrap();

    let report = tracker.finish();
    let leak = &report.leaks()[0];

    assert_eq!(leak.file().len(), MAX_FILE_LEN);
    assert!(long_file.starts_with(leak.file()));
    assert_eq!(leak.function().len(), MAX_FUNCTION_LEN);
    assert!(long_function.starts_with(leak.function()));
    assert_eq!(leak.line(), 5);
}

#[test]
fn leak_accounting_matches_current_allocated() {
    let tracker = tracker();

    let blocks: Vec<_> = (1..=10)
        .map(|i| tracker.allocate(i * 10, &main_entry(1), None).unwrap())
        .collect();

    for block in blocks.iter().step_by(3) {
        tracker.free(block.as_ptr()).unwrap();
    }

    let report = tracker.finish();

    // 10 allocated, 4 freed (indices 0, 3, 6, 9).
    assert_eq!(report.leaks().len(), 6);
    assert_eq!(report.leaked_bytes(), report.stats().current_allocated());
    assert_eq!(report.stats().allocs() - report.stats().frees(), 6);

    let addresses: Vec<_> = report.leaks().iter().map(|leak| leak.address()).collect();
    assert!(addresses.is_sorted());
}

#[test]
fn owner_is_recorded() {
    struct Level {
        _id: u32,
    }

    let tracker = tracker();
    let level = Level { _id: 1 };
    let owner = OwnerRef::of(&level);

    tracker.allocate(4, &main_entry(1), Some(owner)).unwrap();
    tracker.allocate(4, &main_entry(2), None).unwrap();

    let report = tracker.finish();
    let owners: Vec<_> = report.leaks().iter().map(|leak| leak.owner()).collect();

    assert!(owners.contains(&Some(owner)));
    assert!(owners.contains(&None));
    assert!(owner.type_name().ends_with("Level"));
}

#[test]
fn call_site_macro_location() {
    let tracker = tracker();

    let expected_line = line!() + 1;
    tracker.allocate(1, &call_site!(), None).unwrap();

    let report = tracker.finish();
    let leak = &report.leaks()[0];

    assert_eq!(leak.file(), "integration_tests.rs");
    assert_eq!(leak.function(), "call_site_macro_location");
    assert_eq!(leak.line(), expected_line);
}

#[test]
fn foreign_pointers_are_rejected() {
    let tracker = tracker();
    let mut boxed = Box::new([0_u8; 16]);

    assert_eq!(
        tracker.free(boxed.as_mut_ptr()).unwrap_err().kind(),
        ErrorKind::UntrackedPointer
    );
    assert_eq!(
        tracker
            .reallocate(boxed.as_mut_ptr(), 32, &main_entry(1), None)
            .unwrap_err()
            .kind(),
        ErrorKind::UntrackedPointer
    );
    assert!(!tracker.validate(ptr::null()));
    assert_eq!(tracker.stats().allocs(), 0);
}

#[test]
fn error_messages_name_the_address() {
    let tracker = tracker();
    let block = tracker.allocate(8, &main_entry(1), None).unwrap();
    fill(block, 0, 9);

    let message = tracker.check(block.as_ptr()).unwrap_err().to_string();

    assert!(
        message.contains(&format!("{:#x}", block.addr().get())),
        "{message}"
    );
}
