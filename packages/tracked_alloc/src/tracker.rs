use std::alloc::{GlobalAlloc, Layout, System};
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, error, warn};

use crate::block::{self, BlockPtr};
use crate::constants::ERR_POISONED_LOCK;
use crate::table::{TableEntry, TrackingTable};
use crate::validate::check_block;
use crate::{
    CallSite, Error, LeakReport, MemoryTrackerBuilder, OwnerRef, ReportTarget, Result,
    TrackerStats,
};

/// Everything guarded by the tracker's lock.
#[derive(Debug, Default)]
struct TrackerState {
    table: TrackingTable,
    allocs: u64,
    frees: u64,
    current_allocated: u64,
    total_allocated: u64,
}

impl TrackerState {
    fn register(&mut self, entry: TableEntry) -> NonNull<u8> {
        let size = size_as_u64(entry.requested_size);

        self.table.insert(entry);

        self.allocs = self
            .allocs
            .checked_add(1)
            .expect("allocation count overflows u64 - this indicates an unrealistic scenario");
        self.total_allocated = self
            .total_allocated
            .checked_add(size)
            .expect("total bytes allocated overflows u64 - this indicates an unrealistic scenario");
        self.current_allocated = self
            .current_allocated
            .checked_add(size)
            .expect("current bytes allocated overflows u64 - this indicates an unrealistic scenario");

        entry.block.payload()
    }

    fn deregister(&mut self, address: usize) -> Option<TableEntry> {
        let entry = self.table.remove(address)?;

        self.frees = self
            .frees
            .checked_add(1)
            .expect("free count overflows u64 - this indicates an unrealistic scenario");
        self.current_allocated = self
            .current_allocated
            .checked_sub(size_as_u64(entry.requested_size))
            .expect("current bytes allocated is the sum of live block sizes so cannot underflow");

        Some(entry)
    }

    fn stats(&self) -> TrackerStats {
        TrackerStats::new(
            self.allocs,
            self.frees,
            self.current_allocated,
            self.total_allocated,
            self.table.len(),
        )
    }
}

fn size_as_u64(size: usize) -> u64 {
    size.try_into().expect("usize always fits into u64")
}

/// Tracks memory blocks allocated through it, guarding each one against overruns and underruns
/// and reporting blocks that are never freed.
///
/// Every block is reserved from the underlying allocator `A` with a header in front of the
/// payload and a footer after it. The header records where the block was allocated and the two
/// carry sentinel values that are checked whenever the block is freed, reallocated or validated.
///
/// All operations are thread-safe; they are serialized by a single lock that protects the
/// tracking table and the statistics.
///
/// # Teardown
///
/// When the tracker is dropped (or [`finish()`][Self::finish] is called) it emits a
/// [`LeakReport`] to the configured [`ReportTarget`], listing every block that was never freed.
/// Unfreed blocks are deliberately not released at that point because callers may still hold
/// pointers to them.
///
/// # Examples
///
/// ```
/// use tracked_alloc::{Error, MemoryTracker, ReportTarget, call_site};
///
/// let tracker = MemoryTracker::builder()
///     .report_target(ReportTarget::Stderr)
///     .build();
///
/// let block = tracker.allocate(16, &call_site!(), None).unwrap();
/// assert!(tracker.validate(block.as_ptr()));
///
/// tracker.free(block.as_ptr()).unwrap();
///
/// // A second free is detected.
/// assert!(matches!(
///     tracker.free(block.as_ptr()),
///     Err(Error::UntrackedPointer { .. })
/// ));
/// ```
pub struct MemoryTracker<A: GlobalAlloc = System> {
    allocator: A,
    state: Mutex<TrackerState>,
    report_target: ReportTarget,
    output_limit: usize,
    finished: bool,
}

impl<A: GlobalAlloc> fmt::Debug for MemoryTracker<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTracker")
            .field("allocator", &"<allocator>")
            .field("state", &self.state)
            .field("report_target", &self.report_target)
            .field("output_limit", &self.output_limit)
            .field("finished", &self.finished)
            .finish()
    }
}

impl MemoryTracker<System> {
    /// Creates a tracker that reserves memory from the system allocator and writes its leak
    /// report to [`DEFAULT_LOG_NAME`][crate::DEFAULT_LOG_NAME] in the current working directory.
    #[must_use]
    pub fn system() -> Self {
        Self::builder().build()
    }

    /// Starts building a tracker with custom configuration.
    pub fn builder() -> MemoryTrackerBuilder<System> {
        MemoryTrackerBuilder::new()
    }
}

impl<A: GlobalAlloc> MemoryTracker<A> {
    pub(crate) fn new_inner(allocator: A, report_target: ReportTarget, output_limit: usize) -> Self {
        Self {
            allocator,
            state: Mutex::new(TrackerState::default()),
            report_target,
            output_limit,
            finished: false,
        }
    }

    /// The allocator that raw block memory is reserved from.
    #[must_use]
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Allocates a tracked block with a payload of `size` bytes and returns the payload address.
    ///
    /// The payload is zero-initialized and aligned to 16 bytes. A `size` of zero is valid and
    /// produces a tracked block with an empty payload whose address is unique among live blocks.
    ///
    /// # Errors
    ///
    /// [`Error::AllocationFailure`] if the underlying allocator is out of memory or `size` is too
    /// large to be allocated together with the guards.
    pub fn allocate(
        &self,
        size: usize,
        call_site: &CallSite,
        owner: Option<OwnerRef>,
    ) -> Result<NonNull<u8>> {
        let mut state = self.lock();

        let entry = self.reserve(size, call_site, owner)?;
        let payload = state.register(entry);

        debug!(
            address = payload.addr().get(),
            size,
            file = call_site.file(),
            function = call_site.function(),
            line = call_site.line(),
            "allocated tracked block"
        );

        Ok(payload)
    }

    /// Frees the tracked block whose payload starts at `ptr`. Freeing a null pointer does nothing.
    ///
    /// The block is checked for corruption first. A corrupted block is **not** released: it
    /// stays tracked (and will show up in the leak report) and the corruption is returned as
    /// the error, so that the problem remains visible.
    ///
    /// The tracker never dereferences `ptr` itself; only addresses found in the tracking table
    /// are accessed, so passing a foreign or dangling pointer is detected rather than undefined.
    ///
    /// # Errors
    ///
    /// * [`Error::UntrackedPointer`] if `ptr` is not a live tracked block (e.g. a double free).
    ///   Nothing changes in that case.
    /// * [`Error::CorruptHeader`], [`Error::CorruptFooter`] or [`Error::SizeMismatch`] if the
    ///   block is damaged.
    pub fn free(&self, ptr: *mut u8) -> Result<()> {
        if ptr.is_null() {
            return Ok(());
        }

        let address = ptr.addr();
        let mut state = self.lock();

        check_block(&state.table, address).inspect_err(|e| log_rejection("free", e))?;

        let entry = state
            .deregister(address)
            .expect("block was found in the table while holding the lock");

        self.release(entry);

        debug!(address, size = entry.requested_size, "freed tracked block");

        Ok(())
    }

    /// Moves the tracked block at `ptr` into a new block with a payload of `new_size` bytes and
    /// returns the new payload address.
    ///
    /// The first `min(old size, new_size)` payload bytes are copied and any additional bytes are
    /// zero. The new block is attributed to `call_site` and `owner`. A null `ptr` makes this
    /// equivalent to [`allocate()`][Self::allocate].
    ///
    /// The new block always has a different address from the old one, which is released.
    ///
    /// # Errors
    ///
    /// * [`Error::UntrackedPointer`] if `ptr` is not a live tracked block.
    /// * [`Error::CorruptHeader`], [`Error::CorruptFooter`] or [`Error::SizeMismatch`] if the
    ///   block is damaged. No copy is attempted and the block stays tracked.
    /// * [`Error::AllocationFailure`] if the new block cannot be allocated. The original block
    ///   remains valid and tracked.
    pub fn reallocate(
        &self,
        ptr: *mut u8,
        new_size: usize,
        call_site: &CallSite,
        owner: Option<OwnerRef>,
    ) -> Result<NonNull<u8>> {
        if ptr.is_null() {
            return self.allocate(new_size, call_site, owner);
        }

        let address = ptr.addr();
        let mut state = self.lock();

        let old = *check_block(&state.table, address)
            .inspect_err(|e| log_rejection("reallocate", e))?;

        let new = self.reserve(new_size, call_site, owner)?;

        // SAFETY: Both payloads belong to live blocks that are at least this large and, being
        // separate allocations, cannot overlap.
        unsafe {
            ptr::copy_nonoverlapping(
                old.block.payload().as_ptr(),
                new.block.payload().as_ptr(),
                old.requested_size.min(new_size),
            );
        }

        let old = state
            .deregister(address)
            .expect("block was found in the table while holding the lock");
        self.release(old);

        let payload = state.register(new);

        debug!(
            old_address = address,
            new_address = payload.addr().get(),
            old_size = old.requested_size,
            new_size,
            file = call_site.file(),
            function = call_site.function(),
            line = call_site.line(),
            "reallocated tracked block"
        );

        Ok(payload)
    }

    /// Checks the tracked block whose payload starts at `ptr` without modifying anything.
    ///
    /// # Errors
    ///
    /// * [`Error::UntrackedPointer`] if `ptr` is not a live tracked block.
    /// * [`Error::CorruptHeader`], [`Error::CorruptFooter`] or [`Error::SizeMismatch`] if the
    ///   block is damaged.
    pub fn check(&self, ptr: *const u8) -> Result<()> {
        let state = self.lock();

        check_block(&state.table, ptr.addr()).map(|_| ())
    }

    /// Whether `ptr` is a live tracked block with intact guards.
    ///
    /// This is [`check()`][Self::check] without the details.
    #[must_use]
    pub fn validate(&self, ptr: *const u8) -> bool {
        self.check(ptr).is_ok()
    }

    /// Current allocation statistics.
    #[must_use]
    pub fn stats(&self) -> TrackerStats {
        self.lock().stats()
    }

    /// Takes a report of the current statistics and all live blocks.
    ///
    /// This is the report that is emitted at teardown, taken early, except that it carries no
    /// payload previews: payloads belong to the callers, who may be writing to them on other
    /// threads while the report is taken. Nothing is written anywhere.
    #[must_use]
    pub fn report(&self) -> LeakReport {
        self.collect_report(0)
    }

    fn collect_report(&self, output_limit: usize) -> LeakReport {
        let state = self.lock();

        LeakReport::collect(&state.table, state.stats(), output_limit)
    }

    /// Tears the tracker down now, emitting the leak report to the configured target and
    /// returning it.
    ///
    /// Dropping the tracker does the same; this form additionally hands the report to the
    /// caller. The report is emitted only once either way.
    pub fn finish(mut self) -> LeakReport {
        self.teardown()
    }

    fn teardown(&mut self) -> LeakReport {
        self.finished = true;

        // Teardown has exclusive access to the tracker, so no tracked operation is in flight.
        let report = self.collect_report(self.output_limit);

        if report.is_clean() {
            debug!("memory tracker torn down without unfreed blocks");
        } else {
            warn!(
                leaks = report.leaks().len(),
                bytes = report.leaked_bytes(),
                "memory tracker torn down with unfreed blocks"
            );
        }

        report.emit(&self.report_target);
        report
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().expect(ERR_POISONED_LOCK)
    }

    /// Reserves and initializes a block without registering it.
    fn reserve(
        &self,
        size: usize,
        call_site: &CallSite,
        owner: Option<OwnerRef>,
    ) -> Result<TableEntry> {
        let failure = Error::AllocationFailure {
            requested_size: size,
        };

        let Some(layout) = block::raw_layout(size) else {
            warn!(size, "requested size is too large for a tracked block");
            return Err(failure);
        };

        // SAFETY: The layout is never zero-sized because it always includes header and footer.
        let raw = unsafe { self.allocator.alloc_zeroed(layout) };

        let Some(raw) = NonNull::new(raw) else {
            warn!(size, "underlying allocator failed to provide a tracked block");
            return Err(failure);
        };

        // SAFETY: raw was just allocated with raw_layout(size).
        let block = unsafe { BlockPtr::init(raw, layout, size, call_site, owner) };

        Ok(TableEntry {
            block,
            layout,
            requested_size: size,
        })
    }

    fn release(&self, entry: TableEntry) {
        release_raw(&self.allocator, entry.block, entry.layout);
    }
}

fn release_raw<A: GlobalAlloc>(allocator: &A, block: BlockPtr, layout: Layout) {
    // SAFETY: Every block is allocated from this allocator with the layout recorded in its
    // table entry, and it is released only once because it has just left the table.
    unsafe {
        allocator.dealloc(block.raw().as_ptr(), layout);
    }
}

fn log_rejection(operation: &'static str, error: &Error) {
    if error.is_corruption() {
        error!(operation, %error, "tracked block is corrupt");
    } else {
        warn!(operation, %error, "rejected pointer");
    }
}

impl<A: GlobalAlloc> Drop for MemoryTracker<A> {
    fn drop(&mut self) {
        if !self.finished {
            self.teardown();
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "tests deliberately write into tracked blocks"
)]
mod tests {
    use std::fs;
    use std::slice;
    use std::sync::atomic::{AtomicBool, Ordering};

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::ErrorKind;

    assert_impl_all!(MemoryTracker: Send, Sync, fmt::Debug);

    /// Delegates to the system allocator unless told to fail.
    #[derive(Debug, Default)]
    struct FailingAllocator {
        fail: AtomicBool,
    }

    // SAFETY: Forwards to System or reports failure, both of which are valid behaviors.
    unsafe impl GlobalAlloc for FailingAllocator {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            if self.fail.load(Ordering::Relaxed) {
                ptr::null_mut()
            } else {
                unsafe { System.alloc(layout) }
            }
        }

        unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
            if self.fail.load(Ordering::Relaxed) {
                ptr::null_mut()
            } else {
                unsafe { System.alloc_zeroed(layout) }
            }
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            unsafe { System.dealloc(ptr, layout) }
        }
    }

    fn tracker() -> MemoryTracker {
        MemoryTracker::builder()
            .report_target(ReportTarget::Discard)
            .build()
    }

    fn here(line: u32) -> CallSite {
        CallSite::new("main", "entry", line)
    }

    #[test]
    fn allocate_registers_block() {
        let tracker = tracker();

        let block = tracker.allocate(256, &here(20), None).unwrap();

        assert!(tracker.validate(block.as_ptr()));
        let stats = tracker.stats();
        assert_eq!(stats.allocs(), 1);
        assert_eq!(stats.frees(), 0);
        assert_eq!(stats.current_allocated(), 256);
        assert_eq!(stats.total_allocated(), 256);
        assert_eq!(stats.live_blocks(), 1);
    }

    #[test]
    fn payload_is_zeroed_and_aligned() {
        let tracker = tracker();

        let block = tracker.allocate(32, &here(1), None).unwrap();
        let bytes = unsafe { slice::from_raw_parts(block.as_ptr(), 32) };

        assert!(bytes.iter().all(|&byte| byte == 0));
        assert_eq!(block.addr().get() % 16, 0);
    }

    #[test]
    fn allocate_then_free_restores_gauge() {
        let tracker = tracker();

        for size in [0, 1, 15, 16, 17, 256, 4096] {
            let before = tracker.stats();

            let block = tracker.allocate(size, &here(1), None).unwrap();
            tracker.free(block.as_ptr()).unwrap();

            let after = tracker.stats();
            assert_eq!(after.current_allocated(), before.current_allocated());
            assert_eq!(after.live_blocks(), before.live_blocks());
            assert_eq!(after.allocs(), before.allocs() + 1);
            assert_eq!(after.frees(), before.frees() + 1);
        }
    }

    #[test]
    fn zero_sized_blocks_are_distinct() {
        let tracker = tracker();

        let a = tracker.allocate(0, &here(1), None).unwrap();
        let b = tracker.allocate(0, &here(2), None).unwrap();

        assert_ne!(a, b);
        assert!(tracker.validate(a.as_ptr()));
        assert!(tracker.validate(b.as_ptr()));
        assert_eq!(tracker.stats().live_blocks(), 2);
        assert_eq!(tracker.stats().current_allocated(), 0);
    }

    #[test]
    fn free_null_is_noop() {
        let tracker = tracker();

        tracker.free(ptr::null_mut()).unwrap();

        assert_eq!(tracker.stats(), TrackerStats::default());
    }

    #[test]
    fn double_free_is_untracked_pointer() {
        let tracker = tracker();
        let block = tracker.allocate(8, &here(1), None).unwrap();

        tracker.free(block.as_ptr()).unwrap();
        let after_first = tracker.stats();

        let result = tracker.free(block.as_ptr());

        assert_eq!(
            result,
            Err(Error::UntrackedPointer {
                address: block.addr().get()
            })
        );
        assert_eq!(tracker.stats(), after_first);
    }

    #[test]
    fn foreign_pointer_is_untracked() {
        let tracker = tracker();
        let mut local = [0_u8; 8];

        let result = tracker.free(local.as_mut_ptr());

        assert_eq!(result.unwrap_err().kind(), ErrorKind::UntrackedPointer);
        assert!(!tracker.validate(local.as_ptr()));
    }

    #[test]
    fn interior_pointer_is_untracked() {
        let tracker = tracker();
        let block = tracker.allocate(64, &here(1), None).unwrap();

        let interior = block.as_ptr().wrapping_add(8);

        assert_eq!(
            tracker.check(interior).unwrap_err().kind(),
            ErrorKind::UntrackedPointer
        );
        tracker.free(block.as_ptr()).unwrap();
    }

    #[test]
    fn overrun_is_detected_and_block_stays_tracked() {
        let tracker = tracker();
        let block = tracker.allocate(256, &here(20), None).unwrap();

        unsafe { ptr::write_bytes(block.as_ptr(), b'x', 257) };

        let expected = Error::CorruptFooter {
            address: block.addr().get(),
        };
        assert!(!tracker.validate(block.as_ptr()));
        assert_eq!(tracker.check(block.as_ptr()), Err(expected));
        assert_eq!(tracker.free(block.as_ptr()), Err(expected));

        // Corrupt blocks are not released.
        let stats = tracker.stats();
        assert_eq!(stats.frees(), 0);
        assert_eq!(stats.live_blocks(), 1);
        assert_eq!(stats.current_allocated(), 256);
        assert_eq!(tracker.report().leaks().len(), 1);
    }

    #[test]
    fn underrun_is_detected() {
        let tracker = tracker();
        let block = tracker.allocate(32, &here(1), None).unwrap();

        unsafe { ptr::write_bytes(block.as_ptr().sub(2), 0, 2) };

        assert_eq!(
            tracker.free(block.as_ptr()).unwrap_err().kind(),
            ErrorKind::CorruptHeader
        );
        assert_eq!(tracker.stats().live_blocks(), 1);
    }

    #[test]
    fn oversized_request_is_allocation_failure() {
        let tracker = tracker();

        for size in [usize::MAX, usize::MAX / 2] {
            assert_eq!(
                tracker.allocate(size, &here(1), None),
                Err(Error::AllocationFailure {
                    requested_size: size
                })
            );
        }

        assert_eq!(tracker.stats(), TrackerStats::default());
    }

    #[test]
    fn allocator_failure_is_allocation_failure() {
        let tracker = MemoryTracker::builder()
            .allocator(FailingAllocator::default())
            .report_target(ReportTarget::Discard)
            .build();

        tracker.allocator().fail.store(true, Ordering::Relaxed);

        assert_eq!(
            tracker.allocate(16, &here(1), None),
            Err(Error::AllocationFailure { requested_size: 16 })
        );
        assert_eq!(tracker.stats(), TrackerStats::default());
    }

    #[test]
    fn reallocate_moves_contents() {
        let tracker = tracker();
        let old = tracker.allocate(64, &here(1), None).unwrap();

        for i in 0..64_u8 {
            unsafe { old.as_ptr().add(usize::from(i)).write(i) };
        }

        let new = tracker
            .reallocate(old.as_ptr(), 256, &here(2), None)
            .unwrap();

        assert_ne!(new, old);
        assert!(!tracker.validate(old.as_ptr()));
        assert!(tracker.validate(new.as_ptr()));

        let bytes = unsafe { slice::from_raw_parts(new.as_ptr(), 256) };
        for (i, &byte) in bytes.iter().enumerate() {
            let expected = if i < 64 { u8::try_from(i).unwrap() } else { 0 };
            assert_eq!(byte, expected);
        }

        let stats = tracker.stats();
        assert_eq!(stats.allocs(), 2);
        assert_eq!(stats.frees(), 1);
        assert_eq!(stats.current_allocated(), 256);
        assert_eq!(stats.total_allocated(), 320);
        assert_eq!(stats.live_blocks(), 1);

        let report = tracker.report();
        assert_eq!(report.leaks()[0].line(), 2);
    }

    #[test]
    fn reallocate_shrinks() {
        let tracker = tracker();
        let old = tracker.allocate(16, &here(1), None).unwrap();
        unsafe { ptr::write_bytes(old.as_ptr(), 7, 16) };

        let new = tracker.reallocate(old.as_ptr(), 4, &here(2), None).unwrap();

        let bytes = unsafe { slice::from_raw_parts(new.as_ptr(), 4) };
        assert_eq!(bytes, &[7, 7, 7, 7]);
        assert!(tracker.validate(new.as_ptr()));
        assert_eq!(tracker.stats().current_allocated(), 4);
    }

    #[test]
    fn reallocate_null_allocates() {
        let tracker = tracker();

        let block = tracker
            .reallocate(ptr::null_mut(), 10, &here(1), None)
            .unwrap();

        assert!(tracker.validate(block.as_ptr()));
        assert_eq!(tracker.stats().allocs(), 1);
        assert_eq!(tracker.stats().frees(), 0);
    }

    #[test]
    fn reallocate_untracked_fails() {
        let tracker = tracker();
        let mut local = [0_u8; 4];

        assert_eq!(
            tracker
                .reallocate(local.as_mut_ptr(), 8, &here(1), None)
                .unwrap_err()
                .kind(),
            ErrorKind::UntrackedPointer
        );
        assert_eq!(tracker.stats(), TrackerStats::default());
    }

    #[test]
    fn reallocate_corrupt_block_fails_without_copy() {
        let tracker = tracker();
        let block = tracker.allocate(8, &here(1), None).unwrap();
        unsafe { ptr::write_bytes(block.as_ptr(), 1, 9) };

        let before = tracker.stats();
        let result = tracker.reallocate(block.as_ptr(), 16, &here(2), None);

        assert_eq!(result.unwrap_err().kind(), ErrorKind::CorruptFooter);
        assert_eq!(tracker.stats(), before);
    }

    #[test]
    fn reallocate_failure_keeps_original() {
        let tracker = MemoryTracker::builder()
            .allocator(FailingAllocator::default())
            .report_target(ReportTarget::Discard)
            .build();

        let block = tracker.allocate(32, &here(1), None).unwrap();
        unsafe { ptr::write_bytes(block.as_ptr(), 0x5A, 32) };
        let before = tracker.stats();

        tracker.allocator().fail.store(true, Ordering::Relaxed);
        let result = tracker.reallocate(block.as_ptr(), 64, &here(2), None);
        tracker.allocator().fail.store(false, Ordering::Relaxed);

        assert_eq!(
            result,
            Err(Error::AllocationFailure { requested_size: 64 })
        );
        assert_eq!(tracker.stats(), before);
        assert!(tracker.validate(block.as_ptr()));

        let bytes = unsafe { slice::from_raw_parts(block.as_ptr(), 32) };
        assert!(bytes.iter().all(|&byte| byte == 0x5A));

        tracker.free(block.as_ptr()).unwrap();
    }

    #[test]
    fn report_lists_live_blocks_with_metadata() {
        let tracker = tracker();
        let owner_value = String::from("owner");
        let owner = OwnerRef::of(&owner_value);

        let freed = tracker.allocate(24, &here(22), None).unwrap();
        let leaked = tracker.allocate(128, &here(21), Some(owner)).unwrap();
        unsafe { ptr::copy_nonoverlapping(b"leaked data".as_ptr(), leaked.as_ptr(), 11) };
        tracker.free(freed.as_ptr()).unwrap();

        let report = tracker.finish();

        assert_eq!(report.leaks().len(), 1);
        let leak = &report.leaks()[0];
        assert_eq!(leak.address(), leaked.addr().get());
        assert_eq!(leak.requested_size(), 128);
        assert_eq!(leak.file(), "main");
        assert_eq!(leak.function(), "entry");
        assert_eq!(leak.line(), 21);
        assert_eq!(leak.owner(), Some(owner));
        assert_eq!(leak.preview(), "leaked data");
        assert_eq!(report.stats().current_allocated(), 128);
    }

    #[test]
    fn output_limit_caps_preview() {
        let tracker = MemoryTracker::builder()
            .report_target(ReportTarget::Discard)
            .output_limit(4)
            .build();

        let block = tracker.allocate(16, &here(1), None).unwrap();
        unsafe { ptr::write_bytes(block.as_ptr(), b'z', 16) };

        assert_eq!(tracker.finish().leaks()[0].preview(), "zzzz");
    }

    #[test]
    fn early_report_has_no_previews() {
        let tracker = tracker();

        let block = tracker.allocate(8, &here(1), None).unwrap();
        unsafe { ptr::write_bytes(block.as_ptr(), b'p', 8) };

        let early = tracker.report();
        assert_eq!(early.leaks().len(), 1);
        assert_eq!(early.leaks()[0].preview(), "");

        let last = tracker.finish();
        assert_eq!(last.leaks()[0].preview(), "pppppppp");
    }

    #[test]
    fn finish_returns_report() {
        let tracker = tracker();
        tracker.allocate(128, &here(21), None).unwrap();
        let freed = tracker.allocate(8, &here(22), None).unwrap();
        tracker.free(freed.as_ptr()).unwrap();

        let report = tracker.finish();

        assert_eq!(report.stats().allocs(), 2);
        assert_eq!(report.stats().frees(), 1);
        assert_eq!(report.leaks().len(), 1);
        assert_eq!(report.leaked_bytes(), 128);
    }

    #[test]
    fn drop_after_teardown_does_not_emit_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memdynamic.log");

        let mut tracker = MemoryTracker::builder().report_to_file(&path).build();
        tracker.allocate(8, &here(1), None).unwrap();

        let report = tracker.teardown();
        assert_eq!(fs::read_to_string(&path).unwrap(), report.to_string());

        fs::write(&path, "replaced after teardown").unwrap();
        drop(tracker);

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "replaced after teardown"
        );
    }

    #[test]
    fn drop_emits_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memdynamic.log");

        let tracker = MemoryTracker::builder().report_to_file(&path).build();
        tracker.allocate(8, &here(1), None).unwrap();
        drop(tracker);

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("Unfreed blocks (1):"), "{written}");
    }

    #[test]
    fn debug_output_hides_allocator() {
        let text = format!("{:?}", tracker());

        assert!(text.contains("<allocator>"), "{text}");
    }
}
