//! Corruption checks over a tracked block.
//!
//! The checks run against the tracking table that the caller has already locked, so the free and
//! reallocate paths can validate a block without taking the tracker's lock a second time.

use tracing::trace;

use crate::block::{FOOTER_MAGIC, FOOTER_SIZE, HEADER_MAGIC, HEADER_SIZE};
use crate::table::{TableEntry, TrackingTable};
use crate::{Error, Result};

/// Checks the block whose payload starts at `address`, returning its table entry if it is
/// intact.
///
/// The checks run in a fixed order and stop at the first failure:
///
/// 1. the address is a live tracked block, else [`Error::UntrackedPointer`];
/// 2. the header magic is intact and the stored footer pointer matches the block size, else
///    [`Error::CorruptHeader`];
/// 3. the footer magic is intact, else [`Error::CorruptFooter`];
/// 4. the recorded total size matches the header and footer sizes plus the requested size, else
///    [`Error::SizeMismatch`].
pub(crate) fn check_block(table: &TrackingTable, address: usize) -> Result<&TableEntry> {
    let Some(entry) = table.get(address) else {
        trace!(address, "not a tracked block");
        return Err(Error::UntrackedPointer { address });
    };

    // SAFETY: The block is in the table, so it is still allocated.
    let header = unsafe { entry.block.header() };

    if header.magic != HEADER_MAGIC {
        trace!(address, magic = header.magic, "header magic mismatch");
        return Err(Error::CorruptHeader { address });
    }

    // The stored footer pointer is only followed once it agrees with the block's own size, so
    // that a damaged header can never send us reading outside the block.
    if header.footer != entry.block.expected_footer(entry.requested_size) {
        trace!(address, "footer pointer does not match the block size");
        return Err(Error::CorruptHeader { address });
    }

    trace!(address, "header intact");

    // SAFETY: The pointer equals the footer address of this live block, checked above.
    let footer_magic = unsafe { entry.block.footer_magic(header.footer) };

    if footer_magic != FOOTER_MAGIC {
        trace!(address, magic = footer_magic, "footer magic mismatch");
        return Err(Error::CorruptFooter { address });
    }

    trace!(address, "footer intact");

    let expected_real_size = HEADER_SIZE
        .checked_add(header.requested_size)
        .and_then(|size| size.checked_add(FOOTER_SIZE));

    if expected_real_size != Some(header.real_size) {
        trace!(
            address,
            real_size = header.real_size,
            requested_size = header.requested_size,
            "size bookkeeping mismatch"
        );
        return Err(Error::SizeMismatch { address });
    }

    trace!(address, "block intact");

    Ok(entry)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "tests deliberately corrupt block memory to exercise the checks"
)]
mod tests {
    use std::alloc::{GlobalAlloc, System};
    use std::mem::offset_of;
    use std::ptr::{self, NonNull};

    use super::*;
    use crate::CallSite;
    use crate::block::{BlockHeader, BlockPtr, raw_layout};

    struct Fixture {
        table: TrackingTable,
        entry: TableEntry,
    }

    impl Fixture {
        fn new(requested_size: usize) -> Self {
            let layout = raw_layout(requested_size).unwrap();
            let raw = NonNull::new(unsafe { System.alloc_zeroed(layout) }).unwrap();
            let call_site = CallSite::new("validate.rs", "fixture", 1);
            let block = unsafe { BlockPtr::init(raw, layout, requested_size, &call_site, None) };

            let entry = TableEntry {
                block,
                layout,
                requested_size,
            };

            let mut table = TrackingTable::default();
            table.insert(entry);

            Self { table, entry }
        }

        fn address(&self) -> usize {
            self.entry.address()
        }

        fn payload(&self) -> *mut u8 {
            self.entry.block.payload().as_ptr()
        }

        fn header_field(&self, offset: usize) -> *mut u8 {
            unsafe { self.entry.block.header_ptr().cast::<u8>().add(offset) }
        }

        fn check(&self) -> Result<()> {
            check_block(&self.table, self.address()).map(|_| ())
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            unsafe {
                System.dealloc(self.entry.block.raw().as_ptr(), self.entry.layout);
            }
        }
    }

    #[test]
    fn intact_block_passes() {
        let fixture = Fixture::new(256);

        let entry = check_block(&fixture.table, fixture.address()).unwrap();
        assert_eq!(*entry, fixture.entry);
    }

    #[test]
    fn full_payload_write_passes() {
        let fixture = Fixture::new(256);

        unsafe { ptr::write_bytes(fixture.payload(), 0xAB, 256) };

        assert_eq!(fixture.check(), Ok(()));
    }

    #[test]
    fn unknown_address_is_untracked() {
        let fixture = Fixture::new(8);
        let address = fixture.address() + 1;

        assert_eq!(
            check_block(&fixture.table, address).map(|_| ()),
            Err(Error::UntrackedPointer { address })
        );
    }

    #[test]
    fn overrun_by_one_corrupts_footer() {
        let fixture = Fixture::new(256);

        unsafe { ptr::write_bytes(fixture.payload(), 0xAB, 257) };

        assert_eq!(
            fixture.check(),
            Err(Error::CorruptFooter {
                address: fixture.address()
            })
        );
    }

    #[test]
    fn underrun_corrupts_header() {
        let fixture = Fixture::new(64);

        unsafe { ptr::write_bytes(fixture.payload().sub(1), 0, 1) };

        assert_eq!(
            fixture.check(),
            Err(Error::CorruptHeader {
                address: fixture.address()
            })
        );
    }

    #[test]
    fn zero_sized_block_overrun_corrupts_footer() {
        let fixture = Fixture::new(0);

        unsafe { fixture.payload().write(0) };

        assert_eq!(
            fixture.check(),
            Err(Error::CorruptFooter {
                address: fixture.address()
            })
        );
    }

    #[test]
    fn damaged_footer_pointer_corrupts_header() {
        let fixture = Fixture::new(32);

        unsafe {
            fixture
                .header_field(offset_of!(BlockHeader, footer))
                .cast::<usize>()
                .write_unaligned(0xDEAD_BEEF);
        }

        assert_eq!(
            fixture.check(),
            Err(Error::CorruptHeader {
                address: fixture.address()
            })
        );
    }

    #[test]
    fn damaged_requested_size_corrupts_header() {
        let fixture = Fixture::new(32);

        unsafe {
            fixture
                .header_field(offset_of!(BlockHeader, requested_size))
                .cast::<usize>()
                .write_unaligned(33);
        }

        // The stored footer pointer still matches the authoritative size from the table, so the
        // damage is only visible as a size mismatch.
        assert_eq!(
            fixture.check(),
            Err(Error::SizeMismatch {
                address: fixture.address()
            })
        );
    }

    #[test]
    fn damaged_real_size_is_size_mismatch() {
        let fixture = Fixture::new(32);

        unsafe {
            fixture
                .header_field(offset_of!(BlockHeader, real_size))
                .cast::<usize>()
                .write_unaligned(1);
        }

        assert_eq!(
            fixture.check(),
            Err(Error::SizeMismatch {
                address: fixture.address()
            })
        );
    }

    #[test]
    fn header_corruption_is_reported_before_footer_corruption() {
        let fixture = Fixture::new(16);

        unsafe {
            ptr::write_bytes(fixture.payload().sub(4), 0, 4);
            ptr::write_bytes(fixture.payload(), 0xFF, 17);
        }

        assert_eq!(
            fixture.check(),
            Err(Error::CorruptHeader {
                address: fixture.address()
            })
        );
    }
}
