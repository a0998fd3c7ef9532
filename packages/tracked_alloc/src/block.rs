//! Layout of a tracked block and navigation between its parts.
//!
//! ```text
//! +-------------+---------------------------+-------------+
//! | BlockHeader | payload (requested_size)  | BlockFooter |
//! +-------------+---------------------------+-------------+
//! ^ raw         ^ returned to the caller    ^ header.footer
//! ```
//!
//! The header is 16-byte aligned and its size is a multiple of 16, so the payload has the same
//! alignment guarantee as a typical `malloc()`. The footer directly follows the last payload byte
//! and therefore has no alignment; it is declared `packed` so that it can be accessed in place.
//!
//! The header magic is the last header field, adjacent to the payload, so that a write that
//! underruns the payload corrupts the magic before anything else. The footer magic is the first
//! thing an overrun hits.

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::{BoundedText, CallSite, MAX_FILE_LEN, MAX_FUNCTION_LEN, OwnerRef};

pub(crate) const HEADER_MAGIC: u32 = 0xB10C_4EAD;
pub(crate) const FOOTER_MAGIC: u32 = 0xF007_E12D;

pub(crate) const BLOCK_ALIGN: usize = 16;
pub(crate) const HEADER_SIZE: usize = size_of::<BlockHeader>();
pub(crate) const FOOTER_SIZE: usize = size_of::<BlockFooter>();

/// Metadata stored in front of every tracked payload.
///
/// Every field is valid for any bit pattern, so a header that caller code has overwritten can
/// still be read and inspected.
#[derive(Clone, Copy, Debug)]
#[repr(C, align(16))]
pub(crate) struct BlockHeader {
    pub(crate) footer: *mut BlockFooter,
    pub(crate) owner: OwnerRef,
    pub(crate) file: BoundedText<MAX_FILE_LEN>,
    pub(crate) function: BoundedText<MAX_FUNCTION_LEN>,
    pub(crate) requested_size: usize,
    pub(crate) real_size: usize,
    pub(crate) line: u32,
    pub(crate) magic: u32,
}

/// Guard that directly follows the payload.
#[derive(Clone, Copy, Debug)]
#[repr(C, packed)]
pub(crate) struct BlockFooter {
    pub(crate) magic: u32,
}

const _: () = assert!(HEADER_SIZE % BLOCK_ALIGN == 0);
const _: () = assert!(align_of::<BlockFooter>() == 1);

/// Total number of raw bytes needed for a block with a payload of `requested_size` bytes.
pub(crate) fn real_size(requested_size: usize) -> Option<usize> {
    HEADER_SIZE
        .checked_add(requested_size)?
        .checked_add(FOOTER_SIZE)
}

/// The layout of the raw reservation for a payload of `requested_size` bytes.
///
/// Returns `None` if the block would be too large to ever be allocated.
pub(crate) fn raw_layout(requested_size: usize) -> Option<Layout> {
    Layout::from_size_align(real_size(requested_size)?, BLOCK_ALIGN).ok()
}

/// Points to the start (the header) of a tracked block.
///
/// The pointer does not by itself guarantee that the block is still alive; that is decided by
/// the tracking table, which is the only place these are stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BlockPtr {
    header: NonNull<BlockHeader>,
}

// SAFETY: A BlockPtr is just an address of memory owned by the tracker. All access to the
// memory behind it happens while holding the tracker's lock.
unsafe impl Send for BlockPtr {}

// SAFETY: See Send above; shared references to a BlockPtr only allow copying the address.
unsafe impl Sync for BlockPtr {}

impl BlockPtr {
    /// Writes the header and footer of a fresh block into `raw` and returns the block.
    ///
    /// # Safety
    ///
    /// `raw` must point to a live allocation made with `layout`, which must be
    /// `raw_layout(requested_size)`.
    pub(crate) unsafe fn init(
        raw: NonNull<u8>,
        layout: Layout,
        requested_size: usize,
        call_site: &CallSite,
        owner: Option<OwnerRef>,
    ) -> Self {
        let block = Self {
            header: raw.cast::<BlockHeader>(),
        };

        let header = BlockHeader {
            footer: block.expected_footer(requested_size),
            owner: owner.unwrap_or(OwnerRef::ABSENT),
            file: call_site.file_text(),
            function: call_site.function_text(),
            requested_size,
            real_size: layout.size(),
            line: call_site.line(),
            magic: HEADER_MAGIC,
        };

        // SAFETY: The allocation starts with HEADER_SIZE bytes that are BLOCK_ALIGN aligned,
        // which is exactly the size and alignment of BlockHeader.
        unsafe {
            block.header.write(header);
        }

        // SAFETY: The footer address is HEADER_SIZE + requested_size bytes into an allocation of
        // HEADER_SIZE + requested_size + FOOTER_SIZE bytes, and BlockFooter has no alignment.
        unsafe {
            block
                .expected_footer(requested_size)
                .write(BlockFooter {
                    magic: FOOTER_MAGIC,
                });
        }

        block
    }

    /// The block whose payload starts at `payload`.
    ///
    /// # Safety
    ///
    /// `payload` must have been returned by [`payload()`][Self::payload] of a block that is
    /// still allocated.
    #[cfg(test)]
    pub(crate) unsafe fn from_payload(payload: NonNull<u8>) -> Self {
        // SAFETY: Forwarding the requirement that the payload belongs to a live block, which
        // means the header lies HEADER_SIZE bytes before it in the same allocation.
        let header = unsafe { payload.sub(HEADER_SIZE) };

        Self {
            header: header.cast::<BlockHeader>(),
        }
    }

    /// Start of the raw allocation.
    pub(crate) fn raw(self) -> NonNull<u8> {
        self.header.cast::<u8>()
    }

    /// Start of the payload handed out to the caller.
    pub(crate) fn payload(self) -> NonNull<u8> {
        // SAFETY: Every block allocation is at least HEADER_SIZE + FOOTER_SIZE bytes, so the
        // payload start is always inside the same allocation.
        unsafe { self.raw().add(HEADER_SIZE) }
    }

    /// Where the footer must be for a block with `requested_size` payload bytes.
    ///
    /// This is computed independently of the stored footer pointer, so that the two can be
    /// compared to detect a corrupted header.
    pub(crate) fn expected_footer(self, requested_size: usize) -> *mut BlockFooter {
        self.raw()
            .as_ptr()
            .wrapping_add(HEADER_SIZE)
            .wrapping_add(requested_size)
            .cast::<BlockFooter>()
    }

    /// A copy of the header as it currently is in memory, corrupted or not.
    ///
    /// # Safety
    ///
    /// The block must still be allocated.
    pub(crate) unsafe fn header(self) -> BlockHeader {
        // SAFETY: Forwarding the liveness requirement. The header is always initialized by
        // init() and every bit pattern is a valid BlockHeader.
        unsafe { self.header.read() }
    }

    /// The footer magic found at `footer`.
    ///
    /// # Safety
    ///
    /// `footer` must be the footer address of this block, which must still be allocated.
    pub(crate) unsafe fn footer_magic(self, footer: *mut BlockFooter) -> u32 {
        // SAFETY: Forwarding the requirement that the footer lies within this live block.
        // BlockFooter has no alignment requirement.
        let footer = unsafe { footer.read() };
        footer.magic
    }

    /// Mutable access to the header in memory, for tests that simulate caller bugs.
    #[cfg(test)]
    pub(crate) fn header_ptr(self) -> *mut BlockHeader {
        self.header.as_ptr()
    }
}
