use thiserror::Error;

/// Problems detected by tracked memory operations.
///
/// A successful check (`Ok(())`) means the block is tracked and both of its guards are intact.
/// None of these errors abort the process or attempt to repair anything; it is up to the caller
/// to decide how to react.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The address is not a live tracked block. This is what a double free, a pointer that was
    /// never allocated through the tracker or a pointer into the middle of a block looks like.
    #[error("{address:#x} is not the address of a live tracked block")]
    UntrackedPointer {
        /// The address the caller passed in.
        address: usize,
    },

    /// The block header was overwritten, typically by writing before the start of the payload.
    #[error("header of tracked block {address:#x} is corrupt (write before the start of the block?)")]
    CorruptHeader {
        /// Payload address of the affected block.
        address: usize,
    },

    /// The block footer was overwritten by writing past the end of the payload.
    #[error("footer of tracked block {address:#x} is corrupt (write past the end of the block?)")]
    CorruptFooter {
        /// Payload address of the affected block.
        address: usize,
    },

    /// The size recorded in the header does not match the block layout. This indicates a defect
    /// in the tracker itself rather than in caller code.
    #[error("size bookkeeping of tracked block {address:#x} is inconsistent")]
    SizeMismatch {
        /// Payload address of the affected block.
        address: usize,
    },

    /// The underlying allocator could not provide memory for the block, or the requested size
    /// is too large to be represented together with the guards.
    #[error("failed to allocate a tracked block of {requested_size} bytes")]
    AllocationFailure {
        /// The payload size the caller asked for.
        requested_size: usize,
    },
}

/// The category of an [`Error`], without the details.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// See [`Error::UntrackedPointer`].
    UntrackedPointer,

    /// See [`Error::CorruptHeader`].
    CorruptHeader,

    /// See [`Error::CorruptFooter`].
    CorruptFooter,

    /// See [`Error::SizeMismatch`].
    SizeMismatch,

    /// See [`Error::AllocationFailure`].
    AllocationFailure,
}

impl Error {
    /// The category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UntrackedPointer { .. } => ErrorKind::UntrackedPointer,
            Self::CorruptHeader { .. } => ErrorKind::CorruptHeader,
            Self::CorruptFooter { .. } => ErrorKind::CorruptFooter,
            Self::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            Self::AllocationFailure { .. } => ErrorKind::AllocationFailure,
        }
    }

    /// Whether the error means that a tracked block has been damaged.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::CorruptHeader | ErrorKind::CorruptFooter | ErrorKind::SizeMismatch
        )
    }
}

/// A specialized `Result` type for tracked memory operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug, Copy);
    assert_impl_all!(ErrorKind: Send, Sync, Debug, Copy);

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            Error::UntrackedPointer { address: 1 }.kind(),
            ErrorKind::UntrackedPointer
        );
        assert_eq!(
            Error::CorruptHeader { address: 1 }.kind(),
            ErrorKind::CorruptHeader
        );
        assert_eq!(
            Error::CorruptFooter { address: 1 }.kind(),
            ErrorKind::CorruptFooter
        );
        assert_eq!(
            Error::SizeMismatch { address: 1 }.kind(),
            ErrorKind::SizeMismatch
        );
        assert_eq!(
            Error::AllocationFailure { requested_size: 1 }.kind(),
            ErrorKind::AllocationFailure
        );
    }

    #[test]
    fn only_damage_is_corruption() {
        assert!(Error::CorruptHeader { address: 1 }.is_corruption());
        assert!(Error::CorruptFooter { address: 1 }.is_corruption());
        assert!(Error::SizeMismatch { address: 1 }.is_corruption());
        assert!(!Error::UntrackedPointer { address: 1 }.is_corruption());
        assert!(!Error::AllocationFailure { requested_size: 1 }.is_corruption());
    }

    #[test]
    fn messages_include_address() {
        let message = Error::CorruptFooter { address: 0x1000 }.to_string();

        assert!(message.contains("0x1000"), "{message}");
        assert!(message.contains("footer"), "{message}");
    }
}
