use std::alloc::{GlobalAlloc, System};
use std::fmt;
use std::path::PathBuf;

use crate::MemoryTracker;

/// File name of the leak report written at teardown unless configured otherwise.
pub const DEFAULT_LOG_NAME: &str = "memdynamic.log";

/// Number of payload bytes rendered for each unfreed block in a leak report unless configured
/// otherwise.
pub const DEFAULT_OUTPUT_LIMIT: usize = 1024;

/// Where a [`MemoryTracker`] writes its leak report when it is torn down.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ReportTarget {
    /// Write the report to a file, replacing any existing content. If the file cannot be
    /// written, the report goes to stderr instead.
    File(PathBuf),

    /// Write the report to stderr.
    Stderr,

    /// Do not write the report anywhere. It can still be obtained via
    /// [`MemoryTracker::finish()`].
    Discard,
}

impl Default for ReportTarget {
    /// [`DEFAULT_LOG_NAME`] in the current working directory.
    fn default() -> Self {
        Self::File(PathBuf::from(DEFAULT_LOG_NAME))
    }
}

/// Builder for creating an instance of [`MemoryTracker`].
///
/// All settings are optional. By default the tracker reserves memory from the system allocator
/// and writes its leak report to [`DEFAULT_LOG_NAME`] in the current working directory.
///
/// # Examples
///
/// ```
/// use tracked_alloc::{MemoryTracker, ReportTarget};
///
/// let tracker = MemoryTracker::builder()
///     .report_target(ReportTarget::Stderr)
///     .output_limit(64)
///     .build();
/// ```
///
/// Reserving memory from a custom allocator:
///
/// ```
/// use std::alloc::System;
///
/// use tracked_alloc::{MemoryTracker, ReportTarget};
///
/// let tracker = MemoryTracker::builder()
///     .allocator(System)
///     .report_target(ReportTarget::Discard)
///     .build();
/// ```
#[must_use]
pub struct MemoryTrackerBuilder<A: GlobalAlloc = System> {
    allocator: A,
    report_target: ReportTarget,
    output_limit: usize,
}

impl<A: GlobalAlloc> fmt::Debug for MemoryTrackerBuilder<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTrackerBuilder")
            .field("allocator", &"<allocator>")
            .field("report_target", &self.report_target)
            .field("output_limit", &self.output_limit)
            .finish()
    }
}

impl MemoryTrackerBuilder<System> {
    pub(crate) fn new() -> Self {
        Self {
            allocator: System,
            report_target: ReportTarget::default(),
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

impl<A: GlobalAlloc> MemoryTrackerBuilder<A> {
    /// Sets the allocator that raw block memory is reserved from.
    pub fn allocator<B: GlobalAlloc>(self, allocator: B) -> MemoryTrackerBuilder<B> {
        MemoryTrackerBuilder {
            allocator,
            report_target: self.report_target,
            output_limit: self.output_limit,
        }
    }

    /// Sets where the leak report is written when the tracker is torn down.
    pub fn report_target(mut self, target: ReportTarget) -> Self {
        self.report_target = target;
        self
    }

    /// Writes the leak report to the file at `path` when the tracker is torn down.
    ///
    /// This is a shorthand for `.report_target(ReportTarget::File(path.into()))`.
    pub fn report_to_file(self, path: impl Into<PathBuf>) -> Self {
        self.report_target(ReportTarget::File(path.into()))
    }

    /// Sets the maximum number of payload bytes rendered for each unfreed block in leak reports.
    ///
    /// Zero disables the payload preview.
    pub fn output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    /// Builds the tracker with the specified configuration.
    #[must_use]
    pub fn build(self) -> MemoryTracker<A> {
        MemoryTracker::new_inner(self.allocator, self.report_target, self.output_limit)
    }
}
