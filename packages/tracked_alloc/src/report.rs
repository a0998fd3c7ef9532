//! Allocation statistics and leak reports.

use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::slice;

use tracing::{debug, warn};

use crate::table::TrackingTable;
use crate::{OwnerRef, ReportTarget};

/// Point-in-time allocation statistics of a [`MemoryTracker`][crate::MemoryTracker].
///
/// # Examples
///
/// ```
/// use tracked_alloc::{MemoryTracker, ReportTarget, call_site};
///
/// let tracker = MemoryTracker::builder()
///     .report_target(ReportTarget::Discard)
///     .build();
///
/// let block = tracker.allocate(64, &call_site!(), None).unwrap();
/// tracker.free(block.as_ptr()).unwrap();
///
/// let stats = tracker.stats();
/// assert_eq!(stats.allocs(), 1);
/// assert_eq!(stats.frees(), 1);
/// assert_eq!(stats.current_allocated(), 0);
/// assert_eq!(stats.total_allocated(), 64);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TrackerStats {
    allocs: u64,
    frees: u64,
    current_allocated: u64,
    total_allocated: u64,
    live_blocks: usize,
}

impl TrackerStats {
    pub(crate) fn new(
        allocs: u64,
        frees: u64,
        current_allocated: u64,
        total_allocated: u64,
        live_blocks: usize,
    ) -> Self {
        Self {
            allocs,
            frees,
            current_allocated,
            total_allocated,
            live_blocks,
        }
    }

    /// Number of blocks that have been allocated, including those created by reallocation.
    #[must_use]
    pub fn allocs(&self) -> u64 {
        self.allocs
    }

    /// Number of blocks that have been released, including those replaced by reallocation.
    #[must_use]
    pub fn frees(&self) -> u64 {
        self.frees
    }

    /// Sum of the requested sizes of all live blocks, in bytes.
    #[must_use]
    pub fn current_allocated(&self) -> u64 {
        self.current_allocated
    }

    /// Sum of the requested sizes of all blocks ever allocated, in bytes.
    #[must_use]
    pub fn total_allocated(&self) -> u64 {
        self.total_allocated
    }

    /// Number of live tracked blocks.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.live_blocks
    }
}

impl fmt::Display for TrackerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Memory statistics:")?;
        writeln!(f, "  allocations:         {}", self.allocs)?;
        writeln!(f, "  frees:               {}", self.frees)?;
        writeln!(
            f,
            "  currently allocated: {} bytes",
            self.current_allocated
        )?;
        writeln!(f, "  total allocated:     {} bytes", self.total_allocated)
    }
}

/// A tracked block that was still live when a [`LeakReport`] was taken.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeakedBlock {
    address: usize,
    requested_size: usize,
    file: String,
    function: String,
    line: u32,
    owner: Option<OwnerRef>,
    preview: String,
}

impl LeakedBlock {
    /// Payload address of the block.
    #[must_use]
    pub fn address(&self) -> usize {
        self.address
    }

    /// Size of the payload the caller asked for, in bytes.
    #[must_use]
    pub fn requested_size(&self) -> usize {
        self.requested_size
    }

    /// Source file that allocated the block.
    #[must_use]
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Function that allocated the block.
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Source line that allocated the block.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// The object the block was attributed to, if any.
    #[must_use]
    pub fn owner(&self) -> Option<OwnerRef> {
        self.owner
    }

    /// Printable rendering of the start of the payload.
    ///
    /// Only reports taken at teardown carry a preview; it is empty in reports taken with
    /// [`MemoryTracker::report()`][crate::MemoryTracker::report]. At most the configured output
    /// limit of bytes is rendered. Printable ASCII is kept as is,
    /// any other byte is shown as `.`, and trailing zero bytes are omitted.
    #[must_use]
    pub fn preview(&self) -> &str {
        &self.preview
    }
}

impl fmt::Display for LeakedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  {:#x}: {} bytes allocated in {} ({}), line {}",
            self.address, self.requested_size, self.file, self.function, self.line
        )?;

        if let Some(owner) = &self.owner {
            writeln!(f, "    owner: {owner}")?;
        }

        if !self.preview.is_empty() {
            writeln!(f, "    data:  {}", self.preview)?;
        }

        Ok(())
    }
}

/// Statistics and the list of blocks that have not been freed.
///
/// The tracker emits one of these when it is torn down. A snapshot without payload previews can
/// also be taken at any time with [`MemoryTracker::report()`][crate::MemoryTracker::report].
///
/// # Examples
///
/// ```
/// use tracked_alloc::{CallSite, MemoryTracker, ReportTarget};
///
/// let tracker = MemoryTracker::builder()
///     .report_target(ReportTarget::Discard)
///     .build();
///
/// tracker
///     .allocate(128, &CallSite::new("main", "entry", 21), None)
///     .unwrap();
///
/// let report = tracker.report();
/// assert_eq!(report.leaks().len(), 1);
///
/// let leak = &report.leaks()[0];
/// assert_eq!(leak.requested_size(), 128);
/// assert_eq!(leak.file(), "main");
/// assert_eq!(leak.function(), "entry");
/// assert_eq!(leak.line(), 21);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeakReport {
    stats: TrackerStats,
    leaks: Vec<LeakedBlock>,
}

impl LeakReport {
    /// Takes a report of everything in `table`, rendering at most `output_limit` payload bytes
    /// of each block.
    pub(crate) fn collect(table: &TrackingTable, stats: TrackerStats, output_limit: usize) -> Self {
        let leaks = table
            .sorted_entries()
            .into_iter()
            .map(|entry| {
                // SAFETY: Entries in the table are live blocks.
                let header = unsafe { entry.block.header() };

                let preview_len = entry.requested_size.min(output_limit);
                // SAFETY: The payload of a live block is `requested_size` initialized bytes
                // (blocks are zero-filled on allocation) and we read at most that many.
                let payload =
                    unsafe { slice::from_raw_parts(entry.block.payload().as_ptr(), preview_len) };

                LeakedBlock {
                    address: entry.address(),
                    requested_size: entry.requested_size,
                    file: header.file.as_str().to_owned(),
                    function: header.function.as_str().to_owned(),
                    line: header.line,
                    owner: OwnerRef::from_stored(header.owner),
                    preview: render_preview(payload),
                }
            })
            .collect();

        Self { stats, leaks }
    }

    /// The statistics at the time the report was taken.
    #[must_use]
    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    /// Blocks that were live at the time the report was taken, in ascending address order.
    #[must_use]
    pub fn leaks(&self) -> &[LeakedBlock] {
        &self.leaks
    }

    /// Whether there are no live blocks in the report.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.leaks.is_empty()
    }

    /// Sum of the requested sizes of all leaked blocks, in bytes.
    #[must_use]
    pub fn leaked_bytes(&self) -> u64 {
        self.leaks
            .iter()
            .map(|leak| u64::try_from(leak.requested_size).expect("usize always fits into u64"))
            .fold(0, u64::saturating_add)
    }

    /// Writes the report to `target`.
    ///
    /// If the target is a file that cannot be written, the report is written to stderr instead.
    pub(crate) fn emit(&self, target: &ReportTarget) {
        match target {
            ReportTarget::File(path) => {
                if let Err(e) = self.write_to_file(path) {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "cannot write leak report to file, writing it to stderr instead"
                    );
                    self.print_to_stderr();
                } else {
                    debug!(path = %path.display(), leaks = self.leaks.len(), "leak report written");
                }
            }
            ReportTarget::Stderr => self.print_to_stderr(),
            ReportTarget::Discard => {}
        }
    }

    fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let mut file = File::create(path)?;
        write!(file, "{self}")?;
        file.flush()
    }

    #[cfg_attr(test, mutants::skip)] // Too difficult to test stderr output reliably - manually tested.
    fn print_to_stderr(&self) {
        eprint!("{self}");
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stats)?;

        if self.leaks.is_empty() {
            writeln!(f, "No unfreed blocks.")?;
        } else {
            writeln!(f, "Unfreed blocks ({}):", self.leaks.len())?;

            for leak in &self.leaks {
                write!(f, "{leak}")?;
            }
        }

        Ok(())
    }
}

fn render_preview(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .rposition(|&byte| byte != 0)
        .map_or(0, |last| last.saturating_add(1));

    payload
        .iter()
        .take(end)
        .map(|&byte| {
            if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '.'
            }
        })
        .collect()
}
