use std::alloc::{GlobalAlloc, System};
use std::fmt;
use std::sync::{Mutex, OnceLock};

use tracing::debug;

use crate::constants::ERR_POISONED_LOCK;
use crate::{LeakReport, MemoryTracker, MemoryTrackerBuilder};

/// The process access point to the one [`MemoryTracker`] of an application.
///
/// The application creates a `Runtime` early (typically in `main()`) and passes it to whatever
/// needs to allocate tracked memory. The tracker itself is only constructed on first use of
/// [`memory()`][Self::memory], and it is torn down (emitting its leak report) when the runtime
/// is dropped or [`shutdown()`][Self::shutdown] is called.
///
/// Keep the runtime alive for as long as any tracked block may be in use, so that the leak
/// report is taken after all other code is done with the tracker.
///
/// # Examples
///
/// ```
/// use tracked_alloc::{MemoryTracker, ReportTarget, Runtime, call_site};
///
/// let runtime = Runtime::with_builder(
///     MemoryTracker::builder().report_target(ReportTarget::Discard),
/// );
///
/// let block = runtime
///     .memory()
///     .allocate(128, &call_site!(), None)
///     .unwrap();
///
/// let report = runtime.shutdown().unwrap();
/// assert_eq!(report.leaks().len(), 1);
/// assert_eq!(report.leaks()[0].address(), block.addr().get());
/// ```
pub struct Runtime<A: GlobalAlloc = System> {
    memory: OnceLock<MemoryTracker<A>>,

    // Consumed when the tracker is constructed.
    pending: Mutex<Option<MemoryTrackerBuilder<A>>>,
}

impl Runtime<System> {
    /// Creates a runtime whose tracker uses the default configuration.
    ///
    /// See [`MemoryTracker::system()`] for what that entails.
    #[must_use]
    pub fn new() -> Self {
        Self::with_builder(MemoryTracker::builder())
    }
}

impl Default for Runtime<System> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: GlobalAlloc> Runtime<A> {
    /// Creates a runtime whose tracker will be built from `builder` on first use.
    #[must_use]
    pub fn with_builder(builder: MemoryTrackerBuilder<A>) -> Self {
        Self {
            memory: OnceLock::new(),
            pending: Mutex::new(Some(builder)),
        }
    }

    /// The memory tracker of the application, constructed on first call.
    pub fn memory(&self) -> &MemoryTracker<A> {
        self.memory.get_or_init(|| {
            let builder = self
                .pending
                .lock()
                .expect(ERR_POISONED_LOCK)
                .take()
                .expect("the builder is only taken once, when the tracker is constructed");

            debug!("constructing memory tracker on first use");

            builder.build()
        })
    }

    /// Whether the memory tracker has been constructed yet.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.memory.get().is_some()
    }

    /// Tears down the memory tracker, returning its leak report.
    ///
    /// The report is also emitted to the tracker's configured target. Returns `None` if the
    /// tracker was never constructed, in which case there is nothing to report.
    pub fn shutdown(self) -> Option<LeakReport> {
        self.memory.into_inner().map(MemoryTracker::finish)
    }
}

impl<A: GlobalAlloc> fmt::Debug for Runtime<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("memory", &self.memory)
            .field("pending", &self.pending)
            .finish()
    }
}
