#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Guarded memory allocation tracking for finding memory bugs during development.
//!
//! Every block allocated through a [`MemoryTracker`] is surrounded by a header and a footer that
//! carry sentinel values. The tracker checks them whenever a block is freed, reallocated or
//! validated and so detects:
//!
//! - writes past the end of a block (buffer overruns);
//! - writes before the start of a block (buffer underruns);
//! - double frees and frees of pointers that were never allocated through the tracker;
//! - blocks that are never freed, which are listed in a leak report when the tracker is torn down.
//!
//! Each block also records the [`CallSite`] that allocated it and, optionally, the object it is
//! attributed to ([`OwnerRef`]), so that leaks and corruption can be traced back to their source.
//!
//! The core types are:
//!
//! - [`Runtime`] - the process access point that constructs the tracker on first use and tears
//!   it down when dropped
//! - [`MemoryTracker`] - allocates, frees, reallocates and validates tracked blocks
//! - [`MemoryTrackerBuilder`] - configures the underlying allocator and the leak report
//! - [`LeakReport`] - the statistics and unfreed blocks emitted at teardown
//!
//! This package is a debugging aid, not a general-purpose allocator. It is not meant to be used
//! as the `#[global_allocator]`; only memory explicitly requested through its API is tracked.
//!
//! # Example
//!
//! ```
//! use tracked_alloc::{Error, MemoryTracker, ReportTarget, Runtime, call_site};
//!
//! let runtime = Runtime::with_builder(
//!     MemoryTracker::builder().report_target(ReportTarget::Discard),
//! );
//! let memory = runtime.memory();
//!
//! let buffer = memory.allocate(16, &call_site!(), None).unwrap();
//!
//! // SAFETY: Writes one byte past the end of the 16-byte payload to demonstrate detection.
//! unsafe { buffer.as_ptr().add(16).write(0xFF) };
//!
//! assert!(matches!(
//!     memory.free(buffer.as_ptr()),
//!     Err(Error::CorruptFooter { .. })
//! ));
//!
//! // The corrupt block was not released, so it shows up in the leak report.
//! let report = runtime.shutdown().unwrap();
//! assert_eq!(report.leaks().len(), 1);
//! ```
//!
//! # Logging
//!
//! The package emits [`tracing`](https://docs.rs/tracing) events: every operation at `debug`
//! level, the individual validation stages at `trace` level and detected corruption at `error`
//! level. No subscriber is installed by the package itself.
//!
//! # Leak report
//!
//! By default the leak report is written to [`DEFAULT_LOG_NAME`] in the current working
//! directory when the tracker is torn down. If that file cannot be written, the report goes to
//! stderr instead. Use [`MemoryTrackerBuilder::report_target()`] to choose another destination.

mod block;
mod bounded_text;
mod builder;
mod call_site;
mod constants;
mod error;
mod report;
mod runtime;
mod table;
mod tracker;
mod validate;

pub use bounded_text::*;
pub use builder::*;
pub use call_site::*;
pub use error::*;
pub use report::*;
pub use runtime::*;
pub use tracker::*;
