//! Heap allocation accounting for collective-communication benchmarks.
//!
//! Register [`MemControlAllocator`] as the global allocator, then bracket the
//! measured code with a [`MemControl`] guard (or [`begin_measurement`] and
//! [`end_measurement`]). While the measurement runs every allocation,
//! reallocation and deallocation is forwarded to the real allocator and
//! recorded: call counts, allocated and freed bytes, and operations on blocks
//! the ledger never saw. At the end of each iteration
//! [`MemControl::report_window`] prints the counters, either per rank or
//! averaged across all ranks of the run, and starts a new window.
//!
//! ```rust,ignore
//! #[global_allocator]
//! static GLOBAL: memcontrol::MemControlAllocator = memcontrol::MemControlAllocator::system();
//! ```
//!
//! ```rust,no_run
//! use memcontrol::{MemControlBuilder, ReportMode, SingleProcess};
//!
//! let mut memory = MemControlBuilder::new("bcast")
//!     .mode(ReportMode::Local)
//!     .build(SingleProcess);
//! memory.print_header().unwrap();
//! let data = vec![0u8; 4096];
//! drop(data);
//! memory.report_window().unwrap();
//! ```

mod allocator;
pub mod comm;
pub mod controller;
mod error;
mod guard;
pub mod handler;
pub mod ledger;
pub mod output;
pub mod report;
pub mod stats;

pub use allocator::MemControlAllocator;
pub use comm::{Communicator, LocalComm, LocalGroup, SingleProcess};
pub use controller::{with_original_provider, Interception, SuspendGuard};
pub use error::{InstallError, ParseError};
pub use guard::{MemControl, MemControlBuilder};
pub use output::{Format, ReportMode};
pub use report::{StatsSource, WindowReporter};
pub use stats::MemStats;

use std::error::Error;
use std::io::Write;

cfg_if::cfg_if! {
    if #[cfg(feature = "global-alloc")] {
        #[global_allocator]
        static GLOBAL: MemControlAllocator = MemControlAllocator::system();
    }
}

/// Installs the interception with an empty ledger and zeroed counters.
pub fn begin_measurement() -> Result<(), InstallError> {
    controller::global().install()
}

/// Restores the original provider. Returns `false` if no measurement was running.
pub fn end_measurement() -> bool {
    controller::global().restore()
}

/// Counters of the current window.
pub fn snapshot() -> MemStats {
    controller::global().snapshot()
}

/// Starts a new window without reporting the current one.
pub fn reset() {
    controller::global().reset()
}

/// Prints the column header for `benchmark` on rank 0 of `comm`.
pub fn print_header<C: Communicator + ?Sized>(
    comm: &C,
    benchmark: &str,
    format: Format,
    out: &mut dyn Write,
) -> Result<(), Box<dyn Error>> {
    WindowReporter::new(comm, benchmark)
        .format(format)
        .print_header(out)
}

/// Reports the process-wide counters of the current window and resets them.
/// The process count is `comm.size()`.
pub fn report_window<C: Communicator + ?Sized>(
    comm: &C,
    benchmark: &str,
    mode: ReportMode,
    format: Format,
    out: &mut dyn Write,
) -> Result<(), Box<dyn Error>> {
    WindowReporter::new(comm, benchmark)
        .mode(mode)
        .format(format)
        .report_window(controller::global(), out)
}
