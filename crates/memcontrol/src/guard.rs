use std::error::Error;
use std::io::Write;

use crate::comm::Communicator;
use crate::controller;
use crate::output::{Format, ReportMode};
use crate::report::WindowReporter;
use crate::stats::MemStats;

/// Builder for a [`MemControl`] measurement guard.
///
/// # Examples
///
/// ```rust,no_run
/// use memcontrol::{Format, MemControlBuilder, ReportMode, SingleProcess};
///
/// let mut memory = MemControlBuilder::new("allreduce")
///     .mode(ReportMode::Detailed)
///     .format(Format::Table)
///     .build(SingleProcess);
///
/// memory.print_header().unwrap();
/// for _ in 0..10 {
///     // one benchmark iteration
///     memory.report_window().unwrap();
/// }
/// // interception is restored when `memory` goes out of scope
/// ```
///
/// # Environment
///
/// * `MEMCONTROL_REPORT` - `local`, `aggregate` or `detailed`, overrides [`mode`](Self::mode)
/// * `MEMCONTROL_JSON` - `1` or `true` forces [`Format::Json`]
///
/// # Limitations
///
/// Only one guard can be alive per process. Building a second one panics.
#[must_use = "builder is discarded without creating a guard"]
pub struct MemControlBuilder {
    benchmark: String,
    mode: ReportMode,
    format: Format,
    writer: Option<Box<dyn Write + Send>>,
}

impl MemControlBuilder {
    pub fn new(benchmark: impl Into<String>) -> Self {
        Self {
            benchmark: benchmark.into(),
            mode: ReportMode::default(),
            format: Format::default(),
            writer: None,
        }
    }

    /// Default: [`ReportMode::Aggregate`]
    pub fn mode(mut self, mode: ReportMode) -> Self {
        self.mode = mode;
        self
    }

    /// Default: [`Format::Table`]
    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Destination of headers and reports. Default: stdout.
    pub fn writer(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Installs the interception and starts the first measurement window.
    ///
    /// # Panics
    ///
    /// Panics if the interception is already installed.
    pub fn build<C: Communicator>(self, comm: C) -> MemControl<C> {
        let mode = env_mode().unwrap_or(self.mode);
        let format = if env_json() { Format::Json } else { self.format };
        let writer = self
            .writer
            .unwrap_or_else(|| Box::new(std::io::stdout()));

        if controller::global().install().is_err() {
            panic!("More than one memcontrol guard cannot be alive at the same time.");
        }

        controller::with_original_provider(|| {
            tracing::debug!(
                benchmark = %self.benchmark,
                %mode,
                %format,
                rank = comm.rank(),
                procs = comm.size(),
                "memory measurement started"
            );
        });

        MemControl {
            comm,
            benchmark: self.benchmark,
            mode,
            format,
            writer,
        }
    }
}

fn env_mode() -> Option<ReportMode> {
    let value = std::env::var("MEMCONTROL_REPORT").ok()?;
    match value.parse() {
        Ok(mode) => Some(mode),
        Err(e) => {
            tracing::warn!("ignoring MEMCONTROL_REPORT: {}", e);
            None
        }
    }
}

fn env_json() -> bool {
    std::env::var("MEMCONTROL_JSON")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}

/// An active measurement session. Restores the original provider when dropped.
pub struct MemControl<C: Communicator> {
    comm: C,
    benchmark: String,
    mode: ReportMode,
    format: Format,
    writer: Box<dyn Write + Send>,
}

impl<C: Communicator> MemControl<C> {
    fn reporter(&mut self) -> (WindowReporter<'_, C>, &mut (dyn Write + Send + 'static)) {
        let reporter = WindowReporter::new(&self.comm, &self.benchmark)
            .mode(self.mode)
            .format(self.format);
        (reporter, &mut *self.writer)
    }

    /// Column header for this benchmark, printed by rank 0.
    pub fn print_header(&mut self) -> Result<(), Box<dyn Error>> {
        let (reporter, out) = self.reporter();
        reporter.print_header(out)
    }

    /// Reports the current window and starts a new one. Collective unless the
    /// mode is [`ReportMode::Local`].
    pub fn report_window(&mut self) -> Result<(), Box<dyn Error>> {
        let (reporter, out) = self.reporter();
        reporter.report_window(controller::global(), out)
    }

    /// Counters of the current window, without resetting them.
    pub fn snapshot(&self) -> MemStats {
        controller::global().snapshot()
    }

    pub fn mode(&self) -> ReportMode {
        self.mode
    }

    pub fn format(&self) -> Format {
        self.format
    }
}

impl<C: Communicator> Drop for MemControl<C> {
    fn drop(&mut self) {
        let _ = controller::with_original_provider(|| self.writer.flush());
        controller::global().restore();
    }
}
