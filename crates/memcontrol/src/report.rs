//! End-of-window reporting: one header per benchmark, one report per window.
//!
//! Collective steps (reduction, barriers) are always executed in full, even
//! after a write error on this rank, so a failing writer can never leave the
//! other ranks waiting.

use std::error::Error;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

use crate::comm::Communicator;
use crate::controller::{with_original_provider, Interception};
use crate::output::{self, Format, HeaderRecord, ReportMode, Scope, WindowRecord};
use crate::stats::{MemStats, StatsRegister};

/// Where a report reads its counters from and what it clears afterwards.
pub trait StatsSource {
    fn snapshot(&self) -> MemStats;

    fn reset(&self);
}

impl StatsSource for Interception {
    fn snapshot(&self) -> MemStats {
        Interception::snapshot(self)
    }

    fn reset(&self) {
        Interception::reset(self)
    }
}

impl StatsSource for Mutex<StatsRegister> {
    fn snapshot(&self) -> MemStats {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    fn reset(&self) {
        self.lock().unwrap_or_else(PoisonError::into_inner).reset()
    }
}

/// Reporting settings shared by every rank of a benchmark.
pub struct WindowReporter<'a, C: Communicator + ?Sized> {
    comm: &'a C,
    benchmark: &'a str,
    mode: ReportMode,
    format: Format,
}

impl<'a, C: Communicator + ?Sized> WindowReporter<'a, C> {
    pub fn new(comm: &'a C, benchmark: &'a str) -> Self {
        Self {
            comm,
            benchmark,
            mode: ReportMode::default(),
            format: Format::default(),
        }
    }

    pub fn mode(mut self, mode: ReportMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Emits the column header on the root rank. Not collective.
    pub fn print_header(&self, out: &mut dyn Write) -> Result<(), Box<dyn Error>> {
        if !self.comm.is_root() {
            return Ok(());
        }

        with_original_provider(|| -> Result<(), Box<dyn Error>> {
            tracing::trace!(benchmark = self.benchmark, "printing memory header");
            match self.format {
                Format::Table => {
                    for line in output::header_lines(self.benchmark) {
                        writeln!(out, "{}", line)?;
                    }
                }
                Format::Json => {
                    let record = HeaderRecord {
                        benchmark: self.benchmark.to_string(),
                        columns: output::COLUMNS
                            .iter()
                            .map(|(title, _)| title.to_string())
                            .collect(),
                    };
                    writeln!(out, "{}", serde_json::to_string(&record)?)?;
                }
            }
            out.flush()?;
            Ok(())
        })
    }

    /// Reports the current window of `source` and resets it.
    ///
    /// Collective in aggregate and detailed modes: every rank must call it.
    pub fn report_window(
        &self,
        source: &dyn StatsSource,
        out: &mut dyn Write,
    ) -> Result<(), Box<dyn Error>> {
        with_original_provider(|| -> Result<(), Box<dyn Error>> {
            let local = source.snapshot();
            tracing::trace!(mode = %self.mode, rank = self.comm.rank(), "reporting memory window");

            let mut result: Result<(), Box<dyn Error>> = Ok(());
            match self.mode {
                ReportMode::Local => {
                    result = self.emit_local(&local, out);
                }
                ReportMode::Aggregate => {
                    result = self.emit_aggregate(&local, out).map(|_| ());
                }
                ReportMode::Detailed => {
                    match self.emit_aggregate(&local, out) {
                        Ok(Some(line)) => result = write_line(out, &output::rule_for(&line)),
                        Ok(None) => {}
                        Err(e) => result = Err(e),
                    }

                    for turn in 0..self.comm.size() {
                        self.comm.barrier();
                        if turn == self.comm.rank() && result.is_ok() {
                            result = self.emit_local(&local, out);
                        }
                    }
                    self.comm.barrier();
                }
            }

            source.reset();
            result
        })
    }

    fn emit_local(&self, local: &MemStats, out: &mut dyn Write) -> Result<(), Box<dyn Error>> {
        let procs = self.comm.size();
        let rank = self.comm.rank();
        match self.format {
            Format::Table => write_line(out, &output::table_line(procs, Some(rank), local)),
            Format::Json => self.write_record(out, Some(rank), Scope::Local, *local),
        }
    }

    /// Reduces to the root; the root prints the average. Returns the last
    /// table line the root printed.
    fn emit_aggregate(
        &self,
        local: &MemStats,
        out: &mut dyn Write,
    ) -> Result<Option<String>, Box<dyn Error>> {
        let Some(sum) = self.comm.reduce_sum(&local.to_array()) else {
            return Ok(None);
        };

        let procs = self.comm.size();
        let sum = MemStats::from_slice(&sum);
        let average = sum.averaged(procs);
        match self.format {
            Format::Table => {
                let line = output::table_line(procs, None, &average);
                write_line(out, &line)?;
                Ok(Some(line))
            }
            Format::Json => {
                self.write_record(out, None, Scope::Average, average)?;
                self.write_record(out, None, Scope::Sum, sum)?;
                Ok(None)
            }
        }
    }

    fn write_record(
        &self,
        out: &mut dyn Write,
        rank: Option<usize>,
        scope: Scope,
        stats: MemStats,
    ) -> Result<(), Box<dyn Error>> {
        let record = WindowRecord {
            benchmark: self.benchmark.to_string(),
            procs: self.comm.size(),
            rank,
            scope,
            stats,
        };
        write_line(out, &serde_json::to_string(&record)?)
    }
}

fn write_line(out: &mut dyn Write, line: &str) -> Result<(), Box<dyn Error>> {
    writeln!(out, "{}", line)?;
    out.flush()?;
    Ok(())
}
