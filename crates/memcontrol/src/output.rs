use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;
use crate::stats::MemStats;

/// How a measurement window is reported across the processes of a run.
///
/// # Variants
///
/// * `Local` - every process prints its own counters, no coordination
/// * `Aggregate` - counters are summed on rank 0, which prints the per-process average
/// * `Detailed` - the aggregate line, a rule, then every rank's own line in rank order
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum ReportMode {
    Local,
    #[default]
    Aggregate,
    Detailed,
}

impl ReportMode {
    const NAMES: &'static [&'static str] = &["local", "aggregate", "detailed"];
}

impl fmt::Display for ReportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportMode::Local => write!(f, "local"),
            ReportMode::Aggregate => write!(f, "aggregate"),
            ReportMode::Detailed => write!(f, "detailed"),
        }
    }
}

impl FromStr for ReportMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ReportMode::Local),
            "aggregate" => Ok(ReportMode::Aggregate),
            "detailed" => Ok(ReportMode::Detailed),
            _ => Err(ParseError::new("report mode", s, Self::NAMES)),
        }
    }
}

/// Output format for headers and report lines.
///
/// * `Table` - fixed-width text columns (default)
/// * `Json` - one compact JSON object per line
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Table,
    Json,
}

impl Format {
    const NAMES: &'static [&'static str] = &["table", "json"];
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Table => write!(f, "table"),
            Format::Json => write!(f, "json"),
        }
    }
}

impl FromStr for Format {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(Format::Table),
            "json" => Ok(Format::Json),
            _ => Err(ParseError::new("format", s, Self::NAMES)),
        }
    }
}

/// Report columns: title and what the column holds.
pub const COLUMNS: [(&str, &str); 9] = [
    ("Procs", "number of processes in the run"),
    ("Rank", "reporting process, \"avg\" for the average over all processes"),
    ("Malloc called", "allocations, zero-initialized ones included"),
    ("Realloc called", "reallocations of tracked blocks"),
    ("Free called", "deallocations of tracked blocks"),
    ("Unknown free", "deallocations of blocks missing from the ledger"),
    ("Unknown realloc", "reallocations of blocks missing from the ledger"),
    ("Allocated", "bytes allocated, growth by reallocation included"),
    ("Freed", "bytes freed, shrinkage by reallocation included"),
];

const MIN_WIDTH: usize = 8;
const SEPARATOR: &str = "  ";

fn column_width(title: &str) -> usize {
    title.len().max(MIN_WIDTH)
}

fn render_row(cells: &[String]) -> String {
    COLUMNS
        .iter()
        .zip(cells)
        .map(|((title, _), cell)| format!("{:>width$}", cell, width = column_width(title)))
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

/// Who a report line speaks for.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// One process's own counters.
    Local,
    /// Sum over all processes divided by the process count.
    Average,
    /// Exact sum over all processes.
    Sum,
}

/// One report line in JSON form.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WindowRecord {
    pub benchmark: String,
    pub procs: usize,
    /// `None` for cross-process lines.
    pub rank: Option<usize>,
    pub scope: Scope,
    pub stats: MemStats,
}

/// Column titles in JSON form.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    pub benchmark: String,
    pub columns: Vec<String>,
}

/// Text lines of the column header for `benchmark`.
pub fn header_lines(benchmark: &str) -> Vec<String> {
    let mut lines = vec![format!("# Memory usage: {}", benchmark)];
    let name_width = COLUMNS.iter().map(|(title, _)| title.len()).max().unwrap_or(0);
    for (title, meaning) in COLUMNS {
        lines.push(format!("#   {:<name_width$}  {}", title, meaning));
    }
    let titles: Vec<String> = COLUMNS.iter().map(|(title, _)| title.to_string()).collect();
    lines.push(render_row(&titles));
    lines
}

/// One fixed-width report line. `rank` is `None` for the cross-process average.
pub fn table_line(procs: usize, rank: Option<usize>, stats: &MemStats) -> String {
    let rank = rank.map_or_else(|| "avg".to_string(), |r| r.to_string());
    let cells = [
        procs.to_string(),
        rank,
        stats.malloc_calls.to_string(),
        stats.realloc_calls.to_string(),
        stats.free_calls.to_string(),
        stats.unknown_free_calls.to_string(),
        stats.unknown_realloc_calls.to_string(),
        stats.bytes_allocated.to_string(),
        stats.bytes_freed.to_string(),
    ];
    render_row(&cells)
}

/// A rule as wide as `line`.
pub fn rule_for(line: &str) -> String {
    "-".repeat(line.chars().count())
}
