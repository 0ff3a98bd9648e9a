//! Run reports.
//!
//! A [`RunReport`] is assembled by the orchestrator while the run is in
//! flight and returned by value once the run completes; nothing mutates
//! it afterwards. Partial success stays explicit: every selected table
//! gets its own entry with its own outcome, never a collapsed boolean.

use crate::error::{Error, ErrorKind};
use crate::value::CursorValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal state of one table's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableOutcome {
    /// The table completed its chunk stream and committed.
    Done,
    /// The table gave up: a non-retryable fault, or the consecutive
    /// chunk-failure cap was reached.
    Failed,
    /// A run-level cancellation stopped the table before completion.
    Cancelled,
}

/// A recorded failure, reduced to its taxonomy kind and rendered message
/// so reports stay serializable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for TableFailure {
    fn from(err: &Error) -> Self {
        TableFailure {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Per-table section of a run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableReport {
    /// Source table name.
    pub table: String,
    pub outcome: TableOutcome,
    pub rows_extracted: u64,
    pub rows_loaded: u64,
    pub chunks_loaded: u64,
    /// Watermark after the run, when the table uses a cursor.
    pub final_watermark: Option<CursorValue>,
    /// Every failure the table hit, retried transient ones included; the
    /// last entry is the terminal error for a failed table.
    pub errors: Vec<TableFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TableReport {
    /// The terminal error for a failed table.
    pub fn last_error(&self) -> Option<&TableFailure> {
        self.errors.last()
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// The aggregated result of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Whether the run-level cancellation signal fired.
    pub cancelled: bool,
    pub tables: Vec<TableReport>,
}

impl RunReport {
    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn total_rows_extracted(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_extracted).sum()
    }

    pub fn total_rows_loaded(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_loaded).sum()
    }

    pub fn failed_tables(&self) -> impl Iterator<Item = &TableReport> {
        self.tables
            .iter()
            .filter(|t| t.outcome == TableOutcome::Failed)
    }

    pub fn all_succeeded(&self) -> bool {
        self.tables.iter().all(|t| t.outcome == TableOutcome::Done)
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Render a duration at the precision a run summary wants: milliseconds
/// under a second, fractional seconds under a minute, then minutes and
/// hours.
pub fn humanize_duration(duration: chrono::Duration) -> String {
    let ms = duration.num_milliseconds().max(0);
    if ms < 1_000 {
        return format!("{ms}ms");
    }
    if ms < 60_000 {
        return format!("{:.1}s", ms as f64 / 1000.0);
    }
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    if minutes < 60 {
        return format!("{minutes}m{seconds:02}s");
    }
    format!("{}h{:02}m", minutes / 60, minutes % 60)
}
