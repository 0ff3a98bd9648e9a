//! Immutable run and per-table configuration values.
//!
//! The invocation surface (CLI flags, hint strings, the YAML manifest)
//! all reduce to these values before the orchestrator starts; nothing
//! mutates them afterwards.

use crate::value::CursorValue;
use serde::{Deserialize, Serialize};

/// How a chunk stream is applied to the destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStrategy {
    /// Atomically swap the destination table's full contents for the new
    /// stream; all-or-nothing per run.
    Replace,
    /// Insert every row as new, no dedup. Safe only for insert-only
    /// sources.
    Append,
    /// Upsert keyed by the declared primary key; idempotent under
    /// redelivery.
    Merge,
}

impl WriteStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            WriteStrategy::Replace => "replace",
            WriteStrategy::Append => "append",
            WriteStrategy::Merge => "merge",
        }
    }
}

impl std::fmt::Display for WriteStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WriteStrategy {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(WriteStrategy::Replace),
            "append" => Ok(WriteStrategy::Append),
            "merge" => Ok(WriteStrategy::Merge),
            other => Err(crate::error::Error::config(format!(
                "unknown write strategy '{other}' (expected replace, append, or merge)"
            ))),
        }
    }
}

/// Destination naming convention, applied once per run when destination
/// names are derived from the reflected source schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingMode {
    /// Keep source names untouched.
    Direct,
    /// Normalize to lower snake_case.
    #[default]
    Snake,
}

impl std::str::FromStr for NamingMode {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(NamingMode::Direct),
            "snake" => Ok(NamingMode::Snake),
            other => Err(crate::error::Error::config(format!(
                "unknown naming mode '{other}' (expected direct or snake)"
            ))),
        }
    }
}

/// Incremental-cursor selection for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorSpec {
    /// Source column holding the monotonically increasing cursor.
    pub column: String,
    /// Lower bound for the very first run, before any watermark exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<CursorValue>,
}

impl CursorSpec {
    pub fn new(column: impl Into<String>) -> Self {
        CursorSpec {
            column: column.into(),
            initial: None,
        }
    }

    pub fn with_initial(mut self, initial: CursorValue) -> Self {
        self.initial = Some(initial);
        self
    }
}

/// Immutable per-table run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRunConfig {
    /// Source table name.
    pub table: String,
    pub strategy: WriteStrategy,
    /// `None` extracts the full table every run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorSpec>,
    /// Overrides the reflected primary key when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<Vec<String>>,
}

impl TableRunConfig {
    pub fn new(table: impl Into<String>, strategy: WriteStrategy) -> Self {
        TableRunConfig {
            table: table.into(),
            strategy,
            cursor: None,
            primary_key: None,
        }
    }

    pub fn with_cursor(mut self, cursor: CursorSpec) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

/// Run-level tunables shared by every table in the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Upper row-count bound per chunk.
    pub chunk_size: usize,
    /// Worker-pool size: how many tables run their state machines
    /// concurrently.
    pub workers: usize,
    /// Consecutive chunk failures tolerated per table before the table
    /// is marked failed.
    pub max_chunk_failures: u32,
    pub naming: NamingMode,
    /// Walk the pipeline without destination writes or watermark
    /// advances.
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            chunk_size: 100_000,
            workers: 4,
            max_chunk_failures: 3,
            naming: NamingMode::default(),
            dry_run: false,
        }
    }
}
