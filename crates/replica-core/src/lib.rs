//! Core types for the warehouse-sync replication engine.
//!
//! This crate provides the foundational types shared by the engine and its
//! source/destination backends:
//!
//! - [`ColumnType`] / [`TableSchema`] - the closed semantic type set and
//!   normalized table schemas produced by reflection
//! - [`Value`] / [`Row`] / [`RowChunk`] - extracted data in transit
//! - [`CursorValue`] - the typed scalar a per-table watermark stores
//! - [`WriteStrategy`] / [`TableRunConfig`] / [`RunOptions`] - immutable
//!   run configuration
//! - [`RunReport`] / [`TableReport`] - the per-run result surface
//! - [`Error`] / [`ErrorKind`] - the closed error taxonomy
//!
//! # Architecture
//!
//! ```text
//! replica-core (this crate)
//!    │
//!    ├─── watermark        (persists CursorValue per table)
//!    │
//!    └─── warehouse-sync   (engine, backends, CLI)
//! ```
//!
//! Nothing in this crate performs I/O; backends convert their native rows
//! and column types into these representations at the edges.

pub mod chunk;
pub mod config;
pub mod error;
pub mod naming;
pub mod report;
pub mod schema;
pub mod value;

// Re-exports for convenience
pub use chunk::{Row, RowChunk};
pub use config::{CursorSpec, NamingMode, RunOptions, TableRunConfig, WriteStrategy};
pub use error::{Error, ErrorKind, Result};
pub use report::{humanize_duration, RunReport, TableFailure, TableOutcome, TableReport};
pub use schema::{ColumnSchema, ColumnType, TableSchema};
pub use value::{CursorValue, Value};
