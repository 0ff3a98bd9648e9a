//! Source-side traits: schema reflection and row extraction.
//!
//! A source backend implements [`SchemaReflector`] to describe its tables in
//! the engine's normalized form, and [`TableSource`] to serve ordered row
//! streams from them. The orchestrator owns chunking, watermark resolution,
//! and retries; backends only have to answer "what does this table look like"
//! and "give me its rows after this cursor position".

use async_trait::async_trait;

use replica_core::{CursorValue, Result, Row, TableSchema};

/// Reflects source tables into normalized schemas.
///
/// Reflection is read-only and idempotent: reflecting the same unchanged
/// table twice yields the same [`TableSchema`]. Every source column must map
/// onto one of the engine's column types; a column that does not fails
/// reflection with [`Error::TypeMapping`](replica_core::Error::TypeMapping)
/// before any rows move.
#[async_trait]
pub trait SchemaReflector: Send + Sync {
    /// Reflect a single table by its source-side name.
    ///
    /// Returns [`Error::SchemaNotFound`](replica_core::Error::SchemaNotFound)
    /// when the table does not exist or is not visible to the connection.
    async fn reflect(&self, table: &str) -> Result<TableSchema>;

    /// List the user tables visible in the source database, sorted by name.
    async fn list_tables(&self) -> Result<Vec<String>>;
}

/// A source backend that can stream rows out of its tables.
#[async_trait]
pub trait TableSource: SchemaReflector {
    /// Open a row stream over `schema.name`.
    ///
    /// With `cursor` set, the stream yields only rows whose cursor column is
    /// strictly greater than `since` (all rows when `since` is `None`),
    /// ordered by the cursor column ascending. `since` is only meaningful
    /// together with `cursor`. Without a cursor the stream yields every row
    /// in source order.
    ///
    /// Each call opens a fresh stream; the orchestrator reopens from the last
    /// durable watermark after a transient extraction fault.
    async fn open_stream(
        &self,
        schema: &TableSchema,
        cursor: Option<&str>,
        since: Option<&CursorValue>,
    ) -> Result<Box<dyn RowStream>>;
}

/// An open, ordered stream of rows from one table.
#[async_trait]
pub trait RowStream: Send {
    /// Next row, or `None` once the stream is exhausted.
    ///
    /// Rows carry values positionally aligned with the schema the stream was
    /// opened with. An `Err` leaves the stream in an unusable state; callers
    /// reopen rather than continue.
    async fn next_row(&mut self) -> Option<Result<Row>>;
}
