//! Destination-side traits: load sessions and write-strategy contracts.
//!
//! A destination backend hands out one [`TableLoad`] session per table run.
//! The session absorbs chunks and finalizes according to the write strategy:
//!
//! - `replace` stages everything and swaps atomically at [`TableLoad::commit`];
//!   readers see either the complete old contents or the complete new ones,
//!   and an abort leaves the old contents untouched.
//! - `append` writes each chunk through as-is, with no deduplication.
//! - `merge` upserts by primary key, so re-applying a chunk is idempotent.
//!
//! Every strategy applies a chunk atomically: a failed [`TableLoad::apply_chunk`]
//! must leave no partial rows behind, which is what makes retrying the same
//! chunk safe.

use async_trait::async_trait;

use replica_core::{Result, RowChunk, TableSchema, WriteStrategy};

/// A destination that tables can be loaded into.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Open a load session for one destination table.
    ///
    /// `schema` is the destination-side schema, naming already applied.
    /// Implementations create or prepare the table as the strategy requires;
    /// for `replace` any table creation must participate in the atomic swap.
    async fn begin_load(
        &self,
        schema: &TableSchema,
        strategy: WriteStrategy,
    ) -> Result<Box<dyn TableLoad>>;
}

/// An open load session for a single table.
#[async_trait]
pub trait TableLoad: Send {
    /// Apply one chunk atomically; returns the number of rows written.
    ///
    /// On `Err` no rows from this chunk are visible and the same chunk may be
    /// applied again.
    async fn apply_chunk(&mut self, chunk: &RowChunk) -> Result<u64>;

    /// Finalize the session. `replace` performs its atomic swap here; the
    /// other strategies have already made their chunks visible.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard the session. For `replace` the prior table contents remain
    /// exactly as they were.
    async fn abort(self: Box<Self>) -> Result<()>;
}
