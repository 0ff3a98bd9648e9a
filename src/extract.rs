//! Chunked extraction over a row stream.
//!
//! [`Chunker`] pulls rows from an open [`RowStream`] and groups them into
//! bounded [`RowChunk`]s, computing the watermark each chunk is allowed to
//! advance to. The advance value must never overtake the destination: when a
//! chunk boundary falls inside a run of rows sharing one cursor value, part
//! of that group is still unread, so the chunk only advances to the greatest
//! cursor value it holds completely (or not at all). The chunker peeks one
//! row past each full chunk to detect this.

use replica_core::{CursorValue, Error, Result, Row, RowChunk};

use crate::source::RowStream;

pub struct Chunker {
    table: String,
    stream: Box<dyn RowStream>,
    chunk_size: usize,
    cursor_index: Option<usize>,
    next_seq: u64,
    /// First row of the next chunk, pulled while peeking past a boundary.
    pending: Option<Row>,
    /// Stream fault observed while peeking; surfaced on the next call so the
    /// already-assembled chunk is not lost.
    stashed: Option<Error>,
    rows_extracted: u64,
    done: bool,
}

impl Chunker {
    /// Wrap a freshly opened stream. `cursor_index` is the position of the
    /// cursor column within the rows, `None` for cursorless tables.
    pub fn new(
        table: impl Into<String>,
        stream: Box<dyn RowStream>,
        chunk_size: usize,
        cursor_index: Option<usize>,
    ) -> Self {
        Self {
            table: table.into(),
            stream,
            chunk_size: chunk_size.max(1),
            cursor_index,
            next_seq: 1,
            pending: None,
            stashed: None,
            rows_extracted: 0,
            done: false,
        }
    }

    /// Continue sequence numbering from a previous chunker after a stream
    /// restart.
    pub fn with_start_seq(mut self, seq: u64) -> Self {
        self.next_seq = seq;
        self
    }

    /// Rows pulled from the stream so far, including any peeked row.
    pub fn rows_extracted(&self) -> u64 {
        self.rows_extracted
    }

    /// Sequence number the next yielded chunk will carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Assemble the next chunk, `Ok(None)` once the stream is exhausted.
    ///
    /// On `Err` the in-progress rows are discarded; the caller reopens the
    /// stream from the last durable watermark and re-extracts them. Chunks
    /// already yielded are unaffected.
    pub async fn next_chunk(&mut self) -> Result<Option<RowChunk>> {
        if let Some(err) = self.stashed.take() {
            return Err(err);
        }
        if self.done && self.pending.is_none() {
            return Ok(None);
        }

        let mut rows = Vec::with_capacity(self.chunk_size);
        if let Some(row) = self.pending.take() {
            rows.push(row);
        }
        while rows.len() < self.chunk_size && !self.done {
            match self.stream.next_row().await {
                None => self.done = true,
                Some(Err(err)) => return Err(err),
                Some(Ok(row)) => {
                    self.rows_extracted += 1;
                    if self.cursor_index.is_some() {
                        self.cursor_of(&row)?;
                    }
                    rows.push(row);
                }
            }
        }
        if rows.is_empty() {
            return Ok(None);
        }

        let advance_to = match self.cursor_index {
            None => None,
            Some(_) => self.compute_advance(&rows).await?,
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        Ok(Some(RowChunk {
            seq,
            rows,
            advance_to,
        }))
    }

    /// Decide how far this chunk may move the watermark.
    async fn compute_advance(&mut self, rows: &[Row]) -> Result<Option<CursorValue>> {
        let last = match rows.last() {
            Some(row) => self.cursor_of(row)?,
            None => return Ok(None),
        };

        // A full chunk may have split a group of rows sharing `last`; peek
        // one row ahead to find out.
        if !self.done && rows.len() == self.chunk_size {
            match self.stream.next_row().await {
                None => self.done = true,
                Some(Err(err)) => {
                    // Deliver the chunk with a conservative advance and
                    // surface the fault on the next call.
                    self.stashed = Some(err);
                    return self.cursor_below(rows, &last);
                }
                Some(Ok(row)) => {
                    self.rows_extracted += 1;
                    let next_cursor = self.cursor_of(&row)?;
                    self.pending = Some(row);
                    if next_cursor == last {
                        return self.cursor_below(rows, &last);
                    }
                }
            }
        }

        Ok(Some(last))
    }

    /// Greatest cursor value in the chunk strictly below `last`, scanning
    /// backwards through the ascending rows. `None` when the whole chunk is
    /// one group.
    fn cursor_below(&self, rows: &[Row], last: &CursorValue) -> Result<Option<CursorValue>> {
        for row in rows.iter().rev() {
            let cursor = self.cursor_of(row)?;
            if &cursor != last {
                return Ok(Some(cursor));
            }
        }
        Ok(None)
    }

    fn cursor_of(&self, row: &Row) -> Result<CursorValue> {
        let index = self.cursor_index.ok_or_else(|| {
            Error::extraction(&self.table, "cursor position requested for cursorless stream")
        })?;
        row.value(index)
            .and_then(|value| value.as_cursor())
            .ok_or_else(|| {
                Error::extraction(
                    &self.table,
                    format!("row carries a null or non-orderable cursor value at column {index}"),
                )
            })
    }
}
