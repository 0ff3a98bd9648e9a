//! Row chunks moved between extraction and load.

use crate::value::{CursorValue, Value};

/// One extracted row. Values are positional, aligned with the column
/// order of the [`crate::schema::TableSchema`] the row was extracted
/// under.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row { values }
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Canonical merge-key string built from the values at the given
    /// column indices (the primary-key columns, in key order).
    pub fn merge_key(&self, indices: &[usize]) -> String {
        let mut key = String::new();
        for &i in indices {
            if let Some(v) = self.values.get(i) {
                v.key_encode(&mut key);
            }
        }
        key
    }
}

/// A bounded batch of rows, the atomic unit of extraction and load.
///
/// Produced by the chunker, applied to a destination load session exactly
/// once, then discarded. `advance_to` is the watermark value that becomes
/// safe to persist once this chunk's destination write has committed:
/// the greatest cursor value for which every row is known to be contained
/// in this or an earlier chunk. It is `None` for cursorless extractions
/// and for chunks that end inside a group of rows sharing one cursor
/// value (advancing past a split group would let a restart skip its
/// remaining rows).
#[derive(Debug, Clone)]
pub struct RowChunk {
    /// Position of this chunk in its table's stream, starting at 1.
    pub seq: u64,
    pub rows: Vec<Row>,
    pub advance_to: Option<CursorValue>,
}

impl RowChunk {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
