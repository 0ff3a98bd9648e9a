//! The watermark store trait and its shared advance guard.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use replica_core::{CursorValue, Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The persisted watermark record for one table.
///
/// The cursor column rides along with the value: a run configured with a
/// different cursor column than the one the state was recorded under is
/// rejected, because the stored value would be meaningless against the
/// new column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredWatermark {
    /// Source table name (naming modes never touch this key).
    pub table: String,
    pub cursor_column: String,
    pub value: CursorValue,
    pub updated_at: DateTime<Utc>,
}

/// Durable per-table watermark state.
///
/// Implementations persist `advance` before returning; the pipeline's
/// single-writer-per-table discipline means no two `advance` calls for
/// the same table are ever in flight at once.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Current watermark for a table, `None` before the first advance.
    async fn get(&self, table: &str) -> Result<Option<StoredWatermark>>;

    /// Record a new observed maximum. Never regresses: an `observed_max`
    /// below the stored value fails with a non-monotonic watermark
    /// error; an equal value is an idempotent no-op re-report.
    async fn advance(&self, table: &str, cursor_column: &str, observed_max: &CursorValue)
        -> Result<()>;
}

/// Shared guard for `advance` implementations: validates the cursor
/// column and monotonicity against the current record, returning the
/// replacement record to persist (or `None` when the equal-value
/// re-report needs no write).
pub(crate) fn next_record(
    table: &str,
    current: Option<&StoredWatermark>,
    cursor_column: &str,
    observed_max: &CursorValue,
) -> Result<Option<StoredWatermark>> {
    if let Some(stored) = current {
        if stored.cursor_column != cursor_column {
            return Err(Error::config(format!(
                "table '{}' has watermark state for cursor column '{}', but the run is configured with '{}'",
                table, stored.cursor_column, cursor_column
            )));
        }
        match observed_max.compare(&stored.value)? {
            Ordering::Less => {
                return Err(Error::NonMonotonicWatermark {
                    table: table.to_string(),
                    stored: stored.value.clone(),
                    observed: observed_max.clone(),
                })
            }
            Ordering::Equal => return Ok(None),
            Ordering::Greater => {}
        }
    }
    Ok(Some(StoredWatermark {
        table: table.to_string(),
        cursor_column: cursor_column.to_string(),
        value: observed_max.clone(),
        updated_at: Utc::now(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::ErrorKind;

    fn stored(value: CursorValue) -> StoredWatermark {
        StoredWatermark {
            table: "orders".to_string(),
            cursor_column: "updated_at".to_string(),
            value,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn first_advance_creates_record() {
        let record = next_record("orders", None, "updated_at", &CursorValue::Int(5))
            .unwrap()
            .unwrap();
        assert_eq!(record.value, CursorValue::Int(5));
        assert_eq!(record.cursor_column, "updated_at");
    }

    #[test]
    fn larger_value_advances() {
        let current = stored(CursorValue::Int(5));
        let record = next_record("orders", Some(&current), "updated_at", &CursorValue::Int(9))
            .unwrap()
            .unwrap();
        assert_eq!(record.value, CursorValue::Int(9));
    }

    #[test]
    fn equal_value_is_a_no_op() {
        let current = stored(CursorValue::Int(5));
        let record =
            next_record("orders", Some(&current), "updated_at", &CursorValue::Int(5)).unwrap();
        assert!(record.is_none());
    }

    #[test]
    fn smaller_value_is_rejected() {
        let current = stored(CursorValue::Int(5));
        let err = next_record("orders", Some(&current), "updated_at", &CursorValue::Int(3))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NonMonotonicWatermark);
    }

    #[test]
    fn cursor_column_switch_is_rejected() {
        let current = stored(CursorValue::Int(5));
        let err =
            next_record("orders", Some(&current), "created_at", &CursorValue::Int(9)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn cursor_type_switch_is_rejected() {
        let current = stored(CursorValue::Int(5));
        let err = next_record(
            "orders",
            Some(&current),
            "updated_at",
            &CursorValue::Text("abc".to_string()),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
