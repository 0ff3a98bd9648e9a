//! The closed error taxonomy for the replication engine.
//!
//! Every failure the engine surfaces is one of the variants below. The
//! taxonomy is deliberately closed: backends map their driver errors into
//! [`Error::Extraction`] or [`Error::Load`] at the edge, and the
//! orchestrator decides retry behavior from [`ErrorKind::is_retryable`]
//! instead of inspecting driver-specific detail.

use crate::value::CursorValue;
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all engine operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The source database has no table with the requested name.
    #[error("table '{table}' not found in source")]
    SchemaNotFound { table: String },

    /// A source column type has no mapping into the semantic type set.
    #[error("no type mapping for column '{column}' of table '{table}' (source type '{source_type}')")]
    TypeMapping {
        table: String,
        column: String,
        source_type: String,
    },

    /// A source read failed (connectivity or query fault).
    #[error("extraction failed for table '{table}': {message}")]
    Extraction { table: String, message: String },

    /// A destination write failed.
    #[error("load failed for table '{table}': {message}")]
    Load { table: String, message: String },

    /// A watermark advance observed a smaller value than the stored one.
    /// Surfaced, never silently ignored: it means a retried chunk
    /// re-reported a stale max or cursor data regressed at the source.
    #[error("non-monotonic watermark for table '{table}': observed {observed} is below stored {stored}")]
    NonMonotonicWatermark {
        table: String,
        stored: CursorValue,
        observed: CursorValue,
    },

    /// Merge strategy selected for a table with no declared primary key.
    #[error("merge strategy for table '{table}' requires a declared primary key")]
    MissingPrimaryKey { table: String },

    /// Invalid run or per-table configuration, caught before table work
    /// starts or during validation against the reflected schema.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The watermark durability layer itself failed (I/O, corrupt state).
    #[error("watermark store failure for table '{table}': {message}")]
    WatermarkStore { table: String, message: String },
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    pub fn extraction(table: impl Into<String>, message: impl ToString) -> Self {
        Error::Extraction {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn load(table: impl Into<String>, message: impl ToString) -> Self {
        Error::Load {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn watermark_store(table: impl Into<String>, message: impl ToString) -> Self {
        Error::WatermarkStore {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SchemaNotFound { .. } => ErrorKind::SchemaNotFound,
            Error::TypeMapping { .. } => ErrorKind::TypeMapping,
            Error::Extraction { .. } => ErrorKind::Extraction,
            Error::Load { .. } => ErrorKind::Load,
            Error::NonMonotonicWatermark { .. } => ErrorKind::NonMonotonicWatermark,
            Error::MissingPrimaryKey { .. } => ErrorKind::MissingPrimaryKey,
            Error::Config { .. } => ErrorKind::Config,
            Error::WatermarkStore { .. } => ErrorKind::WatermarkStore,
        }
    }

    /// Whether the orchestrator's bounded retry loop may retry after this
    /// error. Only transient source/destination faults qualify.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Discriminant-only view of [`Error`], used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SchemaNotFound,
    TypeMapping,
    Extraction,
    Load,
    NonMonotonicWatermark,
    MissingPrimaryKey,
    Config,
    WatermarkStore,
}

impl ErrorKind {
    /// Transient faults that a bounded retry may clear. Configuration,
    /// schema, and watermark-integrity faults never are.
    pub const fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Extraction | ErrorKind::Load)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::SchemaNotFound => "schema_not_found",
            ErrorKind::TypeMapping => "type_mapping",
            ErrorKind::Extraction => "extraction",
            ErrorKind::Load => "load",
            ErrorKind::NonMonotonicWatermark => "non_monotonic_watermark",
            ErrorKind::MissingPrimaryKey => "missing_primary_key",
            ErrorKind::Config => "config",
            ErrorKind::WatermarkStore => "watermark_store",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let err = Error::MissingPrimaryKey {
            table: "clan".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::MissingPrimaryKey);

        let err = Error::extraction("orders", "connection reset");
        assert_eq!(err.kind(), ErrorKind::Extraction);
    }

    #[test]
    fn only_transient_faults_are_retryable() {
        assert!(ErrorKind::Extraction.is_retryable());
        assert!(ErrorKind::Load.is_retryable());
        assert!(!ErrorKind::Config.is_retryable());
        assert!(!ErrorKind::NonMonotonicWatermark.is_retryable());
        assert!(!ErrorKind::MissingPrimaryKey.is_retryable());
        assert!(!ErrorKind::SchemaNotFound.is_retryable());
    }

    #[test]
    fn non_monotonic_display_names_both_values() {
        let err = Error::NonMonotonicWatermark {
            table: "orders".to_string(),
            stored: CursorValue::Int(10),
            observed: CursorValue::Int(4),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("orders"));
        assert!(rendered.contains("10"));
        assert!(rendered.contains('4'));
    }
}
