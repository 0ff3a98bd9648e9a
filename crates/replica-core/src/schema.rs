//! Normalized table schemas and the closed semantic type set.
//!
//! Reflection maps every source column type onto [`ColumnType`] with an
//! explicit, enumerated table; a source type outside the mapping fails
//! reflection with a type-mapping error instead of deferring the problem
//! to load time.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// The closed set of semantic column types the engine moves between
/// source and destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    Decimal,
    Text,
    Bytes,
    Date,
    Time,
    Timestamp,
    Json,
    Uuid,
}

impl ColumnType {
    /// Whether a column of this type can serve as an incremental cursor.
    /// Cursor values must have a total order the watermark store can
    /// persist and compare; see [`crate::value::CursorValue`].
    pub const fn is_cursor_capable(self) -> bool {
        matches!(self, ColumnType::Int | ColumnType::Text | ColumnType::Timestamp)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ColumnType::Bool => "bool",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Decimal => "decimal",
            ColumnType::Text => "text",
            ColumnType::Bytes => "bytes",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Json => "json",
            ColumnType::Uuid => "uuid",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of a reflected table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType, nullable: bool) -> Self {
        ColumnSchema {
            name: name.into(),
            column_type,
            nullable,
        }
    }
}

/// A normalized table schema: ordered columns plus an optional declared
/// primary key.
///
/// Invariant: primary-key columns must name existing columns and those
/// columns must be non-nullable. [`TableSchema::validate`] enforces this;
/// reflectors call it before returning a schema, and the orchestrator
/// calls it again after applying a primary-key override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    /// Empty when the table declares no primary key.
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        TableSchema {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    pub fn with_column(
        mut self,
        name: impl Into<String>,
        column_type: ColumnType,
        nullable: bool,
    ) -> Self {
        self.columns.push(ColumnSchema::new(name, column_type, nullable));
        self
    }

    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Positional index of a column, matching [`crate::chunk::Row`] layout.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Indices of the primary-key columns, in declared key order.
    /// Call only on a validated schema.
    pub fn primary_key_indices(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|k| self.column_index(k))
            .collect()
    }

    /// Check the schema invariants: unique column names, and (when a key
    /// is declared) primary-key columns that exist and are non-nullable.
    pub fn validate(&self) -> Result<()> {
        for (i, col) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == col.name) {
                return Err(Error::config(format!(
                    "table '{}' declares column '{}' more than once",
                    self.name, col.name
                )));
            }
        }
        for key in &self.primary_key {
            match self.column(key) {
                None => {
                    return Err(Error::config(format!(
                        "primary-key column '{}' does not exist in table '{}'",
                        key, self.name
                    )))
                }
                Some(col) if col.nullable => {
                    return Err(Error::config(format!(
                        "primary-key column '{}' of table '{}' is nullable",
                        key, self.name
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
