//! MySQL schema reflection.
//!
//! Reads column and primary-key metadata out of `INFORMATION_SCHEMA` and maps
//! each MySQL column type onto the engine's semantic type set. The mapping is
//! a closed table: a source type with no entry fails reflection with a
//! type-mapping error rather than guessing at load time.

use mysql_async::prelude::*;
use mysql_async::Conn;
use replica_core::{ColumnSchema, ColumnType, Error, Result, TableSchema};

/// Map a MySQL data type to the engine's column type.
///
/// `data_type` is `INFORMATION_SCHEMA.COLUMNS.DATA_TYPE`; `column_type` is the
/// full `COLUMN_TYPE` spelling, needed to tell `TINYINT(1)` (boolean by MySQL
/// convention) apart from wider tinyints.
pub fn mysql_type_to_column_type(
    table: &str,
    column: &str,
    data_type: &str,
    column_type: &str,
) -> Result<ColumnType> {
    let mapped = match data_type.to_uppercase().as_str() {
        "TINYINT" => {
            if column_type.to_lowercase().starts_with("tinyint(1)") {
                ColumnType::Bool
            } else {
                ColumnType::Int
            }
        }
        "BOOLEAN" | "BOOL" => ColumnType::Bool,
        "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" => ColumnType::Int,
        "FLOAT" | "DOUBLE" | "REAL" => ColumnType::Float,
        "DECIMAL" | "NUMERIC" => ColumnType::Decimal,
        "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET" => {
            ColumnType::Text
        }
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            ColumnType::Bytes
        }
        "DATE" => ColumnType::Date,
        "TIME" => ColumnType::Time,
        "DATETIME" | "TIMESTAMP" => ColumnType::Timestamp,
        "JSON" => ColumnType::Json,
        other => {
            return Err(Error::TypeMapping {
                table: table.to_string(),
                column: column.to_string(),
                source_type: other.to_string(),
            })
        }
    };
    Ok(mapped)
}

/// Reflect one table into a normalized schema.
///
/// Columns come back in `ORDINAL_POSITION` order, which fixes the positional
/// row layout used by extraction. An unknown table yields
/// [`Error::SchemaNotFound`] rather than an empty schema.
pub async fn reflect_table(conn: &mut Conn, table: &str) -> Result<TableSchema> {
    let query = "
        SELECT COLUMN_NAME, DATA_TYPE, COLUMN_TYPE, IS_NULLABLE
        FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
    ";

    let columns: Vec<(String, String, String, String)> = conn
        .exec(query, (table,))
        .await
        .map_err(|e| Error::extraction(table, format!("column reflection query failed: {e}")))?;

    if columns.is_empty() {
        return Err(Error::SchemaNotFound {
            table: table.to_string(),
        });
    }

    let mut schema = TableSchema::new(table);
    for (name, data_type, column_type, is_nullable) in columns {
        let mapped = mysql_type_to_column_type(table, &name, &data_type, &column_type)?;
        schema
            .columns
            .push(ColumnSchema::new(name, mapped, is_nullable == "YES"));
    }
    schema.primary_key = primary_key_columns(conn, table).await?;
    schema.validate()?;
    Ok(schema)
}

/// Primary-key columns of a table, in key order. Empty when the table
/// declares no primary key; strategy validation decides what that means.
pub async fn primary_key_columns(conn: &mut Conn, table: &str) -> Result<Vec<String>> {
    let query = "
        SELECT COLUMN_NAME
        FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
        WHERE TABLE_SCHEMA = DATABASE()
        AND TABLE_NAME = ?
        AND CONSTRAINT_NAME = 'PRIMARY'
        ORDER BY ORDINAL_POSITION
    ";

    conn.exec(query, (table,))
        .await
        .map_err(|e| Error::extraction(table, format!("primary-key reflection query failed: {e}")))
}

/// All base tables in the connected database, sorted by name. Views and
/// system tables are excluded.
pub async fn list_base_tables(conn: &mut Conn) -> Result<Vec<String>> {
    let query = "
        SELECT TABLE_NAME
        FROM INFORMATION_SCHEMA.TABLES
        WHERE TABLE_SCHEMA = DATABASE()
        AND TABLE_TYPE = 'BASE TABLE'
        ORDER BY TABLE_NAME
    ";

    conn.query(query)
        .await
        .map_err(|e| Error::extraction("", format!("table listing query failed: {e}")))
}
