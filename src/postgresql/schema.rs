//! PostgreSQL DDL and DML builders.
//!
//! Renders normalized table schemas into the SQL the load session executes:
//! table creation, truncation, and multi-row insert/upsert statements with
//! positional placeholders.

use replica_core::{ColumnType, TableSchema};

/// PostgreSQL type for each semantic column type.
pub fn pg_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Bool => "boolean",
        ColumnType::Int => "bigint",
        ColumnType::Float => "double precision",
        ColumnType::Decimal => "numeric",
        ColumnType::Text => "text",
        ColumnType::Bytes => "bytea",
        ColumnType::Date => "date",
        ColumnType::Time => "time",
        ColumnType::Timestamp => "timestamptz",
        ColumnType::Json => "jsonb",
        ColumnType::Uuid => "uuid",
    }
}

/// Quote a PostgreSQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `CREATE TABLE IF NOT EXISTS` for a destination table, including the
/// primary-key constraint merge relies on for its conflict target.
pub fn create_table_sql(schema: &TableSchema) -> String {
    let mut columns: Vec<String> = schema
        .columns
        .iter()
        .map(|c| {
            let mut def = format!("{} {}", quote_ident(&c.name), pg_type(c.column_type));
            if !c.nullable {
                def.push_str(" NOT NULL");
            }
            def
        })
        .collect();
    if schema.has_primary_key() {
        let key = schema
            .primary_key
            .iter()
            .map(|k| quote_ident(k))
            .collect::<Vec<_>>()
            .join(", ");
        columns.push(format!("PRIMARY KEY ({key})"));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&schema.name),
        columns.join(", ")
    )
}

pub fn truncate_sql(table: &str) -> String {
    format!("TRUNCATE TABLE {}", quote_ident(table))
}

/// Multi-row `INSERT` with positional placeholders for `row_count` rows.
pub fn insert_sql(schema: &TableSchema, row_count: usize) -> String {
    let columns = schema
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let width = schema.columns.len();
    let mut placeholders = Vec::with_capacity(row_count);
    for row in 0..row_count {
        let group = (0..width)
            .map(|col| format!("${}", row * width + col + 1))
            .collect::<Vec<_>>()
            .join(", ");
        placeholders.push(format!("({group})"));
    }
    format!(
        "INSERT INTO {} ({columns}) VALUES {}",
        quote_ident(&schema.name),
        placeholders.join(", ")
    )
}

/// Multi-row upsert keyed on the primary key. Non-key columns take the
/// incoming row's values; a table whose columns are all key columns has
/// nothing to update and degenerates to `DO NOTHING`.
pub fn upsert_sql(schema: &TableSchema, row_count: usize) -> String {
    let mut sql = insert_sql(schema, row_count);
    let conflict_target = schema
        .primary_key
        .iter()
        .map(|k| quote_ident(k))
        .collect::<Vec<_>>()
        .join(", ");
    let updates: Vec<String> = schema
        .columns
        .iter()
        .filter(|c| !schema.primary_key.contains(&c.name))
        .map(|c| {
            let quoted = quote_ident(&c.name);
            format!("{quoted} = EXCLUDED.{quoted}")
        })
        .collect();
    if updates.is_empty() {
        sql.push_str(&format!(" ON CONFLICT ({conflict_target}) DO NOTHING"));
    } else {
        sql.push_str(&format!(
            " ON CONFLICT ({conflict_target}) DO UPDATE SET {}",
            updates.join(", ")
        ));
    }
    sql
}
