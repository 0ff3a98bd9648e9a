//! Destination naming derivation.
//!
//! Applied exactly once per table per run, when the destination-side
//! schema is derived from the reflected source schema. Watermark state is
//! keyed by the source table name, so naming never touches incremental
//! state.

use crate::config::NamingMode;
use crate::error::{Error, Result};
use crate::schema::TableSchema;

/// Derive the destination schema for a reflected source schema under the
/// given naming mode. Fails if normalization maps two source columns onto
/// the same destination name.
pub fn destination_schema(mode: NamingMode, source: &TableSchema) -> Result<TableSchema> {
    match mode {
        NamingMode::Direct => Ok(source.clone()),
        NamingMode::Snake => {
            let mut renamed = source.clone();
            renamed.name = snake_case(&source.name);
            for col in &mut renamed.columns {
                col.name = snake_case(&col.name);
            }
            for key in &mut renamed.primary_key {
                *key = snake_case(key);
            }
            for (i, col) in renamed.columns.iter().enumerate() {
                if renamed.columns[..i].iter().any(|c| c.name == col.name) {
                    return Err(Error::config(format!(
                        "snake_case naming collides on column '{}' of table '{}'",
                        col.name, source.name
                    )));
                }
            }
            Ok(renamed)
        }
    }
}

/// Lower snake_case normalization: `Address_Log` → `address_log`,
/// `LogID` → `log_id`, `HTTPServer` → `http_server`.
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' || c == ' ' {
            if !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }
        if c.is_uppercase() {
            let after_lower_or_digit =
                i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let upper_run_ending = i > 0
                && chars[i - 1].is_uppercase()
                && chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if (after_lower_or_digit || upper_run_ending) && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
