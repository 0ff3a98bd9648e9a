//! Run configuration assembly: per-table hints and the YAML manifest.
//!
//! A run's table list can be annotated two ways, reduced to the same
//! [`TableHint`] values before the pipeline starts:
//!
//! - `--hint 'table:key=value[,key=value...]'` on the command line, with
//!   keys `cursor`, `since`, `pk` (composite keys joined with `+`), and
//!   `strategy`;
//! - a YAML manifest carrying the same per-table fields plus run options.
//!
//! Hints referencing tables outside the run's selection are hard errors,
//! not silent no-ops.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use replica_core::{
    CursorSpec, CursorValue, Error, Result, RunOptions, TableRunConfig, WriteStrategy,
};

/// Parsed per-table annotations from a hint string or manifest entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TableHint {
    pub table: String,
    pub strategy: Option<WriteStrategy>,
    pub cursor: Option<String>,
    pub since: Option<CursorValue>,
    pub primary_key: Option<Vec<String>>,
}

impl TableHint {
    fn empty(table: &str) -> Self {
        TableHint {
            table: table.to_string(),
            strategy: None,
            cursor: None,
            since: None,
            primary_key: None,
        }
    }
}

/// Parse one `table:key=value[,key=value...]` hint string.
pub fn parse_hint(input: &str) -> Result<TableHint> {
    let (table, rest) = input.split_once(':').ok_or_else(|| {
        Error::config(format!(
            "invalid hint '{input}': expected 'table:key=value[,key=value...]'"
        ))
    })?;
    let table = table.trim();
    if table.is_empty() {
        return Err(Error::config(format!("invalid hint '{input}': empty table name")));
    }

    let mut hint = TableHint::empty(table);
    for pair in rest.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            Error::config(format!("invalid hint entry '{pair}': expected key=value"))
        })?;
        let value = value.trim();
        match key.trim() {
            "cursor" => {
                if hint.cursor.replace(value.to_string()).is_some() {
                    return Err(duplicate_key(table, "cursor"));
                }
            }
            "since" => {
                if hint.since.replace(CursorValue::parse(value)?).is_some() {
                    return Err(duplicate_key(table, "since"));
                }
            }
            "strategy" => {
                if hint.strategy.replace(value.parse()?).is_some() {
                    return Err(duplicate_key(table, "strategy"));
                }
            }
            "pk" => {
                let columns: Vec<String> = value
                    .split('+')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                if columns.is_empty() {
                    return Err(Error::config(format!(
                        "hint for table '{table}' has an empty pk list"
                    )));
                }
                if hint.primary_key.replace(columns).is_some() {
                    return Err(duplicate_key(table, "pk"));
                }
            }
            other => {
                return Err(Error::config(format!(
                    "unknown hint key '{other}' for table '{table}' \
                     (expected cursor, since, pk, or strategy)"
                )));
            }
        }
    }
    Ok(hint)
}

fn duplicate_key(table: &str, key: &str) -> Error {
    Error::config(format!("hint for table '{table}' repeats key '{key}'"))
}

/// One table entry of the YAML manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestTable {
    pub table: String,
    #[serde(default)]
    pub strategy: Option<WriteStrategy>,
    #[serde(default)]
    pub cursor: Option<String>,
    /// Cursor notation, same forms as the CLI: integer, RFC 3339
    /// timestamp, `YYYY-MM-DD`, or plain text.
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub primary_key: Option<Vec<String>>,
}

impl ManifestTable {
    pub fn to_hint(&self) -> Result<TableHint> {
        Ok(TableHint {
            table: self.table.clone(),
            strategy: self.strategy,
            cursor: self.cursor.clone(),
            since: self
                .since
                .as_deref()
                .map(CursorValue::parse)
                .transpose()?,
            primary_key: self.primary_key.clone(),
        })
    }
}

/// A replication run described as a file instead of flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunManifest {
    #[serde(default)]
    pub options: RunOptions,
    /// Strategy for tables without one of their own.
    #[serde(default)]
    pub default_strategy: Option<WriteStrategy>,
    #[serde(default)]
    pub tables: Vec<ManifestTable>,
}

impl RunManifest {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            Error::config(format!("cannot read manifest {}: {err}", path.display()))
        })?;
        Self::from_yaml(&text)
            .map_err(|err| Error::config(format!("invalid manifest {}: {err}", path.display())))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|err| Error::config(err.to_string()))
    }

    /// Source table names this manifest mentions, in manifest order.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.table.clone()).collect()
    }

    pub fn hints(&self) -> Result<Vec<TableHint>> {
        self.tables.iter().map(ManifestTable::to_hint).collect()
    }
}

/// Layer command-line hints over manifest hints; a CLI hint for a table
/// replaces that table's manifest entry wholesale.
pub fn merge_hints(base: Vec<TableHint>, overrides: Vec<TableHint>) -> Vec<TableHint> {
    let mut merged = base;
    for hint in overrides {
        match merged.iter_mut().find(|h| h.table == hint.table) {
            Some(slot) => *slot = hint,
            None => merged.push(hint),
        }
    }
    merged
}

/// Resolve the per-table run configuration for every selected table.
///
/// Every hint must reference a selected table; `since` is only valid
/// together with `cursor`.
pub fn build_table_configs(
    selected: &[String],
    default_strategy: WriteStrategy,
    hints: &[TableHint],
) -> Result<Vec<TableRunConfig>> {
    let mut by_table: HashMap<&str, &TableHint> = HashMap::new();
    for hint in hints {
        if by_table.insert(hint.table.as_str(), hint).is_some() {
            return Err(Error::config(format!(
                "duplicate hint for table '{}'",
                hint.table
            )));
        }
        if !selected.iter().any(|t| t == &hint.table) {
            return Err(Error::config(format!(
                "hint references table '{}' which is not selected for this run",
                hint.table
            )));
        }
    }

    let mut configs = Vec::with_capacity(selected.len());
    for table in selected {
        let hint = by_table.get(table.as_str());
        let strategy = hint.and_then(|h| h.strategy).unwrap_or(default_strategy);
        let mut config = TableRunConfig::new(table, strategy);
        if let Some(hint) = hint {
            match (&hint.cursor, &hint.since) {
                (Some(cursor), since) => {
                    let mut spec = CursorSpec::new(cursor);
                    if let Some(since) = since {
                        spec = spec.with_initial(since.clone());
                    }
                    config = config.with_cursor(spec);
                }
                (None, Some(_)) => {
                    return Err(Error::config(format!(
                        "hint for table '{table}' sets since without a cursor column"
                    )));
                }
                (None, None) => {}
            }
            if let Some(pk) = &hint.primary_key {
                config = config.with_primary_key(pk.clone());
            }
        }
        configs.push(config);
    }
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn parses_a_full_hint() {
        let hint =
            parse_hint("orders:cursor=updated_at,since=2024-01-01,strategy=merge,pk=region+id")
                .unwrap();
        assert_eq!(hint.table, "orders");
        assert_eq!(hint.cursor.as_deref(), Some("updated_at"));
        assert_eq!(
            hint.since,
            Some(CursorValue::Timestamp(
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
            ))
        );
        assert_eq!(hint.strategy, Some(WriteStrategy::Merge));
        assert_eq!(
            hint.primary_key,
            Some(vec!["region".to_string(), "id".to_string()])
        );
    }

    #[test]
    fn hint_rejects_unknown_and_repeated_keys() {
        assert!(parse_hint("orders").is_err());
        assert!(parse_hint("orders:batch=10").is_err());
        assert!(parse_hint("orders:cursor=a,cursor=b").is_err());
        assert!(parse_hint(":cursor=a").is_err());
        assert!(parse_hint("orders:strategy=upsert").is_err());
    }

    #[test]
    fn hint_since_keeps_timestamps_with_colons_intact() {
        let hint = parse_hint("orders:cursor=updated_at,since=2024-06-01T12:30:00Z").unwrap();
        assert_eq!(
            hint.since,
            Some(CursorValue::Timestamp(
                Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap()
            ))
        );
    }

    #[test]
    fn manifest_parses_options_and_tables() {
        let manifest = RunManifest::from_yaml(
            "options:\n  chunk_size: 500\n  workers: 2\n  naming: direct\n\
             default_strategy: merge\n\
             tables:\n  - table: family\n    cursor: updated\n    since: '2024-01-01'\n\
             \x20\x20- table: clan\n    strategy: replace\n",
        )
        .unwrap();
        assert_eq!(manifest.options.chunk_size, 500);
        assert_eq!(manifest.options.workers, 2);
        assert_eq!(manifest.default_strategy, Some(WriteStrategy::Merge));
        assert_eq!(manifest.table_names(), vec!["family", "clan"]);

        let hints = manifest.hints().unwrap();
        assert_eq!(hints[0].cursor.as_deref(), Some("updated"));
        assert_eq!(hints[1].strategy, Some(WriteStrategy::Replace));
    }

    #[test]
    fn manifest_rejects_unknown_fields() {
        assert!(RunManifest::from_yaml("tables:\n  - table: a\n    watermark: b\n").is_err());
    }

    #[test]
    fn configs_apply_hints_and_defaults() {
        let selected = vec!["family".to_string(), "genome".to_string()];
        let hints = vec![parse_hint("family:cursor=updated,strategy=append").unwrap()];
        let configs = build_table_configs(&selected, WriteStrategy::Merge, &hints).unwrap();

        assert_eq!(configs[0].strategy, WriteStrategy::Append);
        assert_eq!(configs[0].cursor.as_ref().unwrap().column, "updated");
        assert_eq!(configs[1].strategy, WriteStrategy::Merge);
        assert!(configs[1].cursor.is_none());
    }

    #[test]
    fn hint_for_unselected_table_is_an_error() {
        let selected = vec!["family".to_string()];
        let hints = vec![parse_hint("clan:cursor=updated").unwrap()];
        let err = build_table_configs(&selected, WriteStrategy::Merge, &hints).unwrap_err();
        assert!(err.to_string().contains("clan"));
    }

    #[test]
    fn since_without_cursor_is_an_error() {
        let selected = vec!["family".to_string()];
        let hints = vec![TableHint {
            table: "family".to_string(),
            strategy: None,
            cursor: None,
            since: Some(CursorValue::Int(5)),
            primary_key: None,
        }];
        assert!(build_table_configs(&selected, WriteStrategy::Merge, &hints).is_err());
    }

    #[test]
    fn cli_hints_override_manifest_hints() {
        let base = vec![parse_hint("family:cursor=updated").unwrap()];
        let overrides = vec![parse_hint("family:cursor=created,strategy=append").unwrap()];
        let merged = merge_hints(base, overrides);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].cursor.as_deref(), Some("created"));
        assert_eq!(merged[0].strategy, Some(WriteStrategy::Append));
    }
}
