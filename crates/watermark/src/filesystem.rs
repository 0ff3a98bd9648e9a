//! Filesystem-based watermark storage.

use async_trait::async_trait;
use replica_core::{CursorValue, Error, Result};
use std::path::PathBuf;

use crate::store::{next_record, StoredWatermark, WatermarkStore};

/// Filesystem implementation of [`WatermarkStore`].
///
/// Keeps one JSON file per table under a directory. Writes go to a
/// temporary file first and are renamed into place, so a crash mid-write
/// never leaves a torn state file behind.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, table: &str) -> PathBuf {
        self.dir.join(format!("watermark_{}.json", file_key(table)))
    }

    fn read(&self, table: &str) -> Result<Option<StoredWatermark>> {
        let path = self.path_for(table);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::watermark_store(table, format!("read {}: {e}", path.display())))?;
        let stored = serde_json::from_str(&content)
            .map_err(|e| Error::watermark_store(table, format!("parse {}: {e}", path.display())))?;
        Ok(Some(stored))
    }

    fn write(&self, table: &str, record: &StoredWatermark) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::watermark_store(table, format!("create {}: {e}", self.dir.display())))?;

        let path = self.path_for(table);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(record)
            .map_err(|e| Error::watermark_store(table, e))?;
        std::fs::write(&tmp, body)
            .map_err(|e| Error::watermark_store(table, format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| Error::watermark_store(table, format!("rename {}: {e}", path.display())))?;

        tracing::debug!(
            "Stored watermark for table {} at {}: {}",
            table,
            path.display(),
            record.value
        );
        Ok(())
    }
}

/// Reduce a table name to a safe file-name component.
fn file_key(table: &str) -> String {
    table
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[async_trait]
impl WatermarkStore for FilesystemStore {
    async fn get(&self, table: &str) -> Result<Option<StoredWatermark>> {
        self.read(table)
    }

    async fn advance(
        &self,
        table: &str,
        cursor_column: &str,
        observed_max: &CursorValue,
    ) -> Result<()> {
        let current = self.read(table)?;
        if let Some(record) = next_record(table, current.as_ref(), cursor_column, observed_max)? {
            self.write(table, &record)?;
        }
        Ok(())
    }
}
