//! In-memory watermark storage for tests and dry runs.

use async_trait::async_trait;
use replica_core::{CursorValue, Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::store::{next_record, StoredWatermark, WatermarkStore};

/// In-memory implementation of [`WatermarkStore`]. Durable only for the
/// process lifetime.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredWatermark>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, table: &str) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredWatermark>>> {
        self.entries
            .lock()
            .map_err(|_| Error::watermark_store(table, "watermark state mutex poisoned"))
    }
}

#[async_trait]
impl WatermarkStore for MemoryStore {
    async fn get(&self, table: &str) -> Result<Option<StoredWatermark>> {
        Ok(self.lock(table)?.get(table).cloned())
    }

    async fn advance(
        &self,
        table: &str,
        cursor_column: &str,
        observed_max: &CursorValue,
    ) -> Result<()> {
        let mut entries = self.lock(table)?;
        let current = entries.get(table);
        if let Some(record) = next_record(table, current, cursor_column, observed_max)? {
            entries.insert(table.to_string(), record);
        }
        Ok(())
    }
}
