//! In-memory source and destination backends.
//!
//! Deterministic tables for engine tests and demos. [`MemorySource`] serves
//! rows out of vectors (with optional injected stream faults) and counts
//! every row it hands out; [`MemoryDestination`] implements all three write
//! strategies under the same session contract as the real backends, so the
//! orchestrator's atomicity and retry behavior can be exercised without a
//! database.
//!
//! Lock poisoning is recovered with `into_inner` throughout: these backends
//! hold locks only for short, non-panicking sections, and a poisoned test
//! backend should keep serving rather than cascade.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use replica_core::{Error, Result, Row, RowChunk, TableSchema, Value, WriteStrategy};

use crate::load::{Destination, TableLoad};
use crate::source::{RowStream, SchemaReflector, TableSource};

/// Injected stream fault: the active stream errors once it has served
/// `after_rows` rows. One-shot plans clear after firing so the next
/// stream succeeds; persistent plans fault every stream the same way.
#[derive(Clone, Copy)]
struct StreamFault {
    after_rows: u64,
    one_shot: bool,
}

struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Row>,
    fail_after: Arc<Mutex<Option<StreamFault>>>,
}

/// A source backend reading from in-memory tables.
#[derive(Default)]
pub struct MemorySource {
    tables: RwLock<HashMap<String, MemoryTable>>,
    rows_read: Arc<AtomicU64>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MemorySource::insert_table`].
    pub fn with_table(self, schema: TableSchema, rows: Vec<Row>) -> Self {
        self.insert_table(schema, rows);
        self
    }

    pub fn insert_table(&self, schema: TableSchema, rows: Vec<Row>) {
        let mut tables = write_guard(&self.tables);
        tables.insert(
            schema.name.clone(),
            MemoryTable {
                schema,
                rows,
                fail_after: Arc::new(Mutex::new(None)),
            },
        );
    }

    /// Append rows to an existing table, e.g. to simulate source writes
    /// between runs.
    pub fn push_rows(&self, table: &str, rows: Vec<Row>) -> Result<()> {
        let mut tables = write_guard(&self.tables);
        let entry = tables.get_mut(table).ok_or_else(|| Error::SchemaNotFound {
            table: table.to_string(),
        })?;
        entry.rows.extend(rows);
        Ok(())
    }

    /// Arm a one-shot stream fault: the next stream over `table` errors
    /// after serving `rows` rows, and streams opened after that succeed.
    pub fn fail_once_after_rows(&self, table: &str, rows: u64) -> Result<()> {
        self.arm_fault(
            table,
            StreamFault {
                after_rows: rows,
                one_shot: true,
            },
        )
    }

    /// Arm a persistent stream fault: every stream over `table` errors
    /// after serving `rows` rows, reopened ones included.
    pub fn fail_after_rows(&self, table: &str, rows: u64) -> Result<()> {
        self.arm_fault(
            table,
            StreamFault {
                after_rows: rows,
                one_shot: false,
            },
        )
    }

    fn arm_fault(&self, table: &str, fault: StreamFault) -> Result<()> {
        let tables = read_guard(&self.tables);
        let entry = tables.get(table).ok_or_else(|| Error::SchemaNotFound {
            table: table.to_string(),
        })?;
        let mut plan = match entry.fail_after.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *plan = Some(fault);
        Ok(())
    }

    /// Total rows served across every stream this source ever opened.
    pub fn rows_read(&self) -> u64 {
        self.rows_read.load(AtomicOrdering::Relaxed)
    }
}

#[async_trait]
impl SchemaReflector for MemorySource {
    async fn reflect(&self, table: &str) -> Result<TableSchema> {
        let tables = read_guard(&self.tables);
        let entry = tables.get(table).ok_or_else(|| Error::SchemaNotFound {
            table: table.to_string(),
        })?;
        Ok(entry.schema.clone())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let tables = read_guard(&self.tables);
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl TableSource for MemorySource {
    async fn open_stream(
        &self,
        schema: &TableSchema,
        cursor: Option<&str>,
        since: Option<&replica_core::CursorValue>,
    ) -> Result<Box<dyn RowStream>> {
        let tables = read_guard(&self.tables);
        let entry = tables.get(&schema.name).ok_or_else(|| Error::SchemaNotFound {
            table: schema.name.clone(),
        })?;

        let mut rows = entry.rows.clone();
        if let Some(column) = cursor {
            let index = entry.schema.column_index(column).ok_or_else(|| {
                Error::config(format!(
                    "cursor column '{column}' does not exist in table '{}'",
                    schema.name
                ))
            })?;
            let mut keyed = Vec::with_capacity(rows.len());
            for row in rows {
                let key = row.value(index).and_then(Value::as_cursor).ok_or_else(|| {
                    Error::extraction(
                        &schema.name,
                        format!("null or non-orderable cursor value in column '{column}'"),
                    )
                })?;
                keyed.push((key, row));
            }
            keyed.sort_by(|a, b| {
                a.0.compare(&b.0).unwrap_or(std::cmp::Ordering::Equal)
            });
            if let Some(since) = since {
                let mut newer = Vec::with_capacity(keyed.len());
                for (key, row) in keyed {
                    if key.compare(since)? == std::cmp::Ordering::Greater {
                        newer.push((key, row));
                    }
                }
                keyed = newer;
            }
            rows = keyed.into_iter().map(|(_, row)| row).collect();
        }

        Ok(Box::new(MemoryStream {
            table: schema.name.clone(),
            rows: rows.into(),
            served: 0,
            counter: self.rows_read.clone(),
            fail_after: entry.fail_after.clone(),
        }))
    }
}

struct MemoryStream {
    table: String,
    rows: VecDeque<Row>,
    served: u64,
    counter: Arc<AtomicU64>,
    fail_after: Arc<Mutex<Option<StreamFault>>>,
}

#[async_trait]
impl RowStream for MemoryStream {
    async fn next_row(&mut self) -> Option<Result<Row>> {
        let mut plan = match self.fail_after.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(fault) = *plan {
            if self.served >= fault.after_rows {
                if fault.one_shot {
                    *plan = None;
                }
                return Some(Err(Error::extraction(&self.table, "injected stream fault")));
            }
        }
        drop(plan);

        let row = self.rows.pop_front()?;
        self.served += 1;
        self.counter.fetch_add(1, AtomicOrdering::Relaxed);
        Some(Ok(row))
    }
}

#[derive(Clone)]
struct StoredTable {
    schema: TableSchema,
    rows: Vec<Row>,
}

/// A destination backend writing to in-memory tables.
#[derive(Default)]
pub struct MemoryDestination {
    tables: Arc<RwLock<HashMap<String, StoredTable>>>,
    /// Persistent fault plans keyed by destination table: a session over
    /// that table fails every `apply_chunk` once it has applied this many
    /// chunks.
    fail_plans: Arc<Mutex<HashMap<String, u64>>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a destination table, e.g. the prior contents a
    /// replace run must preserve on failure.
    pub fn seed(&self, schema: TableSchema, rows: Vec<Row>) {
        let mut tables = write_guard(&self.tables);
        tables.insert(schema.name.clone(), StoredTable { schema, rows });
    }

    /// Arm a persistent fault: every load session over `table` errors on
    /// `apply_chunk` once `chunks` chunks have been applied in it.
    pub fn fail_after_chunks(&self, table: &str, chunks: u64) {
        let mut plans = match self.fail_plans.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        plans.insert(table.to_string(), chunks);
    }

    /// Current contents of a destination table, `None` when it does not
    /// exist.
    pub fn rows(&self, table: &str) -> Option<Vec<Row>> {
        let tables = read_guard(&self.tables);
        tables.get(table).map(|t| t.rows.clone())
    }

    pub fn table_names(&self) -> Vec<String> {
        let tables = read_guard(&self.tables);
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn begin_load(
        &self,
        schema: &TableSchema,
        strategy: WriteStrategy,
    ) -> Result<Box<dyn TableLoad>> {
        let pk_indices = schema.primary_key_indices();
        let mut index = HashMap::new();

        match strategy {
            // Replace materializes nothing until commit so an abort leaves
            // a missing table missing.
            WriteStrategy::Replace => {}
            WriteStrategy::Append | WriteStrategy::Merge => {
                let mut tables = write_guard(&self.tables);
                let entry = tables
                    .entry(schema.name.clone())
                    .or_insert_with(|| StoredTable {
                        schema: schema.clone(),
                        rows: Vec::new(),
                    });
                if strategy == WriteStrategy::Merge {
                    for (position, row) in entry.rows.iter().enumerate() {
                        index.insert(row.merge_key(&pk_indices), position);
                    }
                }
            }
        }

        Ok(Box::new(MemoryLoad {
            tables: self.tables.clone(),
            fail_plans: self.fail_plans.clone(),
            table: schema.name.clone(),
            schema: schema.clone(),
            strategy,
            pk_indices,
            index,
            staged: Vec::new(),
            chunks_applied: 0,
        }))
    }
}

struct MemoryLoad {
    tables: Arc<RwLock<HashMap<String, StoredTable>>>,
    fail_plans: Arc<Mutex<HashMap<String, u64>>>,
    table: String,
    schema: TableSchema,
    strategy: WriteStrategy,
    pk_indices: Vec<usize>,
    /// Merge key → row position in the stored table.
    index: HashMap<String, usize>,
    /// Replace staging; swapped in at commit.
    staged: Vec<Row>,
    chunks_applied: u64,
}

#[async_trait]
impl TableLoad for MemoryLoad {
    async fn apply_chunk(&mut self, chunk: &RowChunk) -> Result<u64> {
        let armed = {
            let plans = match self.fail_plans.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            plans.get(&self.table).copied()
        };
        if armed.is_some_and(|limit| self.chunks_applied >= limit) {
            // Fails before touching any row, which keeps the chunk atomic.
            return Err(Error::load(&self.table, "injected destination fault"));
        }

        match self.strategy {
            WriteStrategy::Replace => {
                self.staged.extend(chunk.rows.iter().cloned());
            }
            WriteStrategy::Append => {
                let mut tables = match self.tables.write() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let entry = tables.get_mut(&self.table).ok_or_else(|| {
                    Error::load(&self.table, "destination table disappeared mid-session")
                })?;
                entry.rows.extend(chunk.rows.iter().cloned());
            }
            WriteStrategy::Merge => {
                let mut tables = match self.tables.write() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let entry = tables.get_mut(&self.table).ok_or_else(|| {
                    Error::load(&self.table, "destination table disappeared mid-session")
                })?;
                for row in &chunk.rows {
                    let key = row.merge_key(&self.pk_indices);
                    match self.index.get(&key) {
                        Some(&position) => entry.rows[position] = row.clone(),
                        None => {
                            entry.rows.push(row.clone());
                            self.index.insert(key, entry.rows.len() - 1);
                        }
                    }
                }
            }
        }

        self.chunks_applied += 1;
        Ok(chunk.len() as u64)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.strategy == WriteStrategy::Replace {
            let mut tables = match self.tables.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            tables.insert(
                self.table.clone(),
                StoredTable {
                    schema: self.schema.clone(),
                    rows: std::mem::take(&mut self.staged),
                },
            );
        }
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        // Replace staging drops here; append/merge chunks were already
        // committed per chunk.
        Ok(())
    }
}

fn read_guard<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_guard<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
