//! Run orchestration: a bounded worker pool driving per-table state
//! machines.
//!
//! Each selected table moves through reflection, extraction, and loading
//! independently; one table failing never stops its siblings. Within a
//! table the loop is strict: a chunk's destination write must land before
//! its watermark advance is persisted, and only then may the next chunk
//! start. A crash between write and advance therefore redelivers rows
//! instead of skipping them. Faults count against a per-table cap that
//! only durable progress resets.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use replica_core::naming::{destination_schema, snake_case};
use replica_core::{
    ColumnType, CursorValue, Error, NamingMode, Result, RunOptions, RunReport, TableFailure,
    TableOutcome, TableReport, TableRunConfig, TableSchema, WriteStrategy,
};
use watermark::WatermarkStore;

use crate::extract::Chunker;
use crate::load::{Destination, TableLoad};
use crate::source::TableSource;

/// Positions of the per-table state machine. Tables only move forward:
/// `Pending → Reflecting → Extracting → Loading → Done | Failed`, with
/// `Extracting ↔ Loading` alternating per chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Pending,
    Reflecting,
    Extracting,
    Loading,
    Done,
    Failed,
}

impl std::fmt::Display for TableState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TableState::Pending => "pending",
            TableState::Reflecting => "reflecting",
            TableState::Extracting => "extracting",
            TableState::Loading => "loading",
            TableState::Done => "done",
            TableState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The replication engine: wires one source, one destination, and one
/// watermark store into per-table runs.
pub struct Pipeline {
    source: Arc<dyn TableSource>,
    destination: Arc<dyn Destination>,
    watermarks: Arc<dyn WatermarkStore>,
    options: RunOptions,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn TableSource>,
        destination: Arc<dyn Destination>,
        watermarks: Arc<dyn WatermarkStore>,
        options: RunOptions,
    ) -> Self {
        Pipeline {
            source,
            destination,
            watermarks,
            options,
        }
    }

    /// Run every configured table to completion and report per-table
    /// outcomes. The run itself only fails on configuration faults caught
    /// up front; per-table faults land in the report instead.
    pub async fn run(
        &self,
        tables: Vec<TableRunConfig>,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        self.validate_selection(&tables)?;

        let started_at = Utc::now();
        let workers = self.options.workers.max(1);
        info!(
            tables = tables.len(),
            workers,
            dry_run = self.options.dry_run,
            "Starting replication run"
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut join_set: JoinSet<(usize, TableReport)> = JoinSet::new();
        let table_count = tables.len();

        for (index, config) in tables.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let source = self.source.clone();
            let destination = self.destination.clone();
            let watermarks = self.watermarks.clone();
            let options = self.options.clone();
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, cancelled_report(&config.table)),
                };
                if cancel.is_cancelled() {
                    return (index, cancelled_report(&config.table));
                }
                let report = run_table(
                    source.as_ref(),
                    destination.as_ref(),
                    watermarks.as_ref(),
                    &options,
                    &config,
                    &cancel,
                )
                .await;
                (index, report)
            });
        }

        let mut slots: Vec<Option<TableReport>> = (0..table_count).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, report)) => slots[index] = Some(report),
                Err(err) => {
                    return Err(Error::config(format!("table worker panicked: {err}")));
                }
            }
        }

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            cancelled: cancel.is_cancelled(),
            tables: slots.into_iter().flatten().collect(),
        };
        info!(
            rows_extracted = report.total_rows_extracted(),
            rows_loaded = report.total_rows_loaded(),
            failed = report.failed_tables().count(),
            "Replication run finished"
        );
        Ok(report)
    }

    /// Reject selections that would break the single-writer-per-table
    /// rule before any worker starts.
    fn validate_selection(&self, tables: &[TableRunConfig]) -> Result<()> {
        let mut seen = HashSet::new();
        for config in tables {
            if !seen.insert(config.table.as_str()) {
                return Err(Error::config(format!(
                    "table '{}' is selected more than once",
                    config.table
                )));
            }
        }
        if self.options.naming == NamingMode::Snake {
            let mut dest_names: HashSet<String> = HashSet::new();
            for config in tables {
                let dest = snake_case(&config.table);
                if !dest_names.insert(dest.clone()) {
                    return Err(Error::config(format!(
                        "tables collide on destination name '{dest}' under snake naming"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn cancelled_report(table: &str) -> TableReport {
    let now = Utc::now();
    TableReport {
        table: table.to_string(),
        outcome: TableOutcome::Cancelled,
        rows_extracted: 0,
        rows_loaded: 0,
        chunks_loaded: 0,
        final_watermark: None,
        errors: Vec::new(),
        started_at: now,
        finished_at: now,
    }
}

/// Mutable bookkeeping for one table while its state machine runs.
struct TableRun {
    table: String,
    state: TableState,
    rows_extracted: u64,
    rows_loaded: u64,
    chunks_loaded: u64,
    watermark: Option<CursorValue>,
    errors: Vec<TableFailure>,
    consecutive_failures: u32,
    started_at: DateTime<Utc>,
}

impl TableRun {
    fn new(table: &str) -> Self {
        TableRun {
            table: table.to_string(),
            state: TableState::Pending,
            rows_extracted: 0,
            rows_loaded: 0,
            chunks_loaded: 0,
            watermark: None,
            errors: Vec::new(),
            consecutive_failures: 0,
            started_at: Utc::now(),
        }
    }

    fn enter(&mut self, next: TableState) {
        if self.state != next {
            debug!(table = %self.table, from = %self.state, to = %next, "Table state transition");
            self.state = next;
        }
    }

    fn record(&mut self, err: &Error) {
        warn!(table = %self.table, kind = %err.kind(), "Table fault: {err}");
        self.errors.push(TableFailure::from(err));
    }

    /// Record a fault and decide whether the bounded retry budget allows
    /// another attempt. Non-retryable kinds never do.
    fn can_retry(&mut self, err: &Error, max_chunk_failures: u32) -> bool {
        self.record(err);
        if !err.is_retryable() {
            return false;
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures >= max_chunk_failures {
            warn!(
                table = %self.table,
                failures = self.consecutive_failures,
                "Consecutive failure cap reached"
            );
            return false;
        }
        true
    }

    /// Clear the failure streak. Only durable progress may do this: a
    /// restart that re-applies the same chunks keeps counting toward the
    /// cap.
    fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
    }

    fn fail(mut self, err: &Error) -> TableReport {
        self.record(err);
        self.finish(TableOutcome::Failed)
    }

    fn finish(mut self, outcome: TableOutcome) -> TableReport {
        self.enter(match outcome {
            TableOutcome::Done => TableState::Done,
            _ => TableState::Failed,
        });
        match outcome {
            TableOutcome::Done => info!(
                table = %self.table,
                rows = self.rows_loaded,
                chunks = self.chunks_loaded,
                "Table replication complete"
            ),
            TableOutcome::Failed => error!(
                table = %self.table,
                errors = self.errors.len(),
                "Table replication failed"
            ),
            TableOutcome::Cancelled => warn!(table = %self.table, "Table replication cancelled"),
        }
        TableReport {
            table: self.table,
            outcome,
            rows_extracted: self.rows_extracted,
            rows_loaded: self.rows_loaded,
            chunks_loaded: self.chunks_loaded,
            final_watermark: self.watermark,
            errors: self.errors,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Everything reflection and validation produce before rows move.
struct TablePlan {
    schema: TableSchema,
    dest_schema: TableSchema,
    cursor_index: Option<usize>,
    since: Option<CursorValue>,
}

async fn run_table(
    source: &dyn TableSource,
    destination: &dyn Destination,
    watermarks: &dyn WatermarkStore,
    options: &RunOptions,
    config: &TableRunConfig,
    cancel: &CancellationToken,
) -> TableReport {
    let mut run = TableRun::new(&config.table);
    info!(
        table = %config.table,
        strategy = %config.strategy,
        cursor = config.cursor.as_ref().map(|c| c.column.as_str()).unwrap_or("-"),
        "Starting table replication"
    );

    run.enter(TableState::Reflecting);
    let plan = match prepare(source, watermarks, options, config).await {
        Ok(plan) => plan,
        Err(err) => return run.fail(&err),
    };
    run.watermark = plan.since.clone();
    if let Some(since) = &plan.since {
        debug!(table = %config.table, since = %since, "Resuming from stored watermark");
    }

    match config.strategy {
        WriteStrategy::Replace => {
            run_replace(source, destination, watermarks, options, config, cancel, run, &plan).await
        }
        WriteStrategy::Append | WriteStrategy::Merge => {
            run_incremental(source, destination, watermarks, options, config, cancel, run, &plan)
                .await
        }
    }
}

/// Reflect the table and validate the full run configuration against the
/// reflected schema. Nothing here reads a single row; merge without a
/// primary key and cursor misconfiguration fail before extraction opens.
async fn prepare(
    source: &dyn TableSource,
    watermarks: &dyn WatermarkStore,
    options: &RunOptions,
    config: &TableRunConfig,
) -> Result<TablePlan> {
    let mut schema = source.reflect(&config.table).await?;
    if let Some(pk) = &config.primary_key {
        schema.primary_key = pk.clone();
    }
    schema.validate()?;

    if config.strategy == WriteStrategy::Merge && !schema.has_primary_key() {
        return Err(Error::MissingPrimaryKey {
            table: config.table.clone(),
        });
    }

    let mut cursor_index = None;
    if let Some(spec) = &config.cursor {
        let column = schema.column(&spec.column).ok_or_else(|| {
            Error::config(format!(
                "cursor column '{}' does not exist in table '{}'",
                spec.column, config.table
            ))
        })?;
        if !column.column_type.is_cursor_capable() {
            return Err(Error::config(format!(
                "cursor column '{}' of table '{}' has type {}, which cannot order a cursor",
                spec.column, config.table, column.column_type
            )));
        }
        if let Some(initial) = &spec.initial {
            check_cursor_type(&config.table, &spec.column, column.column_type, initial)?;
        }
        cursor_index = schema.column_index(&spec.column);
    }

    let since = resolve_since(watermarks, config, &schema).await?;
    let dest_schema = destination_schema(options.naming, &schema)?;

    Ok(TablePlan {
        schema,
        dest_schema,
        cursor_index,
        since,
    })
}

/// Extraction lower bound: the stored watermark when one exists, else the
/// configured initial value, else unbounded.
async fn resolve_since(
    watermarks: &dyn WatermarkStore,
    config: &TableRunConfig,
    schema: &TableSchema,
) -> Result<Option<CursorValue>> {
    let Some(spec) = &config.cursor else {
        return Ok(None);
    };
    match watermarks.get(&config.table).await? {
        Some(stored) => {
            if stored.cursor_column != spec.column {
                return Err(Error::config(format!(
                    "table '{}' has stored watermark state for cursor column '{}'; \
                     switching to '{}' requires clearing that state",
                    config.table, stored.cursor_column, spec.column
                )));
            }
            if let Some(column) = schema.column(&spec.column) {
                check_cursor_type(&config.table, &spec.column, column.column_type, &stored.value)?;
            }
            Ok(Some(stored.value))
        }
        None => Ok(spec.initial.clone()),
    }
}

fn check_cursor_type(
    table: &str,
    column: &str,
    column_type: ColumnType,
    value: &CursorValue,
) -> Result<()> {
    let matches = matches!(
        (column_type, value),
        (ColumnType::Int, CursorValue::Int(_))
            | (ColumnType::Text, CursorValue::Text(_))
            | (ColumnType::Timestamp, CursorValue::Timestamp(_))
    );
    if matches {
        Ok(())
    } else {
        Err(Error::config(format!(
            "cursor value for table '{table}' is {} but column '{column}' is {column_type}",
            value.type_name()
        )))
    }
}

/// Append and merge: chunks become visible as they commit, and each
/// chunk's watermark advance is persisted before the next chunk starts.
#[allow(clippy::too_many_arguments)]
async fn run_incremental(
    source: &dyn TableSource,
    destination: &dyn Destination,
    watermarks: &dyn WatermarkStore,
    options: &RunOptions,
    config: &TableRunConfig,
    cancel: &CancellationToken,
    mut run: TableRun,
    plan: &TablePlan,
) -> TableReport {
    let cursor_column = config.cursor.as_ref().map(|c| c.column.as_str());
    let mut session: Option<Box<dyn TableLoad>> = if options.dry_run {
        None
    } else {
        match destination.begin_load(&plan.dest_schema, config.strategy).await {
            Ok(live) => Some(live),
            Err(err) => return run.fail(&err),
        }
    };

    // Last durably persisted watermark; stream restarts resume from here.
    let mut committed = plan.since.clone();
    let mut chunker: Option<Chunker> = None;
    let mut extracted_base = 0u64;
    let mut next_seq = 1u64;

    let outcome = 'table: loop {
        if cancel.is_cancelled() {
            break 'table TableOutcome::Cancelled;
        }

        let Some(active) = chunker.as_mut() else {
            run.enter(TableState::Extracting);
            match source
                .open_stream(&plan.schema, cursor_column, committed.as_ref())
                .await
            {
                Ok(stream) => {
                    chunker = Some(
                        Chunker::new(&config.table, stream, options.chunk_size, plan.cursor_index)
                            .with_start_seq(next_seq),
                    );
                }
                Err(err) => {
                    if !run.can_retry(&err, options.max_chunk_failures) {
                        break 'table TableOutcome::Failed;
                    }
                }
            }
            continue;
        };

        run.enter(TableState::Extracting);
        let chunk = match active.next_chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                if let Some(live) = session.take() {
                    if let Err(err) = live.commit().await {
                        run.record(&err);
                        break 'table TableOutcome::Failed;
                    }
                }
                break 'table TableOutcome::Done;
            }
            Err(err) => {
                extracted_base += active.rows_extracted();
                next_seq = active.next_seq();
                run.rows_extracted = extracted_base;
                chunker = None;
                if config.strategy == WriteStrategy::Append && cursor_column.is_none() {
                    // A cursorless append has no safe restart position:
                    // re-extracting would duplicate already-committed rows.
                    run.record(&err);
                    break 'table TableOutcome::Failed;
                }
                if !run.can_retry(&err, options.max_chunk_failures) {
                    break 'table TableOutcome::Failed;
                }
                continue;
            }
        };
        run.rows_extracted = extracted_base + active.rows_extracted();

        run.enter(TableState::Loading);
        let loaded = if options.dry_run {
            debug!(
                table = %config.table,
                chunk = chunk.seq,
                rows = chunk.len(),
                "Dry run: skipping chunk load"
            );
            chunk.len() as u64
        } else {
            'apply: loop {
                let applied = match session.as_mut() {
                    Some(live) => live.apply_chunk(&chunk).await,
                    None => Err(Error::load(&config.table, "load session is gone")),
                };
                match applied {
                    Ok(written) => break 'apply written,
                    Err(err) => {
                        // Chunk application is atomic, so the same chunk
                        // can be retried in place.
                        if !run.can_retry(&err, options.max_chunk_failures) {
                            break 'table TableOutcome::Failed;
                        }
                    }
                }
            }
        };
        run.rows_loaded += loaded;
        run.chunks_loaded += 1;
        debug!(
            table = %config.table,
            chunk = chunk.seq,
            rows = loaded,
            "Chunk loaded"
        );

        // The write has landed; only now is the advance durable, and only
        // after that may the next chunk start.
        if let (Some(advance), Some(column)) = (&chunk.advance_to, cursor_column) {
            if options.dry_run {
                debug!(
                    table = %config.table,
                    watermark = %advance,
                    "Dry run: skipping watermark advance"
                );
            } else if let Err(err) = watermarks.advance(&config.table, column, advance).await {
                run.record(&err);
                break 'table TableOutcome::Failed;
            } else {
                committed = Some(advance.clone());
                run.watermark = Some(advance.clone());
                run.reset_failures();
            }
        }
    };

    if outcome != TableOutcome::Done {
        abort_session(&config.table, session.take()).await;
    }
    run.finish(outcome)
}

/// Replace: the whole extracted stream stages inside one load session and
/// swaps in atomically at commit. Any fault discards the attempt and, if
/// the retry budget allows, restarts it from scratch; prior destination
/// contents stay visible throughout. Nothing is durable before the swap,
/// so the failure cap spans attempts.
#[allow(clippy::too_many_arguments)]
async fn run_replace(
    source: &dyn TableSource,
    destination: &dyn Destination,
    watermarks: &dyn WatermarkStore,
    options: &RunOptions,
    config: &TableRunConfig,
    cancel: &CancellationToken,
    mut run: TableRun,
    plan: &TablePlan,
) -> TableReport {
    let cursor_column = config.cursor.as_ref().map(|c| c.column.as_str());
    let mut extracted_base = 0u64;

    let outcome = 'attempt: loop {
        if cancel.is_cancelled() {
            break 'attempt TableOutcome::Cancelled;
        }

        let mut session: Option<Box<dyn TableLoad>> = if options.dry_run {
            None
        } else {
            match destination
                .begin_load(&plan.dest_schema, WriteStrategy::Replace)
                .await
            {
                Ok(live) => Some(live),
                Err(err) => {
                    if run.can_retry(&err, options.max_chunk_failures) {
                        continue 'attempt;
                    }
                    break 'attempt TableOutcome::Failed;
                }
            }
        };

        run.enter(TableState::Extracting);
        let stream = match source
            .open_stream(&plan.schema, cursor_column, plan.since.as_ref())
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                abort_session(&config.table, session.take()).await;
                if run.can_retry(&err, options.max_chunk_failures) {
                    continue 'attempt;
                }
                break 'attempt TableOutcome::Failed;
            }
        };
        let mut chunker =
            Chunker::new(&config.table, stream, options.chunk_size, plan.cursor_index);
        let loaded_before = (run.rows_loaded, run.chunks_loaded);
        let mut final_advance: Option<CursorValue> = None;

        loop {
            if cancel.is_cancelled() {
                abort_session(&config.table, session.take()).await;
                break 'attempt TableOutcome::Cancelled;
            }

            run.enter(TableState::Extracting);
            let chunk = match chunker.next_chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    if let Some(live) = session.take() {
                        if let Err(err) = live.commit().await {
                            if run.can_retry(&err, options.max_chunk_failures) {
                                extracted_base += chunker.rows_extracted();
                                run.rows_loaded = loaded_before.0;
                                run.chunks_loaded = loaded_before.1;
                                continue 'attempt;
                            }
                            break 'attempt TableOutcome::Failed;
                        }
                    }
                    // The swap is visible; a single advance records the
                    // stream's high-water mark.
                    if let (Some(advance), Some(column)) = (&final_advance, cursor_column) {
                        if options.dry_run {
                            debug!(
                                table = %config.table,
                                watermark = %advance,
                                "Dry run: skipping watermark advance"
                            );
                        } else if let Err(err) =
                            watermarks.advance(&config.table, column, advance).await
                        {
                            run.record(&err);
                            break 'attempt TableOutcome::Failed;
                        } else {
                            run.watermark = Some(advance.clone());
                        }
                    }
                    break 'attempt TableOutcome::Done;
                }
                Err(err) => {
                    // Staged rows cannot be trusted after an extraction
                    // fault; restart the attempt with a fresh session.
                    abort_session(&config.table, session.take()).await;
                    extracted_base += chunker.rows_extracted();
                    run.rows_extracted = extracted_base;
                    run.rows_loaded = loaded_before.0;
                    run.chunks_loaded = loaded_before.1;
                    if run.can_retry(&err, options.max_chunk_failures) {
                        continue 'attempt;
                    }
                    break 'attempt TableOutcome::Failed;
                }
            };
            run.rows_extracted = extracted_base + chunker.rows_extracted();

            run.enter(TableState::Loading);
            let loaded = if options.dry_run {
                debug!(
                    table = %config.table,
                    chunk = chunk.seq,
                    rows = chunk.len(),
                    "Dry run: skipping chunk load"
                );
                chunk.len() as u64
            } else {
                'apply: loop {
                    let applied = match session.as_mut() {
                        Some(live) => live.apply_chunk(&chunk).await,
                        None => Err(Error::load(&config.table, "load session is gone")),
                    };
                    match applied {
                        Ok(written) => break 'apply written,
                        Err(err) => {
                            if !run.can_retry(&err, options.max_chunk_failures) {
                                abort_session(&config.table, session.take()).await;
                                break 'attempt TableOutcome::Failed;
                            }
                        }
                    }
                }
            };
            run.rows_loaded += loaded;
            run.chunks_loaded += 1;
            if let Some(advance) = &chunk.advance_to {
                final_advance = Some(advance.clone());
            }
        }
    };

    run.finish(outcome)
}

async fn abort_session(table: &str, session: Option<Box<dyn TableLoad>>) {
    if let Some(live) = session {
        if let Err(err) = live.abort().await {
            warn!(table = %table, "Failed to abort load session: {err}");
        }
    }
}
