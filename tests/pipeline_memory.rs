//! Full engine runs over the in-memory source and destination backends.
//!
//! These tests exercise the orchestrator's observable guarantees end to
//! end: chunk boundaries, watermark advancement and resume, strategy
//! semantics under injected faults, worker-pool reporting, and
//! cancellation.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use warehouse_sync::memory::{MemoryDestination, MemorySource};
use warehouse_sync::{
    ColumnType, CursorSpec, CursorValue, ErrorKind, MemoryStore, Pipeline, Row, RunOptions,
    TableOutcome, TableRunConfig, TableSchema, Value, WatermarkStore, WriteStrategy,
};

fn engine(
    source: &Arc<MemorySource>,
    destination: &Arc<MemoryDestination>,
    store: &Arc<MemoryStore>,
    options: RunOptions,
) -> Pipeline {
    Pipeline::new(source.clone(), destination.clone(), store.clone(), options)
}

fn orders_schema() -> TableSchema {
    TableSchema::new("orders")
        .with_column("id", ColumnType::Int, false)
        .with_column("updated_at", ColumnType::Timestamp, false)
        .with_column("amount", ColumnType::Float, true)
        .with_primary_key(["id"])
}

fn order_row(id: i64, updated_at: DateTime<Utc>) -> Row {
    Row::new(vec![
        Value::Int(id),
        Value::Timestamp(updated_at),
        Value::Float(id as f64 * 1.5),
    ])
}

fn family_schema() -> TableSchema {
    TableSchema::new("family")
        .with_column("rfam_acc", ColumnType::Text, false)
        .with_column("description", ColumnType::Text, true)
        .with_column("updated", ColumnType::Timestamp, false)
        .with_primary_key(["rfam_acc"])
}

fn family_row(acc: &str, description: &str, updated: DateTime<Utc>) -> Row {
    Row::new(vec![
        Value::Text(acc.to_string()),
        Value::Text(description.to_string()),
        Value::Timestamp(updated),
    ])
}

fn items_schema() -> TableSchema {
    TableSchema::new("items")
        .with_column("id", ColumnType::Int, false)
        .with_column("name", ColumnType::Text, false)
        .with_primary_key(["id"])
}

fn item(id: i64) -> Row {
    Row::new(vec![Value::Int(id), Value::Text(format!("item-{id}"))])
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

#[tokio::test]
async fn orders_stream_chunks_and_advances_to_max_cursor() {
    let row_count: i64 = 250_000;
    let rows: Vec<Row> = (1..=row_count)
        .map(|id| order_row(id, base_time() + Duration::seconds(id)))
        .collect();
    let source = Arc::new(MemorySource::new().with_table(orders_schema(), rows));
    let destination = Arc::new(MemoryDestination::new());
    let store = Arc::new(MemoryStore::new());

    let options = RunOptions {
        chunk_size: 100_000,
        workers: 1,
        ..RunOptions::default()
    };
    let config = TableRunConfig::new("orders", WriteStrategy::Merge)
        .with_cursor(CursorSpec::new("updated_at"));
    let report = engine(&source, &destination, &store, options)
        .run(vec![config], CancellationToken::new())
        .await
        .unwrap();

    let orders = report.table("orders").unwrap();
    assert_eq!(orders.outcome, TableOutcome::Done);
    assert_eq!(orders.chunks_loaded, 3, "250k rows at 100k per chunk");
    assert_eq!(orders.rows_extracted, row_count as u64);
    assert_eq!(orders.rows_loaded, row_count as u64);

    let max_updated = base_time() + Duration::seconds(row_count);
    assert_eq!(
        orders.final_watermark,
        Some(CursorValue::Timestamp(max_updated))
    );
    let stored = store.get("orders").await.unwrap().unwrap();
    assert_eq!(stored.cursor_column, "updated_at");
    assert_eq!(stored.value, CursorValue::Timestamp(max_updated));
    assert_eq!(
        destination.rows("orders").unwrap().len(),
        row_count as usize
    );
}

#[tokio::test]
async fn merge_without_primary_key_fails_before_reading_rows() {
    let clan = TableSchema::new("clan")
        .with_column("clan_acc", ColumnType::Text, false)
        .with_column("name", ColumnType::Text, true);
    let source = Arc::new(MemorySource::new().with_table(
        clan,
        vec![Row::new(vec![
            Value::Text("CL001".to_string()),
            Value::Text("tRNA clan".to_string()),
        ])],
    ));
    let destination = Arc::new(MemoryDestination::new());
    let store = Arc::new(MemoryStore::new());

    let config = TableRunConfig::new("clan", WriteStrategy::Merge);
    let report = engine(&source, &destination, &store, RunOptions::default())
        .run(vec![config], CancellationToken::new())
        .await
        .unwrap();

    let clan = report.table("clan").unwrap();
    assert_eq!(clan.outcome, TableOutcome::Failed);
    assert_eq!(
        clan.last_error().unwrap().kind,
        ErrorKind::MissingPrimaryKey
    );
    assert_eq!(clan.rows_extracted, 0);
    assert_eq!(source.rows_read(), 0, "validation must precede extraction");
    assert!(destination.table_names().is_empty());
}

#[tokio::test]
async fn merge_redelivery_is_idempotent() {
    let rows: Vec<Row> = (1..=6)
        .map(|i| {
            family_row(
                &format!("RF{i:05}"),
                "ncRNA family",
                base_time() + Duration::minutes(i),
            )
        })
        .collect();
    let source = Arc::new(MemorySource::new().with_table(family_schema(), rows));
    let destination = Arc::new(MemoryDestination::new());

    let config = || {
        TableRunConfig::new("family", WriteStrategy::Merge).with_cursor(CursorSpec::new("updated"))
    };

    let first = engine(
        &source,
        &destination,
        &Arc::new(MemoryStore::new()),
        RunOptions::default(),
    )
    .run(vec![config()], CancellationToken::new())
    .await
    .unwrap();
    assert_eq!(first.table("family").unwrap().outcome, TableOutcome::Done);
    let after_first = destination.rows("family").unwrap();
    assert_eq!(after_first.len(), 6);

    // A fresh watermark store redelivers every row, as after a crash
    // between destination write and watermark advance.
    let second = engine(
        &source,
        &destination,
        &Arc::new(MemoryStore::new()),
        RunOptions::default(),
    )
    .run(vec![config()], CancellationToken::new())
    .await
    .unwrap();
    assert_eq!(second.table("family").unwrap().rows_extracted, 6);
    assert_eq!(destination.rows("family").unwrap(), after_first);
}

#[tokio::test]
async fn failed_replace_keeps_prior_destination_contents() {
    let countries = TableSchema::new("countries")
        .with_column("id", ColumnType::Int, false)
        .with_column("code", ColumnType::Text, false)
        .with_primary_key(["id"]);
    let prior = vec![
        Row::new(vec![Value::Int(1), Value::Text("old-a".to_string())]),
        Row::new(vec![Value::Int(2), Value::Text("old-b".to_string())]),
    ];
    let fresh: Vec<Row> = (1..=5)
        .map(|i| Row::new(vec![Value::Int(i), Value::Text(format!("new-{i}"))]))
        .collect();

    let source = Arc::new(MemorySource::new().with_table(countries.clone(), fresh));
    let destination = Arc::new(MemoryDestination::new());
    destination.seed(countries, prior.clone());
    destination.fail_after_chunks("countries", 1);
    let store = Arc::new(MemoryStore::new());

    let options = RunOptions {
        chunk_size: 2,
        ..RunOptions::default()
    };
    let config =
        TableRunConfig::new("countries", WriteStrategy::Replace).with_cursor(CursorSpec::new("id"));
    let report = engine(&source, &destination, &store, options)
        .run(vec![config], CancellationToken::new())
        .await
        .unwrap();

    let countries = report.table("countries").unwrap();
    assert_eq!(countries.outcome, TableOutcome::Failed);
    assert_eq!(countries.errors.len(), 3, "retried up to the failure cap");
    assert!(countries.errors.iter().all(|e| e.kind == ErrorKind::Load));

    // Nothing swapped in, nothing advanced.
    assert_eq!(destination.rows("countries").unwrap(), prior);
    assert!(store.get("countries").await.unwrap().is_none());
}

#[tokio::test]
async fn append_redelivers_rows_as_duplicates() {
    let events = TableSchema::new("events")
        .with_column("id", ColumnType::Int, false)
        .with_column("note", ColumnType::Text, false);
    let rows: Vec<Row> = (1..=3)
        .map(|i| Row::new(vec![Value::Int(i), Value::Text(format!("event-{i}"))]))
        .collect();
    let source = Arc::new(MemorySource::new().with_table(events, rows));
    let destination = Arc::new(MemoryDestination::new());

    let config =
        || TableRunConfig::new("events", WriteStrategy::Append).with_cursor(CursorSpec::new("id"));

    engine(
        &source,
        &destination,
        &Arc::new(MemoryStore::new()),
        RunOptions::default(),
    )
    .run(vec![config()], CancellationToken::new())
    .await
    .unwrap();
    assert_eq!(destination.rows("events").unwrap().len(), 3);

    // Append has no dedup: losing the watermark doubles the table.
    engine(
        &source,
        &destination,
        &Arc::new(MemoryStore::new()),
        RunOptions::default(),
    )
    .run(vec![config()], CancellationToken::new())
    .await
    .unwrap();
    assert_eq!(destination.rows("events").unwrap().len(), 6);
}

#[tokio::test]
async fn worker_pool_reports_every_table() {
    let source = Arc::new(
        MemorySource::new()
            .with_table(
                family_schema(),
                vec![family_row("RF00001", "5S rRNA", base_time())],
            )
            .with_table(items_schema(), vec![item(1), item(2)]),
    );
    let destination = Arc::new(MemoryDestination::new());
    let store = Arc::new(MemoryStore::new());

    let options = RunOptions {
        workers: 2,
        ..RunOptions::default()
    };
    let configs = vec![
        TableRunConfig::new("family", WriteStrategy::Merge).with_cursor(CursorSpec::new("updated")),
        TableRunConfig::new("items", WriteStrategy::Merge).with_cursor(CursorSpec::new("id")),
    ];
    let report = engine(&source, &destination, &store, options)
        .run(configs, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.tables.len(), 2);
    assert!(report.all_succeeded());
    assert_eq!(report.table("family").unwrap().rows_loaded, 1);
    assert_eq!(report.table("items").unwrap().rows_loaded, 2);
    assert_eq!(report.total_rows_loaded(), 3);
}

#[tokio::test]
async fn second_run_resumes_from_stored_watermark() {
    let source = Arc::new(MemorySource::new().with_table(
        items_schema(),
        vec![item(1), item(2), item(3)],
    ));
    let destination = Arc::new(MemoryDestination::new());
    let store = Arc::new(MemoryStore::new());

    let pipeline = engine(&source, &destination, &store, RunOptions::default());
    let config =
        || TableRunConfig::new("items", WriteStrategy::Merge).with_cursor(CursorSpec::new("id"));

    let first = pipeline
        .run(vec![config()], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        first.table("items").unwrap().final_watermark,
        Some(CursorValue::Int(3))
    );

    source.push_rows("items", vec![item(4), item(5)]).unwrap();
    let second = pipeline
        .run(vec![config()], CancellationToken::new())
        .await
        .unwrap();

    let items = second.table("items").unwrap();
    assert_eq!(items.rows_extracted, 2, "only rows past the watermark");
    assert_eq!(items.final_watermark, Some(CursorValue::Int(5)));
    assert_eq!(destination.rows("items").unwrap().len(), 5);
    assert_eq!(source.rows_read(), 5, "no row was served twice");
}

#[tokio::test]
async fn transient_stream_fault_retries_without_duplicates() {
    let rows: Vec<Row> = (1..=10).map(item).collect();
    let source = Arc::new(MemorySource::new().with_table(items_schema(), rows));
    source.fail_once_after_rows("items", 4).unwrap();
    let destination = Arc::new(MemoryDestination::new());
    let store = Arc::new(MemoryStore::new());

    let options = RunOptions {
        chunk_size: 3,
        ..RunOptions::default()
    };
    let config =
        TableRunConfig::new("items", WriteStrategy::Merge).with_cursor(CursorSpec::new("id"));
    let report = engine(&source, &destination, &store, options)
        .run(vec![config], CancellationToken::new())
        .await
        .unwrap();

    let items = report.table("items").unwrap();
    assert_eq!(items.outcome, TableOutcome::Done);
    assert_eq!(items.errors.len(), 1);
    assert_eq!(items.errors[0].kind, ErrorKind::Extraction);
    assert_eq!(items.rows_loaded, 10);
    assert_eq!(items.final_watermark, Some(CursorValue::Int(10)));

    // The reopened stream re-extracted the in-flight row; merge absorbed
    // the redelivery.
    assert_eq!(items.rows_extracted, 11);
    assert_eq!(destination.rows("items").unwrap().len(), 10);
}

#[tokio::test]
async fn consecutive_destination_failures_fail_the_table() {
    let source = Arc::new(MemorySource::new().with_table(
        items_schema(),
        vec![item(1), item(2), item(3), item(4)],
    ));
    let destination = Arc::new(MemoryDestination::new());
    destination.fail_after_chunks("items", 0);
    let store = Arc::new(MemoryStore::new());

    let options = RunOptions {
        chunk_size: 2,
        max_chunk_failures: 3,
        ..RunOptions::default()
    };
    let config =
        TableRunConfig::new("items", WriteStrategy::Append).with_cursor(CursorSpec::new("id"));
    let report = engine(&source, &destination, &store, options)
        .run(vec![config], CancellationToken::new())
        .await
        .unwrap();

    let items = report.table("items").unwrap();
    assert_eq!(items.outcome, TableOutcome::Failed);
    assert_eq!(items.errors.len(), 3);
    assert!(items.errors.iter().all(|e| e.kind == ErrorKind::Load));
    assert_eq!(items.rows_loaded, 0);
    assert!(destination.rows("items").unwrap().is_empty());
    assert!(store.get("items").await.unwrap().is_none());
}

#[tokio::test]
async fn repeated_stream_faults_fail_replace_at_the_cap() {
    let source = Arc::new(MemorySource::new().with_table(items_schema(), (1..=6).map(item).collect()));
    source.fail_after_rows("items", 5).unwrap();
    let destination = Arc::new(MemoryDestination::new());
    let store = Arc::new(MemoryStore::new());

    let options = RunOptions {
        chunk_size: 2,
        max_chunk_failures: 3,
        ..RunOptions::default()
    };
    let config = TableRunConfig::new("items", WriteStrategy::Replace);
    let report = engine(&source, &destination, &store, options)
        .run(vec![config], CancellationToken::new())
        .await
        .unwrap();

    // Every attempt re-applies two chunks and then hits the same fault;
    // the re-applied chunks do not reset the cap.
    let items = report.table("items").unwrap();
    assert_eq!(items.outcome, TableOutcome::Failed);
    assert_eq!(items.errors.len(), 3);
    assert!(items.errors.iter().all(|e| e.kind == ErrorKind::Extraction));
    assert_eq!(items.rows_loaded, 0);
    assert_eq!(source.rows_read(), 15, "three attempts, five rows each");
    assert!(destination.rows("items").is_none(), "nothing swapped in");
    assert!(store.get("items").await.unwrap().is_none());
}

#[tokio::test]
async fn fault_without_watermark_progress_fails_at_the_cap() {
    // All rows share one cursor value: no chunk can advance the watermark,
    // so every retry restarts the stream from scratch.
    let readings = TableSchema::new("readings")
        .with_column("id", ColumnType::Int, false)
        .with_column("batch", ColumnType::Int, false)
        .with_primary_key(["id"]);
    let rows: Vec<Row> = (1..=6)
        .map(|i| Row::new(vec![Value::Int(i), Value::Int(7)]))
        .collect();
    let source = Arc::new(MemorySource::new().with_table(readings, rows));
    source.fail_after_rows("readings", 5).unwrap();
    let destination = Arc::new(MemoryDestination::new());
    let store = Arc::new(MemoryStore::new());

    let options = RunOptions {
        chunk_size: 2,
        max_chunk_failures: 3,
        ..RunOptions::default()
    };
    let config =
        TableRunConfig::new("readings", WriteStrategy::Merge).with_cursor(CursorSpec::new("batch"));
    let report = engine(&source, &destination, &store, options)
        .run(vec![config], CancellationToken::new())
        .await
        .unwrap();

    let readings = report.table("readings").unwrap();
    assert_eq!(readings.outcome, TableOutcome::Failed);
    assert_eq!(readings.errors.len(), 3, "one fault per restart, capped");
    assert!(readings.errors.iter().all(|e| e.kind == ErrorKind::Extraction));
    assert!(readings.final_watermark.is_none());
    assert!(store.get("readings").await.unwrap().is_none());
    assert_eq!(source.rows_read(), 15, "three bounded attempts");
    // The chunks each attempt reached were merged; redelivery deduped.
    assert_eq!(destination.rows("readings").unwrap().len(), 4);
}

#[tokio::test]
async fn cancelled_run_reports_cancelled_tables() {
    let source = Arc::new(
        MemorySource::new()
            .with_table(items_schema(), vec![item(1)])
            .with_table(
                family_schema(),
                vec![family_row("RF00001", "5S rRNA", base_time())],
            ),
    );
    let destination = Arc::new(MemoryDestination::new());
    let store = Arc::new(MemoryStore::new());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let configs = vec![
        TableRunConfig::new("items", WriteStrategy::Merge).with_cursor(CursorSpec::new("id")),
        TableRunConfig::new("family", WriteStrategy::Merge).with_cursor(CursorSpec::new("updated")),
    ];
    let report = engine(&source, &destination, &store, RunOptions::default())
        .run(configs, cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.tables.len(), 2);
    assert!(report
        .tables
        .iter()
        .all(|t| t.outcome == TableOutcome::Cancelled));
    assert_eq!(source.rows_read(), 0);
    assert!(destination.table_names().is_empty());
}

#[tokio::test]
async fn dry_run_reads_rows_but_writes_nothing() {
    let source = Arc::new(MemorySource::new().with_table(
        items_schema(),
        vec![item(1), item(2), item(3)],
    ));
    let destination = Arc::new(MemoryDestination::new());
    let store = Arc::new(MemoryStore::new());

    let options = RunOptions {
        dry_run: true,
        ..RunOptions::default()
    };
    let config =
        TableRunConfig::new("items", WriteStrategy::Merge).with_cursor(CursorSpec::new("id"));
    let report = engine(&source, &destination, &store, options)
        .run(vec![config], CancellationToken::new())
        .await
        .unwrap();

    let items = report.table("items").unwrap();
    assert_eq!(items.outcome, TableOutcome::Done);
    assert_eq!(items.rows_extracted, 3);
    assert_eq!(items.rows_loaded, 3, "counts rows that would have loaded");
    assert!(items.final_watermark.is_none());
    assert!(destination.table_names().is_empty());
    assert!(store.get("items").await.unwrap().is_none());
}

#[tokio::test]
async fn colliding_destination_names_are_rejected() {
    let source = Arc::new(MemorySource::new());
    let destination = Arc::new(MemoryDestination::new());
    let store = Arc::new(MemoryStore::new());

    let configs = vec![
        TableRunConfig::new("OrderItems", WriteStrategy::Append),
        TableRunConfig::new("order_items", WriteStrategy::Append),
    ];
    let err = engine(&source, &destination, &store, RunOptions::default())
        .run(configs, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    let duplicated = vec![
        TableRunConfig::new("items", WriteStrategy::Append),
        TableRunConfig::new("items", WriteStrategy::Append),
    ];
    let err = engine(&source, &destination, &store, RunOptions::default())
        .run(duplicated, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}
