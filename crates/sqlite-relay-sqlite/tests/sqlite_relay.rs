// crates/sqlite-relay-sqlite/tests/sqlite_relay.rs
// ============================================================================
// Module: SQLite Relay Integration Tests
// Description: End-to-end tests of relay connections over bundled SQLite.
// Purpose: Validate correlation, ordering, contention, and backup on disk.
// Dependencies: sqlite-relay-core, sqlite-relay-sqlite, tempfile
// ============================================================================

//! ## Overview
//! Integration tests running real statements through [`SqliteConnection`]:
//! - Scalar and row fetch scenarios
//! - Issue-order completion and concurrent callers sharing one connection
//! - Busy surfacing, opt-in lock retry, and interrupt on timeout
//! - Savepoints issued through the dispatch path
//! - Online backup, file backup, and cloning

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use sqlite_relay_core::BackupPolicy;
use sqlite_relay_core::BackupProgress;
use sqlite_relay_core::Coordinator;
use sqlite_relay_core::DataType;
use sqlite_relay_core::DispatchOptions;
use sqlite_relay_core::OperationKind;
use sqlite_relay_core::RecordState;
use sqlite_relay_core::RelayError;
use sqlite_relay_core::Value;
use sqlite_relay_sqlite::SqliteConnection;
use sqlite_relay_sqlite::SqliteEngineConfig;
use sqlite_relay_sqlite::SqliteJournalMode;
use sqlite_relay_sqlite::backup_to_file;
use sqlite_relay_sqlite::begin_savepoint;
use sqlite_relay_sqlite::clone_database;
use sqlite_relay_sqlite::commit_savepoint;
use sqlite_relay_sqlite::open_connection;
use sqlite_relay_sqlite::open_in_memory;
use sqlite_relay_sqlite::rollback_savepoint;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn memory(name: &str) -> SqliteConnection {
    open_in_memory(name, Arc::new(Coordinator::default())).unwrap()
}

fn file_config(name: &str, path: &Path) -> SqliteEngineConfig {
    SqliteEngineConfig {
        journal_mode: SqliteJournalMode::Delete,
        busy_timeout_ms: 0,
        ..SqliteEngineConfig::file(name, path)
    }
}

fn open_file(
    name: &str,
    path: &Path,
    coordinator: &Arc<Coordinator>,
    options: DispatchOptions,
) -> SqliteConnection {
    open_connection(&file_config(name, path), Arc::clone(coordinator), options).unwrap()
}

fn seed(connection: &SqliteConnection, rows: i64) {
    connection.execute("CREATE TABLE items(id INTEGER PRIMARY KEY, label TEXT)").unwrap();
    for id in 1 ..= rows {
        connection
            .execute_non_query(
                "INSERT INTO items(id, label) VALUES (?1, ?2)",
                &[Value::Integer(id), Value::Text(format!("item-{id}"))],
            )
            .unwrap();
    }
}

fn count_items(connection: &SqliteConnection) -> Value {
    connection.execute_scalar("SELECT COUNT(*) FROM items", &[]).unwrap()
}

fn wait_until(limit: Duration, mut predicate: impl FnMut() -> bool) {
    let deadline = Instant::now() + limit;
    while !predicate() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

// ============================================================================
// SECTION: Scenarios
// ============================================================================

#[test]
fn select_one_returns_single_integer_row() {
    let connection = memory("conn1");
    let id = connection.issue("SELECT 1", &[], OperationKind::ScalarFetch).unwrap();
    assert!(id.to_string().ends_with("_conn1"));
    let result = connection.await_result(&id, Duration::ZERO).unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get("1"), Some(&Value::Integer(1)));
    assert_eq!(result.first_value(), Some(&Value::Integer(1)));
    assert!(connection.coordinator().is_empty());
}

#[test]
fn data_table_carries_column_metadata() {
    let connection = memory("table");
    seed(&connection, 3);
    let result =
        connection.get_data_table("SELECT id, label FROM items ORDER BY id", &[]).unwrap();
    assert_eq!(result.rows.len(), 3);
    let names: Vec<_> = result.columns.iter().map(|column| column.name.as_str()).collect();
    assert_eq!(names, vec!["id", "label"]);
    assert_eq!(result.columns[0].data_type, DataType::Integer);
    assert_eq!(result.columns[1].data_type, DataType::Text);
    assert_eq!(result.rows[2].get("label"), Some(&Value::Text("item-3".to_string())));
}

#[test]
fn numeric_text_is_read_back_as_integer() {
    let connection = memory("coerce");
    let value = connection.execute_scalar("SELECT '42'", &[]).unwrap();
    assert_eq!(value, Value::Integer(42));
    let value = connection.execute_scalar("SELECT 'forty-two'", &[]).unwrap();
    assert_eq!(value, Value::Text("forty-two".to_string()));
}

#[test]
fn direct_execute_runs_batches_and_reports_changes() {
    let connection = memory("batch");
    connection.execute("CREATE TABLE t(a INTEGER)").unwrap();
    let changed = connection
        .execute("INSERT INTO t VALUES (1); INSERT INTO t VALUES (2); INSERT INTO t VALUES (3);")
        .unwrap();
    assert_eq!(changed, 3);
    let summary =
        connection.execute_non_query("DELETE FROM t WHERE a > ?1", &[Value::Integer(1)]).unwrap();
    assert_eq!(summary.rows_affected, 2);
    assert_eq!(summary.statements, 1);
}

#[test]
fn malformed_requests_surface_immediately() {
    let connection = memory("malformed");
    seed(&connection, 1);
    assert!(matches!(
        connection.query("SELECT label FROM items WHERE id = ?1", &[]),
        Err(RelayError::Malformed(_))
    ));
    assert!(matches!(
        connection.query(
            "SELECT label FROM items WHERE id = ?1",
            &[Value::Integer(1), Value::Integer(2)],
        ),
        Err(RelayError::Malformed(_))
    ));
    assert!(matches!(
        connection.execute_scalar("SELECT id, label FROM items", &[]),
        Err(RelayError::Malformed(_))
    ));
    assert_eq!(
        connection.execute_scalar("SELECT id FROM items WHERE id = 99", &[]).unwrap(),
        Value::Null
    );
    assert!(matches!(connection.query("SELEC 1", &[]), Err(RelayError::Engine(_))));
    assert!(connection.is_open());
}

// ============================================================================
// SECTION: Ordering and Concurrency
// ============================================================================

#[test]
fn sequential_inserts_land_in_issue_order() {
    let connection = memory("ordered");
    connection.execute("CREATE TABLE log(seq INTEGER PRIMARY KEY, tag TEXT)").unwrap();
    for index in 0 .. 25 {
        let tag = Value::from(format!("t{index}"));
        connection.execute_non_query("INSERT INTO log(tag) VALUES (?1)", &[tag]).unwrap();
    }
    let result = connection.get_data_table("SELECT tag FROM log ORDER BY seq", &[]).unwrap();
    let tags: Vec<_> = result
        .rows
        .iter()
        .map(|row| row.get("tag").and_then(Value::as_text).unwrap().to_string())
        .collect();
    let expected: Vec<_> = (0 .. 25).map(|index| format!("t{index}")).collect();
    assert_eq!(tags, expected);
}

#[test]
fn fifty_concurrent_callers_receive_their_own_rows() {
    let connection = memory("shared");
    seed(&connection, 50);
    let handles: Vec<_> = (1 ..= 50_i64)
        .map(|id| {
            let connection = connection.clone();
            thread::spawn(move || {
                let result = connection
                    .get_data_table("SELECT id, label FROM items WHERE id = ?1", &[id.into()])
                    .unwrap();
                (id, result)
            })
        })
        .collect();
    for handle in handles {
        let (id, result) = handle.join().unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].get("id"), Some(&Value::Integer(id)));
        assert_eq!(result.rows[0].get("label"), Some(&Value::Text(format!("item-{id}"))));
    }
    assert!(connection.is_idle());
    assert!(connection.coordinator().is_empty());
    let stats = connection.coordinator().stats_snapshot();
    assert_eq!(stats.received, stats.enqueued);
}

#[test]
fn connections_share_one_correlation_counter() {
    let coordinator = Arc::new(Coordinator::default());
    let left = open_in_memory("left", Arc::clone(&coordinator)).unwrap();
    let right = open_in_memory("right", Arc::clone(&coordinator)).unwrap();
    let a = left.issue("SELECT 1", &[], OperationKind::RawQuery).unwrap();
    let b = right.issue("SELECT 2", &[], OperationKind::RawQuery).unwrap();
    assert!(a.sequence() < b.sequence());
    assert_ne!(a, b);
    let second = right.await_result(&b, Duration::ZERO).unwrap();
    let first = left.await_result(&a, Duration::ZERO).unwrap();
    assert_eq!(second.first_value(), Some(&Value::Integer(2)));
    assert_eq!(first.first_value(), Some(&Value::Integer(1)));
}

// ============================================================================
// SECTION: Contention
// ============================================================================

#[test]
fn busy_database_is_reported_without_retry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("busy.db");
    let coordinator = Arc::new(Coordinator::default());
    let holder = open_file("holder", &path, &coordinator, DispatchOptions::default());
    let other = open_file("other", &path, &coordinator, DispatchOptions::default());
    holder.execute("CREATE TABLE t(a INTEGER)").unwrap();
    holder.execute("BEGIN EXCLUSIVE").unwrap();

    let err = other.query("SELECT COUNT(*) FROM t", &[]).unwrap_err();
    assert!(matches!(err, RelayError::Busy(_)));
    assert!(err.is_retryable());
    assert_eq!(coordinator.stats_snapshot().errors.busy, 1);

    holder.execute("COMMIT").unwrap();
    assert_eq!(other.execute_scalar("SELECT COUNT(*) FROM t", &[]).unwrap(), Value::Integer(0));
}

#[test]
fn opted_in_lock_retry_waits_out_a_writer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("retry.db");
    let coordinator = Arc::new(Coordinator::default());
    let holder = open_file("holder", &path, &coordinator, DispatchOptions::default());
    let options = DispatchOptions {
        lock_retry_limit: 40,
        lock_retry_backoff_ms: 25,
        ..DispatchOptions::default()
    };
    let patient = open_file("patient", &path, &coordinator, options);
    holder.execute("CREATE TABLE t(a INTEGER)").unwrap();
    holder.execute("BEGIN EXCLUSIVE").unwrap();
    let releaser = {
        let holder = holder.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            holder.execute("COMMIT").unwrap();
        })
    };
    let result = patient.get_data_table("SELECT COUNT(*) AS n FROM t", &[]).unwrap();
    releaser.join().unwrap();
    assert!(result.lock_retries > 0);
    assert_eq!(result.rows[0].get("n"), Some(&Value::Integer(0)));
}

#[test]
fn timeout_interrupts_long_running_statement_when_enabled() {
    let options = DispatchOptions {
        inline_threshold: 0,
        interrupt_on_timeout: true,
        ..DispatchOptions::default()
    };
    let connection = open_connection(
        &SqliteEngineConfig::in_memory("spinner"),
        Arc::new(Coordinator::default()),
        options,
    )
    .unwrap();
    let id = connection
        .issue(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 2000000000) \
             SELECT COUNT(*) FROM c",
            &[],
            OperationKind::ScalarFetch,
        )
        .unwrap();
    wait_until(Duration::from_secs(5), || {
        let record = connection.coordinator().find(&id);
        record.is_some_and(|record| record.state == RecordState::Started)
    });
    thread::sleep(Duration::from_millis(50));
    let err = connection.await_result(&id, Duration::from_millis(100)).unwrap_err();
    assert!(matches!(err, RelayError::Timeout { .. }));
    wait_until(Duration::from_secs(30), || connection.is_idle());
    wait_until(Duration::from_secs(5), || !connection.coordinator().contains(&id));
    assert_eq!(connection.coordinator().stats_snapshot().orphans_dropped, 1);
    assert_eq!(connection.execute_scalar("SELECT 7", &[]).unwrap(), Value::Integer(7));
}

// ============================================================================
// SECTION: Lifecycle
// ============================================================================

#[test]
fn closed_connection_rejects_requests() {
    let connection = memory("closing");
    connection.close().unwrap();
    assert!(matches!(connection.query("SELECT 1", &[]), Err(RelayError::NotOpen(_))));
    assert!(matches!(connection.close(), Err(RelayError::NotOpen(_))));
}

#[test]
fn read_only_connection_refuses_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ro.db");
    let coordinator = Arc::new(Coordinator::default());
    let writer = open_file("writer", &path, &coordinator, DispatchOptions::default());
    seed(&writer, 2);
    writer.close().unwrap();

    let config = SqliteEngineConfig {
        read_only: true,
        ..file_config("reader", &path)
    };
    let reader = open_connection(&config, coordinator, DispatchOptions::default()).unwrap();
    assert_eq!(count_items(&reader), Value::Integer(2));
    assert!(reader.execute("DELETE FROM items").is_err());
}

// ============================================================================
// SECTION: Savepoints
// ============================================================================

#[test]
fn savepoint_rollback_discards_and_commit_keeps_changes() {
    let connection = memory("savepoints");
    seed(&connection, 1);

    let discarded = begin_savepoint(&connection).unwrap();
    connection.execute("INSERT INTO items(id, label) VALUES (2, 'two')").unwrap();
    assert_eq!(count_items(&connection), Value::Integer(2));
    rollback_savepoint(&connection, &discarded).unwrap();
    assert_eq!(count_items(&connection), Value::Integer(1));

    let kept = begin_savepoint(&connection).unwrap();
    assert_ne!(kept, discarded);
    connection.execute("INSERT INTO items(id, label) VALUES (3, 'three')").unwrap();
    commit_savepoint(&connection, &kept).unwrap();
    assert_eq!(count_items(&connection), Value::Integer(2));
    assert!(matches!(commit_savepoint(&connection, &kept), Err(RelayError::Engine(_))));
}

#[test]
fn savepoint_names_are_validated() {
    let connection = memory("savepoint_names");
    let long = "x".repeat(65);
    for name in ["", "bad\"name", "semi;colon", long.as_str()] {
        assert!(matches!(rollback_savepoint(&connection, name), Err(RelayError::Malformed(_))));
        assert!(matches!(commit_savepoint(&connection, name), Err(RelayError::Malformed(_))));
    }
}

// ============================================================================
// SECTION: Backup
// ============================================================================

#[test]
fn backup_between_connections_copies_all_rows() {
    let coordinator = Arc::new(Coordinator::default());
    let source = open_in_memory("source", Arc::clone(&coordinator)).unwrap();
    let target = open_in_memory("target", coordinator).unwrap();
    seed(&source, 200);
    let policy = BackupPolicy {
        pages_per_step: 1,
        step_sleep_ms: 0,
        ..BackupPolicy::default()
    };
    let mut calls = 0_u32;
    let mut last = None;
    let mut progress = |step: &BackupProgress<'_>| {
        calls += 1;
        last = Some((step.remaining, step.page_count, step.context.to_string()));
    };
    let report = source.backup_to(&target, &policy, "copy", Some(&mut progress)).unwrap();
    assert!(calls >= 1);
    assert_eq!(u64::from(calls), report.steps);
    let (remaining, page_count, context) = last.unwrap();
    assert_eq!(remaining, 0);
    assert!(page_count > 0);
    assert_eq!(context, "copy");
    assert_eq!(count_items(&target), Value::Integer(200));
}

#[test]
fn backup_to_file_writes_readable_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backups").join("snapshot.db");
    let source = memory("live");
    seed(&source, 20);
    let policy = BackupPolicy {
        step_sleep_ms: 0,
        ..BackupPolicy::default()
    };
    let report = backup_to_file(&source, &path, &policy, "nightly", None).unwrap();
    assert_eq!(report.progress.remaining, 0);

    let coordinator = Arc::new(Coordinator::default());
    let restored = open_file("restored", &path, &coordinator, DispatchOptions::default());
    assert_eq!(count_items(&restored), Value::Integer(20));
    assert!(source.is_idle());
}

#[test]
fn clone_refuses_existing_target() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("exists.db");
    std::fs::write(&path, b"").unwrap();
    let source = memory("origin");
    assert!(matches!(clone_database(&source, &path, None), Err(RelayError::Invalid(_))));
}

#[test]
fn clone_copies_into_new_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clone.db");
    let source = memory("origin");
    seed(&source, 5);
    let mut seen = 0_u32;
    let mut progress = |_: &BackupProgress<'_>| seen += 1;
    clone_database(&source, &path, Some(&mut progress)).unwrap();
    assert!(seen >= 1);

    let coordinator = Arc::new(Coordinator::default());
    let copy = open_file("copy", &path, &coordinator, DispatchOptions::default());
    assert_eq!(count_items(&copy), Value::Integer(5));
}
