// crates/sqlite-relay-core/src/coordinator/tests.rs
// ============================================================================
// Module: Request Coordinator Tests
// Description: Unit tests for the pending queue and result waiter.
// Purpose: Validate claim-once semantics, timeouts, capacity, and orphans.
// Dependencies: sqlite-relay-core
// ============================================================================

//! ## Overview
//! Exercises the coordinator directly, without an engine: records are
//! enqueued, filled through the collector hooks, finished, and claimed.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions use unwrap/expect for clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use super::Coordinator;
use super::CoordinatorConfig;
use super::RecordState;
use crate::admission::OperationKind;
use crate::correlation::CorrelationIdGenerator;
use crate::engine::ExecSummary;
use crate::error::RelayError;
use crate::value::Row;
use crate::value::Value;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn name(value: &str) -> Arc<str> {
    Arc::from(value)
}

fn single_row(column: &str, value: Value) -> Row {
    Row::new(vec![column.to_string()].into(), vec![value])
}

// ============================================================================
// SECTION: Queue Tests
// ============================================================================

#[test]
fn enqueue_tracks_record_until_claimed() {
    let coordinator = Coordinator::default();
    let id = coordinator.enqueue(&name("conn1"), "SELECT 1", OperationKind::ScalarFetch).unwrap();
    assert_eq!(coordinator.len(), 1);
    let snapshot = coordinator.find(&id).unwrap();
    assert_eq!(snapshot.state, RecordState::Queued);
    assert_eq!(snapshot.request, "SELECT 1");

    assert!(coordinator.mark_started(&id));
    assert!(coordinator.append_row(&id, single_row("1", Value::Integer(1))));
    assert_eq!(coordinator.find(&id).unwrap().state, RecordState::Started);
    assert!(coordinator.mark_finished(&id, Ok(ExecSummary::default())));
    assert_eq!(coordinator.find(&id).unwrap().state, RecordState::Finished);
    assert!(coordinator.contains(&id));

    let result = coordinator.await_result(&id, Duration::from_secs(1)).unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.columns[0].name, "1");
    assert_eq!(result.first_value(), Some(&Value::Integer(1)));
    assert!(coordinator.is_empty());
    assert!(coordinator.find(&id).is_none());
}

#[test]
fn second_await_reports_not_found() {
    let coordinator = Coordinator::default();
    let id = coordinator.enqueue(&name("conn1"), "SELECT 1", OperationKind::RowFetch).unwrap();
    coordinator.mark_finished(&id, Ok(ExecSummary::default()));
    assert!(coordinator.await_result(&id, Duration::from_secs(1)).is_ok());
    assert_eq!(
        coordinator.await_result(&id, Duration::from_secs(1)),
        Err(RelayError::NotFound(id.clone()))
    );
}

#[test]
fn failed_record_returns_its_error_and_is_removed() {
    let coordinator = Coordinator::default();
    let id = coordinator.enqueue(&name("conn1"), "UPDATE t", OperationKind::NonQuery).unwrap();
    coordinator.append_row(&id, single_row("x", Value::Null));
    coordinator.mark_finished(&id, Err(RelayError::Locked("table t".to_string())));
    assert_eq!(
        coordinator.await_result(&id, Duration::from_secs(1)),
        Err(RelayError::Locked("table t".to_string()))
    );
    assert!(coordinator.is_empty());
    assert_eq!(coordinator.stats_snapshot().errors.locked, 1);
}

#[test]
fn rows_for_unknown_ids_are_discarded() {
    let coordinator = Coordinator::default();
    let id = coordinator.enqueue(&name("conn1"), "SELECT 1", OperationKind::RowFetch).unwrap();
    coordinator.mark_finished(&id, Ok(ExecSummary::default()));
    coordinator.await_result(&id, Duration::from_secs(1)).unwrap();
    assert!(!coordinator.append_row(&id, single_row("late", Value::Integer(1))));
    assert!(!coordinator.mark_finished(&id, Ok(ExecSummary::default())));
    assert_eq!(coordinator.stats_snapshot().rows_discarded, 1);
}

#[test]
fn capacity_rejects_with_retry_hint() {
    let config = CoordinatorConfig {
        max_pending_requests: 2,
        ..CoordinatorConfig::default()
    };
    let coordinator = Coordinator::new(config).unwrap();
    let conn = name("conn1");
    coordinator.enqueue(&conn, "a", OperationKind::RawQuery).unwrap();
    coordinator.enqueue(&conn, "b", OperationKind::RawQuery).unwrap();
    let err = coordinator.enqueue(&conn, "c", OperationKind::RawQuery).unwrap_err();
    assert!(matches!(err, RelayError::Overloaded { retry_after_ms: Some(10), .. }));
    assert!(err.is_retryable());
    assert_eq!(coordinator.stats_snapshot().rejected, 1);
}

#[test]
fn invalid_config_is_rejected() {
    let config = CoordinatorConfig {
        max_pending_requests: 0,
        ..CoordinatorConfig::default()
    };
    assert!(Coordinator::new(config).is_err());
    let config = CoordinatorConfig {
        default_await_timeout_ms: 0,
        ..CoordinatorConfig::default()
    };
    assert!(Coordinator::new(config).is_err());
}

#[test]
fn sequence_exhaustion_surfaces_on_enqueue() {
    let coordinator = Coordinator::with_generator(
        CoordinatorConfig::default(),
        CorrelationIdGenerator::starting_after(u64::MAX),
    )
    .unwrap();
    let err = coordinator.enqueue(&name("conn1"), "SELECT 1", OperationKind::RowFetch);
    assert_eq!(err, Err(RelayError::SequenceExhausted));
    assert!(coordinator.is_empty());
}

#[test]
fn pending_for_counts_per_connection() {
    let coordinator = Coordinator::default();
    coordinator.enqueue(&name("left"), "a", OperationKind::RowFetch).unwrap();
    coordinator.enqueue(&name("left"), "b", OperationKind::RowFetch).unwrap();
    coordinator.enqueue(&name("right"), "c", OperationKind::RowFetch).unwrap();
    assert_eq!(coordinator.pending_for("left"), 2);
    assert_eq!(coordinator.pending_for("right"), 1);
    assert_eq!(coordinator.pending_for("other"), 0);
}

#[test]
fn retry_reset_clears_rows() {
    let coordinator = Coordinator::default();
    let id = coordinator.enqueue(&name("conn1"), "SELECT 1", OperationKind::RowFetch).unwrap();
    coordinator.append_row(&id, single_row("a", Value::Integer(1)));
    assert_eq!(coordinator.reset_for_retry(&id), Some(1));
    assert_eq!(coordinator.find(&id).unwrap().row_count, 0);
    coordinator.mark_finished(&id, Ok(ExecSummary::default()));
    let result = coordinator.await_result(&id, Duration::from_secs(1)).unwrap();
    assert_eq!(result.lock_retries, 1);
    assert!(result.columns.is_empty());
}

// ============================================================================
// SECTION: Waiter Tests
// ============================================================================

#[test]
fn waiter_times_out_within_bound() {
    let coordinator = Coordinator::default();
    let id = coordinator.enqueue(&name("conn1"), "SELECT 1", OperationKind::RowFetch).unwrap();
    let started = Instant::now();
    let err = coordinator.await_result(&id, Duration::from_millis(20)).unwrap_err();
    assert!(matches!(err, RelayError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
    let snapshot = coordinator.find(&id).unwrap();
    assert!(snapshot.abandoned);
    assert_eq!(coordinator.stats_snapshot().timed_out, 1);
}

#[test]
fn abandoned_record_is_dropped_on_completion() {
    let coordinator = Coordinator::default();
    let id = coordinator.enqueue(&name("conn1"), "SELECT 1", OperationKind::RowFetch).unwrap();
    assert!(coordinator.await_result(&id, Duration::from_millis(5)).is_err());
    assert!(coordinator.mark_finished(&id, Ok(ExecSummary::default())));
    assert!(!coordinator.contains(&id));
    assert_eq!(
        coordinator.await_result(&id, Duration::from_millis(5)),
        Err(RelayError::NotFound(id.clone()))
    );
    assert_eq!(coordinator.stats_snapshot().orphans_dropped, 1);
}

#[test]
fn re_await_after_timeout_resumes_waiting() {
    let coordinator = Arc::new(Coordinator::default());
    let id = coordinator.enqueue(&name("conn1"), "SELECT 1", OperationKind::RowFetch).unwrap();
    assert!(coordinator.await_result(&id, Duration::from_millis(5)).is_err());

    let finisher = Arc::clone(&coordinator);
    let finish_id = id.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        finisher.append_row(&finish_id, single_row("v", Value::Integer(7)));
        finisher.mark_finished(&finish_id, Ok(ExecSummary::default()));
    });
    let result = coordinator.await_result(&id, Duration::from_secs(5)).unwrap();
    handle.join().unwrap();
    assert_eq!(result.first_value(), Some(&Value::Integer(7)));
}

#[test]
fn waiter_wakes_when_another_thread_finishes() {
    let coordinator = Arc::new(Coordinator::default());
    let id = coordinator.enqueue(&name("conn1"), "SELECT 1", OperationKind::RowFetch).unwrap();
    let finisher = Arc::clone(&coordinator);
    let finish_id = id.clone();
    let handle = thread::spawn(move || {
        finisher.mark_started(&finish_id);
        for value in 0 .. 3 {
            finisher.append_row(&finish_id, single_row("n", Value::Integer(value)));
        }
        finisher.mark_finished(&finish_id, Ok(ExecSummary::default()));
    });
    let result = coordinator.await_result(&id, Duration::ZERO).unwrap();
    handle.join().unwrap();
    let values: Vec<_> = result.rows.iter().filter_map(|row| row.value(0).cloned()).collect();
    assert_eq!(values, vec![Value::Integer(0), Value::Integer(1), Value::Integer(2)]);
    assert!(result.started_at.is_some());
    assert!(result.ended_at.is_some());
    let stats = coordinator.stats_snapshot();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.await_wait_histogram_us.iter().sum::<u64>(), 1);
}

#[test]
fn discard_removes_unrun_record() {
    let coordinator = Coordinator::default();
    let id = coordinator.enqueue(&name("conn1"), "SELECT 1", OperationKind::RowFetch).unwrap();
    assert!(coordinator.discard(&id));
    assert!(!coordinator.discard(&id));
    assert!(coordinator.is_empty());
}
