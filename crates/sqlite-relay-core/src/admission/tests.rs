// crates/sqlite-relay-core/src/admission/tests.rs
// ============================================================================
// Module: Admission Control Tests
// Description: Unit tests for counters, permits, and dispatch options.
// Purpose: Validate inline selection, release on drop, and the busy predicate.
// Dependencies: sqlite-relay-core, serde
// ============================================================================

//! ## Overview
//! Validates that the first caller of a kind runs inline, later callers run
//! concurrently, permits release their slot on every exit path, worker slots
//! are capped, and options reject out-of-range retry and worker settings.

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

use std::panic;
use std::sync::Arc;

use super::Admission;
use super::DispatchOptions;
use super::MAX_LOCK_RETRY_LIMIT;
use super::MAX_WORKERS;
use super::OperationCounters;
use super::OperationKind;
use super::WorkerLimiter;

// ============================================================================
// SECTION: Admission Tests
// ============================================================================

#[test]
fn first_caller_runs_inline_and_later_callers_spawn() {
    let counters = Arc::new(OperationCounters::default());
    let first = counters.admit(OperationKind::RowFetch, 1);
    let second = counters.admit(OperationKind::RowFetch, 1);
    let other_kind = counters.admit(OperationKind::NonQuery, 1);
    assert_eq!(first.admission(), Admission::Inline);
    assert_eq!(second.admission(), Admission::Concurrent);
    assert_eq!(other_kind.admission(), Admission::Inline);
    assert_eq!(counters.active(OperationKind::RowFetch), 2);
    drop(first);
    drop(second);
    drop(other_kind);
    assert!(counters.is_idle());
}

#[test]
fn zero_threshold_always_spawns() {
    let counters = Arc::new(OperationCounters::default());
    let permit = counters.admit(OperationKind::ScalarFetch, 0);
    assert_eq!(permit.admission(), Admission::Concurrent);
    assert_eq!(permit.kind(), OperationKind::ScalarFetch);
}

#[test]
fn busy_predicate_tracks_any_counter() {
    let counters = Arc::new(OperationCounters::default());
    assert!(counters.is_idle());
    let permit = counters.admit(OperationKind::RawQuery, 1);
    assert!(!counters.is_idle());
    let snapshot = counters.snapshot();
    assert_eq!(snapshot.raw_query, 1);
    assert!(!snapshot.is_idle());
    drop(permit);
    assert!(counters.snapshot().is_idle());
}

#[test]
fn permit_is_released_while_unwinding() {
    let counters = Arc::new(OperationCounters::default());
    let shared = Arc::clone(&counters);
    let result = panic::catch_unwind(move || {
        let _permit = shared.admit(OperationKind::DirectExecute, 1);
        panic!("engine call failed");
    });
    assert!(result.is_err());
    assert!(counters.is_idle());
}

#[test]
fn kinds_have_distinct_labels() {
    let labels: Vec<_> = OperationKind::ALL.iter().map(|kind| kind.as_str()).collect();
    let mut unique = labels.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(labels.len(), unique.len());
    assert!(OperationKind::ScalarFetch.produces_rows());
    assert!(!OperationKind::NonQuery.produces_rows());
}

// ============================================================================
// SECTION: Options Tests
// ============================================================================

#[test]
fn default_options_are_valid() {
    let options = DispatchOptions::default();
    assert_eq!(options.inline_threshold, 1);
    assert_eq!(options.lock_retry_limit, 0);
    assert!(options.validate().is_ok());
}

#[test]
fn excessive_retry_limit_is_rejected() {
    let options = DispatchOptions {
        lock_retry_limit: MAX_LOCK_RETRY_LIMIT + 1,
        ..DispatchOptions::default()
    };
    assert!(options.validate().is_err());
}

#[test]
fn worker_bounds_are_enforced() {
    let options = DispatchOptions::default();
    assert_eq!(options.max_workers, 16);
    for max_workers in [0, MAX_WORKERS + 1] {
        let options = DispatchOptions {
            max_workers,
            ..DispatchOptions::default()
        };
        assert!(options.validate().is_err());
    }
}

// ============================================================================
// SECTION: Worker Tests
// ============================================================================

#[test]
fn worker_slots_are_capped_and_released() {
    let limiter = Arc::new(WorkerLimiter::new(2));
    let first = limiter.try_acquire().unwrap();
    let second = limiter.try_acquire().unwrap();
    assert!(limiter.try_acquire().is_none());
    assert_eq!(limiter.active(), 2);
    drop(first);
    let third = limiter.try_acquire().unwrap();
    drop(second);
    drop(third);
    assert_eq!(limiter.active(), 0);
}

#[test]
fn demoted_permit_runs_inline_and_keeps_its_slot() {
    let counters = Arc::new(OperationCounters::default());
    let _first = counters.admit(OperationKind::RawQuery, 1);
    let mut second = counters.admit(OperationKind::RawQuery, 1);
    assert_eq!(second.admission(), Admission::Concurrent);
    second.run_inline();
    assert_eq!(second.admission(), Admission::Inline);
    assert_eq!(counters.active(OperationKind::RawQuery), 2);
}
