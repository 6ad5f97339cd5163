// crates/sqlite-relay-core/src/coordinator.rs
// ============================================================================
// Module: Request Coordinator
// Description: Pending request queue, completion signalling, and result waiter.
// Purpose: Track every in-flight request and hand each result to its waiter.
// Dependencies: serde, tracing
// ============================================================================

//! ## Overview
//! The [`Coordinator`] owns the pending request queue shared by every
//! connection attached to it. Records are stored in a map keyed by
//! [`CorrelationId`], so removal never depends on positions in a list.
//!
//! Lifecycle of a record:
//! 1. [`Coordinator::enqueue`] issues the correlation ID and inserts the
//!    record.
//! 2. The executing path marks it started, appends rows through the result
//!    collector, then calls [`Coordinator::mark_finished`].
//! 3. [`Coordinator::await_result`] blocks on a condition variable until the
//!    record is finished, copies it out, marks it received, and removes it.
//!
//! The queue lock is held only for these short structural changes, never
//! across an engine call. A waiter that times out flags the record as
//! abandoned; abandoned records are dropped as soon as they finish.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::admission::OperationKind;
use crate::correlation::CorrelationId;
use crate::correlation::CorrelationIdGenerator;
use crate::engine::ExecSummary;
use crate::error::RelayError;
use crate::stats::QueueStats;
use crate::stats::QueueStatsSnapshot;
use crate::stats::bump;
use crate::value::Column;
use crate::value::Row;
use crate::value::Value;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default queue capacity.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 100_000;
/// Default waiter timeout (five minutes).
pub const DEFAULT_AWAIT_TIMEOUT_MS: u64 = 300_000;
/// Maximum accepted waiter timeout (one day).
pub const MAX_AWAIT_TIMEOUT_MS: u64 = 86_400_000;
/// Default retry-after hint returned when the queue is full.
const DEFAULT_OVERLOAD_RETRY_AFTER_MS: u64 = 10;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Maximum records held in the queue at once.
    #[serde(default = "default_max_pending_requests")]
    pub max_pending_requests: usize,
    /// Timeout used when a waiter passes a zero timeout.
    #[serde(default = "default_await_timeout_ms")]
    pub default_await_timeout_ms: u64,
    /// Retry-after hint attached to overload errors.
    #[serde(default = "default_overload_retry_after_ms")]
    pub overload_retry_after_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_pending_requests: default_max_pending_requests(),
            default_await_timeout_ms: default_await_timeout_ms(),
            overload_retry_after_ms: default_overload_retry_after_ms(),
        }
    }
}

impl CoordinatorConfig {
    /// Validates coordinator configuration.
    ///
    /// # Errors
    /// Returns [`RelayError::Invalid`] when capacity or timeout are out of range.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.max_pending_requests == 0 {
            return Err(RelayError::Invalid(
                "max_pending_requests must be greater than zero".to_string(),
            ));
        }
        if self.default_await_timeout_ms == 0 {
            return Err(RelayError::Invalid(
                "default_await_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.default_await_timeout_ms > MAX_AWAIT_TIMEOUT_MS {
            return Err(RelayError::Invalid(format!(
                "default_await_timeout_ms must be <= {MAX_AWAIT_TIMEOUT_MS}"
            )));
        }
        Ok(())
    }

    /// Returns the default waiter timeout.
    #[must_use]
    pub const fn default_await_timeout(&self) -> Duration {
        Duration::from_millis(self.default_await_timeout_ms)
    }
}

/// Default queue capacity.
const fn default_max_pending_requests() -> usize {
    DEFAULT_MAX_PENDING_REQUESTS
}

/// Default waiter timeout.
const fn default_await_timeout_ms() -> u64 {
    DEFAULT_AWAIT_TIMEOUT_MS
}

/// Default overload retry-after hint.
const fn default_overload_retry_after_ms() -> u64 {
    DEFAULT_OVERLOAD_RETRY_AFTER_MS
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// Lifecycle state of a pending record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Enqueued, engine call not started.
    Queued,
    /// Engine call running.
    Started,
    /// Engine call done; outcome visible to waiters.
    Finished,
}

/// One in-flight request.
///
/// # Invariants
/// - `finished` is the last field written on completion.
/// - Removed from the queue only after `received` is set, or when abandoned
///   and finished.
#[derive(Debug)]
struct PendingRecord {
    /// Request text.
    request: String,
    /// Issuing operation kind.
    kind: OperationKind,
    /// Rows in engine callback order.
    rows: Vec<Row>,
    /// Failure, if the request failed.
    error: Option<RelayError>,
    /// Execution summary on success.
    summary: ExecSummary,
    /// Engine call has begun.
    started: bool,
    /// Outcome recorded.
    processed: bool,
    /// Outcome visible to waiters.
    finished: bool,
    /// Claimed by its waiter.
    received: bool,
    /// Waiter gave up; drop on completion.
    abandoned: bool,
    /// Busy/locked re-runs performed.
    lock_retries: u32,
    /// Wall-clock start of the engine call.
    started_at: Option<SystemTime>,
    /// Wall-clock end of the engine call.
    ended_at: Option<SystemTime>,
}

impl PendingRecord {
    /// Creates a queued record.
    const fn new(request: String, kind: OperationKind) -> Self {
        Self {
            request,
            kind,
            rows: Vec::new(),
            error: None,
            summary: ExecSummary {
                rows_affected: 0,
                last_insert_id: 0,
                statements: 0,
            },
            started: false,
            processed: false,
            finished: false,
            received: false,
            abandoned: false,
            lock_retries: 0,
            started_at: None,
            ended_at: None,
        }
    }

    /// Returns the lifecycle state.
    const fn state(&self) -> RecordState {
        if self.finished {
            RecordState::Finished
        } else if self.started {
            RecordState::Started
        } else {
            RecordState::Queued
        }
    }
}

/// Read-only view of a pending record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSnapshot {
    /// Correlation ID.
    pub id: CorrelationId,
    /// Operation kind.
    pub kind: OperationKind,
    /// Request text.
    pub request: String,
    /// Lifecycle state.
    pub state: RecordState,
    /// Rows collected so far.
    pub row_count: usize,
    /// Busy/locked re-runs performed.
    pub lock_retries: u32,
    /// Outcome has been recorded.
    pub processed: bool,
    /// Waiter gave up on this record.
    pub abandoned: bool,
    /// Record holds a failure.
    pub failed: bool,
}

// ============================================================================
// SECTION: Results
// ============================================================================

/// Completed request handed to its waiter.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Correlation ID of the request.
    pub id: CorrelationId,
    /// Operation kind.
    pub kind: OperationKind,
    /// Request text.
    pub request: String,
    /// Rows in engine callback order.
    pub rows: Vec<Row>,
    /// Column metadata derived from the first row.
    pub columns: Vec<Column>,
    /// Execution summary.
    pub summary: ExecSummary,
    /// Busy/locked re-runs performed.
    pub lock_retries: u32,
    /// Wall-clock start of the engine call.
    pub started_at: Option<SystemTime>,
    /// Wall-clock end of the engine call.
    pub ended_at: Option<SystemTime>,
}

impl QueryResult {
    /// Returns the first value of the first row.
    #[must_use]
    pub fn first_value(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.value(0))
    }
}

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// Queue state guarded by the coordinator lock.
#[derive(Debug, Default)]
struct QueueState {
    /// Records keyed by correlation ID.
    records: HashMap<CorrelationId, PendingRecord>,
    /// Statistics.
    stats: QueueStats,
}

/// Shared owner of the pending request queue.
///
/// # Invariants
/// - Exactly one record exists per correlation ID.
/// - The lock is never held across an engine call.
#[derive(Debug)]
pub struct Coordinator {
    /// Validated configuration.
    config: CoordinatorConfig,
    /// Correlation ID generator.
    generator: CorrelationIdGenerator,
    /// Queue state.
    queue: Mutex<QueueState>,
    /// Signalled whenever a record finishes.
    completed: Condvar,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::from_parts(CoordinatorConfig::default(), CorrelationIdGenerator::new())
    }
}

impl Coordinator {
    /// Creates a coordinator after validating `config`.
    ///
    /// # Errors
    /// Returns [`RelayError::Invalid`] when the configuration is invalid.
    pub fn new(config: CoordinatorConfig) -> Result<Self, RelayError> {
        config.validate()?;
        Ok(Self::from_parts(config, CorrelationIdGenerator::new()))
    }

    /// Creates a coordinator with a caller-supplied generator.
    ///
    /// # Errors
    /// Returns [`RelayError::Invalid`] when the configuration is invalid.
    pub fn with_generator(
        config: CoordinatorConfig,
        generator: CorrelationIdGenerator,
    ) -> Result<Self, RelayError> {
        config.validate()?;
        Ok(Self::from_parts(config, generator))
    }

    /// Assembles a coordinator from validated parts.
    fn from_parts(config: CoordinatorConfig, generator: CorrelationIdGenerator) -> Self {
        Self {
            config,
            generator,
            queue: Mutex::new(QueueState::default()),
            completed: Condvar::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Enqueues a record and returns its correlation ID.
    ///
    /// # Errors
    /// Returns [`RelayError::Overloaded`] at capacity and
    /// [`RelayError::SequenceExhausted`] when no IDs remain.
    pub fn enqueue(
        &self,
        connection: &Arc<str>,
        request: &str,
        kind: OperationKind,
    ) -> Result<CorrelationId, RelayError> {
        let mut guard = self.lock_queue();
        let state = &mut *guard;
        if state.records.len() >= self.config.max_pending_requests {
            bump(&mut state.stats.rejected);
            return Err(RelayError::Overloaded {
                message: format!(
                    "pending request queue is full ({} records)",
                    self.config.max_pending_requests
                ),
                retry_after_ms: Some(self.config.overload_retry_after_ms),
            });
        }
        let id = self.generator.issue(connection)?;
        state.records.insert(id.clone(), PendingRecord::new(request.to_string(), kind));
        bump(&mut state.stats.enqueued);
        drop(guard);
        debug!(correlation_id = %id, kind = kind.as_str(), "request enqueued");
        Ok(id)
    }

    /// Returns a snapshot of the record for `id`, if still queued.
    #[must_use]
    pub fn find(&self, id: &CorrelationId) -> Option<RecordSnapshot> {
        let guard = self.lock_queue();
        guard.records.get(id).filter(|record| !record.received).map(|record| RecordSnapshot {
            id: id.clone(),
            kind: record.kind,
            request: record.request.clone(),
            state: record.state(),
            row_count: record.rows.len(),
            lock_retries: record.lock_retries,
            processed: record.processed,
            abandoned: record.abandoned,
            failed: record.error.is_some(),
        })
    }

    /// Returns true when `id` is still queued.
    #[must_use]
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.lock_queue().records.contains_key(id)
    }

    /// Returns the number of queued records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_queue().records.len()
    }

    /// Returns true when no records are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_queue().records.is_empty()
    }

    /// Returns the number of queued records issued by `connection`.
    #[must_use]
    pub fn pending_for(&self, connection: &str) -> usize {
        self.lock_queue().records.keys().filter(|id| id.connection() == connection).count()
    }

    /// Records the outcome of `id` and wakes waiters.
    ///
    /// Returns false when the record is no longer queued.
    pub fn mark_finished(
        &self,
        id: &CorrelationId,
        outcome: Result<ExecSummary, RelayError>,
    ) -> bool {
        let mut guard = self.lock_queue();
        let state = &mut *guard;
        let Some(record) = state.records.get_mut(id) else {
            return false;
        };
        record.ended_at = Some(SystemTime::now());
        match outcome {
            Ok(summary) => record.summary = summary,
            Err(error) => {
                state.stats.record_error(&error);
                record.error = Some(error);
            }
        }
        record.processed = true;
        // Waiters claim the record as soon as this flag is visible.
        record.finished = true;
        let abandoned = record.abandoned;
        bump(&mut state.stats.completed);
        if abandoned {
            state.records.remove(id);
            bump(&mut state.stats.orphans_dropped);
        }
        drop(guard);
        if abandoned {
            warn!(correlation_id = %id, "dropped result of abandoned request");
        } else {
            debug!(correlation_id = %id, "request finished");
        }
        self.completed.notify_all();
        true
    }

    /// Blocks until `id` finishes, then claims and removes it.
    ///
    /// A zero `timeout` uses the configured default.
    ///
    /// # Errors
    /// Returns [`RelayError::NotFound`] for unknown or already-claimed IDs,
    /// [`RelayError::Timeout`] when the deadline passes first, or the
    /// request's own failure.
    pub fn await_result(
        &self,
        id: &CorrelationId,
        timeout: Duration,
    ) -> Result<QueryResult, RelayError> {
        let timeout =
            if timeout.is_zero() { self.config.default_await_timeout() } else { timeout };
        let started = Instant::now();
        let deadline = started.checked_add(timeout);
        let mut guard = self.lock_queue();
        loop {
            let state = &mut *guard;
            let Some(record) = state.records.get_mut(id) else {
                return Err(RelayError::NotFound(id.clone()));
            };
            if record.finished {
                record.received = true;
                let waited = started.elapsed();
                state.stats.record_wait(waited);
                bump(&mut state.stats.received);
                return match state.records.remove(id) {
                    Some(record) => claim(id, record),
                    None => Err(RelayError::NotFound(id.clone())),
                };
            }
            record.abandoned = false;
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        record.abandoned = true;
                        bump(&mut state.stats.timed_out);
                        drop(guard);
                        let waited_ms = u64::try_from(started.elapsed().as_millis())
                            .unwrap_or(u64::MAX);
                        warn!(correlation_id = %id, waited_ms, "request wait timed out");
                        return Err(RelayError::Timeout {
                            id: id.clone(),
                            waited_ms,
                        });
                    }
                    deadline.saturating_duration_since(now)
                }
                None => timeout,
            };
            let (next, _) = self
                .completed
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
        }
    }

    /// Returns a statistics snapshot.
    #[must_use]
    pub fn stats_snapshot(&self) -> QueueStatsSnapshot {
        let guard = self.lock_queue();
        guard.stats.snapshot(guard.records.len())
    }

    // ------------------------------------------------------------------------
    // Collector and dispatch hooks
    // ------------------------------------------------------------------------

    /// Marks `id` as started.
    pub(crate) fn mark_started(&self, id: &CorrelationId) -> bool {
        let mut guard = self.lock_queue();
        let Some(record) = guard.records.get_mut(id) else {
            return false;
        };
        record.started = true;
        record.started_at = Some(SystemTime::now());
        true
    }

    /// Appends a row to `id`; rows for unknown IDs are discarded.
    pub(crate) fn append_row(&self, id: &CorrelationId, row: Row) -> bool {
        let mut guard = self.lock_queue();
        let state = &mut *guard;
        if let Some(record) = state.records.get_mut(id) {
            record.rows.push(row);
            true
        } else {
            bump(&mut state.stats.rows_discarded);
            false
        }
    }

    /// Clears collected rows before a busy/locked re-run.
    pub(crate) fn reset_for_retry(&self, id: &CorrelationId) -> Option<u32> {
        let mut guard = self.lock_queue();
        let state = &mut *guard;
        let record = state.records.get_mut(id)?;
        record.rows.clear();
        record.lock_retries = record.lock_retries.saturating_add(1);
        bump(&mut state.stats.lock_retries);
        Some(record.lock_retries)
    }

    /// Removes `id` without a waiter, for requests that never ran.
    pub(crate) fn discard(&self, id: &CorrelationId) -> bool {
        let removed = self.lock_queue().records.remove(id).is_some();
        if removed {
            self.completed.notify_all();
        }
        removed
    }

    /// Locks the queue, recovering the state after a poisoned lock.
    fn lock_queue(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Converts a claimed record into the waiter's return value.
fn claim(id: &CorrelationId, record: PendingRecord) -> Result<QueryResult, RelayError> {
    if let Some(error) = record.error {
        return Err(error);
    }
    let columns = record.rows.first().map(Column::describe).unwrap_or_default();
    Ok(QueryResult {
        id: id.clone(),
        kind: record.kind,
        request: record.request,
        rows: record.rows,
        columns,
        summary: record.summary,
        lock_retries: record.lock_retries,
        started_at: record.started_at,
        ended_at: record.ended_at,
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
