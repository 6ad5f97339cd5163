// crates/sqlite-relay-core/src/connection.rs
// ============================================================================
// Module: Relay Connection
// Description: Shared connection handle dispatching requests to one engine.
// Purpose: Make many concurrent callers safe against one blocking engine.
// Dependencies: tracing
// ============================================================================

//! ## Overview
//! A [`Connection`] wraps one [`Engine`] behind a serialization lock and is
//! cloned freely between callers. [`Connection::issue`] admits a request,
//! enqueues its record with the shared [`Coordinator`], and either runs it
//! inline or hands it to a worker thread. [`Connection::await_result`] blocks
//! until the record finishes and returns its owned copy.
//!
//! Invariants:
//! - Only the thread holding the engine lock calls into the engine.
//! - The coordinator lock is never held across an engine call.
//! - Every admitted request finishes its record, even when the engine call
//!   panics.
//! - A timeout interrupt only reaches the engine while the timed-out request
//!   is the one running.
//!
//! An engine-fatal error or an engine panic closes the connection instead of
//! ending the process or unwinding into the caller.

use std::fmt;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::admission::Admission;
use crate::admission::AdmissionPermit;
use crate::admission::CounterSnapshot;
use crate::admission::DispatchOptions;
use crate::admission::OperationCounters;
use crate::admission::OperationKind;
use crate::admission::WorkerLimiter;
use crate::admission::WorkerSlot;
use crate::backup::BackupPolicy;
use crate::backup::BackupProgress;
use crate::backup::BackupReport;
use crate::backup::copy_pages;
use crate::collector::ResultCollector;
use crate::coordinator::Coordinator;
use crate::coordinator::QueryResult;
use crate::correlation::CorrelationId;
use crate::correlation::validate_connection_name;
use crate::engine::Engine;
use crate::engine::EngineRequest;
use crate::engine::ExecSummary;
use crate::engine::Interrupter;
use crate::error::EngineErrorKind;
use crate::error::RelayError;
use crate::telemetry::NoopMetrics;
use crate::telemetry::RelayMetricEvent;
use crate::telemetry::RelayMetrics;
use crate::telemetry::RelayOutcome;
use crate::value::Value;

// ============================================================================
// SECTION: Identity and Settings
// ============================================================================

/// What a connection is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionIdentity {
    /// On-disk database file.
    File(PathBuf),
    /// Private in-memory database.
    Memory,
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Memory => f.write_str(":memory:"),
        }
    }
}

/// Settings for building a [`Connection`].
pub struct ConnectionSettings {
    /// Connection name embedded in correlation IDs.
    name: String,
    /// Attached database.
    identity: ConnectionIdentity,
    /// Dispatch policy.
    options: DispatchOptions,
    /// Metrics sink.
    metrics: Arc<dyn RelayMetrics>,
}

impl ConnectionSettings {
    /// Creates settings with default dispatch options and no-op metrics.
    #[must_use]
    pub fn new(name: impl Into<String>, identity: ConnectionIdentity) -> Self {
        Self {
            name: name.into(),
            identity,
            options: DispatchOptions::default(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Replaces the dispatch options.
    #[must_use]
    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn RelayMetrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

// ============================================================================
// SECTION: Connection
// ============================================================================

/// State shared by every clone of a connection.
struct ConnectionShared<E: Engine> {
    /// Connection name.
    name: Arc<str>,
    /// Attached database.
    identity: ConnectionIdentity,
    /// Engine; `None` once closed.
    engine: Mutex<Option<E>>,
    /// Open flag, cleared on close or fatal error.
    open: AtomicBool,
    /// Engine interrupt handle, if supported.
    interrupter: Option<Arc<dyn Interrupter>>,
    /// Per-kind activity counters.
    counters: Arc<OperationCounters>,
    /// Live worker thread cap.
    workers: Arc<WorkerLimiter>,
    /// Sequence of the request inside the engine, if any.
    running: Mutex<Option<u64>>,
    /// Shared pending request queue.
    coordinator: Arc<Coordinator>,
    /// Dispatch policy.
    options: DispatchOptions,
    /// Metrics sink.
    metrics: Arc<dyn RelayMetrics>,
}

/// Clonable handle to one engine connection.
///
/// # Invariants
/// - Busy exactly when any operation-kind counter is non-zero.
/// - Must not be closed while requests are in flight.
pub struct Connection<E: Engine> {
    /// Shared state.
    shared: Arc<ConnectionShared<E>>,
}

impl<E: Engine> Clone for Connection<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: Engine> Connection<E> {
    /// Wraps `engine` as a shared connection attached to `coordinator`.
    ///
    /// # Errors
    /// Returns [`RelayError::Invalid`] for an invalid name or options.
    pub fn new(
        engine: E,
        coordinator: Arc<Coordinator>,
        settings: ConnectionSettings,
    ) -> Result<Self, RelayError> {
        validate_connection_name(&settings.name)?;
        settings.options.validate()?;
        let interrupter = engine.interrupter();
        let shared = ConnectionShared {
            name: Arc::from(settings.name),
            identity: settings.identity,
            engine: Mutex::new(Some(engine)),
            open: AtomicBool::new(true),
            interrupter,
            counters: Arc::new(OperationCounters::default()),
            workers: Arc::new(WorkerLimiter::new(settings.options.max_workers)),
            running: Mutex::new(None),
            coordinator,
            options: settings.options,
            metrics: settings.metrics,
        };
        debug!(connection = %shared.name, identity = %shared.identity, "connection opened");
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Returns the connection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Returns the attached database.
    #[must_use]
    pub fn identity(&self) -> &ConnectionIdentity {
        &self.shared.identity
    }

    /// Returns the shared coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.shared.coordinator
    }

    /// Returns the dispatch options.
    #[must_use]
    pub fn options(&self) -> &DispatchOptions {
        &self.shared.options
    }

    /// Returns true until the connection is closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// Returns true while any request is active.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        !self.shared.counters.is_idle()
    }

    /// Returns true when no request is active.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.shared.counters.is_idle()
    }

    /// Returns the operation-kind counters.
    #[must_use]
    pub fn counters(&self) -> CounterSnapshot {
        self.shared.counters.snapshot()
    }

    // ------------------------------------------------------------------------
    // Issue and await
    // ------------------------------------------------------------------------

    /// Enqueues a request and runs or schedules it.
    ///
    /// Inline requests have finished when this returns; concurrent ones run
    /// on a worker thread. When every worker slot is taken the request runs
    /// inline.
    ///
    /// # Errors
    /// Returns [`RelayError::NotOpen`], [`RelayError::Malformed`] for empty
    /// text or parameters on direct execution, queue admission errors, or
    /// [`RelayError::Io`] when a worker cannot be spawned.
    pub fn issue(
        &self,
        sql: &str,
        params: &[Value],
        kind: OperationKind,
    ) -> Result<CorrelationId, RelayError> {
        if !self.is_open() {
            return Err(RelayError::NotOpen(self.name().to_string()));
        }
        if sql.trim().is_empty() {
            return Err(RelayError::Malformed("request text is empty".to_string()));
        }
        if kind == OperationKind::DirectExecute && !params.is_empty() {
            return Err(RelayError::Malformed(
                "direct execution does not accept bound parameters".to_string(),
            ));
        }
        let mut permit = self.shared.counters.admit(kind, self.shared.options.inline_threshold);
        let id = self.shared.coordinator.enqueue(&self.shared.name, sql, kind)?;
        let worker = match permit.admission() {
            Admission::Inline => None,
            Admission::Concurrent => {
                let slot = self.shared.workers.try_acquire();
                if slot.is_none() {
                    debug!(correlation_id = %id, "worker limit reached; running inline");
                    permit.run_inline();
                }
                slot
            }
        };
        let job = RequestJob {
            id: id.clone(),
            sql: sql.to_string(),
            params: params.to_vec(),
            permit,
        };
        match worker {
            Some(slot) => self.spawn_job(job, slot)?,
            None => run_job(&self.shared, job),
        }
        Ok(id)
    }

    /// Blocks until `id` finishes and returns its result.
    ///
    /// A zero `timeout` uses the coordinator default. On timeout the engine
    /// call keeps running unless `interrupt_on_timeout` is enabled.
    ///
    /// # Errors
    /// Returns [`RelayError::Timeout`], [`RelayError::NotFound`], or the
    /// request's own failure.
    pub fn await_result(
        &self,
        id: &CorrelationId,
        timeout: Duration,
    ) -> Result<QueryResult, RelayError> {
        let result = self.shared.coordinator.await_result(id, timeout);
        let timed_out = matches!(result, Err(RelayError::Timeout { .. }));
        if timed_out && self.shared.options.interrupt_on_timeout {
            self.interrupt_if_running(id);
        }
        result
    }

    /// Interrupts the engine when `id` belongs here and is running.
    ///
    /// The running slot stays locked while interrupting, so the engine call
    /// cannot finish and hand the engine to another request in between.
    fn interrupt_if_running(&self, id: &CorrelationId) {
        if id.connection() != self.name() {
            return;
        }
        let Some(interrupter) = &self.shared.interrupter else {
            return;
        };
        let running = lock_running(&self.shared);
        if *running == Some(id.sequence()) {
            warn!(correlation_id = %id, "interrupting engine call after waiter timeout");
            interrupter.interrupt();
        }
    }

    /// Spawns a worker for `job` holding `slot`.
    fn spawn_job(&self, job: RequestJob, slot: WorkerSlot) -> Result<(), RelayError> {
        let shared = Arc::clone(&self.shared);
        let id = job.id.clone();
        thread::Builder::new()
            .name(format!("sqlite-relay-{}", self.shared.name))
            .spawn(move || {
                run_job(&shared, job);
                drop(slot);
            })
            .map(|_| ())
            .map_err(|err| {
                self.shared.coordinator.discard(&id);
                RelayError::Io(format!("failed to spawn request worker: {err}"))
            })
    }

    // ------------------------------------------------------------------------
    // Convenience operations
    // ------------------------------------------------------------------------

    /// Issues and awaits one request with the default timeout.
    fn run(
        &self,
        kind: OperationKind,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryResult, RelayError> {
        let id = self.issue(sql, params, kind)?;
        self.await_result(&id, Duration::ZERO)
    }

    /// Fetches rows with column metadata.
    ///
    /// # Errors
    /// Returns any [`RelayError`] from issuing or awaiting the request.
    pub fn get_data_table(&self, sql: &str, params: &[Value]) -> Result<QueryResult, RelayError> {
        self.run(OperationKind::RowFetch, sql, params)
    }

    /// Fetches rows like [`Connection::get_data_table`] and hands the
    /// outcome to `callback` exactly once before returning it.
    ///
    /// # Errors
    /// Returns any [`RelayError`] from issuing or awaiting the request; the
    /// callback sees the same error first.
    pub fn get_data_table_with<F>(
        &self,
        sql: &str,
        params: &[Value],
        callback: F,
    ) -> Result<QueryResult, RelayError>
    where
        F: FnOnce(&Result<QueryResult, RelayError>),
    {
        let result = self.get_data_table(sql, params);
        callback(&result);
        result
    }

    /// Runs a raw query and returns its rows.
    ///
    /// # Errors
    /// Returns any [`RelayError`] from issuing or awaiting the request.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, RelayError> {
        self.run(OperationKind::RawQuery, sql, params)
    }

    /// Executes a `;`-separated batch and returns the rows changed.
    ///
    /// # Errors
    /// Returns any [`RelayError`] from issuing or awaiting the request.
    pub fn execute(&self, sql: &str) -> Result<u64, RelayError> {
        self.run(OperationKind::DirectExecute, sql, &[]).map(|result| result.summary.rows_affected)
    }

    /// Executes statements and returns the execution summary.
    ///
    /// # Errors
    /// Returns any [`RelayError`] from issuing or awaiting the request.
    pub fn execute_non_query(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<ExecSummary, RelayError> {
        self.run(OperationKind::NonQuery, sql, params).map(|result| result.summary)
    }

    /// Returns the first column of the first row, or `Null` without rows.
    ///
    /// # Errors
    /// Returns [`RelayError::Malformed`] when the row has more than one
    /// column, or any error from issuing or awaiting the request.
    pub fn execute_scalar(&self, sql: &str, params: &[Value]) -> Result<Value, RelayError> {
        let result = self.run(OperationKind::ScalarFetch, sql, params)?;
        match result.rows.first() {
            None => Ok(Value::Null),
            Some(row) if row.len() > 1 => {
                Err(RelayError::Malformed("scalar fetch can only return one value".to_string()))
            }
            Some(row) => Ok(row.value(0).cloned().unwrap_or(Value::Null)),
        }
    }

    // ------------------------------------------------------------------------
    // Backup and lifecycle
    // ------------------------------------------------------------------------

    /// Copies this connection's data into `destination` page by page.
    ///
    /// Both engine locks are held for the whole copy.
    ///
    /// # Errors
    /// Returns [`RelayError::Invalid`] when both handles are the same
    /// connection, [`RelayError::NotOpen`] when either is closed, or any
    /// error from [`copy_pages`].
    pub fn backup_to(
        &self,
        destination: &Self,
        policy: &BackupPolicy,
        context: &str,
        progress: Option<&mut dyn FnMut(&BackupProgress<'_>)>,
    ) -> Result<BackupReport, RelayError> {
        if Arc::ptr_eq(&self.shared, &destination.shared) {
            return Err(RelayError::Invalid(
                "backup source and destination must differ".to_string(),
            ));
        }
        policy.validate()?;
        let (source_guard, mut destination_guard) =
            lock_pair(&self.shared, &destination.shared)?;
        let source = source_guard
            .as_ref()
            .ok_or_else(|| RelayError::NotOpen(self.name().to_string()))?;
        let target = destination_guard
            .as_mut()
            .ok_or_else(|| RelayError::NotOpen(destination.name().to_string()))?;
        debug!(
            source = %self.shared.name,
            destination = %destination.shared.name,
            "backup started"
        );
        let mut stepper = source.begin_backup(target)?;
        copy_pages(&mut stepper, policy, self.name(), context, progress)
    }

    /// Closes the engine.
    ///
    /// # Errors
    /// Returns [`RelayError::NotOpen`] when already closed,
    /// [`RelayError::InFlight`] while requests are active or unclaimed, or
    /// the engine's close error.
    pub fn close(&self) -> Result<(), RelayError> {
        if !self.is_open() {
            return Err(RelayError::NotOpen(self.name().to_string()));
        }
        if self.is_busy() || self.shared.coordinator.pending_for(&self.shared.name) > 0 {
            return Err(RelayError::InFlight(self.name().to_string()));
        }
        let mut guard = lock_engine(&self.shared)?;
        let engine = guard.take().ok_or_else(|| RelayError::NotOpen(self.name().to_string()))?;
        self.shared.open.store(false, Ordering::Release);
        drop(guard);
        engine.close()?;
        debug!(connection = %self.shared.name, "connection closed");
        Ok(())
    }
}

// ============================================================================
// SECTION: Dispatch
// ============================================================================

/// Admitted request ready to run.
struct RequestJob {
    /// Correlation ID of the record.
    id: CorrelationId,
    /// Request text.
    sql: String,
    /// Bound parameters.
    params: Vec<Value>,
    /// Counter slot held until the engine call ends.
    permit: AdmissionPermit,
}

/// Finishes a record with an error if its worker unwinds first.
struct CompletionGuard<'a> {
    /// Queue owning the record.
    coordinator: &'a Coordinator,
    /// Record to finish.
    id: &'a CorrelationId,
    /// Cleared once the outcome is recorded.
    armed: bool,
}

impl CompletionGuard<'_> {
    /// Records `outcome` and disarms the guard.
    fn complete(mut self, outcome: Result<ExecSummary, RelayError>) {
        self.armed = false;
        self.coordinator.mark_finished(self.id, outcome);
    }
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.coordinator.mark_finished(
                self.id,
                Err(RelayError::Engine("request worker terminated before completion".to_string())),
            );
        }
    }
}

/// Runs one admitted request to completion.
fn run_job<E: Engine>(shared: &ConnectionShared<E>, job: RequestJob) {
    let RequestJob {
        id,
        sql,
        params,
        permit,
    } = job;
    let guard = CompletionGuard {
        coordinator: &shared.coordinator,
        id: &id,
        armed: true,
    };
    let kind = permit.kind();
    let admission = permit.admission();
    let started = Instant::now();
    let (outcome, lock_retries) = execute_request(shared, &id, &sql, &params, kind);
    drop(permit);
    let event = RelayMetricEvent {
        connection: Arc::clone(&shared.name),
        kind,
        admission,
        outcome: if outcome.is_ok() { RelayOutcome::Ok } else { RelayOutcome::Error },
        error_kind: outcome.as_ref().err().map(RelayError::label),
        correlation_id: id.clone(),
        lock_retries,
    };
    shared.metrics.record_request(event.clone());
    shared.metrics.record_latency(event, started.elapsed());
    guard.complete(outcome);
}

/// Executes a request under the engine lock, re-running on contention when
/// configured. Returns the outcome and the number of re-runs.
fn execute_request<E: Engine>(
    shared: &ConnectionShared<E>,
    id: &CorrelationId,
    sql: &str,
    params: &[Value],
    kind: OperationKind,
) -> (Result<ExecSummary, RelayError>, u32) {
    let mut guard = match lock_engine(shared) {
        Ok(guard) => guard,
        Err(err) => return (Err(err), 0),
    };
    let Some(engine) = guard.as_mut() else {
        return (Err(RelayError::NotOpen(shared.name.to_string())), 0);
    };
    shared.coordinator.mark_started(id);
    let request = EngineRequest {
        sql,
        params,
        kind,
    };
    *lock_running(shared) = Some(id.sequence());
    let mut retries = 0_u32;
    let result = loop {
        let mut collector = ResultCollector::new(&shared.coordinator, id, kind);
        let call =
            panic::catch_unwind(AssertUnwindSafe(|| engine.execute(&request, &mut collector)));
        let Ok(result) = call else {
            break None;
        };
        match result {
            Err(err) if err.kind.is_contention() && retries < shared.options.lock_retry_limit => {
                retries = retries.saturating_add(1);
                shared.coordinator.reset_for_retry(id);
                debug!(
                    correlation_id = %id,
                    retries,
                    reason = err.kind.label(),
                    "retrying request"
                );
                thread::sleep(Duration::from_millis(shared.options.lock_retry_backoff_ms));
            }
            other => break Some(other),
        }
    };
    *lock_running(shared) = None;
    match result {
        Some(Ok(summary)) => (Ok(summary), retries),
        Some(Err(err)) => {
            if err.kind == EngineErrorKind::Fatal {
                error!(
                    connection = %shared.name,
                    correlation_id = %id,
                    error = %err,
                    "engine fatal error; closing connection"
                );
                shared.open.store(false, Ordering::Release);
                *guard = None;
            }
            (Err(RelayError::from(err)), retries)
        }
        None => {
            error!(
                connection = %shared.name,
                correlation_id = %id,
                "engine call panicked; closing connection"
            );
            shared.open.store(false, Ordering::Release);
            *guard = None;
            (Err(RelayError::Engine("engine call panicked".to_string())), retries)
        }
    }
}

/// Locks the engine slot of `shared`.
///
/// A poisoned slot marks the connection closed.
fn lock_engine<E: Engine>(
    shared: &ConnectionShared<E>,
) -> Result<MutexGuard<'_, Option<E>>, RelayError> {
    shared.engine.lock().map_err(|_| {
        shared.open.store(false, Ordering::Release);
        RelayError::NotOpen(shared.name.to_string())
    })
}

/// Locks the running-request slot of `shared`.
fn lock_running<E: Engine>(shared: &ConnectionShared<E>) -> MutexGuard<'_, Option<u64>> {
    shared.running.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Engine guards for a backup source and destination.
type GuardPair<'a, E> = (MutexGuard<'a, Option<E>>, MutexGuard<'a, Option<E>>);

/// Locks two engine slots in address order so opposite-direction copies
/// cannot deadlock.
fn lock_pair<'a, E: Engine>(
    source: &'a ConnectionShared<E>,
    destination: &'a ConnectionShared<E>,
) -> Result<GuardPair<'a, E>, RelayError> {
    if std::ptr::from_ref(source) < std::ptr::from_ref(destination) {
        let source_guard = lock_engine(source)?;
        let destination_guard = lock_engine(destination)?;
        Ok((source_guard, destination_guard))
    } else {
        let destination_guard = lock_engine(destination)?;
        let source_guard = lock_engine(source)?;
        Ok((source_guard, destination_guard))
    }
}
