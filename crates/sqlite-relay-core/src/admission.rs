// crates/sqlite-relay-core/src/admission.rs
// ============================================================================
// Module: Admission Control
// Description: Operation-kind counters and inline-vs-concurrent dispatch.
// Purpose: Decide how each request runs and expose the busy predicate.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Each connection keeps one saturating counter per [`OperationKind`]. A
//! request increments its kind's counter on admission; when the previous
//! value was below [`DispatchOptions::inline_threshold`] the request runs
//! inline on the caller's thread, otherwise it runs on a spawned worker that
//! serializes on the same connection lock.
//!
//! The counter is decremented when the [`AdmissionPermit`] drops, so every
//! exit path (success, error, unwinding) releases it. A connection is busy
//! exactly when any counter is non-zero.
//!
//! Live worker threads per connection are capped by [`WorkerLimiter`]. A
//! concurrent admission that finds every worker slot taken runs inline
//! instead.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;

use crate::error::RelayError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Upper bound for [`DispatchOptions::lock_retry_limit`].
pub const MAX_LOCK_RETRY_LIMIT: u32 = 64;
/// Upper bound for [`DispatchOptions::lock_retry_backoff_ms`].
pub const MAX_LOCK_RETRY_BACKOFF_MS: u64 = 60_000;
/// Upper bound for [`DispatchOptions::max_workers`].
pub const MAX_WORKERS: u32 = 1024;

// ============================================================================
// SECTION: Operation Kinds
// ============================================================================

/// Category of a relay operation.
///
/// # Invariants
/// - Labels are stable for metrics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Tabular fetch returning rows and column metadata.
    RowFetch,
    /// Multi-statement execution without bound parameters.
    DirectExecute,
    /// Single-value fetch.
    ScalarFetch,
    /// Statement execution reporting affected rows.
    NonQuery,
    /// Raw query returning rows.
    RawQuery,
}

impl OperationKind {
    /// All kinds in counter order.
    pub const ALL: [Self; 5] =
        [Self::RowFetch, Self::DirectExecute, Self::ScalarFetch, Self::NonQuery, Self::RawQuery];

    /// Returns a stable label for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RowFetch => "row_fetch",
            Self::DirectExecute => "direct_execute",
            Self::ScalarFetch => "scalar_fetch",
            Self::NonQuery => "non_query",
            Self::RawQuery => "raw_query",
        }
    }

    /// Returns true for kinds whose callers consume rows.
    #[must_use]
    pub const fn produces_rows(self) -> bool {
        matches!(self, Self::RowFetch | Self::ScalarFetch | Self::RawQuery)
    }

    /// Returns the counter slot for this kind.
    const fn index(self) -> usize {
        match self {
            Self::RowFetch => 0,
            Self::DirectExecute => 1,
            Self::ScalarFetch => 2,
            Self::NonQuery => 3,
            Self::RawQuery => 4,
        }
    }
}

/// Execution path chosen for an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    /// Runs on the caller's thread.
    Inline,
    /// Runs on a spawned worker thread.
    Concurrent,
}

impl Admission {
    /// Returns a stable label for this path.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Concurrent => "concurrent",
        }
    }
}

// ============================================================================
// SECTION: Dispatch Options
// ============================================================================

/// Per-connection dispatch policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchOptions {
    /// Requests run inline while fewer than this many of the same kind are
    /// already active.
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold: u32,
    /// Busy/locked re-runs for regular operations. Zero disables retry.
    #[serde(default)]
    pub lock_retry_limit: u32,
    /// Sleep between busy/locked re-runs.
    #[serde(default = "default_lock_retry_backoff_ms")]
    pub lock_retry_backoff_ms: u64,
    /// Interrupt the running engine call when its waiter times out.
    #[serde(default)]
    pub interrupt_on_timeout: bool,
    /// Live worker threads allowed per connection.
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            inline_threshold: default_inline_threshold(),
            lock_retry_limit: 0,
            lock_retry_backoff_ms: default_lock_retry_backoff_ms(),
            interrupt_on_timeout: false,
            max_workers: default_max_workers(),
        }
    }
}

impl DispatchOptions {
    /// Validates dispatch options.
    ///
    /// # Errors
    /// Returns [`RelayError::Invalid`] when a retry or worker bound is
    /// exceeded.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.max_workers == 0 || self.max_workers > MAX_WORKERS {
            return Err(RelayError::Invalid(format!(
                "max_workers must be between 1 and {MAX_WORKERS}"
            )));
        }
        if self.lock_retry_limit > MAX_LOCK_RETRY_LIMIT {
            return Err(RelayError::Invalid(format!(
                "lock_retry_limit must be <= {MAX_LOCK_RETRY_LIMIT}"
            )));
        }
        if self.lock_retry_backoff_ms > MAX_LOCK_RETRY_BACKOFF_MS {
            return Err(RelayError::Invalid(format!(
                "lock_retry_backoff_ms must be <= {MAX_LOCK_RETRY_BACKOFF_MS}"
            )));
        }
        Ok(())
    }
}

/// Default inline threshold: only the first caller runs inline.
const fn default_inline_threshold() -> u32 {
    1
}

/// Default sleep between busy/locked re-runs.
const fn default_lock_retry_backoff_ms() -> u64 {
    25
}

/// Default worker thread cap.
const fn default_max_workers() -> u32 {
    16
}

// ============================================================================
// SECTION: Counters
// ============================================================================

/// Saturating per-kind activity counters for one connection.
#[derive(Debug, Default)]
pub struct OperationCounters {
    /// One slot per [`OperationKind`].
    slots: [AtomicU32; 5],
}

impl OperationCounters {
    /// Admits a request of `kind`, choosing its execution path.
    #[must_use]
    pub fn admit(self: &Arc<Self>, kind: OperationKind, inline_threshold: u32) -> AdmissionPermit {
        let previous = self.enter(kind);
        let admission =
            if previous < inline_threshold { Admission::Inline } else { Admission::Concurrent };
        AdmissionPermit {
            counters: Arc::clone(self),
            kind,
            admission,
        }
    }

    /// Returns the active count for `kind`.
    #[must_use]
    pub fn active(&self, kind: OperationKind) -> u32 {
        self.slots[kind.index()].load(Ordering::Acquire)
    }

    /// Returns true when no operation of any kind is active.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.slots.iter().all(|slot| slot.load(Ordering::Acquire) == 0)
    }

    /// Returns a copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            row_fetch: self.active(OperationKind::RowFetch),
            direct_execute: self.active(OperationKind::DirectExecute),
            scalar_fetch: self.active(OperationKind::ScalarFetch),
            non_query: self.active(OperationKind::NonQuery),
            raw_query: self.active(OperationKind::RawQuery),
        }
    }

    /// Increments the counter for `kind`, returning the previous value.
    fn enter(&self, kind: OperationKind) -> u32 {
        let (Ok(previous) | Err(previous)) = self.slots[kind.index()].fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |value| Some(value.saturating_add(1)),
        );
        previous
    }

    /// Decrements the counter for `kind`.
    fn exit(&self, kind: OperationKind) {
        let _ = self.slots[kind.index()].fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |value| Some(value.saturating_sub(1)),
        );
    }
}

/// Point-in-time copy of operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Active row fetches.
    pub row_fetch: u32,
    /// Active direct executions.
    pub direct_execute: u32,
    /// Active scalar fetches.
    pub scalar_fetch: u32,
    /// Active non-query executions.
    pub non_query: u32,
    /// Active raw queries.
    pub raw_query: u32,
}

impl CounterSnapshot {
    /// Returns true when every counter is zero.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.row_fetch == 0
            && self.direct_execute == 0
            && self.scalar_fetch == 0
            && self.non_query == 0
            && self.raw_query == 0
    }
}

// ============================================================================
// SECTION: Permit
// ============================================================================

/// Admission token; releases its counter slot when dropped.
#[derive(Debug)]
pub struct AdmissionPermit {
    /// Counters the permit was taken from.
    counters: Arc<OperationCounters>,
    /// Kind whose slot is held.
    kind: OperationKind,
    /// Chosen execution path.
    admission: Admission,
}

impl AdmissionPermit {
    /// Returns the chosen execution path.
    #[must_use]
    pub const fn admission(&self) -> Admission {
        self.admission
    }

    /// Returns the admitted operation kind.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Switches the permit to the inline path.
    pub const fn run_inline(&mut self) {
        self.admission = Admission::Inline;
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.counters.exit(self.kind);
    }
}

// ============================================================================
// SECTION: Workers
// ============================================================================

/// Caps the live worker threads of one connection.
#[derive(Debug)]
pub struct WorkerLimiter {
    /// Live workers.
    active: AtomicU32,
    /// Maximum live workers.
    max: u32,
}

impl WorkerLimiter {
    /// Creates a limiter allowing `max` live workers.
    #[must_use]
    pub const fn new(max: u32) -> Self {
        Self {
            active: AtomicU32::new(0),
            max,
        }
    }

    /// Reserves a worker slot, or returns `None` when all are taken.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<WorkerSlot> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < self.max).then_some(active.saturating_add(1))
            })
            .ok()
            .map(|_| WorkerSlot {
                limiter: Arc::clone(self),
            })
    }

    /// Returns the number of live workers.
    #[must_use]
    pub fn active(&self) -> u32 {
        self.active.load(Ordering::Acquire)
    }
}

/// Reserved worker slot; frees it when dropped.
#[derive(Debug)]
pub struct WorkerSlot {
    /// Limiter the slot was taken from.
    limiter: Arc<WorkerLimiter>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        let _ = self.limiter.active.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |active| Some(active.saturating_sub(1)),
        );
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
