// crates/sqlite-relay-core/src/stats.rs
// ============================================================================
// Module: Queue Statistics
// Description: Lightweight counters and wait histograms for the coordinator.
// Purpose: Expose queue health and contention without a metrics backend.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! [`QueueStats`] is updated by the coordinator while it already holds its
//! queue lock, so recording is a handful of saturating additions.
//! [`QueueStatsSnapshot`] is the serializable copy handed to callers.
//! Histograms use `<= upper_bound` buckets plus one overflow slot.

use std::time::Duration;

use serde::Serialize;

use crate::error::RelayError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Microsecond bucket boundaries for waiter wait-time histograms.
pub const AWAIT_WAIT_BUCKETS_US: [u64; 12] = [
    50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 25_000, 100_000, 1_000_000, 10_000_000,
];

// ============================================================================
// SECTION: Snapshot Types
// ============================================================================

/// Classified engine error counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineErrorCounts {
    /// Busy errors.
    pub busy: u64,
    /// Locked errors.
    pub locked: u64,
    /// All other errors.
    pub other: u64,
}

/// Point-in-time copy of coordinator statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatsSnapshot {
    /// Records currently in the queue.
    pub pending: usize,
    /// Records ever enqueued.
    pub enqueued: u64,
    /// Enqueues rejected at capacity.
    pub rejected: u64,
    /// Records marked finished.
    pub completed: u64,
    /// Records claimed by a waiter.
    pub received: u64,
    /// Waiter timeouts.
    pub timed_out: u64,
    /// Abandoned records dropped on completion.
    pub orphans_dropped: u64,
    /// Rows delivered for an unknown correlation ID.
    pub rows_discarded: u64,
    /// Busy/locked re-runs of regular requests.
    pub lock_retries: u64,
    /// Classified failures of finished records.
    pub errors: EngineErrorCounts,
    /// Wait histogram bucket bounds in microseconds.
    pub await_wait_buckets_us: Vec<u64>,
    /// Wait histogram counts (length = `await_wait_buckets_us.len() + 1`).
    pub await_wait_histogram_us: Vec<u64>,
    /// Approximate p50 wait in microseconds.
    pub await_wait_p50_us: u64,
    /// Approximate p95 wait in microseconds.
    pub await_wait_p95_us: u64,
}

// ============================================================================
// SECTION: Accumulator
// ============================================================================

/// Mutable statistics guarded by the coordinator lock.
#[derive(Debug, Default)]
pub(crate) struct QueueStats {
    /// Records ever enqueued.
    pub(crate) enqueued: u64,
    /// Enqueues rejected at capacity.
    pub(crate) rejected: u64,
    /// Records marked finished.
    pub(crate) completed: u64,
    /// Records claimed by a waiter.
    pub(crate) received: u64,
    /// Waiter timeouts.
    pub(crate) timed_out: u64,
    /// Abandoned records dropped on completion.
    pub(crate) orphans_dropped: u64,
    /// Rows delivered for an unknown correlation ID.
    pub(crate) rows_discarded: u64,
    /// Busy/locked re-runs.
    pub(crate) lock_retries: u64,
    /// Classified failures.
    errors: EngineErrorCounts,
    /// Wait histogram counts.
    await_wait_histogram_us: [u64; AWAIT_WAIT_BUCKETS_US.len() + 1],
}

impl QueueStats {
    /// Classifies and counts a failed record.
    pub(crate) fn record_error(&mut self, error: &RelayError) {
        match error {
            RelayError::Busy(_) => self.errors.busy = self.errors.busy.saturating_add(1),
            RelayError::Locked(_) => self.errors.locked = self.errors.locked.saturating_add(1),
            _ => self.errors.other = self.errors.other.saturating_add(1),
        }
    }

    /// Records how long a waiter blocked before claiming its record.
    pub(crate) fn record_wait(&mut self, waited: Duration) {
        let micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
        let index = histogram_bucket_index_from_bounds(&AWAIT_WAIT_BUCKETS_US, micros);
        if let Some(slot) = self.await_wait_histogram_us.get_mut(index) {
            *slot = slot.saturating_add(1);
        }
    }

    /// Builds a snapshot with the given pending count.
    pub(crate) fn snapshot(&self, pending: usize) -> QueueStatsSnapshot {
        let histogram = self.await_wait_histogram_us.to_vec();
        QueueStatsSnapshot {
            pending,
            enqueued: self.enqueued,
            rejected: self.rejected,
            completed: self.completed,
            received: self.received,
            timed_out: self.timed_out,
            orphans_dropped: self.orphans_dropped,
            rows_discarded: self.rows_discarded,
            lock_retries: self.lock_retries,
            errors: self.errors,
            await_wait_buckets_us: AWAIT_WAIT_BUCKETS_US.to_vec(),
            await_wait_p50_us: histogram_percentile(&AWAIT_WAIT_BUCKETS_US, &histogram, 50),
            await_wait_p95_us: histogram_percentile(&AWAIT_WAIT_BUCKETS_US, &histogram, 95),
            await_wait_histogram_us: histogram,
        }
    }
}

/// Increments a counter without overflow.
pub(crate) const fn bump(counter: &mut u64) {
    *counter = counter.saturating_add(1);
}

// ============================================================================
// SECTION: Histogram Helpers
// ============================================================================

/// Returns the bucket index for `value`; values above every bound land in
/// the overflow slot.
fn histogram_bucket_index_from_bounds(bounds: &[u64], value: u64) -> usize {
    bounds.iter().position(|upper_bound| value <= *upper_bound).unwrap_or(bounds.len())
}

/// Computes an approximate percentile from bucketed counts.
fn histogram_percentile(bounds: &[u64], counts: &[u64], percentile: u32) -> u64 {
    if percentile == 0 || percentile > 100 || counts.is_empty() || bounds.is_empty() {
        return 0;
    }
    let total = counts.iter().fold(0_u64, |acc, value| acc.saturating_add(*value));
    if total == 0 {
        return 0;
    }
    let rank =
        total.saturating_mul(u64::from(percentile)).saturating_add(99).saturating_div(100).max(1);
    let mut running = 0_u64;
    for (idx, count) in counts.iter().enumerate() {
        running = running.saturating_add(*count);
        if running >= rank {
            return bounds.get(idx).or_else(|| bounds.last()).copied().unwrap_or(0);
        }
    }
    bounds.last().copied().unwrap_or(0)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
