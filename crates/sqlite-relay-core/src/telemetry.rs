// crates/sqlite-relay-core/src/telemetry.rs
// ============================================================================
// Module: Relay Telemetry
// Description: Observability hooks for dispatched requests.
// Purpose: Provide metric events and latency buckets without hard deps.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A thin metrics interface invoked once per completed request. Deployments
//! plug in their own backend by implementing [`RelayMetrics`]; the default is
//! [`NoopMetrics`]. Events carry request text only through the correlation ID,
//! never the statement itself.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::admission::Admission;
use crate::admission::OperationKind;
use crate::correlation::CorrelationId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Suggested latency buckets in milliseconds for request histograms.
pub const RELAY_LATENCY_BUCKETS_MS: &[u64] =
    &[1, 2, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000];

// ============================================================================
// SECTION: Metric Labels
// ============================================================================

/// Outcome label for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelayOutcome {
    /// Request succeeded.
    Ok,
    /// Request failed.
    Error,
}

impl RelayOutcome {
    /// Returns a stable label for the outcome.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// Metric event for one completed request.
#[derive(Debug, Clone)]
pub struct RelayMetricEvent {
    /// Connection that ran the request.
    pub connection: Arc<str>,
    /// Operation kind.
    pub kind: OperationKind,
    /// Execution path.
    pub admission: Admission,
    /// Request outcome.
    pub outcome: RelayOutcome,
    /// Stable error label when failed.
    pub error_kind: Option<&'static str>,
    /// Correlation ID of the request.
    pub correlation_id: CorrelationId,
    /// Busy/locked re-runs performed.
    pub lock_retries: u32,
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Metrics sink for relay requests.
pub trait RelayMetrics: Send + Sync {
    /// Records a request counter event.
    fn record_request(&self, event: RelayMetricEvent);

    /// Records request latency from engine entry to completion.
    fn record_latency(&self, event: RelayMetricEvent, latency: Duration);
}

/// No-op metrics sink.
pub struct NoopMetrics;

impl RelayMetrics for NoopMetrics {
    fn record_request(&self, _event: RelayMetricEvent) {}

    fn record_latency(&self, _event: RelayMetricEvent, _latency: Duration) {}
}
