// crates/sqlite-relay-core/src/lib.rs
// ============================================================================
// Module: SQLite Relay Core Library
// Description: Request coordination and result correlation for one engine.
// Purpose: Let many callers share a blocking, non-reentrant connection.
// Dependencies: serde, thiserror, tracing
// ============================================================================

//! ## Overview
//! `SQLite` Relay Core lets independent callers share a connection whose engine
//! runs one blocking call at a time and only lends out results until its next
//! call. Requests are admitted per operation kind, tracked in a shared
//! [`Coordinator`] queue keyed by [`CorrelationId`], filled by a
//! [`ResultCollector`] during the engine call, and claimed exactly once by a
//! waiter.
//! Invariants:
//! - Sequential requests on one path complete in issue order.
//! - A record exists from enqueue until its waiter claims it.
//! - Busy and locked conditions are retried only by the backup stepper unless
//!   a connection opts in to lock retries.
//!
//! The engine itself is abstracted by [`Engine`]; `sqlite-relay-sqlite`
//! provides the `SQLite` implementation.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod admission;
pub mod backup;
pub mod collector;
pub mod connection;
pub mod coordinator;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod stats;
pub mod telemetry;
pub mod value;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use admission::Admission;
pub use admission::CounterSnapshot;
pub use admission::DispatchOptions;
pub use admission::OperationKind;
pub use backup::BackupPolicy;
pub use backup::BackupProgress;
pub use backup::BackupReport;
pub use backup::copy_pages;
pub use collector::ResultCollector;
pub use connection::Connection;
pub use connection::ConnectionIdentity;
pub use connection::ConnectionSettings;
pub use coordinator::Coordinator;
pub use coordinator::CoordinatorConfig;
pub use coordinator::QueryResult;
pub use coordinator::RecordSnapshot;
pub use coordinator::RecordState;
pub use correlation::CorrelationId;
pub use correlation::CorrelationIdGenerator;
pub use engine::Engine;
pub use engine::EngineRequest;
pub use engine::ExecSummary;
pub use engine::Interrupter;
pub use engine::PageProgress;
pub use engine::PageStepper;
pub use engine::RowSink;
pub use engine::StepStatus;
pub use error::EngineError;
pub use error::EngineErrorKind;
pub use error::RelayError;
pub use stats::QueueStatsSnapshot;
pub use telemetry::NoopMetrics;
pub use telemetry::RelayMetricEvent;
pub use telemetry::RelayMetrics;
pub use telemetry::RelayOutcome;
pub use value::Cell;
pub use value::Column;
pub use value::DataType;
pub use value::Row;
pub use value::Value;
