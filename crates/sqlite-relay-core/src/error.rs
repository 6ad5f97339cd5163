// crates/sqlite-relay-core/src/error.rs
// ============================================================================
// Module: Relay Errors
// Description: Tagged error taxonomy for coordination and engine failures.
// Purpose: Give every public operation one clonable error type.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! [`RelayError`] is the single error type returned by the coordination layer.
//! Engines report failures as [`EngineError`], tagged with an
//! [`EngineErrorKind`] so busy/locked contention can be told apart from
//! malformed requests and fatal conditions.
//!
//! Errors are stored inside pending request records and handed to waiters, so
//! every variant is `Clone` and carries owned string payloads.

use std::fmt;

use thiserror::Error;

use crate::correlation::CorrelationId;

// ============================================================================
// SECTION: Engine Errors
// ============================================================================

/// Classification of an engine-reported failure.
///
/// # Invariants
/// - Labels are stable for metrics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorKind {
    /// Resource held by another writer; retryable.
    Busy,
    /// Narrower transient lock condition; retryable.
    Locked,
    /// Parameter count mismatch or unsupported binding.
    Malformed,
    /// Engine call was interrupted.
    Interrupted,
    /// Unrecoverable condition such as out-of-memory.
    Fatal,
    /// Any other engine failure.
    Other,
}

impl EngineErrorKind {
    /// Returns a stable label for this error kind.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::Locked => "locked",
            Self::Malformed => "malformed",
            Self::Interrupted => "interrupted",
            Self::Fatal => "fatal",
            Self::Other => "other",
        }
    }

    /// Returns true for busy and locked contention.
    #[must_use]
    pub const fn is_contention(self) -> bool {
        matches!(self, Self::Busy | Self::Locked)
    }
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Failure reported by an [`crate::Engine`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct EngineError {
    /// Failure classification.
    pub kind: EngineErrorKind,
    /// Engine-provided message.
    pub message: String,
}

impl EngineError {
    /// Creates an engine error of the given kind.
    #[must_use]
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a busy error.
    #[must_use]
    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Busy, message)
    }

    /// Creates a locked error.
    #[must_use]
    pub fn locked(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Locked, message)
    }

    /// Creates a malformed-request error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Malformed, message)
    }

    /// Creates a fatal error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Fatal, message)
    }

    /// Creates an unclassified error.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Other, message)
    }
}

// ============================================================================
// SECTION: Relay Errors
// ============================================================================

/// Errors returned by relay operations.
///
/// # Invariants
/// - `Busy` and `Locked` are the only retryable engine conditions.
/// - `Timeout` never implies the engine call was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Operation attempted on a closed or never-opened connection.
    #[error("connection {0} is not open")]
    NotOpen(String),
    /// Engine resource held by another writer.
    #[error("database is busy: {0}")]
    Busy(String),
    /// Engine resource locked.
    #[error("database is locked: {0}")]
    Locked(String),
    /// Request rejected before or during binding.
    #[error("malformed request: {0}")]
    Malformed(String),
    /// Waiter deadline elapsed before the request finished.
    #[error("request {id} timed out after {waited_ms} ms")]
    Timeout {
        /// Correlation ID that was awaited.
        id: CorrelationId,
        /// Milliseconds spent waiting.
        waited_ms: u64,
    },
    /// Correlation ID not present in the queue.
    #[error("request {0} not found")]
    NotFound(CorrelationId),
    /// Unrecoverable engine failure; the connection is closed.
    #[error("engine fatal error: {0}")]
    EngineFatal(String),
    /// Other engine failure.
    #[error("engine error: {0}")]
    Engine(String),
    /// Engine call was interrupted.
    #[error("request interrupted: {0}")]
    Interrupted(String),
    /// Connection still has requests in flight.
    #[error("connection {0} has requests in flight")]
    InFlight(String),
    /// Pending request queue is at capacity.
    #[error("request queue overloaded: {message}")]
    Overloaded {
        /// Human-readable overload message.
        message: String,
        /// Optional retry-after hint in milliseconds.
        retry_after_ms: Option<u64>,
    },
    /// Correlation counter range exhausted.
    #[error("correlation sequence exhausted")]
    SequenceExhausted,
    /// Backup did not finish within its deadline.
    #[error("backup deadline exceeded after {elapsed_ms} ms")]
    BackupDeadline {
        /// Milliseconds elapsed when the deadline fired.
        elapsed_ms: u64,
    },
    /// Invalid configuration or argument.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// I/O or synchronization failure.
    #[error("io error: {0}")]
    Io(String),
}

impl RelayError {
    /// Returns a stable label for metrics and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NotOpen(_) => "not_open",
            Self::Busy(_) => "busy",
            Self::Locked(_) => "locked",
            Self::Malformed(_) => "malformed",
            Self::Timeout { .. } => "timeout",
            Self::NotFound(_) => "not_found",
            Self::EngineFatal(_) => "engine_fatal",
            Self::Engine(_) => "engine",
            Self::Interrupted(_) => "interrupted",
            Self::InFlight(_) => "in_flight",
            Self::Overloaded { .. } => "overloaded",
            Self::SequenceExhausted => "sequence_exhausted",
            Self::BackupDeadline { .. } => "backup_deadline",
            Self::Invalid(_) => "invalid",
            Self::Io(_) => "io",
        }
    }

    /// Returns true when retrying the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_) | Self::Locked(_) | Self::Overloaded { .. })
    }
}

impl From<EngineError> for RelayError {
    fn from(error: EngineError) -> Self {
        match error.kind {
            EngineErrorKind::Busy => Self::Busy(error.message),
            EngineErrorKind::Locked => Self::Locked(error.message),
            EngineErrorKind::Malformed => Self::Malformed(error.message),
            EngineErrorKind::Interrupted => Self::Interrupted(error.message),
            EngineErrorKind::Fatal => Self::EngineFatal(error.message),
            EngineErrorKind::Other => Self::Engine(error.message),
        }
    }
}
