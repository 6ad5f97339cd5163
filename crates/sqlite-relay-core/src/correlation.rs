// crates/sqlite-relay-core/src/correlation.rs
// ============================================================================
// Module: Correlation IDs
// Description: Sequence-based correlation IDs tying requests to results.
// Purpose: Issue unique, strictly increasing request identifiers.
// Dependencies: std
// ============================================================================

//! ## Overview
//! A [`CorrelationId`] combines a coordinator-wide sequence number with the
//! name of the connection that issued the request, rendered as
//! `"{sequence}_{connection}"`. The [`CorrelationIdGenerator`] is shared by all
//! connections attached to one coordinator, so sequence numbers are unique
//! and strictly increasing across connections.
//!
//! Connection names are embedded in every identifier and log line; they are
//! validated with [`validate_connection_name`] before a connection is built.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::error::RelayError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum allowed length for connection names.
pub const MAX_CONNECTION_NAME_LENGTH: usize = 128;

// ============================================================================
// SECTION: Correlation ID
// ============================================================================

/// Identifier tying one issued request to its result.
///
/// # Invariants
/// - `sequence` is unique per coordinator and never zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId {
    /// Coordinator-wide sequence number.
    sequence: u64,
    /// Name of the issuing connection.
    connection: Arc<str>,
}

impl CorrelationId {
    /// Returns the sequence number.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the issuing connection name.
    #[must_use]
    pub fn connection(&self) -> &str {
        &self.connection
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.sequence, self.connection)
    }
}

// ============================================================================
// SECTION: Generator
// ============================================================================

/// Monotonic correlation ID generator.
///
/// # Invariants
/// - Issued sequences strictly increase.
/// - The counter never wraps; exhaustion is reported as an error.
#[derive(Debug, Default)]
pub struct CorrelationIdGenerator {
    /// Last issued sequence number.
    last: AtomicU64,
}

impl CorrelationIdGenerator {
    /// Creates a generator whose first issued sequence is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self::starting_after(0)
    }

    /// Creates a generator whose first issued sequence is `last + 1`.
    #[must_use]
    pub const fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Issues the next correlation ID for `connection`.
    ///
    /// # Errors
    /// Returns [`RelayError::SequenceExhausted`] once `u64::MAX` was issued.
    pub fn issue(&self, connection: &Arc<str>) -> Result<CorrelationId, RelayError> {
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| last.checked_add(1))
            .map_err(|_| RelayError::SequenceExhausted)?;
        Ok(CorrelationId {
            sequence: previous.saturating_add(1),
            connection: Arc::clone(connection),
        })
    }

    /// Returns the last issued sequence number (0 before the first issue).
    #[must_use]
    pub fn last_issued(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}

// ============================================================================
// SECTION: Connection Names
// ============================================================================

/// Validates a connection name for use inside correlation IDs.
///
/// # Errors
/// Returns [`RelayError::Invalid`] when the name is empty, too long, or
/// contains whitespace or control characters.
pub fn validate_connection_name(name: &str) -> Result<(), RelayError> {
    if name.is_empty() {
        return Err(RelayError::Invalid("connection name must not be empty".to_string()));
    }
    if name.len() > MAX_CONNECTION_NAME_LENGTH {
        return Err(RelayError::Invalid(format!(
            "connection name exceeds {MAX_CONNECTION_NAME_LENGTH} bytes"
        )));
    }
    if name.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
        return Err(RelayError::Invalid(
            "connection name must not contain whitespace or control characters".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
