// crates/sqlite-relay-sqlite/src/savepoint.rs
// ============================================================================
// Module: SQLite Savepoints
// Description: Named savepoint helpers routed through the relay dispatch path.
// Purpose: Open, release, and roll back savepoints on a shared connection.
// Dependencies: sqlite-relay-core, tracing
// ============================================================================

//! ## Overview
//! Savepoints are issued and awaited like any other request, so they queue
//! behind earlier requests and never re-enter the engine.
//!
//! A savepoint belongs to the whole `SQLite` connection, not to the caller
//! that opened it. Requests from other callers on the same
//! [`SqliteConnection`] run inside an open savepoint until it is released or
//! rolled back.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use sqlite_relay_core::RelayError;
use tracing::debug;

use crate::open::SqliteConnection;

/// Prefix of generated savepoint names.
pub const SAVEPOINT_PREFIX: &str = "relay_sp_";
/// Maximum savepoint name length in bytes.
pub const MAX_SAVEPOINT_NAME_LENGTH: usize = 64;

/// Source of unique savepoint name suffixes.
static SAVEPOINT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Opens a savepoint and returns its generated name.
///
/// # Errors
/// Returns any error from issuing or awaiting the `SAVEPOINT` statement.
pub fn begin_savepoint(connection: &SqliteConnection) -> Result<String, RelayError> {
    let sequence = SAVEPOINT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let name = format!("{SAVEPOINT_PREFIX}{sequence}");
    connection.execute(&format!("SAVEPOINT \"{name}\""))?;
    debug!(connection = connection.name(), savepoint = %name, "savepoint opened");
    Ok(name)
}

/// Releases the savepoint `name`, keeping its changes.
///
/// # Errors
/// Returns [`RelayError::Malformed`] for an invalid name, or any error from
/// the `RELEASE` statement.
pub fn commit_savepoint(connection: &SqliteConnection, name: &str) -> Result<(), RelayError> {
    validate_savepoint_name(name)?;
    connection.execute(&format!("RELEASE \"{name}\""))?;
    debug!(connection = connection.name(), savepoint = name, "savepoint released");
    Ok(())
}

/// Rolls back to the savepoint `name` and releases it.
///
/// # Errors
/// Returns [`RelayError::Malformed`] for an invalid name, or any error from
/// the rollback batch.
pub fn rollback_savepoint(connection: &SqliteConnection, name: &str) -> Result<(), RelayError> {
    validate_savepoint_name(name)?;
    connection.execute(&format!("ROLLBACK TO SAVEPOINT \"{name}\"; RELEASE \"{name}\";"))?;
    debug!(connection = connection.name(), savepoint = name, "savepoint rolled back");
    Ok(())
}

/// Accepts non-empty ASCII identifiers made of letters, digits, and `_`.
fn validate_savepoint_name(name: &str) -> Result<(), RelayError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_SAVEPOINT_NAME_LENGTH
        && name.bytes().all(|byte| byte.is_ascii_alphanumeric() || byte == b'_');
    if valid {
        Ok(())
    } else {
        Err(RelayError::Malformed(format!("invalid savepoint name: {name}")))
    }
}
