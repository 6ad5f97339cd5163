// crates/sqlite-relay-sqlite/src/open.rs
// ============================================================================
// Module: SQLite Connection Builders
// Description: Shortcuts that open an engine and wrap it as a relay connection.
// Purpose: Give callers a ready Connection from engine options.
// Dependencies: sqlite-relay-core
// ============================================================================

//! ## Overview
//! Builders for [`SqliteConnection`]. Every connection built here attaches to
//! the coordinator passed in; connections sharing one coordinator share its
//! correlation counter and pending queue.

use std::sync::Arc;

use sqlite_relay_core::Connection;
use sqlite_relay_core::ConnectionSettings;
use sqlite_relay_core::Coordinator;
use sqlite_relay_core::DispatchOptions;
use sqlite_relay_core::RelayError;
use sqlite_relay_core::RelayMetrics;

use crate::engine::SqliteEngine;
use crate::engine::SqliteEngineConfig;

/// Relay connection backed by `SQLite`.
pub type SqliteConnection = Connection<SqliteEngine>;

/// Opens an engine from `config` and wraps it as a connection.
///
/// # Errors
/// Returns any error from [`SqliteEngine::open`] or [`Connection::new`].
pub fn open_connection(
    config: &SqliteEngineConfig,
    coordinator: Arc<Coordinator>,
    options: DispatchOptions,
) -> Result<SqliteConnection, RelayError> {
    let settings = ConnectionSettings::new(config.name.clone(), config.identity())
        .with_options(options);
    open_with_settings(config, coordinator, settings)
}

/// Opens an engine with metrics reporting to `metrics`.
///
/// # Errors
/// Returns any error from [`SqliteEngine::open`] or [`Connection::new`].
pub fn open_connection_with_metrics(
    config: &SqliteEngineConfig,
    coordinator: Arc<Coordinator>,
    options: DispatchOptions,
    metrics: Arc<dyn RelayMetrics>,
) -> Result<SqliteConnection, RelayError> {
    let settings = ConnectionSettings::new(config.name.clone(), config.identity())
        .with_options(options)
        .with_metrics(metrics);
    open_with_settings(config, coordinator, settings)
}

/// Opens a named private in-memory database with default dispatch options.
///
/// # Errors
/// Returns [`RelayError::Invalid`] for an invalid name, or the open error.
pub fn open_in_memory(
    name: &str,
    coordinator: Arc<Coordinator>,
) -> Result<SqliteConnection, RelayError> {
    open_connection(&SqliteEngineConfig::in_memory(name), coordinator, DispatchOptions::default())
}

/// Opens the engine and attaches it to `coordinator`.
fn open_with_settings(
    config: &SqliteEngineConfig,
    coordinator: Arc<Coordinator>,
    settings: ConnectionSettings,
) -> Result<SqliteConnection, RelayError> {
    let engine = SqliteEngine::open(config)?;
    Connection::new(engine, coordinator, settings)
}
