// crates/sqlite-relay-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Relay Engine Library
// Description: rusqlite engine for the SQLite Relay coordination layer.
// Purpose: Expose configured SQLite connections, backup, and cloning.
// Dependencies: sqlite-relay-core, rusqlite, serde, tracing
// ============================================================================

//! ## Overview
//! Concrete [`sqlite_relay_core::Engine`] backed by bundled `SQLite`.
//! [`open_connection`] builds a shared [`SqliteConnection`];
//! [`backup_to_file`] and [`clone_database`] use the native online-backup API
//! through the engine-neutral page stepper. [`begin_savepoint`] and its
//! companions run named savepoints through the same dispatch path.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod backup;
pub mod engine;
pub mod open;
pub mod savepoint;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use backup::SqliteBackup;
pub use backup::backup_to_file;
pub use backup::clone_database;
pub use engine::SqliteEngine;
pub use engine::SqliteEngineConfig;
pub use engine::SqliteJournalMode;
pub use engine::SqliteSyncMode;
pub use open::SqliteConnection;
pub use open::open_connection;
pub use open::open_connection_with_metrics;
pub use open::open_in_memory;
pub use savepoint::begin_savepoint;
pub use savepoint::commit_savepoint;
pub use savepoint::rollback_savepoint;
