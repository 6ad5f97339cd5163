// crates/sqlite-relay-sqlite/src/engine.rs
// ============================================================================
// Module: SQLite Engine
// Description: rusqlite-backed implementation of the relay engine seam.
// Purpose: Open configured connections and stream statement rows to a sink.
// Dependencies: sqlite-relay-core, rusqlite, serde
// ============================================================================

//! ## Overview
//! [`SqliteEngine`] owns one `rusqlite` connection and implements
//! [`Engine`]. Requests without parameters run as a statement batch; requests
//! with parameters must be a single statement whose placeholder count matches.
//! Every produced row is handed to the [`RowSink`] while the engine still
//! owns the row buffers.
//!
//! `SQLite` result codes map onto [`EngineErrorKind`]: `SQLITE_BUSY` is busy,
//! `SQLITE_LOCKED` is locked, `SQLITE_NOMEM` is fatal, `SQLITE_INTERRUPT` is
//! interrupted, and binding failures are malformed requests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Batch;
use rusqlite::Connection;
use rusqlite::fallible_iterator::FallibleIterator;
use rusqlite::ErrorCode;
use rusqlite::InterruptHandle;
use rusqlite::OpenFlags;
use rusqlite::Statement;
use rusqlite::backup::Backup;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use rusqlite::types::ValueRef;
use serde::Deserialize;
use sqlite_relay_core::Cell;
use sqlite_relay_core::ConnectionIdentity;
use sqlite_relay_core::Engine;
use sqlite_relay_core::EngineError;
use sqlite_relay_core::EngineErrorKind;
use sqlite_relay_core::EngineRequest;
use sqlite_relay_core::ExecSummary;
use sqlite_relay_core::Interrupter;
use sqlite_relay_core::RelayError;
use sqlite_relay_core::RowSink;
use sqlite_relay_core::Value;
use sqlite_relay_core::correlation::validate_connection_name;

use crate::backup::SqliteBackup;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default connection name.
pub const DEFAULT_CONNECTION_NAME: &str = "main";
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Open options for one `SQLite` engine.
///
/// # Invariants
/// - `path`, when set, must resolve to a file path (not a directory).
/// - `name` is embedded in correlation IDs and must be a valid connection
///   name.
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteEngineConfig {
    /// Connection name.
    #[serde(default = "default_connection_name")]
    pub name: String,
    /// Database file; `None` opens a private in-memory database.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode, applied to file databases.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Open the database read-only.
    #[serde(default)]
    pub read_only: bool,
    /// Create the file (and parent directories) when missing.
    #[serde(default = "default_create_if_missing")]
    pub create_if_missing: bool,
}

impl Default for SqliteEngineConfig {
    fn default() -> Self {
        Self {
            name: default_connection_name(),
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
            read_only: false,
            create_if_missing: default_create_if_missing(),
        }
    }
}

impl SqliteEngineConfig {
    /// Options for a named in-memory database.
    #[must_use]
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Options for a named file database.
    #[must_use]
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Returns what the engine will attach to.
    #[must_use]
    pub fn identity(&self) -> ConnectionIdentity {
        self.path.as_ref().map_or(ConnectionIdentity::Memory, |path| {
            ConnectionIdentity::File(path.clone())
        })
    }

    /// Validates the options.
    ///
    /// # Errors
    /// Returns [`RelayError::Invalid`] for an invalid name or path.
    pub fn validate(&self) -> Result<(), RelayError> {
        validate_connection_name(&self.name)?;
        if let Some(path) = &self.path {
            validate_engine_path(path)?;
        }
        if self.read_only && self.path.is_none() {
            return Err(RelayError::Invalid(
                "read_only requires a database path".to_string(),
            ));
        }
        Ok(())
    }
}

/// Returns the default connection name.
fn default_connection_name() -> String {
    DEFAULT_CONNECTION_NAME.to_string()
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default file creation flag.
const fn default_create_if_missing() -> bool {
    true
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// `SQLite` engine owning one native connection.
pub struct SqliteEngine {
    /// Native connection.
    connection: Connection,
}

impl SqliteEngine {
    /// Opens and configures a connection.
    ///
    /// # Errors
    /// Returns [`RelayError::Invalid`] for invalid options,
    /// [`RelayError::Io`] when the parent directory cannot be created, or the
    /// mapped `SQLite` open error.
    pub fn open(config: &SqliteEngineConfig) -> Result<Self, RelayError> {
        config.validate()?;
        let connection = match &config.path {
            Some(path) => {
                if config.create_if_missing && !config.read_only {
                    ensure_parent_dir(path)?;
                }
                Connection::open_with_flags(path, open_flags(config))
            }
            None => Connection::open_in_memory(),
        }
        .map_err(|err| RelayError::from(map_rusqlite_error(err)))?;
        apply_pragmas(&connection, config)?;
        Ok(Self {
            connection,
        })
    }

    /// Runs each statement of a parameterless batch.
    fn run_batch(&self, sql: &str, sink: &mut dyn RowSink) -> Result<usize, EngineError> {
        let mut batch = Batch::new(&self.connection, sql);
        let mut statements = 0_usize;
        while let Some(mut statement) = batch.next().map_err(map_rusqlite_error)? {
            ensure_parameter_count(&statement, 0)?;
            stream_rows(&mut statement, &[], sink)?;
            statements = statements.saturating_add(1);
        }
        Ok(statements)
    }

    /// Runs one statement with bound parameters.
    fn run_single(
        &self,
        sql: &str,
        params: &[Value],
        sink: &mut dyn RowSink,
    ) -> Result<(), EngineError> {
        let mut statement = self.connection.prepare(sql).map_err(map_rusqlite_error)?;
        ensure_parameter_count(&statement, params.len())?;
        stream_rows(&mut statement, params, sink)
    }
}

impl Engine for SqliteEngine {
    type Stepper<'a> = SqliteBackup<'a>;

    fn execute(
        &mut self,
        request: &EngineRequest<'_>,
        sink: &mut dyn RowSink,
    ) -> Result<ExecSummary, EngineError> {
        let changes_before = self.connection.total_changes();
        let statements = if request.params.is_empty() {
            self.run_batch(request.sql, sink)?
        } else {
            self.run_single(request.sql, request.params, sink)?;
            1
        };
        Ok(ExecSummary {
            rows_affected: self.connection.total_changes().saturating_sub(changes_before),
            last_insert_id: self.connection.last_insert_rowid(),
            statements,
        })
    }

    fn interrupter(&self) -> Option<Arc<dyn Interrupter>> {
        Some(Arc::new(SqliteInterrupt {
            handle: self.connection.get_interrupt_handle(),
        }))
    }

    fn begin_backup<'a>(
        &'a self,
        destination: &'a mut Self,
    ) -> Result<Self::Stepper<'a>, EngineError> {
        let backup = Backup::new(&self.connection, &mut destination.connection)
            .map_err(map_rusqlite_error)?;
        Ok(SqliteBackup::new(backup))
    }

    fn close(self) -> Result<(), EngineError> {
        self.connection.close().map_err(|(_, err)| map_rusqlite_error(err))
    }
}

/// Cross-thread interrupt for a running statement.
struct SqliteInterrupt {
    /// Native interrupt handle.
    handle: InterruptHandle,
}

impl Interrupter for SqliteInterrupt {
    fn interrupt(&self) {
        self.handle.interrupt();
    }
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// Rejects a statement whose placeholder count differs from `supplied`.
fn ensure_parameter_count(statement: &Statement<'_>, supplied: usize) -> Result<(), EngineError> {
    let expected = statement.parameter_count();
    if expected == supplied {
        Ok(())
    } else {
        Err(EngineError::malformed(format!(
            "statement expects {expected} parameters, got {supplied}"
        )))
    }
}

/// Steps `statement` to completion, handing each row to `sink`.
fn stream_rows(
    statement: &mut Statement<'_>,
    params: &[Value],
    sink: &mut dyn RowSink,
) -> Result<(), EngineError> {
    let columns: Vec<String> = statement.column_names().into_iter().map(str::to_string).collect();
    let bound: Vec<SqlValue> = params.iter().map(to_sql_value).collect();
    let mut rows = statement.query(params_from_iter(bound.iter())).map_err(map_rusqlite_error)?;
    while let Some(row) = rows.next().map_err(map_rusqlite_error)? {
        let mut cells = Vec::with_capacity(columns.len());
        for index in 0 .. columns.len() {
            cells.push(cell_from(row.get_ref(index).map_err(map_rusqlite_error)?));
        }
        sink.on_row(&columns, &cells);
    }
    Ok(())
}

/// Borrows a native column value as a cell.
fn cell_from(value: ValueRef<'_>) -> Cell<'_> {
    match value {
        ValueRef::Null => Cell::Null,
        ValueRef::Integer(value) => Cell::Integer(value),
        ValueRef::Real(value) => Cell::Real(value),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes).map_or(Cell::Blob(bytes), Cell::Text),
        ValueRef::Blob(bytes) => Cell::Blob(bytes),
    }
}

/// Converts a relay value into a bindable `SQLite` value.
fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(value) => SqlValue::Integer(*value),
        Value::Real(value) => SqlValue::Real(*value),
        Value::Text(value) => SqlValue::Text(value.clone()),
        Value::Blob(value) => SqlValue::Blob(value.clone()),
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Maps `SQLite` errors onto the engine error taxonomy.
pub(crate) fn map_rusqlite_error(err: rusqlite::Error) -> EngineError {
    let kind = match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy => EngineErrorKind::Busy,
            ErrorCode::DatabaseLocked => EngineErrorKind::Locked,
            ErrorCode::OutOfMemory => EngineErrorKind::Fatal,
            ErrorCode::OperationInterrupted => EngineErrorKind::Interrupted,
            ErrorCode::ParameterOutOfRange => EngineErrorKind::Malformed,
            _ => EngineErrorKind::Other,
        },
        rusqlite::Error::InvalidParameterCount(..)
        | rusqlite::Error::InvalidParameterName(_)
        | rusqlite::Error::MultipleStatement
        | rusqlite::Error::ToSqlConversionFailure(_) => EngineErrorKind::Malformed,
        _ => EngineErrorKind::Other,
    };
    EngineError::new(kind, err.to_string())
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns open flags for a file database.
fn open_flags(config: &SqliteEngineConfig) -> OpenFlags {
    let mode = if config.read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY
    } else if config.create_if_missing {
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
    };
    mode | OpenFlags::SQLITE_OPEN_FULL_MUTEX
}

/// Ensures the parent directory for a database file exists.
fn ensure_parent_dir(path: &Path) -> Result<(), RelayError> {
    let Some(parent) = path.parent() else {
        return Err(RelayError::Io("database path missing parent directory".to_string()));
    };
    std::fs::create_dir_all(parent).map_err(|err| RelayError::Io(err.to_string()))
}

/// Validates database paths for safety limits.
fn validate_engine_path(path: &Path) -> Result<(), RelayError> {
    if path.as_os_str().is_empty() {
        return Err(RelayError::Invalid("database path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(RelayError::Invalid("database path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(RelayError::Invalid(
                "database path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(RelayError::Invalid(
            "database path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Applies connection pragmas.
fn apply_pragmas(connection: &Connection, config: &SqliteEngineConfig) -> Result<(), RelayError> {
    let map = |err| RelayError::from(map_rusqlite_error(err));
    if config.path.is_some() && !config.read_only {
        let journal_mode = config.journal_mode.pragma_value();
        connection.execute_batch(&format!("PRAGMA journal_mode = {journal_mode};")).map_err(map)?;
    }
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(map)?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms)).map_err(map)?;
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
