// crates/sqlite-relay-sqlite/src/backup.rs
// ============================================================================
// Module: SQLite Online Backup
// Description: Native online-backup stepper and file backup helpers.
// Purpose: Copy a live database page by page into another database or file.
// Dependencies: sqlite-relay-core, rusqlite, tracing
// ============================================================================

//! ## Overview
//! [`SqliteBackup`] adapts the `SQLite` online-backup handle to
//! [`PageStepper`]. [`backup_to_file`] and [`clone_database`] open a file
//! target and drive the copy through [`Connection::backup_to`], so the source
//! engine stays serialized with regular requests for the whole copy.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rusqlite::backup::Backup;
use rusqlite::backup::StepResult;
use sqlite_relay_core::BackupPolicy;
use sqlite_relay_core::BackupProgress;
use sqlite_relay_core::BackupReport;
use sqlite_relay_core::Connection;
use sqlite_relay_core::ConnectionSettings;
use sqlite_relay_core::EngineError;
use sqlite_relay_core::PageProgress;
use sqlite_relay_core::PageStepper;
use sqlite_relay_core::RelayError;
use sqlite_relay_core::StepStatus;
use tracing::debug;
use tracing::warn;

use crate::engine::SqliteEngine;
use crate::engine::SqliteEngineConfig;
use crate::engine::SqliteJournalMode;
use crate::engine::map_rusqlite_error;
use crate::open::SqliteConnection;

/// Connection name used for file backup targets.
pub const BACKUP_TARGET_NAME: &str = "backup_target";

// ============================================================================
// SECTION: Stepper
// ============================================================================

/// Online backup in progress between two `SQLite` connections.
pub struct SqliteBackup<'a> {
    /// Native backup handle.
    backup: Backup<'a, 'a>,
}

impl<'a> SqliteBackup<'a> {
    /// Wraps a native backup handle.
    pub(crate) fn new(backup: Backup<'a, 'a>) -> Self {
        Self {
            backup,
        }
    }
}

impl PageStepper for SqliteBackup<'_> {
    fn step(&mut self, pages: i32) -> Result<StepStatus, EngineError> {
        match self.backup.step(pages).map_err(map_rusqlite_error)? {
            StepResult::Done => Ok(StepStatus::Done),
            StepResult::More => Ok(StepStatus::More),
            StepResult::Busy => Ok(StepStatus::Busy),
            StepResult::Locked => Ok(StepStatus::Locked),
            _ => Err(EngineError::other("unrecognized backup step result")),
        }
    }

    fn progress(&self) -> PageProgress {
        let progress = self.backup.progress();
        PageProgress {
            remaining: progress.remaining,
            page_count: progress.pagecount,
        }
    }
}

// ============================================================================
// SECTION: File Targets
// ============================================================================

/// Copies `source` into the database file at `path`, creating it if needed.
///
/// # Errors
/// Returns any error from opening the target or from
/// [`Connection::backup_to`].
pub fn backup_to_file(
    source: &SqliteConnection,
    path: &Path,
    policy: &BackupPolicy,
    context: &str,
    progress: Option<&mut dyn FnMut(&BackupProgress<'_>)>,
) -> Result<BackupReport, RelayError> {
    let config = SqliteEngineConfig {
        journal_mode: SqliteJournalMode::Delete,
        ..SqliteEngineConfig::file(BACKUP_TARGET_NAME, path)
    };
    let engine = SqliteEngine::open(&config)?;
    let settings = ConnectionSettings::new(config.name.clone(), config.identity());
    let target = Connection::new(engine, Arc::clone(source.coordinator()), settings)?;
    let copied = source.backup_to(&target, policy, context, progress);
    let closed = target.close();
    let report = copied?;
    closed?;
    debug!(
        source = source.name(),
        destination = %path.display(),
        steps = report.steps,
        "backup written"
    );
    Ok(report)
}

/// Copies `source` into a new database file at `path`.
///
/// Steps run back to back and abort on the first busy or locked step; a
/// partial target is removed on failure.
///
/// # Errors
/// Returns [`RelayError::Invalid`] when `path` already exists, or any error
/// from [`backup_to_file`].
pub fn clone_database(
    source: &SqliteConnection,
    path: &Path,
    progress: Option<&mut dyn FnMut(&BackupProgress<'_>)>,
) -> Result<BackupReport, RelayError> {
    if path.exists() {
        return Err(RelayError::Invalid(format!(
            "clone target already exists: {}",
            path.display()
        )));
    }
    let result = backup_to_file(source, path, &BackupPolicy::clone_policy(), "clone", progress);
    if result.is_err()
        && path.exists()
        && let Err(err) = fs::remove_file(path)
    {
        warn!(destination = %path.display(), error = %err, "failed to remove partial clone");
    }
    result
}
