// crates/sqlite-relay-config/src/config.rs
// ============================================================================
// Module: SQLite Relay Configuration
// Description: Configuration loading and validation for SQLite Relay.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: sqlite-relay-core, sqlite-relay-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every section and field has a default, so an absent file yields a working
//! in-memory setup. Invalid configuration fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use sqlite_relay_core::BackupPolicy;
use sqlite_relay_core::Coordinator;
use sqlite_relay_core::CoordinatorConfig;
use sqlite_relay_core::DispatchOptions;
use sqlite_relay_core::RelayError;
use sqlite_relay_sqlite::SqliteConnection;
use sqlite_relay_sqlite::SqliteEngineConfig;
use sqlite_relay_sqlite::open_connection;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "sqlite-relay.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "SQLITE_RELAY_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config Model
// ============================================================================

/// Complete relay configuration.
///
/// # Invariants
/// - Every section defaults independently; an empty document is valid.
/// - Unknown keys are rejected in every section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Pending queue settings.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Admission and retry policy for the connection.
    #[serde(default)]
    pub dispatch: DispatchOptions,
    /// Engine open options.
    #[serde(default)]
    pub engine: SqliteEngineConfig,
    /// Default backup stepping policy.
    #[serde(default)]
    pub backup: BackupPolicy,
}

impl RelayConfig {
    /// Loads configuration using the default resolution rules.
    ///
    /// An explicit `path` must exist. Without one, the
    /// `SQLITE_RELAY_CONFIG` variable is consulted, then
    /// `sqlite-relay.toml` in the working directory; when neither is present
    /// the defaults are returned.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match resolve_path(path)? {
            Some(resolved) => Self::load_file(&resolved),
            None => Ok(Self::default()),
        }
    }

    /// Loads and validates the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the path, size, encoding, syntax, or
    /// content is invalid.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        validate_path(path)?;
        let bytes = fs::read(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or
    /// [`ConfigError::Invalid`] for invalid values.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when any section is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.coordinator.validate()?;
        self.dispatch.validate()?;
        self.engine.validate()?;
        self.backup.validate()?;
        Ok(())
    }

    /// Builds a coordinator from the `[coordinator]` section.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Invalid`] when the section is invalid.
    pub fn build_coordinator(&self) -> Result<Arc<Coordinator>, RelayError> {
        Coordinator::new(self.coordinator.clone()).map(Arc::new)
    }

    /// Opens the configured engine against `coordinator`.
    ///
    /// # Errors
    ///
    /// Returns any error from opening the engine.
    pub fn open_connection(
        &self,
        coordinator: Arc<Coordinator>,
    ) -> Result<SqliteConnection, RelayError> {
        open_connection(&self.engine, coordinator, self.dispatch.clone())
    }

    /// Builds a fresh coordinator and opens the configured engine on it.
    ///
    /// # Errors
    ///
    /// Returns any error from building the coordinator or opening the
    /// engine.
    pub fn connect(&self) -> Result<SqliteConnection, RelayError> {
        let coordinator = self.build_coordinator()?;
        self.open_connection(coordinator)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<RelayError> for ConfigError {
    fn from(error: RelayError) -> Self {
        match error {
            RelayError::Invalid(message) => Self::Invalid(message),
            RelayError::Io(message) => Self::Io(message),
            other => Self::Invalid(other.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from the argument, environment, or working
/// directory. Returns `None` when no source applies.
fn resolve_path(path: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = path {
        return Ok(Some(path.to_path_buf()));
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(Some(PathBuf::from(env_path)));
    }
    let default_path = PathBuf::from(DEFAULT_CONFIG_NAME);
    Ok(default_path.is_file().then_some(default_path))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
