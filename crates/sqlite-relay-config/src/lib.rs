// crates/sqlite-relay-config/src/lib.rs
// ============================================================================
// Module: SQLite Relay Config Library
// Description: Canonical config model, loading guards, and validation.
// Purpose: Single source of truth for sqlite-relay.toml semantics.
// Dependencies: sqlite-relay-core, sqlite-relay-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `sqlite-relay-config` defines the configuration model for `SQLite` Relay:
//! coordinator capacity, dispatch policy, engine open options, and the
//! default backup policy. Loading is strict and fail-closed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::CONFIG_ENV_VAR;
pub use config::ConfigError;
pub use config::DEFAULT_CONFIG_NAME;
pub use config::MAX_CONFIG_FILE_SIZE;
pub use config::RelayConfig;
pub use examples::config_toml_example;
