// crates/sqlite-relay-config/src/config/tests.rs
// ============================================================================
// Module: Config Helper Tests
// Description: Unit tests for path guards and error conversion.
// Purpose: Validate load guards without touching the process environment.
// Dependencies: sqlite-relay-config
// ============================================================================

//! ## Overview
//! Covers the private path guards and the mapping from relay errors into
//! configuration errors.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions use unwrap/expect for clarity."
)]

use super::*;

#[test]
fn validate_path_accepts_component_at_max() {
    let component = "a".repeat(MAX_PATH_COMPONENT_LENGTH);
    assert!(validate_path(Path::new(&format!("./{component}"))).is_ok());
}

#[test]
fn validate_path_rejects_component_too_long() {
    let component = "a".repeat(MAX_PATH_COMPONENT_LENGTH + 1);
    let err = validate_path(Path::new(&format!("./{component}"))).unwrap_err();
    assert!(err.to_string().contains("config path component too long"));
}

#[test]
fn validate_path_rejects_total_length() {
    let segments = vec!["a".repeat(200); 25];
    let err = validate_path(Path::new(&segments.join("/"))).unwrap_err();
    assert!(err.to_string().contains("config path exceeds max length"));
}

#[test]
fn explicit_path_wins_resolution() {
    let resolved = resolve_path(Some(Path::new("custom.toml"))).unwrap();
    assert_eq!(resolved, Some(PathBuf::from("custom.toml")));
}

#[test]
fn relay_errors_map_to_config_errors() {
    let invalid = ConfigError::from(RelayError::Invalid("bad".to_string()));
    assert!(matches!(invalid, ConfigError::Invalid(message) if message == "bad"));
    let io = ConfigError::from(RelayError::Io("disk".to_string()));
    assert!(matches!(io, ConfigError::Io(message) if message == "disk"));
    let other = ConfigError::from(RelayError::SequenceExhausted);
    assert!(matches!(other, ConfigError::Invalid(_)));
}
