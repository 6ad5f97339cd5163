// crates/sqlite-relay-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example configuration payload.
// Purpose: Deterministic example for docs and tooling.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Canonical example for `SQLite` Relay configuration. Every key shown is at
//! its default except `engine.path` and `engine.name`.

/// Returns a canonical example `sqlite-relay.toml` configuration.
#[must_use]
pub fn config_toml_example() -> String {
    String::from(
        r#"[coordinator]
max_pending_requests = 100000
default_await_timeout_ms = 300000
overload_retry_after_ms = 10

[dispatch]
inline_threshold = 1
lock_retry_limit = 0
lock_retry_backoff_ms = 25
interrupt_on_timeout = false
max_workers = 16

[engine]
name = "primary"
path = "relay.db"
busy_timeout_ms = 5000
journal_mode = "wal"
sync_mode = "full"
read_only = false
create_if_missing = true

[backup]
pages_per_step = 5
step_sleep_ms = 250
abort_on_busy = false
abort_on_locked = false
# max_duration_ms = 60000
"#,
    )
}
