// crates/sqlite-relay-core/src/backup.rs
// ============================================================================
// Module: Copy/Backup Stepper
// Description: Page-stepped copy loop with busy/locked policy and progress.
// Purpose: Drive an engine page copy to completion or a terminal abort.
// Dependencies: serde, tracing
// ============================================================================

//! ## Overview
//! [`copy_pages`] repeatedly asks a [`PageStepper`] to copy a bounded number
//! of pages. After every step that is not aborted it reports progress; a
//! `done` step ends the loop, `busy` and `locked` steps either abort
//! (per [`BackupPolicy`]) or sleep and retry, and engine errors end it.
//!
//! Without [`BackupPolicy::max_duration_ms`] the loop is unbounded and relies
//! on the engine eventually completing.

use std::thread;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::engine::PageProgress;
use crate::engine::PageStepper;
use crate::engine::StepStatus;
use crate::error::RelayError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default pages copied per step.
pub const DEFAULT_PAGES_PER_STEP: i32 = 5;
/// Default sleep between steps.
pub const DEFAULT_STEP_SLEEP_MS: u64 = 250;

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Backup stepping policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackupPolicy {
    /// Pages copied per step.
    #[serde(default = "default_pages_per_step")]
    pub pages_per_step: i32,
    /// Sleep after each unfinished step.
    #[serde(default = "default_step_sleep_ms")]
    pub step_sleep_ms: u64,
    /// Return immediately on a busy step.
    #[serde(default)]
    pub abort_on_busy: bool,
    /// Return immediately on a locked step.
    #[serde(default)]
    pub abort_on_locked: bool,
    /// Optional overall deadline.
    #[serde(default)]
    pub max_duration_ms: Option<u64>,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self {
            pages_per_step: DEFAULT_PAGES_PER_STEP,
            step_sleep_ms: DEFAULT_STEP_SLEEP_MS,
            abort_on_busy: false,
            abort_on_locked: false,
            max_duration_ms: None,
        }
    }
}

impl BackupPolicy {
    /// Policy for cloning into a fresh target: no sleep, abort on contention.
    #[must_use]
    pub const fn clone_policy() -> Self {
        Self {
            pages_per_step: DEFAULT_PAGES_PER_STEP,
            step_sleep_ms: 0,
            abort_on_busy: true,
            abort_on_locked: true,
            max_duration_ms: None,
        }
    }

    /// Validates the policy.
    ///
    /// # Errors
    /// Returns [`RelayError::Invalid`] when `pages_per_step` is not positive.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.pages_per_step <= 0 {
            return Err(RelayError::Invalid("pages_per_step must be greater than zero".to_string()));
        }
        Ok(())
    }

    /// Returns the sleep between steps.
    #[must_use]
    pub const fn step_sleep(&self) -> Duration {
        Duration::from_millis(self.step_sleep_ms)
    }
}

/// Default pages per step.
const fn default_pages_per_step() -> i32 {
    DEFAULT_PAGES_PER_STEP
}

/// Default sleep between steps.
const fn default_step_sleep_ms() -> u64 {
    DEFAULT_STEP_SLEEP_MS
}

// ============================================================================
// SECTION: Progress
// ============================================================================

/// Progress reported after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupProgress<'a> {
    /// Pages still to copy.
    pub remaining: i32,
    /// Total pages in the source.
    pub page_count: i32,
    /// Source connection name.
    pub connection: &'a str,
    /// Caller-supplied context.
    pub context: &'a str,
}

/// Summary of a completed copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    /// Steps attempted.
    pub steps: u64,
    /// Busy steps retried.
    pub busy_retries: u64,
    /// Locked steps retried.
    pub locked_retries: u64,
    /// Final page counters.
    pub progress: PageProgress,
}

// ============================================================================
// SECTION: Stepper
// ============================================================================

/// Copies pages until the stepper reports completion.
///
/// `progress` runs once per step that is not aborted, including the final
/// `done` step.
///
/// # Errors
/// Returns [`RelayError::Busy`] or [`RelayError::Locked`] when the matching
/// abort flag is set, [`RelayError::BackupDeadline`] when the deadline
/// passes, [`RelayError::Invalid`] for an invalid policy, or the engine's
/// error.
pub fn copy_pages<S: PageStepper + ?Sized>(
    stepper: &mut S,
    policy: &BackupPolicy,
    connection: &str,
    context: &str,
    mut progress: Option<&mut dyn FnMut(&BackupProgress<'_>)>,
) -> Result<BackupReport, RelayError> {
    policy.validate()?;
    let started = Instant::now();
    let deadline =
        policy.max_duration_ms.and_then(|ms| started.checked_add(Duration::from_millis(ms)));
    let mut report = BackupReport::default();
    loop {
        let status = stepper.step(policy.pages_per_step)?;
        report.steps = report.steps.saturating_add(1);
        match status {
            StepStatus::Busy => {
                if policy.abort_on_busy {
                    warn!(connection, steps = report.steps, "backup aborted on busy");
                    return Err(RelayError::Busy(format!("backup of {connection} aborted")));
                }
                report.busy_retries = report.busy_retries.saturating_add(1);
            }
            StepStatus::Locked => {
                if policy.abort_on_locked {
                    warn!(connection, steps = report.steps, "backup aborted on locked");
                    return Err(RelayError::Locked(format!("backup of {connection} aborted")));
                }
                report.locked_retries = report.locked_retries.saturating_add(1);
            }
            StepStatus::More | StepStatus::Done => {}
        }
        report.progress = stepper.progress();
        if let Some(callback) = progress.as_deref_mut() {
            callback(&BackupProgress {
                remaining: report.progress.remaining,
                page_count: report.progress.page_count,
                connection,
                context,
            });
        }
        if status == StepStatus::Done {
            debug!(
                connection,
                steps = report.steps,
                pages = report.progress.page_count,
                "backup done"
            );
            return Ok(report);
        }
        if let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            warn!(connection, elapsed_ms, "backup deadline exceeded");
            return Err(RelayError::BackupDeadline { elapsed_ms });
        }
        let sleep = policy.step_sleep();
        if !sleep.is_zero() {
            thread::sleep(sleep);
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
