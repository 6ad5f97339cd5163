// crates/sqlite-relay-core/src/engine.rs
// ============================================================================
// Module: Engine Interface
// Description: Blocking engine seam, row sinks, and page-copy primitives.
// Purpose: Keep the coordination layer independent of any concrete engine.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! An [`Engine`] is a non-reentrant, blocking connection: one call at a time,
//! with output valid only until the next call. Rows are pushed into a
//! [`RowSink`] synchronously from inside [`Engine::execute`]; the sink is the
//! token that correlates engine output with its pending request, so no
//! ambient correlation state is needed.
//!
//! Online copies go through [`Engine::begin_backup`], which yields a
//! [`PageStepper`] driven by [`crate::backup::copy_pages`].

use std::sync::Arc;

use serde::Serialize;

use crate::admission::OperationKind;
use crate::error::EngineError;
use crate::value::Cell;
use crate::value::Value;

// ============================================================================
// SECTION: Requests
// ============================================================================

/// One request handed to the engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineRequest<'a> {
    /// Request text.
    pub sql: &'a str,
    /// Bound parameters in placeholder order.
    pub params: &'a [Value],
    /// Operation kind that issued the request.
    pub kind: OperationKind,
}

/// Execution summary returned by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecSummary {
    /// Rows changed by the request.
    pub rows_affected: u64,
    /// Row id of the most recent insert on the connection.
    pub last_insert_id: i64,
    /// Number of statements executed.
    pub statements: usize,
}

// ============================================================================
// SECTION: Row Sink
// ============================================================================

/// Receives rows synchronously from inside an engine call.
///
/// Implementations must not block; the engine is paused until they return.
pub trait RowSink {
    /// Handles one row. `cells` is only valid for the duration of the call.
    fn on_row(&mut self, columns: &[String], cells: &[Cell<'_>]);
}

// ============================================================================
// SECTION: Interruption
// ============================================================================

/// Thread-safe handle that interrupts the engine's running call.
pub trait Interrupter: Send + Sync {
    /// Requests interruption of the current engine call, if any.
    fn interrupt(&self);
}

// ============================================================================
// SECTION: Page Copy
// ============================================================================

/// Status of one page-copy step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Pages remain to be copied.
    More,
    /// Copy finished.
    Done,
    /// Source or destination busy.
    Busy,
    /// Source or destination locked.
    Locked,
}

impl StepStatus {
    /// Returns a stable label for logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::More => "more",
            Self::Done => "done",
            Self::Busy => "busy",
            Self::Locked => "locked",
        }
    }
}

/// Page counters reported after a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PageProgress {
    /// Pages still to copy.
    pub remaining: i32,
    /// Total pages in the source.
    pub page_count: i32,
}

/// One in-progress page copy between two engine connections.
pub trait PageStepper {
    /// Copies up to `pages` pages.
    ///
    /// # Errors
    /// Returns [`EngineError`] for terminal engine failures. Busy and locked
    /// conditions are reported as [`StepStatus`] values instead.
    fn step(&mut self, pages: i32) -> Result<StepStatus, EngineError>;

    /// Returns the page counters after the last step.
    fn progress(&self) -> PageProgress;
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Blocking, non-reentrant engine connection.
pub trait Engine: Send + 'static {
    /// Page stepper borrowing a source and a destination engine.
    type Stepper<'a>: PageStepper
    where
        Self: 'a;

    /// Executes `request`, pushing every produced row into `sink`.
    ///
    /// # Errors
    /// Returns [`EngineError`] when preparation, binding, or stepping fails.
    fn execute(
        &mut self,
        request: &EngineRequest<'_>,
        sink: &mut dyn RowSink,
    ) -> Result<ExecSummary, EngineError>;

    /// Returns a handle able to interrupt a running call.
    fn interrupter(&self) -> Option<Arc<dyn Interrupter>>;

    /// Starts copying this engine's data into `destination`.
    ///
    /// # Errors
    /// Returns [`EngineError`] when the copy cannot be initialized.
    fn begin_backup<'a>(&'a self, destination: &'a mut Self)
    -> Result<Self::Stepper<'a>, EngineError>;

    /// Closes the engine connection.
    ///
    /// # Errors
    /// Returns [`EngineError`] when the engine refuses to close.
    fn close(self) -> Result<(), EngineError>;
}
