// crates/sqlite-relay-core/src/collector.rs
// ============================================================================
// Module: Result Collector
// Description: Row sink correlating engine callbacks with pending records.
// Purpose: Copy each engine row into the record that owns the request.
// Dependencies: std
// ============================================================================

//! ## Overview
//! A [`ResultCollector`] is created per engine call and carries the request's
//! [`CorrelationId`] explicitly into the engine as its [`RowSink`]. Each row is
//! converted to owned values and appended to the matching record. When the
//! record is gone the row is dropped silently; that race is expected.
//! Requests whose kind does not consume rows (direct execution and non-query
//! statements) never touch the queue from the callback; their rows are only
//! counted.
//!
//! Column names are shared between consecutive rows with the same header so
//! large results allocate the header once per statement.

use std::sync::Arc;

use crate::admission::OperationKind;
use crate::coordinator::Coordinator;
use crate::correlation::CorrelationId;
use crate::engine::RowSink;
use crate::value::Cell;
use crate::value::Row;
use crate::value::Value;

/// Row sink bound to one pending request.
#[derive(Debug)]
pub struct ResultCollector<'a> {
    /// Queue owning the record.
    coordinator: &'a Coordinator,
    /// Record the rows belong to.
    id: &'a CorrelationId,
    /// Rows are copied into the record only for row-producing kinds.
    keep_rows: bool,
    /// Header of the most recent row.
    columns: Option<Arc<[String]>>,
    /// Rows appended to the record.
    delivered: usize,
    /// Rows dropped because the record was gone.
    discarded: usize,
    /// Rows ignored because the kind does not consume them.
    skipped: usize,
}

impl<'a> ResultCollector<'a> {
    /// Creates a collector for `id`, issued as `kind`.
    #[must_use]
    pub const fn new(
        coordinator: &'a Coordinator,
        id: &'a CorrelationId,
        kind: OperationKind,
    ) -> Self {
        Self {
            coordinator,
            id,
            keep_rows: kind.produces_rows(),
            columns: None,
            delivered: 0,
            discarded: 0,
            skipped: 0,
        }
    }

    /// Returns the number of rows appended to the record.
    #[must_use]
    pub const fn delivered(&self) -> usize {
        self.delivered
    }

    /// Returns the number of rows dropped.
    #[must_use]
    pub const fn discarded(&self) -> usize {
        self.discarded
    }

    /// Returns the number of rows ignored for kinds without row results.
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    /// Returns a shared header equal to `columns`.
    fn shared_columns(&mut self, columns: &[String]) -> Arc<[String]> {
        if let Some(cached) = &self.columns
            && **cached == *columns
        {
            return Arc::clone(cached);
        }
        let fresh: Arc<[String]> = Arc::from(columns.to_vec());
        self.columns = Some(Arc::clone(&fresh));
        fresh
    }
}

impl RowSink for ResultCollector<'_> {
    fn on_row(&mut self, columns: &[String], cells: &[Cell<'_>]) {
        if !self.keep_rows {
            self.skipped = self.skipped.saturating_add(1);
            return;
        }
        let header = self.shared_columns(columns);
        let values = cells.iter().map(Value::from_cell).collect();
        if self.coordinator.append_row(self.id, Row::new(header, values)) {
            self.delivered = self.delivered.saturating_add(1);
        } else {
            self.discarded = self.discarded.saturating_add(1);
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
