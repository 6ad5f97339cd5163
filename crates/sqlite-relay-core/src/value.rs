// crates/sqlite-relay-core/src/value.rs
// ============================================================================
// Module: Value Model
// Description: Owned result values, rows, and derived column metadata.
// Purpose: Copy engine output out of engine-owned memory into stable values.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Engine output is only valid until the next call on the same connection, so
//! every [`Cell`] handed to a row sink is converted into an owned [`Value`]
//! before the engine continues. Text cells holding a base-10 integer are
//! promoted to [`Value::Integer`].
//!
//! A [`Row`] keeps column names in engine order and shares them between rows
//! of the same statement. [`Column`] metadata is derived from the first row of
//! a result by the waiter.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Cells
// ============================================================================

/// Borrowed engine value, valid only for the duration of a row callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell<'a> {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text.
    Text(&'a str),
    /// Raw bytes.
    Blob(&'a [u8]),
}

// ============================================================================
// SECTION: Values
// ============================================================================

/// Owned semantic value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl Value {
    /// Converts a borrowed engine cell into an owned value.
    ///
    /// Text that parses as an `i64` becomes [`Value::Integer`].
    #[must_use]
    pub fn from_cell(cell: &Cell<'_>) -> Self {
        match *cell {
            Cell::Null => Self::Null,
            Cell::Integer(value) => Self::Integer(value),
            Cell::Real(value) => Self::Real(value),
            Cell::Text(text) => {
                text.parse::<i64>().map_or_else(|_| Self::Text(text.to_string()), Self::Integer)
            }
            Cell::Blob(bytes) => Self::Blob(bytes.to_vec()),
        }
    }

    /// Returns the data type of this value.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::Null => DataType::Null,
            Self::Integer(_) => DataType::Integer,
            Self::Real(_) => DataType::Real,
            Self::Text(_) => DataType::Text,
            Self::Blob(_) => DataType::Blob,
        }
    }

    /// Returns the integer payload, if any.
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the text payload, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Returns true for SQL NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// ============================================================================
// SECTION: Data Types
// ============================================================================

/// Storage class of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// SQL NULL.
    Null,
    /// Integer storage.
    Integer,
    /// Float storage.
    Real,
    /// Text storage.
    Text,
    /// Blob storage.
    Blob,
}

impl DataType {
    /// Returns the SQL type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// One result row in engine callback order.
///
/// # Invariants
/// - `values[i]` belongs to `columns[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Column names shared by rows of one statement.
    columns: Arc<[String]>,
    /// Values in column order.
    values: Vec<Value>,
}

impl Row {
    /// Builds a row; extra values beyond the column count are dropped.
    #[must_use]
    pub fn new(columns: Arc<[String]>, mut values: Vec<Value>) -> Self {
        values.truncate(columns.len());
        Self { columns, values }
    }

    /// Returns the column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the values in column order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns the value of the last column named `name`.
    ///
    /// Duplicate names resolve like a name-keyed map: the later column wins.
    /// Positional access through [`Row::value`] still reaches every column.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        let index = self.columns.iter().rposition(|column| column == name)?;
        self.values.get(index)
    }

    /// Returns the value at `index`.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Iterates `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    /// Returns the number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true when the row holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns true when both rows share one column-name allocation.
    #[must_use]
    pub fn shares_columns_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.columns, &other.columns)
    }
}

// ============================================================================
// SECTION: Columns
// ============================================================================

/// Column metadata derived from a sample row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Zero-based position.
    pub ordinal: usize,
    /// Storage class observed in the sample row.
    pub data_type: DataType,
}

impl Column {
    /// Derives column metadata from `row`.
    #[must_use]
    pub fn describe(row: &Row) -> Vec<Self> {
        row.iter()
            .enumerate()
            .map(|(ordinal, (name, value))| Self {
                name: name.to_string(),
                ordinal,
                data_type: value.data_type(),
            })
            .collect()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
