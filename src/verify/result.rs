//! Result sets and their wire representation.

use serde::ser::{Serialize, SerializeMap, SerializeSeq, SerializeStruct, Serializer};
use thiserror::Error;

use super::value::Scalar;

/// One row tuple, positionally aligned with the result's columns
pub type Row = Vec<Scalar>;

/// A row whose width does not match the column count
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("row {row} has {found} values but the result has {expected} columns")]
pub struct ShapeError {
    pub row: usize,
    pub expected: usize,
    pub found: usize,
}

/// Column names plus row tuples captured from one execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl ResultSet {
    /// Build a result set, checking every row against the column count
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Result<Self, ShapeError> {
        if let Some((row, values)) = rows
            .iter()
            .enumerate()
            .find(|(_, values)| values.len() != columns.len())
        {
            return Err(ShapeError {
                row,
                expected: columns.len(),
                found: values.len(),
            });
        }
        Ok(Self { columns, rows })
    }

    /// A result with no columns and no rows
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Borrowed view serializing one row as an object
struct RowView<'a> {
    columns: &'a [String],
    row: &'a [Scalar],
}

impl Serialize for RowView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in self.columns.iter().zip(self.row) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

struct RowsView<'a>(&'a ResultSet);

impl Serialize for RowsView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.rows.len()))?;
        for row in &self.0.rows {
            seq.serialize_element(&RowView {
                columns: &self.0.columns,
                row,
            })?;
        }
        seq.end()
    }
}

impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ResultSet", 2)?;
        state.serialize_field("columns", &self.columns)?;
        state.serialize_field("rows", &RowsView(self))?;
        state.end()
    }
}

/// What executing one statement produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutput {
    /// The statement reported columns; all rows were read
    Rows(ResultSet),
    /// No column metadata (plain DML); number of changed rows
    Acknowledged { changes: usize },
}

impl QueryOutput {
    /// Result set view; an acknowledgement compares as an empty result
    pub fn into_result_set(self) -> ResultSet {
        match self {
            QueryOutput::Rows(result) => result,
            QueryOutput::Acknowledged { .. } => ResultSet::empty(),
        }
    }

    pub fn rows(&self) -> Option<&ResultSet> {
        match self {
            QueryOutput::Rows(result) => Some(result),
            QueryOutput::Acknowledged { .. } => None,
        }
    }
}

impl Serialize for QueryOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            QueryOutput::Rows(result) => result.serialize(serializer),
            QueryOutput::Acknowledged { changes } => {
                let mut state = serializer.serialize_struct("Acknowledged", 2)?;
                state.serialize_field("message", "No data returned")?;
                state.serialize_field("changes", changes)?;
                state.end()
            }
        }
    }
}
