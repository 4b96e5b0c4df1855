//! Safe single-statement execution.
//!
//! `execute` runs one statement on a borrowed connection and hands back either
//! the full result or an acknowledgement. Driver failures never escape as
//! opaque errors: they become an [`ExecutionError`] with the trimmed driver
//! message and, for syntax errors, the character offset SQLite points at.
//!
//! Column naming and value coercion live in [`normalize`], a pure function over
//! a [`RawBatch`], so it can be exercised without a database.

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

use super::result::{QueryOutput, ResultSet, ShapeError};
use super::value::RawValue;

/// The database rejected a statement
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("SQL Error: {message}{}", offset_suffix(.offset))]
pub struct ExecutionError {
    pub message: String,
    /// Character offset into the statement, when the driver reports one
    pub offset: Option<usize>,
}

fn offset_suffix(offset: &Option<usize>) -> String {
    match offset {
        Some(offset) => format!("; Offset: {}", offset),
        None => String::new(),
    }
}

impl ExecutionError {
    pub fn new(message: impl Into<String>, offset: Option<usize>) -> Self {
        Self {
            message: message.into().trim().to_string(),
            offset,
        }
    }

    /// Normalize a driver error raised while running `sql`
    pub fn from_driver(err: rusqlite::Error, sql: &str) -> Self {
        match err {
            rusqlite::Error::SqlInputError { msg, offset, .. } => {
                Self::new(msg, char_offset(sql, offset))
            }
            rusqlite::Error::SqliteFailure(_, Some(msg)) => Self::new(msg, None),
            other => Self::new(other.to_string(), None),
        }
    }
}

impl From<ShapeError> for ExecutionError {
    fn from(err: ShapeError) -> Self {
        Self::new(err.to_string(), None)
    }
}

/// SQLite reports byte offsets; callers see character offsets
fn char_offset(sql: &str, byte_offset: i32) -> Option<usize> {
    let byte_offset = usize::try_from(byte_offset).ok()?.min(sql.len());
    let mut boundary = byte_offset;
    while !sql.is_char_boundary(boundary) {
        boundary -= 1;
    }
    Some(sql[..boundary].chars().count())
}

/// Rows exactly as a driver produced them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<RawValue>>,
}

/// Turn a raw batch into a result set.
///
/// Column names are lower-cased; the first occurrence of a name keeps it and
/// later duplicates get `_1`, `_2`, ... Values are converted to their
/// JSON-safe scalar form.
pub fn normalize(batch: RawBatch) -> Result<ResultSet, ShapeError> {
    let columns = disambiguate_columns(batch.columns.iter().map(|c| c.to_lowercase()));

    let mut rows = Vec::with_capacity(batch.rows.len());
    for (index, row) in batch.rows.into_iter().enumerate() {
        if row.len() != columns.len() {
            return Err(ShapeError {
                row: index,
                expected: columns.len(),
                found: row.len(),
            });
        }
        rows.push(row.into_iter().map(RawValue::into_scalar).collect());
    }

    ResultSet::new(columns, rows)
}

/// Make column names unique, suffixing repeats with a counter starting at 1
pub fn disambiguate_columns<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut suffixes: HashMap<String, usize> = HashMap::new();
    let mut taken: HashSet<String> = HashSet::new();
    let mut unique = Vec::new();

    for name in names {
        let counter = suffixes.entry(name.clone()).or_insert(0);
        let mut candidate = name.clone();
        while taken.contains(&candidate) {
            *counter += 1;
            candidate = format!("{}_{}", name, counter);
        }
        taken.insert(candidate.clone());
        unique.push(candidate);
    }

    unique
}

/// Strip trailing whitespace and semicolons; leading text is untouched so
/// driver offsets still line up with what the caller sent
fn trim_statement(sql: &str) -> &str {
    sql.trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

fn raw_value(value: ValueRef<'_>) -> RawValue {
    match value {
        ValueRef::Null => RawValue::Null,
        ValueRef::Integer(n) => RawValue::Integer(n),
        ValueRef::Real(x) => RawValue::Real(x),
        ValueRef::Text(bytes) => RawValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => RawValue::Blob(bytes.to_vec()),
    }
}

/// Execute exactly one statement on `conn`
pub fn execute(conn: &Connection, sql: &str) -> Result<QueryOutput, ExecutionError> {
    let sql = trim_statement(sql);
    let driver_error = |e: rusqlite::Error| ExecutionError::from_driver(e, sql);

    let mut stmt = conn.prepare(sql).map_err(driver_error)?;
    let column_count = stmt.column_count();

    if column_count == 0 {
        let changes = stmt.execute([]).map_err(driver_error)?;
        debug!(changes, "statement acknowledged");
        return Ok(QueryOutput::Acknowledged { changes });
    }

    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();

    let mut raw_rows = Vec::new();
    let mut rows = stmt.query([]).map_err(driver_error)?;
    while let Some(row) = rows.next().map_err(driver_error)? {
        let mut values = Vec::with_capacity(column_count);
        for index in 0..column_count {
            values.push(raw_value(row.get_ref(index).map_err(driver_error)?));
        }
        raw_rows.push(values);
    }

    let result = normalize(RawBatch {
        columns,
        rows: raw_rows,
    })?;
    debug!(
        columns = result.column_count(),
        rows = result.row_count(),
        "statement returned rows"
    );
    Ok(QueryOutput::Rows(result))
}
