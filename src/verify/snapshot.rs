//! Rolled-back execution scopes.
//!
//! Every statement that runs during verification runs inside a transaction
//! that is rolled back before control returns, whatever happened inside.

use rusqlite::{Connection, DropBehavior};
use tracing::warn;

use super::classify::TargetTable;
use super::executor::{execute, ExecutionError};
use super::result::ResultSet;

/// Run `f` inside a transaction that is always rolled back
pub fn within_rollback<T, F>(conn: &mut Connection, f: F) -> Result<T, ExecutionError>
where
    F: FnOnce(&Connection) -> Result<T, ExecutionError>,
{
    let mut tx = conn
        .transaction()
        .map_err(|e| ExecutionError::from_driver(e, "BEGIN"))?;
    // Unwinding out of `f` must not commit either
    tx.set_drop_behavior(DropBehavior::Rollback);

    let result = f(&tx);

    if let Err(e) = tx.rollback() {
        // SQLite may already have rolled back on its own after some errors
        warn!(error = %e, "rollback after verification failed");
        if result.is_ok() {
            return Err(ExecutionError::new(format!("rollback failed: {}", e), None));
        }
    }

    result
}

/// Execute a mutating statement and capture the resulting state of `table`.
///
/// The mutation is never committed.
pub fn snapshot_after(
    conn: &mut Connection,
    sql: &str,
    table: &TargetTable,
) -> Result<ResultSet, ExecutionError> {
    within_rollback(conn, |tx| {
        execute(tx, sql)?;
        let select = format!("SELECT * FROM {}", table.to_sql());
        Ok(execute(tx, &select)?.into_result_set())
    })
}
