//! Query equivalence verification
//!
//! A submitted statement is accepted when it produces the same result as a
//! reference statement. For queries that means the same rows; for
//! INSERT/UPDATE/DELETE it means leaving the modified table in the same
//! state. Nothing either statement does is ever committed.
//!
//! # Example
//! ```no_run
//! use sqlgrade::verify::{verify, VerifyOptions};
//!
//! let mut conn = rusqlite::Connection::open("course.db")?;
//! let outcome = verify(
//!     &mut conn,
//!     "SELECT id, name FROM students ORDER BY id",
//!     "SELECT id, name FROM students ORDER BY 1",
//!     &VerifyOptions::default(),
//! );
//! println!("{}", outcome.message());
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod classify;
pub mod compare;
pub mod executor;
pub mod outcome;
pub mod result;
pub mod snapshot;
pub mod value;

pub use classify::{classify, PolicyViolation, Statement, StatementKind, TargetTable};
pub use compare::{compare, Comparator, DEFAULT_SAMPLE_LIMIT};
pub use executor::{execute, ExecutionError};
pub use outcome::{ComparisonOutcome, Side, ValidationReport};
pub use result::{QueryOutput, ResultSet, Row};
pub use snapshot::{snapshot_after, within_rollback};
pub use value::Scalar;

use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, info};

use crate::db::{ConnectionPool, PoolError};

/// Tunables for a verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Maximum sample rows reported per side of a row mismatch
    pub sample_limit: usize,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            sample_limit: DEFAULT_SAMPLE_LIMIT,
        }
    }
}

/// Verify `submission_sql` against `reference_sql` on one connection.
///
/// The reference always runs first. Every failure is reported as an outcome.
pub fn verify(
    conn: &mut Connection,
    reference_sql: &str,
    submission_sql: &str,
    options: &VerifyOptions,
) -> ComparisonOutcome {
    let outcome = verify_statements(conn, reference_sql, submission_sql, options);
    info!(outcome = outcome.kind(), "verification finished");
    outcome
}

fn verify_statements(
    conn: &mut Connection,
    reference_sql: &str,
    submission_sql: &str,
    options: &VerifyOptions,
) -> ComparisonOutcome {
    let reference = match classify(reference_sql) {
        Ok(statement) => statement,
        Err(violation) => return ComparisonOutcome::policy_violation(Side::Reference, &violation),
    };
    let submission = match classify(submission_sql) {
        Ok(statement) => statement,
        Err(violation) => {
            return ComparisonOutcome::policy_violation(Side::Submission, &violation)
        }
    };

    let comparator = Comparator::with_sample_limit(options.sample_limit);

    let (expected, actual) = match reference.target_table() {
        Some(table) => {
            if let Some(actual) = submission.target_table() {
                if actual != table {
                    return ComparisonOutcome::TargetTableMismatch {
                        expected: table.clone(),
                        actual: actual.clone(),
                    };
                }
            }
            debug!(table = %table, "comparing table snapshots");

            let expected = match snapshot_after(conn, reference.text(), table) {
                Ok(result) => result,
                Err(e) => return ComparisonOutcome::execution_error(Side::Reference, e),
            };
            let actual = match snapshot_after(conn, submission.text(), table) {
                Ok(result) => result,
                Err(e) => return ComparisonOutcome::execution_error(Side::Submission, e),
            };
            (expected, actual)
        }
        None => {
            let expected = match preview(conn, reference.text()) {
                Ok(result) => result,
                Err(e) => return ComparisonOutcome::execution_error(Side::Reference, e),
            };
            let actual = match preview(conn, submission.text()) {
                Ok(result) => result,
                Err(e) => return ComparisonOutcome::execution_error(Side::Submission, e),
            };
            (expected, actual)
        }
    };

    comparator.compare(&expected, &actual, reference.text())
}

/// Execute inside a rolled-back transaction
fn preview(conn: &mut Connection, sql: &str) -> Result<ResultSet, ExecutionError> {
    within_rollback(conn, |tx| Ok(execute(tx, sql)?.into_result_set()))
}

/// Whether a single run keeps its effects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Execute and roll back
    #[default]
    Preview,
    /// Execute in autocommit; mutations persist
    Commit,
}

/// The service could not get to the point of running a statement
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Server Error: {0}")]
    Pool(#[from] PoolError),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("{0}")]
    Policy(#[from] PolicyViolation),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Pool-backed entry point used by the CLI and the HTTP server
#[derive(Debug, Clone)]
pub struct Verifier {
    pool: ConnectionPool,
    options: VerifyOptions,
}

impl Verifier {
    pub fn new(pool: ConnectionPool, options: VerifyOptions) -> Self {
        Self { pool, options }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn options(&self) -> &VerifyOptions {
        &self.options
    }

    /// Classify and execute a single statement
    pub fn run(&self, sql: &str, mode: RunMode) -> Result<QueryOutput, RunError> {
        let statement = classify(sql)?;
        let mut conn = self.pool.acquire().map_err(ServerError::from)?;

        let output = match mode {
            RunMode::Preview => within_rollback(&mut conn, |tx| execute(tx, statement.text()))?,
            RunMode::Commit => execute(&conn, statement.text())?,
        };
        info!(mode = ?mode, mutating = statement.is_mutating(), "statement run");
        Ok(output)
    }

    /// Verify a submission against a reference on one pooled connection
    pub fn validate(
        &self,
        reference_sql: &str,
        submission_sql: &str,
    ) -> Result<ComparisonOutcome, ServerError> {
        let mut conn = self.pool.acquire()?;
        Ok(verify(&mut conn, reference_sql, submission_sql, &self.options))
    }
}
