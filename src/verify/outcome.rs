//! Verification outcomes and the report shape sent to clients.

use serde::Serialize;

use super::classify::{PolicyViolation, TargetTable};
use super::executor::ExecutionError;
use super::result::{ResultSet, Row};

/// Which of the two statements an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Reference,
    Submission,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Reference => "reference",
            Side::Submission => "submission",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of verifying a submission against a reference.
///
/// Exactly one variant describes the verdict. "Missing" and "extra" are
/// always relative to the reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComparisonOutcome {
    Success {
        row_count: usize,
        column_count: usize,
        columns: Vec<String>,
        rows: Vec<Row>,
    },
    ColumnMismatch {
        missing: Vec<String>,
        extra: Vec<String>,
    },
    ColumnOrderMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },
    TargetTableMismatch {
        expected: TargetTable,
        actual: TargetTable,
    },
    RowMismatch {
        columns: Vec<String>,
        missing_sample: Vec<Row>,
        extra_sample: Vec<Row>,
        missing_count: usize,
        extra_count: usize,
    },
    OrderMismatch,
    ExecutionError {
        side: Side,
        message: String,
        offset: Option<usize>,
    },
    PolicyViolation {
        side: Side,
        reason: String,
        keyword: Option<String>,
    },
}

impl ComparisonOutcome {
    pub fn success(result: &ResultSet) -> Self {
        ComparisonOutcome::Success {
            row_count: result.row_count(),
            column_count: result.column_count(),
            columns: result.columns().to_vec(),
            rows: result.rows().to_vec(),
        }
    }

    pub fn execution_error(side: Side, err: ExecutionError) -> Self {
        ComparisonOutcome::ExecutionError {
            side,
            message: err.message,
            offset: err.offset,
        }
    }

    pub fn policy_violation(side: Side, violation: &PolicyViolation) -> Self {
        ComparisonOutcome::PolicyViolation {
            side,
            reason: violation.reason().to_string(),
            keyword: violation.keyword().map(str::to_string),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ComparisonOutcome::Success { .. })
    }

    /// The statement itself could not run, as opposed to running and differing
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ComparisonOutcome::ExecutionError { .. } | ComparisonOutcome::PolicyViolation { .. }
        )
    }

    /// Wire tag of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            ComparisonOutcome::Success { .. } => "success",
            ComparisonOutcome::ColumnMismatch { .. } => "column_mismatch",
            ComparisonOutcome::ColumnOrderMismatch { .. } => "column_order_mismatch",
            ComparisonOutcome::TargetTableMismatch { .. } => "target_table_mismatch",
            ComparisonOutcome::RowMismatch { .. } => "row_mismatch",
            ComparisonOutcome::OrderMismatch => "order_mismatch",
            ComparisonOutcome::ExecutionError { .. } => "execution_error",
            ComparisonOutcome::PolicyViolation { .. } => "policy_violation",
        }
    }

    /// Human readable verdict
    pub fn message(&self) -> String {
        match self {
            ComparisonOutcome::Success { .. } => "Correct!".to_string(),
            ComparisonOutcome::ColumnMismatch { .. } => "Columns doesn't match".to_string(),
            ComparisonOutcome::ColumnOrderMismatch { .. } => {
                "Columns are matching, but the order is wrong.".to_string()
            }
            ComparisonOutcome::TargetTableMismatch { expected, actual } => {
                format!("Wrong target table: expected {}, got {}", expected, actual)
            }
            ComparisonOutcome::RowMismatch { .. } => "Results are not correct.".to_string(),
            ComparisonOutcome::OrderMismatch => {
                "Results are correct, but the order is wrong.".to_string()
            }
            ComparisonOutcome::ExecutionError {
                message, offset, ..
            } => ExecutionError {
                message: message.clone(),
                offset: *offset,
            }
            .to_string(),
            ComparisonOutcome::PolicyViolation {
                reason, keyword, ..
            } => match keyword {
                Some(keyword) => {
                    format!("Statement not allowed: {} ({})", keyword.to_uppercase(), reason)
                }
                None => format!("Statement not allowed: {}", reason),
            },
        }
    }

    pub fn report(&self) -> ValidationReport<'_> {
        ValidationReport::new(self)
    }
}

/// Client-facing form of an outcome: status and message plus the tagged
/// outcome fields
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport<'a> {
    pub status: &'static str,
    pub message: String,
    #[serde(flatten)]
    pub outcome: &'a ComparisonOutcome,
}

impl<'a> ValidationReport<'a> {
    pub fn new(outcome: &'a ComparisonOutcome) -> Self {
        Self {
            status: if outcome.is_success() { "success" } else { "error" },
            message: outcome.message(),
            outcome,
        }
    }
}
