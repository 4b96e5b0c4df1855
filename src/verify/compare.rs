//! Order- and duplicate-aware result set comparison.
//!
//! Results are compared as multisets of rows. Row order only matters when the
//! reference statement asks for it with `ORDER BY`.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use super::outcome::ComparisonOutcome;
use super::result::{ResultSet, Row};

/// Number of sample rows reported per side of a row mismatch
pub const DEFAULT_SAMPLE_LIMIT: usize = 100;

fn order_by_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\border\s+by\b").expect("Invalid ORDER BY regex"))
}

/// Whether the statement text requests an ordering
pub fn requests_order(sql: &str) -> bool {
    order_by_regex().is_match(sql)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparator {
    sample_limit: usize,
}

impl Default for Comparator {
    fn default() -> Self {
        Self {
            sample_limit: DEFAULT_SAMPLE_LIMIT,
        }
    }
}

impl Comparator {
    pub fn with_sample_limit(sample_limit: usize) -> Self {
        Self { sample_limit }
    }

    /// Compare a submission's result against the reference's
    pub fn compare(
        &self,
        reference: &ResultSet,
        submission: &ResultSet,
        reference_sql: &str,
    ) -> ComparisonOutcome {
        if reference.columns() != submission.columns() {
            return compare_columns(reference.columns(), submission.columns());
        }

        if reference.rows() == submission.rows() {
            return ComparisonOutcome::success(reference);
        }

        let expected = multiset(reference.rows());
        let actual = multiset(submission.rows());

        let (missing_sample, missing_count) =
            difference(reference.rows(), &expected, &actual, self.sample_limit);
        let (extra_sample, extra_count) =
            difference(submission.rows(), &actual, &expected, self.sample_limit);

        if missing_count == 0 && extra_count == 0 {
            return if requests_order(reference_sql) {
                ComparisonOutcome::OrderMismatch
            } else {
                ComparisonOutcome::success(reference)
            };
        }

        ComparisonOutcome::RowMismatch {
            columns: reference.columns().to_vec(),
            missing_sample,
            extra_sample,
            missing_count,
            extra_count,
        }
    }
}

/// Compare with the default sample limit
pub fn compare(reference: &ResultSet, submission: &ResultSet, reference_sql: &str) -> ComparisonOutcome {
    Comparator::default().compare(reference, submission, reference_sql)
}

fn compare_columns(expected: &[String], actual: &[String]) -> ComparisonOutcome {
    let expected_set: HashSet<&String> = expected.iter().collect();
    let actual_set: HashSet<&String> = actual.iter().collect();

    if expected_set == actual_set {
        return ComparisonOutcome::ColumnOrderMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        };
    }

    ComparisonOutcome::ColumnMismatch {
        missing: expected
            .iter()
            .filter(|c| !actual_set.contains(c))
            .cloned()
            .collect(),
        extra: actual
            .iter()
            .filter(|c| !expected_set.contains(c))
            .cloned()
            .collect(),
    }
}

fn multiset(rows: &[Row]) -> HashMap<&Row, usize> {
    let mut counts = HashMap::with_capacity(rows.len());
    for row in rows {
        *counts.entry(row).or_insert(0) += 1;
    }
    counts
}

/// Rows of `from` that outnumber their occurrences in `other`.
///
/// Returns one representative per distinct row, in first-occurrence order and
/// capped at `limit`, plus the total surplus multiplicity.
fn difference(
    rows: &[Row],
    from: &HashMap<&Row, usize>,
    other: &HashMap<&Row, usize>,
    limit: usize,
) -> (Vec<Row>, usize) {
    let mut seen: HashSet<&Row> = HashSet::new();
    let mut sample = Vec::new();
    let mut total = 0;

    for row in rows {
        if !seen.insert(row) {
            continue;
        }
        let surplus = from[row].saturating_sub(other.get(row).copied().unwrap_or(0));
        if surplus > 0 {
            total += surplus;
            if sample.len() < limit {
                sample.push(row.clone());
            }
        }
    }

    (sample, total)
}
