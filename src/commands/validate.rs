//! `sqlgrade validate`: verify a submission against a reference statement

use anyhow::Result;
use colored::*;
use std::path::PathBuf;

use sqlgrade::config::Config;
use sqlgrade::verify::{ComparisonOutcome, Row};

use super::run::render_table;

pub struct ValidateOptions {
    pub reference: Option<String>,
    pub reference_file: Option<PathBuf>,
    pub submission: Option<String>,
    pub submission_file: Option<PathBuf>,
    pub json: bool,
}

/// Returns the process exit code: 0 when the submission is accepted
pub fn execute(config: &Config, options: ValidateOptions) -> Result<i32> {
    let reference = super::read_sql(
        options.reference,
        options.reference_file.as_deref(),
        "reference statement",
    )?;
    let submission = super::read_sql(
        options.submission,
        options.submission_file.as_deref(),
        "submission statement",
    )?;

    let verifier = super::open_verifier(config)?;
    let outcome = verifier.validate(&reference, &submission)?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&outcome.report())?);
    } else {
        print_report(&outcome);
    }

    Ok(if outcome.is_success() { 0 } else { 1 })
}

fn print_report(outcome: &ComparisonOutcome) {
    if outcome.is_success() {
        println!("{} {}", "✓".green(), outcome.message().green().bold());
    } else {
        println!("{} {}", "✗".red(), outcome.message().red().bold());
    }

    match outcome {
        ComparisonOutcome::Success {
            row_count,
            column_count,
            ..
        } => {
            println!("  {} rows, {} columns", row_count, column_count);
        }
        ComparisonOutcome::ColumnMismatch { missing, extra } => {
            if !missing.is_empty() {
                println!("  Missing columns: {}", missing.join(", "));
            }
            if !extra.is_empty() {
                println!("  Unexpected columns: {}", extra.join(", "));
            }
        }
        ComparisonOutcome::ColumnOrderMismatch { expected, actual } => {
            println!("  Expected: {}", expected.join(", "));
            println!("  Got:      {}", actual.join(", "));
        }
        ComparisonOutcome::RowMismatch {
            columns,
            missing_sample,
            extra_sample,
            missing_count,
            extra_count,
        } => {
            if *missing_count > 0 {
                println!("\n  {} missing row(s):", missing_count);
                print_sample(columns, missing_sample, *missing_count);
            }
            if *extra_count > 0 {
                println!("\n  {} unexpected row(s):", extra_count);
                print_sample(columns, extra_sample, *extra_count);
            }
        }
        ComparisonOutcome::ExecutionError { side, .. }
        | ComparisonOutcome::PolicyViolation { side, .. } => {
            println!("  {}", format!("in the {} statement", side).bright_black());
        }
        ComparisonOutcome::TargetTableMismatch { .. } | ComparisonOutcome::OrderMismatch => {}
    }
}

fn print_sample(columns: &[String], sample: &[Row], total: usize) {
    for line in render_table(columns, sample).lines() {
        println!("    {}", line);
    }
    if sample.len() < total {
        println!(
            "    {}",
            format!("(showing {} distinct of {})", sample.len(), total).bright_black()
        );
    }
}
