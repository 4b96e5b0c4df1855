//! `sqlgrade run`: execute one statement and print its result

use anyhow::Result;
use colored::*;
use std::path::PathBuf;

use sqlgrade::config::Config;
use sqlgrade::verify::{QueryOutput, Row, RunMode};

pub struct RunOptions {
    pub sql: Option<String>,
    pub file: Option<PathBuf>,
    pub commit: bool,
    pub json: bool,
}

pub fn execute(config: &Config, options: RunOptions) -> Result<()> {
    let sql = super::read_sql(options.sql, options.file.as_deref(), "query")?;
    let verifier = super::open_verifier(config)?;
    let mode = if options.commit {
        RunMode::Commit
    } else {
        RunMode::Preview
    };

    let output = verifier.run(&sql, mode)?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    match &output {
        QueryOutput::Rows(result) => {
            print!("{}", render_table(result.columns(), result.rows()));
            println!(
                "{}",
                format!("({} row{})", result.row_count(), plural(result.row_count())).bright_black()
            );
        }
        QueryOutput::Acknowledged { changes } => {
            let verb = match mode {
                RunMode::Commit => "committed",
                RunMode::Preview => "rolled back",
            };
            println!(
                "✓ {} row{} affected ({})",
                changes,
                plural(*changes),
                verb
            );
        }
    }
    Ok(())
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Pipe-separated table with padded columns
pub fn render_table(columns: &[String], rows: &[Row]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect())
        .collect();

    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let line = |values: &[String]| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&line(columns));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');
    for row in &cells {
        out.push_str(&line(row.as_slice()));
        out.push('\n');
    }
    out
}
