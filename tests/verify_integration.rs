//! End-to-end verification against a file-backed SQLite database

use anyhow::Result;
use sqlgrade::db::{ConnectionPool, PoolConfig, PoolError, SessionOptions};
use sqlgrade::verify::{
    ComparisonOutcome, QueryOutput, RunError, RunMode, Scalar, ServerError, Side, TargetTable,
    Verifier, VerifyOptions,
};
use tempfile::TempDir;

const SCHEMA: &str = "
    CREATE TABLE students (id INTEGER PRIMARY KEY, name TEXT NOT NULL, grade INTEGER);
    INSERT INTO students VALUES (1, 'Ana', 9), (2, 'Bo', 7), (3, 'Cy', 9), (4, 'Di', NULL);

    CREATE TABLE accounts (id INTEGER PRIMARY KEY, balance INTEGER NOT NULL);
    INSERT INTO accounts VALUES (1, 100), (2, 250);

    CREATE TABLE ledger (id INTEGER PRIMARY KEY, account_id INTEGER REFERENCES accounts(id), amount INTEGER);

    CREATE TABLE t (id INTEGER PRIMARY KEY, label TEXT);
    INSERT INTO t VALUES (1, 'only');
";

fn setup(pool_config: PoolConfig) -> Result<(TempDir, Verifier)> {
    let dir = tempfile::tempdir()?;
    let pool = ConnectionPool::open(dir.path().join("course.db"), pool_config, SessionOptions::default())?;
    pool.acquire()?.execute_batch(SCHEMA)?;
    Ok((dir, Verifier::new(pool, VerifyOptions::default())))
}

fn verifier() -> Result<(TempDir, Verifier)> {
    setup(PoolConfig::default())
}

fn count(verifier: &Verifier, table: &str) -> Result<i64> {
    let conn = verifier.pool().acquire()?;
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?)
}

#[test]
fn test_identical_queries_succeed() -> Result<()> {
    let (_dir, verifier) = verifier()?;
    let outcome = verifier.validate(
        "SELECT id, name FROM students ORDER BY id",
        "SELECT id, name FROM students ORDER BY id",
    )?;

    match outcome {
        ComparisonOutcome::Success {
            row_count,
            column_count,
            columns,
            rows,
        } => {
            assert_eq!(row_count, 4);
            assert_eq!(column_count, 2);
            assert_eq!(columns, vec!["id".to_string(), "name".to_string()]);
            assert_eq!(rows[0], vec![Scalar::Integer(1), Scalar::Text("Ana".to_string())]);
        }
        other => panic!("expected success, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_row_order_only_matters_with_order_by() -> Result<()> {
    let (_dir, verifier) = verifier()?;

    let unordered = verifier.validate(
        "SELECT id FROM students",
        "SELECT id FROM students ORDER BY id DESC",
    )?;
    assert!(unordered.is_success(), "{:?}", unordered);

    let ordered = verifier.validate(
        "SELECT id FROM students ORDER BY id",
        "SELECT id FROM students ORDER BY id DESC",
    )?;
    assert_eq!(ordered, ComparisonOutcome::OrderMismatch);
    Ok(())
}

#[test]
fn test_column_order_mismatch() -> Result<()> {
    let (_dir, verifier) = verifier()?;
    let outcome = verifier.validate(
        "SELECT id, name FROM students ORDER BY id",
        "SELECT name, id FROM students",
    )?;
    assert_eq!(
        outcome,
        ComparisonOutcome::ColumnOrderMismatch {
            expected: vec!["id".to_string(), "name".to_string()],
            actual: vec!["name".to_string(), "id".to_string()],
        }
    );
    Ok(())
}

#[test]
fn test_column_mismatch_is_case_insensitive() -> Result<()> {
    let (_dir, verifier) = verifier()?;

    let same = verifier.validate("SELECT id, name FROM students", "SELECT ID, Name FROM students")?;
    assert!(same.is_success(), "{:?}", same);

    let different = verifier.validate("SELECT id, name FROM students", "SELECT id, grade FROM students")?;
    assert_eq!(
        different,
        ComparisonOutcome::ColumnMismatch {
            missing: vec!["name".to_string()],
            extra: vec!["grade".to_string()],
        }
    );
    Ok(())
}

#[test]
fn test_duplicate_rows_counted() -> Result<()> {
    let (_dir, verifier) = verifier()?;
    // grades: 9, 7, 9, NULL
    let outcome = verifier.validate(
        "SELECT grade FROM students WHERE grade IS NOT NULL",
        "SELECT DISTINCT grade FROM students WHERE grade IS NOT NULL",
    )?;

    match outcome {
        ComparisonOutcome::RowMismatch {
            missing_sample,
            extra_sample,
            missing_count,
            extra_count,
            ..
        } => {
            assert_eq!(missing_sample, vec![vec![Scalar::Integer(9)]]);
            assert!(extra_sample.is_empty());
            assert_eq!(missing_count, 1);
            assert_eq!(extra_count, 0);
        }
        other => panic!("expected row mismatch, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_delete_is_rolled_back() -> Result<()> {
    let (_dir, verifier) = verifier()?;

    for _ in 0..2 {
        let outcome = verifier.validate("DELETE FROM t WHERE id=1", "DELETE FROM t WHERE id=1")?;
        assert!(outcome.is_success(), "{:?}", outcome);
    }

    let rows = verifier.run("SELECT * FROM t", RunMode::Preview)?;
    let result = rows.rows().expect("select returns rows");
    assert_eq!(
        result.rows(),
        &[vec![Scalar::Integer(1), Scalar::Text("only".to_string())]]
    );
    Ok(())
}

#[test]
fn test_matching_mutation_snapshots() -> Result<()> {
    let (_dir, verifier) = verifier()?;
    let outcome = verifier.validate(
        "UPDATE accounts SET balance=balance+10 WHERE id=1",
        "update ACCOUNTS set balance = 110 where id = 1;",
    )?;
    assert!(outcome.is_success(), "{:?}", outcome);

    let conn = verifier.pool().acquire()?;
    let balance: i64 = conn.query_row("SELECT balance FROM accounts WHERE id = 1", [], |row| row.get(0))?;
    assert_eq!(balance, 100);
    Ok(())
}

#[test]
fn test_wrong_target_table() -> Result<()> {
    let (_dir, verifier) = verifier()?;
    let outcome = verifier.validate(
        "UPDATE accounts SET balance=balance+10 WHERE id=1",
        "INSERT INTO ledger (account_id, amount) VALUES (1, 10)",
    )?;
    assert_eq!(
        outcome,
        ComparisonOutcome::TargetTableMismatch {
            expected: TargetTable::new("accounts"),
            actual: TargetTable::new("ledger"),
        }
    );
    assert_eq!(count(&verifier, "ledger")?, 0);
    Ok(())
}

#[test]
fn test_ddl_reference_never_executes() -> Result<()> {
    let (_dir, verifier) = verifier()?;
    let outcome = verifier.validate("DROP TABLE students", "SELECT * FROM students")?;
    assert_eq!(
        outcome,
        ComparisonOutcome::PolicyViolation {
            side: Side::Reference,
            reason: "ddl".to_string(),
            keyword: Some("drop".to_string()),
        }
    );
    assert_eq!(count(&verifier, "students")?, 4);
    Ok(())
}

#[test]
fn test_mutating_submission_under_query_reference_does_not_persist() -> Result<()> {
    let (_dir, verifier) = verifier()?;
    let outcome = verifier.validate("SELECT * FROM students", "DELETE FROM students")?;
    assert!(!outcome.is_success());
    assert_eq!(count(&verifier, "students")?, 4);
    Ok(())
}

#[test]
fn test_failing_submission_attributed_and_rolled_back() -> Result<()> {
    let (_dir, verifier) = verifier()?;
    // Foreign keys are enforced per session: account 99 does not exist
    let outcome = verifier.validate(
        "INSERT INTO ledger (account_id, amount) VALUES (1, 5)",
        "INSERT INTO ledger (account_id, amount) VALUES (99, 5)",
    )?;

    match outcome {
        ComparisonOutcome::ExecutionError { side, message, offset } => {
            assert_eq!(side, Side::Submission);
            assert!(message.contains("FOREIGN KEY"), "{}", message);
            assert_eq!(offset, None);
        }
        other => panic!("expected execution error, got {:?}", other),
    }
    assert_eq!(count(&verifier, "ledger")?, 0);
    Ok(())
}

#[test]
fn test_syntax_error_in_reference() -> Result<()> {
    let (_dir, verifier) = verifier()?;
    let outcome = verifier.validate("SELEC id FROM students", "SELECT id FROM students")?;
    match &outcome {
        ComparisonOutcome::ExecutionError { side, .. } => assert_eq!(*side, Side::Reference),
        other => panic!("expected execution error, got {:?}", other),
    }
    assert!(outcome.message().starts_with("SQL Error: "));
    Ok(())
}

#[test]
fn test_run_preview_and_commit() -> Result<()> {
    let (_dir, verifier) = verifier()?;

    let output = verifier.run("INSERT INTO t (id, label) VALUES (2, 'two')", RunMode::Preview)?;
    assert_eq!(output, QueryOutput::Acknowledged { changes: 1 });
    assert_eq!(count(&verifier, "t")?, 1);

    verifier.run("INSERT INTO t (id, label) VALUES (2, 'two')", RunMode::Commit)?;
    assert_eq!(count(&verifier, "t")?, 2);

    let json = serde_json::to_value(verifier.run("SELECT label FROM t ORDER BY id", RunMode::Preview)?)?;
    assert_eq!(
        json,
        serde_json::json!({"columns": ["label"], "rows": [{"label": "only"}, {"label": "two"}]})
    );
    Ok(())
}

#[test]
fn test_run_rejects_policy_violations() -> Result<()> {
    let (_dir, verifier) = verifier()?;
    for sql in ["DROP TABLE t", "BEGIN", "COMMIT", "SELECT 1; SELECT 2", "   ;  "] {
        let result = verifier.run(sql, RunMode::Commit);
        assert!(matches!(result, Err(RunError::Policy(_))), "{}: {:?}", sql, result.map(|_| ()));
    }
    assert_eq!(count(&verifier, "t")?, 1);
    Ok(())
}

#[test]
fn test_pool_exhaustion_is_server_error() -> Result<()> {
    let (_dir, verifier) = setup(PoolConfig {
        min_size: 1,
        max_size: 1,
        acquire_timeout_ms: 50,
    })?;

    let held = verifier.pool().acquire()?;
    match verifier.validate("SELECT 1", "SELECT 1") {
        Err(ServerError::Pool(PoolError::Exhausted { max_size, .. })) => assert_eq!(max_size, 1),
        other => panic!("expected exhaustion, got {:?}", other),
    }
    let message = match verifier.run("SELECT 1", RunMode::Preview) {
        Err(e) => e.to_string(),
        Ok(output) => panic!("expected exhaustion, got {:?}", output),
    };
    assert!(message.starts_with("Server Error: "), "{}", message);

    drop(held);
    assert!(verifier.validate("SELECT 1", "SELECT 1")?.is_success());
    Ok(())
}

#[test]
fn test_concurrent_validations_share_pool() -> Result<()> {
    let (_dir, verifier) = setup(PoolConfig {
        min_size: 1,
        max_size: 2,
        acquire_timeout_ms: 10_000,
    })?;
    let verifier = std::sync::Arc::new(verifier);

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let verifier = std::sync::Arc::clone(&verifier);
            std::thread::spawn(move || {
                let sql = if i % 2 == 0 {
                    "DELETE FROM students WHERE grade = 9"
                } else {
                    "SELECT name FROM students WHERE grade > 8"
                };
                verifier.validate(sql, sql).map(|o| o.is_success())
            })
        })
        .collect();

    for worker in workers {
        assert!(worker.join().expect("worker panicked")?);
    }
    assert_eq!(count(&verifier, "students")?, 4);
    assert!(verifier.pool().status().open <= 2);
    Ok(())
}
