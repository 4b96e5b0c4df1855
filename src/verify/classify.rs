//! Statement classification by keyword lookup.
//!
//! This is not a SQL parser. The text is scanned once to blank out
//! string literals and comments, split into words, and the words are checked
//! against fixed keyword sets:
//!
//! - schema changes (`create`, `drop`, `alter`, `truncate`) are rejected
//! - transaction control (`commit`, `savepoint`, `rollback`) is rejected
//! - `insert`, `update`, `delete` and `replace into` route the statement as
//!   mutating, and the table it modifies is extracted so its state can be
//!   snapshotted

use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

const DDL_KEYWORDS: &[&str] = &["create", "drop", "alter", "truncate"];
const TCL_KEYWORDS: &[&str] = &["commit", "savepoint", "rollback"];

// alter/drop never reach the mutating check: DDL is rejected first.
const DML_KEYWORDS: &[&str] = &["update", "delete", "insert", "alter", "drop"];

/// SQLite administrative statements, rejected as schema changes
const ADMIN_LEADING: &[&str] = &["pragma", "attach", "detach", "vacuum", "reindex"];

/// SQLite transaction control that is only a keyword in leading position
/// (`end` also closes every CASE expression)
const TCL_LEADING: &[&str] = &["begin", "end", "release"];

/// Why a statement is refused before execution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("schema changes are not allowed ({0})")]
    Ddl(String),

    #[error("transaction control is not allowed ({0})")]
    Tcl(String),

    #[error("could not determine which table the statement modifies")]
    NoTargetTable,

    #[error("only one statement can be executed at a time")]
    MultipleStatements,

    #[error("statement is empty")]
    Empty,
}

impl PolicyViolation {
    /// Stable machine-readable category
    pub fn reason(&self) -> &'static str {
        match self {
            PolicyViolation::Ddl(_) => "ddl",
            PolicyViolation::Tcl(_) => "tcl",
            PolicyViolation::NoTargetTable => "no_target_table",
            PolicyViolation::MultipleStatements => "multiple_statements",
            PolicyViolation::Empty => "empty",
        }
    }

    /// The offending keyword, for keyword-based violations
    pub fn keyword(&self) -> Option<&str> {
        match self {
            PolicyViolation::Ddl(k) | PolicyViolation::Tcl(k) => Some(k),
            _ => None,
        }
    }
}

impl Serialize for PolicyViolation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.reason())
    }
}

/// Table modified by a mutating statement.
///
/// SQLite resolves table names case-insensitively, quoted or not, so both
/// parts are stored lower-cased. `main` is the default schema and is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTable {
    schema: Option<String>,
    name: String,
}

impl TargetTable {
    pub fn new(name: &str) -> Self {
        Self {
            schema: None,
            name: name.to_lowercase(),
        }
    }

    pub fn qualified(schema: &str, name: &str) -> Self {
        let schema = schema.to_lowercase();
        Self {
            schema: (schema != "main").then_some(schema),
            name: name.to_lowercase(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Quoted identifier for use in generated SQL
    pub fn to_sql(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }
}

fn quote_ident(part: &str) -> String {
    format!("\"{}\"", part.replace('"', "\"\""))
}

impl fmt::Display for TargetTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl Serialize for TargetTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// How a statement is routed for verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    ReadOnly,
    Mutating { table: TargetTable },
}

/// Raw SQL text with its classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    text: String,
    kind: StatementKind,
}

impl Statement {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> &StatementKind {
        &self.kind
    }

    pub fn target_table(&self) -> Option<&TargetTable> {
        match &self.kind {
            StatementKind::Mutating { table } => Some(table),
            StatementKind::ReadOnly => None,
        }
    }

    pub fn is_mutating(&self) -> bool {
        self.target_table().is_some()
    }
}

/// Classify raw SQL text.
///
/// Forbidden statements come back as `Err`; nothing here touches a database.
pub fn classify(sql: &str) -> Result<Statement, PolicyViolation> {
    let masked = mask(sql);

    let body = masked
        .code
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .trim_start();
    if body.is_empty() {
        return Err(PolicyViolation::Empty);
    }

    let words: Vec<String> = word_regex()
        .find_iter(&masked.words)
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect();

    if let Some(first) = words.first() {
        if ADMIN_LEADING.contains(&first.as_str()) {
            return Err(PolicyViolation::Ddl(first.clone()));
        }
        if TCL_LEADING.contains(&first.as_str()) {
            return Err(PolicyViolation::Tcl(first.clone()));
        }
    }
    if let Some(word) = find_keyword(&words, DDL_KEYWORDS) {
        return Err(PolicyViolation::Ddl(word.to_string()));
    }
    if let Some(word) = find_keyword(&words, TCL_KEYWORDS) {
        return Err(PolicyViolation::Tcl(word.to_string()));
    }

    let separators = masked
        .words
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if separators.contains(';') {
        return Err(PolicyViolation::MultipleStatements);
    }

    let kind = if find_keyword(&words, DML_KEYWORDS).is_some() || is_replace_into(&words) {
        let table = extract_target_table(body).ok_or(PolicyViolation::NoTargetTable)?;
        StatementKind::Mutating { table }
    } else {
        StatementKind::ReadOnly
    };

    Ok(Statement {
        text: sql.to_string(),
        kind,
    })
}

fn find_keyword<'a>(words: &'a [String], keywords: &[&str]) -> Option<&'a str> {
    words
        .iter()
        .map(String::as_str)
        .find(|word| keywords.contains(word))
}

/// `REPLACE INTO`, as opposed to the `replace()` string function
fn is_replace_into(words: &[String]) -> bool {
    words.windows(2).any(|pair| pair[0] == "replace" && pair[1] == "into")
}

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_$]*").expect("Invalid word regex"))
}

const IDENT: &str = r#"(?:"[^"]+"|`[^`]+`|\[[^\]]+\]|[a-z_][a-z0-9_$]*)"#;

/// Matches the table after INSERT INTO / REPLACE INTO / UPDATE / DELETE [FROM]
fn target_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(
            r"(?is)\b(?:insert\s+(?:or\s+[a-z]+\s+)?into|replace\s+into|update(?:\s+or\s+[a-z]+)?|delete\s+from|delete)\s+({ident}(?:\s*\.\s*{ident})?)",
            ident = IDENT
        );
        Regex::new(&pattern).expect("Invalid target table regex")
    })
}

fn ident_part_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""([^"]+)"|`([^`]+)`|\[([^\]]+)\]|([A-Za-z_][A-Za-z0-9_$]*)"#)
            .expect("Invalid identifier regex")
    })
}

/// First table named by a mutating clause in `code` (literals already blanked)
fn extract_target_table(code: &str) -> Option<TargetTable> {
    let chain = target_regex().captures(code)?.get(1)?.as_str();

    let parts: Vec<&str> = ident_part_regex()
        .captures_iter(chain)
        .filter_map(|cap| {
            (1..=4)
                .find_map(|group| cap.get(group))
                .map(|m| m.as_str())
        })
        .collect();

    match parts.as_slice() {
        [name] => Some(TargetTable::new(name)),
        [schema, name] => Some(TargetTable::qualified(schema, name)),
        _ => None,
    }
}

/// Two views of the statement text with literals and comments blanked
struct Masked {
    /// Quoted identifiers kept (table extraction)
    code: String,
    /// Quoted identifiers blanked too (keyword scanning, statement splitting)
    words: String,
}

fn mask(sql: &str) -> Masked {
    let mut code = String::with_capacity(sql.len());
    let mut words = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                while let Some(n) = chars.next() {
                    if n == '\'' {
                        if chars.peek() == Some(&'\'') {
                            chars.next();
                            continue;
                        }
                        break;
                    }
                }
                code.push(' ');
                words.push(' ');
            }
            '-' if chars.peek() == Some(&'-') => {
                for n in chars.by_ref() {
                    if n == '\n' {
                        break;
                    }
                }
                code.push(' ');
                words.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
                code.push(' ');
                words.push(' ');
            }
            '"' | '`' | '[' => {
                let close = match c {
                    '[' => ']',
                    other => other,
                };
                code.push(c);
                for n in chars.by_ref() {
                    code.push(n);
                    if n == close {
                        break;
                    }
                }
                words.push(' ');
            }
            _ => {
                code.push(c);
                words.push(c);
            }
        }
    }

    Masked { code, words }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(sql: &str) -> TargetTable {
        classify(sql)
            .unwrap()
            .target_table()
            .cloned()
            .expect("statement should be mutating")
    }

    #[test]
    fn test_select_is_read_only() {
        let stmt = classify("SELECT id, name FROM students ORDER BY id").unwrap();
        assert_eq!(stmt.kind(), &StatementKind::ReadOnly);
        assert_eq!(stmt.text(), "SELECT id, name FROM students ORDER BY id");
    }

    #[test]
    fn test_ddl_rejected() {
        assert_eq!(
            classify("DROP TABLE students"),
            Err(PolicyViolation::Ddl("drop".to_string()))
        );
        assert_eq!(classify("create table t (id int)").unwrap_err().reason(), "ddl");
        assert_eq!(
            classify("ALTER TABLE t ADD COLUMN x").unwrap_err().reason(),
            "ddl"
        );
        assert_eq!(classify("TRUNCATE TABLE t").unwrap_err().reason(), "ddl");
    }

    #[test]
    fn test_tcl_rejected() {
        assert_eq!(
            classify("COMMIT"),
            Err(PolicyViolation::Tcl("commit".to_string()))
        );
        assert_eq!(classify("savepoint a").unwrap_err().reason(), "tcl");
        assert_eq!(classify("ROLLBACK").unwrap_err().reason(), "tcl");
        assert_eq!(classify("BEGIN TRANSACTION").unwrap_err().reason(), "tcl");
        assert_eq!(classify("END").unwrap_err().reason(), "tcl");
    }

    #[test]
    fn test_case_end_is_not_transaction_control() {
        let stmt = classify("SELECT CASE WHEN id > 1 THEN 'a' ELSE 'b' END AS c FROM t").unwrap();
        assert!(!stmt.is_mutating());
    }

    #[test]
    fn test_sqlite_admin_statements_rejected() {
        assert_eq!(
            classify("PRAGMA writable_schema = 1"),
            Err(PolicyViolation::Ddl("pragma".to_string()))
        );
        assert_eq!(
            classify("ATTACH DATABASE 'x.db' AS x").unwrap_err().reason(),
            "ddl"
        );
    }

    #[test]
    fn test_keywords_in_literals_and_comments_ignored() {
        let stmt = classify("SELECT 'drop table x' AS note FROM t -- delete everything").unwrap();
        assert_eq!(stmt.kind(), &StatementKind::ReadOnly);

        let stmt = classify("SELECT /* commit; */ \"update\" FROM t").unwrap();
        assert_eq!(stmt.kind(), &StatementKind::ReadOnly);
    }

    #[test]
    fn test_word_boundaries() {
        let stmt = classify("SELECT created_at, dropped, updates FROM audit").unwrap();
        assert_eq!(stmt.kind(), &StatementKind::ReadOnly);
    }

    #[test]
    fn test_mutating_target_tables() {
        assert_eq!(
            target("UPDATE accounts SET balance=balance+10 WHERE id=1"),
            TargetTable::new("accounts")
        );
        assert_eq!(
            target("insert into Students (id) values (1)"),
            TargetTable::new("students")
        );
        assert_eq!(target("DELETE FROM t WHERE id=1"), TargetTable::new("t"));
        assert_eq!(target("DELETE ledger WHERE id=1"), TargetTable::new("ledger"));
        assert_eq!(
            target("INSERT OR REPLACE INTO aux.orders VALUES (1)"),
            TargetTable::qualified("aux", "orders")
        );
        assert_eq!(
            target("UPDATE OR IGNORE \"Order Items\" SET qty = 0"),
            TargetTable::new("order items")
        );
    }

    #[test]
    fn test_update_table_starting_with_or() {
        assert_eq!(
            target("UPDATE orders SET status = 'x'"),
            TargetTable::new("orders")
        );
    }

    #[test]
    fn test_cte_prefixed_dml() {
        let stmt = classify(
            "WITH stale AS (SELECT id FROM sessions) DELETE FROM sessions WHERE id IN stale",
        )
        .unwrap();
        assert_eq!(stmt.target_table(), Some(&TargetTable::new("sessions")));
    }

    #[test]
    fn test_no_target_table() {
        assert_eq!(
            classify("SELECT 'x' FROM t WHERE note = 1 OR update"),
            Err(PolicyViolation::NoTargetTable)
        );
    }

    #[test]
    fn test_empty_and_multiple_statements() {
        assert_eq!(classify("   ; "), Err(PolicyViolation::Empty));
        assert_eq!(classify("-- just a comment"), Err(PolicyViolation::Empty));
        assert_eq!(
            classify("SELECT 1; SELECT 2"),
            Err(PolicyViolation::MultipleStatements)
        );
        // Trailing semicolons are fine, so are semicolons inside literals
        assert!(classify("SELECT 1;;  ").is_ok());
        assert!(classify("SELECT ';' FROM t").is_ok());
    }

    #[test]
    fn test_target_table_render() {
        let table = TargetTable::qualified("Aux", "accounts");
        assert_eq!(table.to_string(), "aux.accounts");
        assert_eq!(table.to_sql(), "\"aux\".\"accounts\"");
        assert_eq!(
            serde_json::to_value(&table).unwrap(),
            serde_json::json!("aux.accounts")
        );
    }

    #[test]
    fn test_main_schema_is_default() {
        assert_eq!(TargetTable::qualified("MAIN", "t"), TargetTable::new("t"));
        assert_eq!(target("DELETE FROM main.t WHERE id = 1"), TargetTable::new("t"));
        assert_eq!(target("UPDATE \"main\".\"T\" SET x = 1").to_string(), "t");
        assert_ne!(TargetTable::qualified("temp", "t"), TargetTable::new("t"));
    }

    #[test]
    fn test_replace_into_is_mutating() {
        assert_eq!(target("REPLACE INTO t VALUES (1, 'x')"), TargetTable::new("t"));
        assert_eq!(
            target("replace into Accounts (id, balance) VALUES (1, 5);"),
            TargetTable::new("accounts")
        );

        let stmt = classify("SELECT replace(label, 'a', 'b') AS label FROM t").unwrap();
        assert_eq!(stmt.kind(), &StatementKind::ReadOnly);
    }

    #[test]
    fn test_semicolon_in_quoted_identifier() {
        assert!(classify("SELECT 1 AS \"a;b\"").is_ok());
        assert!(classify("SELECT [x;y], `p;q` FROM t;").is_ok());
        assert_eq!(
            classify("SELECT 1 AS \"a;b\"; SELECT 2"),
            Err(PolicyViolation::MultipleStatements)
        );
    }
}
