//! SQLite connection setup
//!
//! Every connection handed out by the pool goes through [`open`], which applies
//! the per-session settings before anything else touches it.

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Settings applied to each new connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub foreign_keys: bool,
    pub busy_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            foreign_keys: true,
            busy_timeout: Duration::from_secs(2),
        }
    }
}

/// Open or create a SQLite database file and initialize the session
pub fn open<P: AsRef<Path>>(path: P, options: &SessionOptions) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    init_session(&conn, options)?;
    Ok(conn)
}

/// Create an initialized in-memory database for testing
pub fn open_in_memory(options: &SessionOptions) -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_session(&conn, options)?;
    Ok(conn)
}

pub fn init_session(conn: &Connection, options: &SessionOptions) -> rusqlite::Result<()> {
    conn.busy_timeout(options.busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", options.foreign_keys)?;
    Ok(())
}
