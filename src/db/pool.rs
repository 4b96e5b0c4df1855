//! Bounded pool of SQLite connections
//!
//! The pool opens `min_size` connections up front and grows on demand up to
//! `max_size`. `acquire` blocks until a connection is returned or the acquire
//! timeout elapses. A [`PooledConnection`] goes back to the pool when dropped,
//! after any transaction it left open has been rolled back.

use parking_lot::{Condvar, Mutex};
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use super::config::PoolConfig;
use super::sqlite::{self, SessionOptions};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("connection pool exhausted: all {max_size} connections busy for {waited_ms} ms")]
    Exhausted { max_size: usize, waited_ms: u64 },

    #[error("connection pool is closed")]
    Closed,

    #[error("failed to open database connection: {0}")]
    Open(#[from] rusqlite::Error),
}

struct PoolState {
    idle: Vec<Connection>,
    /// Connections currently alive, idle or checked out
    open: usize,
    closed: bool,
}

struct PoolInner {
    path: PathBuf,
    config: PoolConfig,
    session: SessionOptions,
    state: Mutex<PoolState>,
    available: Condvar,
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub open: usize,
    pub idle: usize,
    pub max_size: usize,
}

/// Shared handle to a connection pool
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("path", &self.inner.path)
            .field("status", &self.status())
            .finish()
    }
}

impl ConnectionPool {
    /// Open a pool on the database at `path`, creating `min_size` connections
    pub fn open<P: AsRef<Path>>(
        path: P,
        config: PoolConfig,
        session: SessionOptions,
    ) -> Result<Self, PoolError> {
        let path = path.as_ref().to_path_buf();
        let mut idle = Vec::with_capacity(config.max_size);
        for _ in 0..config.min_size {
            idle.push(sqlite::open(&path, &session)?);
        }
        debug!(path = %path.display(), connections = idle.len(), "connection pool opened");

        Ok(Self {
            inner: Arc::new(PoolInner {
                path,
                session,
                state: Mutex::new(PoolState {
                    open: idle.len(),
                    idle,
                    closed: false,
                }),
                available: Condvar::new(),
                config,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            open: state.open,
            idle: state.idle.len(),
            max_size: self.inner.config.max_size,
        }
    }

    /// Check out a connection, waiting up to the acquire timeout
    pub fn acquire(&self) -> Result<PooledConnection, PoolError> {
        let started = Instant::now();
        let deadline = started + self.inner.config.acquire_timeout();
        let mut state = self.inner.state.lock();

        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }

            if let Some(conn) = state.idle.pop() {
                return Ok(self.guard(conn));
            }

            if state.open < self.inner.config.max_size {
                state.open += 1;
                drop(state);
                return match sqlite::open(&self.inner.path, &self.inner.session) {
                    Ok(conn) => Ok(self.guard(conn)),
                    Err(e) => {
                        self.forget_one();
                        Err(PoolError::Open(e))
                    }
                };
            }

            if Instant::now() >= deadline {
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(
                    max_size = self.inner.config.max_size,
                    waited_ms, "timed out waiting for a database connection"
                );
                return Err(PoolError::Exhausted {
                    max_size: self.inner.config.max_size,
                    waited_ms,
                });
            }

            self.inner.available.wait_until(&mut state, deadline);
        }
    }

    /// Refuse further acquires and drop idle connections.
    ///
    /// Checked-out connections are closed as they come back.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        let idle = state.idle.len();
        state.open -= idle;
        state.idle.clear();
        self.inner.available.notify_all();
    }

    fn guard(&self, conn: Connection) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
        }
    }

    fn forget_one(&self) {
        let mut state = self.inner.state.lock();
        state.open -= 1;
        self.inner.available.notify_one();
    }
}

/// A checked-out connection, returned to its pool on drop
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection is present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection is present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        let reusable = if conn.is_autocommit() {
            true
        } else {
            match conn.execute_batch("ROLLBACK") {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "discarding connection after failed rollback");
                    false
                }
            }
        };

        let mut state = self.pool.state.lock();
        if reusable && !state.closed {
            state.idle.push(conn);
        } else {
            state.open -= 1;
        }
        self.pool.available.notify_one();
    }
}
