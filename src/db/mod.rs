//! Database access for sqlgrade
//!
//! SQLite connections behind a bounded pool. Verification borrows one pooled
//! connection per request.
//!
//! # Example
//! ```no_run
//! use sqlgrade::db::DatabaseConfig;
//!
//! let pool = DatabaseConfig::default().open_pool()?;
//! let conn = pool.acquire()?;
//! conn.execute_batch("CREATE TABLE IF NOT EXISTS students (id INTEGER, name TEXT)")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod pool;
pub mod sqlite;

pub use config::{DatabaseConfig, PoolConfig};
pub use pool::{ConnectionPool, PoolError, PoolStatus, PooledConnection};
pub use sqlite::SessionOptions;
