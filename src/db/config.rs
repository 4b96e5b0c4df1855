//! Database and connection pool configuration
//!
//! Parsed from the `[database]` table of `sqlgrade.toml`; every field has a
//! default so an empty table is valid.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::pool::ConnectionPool;
use super::sqlite::SessionOptions;

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: String,

    /// Enforce foreign key constraints on every session
    pub foreign_keys: bool,

    /// How long a statement waits on a locked database
    pub busy_timeout_ms: u64,

    /// Connection pool sizing
    pub pool: PoolConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            foreign_keys: true,
            busy_timeout_ms: 2000,
            pool: PoolConfig::default(),
        }
    }
}

fn default_database_path() -> String {
    "sqlgrade.db".to_string()
}

/// Pool sizing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections opened when the pool is created
    pub min_size: usize,

    /// Upper bound on open connections
    pub max_size: usize,

    /// How long `acquire` waits for a free connection
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 5,
            acquire_timeout_ms: 5000,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Validate sizing
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            anyhow::bail!("database.pool.max_size must be at least 1");
        }
        if self.min_size > self.max_size {
            anyhow::bail!(
                "database.pool.min_size ({}) exceeds max_size ({})",
                self.min_size,
                self.max_size
            );
        }
        Ok(())
    }
}

impl DatabaseConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::load_from_str(&content)
    }

    /// Load configuration from string
    pub fn load_from_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).context("Failed to parse database configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            anyhow::bail!("database.path must not be empty");
        }
        self.pool.validate()
    }

    pub fn session(&self) -> SessionOptions {
        SessionOptions {
            foreign_keys: self.foreign_keys,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }

    /// Open the connection pool described by this configuration
    pub fn open_pool(&self) -> Result<ConnectionPool> {
        ConnectionPool::open(&self.path, self.pool.clone(), self.session())
            .with_context(|| format!("Failed to open SQLite database at {}", self.path))
    }
}
