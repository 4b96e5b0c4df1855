//! Application configuration
//!
//! Loaded from `sqlgrade.toml`. The file is found by, in order: an explicit
//! `--config` path, `$SQLGRADE_CONFIG`, `./sqlgrade.toml`. Without any of
//! them the defaults apply. `$SQLGRADE_DATABASE` overrides `database.path`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::db::DatabaseConfig;
use crate::verify::{VerifyOptions, DEFAULT_SAMPLE_LIMIT};

pub const CONFIG_ENV: &str = "SQLGRADE_CONFIG";
pub const DATABASE_ENV: &str = "SQLGRADE_DATABASE";
pub const DEFAULT_CONFIG_FILE: &str = "sqlgrade.toml";

/// Configuration for sqlgrade
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub verify: VerifyConfig,
    pub serve: ServeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Sample rows reported per side of a row mismatch
    pub sample_limit: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            sample_limit: DEFAULT_SAMPLE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub host: String,
    pub port: u16,
    /// Let `/api/v1/runner` persist mutations
    pub commit_runs: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            commit_runs: false,
        }
    }
}

impl Config {
    /// Load configuration using the standard search order and environment
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);

        let mut config = match config_path(explicit, from_env, &cwd) {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };

        if let Ok(path) = std::env::var(DATABASE_ENV) {
            config.database.path = path;
            config.validate()?;
        }

        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::load_from_str(&content)
            .with_context(|| format!("Invalid config file: {:?}", path.as_ref()))
    }

    /// Load configuration from string
    pub fn load_from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        if self.verify.sample_limit == 0 {
            anyhow::bail!("verify.sample_limit must be at least 1");
        }
        Ok(())
    }

    pub fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            sample_limit: self.verify.sample_limit,
        }
    }
}

/// Pick the configuration file to read, if any
pub fn config_path(explicit: Option<&Path>, from_env: Option<PathBuf>, cwd: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = from_env {
        return Some(path);
    }
    let local = cwd.join(DEFAULT_CONFIG_FILE);
    local.exists().then_some(local)
}
