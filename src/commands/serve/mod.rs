//! HTTP verification server
//!
//! Endpoints:
//! - `GET /health`
//! - `POST /api/v1/runner` runs one statement
//! - `POST /api/v1/runner/validate` verifies a submission against a reference
//!
//! Blocking microserver (no async), one thread per connection, all threads
//! sharing one verifier and its connection pool. Binding beyond loopback
//! turns on bearer token auth for the POST endpoints.

mod internal;
pub(crate) mod microserver;

use anyhow::Result;

use sqlgrade::config::Config;
use sqlgrade::verify::Verifier;

/// Options for the serve command
pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    /// Runner requests keep their effects instead of being rolled back
    pub commit_runs: bool,
}

impl ServeOptions {
    /// Configured values, overridden by command line flags
    pub fn from_config(config: &Config, host: Option<String>, port: Option<u16>) -> Self {
        Self {
            host: host.unwrap_or_else(|| config.serve.host.clone()),
            port: port.unwrap_or(config.serve.port),
            commit_runs: config.serve.commit_runs,
        }
    }
}

/// Start the server
pub fn execute(options: ServeOptions, verifier: Verifier) -> Result<()> {
    internal::run_server(options, verifier)
}
