pub mod config;
pub mod db;
pub mod verify;

// Re-export commonly used types
pub use config::Config;
pub use db::ConnectionPool;
pub use verify::{verify, ComparisonOutcome, Verifier, VerifyOptions};
