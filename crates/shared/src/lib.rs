//! Shared library for aniflix.
//!
//! This crate provides common functionality used by the aniflix crates:
//! - Configuration management
//! - SQLite key-value storage
//! - File path utilities
//! - Logging infrastructure

pub mod config;
pub mod db;
pub mod logging;
pub mod paths;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use logging::LogConfig;
pub use paths::DataPaths;

/// Common result type using anyhow::Error
pub type Result<T> = anyhow::Result<T>;
