//! Error types for Squadron core library.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using Squadron Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Squadron operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Registry file error
    #[error("Registry error in {path}: {message}")]
    Registry { path: PathBuf, message: String },

    /// Unrecognized priority name
    #[error("Unknown priority: {0} (expected critical, high, medium or low)")]
    UnknownPriority(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
