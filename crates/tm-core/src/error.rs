//! Error types for toymaker

use thiserror::Error;

/// toymaker error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Input-consistency error (unknown key, shape mismatch, duplicate bin, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Numerically degenerate input (non-PSD matrix, undefined correlation, zero rate)
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
