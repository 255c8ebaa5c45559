//! Error types for the gpustream CLI.

use thiserror::Error;

use gpustream::StreamError;

/// CLI result type alias.
pub type CliResult<T> = Result<T, CliError>;

/// CLI error type.
#[derive(Error, Debug)]
pub enum CliError {
    /// Stream construction or device failure.
    #[error("{0}")]
    Stream(#[from] StreamError),

    /// JSON report could not be produced.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Results did not match the expected values.
    #[error("Validation failed: {0}")]
    Validation(String),
}
