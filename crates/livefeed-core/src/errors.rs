//! Core error types.

use thiserror::Error;

/// Errors raised by the core wire types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A payload was not valid JSON, or a value could not be serialized.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
