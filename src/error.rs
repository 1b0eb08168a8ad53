//! Error types for ornmf.

use thiserror::Error;

/// Ornmf error types.
#[derive(Error, Debug)]
pub enum OrnmfError {
    /// Invalid or incomplete configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A sample's length differs from the established feature count
    #[error("dimension mismatch: expected {expected} features, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Too few samples to assemble a full batch
    #[error("insufficient data: {got} samples pending, {needed} needed for a full batch")]
    InsufficientData { needed: usize, got: usize },

    /// A computation produced or divided by a non-finite or zero value
    #[error("numeric instability: {0}")]
    NumericInstability(String),
}

/// Result type alias for ornmf operations.
pub type Result<T> = std::result::Result<T, OrnmfError>;
