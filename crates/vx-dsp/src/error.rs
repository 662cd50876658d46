//! Error types for DSP primitives

use thiserror::Error;

/// DSP error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    /// Transform size is not a power of two
    #[error("Invalid FFT size: {0} (must be a power of two >= 2)")]
    InvalidSize(usize),

    /// Buffer length does not match the configured size
    #[error("Size mismatch: expected {expected}, got {got}")]
    SizeMismatch { expected: usize, got: usize },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for DSP operations
pub type DspResult<T> = Result<T, DspError>;
