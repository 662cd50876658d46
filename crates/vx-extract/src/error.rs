//! Error types for target speaker extraction

use thiserror::Error;
use vx_dsp::DspError;

/// Extraction error types
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Transform or framing failure
    #[error("DSP error: {0}")]
    Dsp(#[from] DspError),

    /// Separation algorithm name not recognised
    #[error("Unknown separation algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Requested source id has no registered profile
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// Speaker registry is full
    #[error("Maximum speakers exceeded: {max}")]
    MaxSpeakersExceeded { max: usize },

    /// A training session is already running
    #[error("Training already in progress")]
    TrainingInProgress,

    /// Training finished without any usable frame
    #[error("No training data collected")]
    NoTrainingData,

    /// Extraction needs a trained target profile
    #[error("No target profile available")]
    NoProfile,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be parsed
    #[error("Configuration parse error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type for extraction operations
pub type ExtractResult<T> = Result<T, ExtractError>;
