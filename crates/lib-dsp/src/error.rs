//! Error types for DSP operations.

use thiserror::Error;

/// Errors that can occur during signal processing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DspError {
    /// Transform requested on an empty signal.
    #[error("FFT size must be non-zero")]
    EmptyInput,

    /// Insufficient data for operation.
    #[error("Insufficient data: need at least {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Too few echoes for a relaxation fit.
    #[error("Insufficient echoes for relaxation fit: need at least {needed}, got {got}")]
    InsufficientEchoes { needed: usize, got: usize },

    /// The relaxation fit could not produce a decaying exponential.
    #[error("Relaxation fit diverged: {0}")]
    FitDivergence(String),

    /// Invalid processing configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Numerical instability detected.
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
}

/// Result type for DSP operations.
pub type DspResult<T> = Result<T, DspError>;
