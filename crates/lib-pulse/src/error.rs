//! Error types for pulse program compilation.

use thiserror::Error;

/// Errors raised while turning a sequence request into a pulse program.
///
/// All of these are detected before any hardware line is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The requested parameters do not describe a realisable sequence.
    #[error("Invalid sequence: {0}")]
    InvalidSequence(String),

    /// An acquisition gate would overlap an RF pulse or its isolation margin.
    #[error("Unsafe timing: {0}")]
    UnsafeTiming(String),

    /// Malformed sequence descriptor text.
    #[error("Descriptor error at offset {position}: {message}")]
    Descriptor { position: usize, message: String },
}

impl CompileError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidSequence(message.into())
    }

    pub fn unsafe_timing(message: impl Into<String>) -> Self {
        Self::UnsafeTiming(message.into())
    }

    pub fn descriptor(position: usize, message: impl Into<String>) -> Self {
        Self::Descriptor {
            position,
            message: message.into(),
        }
    }
}

/// Result type for compilation.
pub type CompileResult<T> = Result<T, CompileError>;
