//! Error types for spectrometer runs.

use lib_dsp::DspError;
use lib_pulse::CompileError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while running a pulse sequence.
#[derive(Debug, Error)]
pub enum InstrumentError {
    /// The sequence parameters are not realisable.
    #[error("Invalid sequence: {0}")]
    InvalidSequence(String),

    /// An acquisition gate would overlap an RF pulse or its dead-time.
    #[error("Unsafe timing: {0}")]
    UnsafeTiming(String),

    /// Another run holds the hardware.
    #[error("A run is already in progress")]
    RunAlreadyInProgress,

    /// The ADC FIFO filled before the transfer channel drained it.
    #[error("Buffer overrun at cycle {cycle}: FIFO depth {depth} exceeded after {written} samples")]
    BufferOverrun {
        cycle: u64,
        depth: usize,
        written: usize,
    },

    /// The sequence ended before every window was filled.
    #[error("Incomplete capture: expected {expected} samples, got {got}")]
    IncompleteCapture { expected: usize, got: usize },

    /// The run was aborted at an instruction or window boundary.
    #[error("Run aborted")]
    RunAborted,

    /// No capture arrived within the run timeout.
    #[error("Run timed out after {0:?}")]
    Timeout(Duration),

    /// A hardware thread could not be started or died.
    #[error("Hardware fault: {0}")]
    HardwareFault(String),

    /// Invalid instrument configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Spectral processing of a completed capture failed.
    #[error("Processing failed: {0}")]
    Processing(#[from] DspError),
}

impl From<CompileError> for InstrumentError {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::UnsafeTiming(msg) => Self::UnsafeTiming(msg),
            CompileError::InvalidSequence(msg) => Self::InvalidSequence(msg),
            descriptor @ CompileError::Descriptor { .. } => {
                Self::InvalidSequence(descriptor.to_string())
            }
        }
    }
}

impl InstrumentError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Acquisition-side failures a caller may reasonably try again.
    ///
    /// The instrument itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BufferOverrun { .. }
                | Self::IncompleteCapture { .. }
                | Self::Timeout(_)
                | Self::RunAlreadyInProgress
        )
    }

    /// Whether the error was raised before any output line was driven.
    pub fn is_pre_run(&self) -> bool {
        matches!(
            self,
            Self::InvalidSequence(_) | Self::UnsafeTiming(_) | Self::RunAlreadyInProgress | Self::Config(_)
        )
    }
}

/// Result type for instrument operations.
pub type InstrumentResult<T> = Result<T, InstrumentError>;
