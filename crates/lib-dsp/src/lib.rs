//! # lib-dsp
//!
//! Signal processing for captured NMR signals.
//!
//! This crate provides the analysis chain applied to every capture:
//!
//! - **Conditioning**: DC removal and zero-filling
//! - **Windowing**: Hann taper ahead of the transform
//! - **FFT**: Cached real-input transforms via `realfft`
//! - **Spectral Pipeline**: Magnitude spectrum and peak detection
//! - **Relaxation**: Per-echo amplitudes (in parallel with Rayon) and T2 fit

pub mod error;
pub mod fft;
pub mod window;
pub mod conditioning;
pub mod peak;
pub mod pipeline;
pub mod relaxation;

pub use error::{DspError, DspResult};
pub use fft::FftEngine;
pub use pipeline::{SpectralConfig, SpectralPipeline};
pub use relaxation::{analyze_echo_train, echo_amplitudes, fit_relaxation};
