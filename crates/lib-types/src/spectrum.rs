//! Processing results: magnitude spectra, peaks, and relaxation fits.

use crate::units::{Hertz, Seconds};
use serde::{Deserialize, Serialize};

/// One frequency bin of a magnitude spectrum.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectralBin {
    pub frequency: Hertz,
    pub magnitude: f64,
}

/// Non-negative-frequency magnitude spectrum.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub bins: Vec<SpectralBin>,
    /// Frequency spacing between adjacent bins.
    pub bin_width: Hertz,
    /// Length of the transform after zero-filling.
    pub transform_len: usize,
}

impl Spectrum {
    #[inline]
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn magnitudes(&self) -> Vec<f64> {
        self.bins.iter().map(|b| b.magnitude).collect()
    }

    pub fn frequencies(&self) -> Vec<f64> {
        self.bins.iter().map(|b| b.frequency.0).collect()
    }
}

/// Dominant spectral line.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectralPeak {
    /// Index of the maximum-magnitude bin.
    pub bin: usize,
    /// Peak frequency, refined between bins when possible.
    pub frequency: Hertz,
    pub magnitude: f64,
}

/// Amplitude of one CPMG echo.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EchoAmplitude {
    /// 1-based echo index.
    pub echo: u32,
    pub amplitude: f64,
}

/// Mono-exponential transverse relaxation fit `A(t) = A0 * exp(-t / T2)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelaxationFit {
    pub t2: Seconds,
    pub a0: f64,
    pub echoes: Vec<EchoAmplitude>,
    /// RMS residual of the log-linear fit.
    pub residual: f64,
    pub converged: bool,
}

impl RelaxationFit {
    /// Model amplitude at time `t` after excitation.
    pub fn amplitude_at(&self, t: Seconds) -> f64 {
        self.a0 * (-t.0 / self.t2.0).exp()
    }
}
