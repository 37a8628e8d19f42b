//! Spectral processing pipeline.
//!
//! ```text
//! samples -> remove DC -> window -> zero-fill x4 -> |rfft| -> peak
//! ```
//!
//! For an `N`-sample capture at rate `fs`, the transform length is `4N` and
//! the spectrum holds `2N + 1` bins at `k * fs / (4N)`.

use crate::conditioning::{remove_dc, zero_fill, ZERO_FILL_FACTOR};
use crate::error::{DspError, DspResult};
use crate::fft::FftEngine;
use crate::peak::find_peak;
use crate::window::apply_hann;
use lib_types::buffer::SampleBuffer;
use lib_types::spectrum::{SpectralBin, SpectralPeak, Spectrum};
use lib_types::units::Hertz;

/// Pipeline settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpectralConfig {
    /// Interpolate the peak between bins.
    pub refine_peak: bool,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self { refine_peak: true }
    }
}

/// Reusable spectral pipeline with a cached FFT planner.
pub struct SpectralPipeline {
    engine: FftEngine,
    config: SpectralConfig,
}

impl SpectralPipeline {
    pub fn new(config: SpectralConfig) -> Self {
        Self {
            engine: FftEngine::new(),
            config,
        }
    }

    pub fn config(&self) -> &SpectralConfig {
        &self.config
    }

    /// Magnitude spectrum of a captured buffer.
    pub fn spectrum(&mut self, buffer: &SampleBuffer) -> DspResult<Spectrum> {
        self.spectrum_of(&buffer.as_f64(), buffer.sample_rate())
    }

    /// Magnitude spectrum of raw samples taken at `sample_rate`.
    pub fn spectrum_of(&mut self, samples: &[f64], sample_rate: Hertz) -> DspResult<Spectrum> {
        if samples.is_empty() {
            return Err(DspError::InsufficientData { needed: 1, got: 0 });
        }
        if !(sample_rate.0.is_finite() && sample_rate.0 > 0.0) {
            return Err(DspError::InvalidConfig(format!(
                "sample rate must be positive, got {} Hz",
                sample_rate.0
            )));
        }

        let mut signal = samples.to_vec();
        let offset = remove_dc(&mut signal);
        apply_hann(&mut signal);
        let filled = zero_fill(&signal, ZERO_FILL_FACTOR);
        let transform_len = filled.len();

        let magnitudes = self.engine.magnitude(&filled)?;
        let bin_width = Hertz(sample_rate.0 / transform_len as f64);
        let bins = magnitudes
            .into_iter()
            .enumerate()
            .map(|(k, magnitude)| SpectralBin {
                frequency: Hertz(k as f64 * bin_width.0),
                magnitude,
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            samples = samples.len(),
            transform_len,
            bins = bins.len(),
            dc_offset = offset,
            "computed magnitude spectrum"
        );

        Ok(Spectrum {
            bins,
            bin_width,
            transform_len,
        })
    }

    /// Dominant line of a spectrum under this pipeline's settings.
    pub fn peak(&self, spectrum: &Spectrum) -> Option<SpectralPeak> {
        find_peak(spectrum, self.config.refine_peak)
    }
}

impl Default for SpectralPipeline {
    fn default() -> Self {
        Self::new(SpectralConfig::default())
    }
}
