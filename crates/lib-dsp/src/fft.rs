//! Real-input FFT using realfft.
//!
//! Captured NMR signals are real, so only the forward real-to-complex
//! transform is needed. The planner caches plans across calls, which
//! matters when the same capture length is processed run after run.

use crate::error::{DspError, DspResult};
use num_complex::Complex64;
use realfft::RealFftPlanner;

/// FFT engine with a cached real planner.
pub struct FftEngine {
    real_planner: RealFftPlanner<f64>,
}

impl FftEngine {
    /// Create a new FFT engine.
    pub fn new() -> Self {
        Self {
            real_planner: RealFftPlanner::new(),
        }
    }

    /// Perform forward real-to-complex FFT.
    ///
    /// Input: N real samples (any N > 0)
    /// Output: N/2 + 1 complex samples (Hermitian symmetry exploited)
    pub fn rfft(&mut self, data: &[f64]) -> DspResult<Vec<Complex64>> {
        let len = data.len();
        if len == 0 {
            return Err(DspError::EmptyInput);
        }

        let r2c = self.real_planner.plan_fft_forward(len);
        let mut input = data.to_vec();
        let mut output = r2c.make_output_vec();

        r2c.process(&mut input, &mut output)
            .map_err(|e| DspError::NumericalInstability(e.to_string()))?;

        Ok(output)
    }

    /// Magnitude of the forward real FFT.
    pub fn magnitude(&mut self, data: &[f64]) -> DspResult<Vec<f64>> {
        let spectrum = self.rfft(data)?;
        Ok(spectrum.iter().map(|c| c.norm()).collect())
    }
}

impl Default for FftEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Zero-pad a signal to a specific length.
pub fn zero_pad(signal: &[f64], new_len: usize) -> Vec<f64> {
    let mut result = signal.to_vec();
    if new_len > signal.len() {
        result.resize(new_len, 0.0);
    }
    result
}
