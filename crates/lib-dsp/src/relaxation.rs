//! Transverse relaxation (T2) extraction from CPMG echo trains.
//!
//! Each acquisition segment of a CPMG capture holds one echo. Its amplitude
//! is taken as half the peak-to-peak excursion within the segment, which is
//! independent of the receiver's DC offset. The amplitudes are then fitted
//! to `A(t) = A0 * exp(-t / T2)` by ordinary least squares on
//! `ln(A_n) = ln(A0) - n * E / T2` for echo index `n = 1..N`.

use crate::error::{DspError, DspResult};
use lib_types::buffer::SampleBuffer;
use lib_types::spectrum::{EchoAmplitude, RelaxationFit};
use lib_types::units::Seconds;
use rayon::prelude::*;

/// Fewest echoes a fit is attempted on.
pub const MIN_ECHOES: usize = 3;

/// Log-domain RMS residual above which a fit is flagged unconverged.
pub const CONVERGENCE_RESIDUAL: f64 = 0.25;

/// Half peak-to-peak amplitude of every echo segment in `buffer`.
pub fn echo_amplitudes(buffer: &SampleBuffer) -> Vec<EchoAmplitude> {
    buffer
        .segments()
        .par_iter()
        .enumerate()
        .map(|(i, segment)| EchoAmplitude {
            echo: i as u32 + 1,
            amplitude: half_peak_to_peak(buffer.samples().get(segment.range()).unwrap_or_default()),
        })
        .collect()
}

fn half_peak_to_peak(samples: &[i16]) -> f64 {
    let (min, max) = samples
        .iter()
        .fold((i16::MAX, i16::MIN), |(lo, hi), &s| (lo.min(s), hi.max(s)));
    if min > max {
        return 0.0;
    }
    (max as f64 - min as f64) / 2.0
}

/// Fit a mono-exponential decay to echo amplitudes spaced `echo_spacing`.
pub fn fit_relaxation(echoes: &[EchoAmplitude], echo_spacing: Seconds) -> DspResult<RelaxationFit> {
    if echoes.len() < MIN_ECHOES {
        return Err(DspError::InsufficientEchoes {
            needed: MIN_ECHOES,
            got: echoes.len(),
        });
    }
    if !(echo_spacing.0.is_finite() && echo_spacing.0 > 0.0) {
        return Err(DspError::InvalidConfig(format!(
            "echo spacing must be positive, got {} s",
            echo_spacing.0
        )));
    }
    if let Some(bad) = echoes
        .iter()
        .find(|e| !(e.amplitude.is_finite() && e.amplitude > 0.0))
    {
        return Err(DspError::FitDivergence(format!(
            "echo {} has amplitude {}, cannot take its logarithm",
            bad.echo, bad.amplitude
        )));
    }

    let points: Vec<(f64, f64)> = echoes
        .iter()
        .map(|e| (e.echo as f64, e.amplitude.ln()))
        .collect();
    let (slope, intercept) = least_squares(&points)?;

    if !(slope.is_finite() && slope < 0.0) {
        return Err(DspError::FitDivergence(format!(
            "echo amplitudes do not decay (log slope {})",
            slope
        )));
    }

    let t2 = Seconds(-echo_spacing.0 / slope);
    let a0 = intercept.exp();
    let residual = (points
        .iter()
        .map(|(n, y)| (y - (intercept + slope * n)).powi(2))
        .sum::<f64>()
        / points.len() as f64)
        .sqrt();

    if !(t2.0.is_finite() && a0.is_finite()) {
        return Err(DspError::FitDivergence(format!(
            "non-finite fit parameters: T2 = {} s, A0 = {}",
            t2.0, a0
        )));
    }

    tracing::debug!(
        echoes = echoes.len(),
        t2_ms = t2.as_ms(),
        a0,
        residual,
        "fitted transverse relaxation"
    );

    Ok(RelaxationFit {
        t2,
        a0,
        echoes: echoes.to_vec(),
        residual,
        converged: residual <= CONVERGENCE_RESIDUAL,
    })
}

/// Echo amplitudes and T2 fit for a CPMG capture.
pub fn analyze_echo_train(buffer: &SampleBuffer, echo_spacing: Seconds) -> DspResult<RelaxationFit> {
    fit_relaxation(&echo_amplitudes(buffer), echo_spacing)
}

fn least_squares(points: &[(f64, f64)]) -> DspResult<(f64, f64)> {
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;

    let (sxx, sxy) = points.iter().fold((0.0, 0.0), |(sxx, sxy), (x, y)| {
        let dx = x - mean_x;
        (sxx + dx * dx, sxy + dx * (y - mean_y))
    });

    if sxx == 0.0 {
        return Err(DspError::NumericalInstability(
            "echo indices are degenerate".into(),
        ));
    }

    let slope = sxy / sxx;
    Ok((slope, mean_y - slope * mean_x))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic(a0: f64, t2: f64, spacing: f64, count: u32) -> Vec<EchoAmplitude> {
        (1..=count)
            .map(|n| EchoAmplitude {
                echo: n,
                amplitude: a0 * (-(n as f64) * spacing / t2).exp(),
            })
            .collect()
    }

    #[test]
    fn test_fit_recovers_t2() {
        let echoes = synthetic(1500.0, 0.150, 0.002, 32);
        let fit = fit_relaxation(&echoes, Seconds(0.002)).unwrap();

        assert!((fit.t2.0 - 0.150).abs() / 0.150 < 0.01);
        assert!((fit.a0 - 1500.0).abs() / 1500.0 < 0.01);
        assert!(fit.residual < 1e-9);
        assert!(fit.converged);
        assert_eq!(fit.echoes.len(), 32);
    }

    #[test]
    fn test_insufficient_echoes() {
        let echoes = synthetic(1500.0, 0.150, 0.002, 2);
        assert!(matches!(
            fit_relaxation(&echoes, Seconds(0.002)),
            Err(DspError::InsufficientEchoes { needed: 3, got: 2 })
        ));
    }

    #[test]
    fn test_zero_or_negative_amplitude_diverges() {
        let mut echoes = synthetic(1500.0, 0.150, 0.002, 8);
        echoes[4].amplitude = 0.0;
        assert!(matches!(
            fit_relaxation(&echoes, Seconds(0.002)),
            Err(DspError::FitDivergence(_))
        ));

        echoes[4].amplitude = -3.0;
        assert!(matches!(
            fit_relaxation(&echoes, Seconds(0.002)),
            Err(DspError::FitDivergence(_))
        ));
    }

    #[test]
    fn test_growing_amplitudes_diverge() {
        let echoes = synthetic(100.0, -0.050, 0.002, 8);
        assert!(matches!(
            fit_relaxation(&echoes, Seconds(0.002)),
            Err(DspError::FitDivergence(_))
        ));
    }

    #[test]
    fn test_echo_amplitudes_per_segment() {
        use lib_types::buffer::SampleBufferWriter;

        let mut writer = SampleBufferWriter::with_capacity(12, Seconds::from_us(2.0));
        for (n, peak) in [(0u64, 400i16), (1, 300), (2, 200)] {
            writer.begin_segment(n * 1_000);
            for s in [2048, 2048 + peak, 2048 - peak, 2048] {
                writer.push(s);
            }
        }
        let buffer = writer.seal();

        let amps = echo_amplitudes(&buffer);
        assert_eq!(amps.len(), 3);
        assert_eq!(amps[0], EchoAmplitude { echo: 1, amplitude: 400.0 });
        assert_eq!(amps[2], EchoAmplitude { echo: 3, amplitude: 200.0 });
    }
}
