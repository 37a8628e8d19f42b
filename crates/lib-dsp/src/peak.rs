//! Spectral peak detection.

use lib_types::spectrum::{SpectralPeak, Spectrum};
use lib_types::units::Hertz;

/// Locate the maximum-magnitude bin of `spectrum`.
///
/// With `refine` set, the peak is interpolated with a parabola through the
/// maximum bin and its two neighbours:
///
/// ```text
/// delta = 0.5 * (a - c) / (a - 2b + c)
/// f     = (k + delta) * bin_width
/// |X|   = b - 0.25 * (a - c) * delta
/// ```
///
/// Edge bins and flat neighbourhoods are reported unrefined. Returns `None`
/// for an empty spectrum.
pub fn find_peak(spectrum: &Spectrum, refine: bool) -> Option<SpectralPeak> {
    let (bin, max) = spectrum
        .bins
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.magnitude.total_cmp(&b.1.magnitude))?;

    let mut peak = SpectralPeak {
        bin,
        frequency: max.frequency,
        magnitude: max.magnitude,
    };

    if refine && bin > 0 && bin + 1 < spectrum.len() {
        let a = spectrum.bins[bin - 1].magnitude;
        let b = max.magnitude;
        let c = spectrum.bins[bin + 1].magnitude;
        let denom = a - 2.0 * b + c;
        if denom.abs() > f64::EPSILON * b.abs().max(1.0) {
            let delta = (0.5 * (a - c) / denom).clamp(-0.5, 0.5);
            peak.frequency = Hertz((bin as f64 + delta) * spectrum.bin_width.0);
            peak.magnitude = b - 0.25 * (a - c) * delta;
        }
    }

    Some(peak)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_types::spectrum::SpectralBin;

    fn spectrum(mags: &[f64], bin_width: f64) -> Spectrum {
        Spectrum {
            bins: mags
                .iter()
                .enumerate()
                .map(|(k, &m)| SpectralBin {
                    frequency: Hertz(k as f64 * bin_width),
                    magnitude: m,
                })
                .collect(),
            bin_width: Hertz(bin_width),
            transform_len: (mags.len() - 1) * 2,
        }
    }

    #[test]
    fn test_unrefined_peak() {
        let s = spectrum(&[0.0, 1.0, 5.0, 2.0, 0.0], 10.0);
        let peak = find_peak(&s, false).unwrap();
        assert_eq!(peak.bin, 2);
        assert_eq!(peak.frequency, Hertz(20.0));
        assert_eq!(peak.magnitude, 5.0);
    }

    #[test]
    fn test_parabolic_refinement_exact_on_parabola() {
        // Samples of y = 10 - (x - 2.3)^2 at x = 0..5.
        let mags: Vec<f64> = (0..6).map(|x| 10.0 - (x as f64 - 2.3).powi(2)).collect();
        let peak = find_peak(&spectrum(&mags, 1.0), true).unwrap();

        assert_eq!(peak.bin, 2);
        assert!((peak.frequency.0 - 2.3).abs() < 1e-9);
        assert!((peak.magnitude - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_edge_bin_not_refined() {
        let s = spectrum(&[9.0, 4.0, 1.0], 10.0);
        let peak = find_peak(&s, true).unwrap();
        assert_eq!(peak.bin, 0);
        assert_eq!(peak.frequency, Hertz(0.0));
    }

    #[test]
    fn test_empty_spectrum() {
        let s = Spectrum { bins: Vec::new(), bin_width: Hertz(1.0), transform_len: 0 };
        assert!(find_peak(&s, true).is_none());
    }
}
