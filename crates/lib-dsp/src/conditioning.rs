//! Time-domain conditioning ahead of the spectral transform.

/// Zero-fill multiple applied before the transform.
pub const ZERO_FILL_FACTOR: usize = 4;

/// Subtract the arithmetic mean, returning the removed offset.
///
/// The receiver sits at mid-scale of the ADC, so raw captures carry a large
/// DC term that would otherwise dominate bin 0.
pub fn remove_dc(signal: &mut [f64]) -> f64 {
    if signal.is_empty() {
        return 0.0;
    }
    let mean = signal.iter().sum::<f64>() / signal.len() as f64;
    for x in signal.iter_mut() {
        *x -= mean;
    }
    mean
}

/// Append zeros so the signal is `factor` times its original length.
pub fn zero_fill(signal: &[f64], factor: usize) -> Vec<f64> {
    crate::fft::zero_pad(signal, signal.len() * factor.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_dc_zero_mean() {
        let mut signal: Vec<f64> = (0..1000).map(|i| 2048.0 + (i as f64 * 0.37).sin() * 300.0).collect();
        let offset = remove_dc(&mut signal);

        assert!(offset > 2000.0);
        let mean = signal.iter().sum::<f64>() / signal.len() as f64;
        assert!(mean.abs() < 1e-9);
    }

    #[test]
    fn test_remove_dc_empty() {
        let mut empty: Vec<f64> = Vec::new();
        assert_eq!(remove_dc(&mut empty), 0.0);
    }

    #[test]
    fn test_zero_fill_length_and_tail() {
        let signal = vec![1.0; 300];
        let filled = zero_fill(&signal, ZERO_FILL_FACTOR);

        assert_eq!(filled.len(), 1200);
        assert!(filled[..300].iter().all(|&x| x == 1.0));
        assert!(filled[300..].iter().all(|&x| x == 0.0));
    }
}
