//! Hann windowing ahead of the spectral transform.
//!
//! A captured FID starts abruptly at the acquisition gate and is cut off at
//! the end of the buffer. Tapering both ends before the transform keeps that
//! truncation from smearing energy away from the Larmor line.

use std::f64::consts::PI;

/// Hann coefficients `0.5 - 0.5 * cos(2 pi i / (n - 1))`.
///
/// The window is symmetric, `w[i] = w[n - 1 - i]`, and reaches exactly zero
/// at both ends.
pub fn hann_window(length: usize) -> Vec<f64> {
    match length {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let span = (length - 1) as f64;
            (0..length)
                .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / span).cos())
                .collect()
        }
    }
}

/// Multiply `signal` by a Hann window of the same length in place.
pub fn apply_hann(signal: &mut [f64]) {
    let window = hann_window(signal.len());
    for (x, w) in signal.iter_mut().zip(window) {
        *x *= w;
    }
}
