//! Physical units and the instrument timebase.
//!
//! Floating-point newtypes (`Seconds`, `Hertz`) are used for analysis
//! results. Everything on the hardware timeline is counted in integer
//! clock cycles; [`Timebase`] is the only place the two meet.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Sub};

/// Time duration in seconds.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Seconds(pub f64);

impl Seconds {
    pub const ZERO: Self = Self(0.0);

    #[inline]
    pub fn from_us(us: f64) -> Self {
        Self(us * 1e-6)
    }

    #[inline]
    pub fn from_ms(ms: f64) -> Self {
        Self(ms * 1e-3)
    }

    #[inline]
    pub fn as_us(&self) -> f64 {
        self.0 * 1e6
    }

    #[inline]
    pub fn as_ms(&self) -> f64 {
        self.0 * 1e3
    }

    /// Convert to frequency (reciprocal).
    #[inline]
    pub fn to_frequency(&self) -> Hertz {
        Hertz(1.0 / self.0)
    }
}

impl Add for Seconds {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Seconds {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Mul<f64> for Seconds {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self(self.0 * rhs)
    }
}

impl Div<f64> for Seconds {
    type Output = Self;
    fn div(self, rhs: f64) -> Self {
        Self(self.0 / rhs)
    }
}

impl Div<Seconds> for Seconds {
    type Output = f64;
    fn div(self, rhs: Seconds) -> f64 {
        self.0 / rhs.0
    }
}

/// Frequency in Hertz.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Hertz(pub f64);

impl Hertz {
    pub const ZERO: Self = Self(0.0);

    #[inline]
    pub fn from_khz(khz: f64) -> Self {
        Self(khz * 1e3)
    }

    #[inline]
    pub fn as_khz(&self) -> f64 {
        self.0 * 1e-3
    }

    /// Convert to period (reciprocal).
    #[inline]
    pub fn to_period(&self) -> Seconds {
        Seconds(1.0 / self.0)
    }

    /// Angular frequency (omega = 2 * pi * f).
    #[inline]
    pub fn angular(&self) -> f64 {
        2.0 * std::f64::consts::PI * self.0
    }
}

impl Add for Hertz {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Hertz {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Mul<f64> for Hertz {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self(self.0 * rhs)
    }
}

impl Div<f64> for Hertz {
    type Output = Self;
    fn div(self, rhs: f64) -> Self {
        Self(self.0 / rhs)
    }
}

/// The instrument's system clock.
///
/// All pulse-program timing is expressed in cycles of this clock. Unit
/// conversions go through 128-bit integers so that a duration requested in
/// microseconds maps to the same cycle count every time, with no
/// floating-point accumulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timebase {
    /// Clock frequency in Hz.
    pub clock_hz: u64,
}

impl Timebase {
    /// 125 MHz, 8 ns per cycle.
    pub const DEFAULT_CLOCK_HZ: u64 = 125_000_000;

    pub fn new(clock_hz: u64) -> Self {
        Self { clock_hz }
    }

    /// Cycles in `us` microseconds, truncated toward zero. Negative inputs
    /// stay negative so callers can reject them.
    pub fn cycles_from_us(&self, us: i64) -> i64 {
        Self::scale(us, self.clock_hz, 1_000_000)
    }

    /// Cycles in `ms` milliseconds.
    pub fn cycles_from_ms(&self, ms: i64) -> i64 {
        Self::scale(ms, self.clock_hz, 1_000)
    }

    /// Cycles in `s` seconds.
    pub fn cycles_from_secs(&self, s: i64) -> i64 {
        Self::scale(s, self.clock_hz, 1)
    }

    /// Cycles in a fractional duration, rounded to the nearest cycle.
    ///
    /// Only used for slow, configuration-level quantities (polarization
    /// time); pulse timing always goes through the integer conversions.
    pub fn cycles_from_seconds(&self, seconds: Seconds) -> u64 {
        (seconds.0 * self.clock_hz as f64).round().max(0.0) as u64
    }

    /// Duration of `cycles` clock cycles.
    #[inline]
    pub fn to_seconds(&self, cycles: u64) -> Seconds {
        Seconds(cycles as f64 / self.clock_hz as f64)
    }

    /// Duration of one clock cycle.
    #[inline]
    pub fn period(&self) -> Seconds {
        self.to_seconds(1)
    }

    fn scale(value: i64, numerator: u64, denominator: u64) -> i64 {
        let scaled = value as i128 * numerator as i128 / denominator as i128;
        scaled.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

impl Default for Timebase {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CLOCK_HZ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_period_reciprocal() {
        let freq = Hertz::from_khz(2.21);
        let period = freq.to_period();

        assert!((period.as_us() - 452.488).abs() < 0.01);
        assert!((period.to_frequency().0 - freq.0).abs() < 1e-9);
    }

    #[test]
    fn test_timebase_integer_conversion() {
        let tb = Timebase::default();

        assert_eq!(tb.cycles_from_us(1), 125);
        assert_eq!(tb.cycles_from_us(10), 1_250);
        assert_eq!(tb.cycles_from_ms(2), 250_000);
        assert_eq!(tb.cycles_from_secs(3), 375_000_000);
        assert_eq!(tb.cycles_from_us(-10), -1_250);
    }

    #[test]
    fn test_timebase_no_drift_over_repetition() {
        let tb = Timebase::default();
        let per_echo = tb.cycles_from_us(2_000);

        // 10 000 repeats of a 2 ms interval must equal exactly 20 s.
        let total: i64 = (0..10_000).map(|_| per_echo).sum();
        assert_eq!(total, tb.cycles_from_secs(20));
    }

    #[test]
    fn test_timebase_seconds() {
        let tb = Timebase::default();
        assert!((tb.to_seconds(125).as_us() - 1.0).abs() < 1e-12);
        assert_eq!(tb.cycles_from_seconds(Seconds(3.0)), 375_000_000);
    }
}
