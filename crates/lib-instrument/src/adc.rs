//! Receiver ADC input.
//!
//! The acquisition engine asks a [`SampleSource`] for the receiver voltage
//! at each conversion instant. On the bench this is the analog front end;
//! the synthetic sources here reproduce the signals a tuned probe produces
//! so the full run path can be exercised without hardware.

use lib_types::units::{Hertz, Seconds};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;

/// Full-scale code of the 12-bit ADC.
pub const ADC_MAX: i16 = 4095;

/// Mid-scale code the receiver idles at.
pub const ADC_MIDSCALE: f64 = 2048.0;

/// Convert a receiver level to an ADC code.
pub fn quantize(level: f64) -> i16 {
    if !level.is_finite() {
        return 0;
    }
    level.round().clamp(0.0, ADC_MAX as f64) as i16
}

/// Analog input seen by the ADC.
pub trait SampleSource: Send {
    /// ADC code at `t` seconds after the program origin.
    fn sample(&mut self, t: Seconds) -> i16;
}

/// Seeded white Gaussian noise.
pub struct GaussianNoise {
    rng: StdRng,
    /// `None` when the standard deviation is zero or unusable.
    normal: Option<Normal<f64>>,
}

impl GaussianNoise {
    pub fn new(std_dev: f64, seed: u64) -> Self {
        let normal = if std_dev > 0.0 { Normal::new(0.0, std_dev).ok() } else { None };
        Self {
            rng: StdRng::seed_from_u64(seed),
            normal,
        }
    }

    /// Next noise value.
    pub fn next(&mut self) -> f64 {
        match &self.normal {
            Some(normal) => self.rng.sample(normal),
            None => 0.0,
        }
    }
}

/// Free induction decay: `offset + A * exp(-t / T2*) * sin(2 pi f t)`.
pub struct DecayingSine {
    pub amplitude: f64,
    pub frequency: Hertz,
    pub t2_star: Seconds,
    pub offset: f64,
    noise: Option<GaussianNoise>,
}

impl DecayingSine {
    pub fn new(amplitude: f64, frequency: Hertz, t2_star: Seconds) -> Self {
        Self {
            amplitude,
            frequency,
            t2_star,
            offset: ADC_MIDSCALE,
            noise: None,
        }
    }

    pub fn with_noise(mut self, std_dev: f64, seed: u64) -> Self {
        self.noise = Some(GaussianNoise::new(std_dev, seed));
        self
    }

    fn level(&self, t: Seconds) -> f64 {
        let envelope = (-t.0 / self.t2_star.0).exp();
        self.offset + self.amplitude * envelope * (self.frequency.angular() * t.0).sin()
    }
}

impl SampleSource for DecayingSine {
    fn sample(&mut self, t: Seconds) -> i16 {
        let noise = self.noise.as_mut().map_or(0.0, GaussianNoise::next);
        quantize(self.level(t) + noise)
    }
}

/// CPMG echo train: Gaussian echo envelopes decaying with T2.
///
/// Echo `n` is centred at `centers[n]` with peak height
/// `A0 * exp(-t_n / T2)`, where `t_n` is its centre time.
pub struct EchoTrain {
    pub amplitude: f64,
    pub t2: Seconds,
    pub echo_width: Seconds,
    pub offset: f64,
    centers: Vec<Seconds>,
    noise: Option<GaussianNoise>,
}

impl EchoTrain {
    pub fn new(amplitude: f64, t2: Seconds, echo_width: Seconds, centers: Vec<Seconds>) -> Self {
        Self {
            amplitude,
            t2,
            echo_width,
            offset: ADC_MIDSCALE,
            centers,
            noise: None,
        }
    }

    pub fn with_noise(mut self, std_dev: f64, seed: u64) -> Self {
        self.noise = Some(GaussianNoise::new(std_dev, seed));
        self
    }

    pub fn centers(&self) -> &[Seconds] {
        &self.centers
    }

    fn level(&self, t: Seconds) -> f64 {
        let width = self.echo_width.0;
        let echoes: f64 = self
            .centers
            .iter()
            .filter(|c| (t.0 - c.0).abs() < 6.0 * width)
            .map(|c| {
                let x = (t.0 - c.0) / width;
                self.amplitude * (-c.0 / self.t2.0).exp() * (-0.5 * x * x).exp()
            })
            .sum();
        self.offset + echoes
    }
}

impl SampleSource for EchoTrain {
    fn sample(&mut self, t: Seconds) -> i16 {
        let noise = self.noise.as_mut().map_or(0.0, GaussianNoise::next);
        quantize(self.level(t) + noise)
    }
}

/// Idle receiver: mid-scale plus optional noise.
pub struct QuietReceiver {
    noise: Option<GaussianNoise>,
}

impl QuietReceiver {
    pub fn new() -> Self {
        Self { noise: None }
    }

    pub fn with_noise(std_dev: f64, seed: u64) -> Self {
        Self {
            noise: Some(GaussianNoise::new(std_dev, seed)),
        }
    }
}

impl Default for QuietReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for QuietReceiver {
    fn sample(&mut self, _t: Seconds) -> i16 {
        let noise = self.noise.as_mut().map_or(0.0, GaussianNoise::next);
        quantize(ADC_MIDSCALE + noise)
    }
}
