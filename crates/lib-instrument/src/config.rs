//! Instrument configuration.
//!
//! Defaults describe the reference controller board: 125 MHz system clock,
//! 500 ksps ADC, a 20 000-sample DMA buffer and a 3 s pre-polarization.

use crate::error::{InstrumentError, InstrumentResult};
use lib_pulse::CompilerConfig;
use lib_types::units::{Hertz, Seconds, Timebase};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hardware and run parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// System clock driving the sequencer and the ADC pacer.
    #[serde(default = "default_clock_hz")]
    pub clock_hz: u64,

    /// ADC sample rate. Must divide the clock exactly.
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: u64,

    /// Largest capture the DMA buffer holds.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// ADC FIFO depth in samples.
    #[serde(default = "default_fifo_depth")]
    pub fifo_depth: usize,

    /// Clock cycles one DMA transfer occupies the channel.
    #[serde(default = "default_transfer_cycles")]
    pub transfer_cycles: u64,

    /// Receiver isolation margin around every RF pulse.
    #[serde(default = "default_isolation_dead_time_us")]
    pub isolation_dead_time_us: u64,

    /// Pre-polarization coil on-time. Zero disables polarization.
    #[serde(default = "default_polarization_s")]
    pub polarization_s: f64,

    /// Settling time after the polarization coil switches off.
    #[serde(default = "default_polarization_dead_time_us")]
    pub polarization_dead_time_us: u64,

    /// Wall-clock limit on waiting for a capture.
    #[serde(default = "default_run_timeout_s")]
    pub run_timeout_s: f64,

    /// Expected Larmor frequency of the sample.
    #[serde(default = "default_larmor_hz")]
    pub larmor_hz: f64,
}

fn default_clock_hz() -> u64 {
    Timebase::DEFAULT_CLOCK_HZ
}

fn default_sample_rate_hz() -> u64 {
    500_000
}

fn default_buffer_capacity() -> usize {
    20_000
}

fn default_fifo_depth() -> usize {
    4
}

fn default_transfer_cycles() -> u64 {
    8
}

fn default_isolation_dead_time_us() -> u64 {
    20
}

fn default_polarization_s() -> f64 {
    3.0
}

fn default_polarization_dead_time_us() -> u64 {
    20
}

fn default_run_timeout_s() -> f64 {
    30.0
}

fn default_larmor_hz() -> f64 {
    2210.0
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            clock_hz: default_clock_hz(),
            sample_rate_hz: default_sample_rate_hz(),
            buffer_capacity: default_buffer_capacity(),
            fifo_depth: default_fifo_depth(),
            transfer_cycles: default_transfer_cycles(),
            isolation_dead_time_us: default_isolation_dead_time_us(),
            polarization_s: default_polarization_s(),
            polarization_dead_time_us: default_polarization_dead_time_us(),
            run_timeout_s: default_run_timeout_s(),
            larmor_hz: default_larmor_hz(),
        }
    }
}

impl InstrumentConfig {
    /// Check the configuration for physically meaningful values.
    pub fn validate(&self) -> InstrumentResult<()> {
        if self.clock_hz == 0 {
            return Err(InstrumentError::config("clock_hz must be positive"));
        }
        if self.sample_rate_hz == 0 || self.sample_rate_hz > self.clock_hz {
            return Err(InstrumentError::config(format!(
                "sample_rate_hz must be in 1..={}, got {}",
                self.clock_hz, self.sample_rate_hz
            )));
        }
        if self.clock_hz % self.sample_rate_hz != 0 {
            return Err(InstrumentError::config(format!(
                "sample_rate_hz {} does not divide the {} Hz clock",
                self.sample_rate_hz, self.clock_hz
            )));
        }
        if self.buffer_capacity == 0 {
            return Err(InstrumentError::config("buffer_capacity must be positive"));
        }
        if self.fifo_depth == 0 {
            return Err(InstrumentError::config("fifo_depth must be positive"));
        }
        if self.transfer_cycles == 0 {
            return Err(InstrumentError::config("transfer_cycles must be positive"));
        }
        if !(self.polarization_s.is_finite() && self.polarization_s >= 0.0) {
            return Err(InstrumentError::config("polarization_s must be non-negative"));
        }
        if !(self.run_timeout_s.is_finite() && self.run_timeout_s > 0.0) {
            return Err(InstrumentError::config("run_timeout_s must be positive"));
        }
        if Duration::try_from_secs_f64(self.run_timeout_s).is_err() {
            return Err(InstrumentError::config(format!(
                "run_timeout_s {} is out of range",
                self.run_timeout_s
            )));
        }
        if !(self.larmor_hz.is_finite() && self.larmor_hz > 0.0) {
            return Err(InstrumentError::config("larmor_hz must be positive"));
        }
        Ok(())
    }

    pub fn timebase(&self) -> Timebase {
        Timebase::new(self.clock_hz)
    }

    pub fn sample_period_cycles(&self) -> u64 {
        self.clock_hz / self.sample_rate_hz.max(1)
    }

    pub fn sample_period(&self) -> Seconds {
        self.timebase().to_seconds(self.sample_period_cycles())
    }

    pub fn dead_time_cycles(&self) -> u64 {
        self.timebase().cycles_from_us(self.isolation_dead_time_us as i64) as u64
    }

    pub fn polarization_cycles(&self) -> u64 {
        self.timebase().cycles_from_seconds(Seconds(self.polarization_s))
    }

    pub fn polarization_dead_time_cycles(&self) -> u64 {
        self.timebase().cycles_from_us(self.polarization_dead_time_us as i64) as u64
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.run_timeout_s).unwrap_or(Duration::MAX)
    }

    pub fn larmor(&self) -> Hertz {
        Hertz(self.larmor_hz)
    }

    /// Parameters for the pulse program compiler.
    pub fn compiler_config(&self) -> CompilerConfig {
        CompilerConfig {
            timebase: self.timebase(),
            sample_period_cycles: self.sample_period_cycles(),
            dead_time_cycles: self.dead_time_cycles(),
            buffer_capacity: self.buffer_capacity,
        }
    }
}
