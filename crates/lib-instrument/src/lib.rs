//! # lib-instrument
//!
//! The hardware timeline of a low-field NMR spectrometer.
//!
//! A run moves through three cooperating threads, each on its own clock
//! domain, coupled only by channels and an abort flag:
//!
//! - **Pulse sequencer**: plays the compiled program onto the RF and
//!   receiver-isolation lines with cycle-exact timing
//! - **Synchronization**: pre-polarization, receiver isolation and the
//!   trigger relay to the acquisition engine
//! - **Acquisition**: ADC, FIFO and DMA into the capture buffer
//!
//! [`Spectrometer`] wraps them behind a single blocking `run` call and
//! hands the capture to `lib-dsp` for spectral and relaxation analysis.
//!
//! # Safety
//!
//! Every exit path of a run, including timeouts and aborts, ends with all
//! output lines driven low. A run whose gates would overlap an RF pulse or
//! its isolation dead-time is rejected before any line is driven.

pub mod error;
pub mod config;
pub mod pins;
pub mod adc;
pub mod sequencer;
pub mod sync;
pub mod acquisition;
pub mod session;
pub mod spectrometer;

pub use adc::{DecayingSine, EchoTrain, QuietReceiver, SampleSource};
pub use config::InstrumentConfig;
pub use error::{InstrumentError, InstrumentResult};
pub use pins::{PinBank, PinTransition};
pub use session::{HardwareSession, SessionState};
pub use spectrometer::{RunOutcome, Spectrometer};
