//! # lib-types
//!
//! Core type definitions for the pulsed NMR spectrometer kernel.
//!
//! This crate provides the value types shared across the workspace:
//! - Physical units and the integer-cycle instrument timebase
//! - Pin roles, pulse sequences and compiled pulse programs
//! - Acquisition windows and captured sample buffers
//! - Spectra, peaks and relaxation fits

pub mod units;
pub mod sequence;
pub mod buffer;
pub mod spectrum;

pub use units::*;
pub use sequence::*;
pub use buffer::*;
pub use spectrum::*;
