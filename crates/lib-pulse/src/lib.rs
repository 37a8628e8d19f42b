//! # lib-pulse
//!
//! Pulse program compilation for the NMR spectrometer kernel.
//!
//! This crate provides:
//! - The pulse program compiler (`PulseSequence` to `CompiledProgram`)
//! - Receiver isolation margin verification
//! - A `nom` parser for one-line sequence descriptors
//!
//! Every error here is raised before any output line is driven.

pub mod error;
pub mod compiler;
pub mod isolation;
pub mod descriptor;

pub use error::{CompileError, CompileResult};
pub use compiler::{compile, CompilerConfig};
pub use isolation::verify_isolation;
pub use descriptor::parse_descriptor;
