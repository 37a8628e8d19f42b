//! Pulse sequences, output pin roles, and compiled pulse programs.
//!
//! A [`PulseSequence`] is what the operator asks for; a [`CompiledProgram`]
//! is the flat, cycle-exact instruction list the sequencer executes.
//! Durations on both sides are clock cycles of the instrument
//! [`Timebase`](crate::units::Timebase).

use crate::buffer::AcquisitionWindow;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Fixed hardware roles of the controller's GPIO lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinRole {
    /// RF transmit gate.
    RfPulse,
    /// Receiver isolation switch (asserted = receiver disconnected).
    RxIsolation,
    /// Pre-polarization coil drive.
    Polarization,
    /// Analog receiver input. Not an output, has no mask bit.
    AdcInput,
}

impl PinRole {
    pub const OUTPUTS: [PinRole; 3] = [PinRole::RfPulse, PinRole::RxIsolation, PinRole::Polarization];

    /// GPIO number on the controller board.
    pub fn gpio(&self) -> u8 {
        match self {
            PinRole::RfPulse => 16,
            PinRole::RxIsolation => 22,
            PinRole::Polarization => 26,
            PinRole::AdcInput => 28,
        }
    }

    /// Output mask bit for this role.
    pub fn mask(&self) -> PinMask {
        match self {
            PinRole::RfPulse => PinMask::RF_PULSE,
            PinRole::RxIsolation => PinMask::RX_ISOLATION,
            PinRole::Polarization => PinMask::POLARIZATION,
            PinRole::AdcInput => PinMask::EMPTY,
        }
    }
}

/// Set of asserted output lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PinMask(pub u8);

impl PinMask {
    /// Safe, de-energized level: every output low.
    pub const EMPTY: Self = Self(0);
    pub const RF_PULSE: Self = Self(0b001);
    pub const POLARIZATION: Self = Self(0b010);
    pub const RX_ISOLATION: Self = Self(0b100);

    /// Lines the pulse sequencer owns. Polarization belongs to the
    /// synchronization controller.
    pub const SEQUENCER_LINES: Self = Self(Self::RF_PULSE.0 | Self::RX_ISOLATION.0);
    pub const ALL: Self = Self(Self::SEQUENCER_LINES.0 | Self::POLARIZATION.0);

    #[inline]
    pub fn contains(&self, other: PinMask) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn intersection(&self, other: PinMask) -> PinMask {
        PinMask(self.0 & other.0)
    }

    /// Replace the bits selected by `lines` with the bits of `value`.
    #[inline]
    pub fn with_lines(&self, value: PinMask, lines: PinMask) -> PinMask {
        PinMask((self.0 & !lines.0) | (value.0 & lines.0))
    }
}

impl BitOr for PinMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for PinMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(PinMask::RF_PULSE) {
            names.push("RF");
        }
        if self.contains(PinMask::RX_ISOLATION) {
            names.push("ISO");
        }
        if self.contains(PinMask::POLARIZATION) {
            names.push("POL");
        }
        if names.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Pulse sequence family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceKind {
    Fid,
    Cpmg,
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceKind::Fid => write!(f, "FID"),
            SequenceKind::Cpmg => write!(f, "CPMG"),
        }
    }
}

/// A requested pulse sequence.
///
/// Durations are signed so that a negative request survives until the
/// compiler can reject it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PulseSequence {
    /// Single excitation pulse followed by one acquisition window.
    Fid {
        pulse_width: i64,
        /// Pulse start to acquisition start.
        echo_spacing: i64,
        repetition_delay: i64,
        samples: u32,
    },
    /// Excitation pulse followed by a train of refocusing pulses, one
    /// acquisition window per echo.
    Cpmg {
        pulse_width: i64,
        echo_spacing: i64,
        echo_count: u32,
        repetition_delay: i64,
        /// Samples captured per echo.
        samples: u32,
    },
}

impl PulseSequence {
    pub fn kind(&self) -> SequenceKind {
        match self {
            PulseSequence::Fid { .. } => SequenceKind::Fid,
            PulseSequence::Cpmg { .. } => SequenceKind::Cpmg,
        }
    }

    pub fn pulse_width(&self) -> i64 {
        match self {
            PulseSequence::Fid { pulse_width, .. } | PulseSequence::Cpmg { pulse_width, .. } => {
                *pulse_width
            }
        }
    }

    pub fn echo_spacing(&self) -> i64 {
        match self {
            PulseSequence::Fid { echo_spacing, .. } | PulseSequence::Cpmg { echo_spacing, .. } => {
                *echo_spacing
            }
        }
    }

    pub fn repetition_delay(&self) -> i64 {
        match self {
            PulseSequence::Fid { repetition_delay, .. }
            | PulseSequence::Cpmg { repetition_delay, .. } => *repetition_delay,
        }
    }

    /// Number of acquisition windows this sequence produces.
    pub fn window_count(&self) -> u32 {
        match self {
            PulseSequence::Fid { .. } => 1,
            PulseSequence::Cpmg { echo_count, .. } => *echo_count,
        }
    }

    /// Samples captured per window.
    pub fn samples_per_window(&self) -> u32 {
        match self {
            PulseSequence::Fid { samples, .. } | PulseSequence::Cpmg { samples, .. } => *samples,
        }
    }
}

/// One step of a compiled program: hold `pins` for `duration` cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub pins: PinMask,
    pub duration: u64,
    /// Arms the acquisition window bound to this instruction at its start.
    pub trigger: bool,
}

impl Instruction {
    pub fn hold(pins: PinMask, duration: u64) -> Self {
        Self { pins, duration, trigger: false }
    }

    pub fn trigger(duration: u64) -> Self {
        Self { pins: PinMask::EMPTY, duration, trigger: true }
    }

    #[inline]
    pub fn is_rf(&self) -> bool {
        self.pins.contains(PinMask::RF_PULSE)
    }
}

/// An immutable, fully-resolved pulse program.
///
/// Windows are stored in trigger order: the `n`th trigger instruction arms
/// `windows()[n]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompiledProgram {
    kind: SequenceKind,
    echo_spacing: u64,
    instructions: Vec<Instruction>,
    windows: Vec<AcquisitionWindow>,
    trigger_indices: Vec<usize>,
}

impl CompiledProgram {
    /// Assemble a program. The caller guarantees one window per trigger.
    pub fn new(
        kind: SequenceKind,
        echo_spacing: u64,
        instructions: Vec<Instruction>,
        windows: Vec<AcquisitionWindow>,
    ) -> Self {
        let trigger_indices = instructions
            .iter()
            .enumerate()
            .filter(|(_, ins)| ins.trigger)
            .map(|(i, _)| i)
            .collect();
        Self { kind, echo_spacing, instructions, windows, trigger_indices }
    }

    pub fn kind(&self) -> SequenceKind {
        self.kind
    }

    pub fn echo_spacing(&self) -> u64 {
        self.echo_spacing
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn windows(&self) -> &[AcquisitionWindow] {
        &self.windows
    }

    pub fn trigger_indices(&self) -> &[usize] {
        &self.trigger_indices
    }

    /// Total program length in cycles.
    pub fn total_cycles(&self) -> u64 {
        self.instructions.iter().map(|ins| ins.duration).sum()
    }

    /// Samples the full program will capture.
    pub fn total_samples(&self) -> usize {
        self.windows.iter().map(|w| w.duration).sum()
    }

    /// Window armed by the instruction at `index`, if it is a trigger.
    pub fn window_for_instruction(&self, index: usize) -> Option<&AcquisitionWindow> {
        self.trigger_indices
            .iter()
            .position(|&i| i == index)
            .and_then(|n| self.windows.get(n))
    }

    /// Start cycle of each instruction relative to program start.
    pub fn start_cycles(&self) -> Vec<u64> {
        self.instructions
            .iter()
            .scan(0u64, |t, ins| {
                let start = *t;
                *t += ins.duration;
                Some(start)
            })
            .collect()
    }

    /// Centre of each acquisition gate in cycles from program start.
    pub fn gate_centers(&self) -> Vec<u64> {
        let starts = self.start_cycles();
        self.trigger_indices
            .iter()
            .zip(&self.windows)
            .map(|(&i, w)| starts[i] + w.offset_cycles + w.gate_cycles() / 2)
            .collect()
    }
}
