//! Synchronization controller.
//!
//! Owns everything that happens between the two hardware timelines:
//! the slow pre-polarization phase before the program origin, and the
//! relay that turns sequencer triggers into acquisition arm commands.
//!
//! # Run timeline
//!
//! ```text
//! cycle 0            polarization coil on
//! Tp                 coil off
//! Tp + Dpol          receiver isolation on
//! Tp + Dpol + Diso   program origin (first RF pulse)
//! ```

use crate::config::InstrumentConfig;
use crate::error::InstrumentResult;
use crate::pins::PinBank;
use crate::sequencer::SequencerEvent;
use crossbeam::channel::{Receiver, Sender};
use lib_pulse::verify_isolation;
use lib_types::buffer::AcquisitionWindow;
use lib_types::sequence::{CompiledProgram, PinMask};
use std::sync::atomic::{AtomicBool, Ordering};

/// Commands from the synchronization controller to the acquisition engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionCommand {
    /// Capture `window`, triggered at absolute cycle `trigger_cycle`.
    Arm {
        window: AcquisitionWindow,
        trigger_cycle: u64,
        origin: u64,
    },
    /// The sequencer stopped at `cycle`; no further triggers follow.
    Close { cycle: u64, aborted: bool },
}

/// Absolute cycles of the pre-program phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunTimeline {
    pub polarization_on: u64,
    pub polarization_off: u64,
    pub isolation_on: u64,
    pub origin: u64,
}

/// Couples the sequencer to the acquisition engine.
#[derive(Clone, Copy, Debug)]
pub struct SyncController {
    dead_time_cycles: u64,
    polarization_cycles: u64,
    polarization_dead_time_cycles: u64,
}

impl SyncController {
    pub fn new(config: &InstrumentConfig) -> Self {
        Self {
            dead_time_cycles: config.dead_time_cycles(),
            polarization_cycles: config.polarization_cycles(),
            polarization_dead_time_cycles: config.polarization_dead_time_cycles(),
        }
    }

    /// Reject programs whose gates overlap an RF pulse or its dead-time.
    pub fn verify(&self, program: &CompiledProgram) -> InstrumentResult<()> {
        verify_isolation(program, self.dead_time_cycles)?;
        Ok(())
    }

    pub fn timeline(&self) -> RunTimeline {
        let polarization_off = self.polarization_cycles;
        let isolation_on = if self.polarization_cycles > 0 {
            polarization_off + self.polarization_dead_time_cycles
        } else {
            0
        };
        RunTimeline {
            polarization_on: 0,
            polarization_off,
            isolation_on,
            origin: isolation_on + self.dead_time_cycles,
        }
    }

    /// Run the polarization phase and isolate the receiver.
    ///
    /// Returns the program origin, or `None` if an abort was requested
    /// before the sequencer could start.
    pub fn prepare(&self, pins: &PinBank, abort: &AtomicBool) -> Option<u64> {
        let timeline = self.timeline();

        if self.polarization_cycles > 0 {
            if abort.load(Ordering::Acquire) {
                return None;
            }
            pins.drive(timeline.polarization_on, PinMask::POLARIZATION, PinMask::POLARIZATION);
            pins.drive(timeline.polarization_off, PinMask::EMPTY, PinMask::POLARIZATION);
            tracing::debug!(
                on = timeline.polarization_on,
                off = timeline.polarization_off,
                "polarization complete"
            );
        }

        if abort.load(Ordering::Acquire) {
            pins.drive(timeline.polarization_off, PinMask::EMPTY, PinMask::ALL);
            return None;
        }
        pins.drive(timeline.isolation_on, PinMask::RX_ISOLATION, PinMask::RX_ISOLATION);
        Some(timeline.origin)
    }

    /// Forward sequencer events to the acquisition engine until the
    /// sequencer stops. Returns the final command sent.
    pub fn relay(
        &self,
        program: &CompiledProgram,
        origin: u64,
        events: &Receiver<SequencerEvent>,
        commands: &Sender<AcquisitionCommand>,
    ) -> AcquisitionCommand {
        let mut last_cycle = origin;

        for event in events.iter() {
            let command = match event {
                SequencerEvent::Trigger { instruction, cycle } => {
                    last_cycle = cycle;
                    match program.window_for_instruction(instruction) {
                        Some(window) => AcquisitionCommand::Arm {
                            window: *window,
                            trigger_cycle: cycle,
                            origin,
                        },
                        None => {
                            tracing::error!(instruction, "trigger without an acquisition window");
                            continue;
                        }
                    }
                }
                SequencerEvent::Finished { cycle } => AcquisitionCommand::Close { cycle, aborted: false },
                SequencerEvent::Aborted { cycle, .. } => AcquisitionCommand::Close { cycle, aborted: true },
            };

            let _ = commands.send(command);
            if let AcquisitionCommand::Close { .. } = command {
                return command;
            }
        }

        // Sequencer gone without a final event: it never started.
        let command = AcquisitionCommand::Close {
            cycle: last_cycle,
            aborted: true,
        };
        let _ = commands.send(command);
        command
    }
}
