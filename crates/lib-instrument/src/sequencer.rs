//! Pulse sequencer.
//!
//! Plays a compiled program onto the RF and receiver-isolation lines in
//! clock-cycle time. Once started it needs nothing from the supervisor: it
//! reports triggers and completion over a channel and only looks at the
//! abort flag between instructions.

use crate::pins::PinBank;
use crossbeam::channel::Sender;
use lib_types::sequence::{CompiledProgram, PinMask};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Execution state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    /// Executing the instruction at this index.
    Running(usize),
    Done,
    Aborted,
}

/// Notifications from the sequencer, stamped with absolute clock cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequencerEvent {
    /// A trigger instruction started.
    Trigger { instruction: usize, cycle: u64 },
    /// Program complete, outputs low.
    Finished { cycle: u64 },
    /// Stopped at an instruction boundary, outputs safe.
    Aborted { instruction: usize, cycle: u64 },
}

/// Autonomous program executor.
pub struct PulseSequencer {
    program: Arc<CompiledProgram>,
    pins: Arc<PinBank>,
    abort: Arc<AtomicBool>,
    state: SequencerState,
}

impl PulseSequencer {
    pub fn new(program: Arc<CompiledProgram>, pins: Arc<PinBank>, abort: Arc<AtomicBool>) -> Self {
        Self {
            program,
            pins,
            abort,
            state: SequencerState::Idle,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Run the program starting at absolute cycle `origin`.
    ///
    /// A closed event channel does not stop execution: the lines are still
    /// driven through the whole program and left low.
    pub fn execute(&mut self, origin: u64, events: &Sender<SequencerEvent>) -> SequencerState {
        let mut cycle = origin;

        for (index, instruction) in self.program.instructions().iter().enumerate() {
            if self.abort.load(Ordering::Acquire) {
                self.pins.drive(cycle, PinMask::EMPTY, PinMask::ALL);
                self.state = SequencerState::Aborted;
                tracing::info!(instruction = index, cycle, "pulse sequencer aborted");
                let _ = events.send(SequencerEvent::Aborted { instruction: index, cycle });
                return self.state;
            }

            self.state = SequencerState::Running(index);
            self.pins.drive(cycle, instruction.pins, PinMask::SEQUENCER_LINES);

            if instruction.trigger {
                tracing::trace!(instruction = index, cycle, "acquisition trigger");
                let _ = events.send(SequencerEvent::Trigger { instruction: index, cycle });
            }

            cycle += instruction.duration;
        }

        self.pins.drive(cycle, PinMask::EMPTY, PinMask::SEQUENCER_LINES);
        self.state = SequencerState::Done;
        tracing::debug!(
            origin,
            end = cycle,
            instructions = self.program.instructions().len(),
            "pulse program complete"
        );
        let _ = events.send(SequencerEvent::Finished { cycle });
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins::PinTransition;
    use crossbeam::channel::{bounded, unbounded};
    use lib_pulse::{compile, CompilerConfig};
    use lib_types::sequence::PulseSequence;

    fn cpmg_program() -> Arc<CompiledProgram> {
        let seq = PulseSequence::Cpmg {
            pulse_width: 1_250,
            echo_spacing: 125_000,
            echo_count: 4,
            repetition_delay: 0,
            samples: 50,
        };
        Arc::new(compile(&seq, &CompilerConfig::default()).unwrap())
    }

    fn run_once(program: &Arc<CompiledProgram>, origin: u64) -> (Vec<PinTransition>, Vec<SequencerEvent>) {
        let pins = Arc::new(PinBank::new());
        let (tx, rx) = unbounded();
        let mut seq = PulseSequencer::new(program.clone(), pins.clone(), Arc::new(AtomicBool::new(false)));
        assert_eq!(seq.execute(origin, &tx), SequencerState::Done);
        drop(tx);
        (pins.transitions(), rx.iter().collect())
    }

    #[test]
    fn test_events_and_timing() {
        let program = cpmg_program();
        let (transitions, events) = run_once(&program, 1_000);

        let starts = program.start_cycles();
        let triggers: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SequencerEvent::Trigger { instruction, cycle } => Some((*instruction, *cycle)),
                _ => None,
            })
            .collect();
        assert_eq!(triggers.len(), 4);
        for (instruction, cycle) in triggers {
            assert_eq!(cycle, 1_000 + starts[instruction]);
        }

        let end = 1_000 + program.total_cycles();
        assert_eq!(events.last(), Some(&SequencerEvent::Finished { cycle: end }));
        assert_eq!(transitions.first().map(|t| t.cycle), Some(1_000));
        assert_eq!(transitions.last(), Some(&PinTransition { cycle: end, level: PinMask::EMPTY }));
    }

    #[test]
    fn test_repeatable_pin_timeline() {
        let program = cpmg_program();
        let (first, _) = run_once(&program, 0);
        for _ in 0..5 {
            let (again, _) = run_once(&program, 0);
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_abort_only_at_instruction_boundary() {
        let program = cpmg_program();
        let pins = Arc::new(PinBank::new());
        let abort = Arc::new(AtomicBool::new(false));
        // Rendezvous channel: the sequencer blocks on every event until it is taken.
        let (tx, rx) = bounded(0);

        let handle = {
            let (program, pins, abort) = (program.clone(), pins.clone(), abort.clone());
            std::thread::spawn(move || {
                let mut seq = PulseSequencer::new(program, pins, abort);
                seq.execute(0, &tx)
            })
        };

        let first = rx.recv().unwrap();
        let first_trigger = match first {
            SequencerEvent::Trigger { instruction, .. } => instruction,
            other => panic!("expected trigger, got {:?}", other),
        };
        abort.store(true, Ordering::Release);

        // The sequencer may still deliver triggers it had already started;
        // it then stops at the next instruction boundary.
        let starts = program.start_cycles();
        let mut last_trigger = first_trigger;
        loop {
            match rx.recv().unwrap() {
                SequencerEvent::Trigger { instruction, .. } => last_trigger = instruction,
                SequencerEvent::Aborted { instruction, cycle } => {
                    assert!(instruction > last_trigger);
                    assert_eq!(cycle, starts[instruction]);
                    break;
                }
                SequencerEvent::Finished { .. } => panic!("abort ignored"),
            }
        }

        assert_eq!(handle.join().unwrap(), SequencerState::Aborted);
        assert_eq!(pins.level(), PinMask::EMPTY);
        assert!(rx.recv().is_err());
    }
}
