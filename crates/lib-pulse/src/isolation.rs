//! Receiver isolation margin verification.
//!
//! The receiver front end must be disconnected whenever the transmitter is
//! active and for a dead-time on either side of every RF pulse. This pass
//! walks a compiled program and rejects it if any pulse lacks that margin
//! or any acquisition gate overlaps it.

use crate::error::{CompileError, CompileResult};
use lib_types::sequence::{CompiledProgram, Instruction, PinMask};

/// Check every RF pulse in `program` for `dead_time` isolated cycles on
/// both sides.
///
/// The first pulse of a program is exempt from the leading margin: the
/// synchronization controller asserts isolation for a full dead-time before
/// the program origin.
pub fn verify_isolation(program: &CompiledProgram, dead_time: u64) -> CompileResult<()> {
    let instructions = program.instructions();

    for (index, ins) in instructions.iter().enumerate() {
        if ins.trigger && !ins.pins.intersection(PinMask::SEQUENCER_LINES).is_empty() {
            return Err(CompileError::unsafe_timing(format!(
                "acquisition gate at instruction {} asserts {}",
                index, ins.pins
            )));
        }

        if !ins.is_rf() {
            continue;
        }

        if !ins.pins.contains(PinMask::RX_ISOLATION) {
            return Err(CompileError::unsafe_timing(format!(
                "RF pulse at instruction {} without receiver isolation",
                index
            )));
        }

        if index > 0 {
            let before = isolated_run(instructions[..index].iter().rev());
            if before < dead_time {
                return Err(CompileError::unsafe_timing(format!(
                    "RF pulse at instruction {} has {} isolated cycles before it, needs {}",
                    index, before, dead_time
                )));
            }
        }

        let after = isolated_run(instructions[index + 1..].iter());
        if after < dead_time {
            return Err(CompileError::unsafe_timing(format!(
                "RF pulse at instruction {} has {} isolated cycles after it, needs {}",
                index, after, dead_time
            )));
        }
    }

    Ok(())
}

/// Cycles of isolation-only instructions adjacent to a pulse, stopping at
/// the first instruction that drops isolation or fires RF.
fn isolated_run<'a>(instructions: impl Iterator<Item = &'a Instruction>) -> u64 {
    instructions
        .take_while(|ins| ins.pins.contains(PinMask::RX_ISOLATION) && !ins.is_rf() && !ins.trigger)
        .fold(0u64, |acc, ins| acc.saturating_add(ins.duration))
}
