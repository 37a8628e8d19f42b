//! Pulse program compiler.
//!
//! Turns a [`PulseSequence`] into a flat [`CompiledProgram`] of
//! `(pins, duration, trigger)` instructions. All arithmetic is on integer
//! clock cycles and checked, so the program length is exactly the analytic
//! sequence length and identical on every compilation.
//!
//! # Program layout
//!
//! With `P` the sample period, `D` the isolation dead-time and
//! `G = samples * P` the gate length:
//!
//! ```text
//! FID:   [RF|ISO pw] [ISO D] [idle s-pw-D]? [TRIG G] [idle R]?
//!
//! CPMG:  [RF|ISO pw] [ISO tau]
//!        N x { [RF|ISO 2pw] [ISO D] [idle a]? [TRIG G] [idle b]? [ISO D] }
//!        [idle R]?
//! ```
//!
//! where `tau = E/2` and the per-echo free time `F = E - 2pw - 2D - G` is
//! split `a = F/2`, `b = F - a` so that the gate sits centred between
//! refocusing pulses. Each CPMG echo block is exactly `E` cycles.

use crate::error::{CompileError, CompileResult};
use crate::isolation::verify_isolation;
use lib_types::buffer::AcquisitionWindow;
use lib_types::sequence::{CompiledProgram, Instruction, PinMask, PulseSequence, SequenceKind};
use lib_types::units::Timebase;

/// Default ADC sample period: 2 us at 125 MHz (500 ksps).
pub const DEFAULT_SAMPLE_PERIOD_CYCLES: u64 = 250;

/// Default isolation dead-time: 20 us at 125 MHz.
pub const DEFAULT_DEAD_TIME_CYCLES: u64 = 2_500;

/// Largest capture the DMA buffer accepts.
pub const DEFAULT_BUFFER_CAPACITY: usize = 20_000;

/// Hardware parameters the compiler needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompilerConfig {
    pub timebase: Timebase,
    pub sample_period_cycles: u64,
    pub dead_time_cycles: u64,
    pub buffer_capacity: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            timebase: Timebase::default(),
            sample_period_cycles: DEFAULT_SAMPLE_PERIOD_CYCLES,
            dead_time_cycles: DEFAULT_DEAD_TIME_CYCLES,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Compile a sequence request into an executable program.
pub fn compile(sequence: &PulseSequence, config: &CompilerConfig) -> CompileResult<CompiledProgram> {
    if config.sample_period_cycles == 0 {
        return Err(CompileError::invalid("sample period must be at least one cycle"));
    }

    let program = match *sequence {
        PulseSequence::Fid {
            pulse_width,
            echo_spacing,
            repetition_delay,
            samples,
        } => compile_fid(pulse_width, echo_spacing, repetition_delay, samples, config)?,
        PulseSequence::Cpmg {
            pulse_width,
            echo_spacing,
            echo_count,
            repetition_delay,
            samples,
        } => compile_cpmg(
            pulse_width,
            echo_spacing,
            echo_count,
            repetition_delay,
            samples,
            config,
        )?,
    };

    verify_isolation(&program, config.dead_time_cycles)?;

    tracing::debug!(
        kind = %program.kind(),
        instructions = program.instructions().len(),
        windows = program.windows().len(),
        total_cycles = program.total_cycles(),
        "compiled pulse program"
    );

    Ok(program)
}

fn compile_fid(
    pulse_width: i64,
    echo_spacing: i64,
    repetition_delay: i64,
    samples: u32,
    config: &CompilerConfig,
) -> CompileResult<CompiledProgram> {
    let pw = non_negative("pulse width", pulse_width)?;
    let spacing = non_negative("echo spacing", echo_spacing)?;
    let delay = non_negative("repetition delay", repetition_delay)?;
    check_pulse_and_spacing(pw, spacing)?;
    let samples = check_capacity(samples, 1, config)?;

    let dead = config.dead_time_cycles;
    let gate = gate_cycles(samples, config)?;

    let settle = pw
        .checked_add(dead)
        .ok_or_else(overflow)?;
    if spacing < settle {
        return Err(CompileError::unsafe_timing(format!(
            "acquisition starts {} cycles after the pulse but the pulse plus dead-time needs {}",
            spacing, settle
        )));
    }

    let mut builder = ProgramBuilder::new();
    builder.push(Instruction::hold(PinMask::SEQUENCER_LINES, pw));
    builder.push(Instruction::hold(PinMask::RX_ISOLATION, dead));
    builder.push(Instruction::hold(PinMask::EMPTY, spacing - settle));
    builder.gate(gate, window(samples, config));
    builder.push(Instruction::hold(PinMask::EMPTY, delay));

    let program = builder.finish(SequenceKind::Fid, spacing);
    expect_total(&program, [spacing, gate, delay])?;
    Ok(program)
}

fn compile_cpmg(
    pulse_width: i64,
    echo_spacing: i64,
    echo_count: u32,
    repetition_delay: i64,
    samples: u32,
    config: &CompilerConfig,
) -> CompileResult<CompiledProgram> {
    let pw = non_negative("pulse width", pulse_width)?;
    let spacing = non_negative("echo spacing", echo_spacing)?;
    let delay = non_negative("repetition delay", repetition_delay)?;
    check_pulse_and_spacing(pw, spacing)?;
    if echo_count == 0 {
        return Err(CompileError::invalid("CPMG needs at least one echo"));
    }
    let samples = check_capacity(samples, echo_count, config)?;

    let dead = config.dead_time_cycles;
    let gate = gate_cycles(samples, config)?;
    let refocus = pw.checked_mul(2).ok_or_else(overflow)?;
    let tau = spacing / 2;

    let occupied = refocus
        .checked_add(dead.checked_mul(2).ok_or_else(overflow)?)
        .and_then(|c| c.checked_add(gate))
        .ok_or_else(overflow)?;
    if spacing < occupied {
        return Err(CompileError::unsafe_timing(format!(
            "echo spacing {} cycles cannot hold a {}-cycle refocusing pulse, two {}-cycle dead-times and a {}-cycle gate",
            spacing, refocus, dead, gate
        )));
    }
    let train = spacing
        .checked_mul(echo_count as u64)
        .ok_or_else(overflow)?;
    let free = spacing - occupied;
    let before_gate = free / 2;
    let after_gate = free - before_gate;

    let mut builder = ProgramBuilder::new();
    builder.push(Instruction::hold(PinMask::SEQUENCER_LINES, pw));
    builder.push(Instruction::hold(PinMask::RX_ISOLATION, tau));
    for _ in 0..echo_count {
        builder.push(Instruction::hold(PinMask::SEQUENCER_LINES, refocus));
        builder.push(Instruction::hold(PinMask::RX_ISOLATION, dead));
        builder.push(Instruction::hold(PinMask::EMPTY, before_gate));
        builder.gate(gate, window(samples, config));
        builder.push(Instruction::hold(PinMask::EMPTY, after_gate));
        builder.push(Instruction::hold(PinMask::RX_ISOLATION, dead));
    }
    builder.push(Instruction::hold(PinMask::EMPTY, delay));

    let program = builder.finish(SequenceKind::Cpmg, spacing);
    expect_total(&program, [pw, tau, train, delay])?;
    Ok(program)
}

/// Collects instructions, dropping zero-length holds.
struct ProgramBuilder {
    instructions: Vec<Instruction>,
    windows: Vec<AcquisitionWindow>,
}

impl ProgramBuilder {
    fn new() -> Self {
        Self {
            instructions: Vec::new(),
            windows: Vec::new(),
        }
    }

    fn push(&mut self, instruction: Instruction) {
        if instruction.duration > 0 {
            self.instructions.push(instruction);
        }
    }

    fn gate(&mut self, duration: u64, window: AcquisitionWindow) {
        self.instructions.push(Instruction::trigger(duration));
        self.windows.push(window);
    }

    fn finish(self, kind: SequenceKind, echo_spacing: u64) -> CompiledProgram {
        CompiledProgram::new(kind, echo_spacing, self.instructions, self.windows)
    }
}

fn non_negative(name: &str, value: i64) -> CompileResult<u64> {
    u64::try_from(value)
        .map_err(|_| CompileError::invalid(format!("{} must not be negative, got {}", name, value)))
}

fn check_pulse_and_spacing(pw: u64, spacing: u64) -> CompileResult<()> {
    if pw == 0 {
        return Err(CompileError::invalid("pulse width must be at least one cycle"));
    }
    let min_spacing = pw.checked_mul(2).ok_or_else(overflow)?;
    if spacing < min_spacing {
        return Err(CompileError::invalid(format!(
            "echo spacing {} cycles is shorter than twice the pulse width ({})",
            spacing, min_spacing
        )));
    }
    Ok(())
}

fn check_capacity(samples: u32, windows: u32, config: &CompilerConfig) -> CompileResult<usize> {
    if samples == 0 {
        return Err(CompileError::invalid("acquisition needs at least one sample"));
    }
    let total = samples as u64 * windows as u64;
    if total > config.buffer_capacity as u64 {
        return Err(CompileError::invalid(format!(
            "{} samples requested but the buffer holds {}",
            total, config.buffer_capacity
        )));
    }
    Ok(samples as usize)
}

fn gate_cycles(samples: usize, config: &CompilerConfig) -> CompileResult<u64> {
    (samples as u64)
        .checked_mul(config.sample_period_cycles)
        .ok_or_else(overflow)
}

fn window(samples: usize, config: &CompilerConfig) -> AcquisitionWindow {
    AcquisitionWindow {
        offset_cycles: 0,
        duration: samples,
        sample_period_cycles: config.sample_period_cycles,
    }
}

fn overflow() -> CompileError {
    CompileError::invalid("sequence duration overflows the cycle counter")
}

fn expect_total<const N: usize>(program: &CompiledProgram, parts: [u64; N]) -> CompileResult<()> {
    let expected = parts
        .iter()
        .try_fold(0u64, |acc, &p| acc.checked_add(p))
        .ok_or_else(overflow)?;
    let actual = program
        .instructions()
        .iter()
        .try_fold(0u64, |acc, ins| acc.checked_add(ins.duration))
        .ok_or_else(overflow)?;
    if actual != expected {
        return Err(CompileError::invalid(format!(
            "program spans {} cycles, expected {}",
            actual, expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CompilerConfig {
        CompilerConfig::default()
    }

    fn us(v: i64) -> i64 {
        Timebase::default().cycles_from_us(v)
    }

    fn cpmg(pw: i64, spacing: i64, echoes: u32, delay: i64, samples: u32) -> PulseSequence {
        PulseSequence::Cpmg {
            pulse_width: pw,
            echo_spacing: spacing,
            echo_count: echoes,
            repetition_delay: delay,
            samples,
        }
    }

    #[test]
    fn test_fid_layout_and_duration() {
        let seq = PulseSequence::Fid {
            pulse_width: us(10),
            echo_spacing: us(40),
            repetition_delay: us(1_000),
            samples: 2048,
        };
        let program = compile(&seq, &cfg()).unwrap();

        let ins = program.instructions();
        assert_eq!(ins.len(), 5);
        assert_eq!(ins[0].pins, PinMask::SEQUENCER_LINES);
        assert_eq!(ins[0].duration, 1_250);
        assert_eq!(ins[1].pins, PinMask::RX_ISOLATION);
        assert_eq!(ins[1].duration, 2_500);
        assert_eq!(ins[2].duration, 5_000 - 3_750);
        assert!(ins[3].trigger);
        assert_eq!(ins[3].duration, 2048 * 250);

        assert_eq!(program.total_cycles(), 5_000 + 2048 * 250 + 125_000);
        assert_eq!(program.total_samples(), 2048);
        assert_eq!(program.windows().len(), 1);
    }

    #[test]
    fn test_fid_omits_zero_length_gap() {
        // Spacing exactly pulse + dead-time: no idle instruction.
        let seq = PulseSequence::Fid {
            pulse_width: 1_250,
            echo_spacing: 3_750,
            repetition_delay: 0,
            samples: 16,
        };
        let program = compile(&seq, &cfg()).unwrap();
        assert_eq!(program.instructions().len(), 3);
        assert!(program.instructions().iter().all(|i| i.duration > 0));
    }

    #[test]
    fn test_cpmg_duration_is_analytic() {
        let pw = us(113);
        let spacing = us(2_000);
        let seq = cpmg(pw, spacing, 32, us(500), 200);
        let program = compile(&seq, &cfg()).unwrap();

        let expected = (pw + spacing / 2 + 32 * spacing + us(500)) as u64;
        assert_eq!(program.total_cycles(), expected);
        assert_eq!(program.windows().len(), 32);
        assert_eq!(program.total_samples(), 32 * 200);
        assert_eq!(program.trigger_indices().len(), 32);
    }

    #[test]
    fn test_cpmg_echo_blocks_are_exact() {
        let spacing = us(2_000) as u64;
        let program = compile(&cpmg(us(113), spacing as i64, 8, 0, 200), &cfg()).unwrap();

        // Gate centres are exactly one echo spacing apart.
        let centers = program.gate_centers();
        for pair in centers.windows(2) {
            assert_eq!(pair[1] - pair[0], spacing);
        }
    }

    #[test]
    fn test_repeated_compilation_is_identical() {
        let seq = cpmg(us(113), us(2_000), 32, 0, 200);
        let a = compile(&seq, &cfg()).unwrap();
        let b = compile(&seq, &cfg()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_negative_durations_rejected() {
        let seq = PulseSequence::Fid {
            pulse_width: -10,
            echo_spacing: us(40),
            repetition_delay: 0,
            samples: 10,
        };
        assert!(matches!(compile(&seq, &cfg()), Err(CompileError::InvalidSequence(_))));

        let seq = cpmg(us(10), us(2_000), 4, -1, 10);
        assert!(matches!(compile(&seq, &cfg()), Err(CompileError::InvalidSequence(_))));
    }

    #[test]
    fn test_invalid_parameters() {
        // Zero pulse width.
        assert!(matches!(
            compile(&cpmg(0, us(2_000), 4, 0, 10), &cfg()),
            Err(CompileError::InvalidSequence(_))
        ));
        // Spacing shorter than two pulse widths.
        assert!(matches!(
            compile(&cpmg(us(100), us(150), 4, 0, 10), &cfg()),
            Err(CompileError::InvalidSequence(_))
        ));
        // No echoes.
        assert!(matches!(
            compile(&cpmg(us(10), us(2_000), 0, 0, 10), &cfg()),
            Err(CompileError::InvalidSequence(_))
        ));
        // Buffer capacity exceeded.
        assert!(matches!(
            compile(&cpmg(us(10), us(2_000), 200, 0, 200), &cfg()),
            Err(CompileError::InvalidSequence(_))
        ));
        // Overflow.
        assert!(matches!(
            compile(&cpmg(1, i64::MAX, u32::MAX, 0, 1), &CompilerConfig {
                buffer_capacity: usize::MAX,
                ..cfg()
            }),
            Err(CompileError::InvalidSequence(_))
        ));
    }

    #[test]
    fn test_gate_overlapping_pulse_is_unsafe() {
        // 400 samples at 2 us do not fit between refocusing pulses 500 us apart.
        let seq = cpmg(us(10), us(500), 4, 0, 400);
        assert!(matches!(compile(&seq, &cfg()), Err(CompileError::UnsafeTiming(_))));

        // FID acquisition starting inside the dead-time.
        let seq = PulseSequence::Fid {
            pulse_width: us(10),
            echo_spacing: us(25),
            repetition_delay: 0,
            samples: 10,
        };
        assert!(matches!(compile(&seq, &cfg()), Err(CompileError::UnsafeTiming(_))));
    }
}
