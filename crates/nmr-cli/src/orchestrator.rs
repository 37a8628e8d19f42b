//! Measurement orchestration.

use crate::config::{AppConfig, ReceiverModel};
use anyhow::{Context, Result};
use lib_dsp::SpectralConfig;
use lib_instrument::{DecayingSine, EchoTrain, QuietReceiver, SampleSource, Spectrometer};
use lib_pulse::{compile, parse_descriptor};
use lib_types::sequence::{CompiledProgram, PulseSequence, SequenceKind};
use lib_types::spectrum::{RelaxationFit, SpectralPeak, Spectrum};
use lib_types::units::Seconds;
use serde::Serialize;

/// One row of a compiled program listing.
#[derive(Clone, Debug, Serialize)]
pub struct InstructionRow {
    pub index: usize,
    pub start_cycle: u64,
    pub duration: u64,
    pub pins: String,
    pub trigger: bool,
}

/// Result of compiling a descriptor.
#[derive(Clone, Debug, Serialize)]
pub struct CompileReport {
    pub sequence: PulseSequence,
    pub instructions: Vec<InstructionRow>,
    pub total_cycles: u64,
    pub total_samples: usize,
    pub duration_ms: f64,
}

/// Result of a measurement.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub sequence: PulseSequence,
    pub samples: usize,
    pub segments: usize,
    pub sample_rate_hz: f64,
    pub peak: Option<SpectralPeak>,
    pub relaxation: Option<RelaxationFit>,
    /// Why the relaxation fit failed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relaxation_error: Option<String>,
    #[serde(skip)]
    pub spectrum: Spectrum,
}

/// Measurement orchestrator.
pub struct Orchestrator {
    config: AppConfig,
}

impl Orchestrator {
    pub fn new(config: AppConfig) -> Result<Self> {
        crate::config::validate_config(&config)?;
        Ok(Self { config })
    }

    /// Parse a one-line sequence descriptor.
    pub fn parse(&self, descriptor: &str) -> Result<PulseSequence> {
        parse_descriptor(descriptor, &self.config.instrument.timebase())
            .with_context(|| format!("Invalid sequence descriptor: {:?}", descriptor))
    }

    /// Compile a descriptor without touching the hardware.
    pub fn compile(&self, descriptor: &str) -> Result<CompileReport> {
        let sequence = self.parse(descriptor)?;
        let program = self.compile_program(&sequence)?;

        let instructions = program
            .instructions()
            .iter()
            .zip(program.start_cycles())
            .enumerate()
            .map(|(index, (ins, start_cycle))| InstructionRow {
                index,
                start_cycle,
                duration: ins.duration,
                pins: ins.pins.to_string(),
                trigger: ins.trigger,
            })
            .collect();

        let timebase = self.config.instrument.timebase();
        Ok(CompileReport {
            sequence,
            instructions,
            total_cycles: program.total_cycles(),
            total_samples: program.total_samples(),
            duration_ms: timebase.to_seconds(program.total_cycles()).as_ms(),
        })
    }

    /// Run a descriptor on the simulated instrument.
    pub fn run(&self, descriptor: &str) -> Result<RunReport> {
        let sequence = self.parse(descriptor)?;
        let program = self.compile_program(&sequence)?;
        let source = self.build_source(&program);

        let spectrometer = Spectrometer::new(self.config.instrument.clone(), source)
            .context("Failed to initialize spectrometer")?
            .with_spectral_config(SpectralConfig {
                refine_peak: self.config.analysis.refine_peak,
            });

        tracing::info!(kind = %sequence.kind(), "Starting measurement");
        let outcome = spectrometer.run(&sequence).context("Measurement failed")?;

        let (relaxation, relaxation_error) = match outcome.relaxation {
            Some(Ok(fit)) => (Some(fit), None),
            Some(Err(e)) => (None, Some(e.to_string())),
            None => (None, None),
        };

        Ok(RunReport {
            sequence,
            samples: outcome.buffer.len(),
            segments: outcome.buffer.segments().len(),
            sample_rate_hz: outcome.buffer.sample_rate().0,
            peak: outcome.peak,
            relaxation,
            relaxation_error,
            spectrum: outcome.spectrum,
        })
    }

    fn compile_program(&self, sequence: &PulseSequence) -> Result<CompiledProgram> {
        compile(sequence, &self.config.instrument.compiler_config()).context("Failed to compile sequence")
    }

    /// Synthetic receiver matching the sequence being run.
    fn build_source(&self, program: &CompiledProgram) -> Box<dyn SampleSource> {
        let rx = &self.config.receiver;
        let model = match (rx.model, program.kind()) {
            (ReceiverModel::Auto, SequenceKind::Fid) => ReceiverModel::Fid,
            (ReceiverModel::Auto, SequenceKind::Cpmg) => ReceiverModel::Echo,
            (model, _) => model,
        };
        tracing::debug!(?model, noise = rx.noise, seed = rx.seed, "Simulated receiver");

        match model {
            ReceiverModel::Fid | ReceiverModel::Auto => Box::new(
                DecayingSine::new(rx.fid_amplitude, self.config.instrument.larmor(), Seconds::from_ms(rx.t2_star_ms))
                    .with_noise(rx.noise, rx.seed),
            ),
            ReceiverModel::Echo => {
                // Echoes form at the centre of each acquisition gate.
                let timebase = self.config.instrument.timebase();
                let centers = program.gate_centers().into_iter().map(|c| timebase.to_seconds(c)).collect();
                Box::new(
                    EchoTrain::new(
                        rx.echo_amplitude,
                        Seconds::from_ms(rx.t2_ms),
                        Seconds::from_us(rx.echo_width_us),
                        centers,
                    )
                    .with_noise(rx.noise, rx.seed),
                )
            }
            ReceiverModel::Quiet => Box::new(QuietReceiver::with_noise(rx.noise, rx.seed)),
        }
    }
}
