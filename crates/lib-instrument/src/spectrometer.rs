//! Spectrometer run API.
//!
//! [`Spectrometer::run`] is the single entry point for a measurement:
//! compile the sequence, run it on the hardware timeline, then process the
//! capture. Only one run may hold the hardware at a time.

use crate::adc::SampleSource;
use crate::config::InstrumentConfig;
use crate::error::{InstrumentError, InstrumentResult};
use crate::pins::{PinBank, RecoverMutex};
use crate::session::HardwareSession;
use lib_dsp::{analyze_echo_train, DspResult, SpectralConfig, SpectralPipeline};
use lib_pulse::compile;
use lib_types::buffer::SampleBuffer;
use lib_types::sequence::{CompiledProgram, PulseSequence, SequenceKind};
use lib_types::spectrum::{RelaxationFit, SpectralPeak, Spectrum};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Result of one completed run.
#[derive(Debug)]
pub struct RunOutcome {
    pub kind: SequenceKind,
    pub buffer: SampleBuffer,
    pub spectrum: Spectrum,
    pub peak: Option<SpectralPeak>,
    /// T2 fit, for CPMG runs only. A failed fit does not fail the run.
    pub relaxation: Option<DspResult<RelaxationFit>>,
}

impl RunOutcome {
    /// Buffer, spectrum and the relaxation fit if one succeeded.
    pub fn into_parts(self) -> (SampleBuffer, Spectrum, Option<RelaxationFit>) {
        let fit = self.relaxation.and_then(|r| r.ok());
        (self.buffer, self.spectrum, fit)
    }
}

/// Holds the run slot for the duration of a run.
struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> InstrumentResult<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| InstrumentError::RunAlreadyInProgress)?;
        Ok(Self { running })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// A low-field NMR spectrometer.
pub struct Spectrometer {
    config: InstrumentConfig,
    spectral: SpectralConfig,
    source: Arc<Mutex<Box<dyn SampleSource>>>,
    pins: Arc<PinBank>,
    running: AtomicBool,
    abort: Mutex<Arc<AtomicBool>>,
}

impl Spectrometer {
    /// Create a spectrometer reading the receiver through `source`.
    pub fn new(config: InstrumentConfig, source: Box<dyn SampleSource>) -> InstrumentResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            spectral: SpectralConfig::default(),
            source: Arc::new(Mutex::new(source)),
            pins: Arc::new(PinBank::new()),
            running: AtomicBool::new(false),
            abort: Mutex::new(Arc::new(AtomicBool::new(false))),
        })
    }

    pub fn with_spectral_config(mut self, spectral: SpectralConfig) -> Self {
        self.spectral = spectral;
        self
    }

    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    /// Output lines, with the transition log of the latest run.
    pub fn pins(&self) -> &PinBank {
        &self.pins
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Compile a sequence without running it.
    pub fn compile(&self, sequence: &PulseSequence) -> InstrumentResult<CompiledProgram> {
        Ok(compile(sequence, &self.config.compiler_config())?)
    }

    /// Stop the current run at its next instruction or window boundary.
    pub fn request_abort(&self) {
        self.abort.lock_recover().store(true, Ordering::Release);
    }

    /// Execute one measurement.
    pub fn run(&self, sequence: &PulseSequence) -> InstrumentResult<RunOutcome> {
        // Claim the run slot and install its abort flag in one step, so any
        // abort requested once the run is visible lands on this run's flag.
        let (_guard, abort) = {
            let mut slot = self.abort.lock_recover();
            let guard = RunGuard::acquire(&self.running)?;
            let abort = Arc::new(AtomicBool::new(false));
            *slot = abort.clone();
            (guard, abort)
        };

        let program = Arc::new(self.compile(sequence)?);
        self.pins.reset();

        tracing::info!(
            kind = %program.kind(),
            instructions = program.instructions().len(),
            cycles = program.total_cycles(),
            samples = program.total_samples(),
            "starting run"
        );

        let buffer = {
            let mut session = HardwareSession::start(
                &self.config,
                program.clone(),
                self.pins.clone(),
                self.source.clone(),
                abort,
            )?;
            let capture = session.wait_for_capture(self.config.run_timeout());
            session.close();
            capture?
        };

        let mut pipeline = SpectralPipeline::new(self.spectral);
        let spectrum = pipeline.spectrum(&buffer)?;
        let peak = pipeline.peak(&spectrum);

        let relaxation = match program.kind() {
            SequenceKind::Fid => None,
            SequenceKind::Cpmg => {
                let spacing = self.config.timebase().to_seconds(program.echo_spacing());
                let fit = analyze_echo_train(&buffer, spacing);
                if let Err(e) = &fit {
                    tracing::warn!(error = %e, "relaxation fit failed");
                }
                Some(fit)
            }
        };

        match (&peak, &relaxation) {
            (_, Some(Ok(fit))) => tracing::info!(
                t2_ms = fit.t2.as_ms(),
                residual = fit.residual,
                converged = fit.converged,
                "run complete"
            ),
            (Some(p), _) => tracing::info!(
                frequency_hz = p.frequency.0,
                magnitude = p.magnitude,
                "run complete"
            ),
            _ => tracing::info!("run complete"),
        }

        Ok(RunOutcome {
            kind: program.kind(),
            buffer,
            spectrum,
            peak,
            relaxation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::{DecayingSine, EchoTrain, QuietReceiver};
    use crate::sync::SyncController;
    use crossbeam::channel::{bounded, Receiver, Sender};
    use lib_types::sequence::{PinMask, PinRole};
    use lib_types::units::{Hertz, Seconds};

    fn config() -> InstrumentConfig {
        InstrumentConfig {
            polarization_s: 0.05,
            ..Default::default()
        }
    }

    fn fid() -> PulseSequence {
        PulseSequence::Fid {
            pulse_width: 1_250,
            echo_spacing: 5_000,
            repetition_delay: 0,
            samples: 2_048,
        }
    }

    #[test]
    fn test_fid_peak_at_larmor() {
        let source = DecayingSine::new(2000.0, Hertz(2210.0), Seconds::from_ms(10.0)).with_noise(10.0, 42);
        let spectrometer = Spectrometer::new(config(), Box::new(source)).unwrap();

        let outcome = spectrometer.run(&fid()).unwrap();
        assert_eq!(outcome.kind, SequenceKind::Fid);
        assert_eq!(outcome.buffer.len(), 2_048);
        assert!(outcome.relaxation.is_none());

        // 500 ksps, 4 x 2048 point transform: ~61 Hz per bin.
        let bin_width = outcome.spectrum.bin_width.0;
        let peak = outcome.peak.unwrap();
        assert!((peak.frequency.0 - 2210.0).abs() <= bin_width, "peak at {}", peak.frequency.0);
        assert!(!spectrometer.is_running());
        assert_eq!(spectrometer.pins().level(), PinMask::EMPTY);
    }

    #[test]
    fn test_cpmg_recovers_t2() {
        let config = config();
        let sequence = PulseSequence::Cpmg {
            pulse_width: 14_125,
            echo_spacing: 250_000,
            echo_count: 32,
            repetition_delay: 0,
            samples: 200,
        };

        // Echo centres relative to the program origin.
        let program = compile(&sequence, &config.compiler_config()).unwrap();
        let timebase = config.timebase();
        let centers: Vec<Seconds> = program.gate_centers().into_iter().map(|c| timebase.to_seconds(c)).collect();
        let source = EchoTrain::new(1500.0, Seconds::from_ms(150.0), Seconds::from_us(100.0), centers).with_noise(1.0, 3);

        let spectrometer = Spectrometer::new(config, Box::new(source)).unwrap();
        let outcome = spectrometer.run(&sequence).unwrap();
        assert_eq!(outcome.buffer.segments().len(), 32);

        let (_, _, fit) = outcome.into_parts();
        let fit = fit.unwrap();
        assert!((fit.t2.as_ms() - 150.0).abs() < 2.0, "T2 = {} ms", fit.t2.as_ms());
        assert_eq!(fit.echoes.len(), 32);
        assert!(fit.converged);
    }

    #[test]
    fn test_invalid_sequence_touches_no_pins() {
        let spectrometer = Spectrometer::new(config(), Box::new(QuietReceiver::new())).unwrap();
        let bad = PulseSequence::Fid {
            pulse_width: -10,
            echo_spacing: 5_000,
            repetition_delay: 0,
            samples: 64,
        };
        let err = spectrometer.run(&bad).unwrap_err();
        assert!(matches!(err, InstrumentError::InvalidSequence(_)));
        assert!(spectrometer.pins().transitions().is_empty());
        assert!(!spectrometer.is_running());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = InstrumentConfig {
            sample_rate_hz: 0,
            ..Default::default()
        };
        assert!(matches!(
            Spectrometer::new(config, Box::new(QuietReceiver::new())),
            Err(InstrumentError::Config(_))
        ));
    }

    #[test]
    fn test_isolation_ordering_on_pins() {
        let config = config();
        let spectrometer = Spectrometer::new(config.clone(), Box::new(QuietReceiver::with_noise(3.0, 9))).unwrap();
        spectrometer.run(&fid()).unwrap();

        let pins = spectrometer.pins();
        let timeline = SyncController::new(&config).timeline();
        assert_eq!(pins.falling_edges(PinRole::Polarization), vec![timeline.polarization_off]);
        assert_eq!(pins.rising_edges(PinRole::RxIsolation)[0], timeline.isolation_on);
        assert_eq!(pins.rising_edges(PinRole::RfPulse), vec![timeline.origin]);
        // Isolation held through the dead-time after the pulse.
        let rf_off = pins.falling_edges(PinRole::RfPulse)[0];
        let iso_off = pins.falling_edges(PinRole::RxIsolation)[0];
        assert!(iso_off >= rf_off + config.dead_time_cycles());
    }

    /// Blocks on the first conversion until released.
    struct GatedSource {
        entered: Option<Sender<()>>,
        gate: Receiver<()>,
    }

    impl SampleSource for GatedSource {
        fn sample(&mut self, _t: Seconds) -> i16 {
            if let Some(entered) = self.entered.take() {
                let _ = entered.send(());
                let _ = self.gate.recv();
            }
            2048
        }
    }

    fn gated() -> (GatedSource, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = bounded(1);
        let (gate_tx, gate_rx) = bounded(1);
        let source = GatedSource {
            entered: Some(entered_tx),
            gate: gate_rx,
        };
        (source, entered_rx, gate_tx)
    }

    #[test]
    fn test_concurrent_run_rejected() {
        let (source, entered, gate) = gated();
        let spectrometer = Arc::new(Spectrometer::new(config(), Box::new(source)).unwrap());

        let first = {
            let spectrometer = spectrometer.clone();
            std::thread::spawn(move || spectrometer.run(&fid()))
        };
        entered.recv().unwrap();
        assert!(spectrometer.is_running());

        let err = spectrometer.run(&fid()).unwrap_err();
        assert!(matches!(err, InstrumentError::RunAlreadyInProgress));

        gate.send(()).unwrap();
        let outcome = first.join().unwrap().unwrap();
        assert_eq!(outcome.buffer.len(), 2_048);
        assert!(!spectrometer.is_running());
    }

    #[test]
    fn test_timeout_leaves_hardware_safe() {
        let (source, entered, gate) = gated();
        let config = InstrumentConfig {
            run_timeout_s: 0.2,
            ..config()
        };
        let spectrometer = Spectrometer::new(config, Box::new(source)).unwrap();

        let err = spectrometer.run(&fid()).unwrap_err();
        assert!(matches!(err, InstrumentError::Timeout(_)));
        assert!(entered.try_recv().is_ok());
        assert_eq!(spectrometer.pins().level(), PinMask::EMPTY);
        assert!(!spectrometer.is_running());

        // Let the orphaned acquisition thread finish.
        drop(gate);
    }

    fn run_aborted_mid_capture(sequence: PulseSequence) {
        let (source, entered, gate) = gated();
        let spectrometer = Arc::new(Spectrometer::new(config(), Box::new(source)).unwrap());

        let run = {
            let spectrometer = spectrometer.clone();
            std::thread::spawn(move || spectrometer.run(&sequence))
        };
        entered.recv().unwrap();
        spectrometer.request_abort();
        gate.send(()).unwrap();

        let err = run.join().unwrap().unwrap_err();
        assert!(matches!(err, InstrumentError::RunAborted), "got {:?}", err);
        assert_eq!(spectrometer.pins().level(), PinMask::EMPTY);
        assert!(!spectrometer.is_running());
    }

    #[test]
    fn test_abort_during_fid_window() {
        run_aborted_mid_capture(fid());
    }

    #[test]
    fn test_abort_during_cpmg() {
        run_aborted_mid_capture(PulseSequence::Cpmg {
            pulse_width: 1_250,
            echo_spacing: 250_000,
            echo_count: 8,
            repetition_delay: 0,
            samples: 50,
        });
    }

    #[test]
    fn test_abort_between_runs_not_carried_over() {
        let spectrometer = Spectrometer::new(config(), Box::new(QuietReceiver::new())).unwrap();
        spectrometer.request_abort();
        let outcome = spectrometer.run(&fid()).unwrap();
        assert_eq!(outcome.buffer.len(), 2_048);
    }

    #[test]
    fn test_rejects_unrepresentable_timeout() {
        let config = InstrumentConfig {
            run_timeout_s: 1e30,
            ..config()
        };
        assert!(matches!(
            Spectrometer::new(config, Box::new(QuietReceiver::new())),
            Err(InstrumentError::Config(_))
        ));
    }

    #[test]
    fn test_overrun_reported() {
        let config = InstrumentConfig {
            transfer_cycles: 400,
            ..config()
        };
        let spectrometer = Spectrometer::new(config, Box::new(QuietReceiver::new())).unwrap();
        let err = spectrometer.run(&fid()).unwrap_err();
        assert!(matches!(err, InstrumentError::BufferOverrun { .. }));
        assert!(err.is_retryable());
        assert_eq!(spectrometer.pins().level(), PinMask::EMPTY);
    }

    #[test]
    fn test_repeated_runs_identical_timeline() {
        let spectrometer = Spectrometer::new(config(), Box::new(QuietReceiver::new())).unwrap();
        let sequence = PulseSequence::Cpmg {
            pulse_width: 1_250,
            echo_spacing: 250_000,
            echo_count: 4,
            repetition_delay: 0,
            samples: 50,
        };
        spectrometer.run(&sequence).unwrap();
        let first = spectrometer.pins().transitions();
        for _ in 0..3 {
            spectrometer.run(&sequence).unwrap();
            assert_eq!(spectrometer.pins().transitions(), first);
        }
    }
}
