//! Hardware session lifecycle.
//!
//! A session owns the three threads of one run:
//!
//! - **sync**: polarization, receiver isolation, trigger relay
//! - **sequencer**: plays the program once the sync thread hands it the origin
//! - **acquisition**: fills the capture buffer
//!
//! The supervisor only waits for the capture and then closes the session.
//! Closing always leaves every output line low, whether the run completed,
//! failed, timed out or was aborted.

use crate::acquisition::AcquisitionEngine;
use crate::adc::SampleSource;
use crate::config::InstrumentConfig;
use crate::error::{InstrumentError, InstrumentResult};
use crate::pins::PinBank;
use crate::sequencer::{PulseSequencer, SequencerState};
use crate::sync::{AcquisitionCommand, SyncController};
use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError};
use lib_types::buffer::SampleBuffer;
use lib_types::sequence::CompiledProgram;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Acquisition threads left running after their session closed.
static ORPHANED_THREAD_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Refuse new sessions beyond this many orphaned threads.
const MAX_ORPHANED_THREADS: usize = 4;

/// How long `close` waits for a stopped acquisition thread to report.
const CLOSE_GRACE: Duration = Duration::from_millis(200);

const WORKER_RUNNING: u8 = 0;
const WORKER_FINISHED: u8 = 1;
const WORKER_ORPHANED: u8 = 2;

/// Session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Running,
    /// The capture was delivered.
    Completed,
    /// The capture failed, timed out or never arrived.
    Faulted,
    Closed,
}

/// One run on the hardware timeline.
pub struct HardwareSession {
    state: SessionState,
    abort: Arc<AtomicBool>,
    pins: Arc<PinBank>,
    capture: Receiver<InstrumentResult<SampleBuffer>>,
    captured: bool,
    acquisition_state: Arc<AtomicU8>,
    sync: Option<JoinHandle<()>>,
    sequencer: Option<JoinHandle<SequencerState>>,
    acquisition: Option<JoinHandle<()>>,
}

impl HardwareSession {
    /// Verify the program against the isolation rules and start the run.
    pub fn start(
        config: &InstrumentConfig,
        program: Arc<CompiledProgram>,
        pins: Arc<PinBank>,
        source: Arc<Mutex<Box<dyn SampleSource>>>,
        abort: Arc<AtomicBool>,
    ) -> InstrumentResult<Self> {
        let orphaned = ORPHANED_THREAD_COUNT.load(Ordering::SeqCst);
        if orphaned >= MAX_ORPHANED_THREADS {
            return Err(InstrumentError::HardwareFault(format!(
                "{} acquisition threads still running from earlier runs",
                orphaned
            )));
        }

        let sync = SyncController::new(config);
        sync.verify(&program)?;
        let engine = AcquisitionEngine::new(config, program.total_samples());

        let (event_tx, event_rx) = unbounded();
        let (command_tx, command_rx) = unbounded();
        let (start_tx, start_rx) = bounded::<u64>(1);
        let (capture_tx, capture_rx) = bounded(1);

        let mut session = Self {
            state: SessionState::Running,
            abort: abort.clone(),
            pins: pins.clone(),
            capture: capture_rx,
            captured: false,
            acquisition_state: Arc::new(AtomicU8::new(WORKER_RUNNING)),
            sync: None,
            sequencer: None,
            acquisition: None,
        };

        session.acquisition = Some(spawn("nmr-acquisition", {
            let abort = abort.clone();
            let worker = session.acquisition_state.clone();
            move || {
                let result = engine.run(&source, &command_rx, &abort);
                if let Err(e) = &result {
                    tracing::debug!(error = %e, "acquisition ended with error");
                }
                let _ = capture_tx.send(result);
                if worker.swap(WORKER_FINISHED, Ordering::SeqCst) == WORKER_ORPHANED {
                    ORPHANED_THREAD_COUNT.fetch_sub(1, Ordering::SeqCst);
                    tracing::info!("orphaned acquisition thread finished");
                }
            }
        })?);

        session.sync = Some(spawn("nmr-sync", {
            let (program, pins, abort) = (program.clone(), pins.clone(), abort.clone());
            move || match sync.prepare(&pins, &abort) {
                Some(origin) => {
                    let _ = start_tx.send(origin);
                    drop(start_tx);
                    sync.relay(&program, origin, &event_rx, &command_tx);
                }
                None => {
                    drop(start_tx);
                    let _ = command_tx.send(AcquisitionCommand::Close {
                        cycle: 0,
                        aborted: true,
                    });
                }
            }
        })?);

        session.sequencer = Some(spawn("nmr-sequencer", move || match start_rx.recv() {
            Ok(origin) => PulseSequencer::new(program, pins, abort).execute(origin, &event_tx),
            Err(_) => SequencerState::Aborted,
        })?);

        tracing::debug!("hardware session started");
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Ask every thread to stop at its next boundary.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    /// Block until the acquisition engine delivers the capture.
    pub fn wait_for_capture(&mut self, timeout: Duration) -> InstrumentResult<SampleBuffer> {
        if self.state != SessionState::Running {
            return Err(InstrumentError::HardwareFault(format!(
                "session is {:?}, not running",
                self.state
            )));
        }

        match self.capture.recv_timeout(timeout) {
            Ok(result) => {
                self.captured = true;
                self.state = if result.is_ok() {
                    SessionState::Completed
                } else {
                    SessionState::Faulted
                };
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                self.state = SessionState::Faulted;
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "capture timed out");
                Err(InstrumentError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.state = SessionState::Faulted;
                Err(InstrumentError::HardwareFault(
                    "acquisition thread exited without a capture".to_string(),
                ))
            }
        }
    }

    /// Stop all threads and drive every output low.
    ///
    /// Called automatically on drop.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.abort();

        if let Some(handle) = self.sequencer.take() {
            if handle.join().is_err() {
                tracing::error!("pulse sequencer thread panicked");
            }
        }
        if let Some(handle) = self.sync.take() {
            if handle.join().is_err() {
                tracing::error!("synchronization thread panicked");
            }
        }

        if let Some(handle) = self.acquisition.take() {
            // The acquisition engine can only be stuck inside the ADC source.
            let stopped = self.captured
                || handle.is_finished()
                || !matches!(self.capture.recv_timeout(CLOSE_GRACE), Err(RecvTimeoutError::Timeout));
            if stopped {
                if handle.join().is_err() {
                    tracing::error!("acquisition thread panicked");
                }
            } else {
                self.orphan_acquisition(handle);
            }
        }

        self.pins.release();
        self.state = SessionState::Closed;
        tracing::debug!("hardware session closed");
    }

    fn orphan_acquisition(&self, handle: JoinHandle<()>) {
        ORPHANED_THREAD_COUNT.fetch_add(1, Ordering::SeqCst);
        let orphaned = self.acquisition_state.compare_exchange(
            WORKER_RUNNING,
            WORKER_ORPHANED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        match orphaned {
            Ok(_) => {
                tracing::warn!(
                    orphaned_threads = ORPHANED_THREAD_COUNT.load(Ordering::SeqCst),
                    "acquisition thread did not stop, orphaned"
                );
            }
            Err(_) => {
                // Finished after all.
                ORPHANED_THREAD_COUNT.fetch_sub(1, Ordering::SeqCst);
                let _ = handle.join();
            }
        }
    }
}

impl Drop for HardwareSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Current count of orphaned acquisition threads.
pub fn orphaned_thread_count() -> usize {
    ORPHANED_THREAD_COUNT.load(Ordering::SeqCst)
}

fn spawn<F, T>(name: &str, f: F) -> InstrumentResult<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| InstrumentError::HardwareFault(format!("failed to spawn {}: {}", name, e)))
}
