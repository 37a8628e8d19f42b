//! Acquisition engine.
//!
//! The ADC converts every `P` cycles into a small hardware FIFO; a DMA
//! channel moves one sample at a time from the FIFO into the capture
//! buffer, occupying the channel for `transfer_cycles` per sample. The
//! engine models that path exactly in clock-cycle time, so an overrun is
//! reported at the cycle it would happen on hardware.
//!
//! Windows are armed by commands from the synchronization controller. A
//! window captures until it is full or until the next command's cycle
//! (the next trigger, or the end of the program), whichever comes first.

use crate::adc::SampleSource;
use crate::config::InstrumentConfig;
use crate::error::{InstrumentError, InstrumentResult};
use crate::pins::RecoverMutex;
use crate::sync::AcquisitionCommand;
use crossbeam::channel::Receiver;
use lib_types::buffer::{AcquisitionWindow, SampleBuffer, SampleBufferWriter};
use lib_types::units::Timebase;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// ADC FIFO plus the DMA channel draining it.
#[derive(Debug)]
struct DmaPath {
    fifo: VecDeque<(u64, i16)>,
    depth: usize,
    transfer_cycles: u64,
    busy_until: u64,
}

impl DmaPath {
    fn new(depth: usize, transfer_cycles: u64) -> Self {
        Self {
            fifo: VecDeque::with_capacity(depth),
            depth,
            transfer_cycles,
            busy_until: 0,
        }
    }

    /// Complete every transfer that can start by `cycle`.
    fn drain_until(&mut self, cycle: u64, writer: &mut SampleBufferWriter) -> InstrumentResult<()> {
        while let Some(&(arrival, sample)) = self.fifo.front() {
            let start = arrival.max(self.busy_until);
            if start > cycle {
                break;
            }
            self.fifo.pop_front();
            self.busy_until = start + self.transfer_cycles;
            if !writer.push(sample) {
                return Err(InstrumentError::BufferOverrun {
                    cycle: start,
                    depth: self.depth,
                    written: writer.written(),
                });
            }
        }
        Ok(())
    }

    /// A conversion completed at `cycle`.
    fn accept(&mut self, cycle: u64, sample: i16, writer: &mut SampleBufferWriter) -> InstrumentResult<()> {
        self.drain_until(cycle, writer)?;
        if self.fifo.len() >= self.depth {
            return Err(InstrumentError::BufferOverrun {
                cycle,
                depth: self.depth,
                written: writer.written(),
            });
        }
        self.fifo.push_back((cycle, sample));
        self.drain_until(cycle, writer)
    }

    fn flush(&mut self, writer: &mut SampleBufferWriter) -> InstrumentResult<()> {
        self.drain_until(u64::MAX, writer)
    }
}

/// A window waiting for its end cycle to be known.
#[derive(Clone, Copy, Debug)]
struct ArmedWindow {
    window: AcquisitionWindow,
    trigger_cycle: u64,
    origin: u64,
}

/// Fills the capture buffer from the ADC.
#[derive(Clone, Copy, Debug)]
pub struct AcquisitionEngine {
    timebase: Timebase,
    sample_period_cycles: u64,
    fifo_depth: usize,
    transfer_cycles: u64,
    capacity: usize,
    expected_samples: usize,
}

impl AcquisitionEngine {
    /// Engine for a program that captures `expected_samples` in total.
    pub fn new(config: &InstrumentConfig, expected_samples: usize) -> Self {
        Self {
            timebase: config.timebase(),
            sample_period_cycles: config.sample_period_cycles().max(1),
            fifo_depth: config.fifo_depth,
            transfer_cycles: config.transfer_cycles,
            capacity: config.buffer_capacity,
            expected_samples,
        }
    }

    pub fn expected_samples(&self) -> usize {
        self.expected_samples
    }

    /// Capture until the controller closes the run.
    ///
    /// Returns the sealed buffer only if every window was filled.
    pub fn run(
        &self,
        source: &Mutex<Box<dyn SampleSource>>,
        commands: &Receiver<AcquisitionCommand>,
        abort: &AtomicBool,
    ) -> InstrumentResult<SampleBuffer> {
        let sample_period = self.timebase.to_seconds(self.sample_period_cycles);
        let mut writer = SampleBufferWriter::with_capacity(self.capacity, sample_period);
        let mut dma = DmaPath::new(self.fifo_depth, self.transfer_cycles);
        let mut pending: Option<ArmedWindow> = None;

        for command in commands.iter() {
            match command {
                AcquisitionCommand::Arm {
                    window,
                    trigger_cycle,
                    origin,
                } => {
                    if let Some(armed) = pending.take() {
                        self.capture(armed, trigger_cycle, source, &mut dma, &mut writer)?;
                    }
                    if abort.load(Ordering::Acquire) {
                        tracing::info!(written = writer.written(), "acquisition aborted");
                        return Err(InstrumentError::RunAborted);
                    }
                    pending = Some(ArmedWindow {
                        window,
                        trigger_cycle,
                        origin,
                    });
                }
                AcquisitionCommand::Close { cycle, aborted } => {
                    if aborted {
                        tracing::info!(cycle, written = writer.written(), "acquisition aborted");
                        return Err(InstrumentError::RunAborted);
                    }
                    if let Some(armed) = pending.take() {
                        self.capture(armed, cycle, source, &mut dma, &mut writer)?;
                    }
                    // An abort raised while the last window was filling.
                    if abort.load(Ordering::Acquire) {
                        tracing::info!(cycle, written = writer.written(), "acquisition aborted");
                        return Err(InstrumentError::RunAborted);
                    }
                    dma.flush(&mut writer)?;
                    return self.finish(writer);
                }
            }
        }

        Err(InstrumentError::HardwareFault(
            "synchronization controller stopped without closing the run".to_string(),
        ))
    }

    /// Capture one window, stopping early at `horizon`.
    fn capture(
        &self,
        armed: ArmedWindow,
        horizon: u64,
        source: &Mutex<Box<dyn SampleSource>>,
        dma: &mut DmaPath,
        writer: &mut SampleBufferWriter,
    ) -> InstrumentResult<()> {
        let period = self.sample_period_cycles;
        let gate_open = armed.trigger_cycle + armed.window.offset_cycles;
        let mut k = gate_open.div_ceil(period);

        // Samples of the previous window must land in its own segment.
        dma.flush(writer)?;
        writer.begin_segment(k * period);

        let mut source = source.lock_recover();
        let mut captured = 0;
        while captured < armed.window.duration {
            let cycle = k * period;
            if cycle >= horizon {
                break;
            }
            let t = self.timebase.to_seconds(cycle.saturating_sub(armed.origin));
            let sample = source.sample(t);
            dma.accept(cycle, sample, writer)?;
            captured += 1;
            k += 1;
        }

        if captured < armed.window.duration {
            tracing::warn!(
                trigger = armed.trigger_cycle,
                horizon,
                captured,
                expected = armed.window.duration,
                "acquisition window truncated"
            );
        } else {
            tracing::trace!(trigger = armed.trigger_cycle, captured, "window captured");
        }
        Ok(())
    }

    fn finish(&self, writer: SampleBufferWriter) -> InstrumentResult<SampleBuffer> {
        let got = writer.written();
        if got < self.expected_samples {
            return Err(InstrumentError::IncompleteCapture {
                expected: self.expected_samples,
                got,
            });
        }
        let buffer = writer.seal();
        tracing::debug!(
            samples = buffer.len(),
            segments = buffer.segments().len(),
            "capture sealed"
        );
        Ok(buffer)
    }
}
