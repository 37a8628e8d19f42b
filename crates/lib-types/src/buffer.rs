//! Acquisition windows and captured sample buffers.
//!
//! # Sample timing
//!
//! The ADC free-runs on the system clock: sample `k` is converted at cycle
//! `k * P`, where `P` is the sample period in cycles. A window armed at
//! cycle `c` captures `duration` consecutive samples starting with the
//! first conversion at or after `c + offset_cycles`. Within a segment the
//! spacing between samples is therefore exactly `P` cycles.

use crate::units::{Hertz, Seconds};
use serde::{Deserialize, Serialize};

/// A capture gate bound to a trigger instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionWindow {
    /// Delay from the trigger to the first sample, in cycles.
    pub offset_cycles: u64,
    /// Number of samples to capture.
    pub duration: usize,
    pub sample_period_cycles: u64,
}

impl AcquisitionWindow {
    /// Offset expressed in whole samples, rounded up.
    pub fn offset_samples(&self) -> usize {
        if self.sample_period_cycles == 0 {
            return 0;
        }
        self.offset_cycles.div_ceil(self.sample_period_cycles) as usize
    }

    /// Whether the window fits in a buffer of `capacity` samples.
    pub fn fits(&self, capacity: usize) -> bool {
        self.offset_samples()
            .checked_add(self.duration)
            .is_some_and(|n| n <= capacity)
    }

    /// Cycles spanned by the gate.
    pub fn gate_cycles(&self) -> u64 {
        self.duration as u64 * self.sample_period_cycles
    }
}

/// One contiguous capture inside a [`SampleBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Index of the first sample in the buffer.
    pub start: usize,
    pub len: usize,
    /// Absolute clock cycle at which the first sample was converted.
    pub first_sample_cycle: u64,
}

impl Segment {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.len
    }
}

/// Captured ADC samples from one run.
///
/// Only the acquisition engine writes samples, through a
/// [`SampleBufferWriter`]; once sealed the buffer is immutable. Not
/// deserializable, so every segment lies inside `samples`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SampleBuffer {
    samples: Vec<i16>,
    segments: Vec<Segment>,
    sample_period: Seconds,
}

impl SampleBuffer {
    /// Single-segment buffer from raw samples.
    pub fn from_samples(samples: Vec<i16>, sample_period: Seconds) -> Self {
        let segments = vec![Segment { start: 0, len: samples.len(), first_sample_cycle: 0 }];
        Self { samples, segments, sample_period }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Samples belonging to segment `index`.
    pub fn segment(&self, index: usize) -> Option<&[i16]> {
        self.segments.get(index).and_then(|s| self.samples.get(s.range()))
    }

    pub fn sample_period(&self) -> Seconds {
        self.sample_period
    }

    pub fn sample_rate(&self) -> Hertz {
        self.sample_period.to_frequency()
    }

    /// Samples widened to `f64` for processing.
    pub fn as_f64(&self) -> Vec<f64> {
        self.samples.iter().map(|&s| s as f64).collect()
    }
}

/// Exclusive write handle used while a capture is in progress.
#[derive(Debug)]
pub struct SampleBufferWriter {
    samples: Vec<i16>,
    segments: Vec<Segment>,
    sample_period: Seconds,
    capacity: usize,
}

impl SampleBufferWriter {
    pub fn with_capacity(capacity: usize, sample_period: Seconds) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            segments: Vec::new(),
            sample_period,
            capacity,
        }
    }

    /// Open a new segment whose first sample is converted at `first_sample_cycle`.
    pub fn begin_segment(&mut self, first_sample_cycle: u64) {
        self.segments.push(Segment {
            start: self.samples.len(),
            len: 0,
            first_sample_cycle,
        });
    }

    /// Append a sample to the current segment. Returns `false` when the
    /// buffer is full or no segment is open.
    pub fn push(&mut self, sample: i16) -> bool {
        if self.samples.len() >= self.capacity {
            return false;
        }
        match self.segments.last_mut() {
            Some(seg) => {
                seg.len += 1;
                self.samples.push(sample);
                true
            }
            None => false,
        }
    }

    pub fn written(&self) -> usize {
        self.samples.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Freeze the capture.
    pub fn seal(self) -> SampleBuffer {
        SampleBuffer {
            samples: self.samples,
            segments: self.segments,
            sample_period: self.sample_period,
        }
    }
}
