//! # Audio Framing Module
//!
//! Accumulates incoming audio samples and slices them into fixed-length,
//! overlapping analysis frames. Capture itself happens outside this crate;
//! whatever owns the input device pushes sample batches in here.
//!
//! ## Features
//! - Arbitrary batch sizes on the input side
//! - Fixed frame length with a configurable hop (overlap = length - hop)
//! - Frames carry their index and position in the stream for timestamping

use std::collections::VecDeque;

/// Default number of samples per analysis frame.
///
/// At 44.1 kHz this is ~46 ms, enough for two periods of a 44 Hz tone.
pub const BUFFER_SIZE: usize = 2048;

/// One analysis window taken from the input stream.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
    index: u64,
    start_sample: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, index: u64, start_sample: u64) -> Self {
        Self {
            samples,
            sample_rate,
            index,
            start_sample,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Sequence number of this frame (0 for the first frame).
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Position of the first sample in the overall stream.
    pub fn start_sample(&self) -> u64 {
        self.start_sample
    }

    /// Stream time of the first sample in seconds.
    pub fn timestamp_secs(&self) -> f64 {
        self.start_sample as f64 / self.sample_rate as f64
    }

    /// Root-mean-square amplitude of the frame.
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Root-mean-square amplitude of a signal, 0 for an empty slice.
pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
}

/// Turns a stream of sample batches into overlapping analysis frames.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    frame_length: usize,
    hop_length: usize,
    sample_rate: u32,
    pending: VecDeque<f32>,
    next_index: u64,
    next_start: u64,
}

impl FrameBuffer {
    /// Creates an empty buffer.
    ///
    /// `hop_length` is clamped to `1..=frame_length`. [`crate::TunerConfig`]
    /// is stricter and requires `hop_length < frame_length`.
    pub fn new(frame_length: usize, hop_length: usize, sample_rate: u32) -> Self {
        let hop_length = hop_length.clamp(1, frame_length.max(1));
        Self {
            frame_length,
            hop_length,
            sample_rate,
            pending: VecDeque::with_capacity(frame_length * 2),
            next_index: 0,
            next_start: 0,
        }
    }

    /// Appends new samples to the buffer.
    pub fn push(&mut self, samples: &[f32]) {
        self.pending.extend(samples.iter().copied());
    }

    /// Returns the next frame if enough samples have accumulated.
    ///
    /// Each returned frame advances the read position by one hop; samples
    /// before the new read position are dropped.
    pub fn next_frame(&mut self) -> Option<AudioFrame> {
        if self.pending.len() < self.frame_length {
            return None;
        }

        let samples: Vec<f32> = self.pending.iter().take(self.frame_length).copied().collect();
        let frame = AudioFrame::new(samples, self.sample_rate, self.next_index, self.next_start);

        self.pending.drain(..self.hop_length);
        self.next_index += 1;
        self.next_start += self.hop_length as u64;

        Some(frame)
    }

    /// Number of samples waiting to be framed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    /// Drops all buffered samples. Frame numbering continues.
    pub fn clear(&mut self) {
        self.next_start += self.pending.len() as u64;
        self.pending.clear();
    }
}
