//! # Configuration Module
//!
//! Every tunable parameter of the estimation pipeline lives in [`TunerConfig`].
//! Each field has a default so the tuner works unconfigured. The struct is
//! serde-(de)serializable so whatever loads settings for the application can
//! hand one in; the core itself never touches the filesystem.
//!
//! ## Defaults
//! - 44.1 kHz, 2048-sample frames with a 512-sample hop (~11.6 ms)
//! - Lags up to 1024 samples, pitch search between 50 Hz and 1500 Hz
//! - Attack window of 8 frames (~93 ms) for the octave corrector
//! - Rolling window of the last 20 pitched frames

use serde::{Deserialize, Serialize};

use crate::audio::BUFFER_SIZE;
use crate::error::{TunerError, TunerResult};

/// How the rolling estimator collapses its window into a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmoothingMethod {
    /// Confidence-weighted mean of the window's cents values.
    WeightedMean,
    /// Confidence-weighted median of the window's cents values.
    WeightedMedian,
}

/// How the rolling estimator builds its density curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DensityMethod {
    /// Gaussian kernel density estimate.
    Kernel,
    /// Weighted histogram; values outside the span land in the edge bins.
    Histogram,
}

/// Configuration for the full estimation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Sample rate of the incoming audio in Hz.
    pub sample_rate: u32,
    /// Number of samples per analysis frame.
    pub frame_length: usize,
    /// Number of samples between the starts of consecutive frames.
    pub hop_length: usize,
    /// Longest lag (in samples) the difference engine evaluates.
    pub max_lag: usize,
    /// Lowest pitch the lag selector will report.
    pub min_frequency: f32,
    /// Highest pitch the lag selector will report.
    pub max_frequency: f32,
    /// Absolute threshold on the normalized difference function.
    pub absolute_threshold: f32,
    /// Frame RMS below which a frame is treated as silence.
    pub silence_threshold: f32,
    /// Subtract the frame mean before analysis.
    pub remove_dc: bool,
    /// Frame RMS that starts a new note.
    pub onset_energy_threshold: f32,
    /// Frame RMS below which a note is considered to be dying out.
    pub offset_energy_threshold: f32,
    /// Consecutive quiet frames needed to end a note.
    pub offset_frames: usize,
    /// Number of frames after onset that are trusted as the attack phase.
    pub attack_window_frames: usize,
    /// How close (in cents) an estimate must be to anchor/k to be corrected.
    pub octave_tolerance_cents: f32,
    /// Largest integer divisor checked for too-low errors.
    pub max_octave_divisor: u32,
    /// Consecutive unrelated estimates during decay that start a new note.
    pub retrigger_frames: usize,
    /// Highest d' at the anchor's lag for which a too-low estimate is still
    /// corrected. Above it the anchor is gone from the signal and the
    /// estimate starts a new note.
    pub anchor_support_threshold: f32,
    /// Number of pitched frames kept by the rolling estimator.
    pub rolling_window_capacity: usize,
    /// Frequency the rolling estimator measures cents against.
    pub reference_hz: f32,
    /// Point-estimate strategy for the rolling estimator.
    pub smoothing: SmoothingMethod,
    /// Clear the rolling window whenever a new note starts.
    pub reset_on_onset: bool,
    /// Density estimation strategy.
    pub density_method: DensityMethod,
    /// Number of bins in the density curve.
    pub density_bin_count: usize,
    /// Half-width of the density curve in cents.
    pub density_span_cents: f32,
    /// Kernel bandwidth (standard deviation) in cents.
    pub density_bandwidth_cents: f32,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            frame_length: BUFFER_SIZE,
            hop_length: 512,
            max_lag: BUFFER_SIZE / 2,
            min_frequency: 50.0,
            max_frequency: 1500.0,
            absolute_threshold: 0.1,
            silence_threshold: 1e-3,
            remove_dc: true,
            onset_energy_threshold: 0.01,
            offset_energy_threshold: 0.005,
            offset_frames: 3,
            attack_window_frames: 8,
            octave_tolerance_cents: 35.0,
            max_octave_divisor: 4,
            retrigger_frames: 4,
            anchor_support_threshold: 0.45,
            rolling_window_capacity: 20,
            reference_hz: 440.0,
            smoothing: SmoothingMethod::WeightedMean,
            reset_on_onset: true,
            density_method: DensityMethod::Kernel,
            density_bin_count: 101,
            density_span_cents: 50.0,
            density_bandwidth_cents: 5.0,
        }
    }
}

impl TunerConfig {
    /// Checks that the parameters are consistent with each other.
    pub fn validate(&self) -> TunerResult<()> {
        fn invalid(msg: impl Into<String>) -> TunerResult<()> {
            Err(TunerError::InvalidConfig(msg.into()))
        }

        if self.sample_rate == 0 {
            return invalid("sample_rate must be positive");
        }
        if self.max_lag < 3 || self.max_lag >= self.frame_length {
            return invalid(format!(
                "max_lag must be in 3..{} (frame_length), got {}",
                self.frame_length, self.max_lag
            ));
        }
        if self.hop_length == 0 || self.hop_length >= self.frame_length {
            return invalid(format!(
                "hop_length must be in 1..{} so frames overlap, got {}",
                self.frame_length, self.hop_length
            ));
        }
        if !(self.min_frequency > 0.0 && self.max_frequency > self.min_frequency) {
            return invalid(format!(
                "frequency range {} - {} Hz is empty",
                self.min_frequency, self.max_frequency
            ));
        }
        let (lag_min, lag_max) = self.lag_range();
        if lag_min >= lag_max {
            return invalid(format!(
                "frequency range {} - {} Hz maps to an empty lag range",
                self.min_frequency, self.max_frequency
            ));
        }
        if !(self.absolute_threshold > 0.0 && self.absolute_threshold < 1.0) {
            return invalid("absolute_threshold must be in (0, 1)");
        }
        if self.silence_threshold < 0.0 {
            return invalid("silence_threshold must not be negative");
        }
        if self.offset_energy_threshold > self.onset_energy_threshold {
            return invalid("offset_energy_threshold must not exceed onset_energy_threshold");
        }
        if self.offset_frames == 0 || self.attack_window_frames == 0 || self.retrigger_frames == 0 {
            return invalid("frame counts must be at least 1");
        }
        if !(self.octave_tolerance_cents > 0.0 && self.octave_tolerance_cents < 600.0) {
            return invalid("octave_tolerance_cents must be in (0, 600)");
        }
        if !(self.anchor_support_threshold > 0.0 && self.anchor_support_threshold.is_finite()) {
            return invalid("anchor_support_threshold must be positive");
        }
        if self.max_octave_divisor < 2 {
            return invalid("max_octave_divisor must be at least 2");
        }
        if self.rolling_window_capacity == 0 {
            return invalid("rolling_window_capacity must be at least 1");
        }
        if !(self.reference_hz.is_finite() && self.reference_hz > 0.0) {
            return invalid("reference_hz must be positive");
        }
        if self.density_bin_count == 0
            || self.density_span_cents <= 0.0
            || self.density_bandwidth_cents <= 0.0
        {
            return invalid("density bins, span and bandwidth must be positive");
        }
        Ok(())
    }

    /// Inclusive lag search range derived from the frequency limits.
    pub fn lag_range(&self) -> (usize, usize) {
        let fs = self.sample_rate as f32;
        let lag_min = ((fs / self.max_frequency).floor() as usize).max(2);
        let lag_max = ((fs / self.min_frequency).ceil() as usize).min(self.max_lag);
        (lag_min, lag_max)
    }

    /// Duration of one hop in seconds; the per-frame processing deadline.
    pub fn hop_duration_secs(&self) -> f64 {
        self.hop_length as f64 / self.sample_rate as f64
    }
}
