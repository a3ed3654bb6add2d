//! # Pitch Detection Module
//!
//! Turns one analysis frame into a [`PitchEstimate`] using the YIN method:
//! the difference engine produces the normalized difference curve, and the
//! lag selector picks the period from it.
//!
//! ## Features
//! - Absolute threshold with first-dip search to avoid too-high errors
//! - Global-minimum fallback when no dip crosses the threshold
//! - Parabolic interpolation for sub-sample accuracy
//! - Amplitude gating to filter out silence

use crate::audio::AudioFrame;
use crate::config::TunerConfig;
use crate::difference::{DifferenceCurve, DifferenceEngine};
use crate::fft::remove_dc_offset;

/// The pitch found in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    /// Estimated fundamental in Hz; `None` for silent frames.
    pub frequency_hz: Option<f32>,
    /// 1 - d'(tau*), clamped to [0, 1]. Always 0 for silent frames.
    pub confidence: f32,
    /// Index of the frame this estimate came from.
    pub frame_index: u64,
    /// Stream time of the frame start in seconds.
    pub timestamp_secs: f64,
}

impl PitchEstimate {
    /// An estimate for a frame with nothing to measure.
    pub fn silent(frame_index: u64, timestamp_secs: f64) -> Self {
        Self {
            frequency_hz: None,
            confidence: 0.0,
            frame_index,
            timestamp_secs,
        }
    }

    pub fn is_pitched(&self) -> bool {
        self.frequency_hz.is_some()
    }

    /// Same estimate with a different frequency.
    pub fn with_frequency(self, frequency_hz: f32) -> Self {
        Self {
            frequency_hz: Some(frequency_hz),
            ..self
        }
    }
}

/// The lag chosen from a difference curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LagSelection {
    /// Integer lag of the chosen minimum.
    pub tau: usize,
    /// Interpolated lag; equals `tau` when interpolation was skipped.
    pub lag: f32,
    /// d'(tau).
    pub value: f32,
    /// Whether the minimum came from the absolute threshold or the fallback.
    pub crossed_threshold: bool,
}

impl LagSelection {
    pub fn frequency(&self, sample_rate: u32) -> f32 {
        sample_rate as f32 / self.lag
    }

    pub fn confidence(&self) -> f32 {
        (1.0 - self.value).clamp(0.0, 1.0)
    }
}

/// Picks the period lag from a normalized difference curve.
///
/// Lags are searched in `lag_min..=lag_max` (clipped to the curve). The first
/// lag below `threshold` is followed downhill to its local minimum. If no lag
/// crosses the threshold, the global minimum of the range is used instead.
///
/// # Returns
/// * `Some(selection)` - The chosen lag, refined by parabolic interpolation
/// * `None` - The search range is empty
pub fn select_lag(
    curve: &DifferenceCurve,
    threshold: f32,
    lag_min: usize,
    lag_max: usize,
) -> Option<LagSelection> {
    let values = curve.values();
    let lag_min = lag_min.max(1);
    let lag_max = lag_max.min(curve.max_lag());
    if lag_min > lag_max {
        return None;
    }

    let mut chosen = None;
    let mut tau = lag_min;
    while tau <= lag_max {
        if values[tau] < threshold {
            while tau < lag_max && values[tau + 1] < values[tau] {
                tau += 1;
            }
            chosen = Some(tau);
            break;
        }
        tau += 1;
    }

    let crossed_threshold = chosen.is_some();
    let tau = match chosen {
        Some(tau) => tau,
        None => {
            let mut best = lag_min;
            for tau in lag_min..=lag_max {
                if values[tau] < values[best] {
                    best = tau;
                }
            }
            best
        }
    };

    Some(LagSelection {
        tau,
        lag: parabolic_lag(curve, tau),
        value: values[tau],
        crossed_threshold,
    })
}

/// Refines an integer lag with a parabola through its two neighbours.
///
/// Interpolation is skipped at the curve boundaries and where the three
/// points do not form a minimum.
fn parabolic_lag(curve: &DifferenceCurve, tau: usize) -> f32 {
    if tau <= 1 || tau >= curve.max_lag() {
        return tau as f32;
    }
    let values = curve.values();
    let y1 = values[tau - 1];
    let y2 = values[tau];
    let y3 = values[tau + 1];

    let denominator = y1 - 2.0 * y2 + y3;
    if denominator <= f32::EPSILON {
        return tau as f32;
    }
    let shift = (y1 - y3) / (2.0 * denominator);
    if shift.abs() > 1.0 {
        return tau as f32;
    }
    tau as f32 + shift
}

/// Frame-level pitch detector: silence gate, difference engine, lag selector.
#[derive(Debug)]
pub struct PitchDetector {
    sample_rate: u32,
    absolute_threshold: f32,
    silence_threshold: f32,
    remove_dc: bool,
    lag_min: usize,
    lag_max: usize,
    engine: DifferenceEngine,
    curve: Option<DifferenceCurve>,
}

impl PitchDetector {
    pub fn new(config: &TunerConfig) -> Self {
        let (lag_min, lag_max) = config.lag_range();
        Self {
            sample_rate: config.sample_rate,
            absolute_threshold: config.absolute_threshold,
            silence_threshold: config.silence_threshold,
            remove_dc: config.remove_dc,
            lag_min,
            lag_max,
            engine: DifferenceEngine::new(config.frame_length, config.max_lag),
            curve: None,
        }
    }

    /// Difference curve of the last analyzed frame; `None` after a silent one.
    pub fn curve(&self) -> Option<&DifferenceCurve> {
        self.curve.as_ref()
    }

    /// d' of the last frame at the period of `frequency_hz`.
    ///
    /// A low value means that period is still present in the signal, whatever
    /// lag the selector picked.
    pub fn support_for(&self, frequency_hz: f32) -> Option<f32> {
        self.curve()?.dip_near(self.sample_rate as f32 / frequency_hz)
    }

    /// Estimates the pitch of one frame.
    pub fn detect(&mut self, frame: &AudioFrame) -> PitchEstimate {
        self.analyze(frame).0
    }

    /// Estimates the pitch of one frame and also returns the chosen lag.
    ///
    /// Frames whose RMS is below the silence threshold skip the difference
    /// engine entirely and yield a silent estimate.
    pub fn analyze(&mut self, frame: &AudioFrame) -> (PitchEstimate, Option<LagSelection>) {
        let silent = PitchEstimate::silent(frame.index(), frame.timestamp_secs());
        self.curve = None;
        if frame.rms() < self.silence_threshold {
            return (silent, None);
        }

        let curve = if self.remove_dc {
            let mut samples = frame.samples().to_vec();
            remove_dc_offset(&mut samples);
            self.engine.compute(&samples)
        } else {
            self.engine.compute(frame.samples())
        };

        let selection = select_lag(&curve, self.absolute_threshold, self.lag_min, self.lag_max);
        self.curve = Some(curve);
        let Some(selection) = selection else {
            return (silent, None);
        };

        let frequency = selection.frequency(self.sample_rate);
        if !frequency.is_finite() || frequency <= 0.0 {
            return (silent, None);
        }

        let estimate = PitchEstimate {
            frequency_hz: Some(frequency),
            confidence: selection.confidence(),
            frame_index: frame.index(),
            timestamp_secs: frame.timestamp_secs(),
        };
        (estimate, Some(selection))
    }
}
