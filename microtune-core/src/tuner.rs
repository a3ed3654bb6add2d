//! # Tuner Pipeline
//!
//! Runs the full per-frame chain:
//! frame buffer -> pitch detector -> octave corrector -> rolling estimator ->
//! tuning mapper. A [`Tuner`] is single-threaded state; drive it directly or
//! hand it to a [`crate::worker::TunerWorker`].

use crate::AnalysisResult;
use crate::audio::{AudioFrame, FrameBuffer};
use crate::config::TunerConfig;
use crate::error::TunerResult;
use crate::octave::OctaveCorrector;
use crate::pitch::PitchDetector;
use crate::rolling::RollingEstimator;
use crate::tuning::TuningHandle;

/// The estimation pipeline for one monophonic input.
#[derive(Debug)]
pub struct Tuner {
    config: TunerConfig,
    frames: FrameBuffer,
    detector: PitchDetector,
    corrector: OctaveCorrector,
    rolling: RollingEstimator,
    tuning: TuningHandle,
    latest: Option<AnalysisResult>,
}

impl Tuner {
    /// Builds a tuner after validating `config`.
    ///
    /// `tuning` may be shared with whoever edits the tuning table and pitch
    /// standard; changes apply from the next processed frame.
    pub fn new(config: TunerConfig, tuning: TuningHandle) -> TunerResult<Self> {
        config.validate()?;
        log::info!(
            "[TUNER] {} Hz, frame {} / hop {} samples ({:.1} ms per hop), lags up to {}",
            config.sample_rate,
            config.frame_length,
            config.hop_length,
            config.hop_duration_secs() * 1000.0,
            config.max_lag
        );
        Ok(Self {
            frames: FrameBuffer::new(config.frame_length, config.hop_length, config.sample_rate),
            detector: PitchDetector::new(&config),
            corrector: OctaveCorrector::new(&config),
            rolling: RollingEstimator::new(&config),
            tuning,
            latest: None,
            config,
        })
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn tuning(&self) -> &TuningHandle {
        &self.tuning
    }

    pub fn corrector(&self) -> &OctaveCorrector {
        &self.corrector
    }

    pub fn rolling(&self) -> &RollingEstimator {
        &self.rolling
    }

    /// The result of the most recently processed frame.
    pub fn latest(&self) -> Option<&AnalysisResult> {
        self.latest.as_ref()
    }

    /// Queues samples without processing them.
    pub fn push_samples(&mut self, samples: &[f32]) {
        self.frames.push(samples);
    }

    /// Processes the next queued frame, or returns `None` if not enough
    /// samples are buffered yet.
    pub fn process_next(&mut self) -> Option<AnalysisResult> {
        let frame = self.frames.next_frame()?;
        Some(self.analyze_frame(&frame))
    }

    /// Queues `samples` and processes every frame that became available.
    pub fn process(&mut self, samples: &[f32]) -> Vec<AnalysisResult> {
        self.push_samples(samples);
        std::iter::from_fn(|| self.process_next()).collect()
    }

    /// Runs one frame through the whole chain.
    pub fn analyze_frame(&mut self, frame: &AudioFrame) -> AnalysisResult {
        let rms = frame.rms();
        let estimate = self.detector.detect(frame);
        let anchor_support = self
            .corrector
            .anchor_hz()
            .and_then(|anchor| self.detector.support_for(anchor));
        let correction = self.corrector.process(estimate, rms, anchor_support);

        if correction.onset && self.config.reset_on_onset {
            self.rolling.clear();
        }
        self.rolling.push(&correction.estimate);

        // One snapshot per frame so a concurrent standard change cannot tear.
        let snapshot = self.tuning.snapshot();
        let smoothed_frequency = self.rolling.smoothed_hz();
        let tuning = smoothed_frequency.and_then(|f| snapshot.map(f));
        let density = match &tuning {
            Some(result) => self.rolling.density_around(result.target_hz),
            None => self.rolling.density(),
        };

        let result = AnalysisResult {
            estimate,
            corrected: correction.estimate,
            phase: correction.phase,
            onset: correction.onset,
            multiplier: correction.multiplier,
            rms,
            smoothed_frequency,
            density,
            tuning,
        };
        self.latest = Some(result.clone());
        result
    }

    /// Drops buffered samples and all note and window state.
    pub fn reset(&mut self) {
        self.frames.clear();
        self.corrector.reset();
        self.rolling.clear();
        self.latest = None;
    }
}
