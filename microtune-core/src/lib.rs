// microtune-core/src/lib.rs

//! Real-time pitch estimation for a monophonic input stream.
//!
//! Incoming samples are cut into overlapping frames, each frame is run through
//! a YIN pitch detector, octave errors are corrected against the note's attack,
//! and the last few estimates are smoothed and mapped onto a configurable
//! tuning table. The crate is headless: audio capture and presentation live
//! elsewhere.

pub mod audio;
pub mod config;
pub mod difference;
pub mod error;
pub mod fft;
pub mod octave;
pub mod pitch;
pub mod rolling;
pub mod tuner;
pub mod tuning;
pub mod worker;

pub use config::{DensityMethod, SmoothingMethod, TunerConfig};
pub use error::{TunerError, TunerResult};
pub use octave::NotePhase;
pub use pitch::PitchEstimate;
pub use rolling::DensityCurve;
pub use tuner::Tuner;
pub use tuning::{PitchStandard, TuningHandle, TuningResult, TuningTable};
pub use worker::TunerWorker;

/// Represents the result of a single audio analysis frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    /// The raw detector output for this frame.
    pub estimate: PitchEstimate,
    /// The estimate after octave correction.
    pub corrected: PitchEstimate,
    /// Note phase after this frame.
    pub phase: NotePhase,
    /// True on the frame that started a new note.
    pub onset: bool,
    /// Factor applied to a too-low estimate, if any.
    pub multiplier: Option<u32>,
    pub rms: f32,
    /// Smoothed frequency over the rolling window.
    pub smoothed_frequency: Option<f32>,
    /// Frequency density around the nearest degree.
    pub density: Option<DensityCurve>,
    /// Nearest degree of the current tuning.
    pub tuning: Option<TuningResult>,
}

impl AnalysisResult {
    /// Deviation of the smoothed frequency from its nearest degree.
    pub fn cents_deviation(&self) -> Option<f32> {
        self.tuning.as_ref().map(|t| t.cents_offset)
    }

    /// Name of the nearest degree, if the table names it.
    pub fn note_name(&self) -> Option<&str> {
        self.tuning.as_ref().and_then(|t| t.name.as_deref())
    }
}
