//! # Octave Correction Module
//!
//! YIN-family estimators tend to drop to a sub-multiple of the true
//! fundamental as the upper harmonics of a plucked note decay. Right after an
//! onset this does not happen, so the corrector trusts the attack phase,
//! derives an anchor frequency from it, and during the decay snaps estimates
//! that look like anchor/2, anchor/3, ... back up to the anchor's octave.
//! A snap only happens while the anchor's period is still present in the
//! frame; a sub-multiple estimate without it is a new, lower note.
//!
//! Each note moves through `Silence -> Attack -> Decay -> Silence`.

use crate::config::TunerConfig;
use crate::pitch::PitchEstimate;

/// Per-note state, with the data each phase needs.
#[derive(Debug, Clone, PartialEq)]
pub enum NoteState {
    /// No note is sounding.
    Silence,
    /// The first frames after an onset. Estimates are trusted and collected.
    Attack {
        frames_since_onset: usize,
        quiet_frames: usize,
        estimates: Vec<f32>,
    },
    /// The rest of the note. Too-low estimates are corrected against the anchor.
    Decay {
        anchor_hz: Option<f32>,
        frames_since_onset: usize,
        quiet_frames: usize,
        unrelated_frames: usize,
    },
}

/// Phase tag of a [`NoteState`], without the state data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotePhase {
    Silence,
    Attack,
    Decay,
}

impl NoteState {
    pub fn phase(&self) -> NotePhase {
        match self {
            NoteState::Silence => NotePhase::Silence,
            NoteState::Attack { .. } => NotePhase::Attack,
            NoteState::Decay { .. } => NotePhase::Decay,
        }
    }

    pub fn anchor_hz(&self) -> Option<f32> {
        match self {
            NoteState::Decay { anchor_hz, .. } => *anchor_hz,
            _ => None,
        }
    }

    pub fn frames_since_onset(&self) -> usize {
        match self {
            NoteState::Silence => 0,
            NoteState::Attack { frames_since_onset, .. }
            | NoteState::Decay { frames_since_onset, .. } => *frames_since_onset,
        }
    }
}

/// How an estimate relates to the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Within tolerance of the anchor itself.
    Unison,
    /// Within tolerance of anchor / k.
    SubMultiple(u32),
    /// Anything else, including too-high estimates.
    Unrelated,
}

/// Output of the corrector for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    /// The estimate after correction.
    pub estimate: PitchEstimate,
    /// Phase the note is in after this frame.
    pub phase: NotePhase,
    /// Multiplier applied to the input frequency, if any.
    pub multiplier: Option<u32>,
    /// A new note started on this frame.
    pub onset: bool,
}

/// Signed distance from `reference` to `frequency` in cents.
fn cents_between(frequency: f32, reference: f32) -> f32 {
    1200.0 * (frequency / reference).log2()
}

/// Classifies `frequency` against `anchor_hz`.
pub fn relation_to_anchor(
    frequency: f32,
    anchor_hz: f32,
    tolerance_cents: f32,
    max_divisor: u32,
) -> Relation {
    for k in 1..=max_divisor {
        if cents_between(frequency * k as f32, anchor_hz).abs() <= tolerance_cents {
            return if k == 1 { Relation::Unison } else { Relation::SubMultiple(k) };
        }
    }
    Relation::Unrelated
}

/// Corrects a too-low estimate against the anchor.
///
/// Returns the corrected frequency and the multiplier used. Estimates that are
/// not within tolerance of anchor/k are returned unchanged.
pub fn correct_too_low(
    frequency: f32,
    anchor_hz: f32,
    tolerance_cents: f32,
    max_divisor: u32,
) -> (f32, Option<u32>) {
    match relation_to_anchor(frequency, anchor_hz, tolerance_cents, max_divisor) {
        Relation::SubMultiple(k) => (frequency * k as f32, Some(k)),
        _ => (frequency, None),
    }
}

/// Derives the anchor from the attack-phase estimates.
///
/// Takes the median, then averages the estimates within `tolerance_cents` of
/// it so a stray octave jump during the attack does not pull the anchor.
pub fn stable_anchor(estimates: &[f32], tolerance_cents: f32) -> Option<f32> {
    if estimates.is_empty() {
        return None;
    }
    let mut sorted = estimates.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let median = sorted[sorted.len() / 2];

    let (sum, count) = sorted
        .iter()
        .filter(|&&f| cents_between(f, median).abs() <= tolerance_cents)
        .fold((0.0, 0usize), |(sum, count), &f| (sum + f, count + 1));

    // The median always matches itself, so count >= 1.
    Some(sum / count as f32)
}

/// The octave-correction state machine.
#[derive(Debug, Clone)]
pub struct OctaveCorrector {
    onset_threshold: f32,
    offset_threshold: f32,
    offset_frames: usize,
    attack_window_frames: usize,
    tolerance_cents: f32,
    max_divisor: u32,
    retrigger_frames: usize,
    support_threshold: f32,
    state: NoteState,
}

impl OctaveCorrector {
    pub fn new(config: &TunerConfig) -> Self {
        Self {
            onset_threshold: config.onset_energy_threshold,
            offset_threshold: config.offset_energy_threshold,
            offset_frames: config.offset_frames,
            attack_window_frames: config.attack_window_frames,
            tolerance_cents: config.octave_tolerance_cents,
            max_divisor: config.max_octave_divisor,
            retrigger_frames: config.retrigger_frames,
            support_threshold: config.anchor_support_threshold,
            state: NoteState::Silence,
        }
    }

    pub fn state(&self) -> &NoteState {
        &self.state
    }

    pub fn phase(&self) -> NotePhase {
        self.state.phase()
    }

    pub fn anchor_hz(&self) -> Option<f32> {
        self.state.anchor_hz()
    }

    /// Forgets the current note.
    pub fn reset(&mut self) {
        self.state = NoteState::Silence;
    }

    /// Feeds one frame's estimate and RMS energy through the state machine.
    ///
    /// `anchor_support` is d' of the same frame at the anchor's lag (see
    /// [`crate::pitch::PitchDetector::support_for`]). It is only consulted for
    /// sub-multiple estimates during decay; `None` counts as unsupported.
    pub fn process(
        &mut self,
        estimate: PitchEstimate,
        rms: f32,
        anchor_support: Option<f32>,
    ) -> Correction {
        let quiet = rms < self.offset_threshold;
        let state = std::mem::replace(&mut self.state, NoteState::Silence);

        let (next, output, multiplier, onset) = match state {
            NoteState::Silence => {
                if rms >= self.onset_threshold {
                    log::debug!(
                        "[CORRECTOR] Onset at frame {} (rms {:.4})",
                        estimate.frame_index,
                        rms
                    );
                    (self.start_attack(&estimate), estimate, None, true)
                } else {
                    (NoteState::Silence, estimate, None, false)
                }
            }
            NoteState::Attack {
                frames_since_onset,
                quiet_frames,
                mut estimates,
            } => {
                let quiet_frames = if quiet { quiet_frames + 1 } else { 0 };
                let frames_since_onset = frames_since_onset + 1;
                if let Some(f) = estimate.frequency_hz {
                    estimates.push(f);
                }

                let next = if quiet_frames >= self.offset_frames {
                    log::debug!("[CORRECTOR] Offset during attack at frame {}", estimate.frame_index);
                    NoteState::Silence
                } else if frames_since_onset >= self.attack_window_frames {
                    self.finish_attack(&estimates, frames_since_onset, quiet_frames)
                } else {
                    NoteState::Attack {
                        frames_since_onset,
                        quiet_frames,
                        estimates,
                    }
                };
                (next, estimate, None, false)
            }
            NoteState::Decay {
                anchor_hz,
                frames_since_onset,
                quiet_frames,
                unrelated_frames,
            } => {
                let quiet_frames = if quiet { quiet_frames + 1 } else { 0 };
                let frames_since_onset = frames_since_onset + 1;

                let mut output = estimate;
                let mut multiplier = None;
                let mut unrelated_frames = unrelated_frames;
                let mut lower_note = false;

                if let (Some(f), Some(anchor)) = (estimate.frequency_hz, anchor_hz) {
                    match relation_to_anchor(f, anchor, self.tolerance_cents, self.max_divisor) {
                        Relation::Unison => unrelated_frames = 0,
                        Relation::SubMultiple(k)
                            if !anchor_support.is_some_and(|d| d < self.support_threshold) =>
                        {
                            log::debug!(
                                "[CORRECTOR] Found {:.2} Hz = anchor {:.2} Hz / {}, but the anchor is gone (d' {:?})",
                                f,
                                anchor,
                                k,
                                anchor_support
                            );
                            lower_note = true;
                        }
                        Relation::SubMultiple(k) => {
                            let corrected = f * k as f32;
                            log::debug!(
                                "[CORRECTOR] Too-low error corrected: found {:.2} Hz, anchor {:.2} Hz, x{} -> {:.2} Hz",
                                f,
                                anchor,
                                k,
                                corrected
                            );
                            output = estimate.with_frequency(corrected);
                            multiplier = Some(k);
                            unrelated_frames = 0;
                        }
                        Relation::Unrelated => unrelated_frames += 1,
                    }
                }

                if quiet_frames >= self.offset_frames {
                    log::debug!(
                        "[CORRECTOR] Offset at frame {}, clearing anchor {:?}",
                        estimate.frame_index,
                        anchor_hz
                    );
                    (NoteState::Silence, output, multiplier, false)
                } else if lower_note {
                    (self.start_attack(&estimate), output, multiplier, true)
                } else if unrelated_frames >= self.retrigger_frames {
                    log::debug!(
                        "[CORRECTOR] New pitch at frame {} departs from anchor {:?}, restarting attack",
                        estimate.frame_index,
                        anchor_hz
                    );
                    (self.start_attack(&estimate), output, multiplier, true)
                } else {
                    let next = NoteState::Decay {
                        anchor_hz,
                        frames_since_onset,
                        quiet_frames,
                        unrelated_frames,
                    };
                    (next, output, multiplier, false)
                }
            }
        };

        self.state = next;
        Correction {
            estimate: output,
            phase: self.state.phase(),
            multiplier,
            onset,
        }
    }

    fn start_attack(&self, estimate: &PitchEstimate) -> NoteState {
        let estimates: Vec<f32> = estimate.frequency_hz.into_iter().collect();
        if self.attack_window_frames <= 1 {
            return self.finish_attack(&estimates, 1, 0);
        }
        NoteState::Attack {
            frames_since_onset: 1,
            quiet_frames: 0,
            estimates,
        }
    }

    fn finish_attack(&self, estimates: &[f32], frames_since_onset: usize, quiet_frames: usize) -> NoteState {
        let anchor_hz = stable_anchor(estimates, self.tolerance_cents);
        match anchor_hz {
            Some(anchor) => log::debug!(
                "[CORRECTOR] Anchor set to {:.2} Hz from {} attack estimates",
                anchor,
                estimates.len()
            ),
            None => log::debug!("[CORRECTOR] Attack ended without a pitched estimate"),
        }
        NoteState::Decay {
            anchor_hz,
            frames_since_onset,
            quiet_frames,
            unrelated_frames: 0,
        }
    }
}
