use std::f32::consts::PI;

use approx::assert_abs_diff_eq;
use microtune_core::audio::AudioFrame;
use microtune_core::pitch::PitchDetector;
use microtune_core::{
    DensityMethod, NotePhase, PitchStandard, Tuner, TunerConfig, TunerWorker, TuningHandle,
    TuningTable,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A sine with a continuous phase across frequency segments.
fn segments(parts: &[(f32, usize)], amplitude: impl Fn(usize) -> f32, sample_rate: u32) -> Vec<f32> {
    let mut phase = 0.0f32;
    let mut out = Vec::new();
    for &(freq, len) in parts {
        for _ in 0..len {
            let n = out.len();
            out.push(amplitude(n) * phase.sin());
            phase = (phase + 2.0 * PI * freq / sample_rate as f32) % (2.0 * PI);
        }
    }
    out
}

#[test]
fn detects_110_hz_in_a_single_frame() {
    init_logger();
    let config = TunerConfig::default();
    let samples = segments(&[(110.0, 2048)], |_| 0.5, config.sample_rate);
    let frame = AudioFrame::new(samples, config.sample_rate, 0, 0);

    let mut detector = PitchDetector::new(&config);
    let (estimate, selection) = detector.analyze(&frame);
    let selection = selection.unwrap();

    // 44100 / 110 = 400.9
    assert!((selection.lag - 400.9).abs() < 1.0, "lag {}", selection.lag);
    assert_abs_diff_eq!(estimate.frequency_hz.unwrap(), 110.0, epsilon = 1.0);
    assert!(estimate.confidence > 0.8);
}

#[test]
fn silent_stream_reports_nothing() {
    init_logger();
    let mut tuner = Tuner::new(TunerConfig::default(), TuningHandle::default()).unwrap();
    let results = tuner.process(&vec![0.0; 44100]);
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| {
        r.estimate.frequency_hz.is_none()
            && r.phase == NotePhase::Silence
            && !r.onset
            && r.smoothed_frequency.is_none()
            && r.tuning.is_none()
    }));
}

#[test]
fn too_low_estimate_is_corrected_while_anchor_sounds() {
    init_logger();
    let config = TunerConfig::default();
    let fs = config.sample_rate as f32;
    // A3 alone for 0.5 s, then a 110 Hz subharmonic fades in underneath it.
    // The frame becomes 110 Hz periodic and the detector drops an octave,
    // but the 220 Hz period is still clearly present.
    let fade_start = 22050;
    let samples: Vec<f32> = (0..44100)
        .map(|n| {
            let t = n as f32 / fs;
            let sub = 0.2 * ((n as f32 - fade_start as f32) / 2048.0).clamp(0.0, 1.0);
            0.5 * (2.0 * PI * 220.0 * t).sin() + sub * (2.0 * PI * 110.0 * t).sin()
        })
        .collect();

    let mut tuner = Tuner::new(config, TuningHandle::default()).unwrap();
    let results = tuner.process(&samples);
    assert!(results[0].onset);
    assert_eq!(results.iter().filter(|r| r.onset).count(), 1);

    let anchor = tuner.corrector().anchor_hz().unwrap();
    assert!((anchor - 220.0).abs() < 2.0, "anchor {anchor}");

    for result in &results[results.len() - 5..] {
        let raw = result.estimate.frequency_hz.unwrap();
        let corrected = result.corrected.frequency_hz.unwrap();
        assert!((raw - 110.0).abs() < 2.0, "raw {raw}");
        assert_eq!(result.multiplier, Some(2));
        assert!((corrected - 220.0).abs() < 4.0, "corrected {corrected}");
        assert_eq!(result.phase, NotePhase::Decay);
    }

    let last = tuner.latest().unwrap();
    assert_eq!(last.note_name(), Some("A"));
    assert!((last.smoothed_frequency.unwrap() - 220.0).abs() < 4.0);
}

#[test]
fn clean_octave_down_tone_is_a_new_note() {
    init_logger();
    let config = TunerConfig::default();
    let samples = segments(&[(220.0, 22050), (110.0, 22050)], |_| 0.5, config.sample_rate);

    let mut tuner = Tuner::new(config, TuningHandle::default()).unwrap();
    let results = tuner.process(&samples);
    assert_eq!(results.iter().filter(|r| r.onset).count(), 2);

    let anchor = tuner.corrector().anchor_hz().unwrap();
    assert!((anchor - 110.0).abs() < 1.0, "anchor {anchor}");

    for result in &results[results.len() - 5..] {
        let raw = result.estimate.frequency_hz.unwrap();
        assert!((raw - 110.0).abs() < 2.0, "raw {raw}");
        assert_eq!(result.multiplier, None);
        assert_eq!(result.corrected, result.estimate);
        assert_eq!(result.phase, NotePhase::Decay);
    }

    let smoothed = tuner.latest().unwrap().smoothed_frequency.unwrap();
    assert!((smoothed - 110.0).abs() < 1.0, "smoothed {smoothed}");
}

#[test]
fn pitch_standard_change_applies_mid_stream() {
    init_logger();
    let config = TunerConfig::default();
    let tuning = TuningHandle::default();
    let mut tuner = Tuner::new(config.clone(), tuning.clone()).unwrap();
    let samples = segments(&[(440.0, 44100)], |_| 0.5, config.sample_rate);
    let (first, second) = samples.split_at(22050);

    tuner.process(first);
    let before = tuner.latest().unwrap().cents_deviation().unwrap();
    assert!(before.abs() < 3.0, "before {before}");

    tuning.set_standard_hz(430.0).unwrap();
    let results = tuner.process(second);
    let after = results[0].tuning.as_ref().unwrap();

    // 1200 * log2(440 / 430)
    assert_eq!(after.degree, 9);
    assert!((after.cents_offset - 39.8).abs() < 3.0, "after {}", after.cents_offset);
    assert_abs_diff_eq!(after.target_hz, 430.0, epsilon = 0.01);
}

#[test]
fn quarter_tone_table() {
    init_logger();
    let config = TunerConfig::default();
    let tuning = TuningHandle::default();
    tuning
        .set_tuning(
            TuningTable::equal_temperament(24).unwrap(),
            PitchStandard::new(440.0, 18).unwrap(),
        )
        .unwrap();
    let mut tuner = Tuner::new(config.clone(), tuning).unwrap();

    // A quarter tone above A4.
    let freq = 440.0 * 2f32.powf(50.0 / 1200.0);
    tuner.process(&segments(&[(freq, 22050)], |_| 0.5, config.sample_rate));

    let result = tuner.latest().unwrap().tuning.clone().unwrap();
    assert_eq!(result.degree, 19);
    assert!(result.cents_offset.abs() < 3.0);
}

#[test]
fn density_is_normalized() {
    init_logger();
    for method in [DensityMethod::Kernel, DensityMethod::Histogram] {
        let config = TunerConfig {
            density_method: method,
            ..Default::default()
        };
        let mut tuner = Tuner::new(config.clone(), TuningHandle::default()).unwrap();
        tuner.process(&segments(&[(329.63, 22050)], |_| 0.5, config.sample_rate));

        let density = tuner.latest().unwrap().density.clone().unwrap();
        assert_eq!(density.points.len(), config.density_bin_count);
        assert_abs_diff_eq!(density.total(), 1.0, epsilon = 1e-3);
        let peak = density.peak().unwrap();
        assert!(peak.offset_cents.abs() < 5.0, "{method:?} peak at {}", peak.offset_cents);
    }
}

#[test]
fn worker_streams_results() {
    init_logger();
    let config = TunerConfig::default();
    let tuner = Tuner::new(config.clone(), TuningHandle::default()).unwrap();
    let worker = TunerWorker::spawn(tuner).unwrap();

    let samples = segments(&[(196.0, 22050)], |_| 0.5, config.sample_rate);
    let sender = worker.sender();
    for chunk in samples.chunks(256) {
        sender.send(chunk.to_vec()).unwrap();
    }
    worker.tuning().set_standard_hz(442.0).unwrap();

    let results = worker.results().clone();
    let tuner = worker.shutdown().unwrap();
    let received: Vec<_> = results.try_iter().collect();
    assert_eq!(received.len(), (22050 - 2048) / 512 + 1);

    let last = tuner.latest().unwrap();
    assert_eq!(last.note_name(), Some("G"));
    assert_abs_diff_eq!(tuner.tuning().snapshot().standard().frequency_hz(), 442.0);
}
