//! # Difference Engine
//!
//! Computes the YIN cumulative mean normalized difference function (CMNDF)
//! for one analysis frame.
//!
//! The squared difference at lag `tau` is
//! `d(tau) = sum_{i<W} (x[i] - x[i + tau])^2` with integration window
//! `W = frame_length - max_lag`, and the normalized curve is
//! `d'(tau) = d(tau) * tau / sum_{j=1..=tau} d(j)`, `d'(0) = 1`.
//! The normalization makes an absolute threshold meaningful regardless of
//! amplitude or timbre.

use crate::fft::Correlator;

/// Normalized difference values `d'(tau)` for `tau = 0..=max_lag`.
#[derive(Debug, Clone, PartialEq)]
pub struct DifferenceCurve {
    values: Vec<f32>,
}

impl DifferenceCurve {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Normalized difference at `tau`, if `tau <= max_lag`.
    pub fn value(&self, tau: usize) -> Option<f32> {
        self.values.get(tau).copied()
    }

    /// All values, indexed by lag.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Largest lag in the curve.
    pub fn max_lag(&self) -> usize {
        self.values.len().saturating_sub(1)
    }

    /// Lowest value within one sample of a fractional `lag`.
    ///
    /// Used to ask whether a period other than the selected one is still
    /// present in the frame. Returns `None` if `lag` falls outside the curve.
    pub fn dip_near(&self, lag: f32) -> Option<f32> {
        if !lag.is_finite() || lag < 1.0 {
            return None;
        }
        let center = lag.round() as usize;
        if center > self.max_lag() {
            return None;
        }
        let low = center.saturating_sub(1).max(1);
        let high = (center + 1).min(self.max_lag());
        self.values[low..=high].iter().copied().reduce(f32::min)
    }

    /// Iterates `(lag, d'(lag))` pairs starting from lag 1.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.values.iter().copied().enumerate().skip(1)
    }
}

/// Squared difference function computed sample by sample.
///
/// Returns `d(tau)` for `tau = 0..=max_lag` (`d(0)` is always 0). This is the
/// O(W * max_lag) reference; [`DifferenceEngine`] produces the same values
/// through the FFT.
pub fn difference_function(signal: &[f32], max_lag: usize) -> Vec<f32> {
    let window = signal.len().saturating_sub(max_lag);
    let mut diff = vec![0.0; max_lag + 1];
    for (tau, slot) in diff.iter_mut().enumerate().skip(1) {
        let mut sum = 0.0;
        for i in 0..window {
            let delta = signal[i] - signal[i + tau];
            sum += delta * delta;
        }
        *slot = sum;
    }
    diff
}

/// Applies the cumulative mean normalization to a raw difference function.
pub fn cumulative_mean_normalized_difference(diff: &[f32]) -> DifferenceCurve {
    let mut values = Vec::with_capacity(diff.len());
    if diff.is_empty() {
        return DifferenceCurve::new(values);
    }

    values.push(1.0);
    let mut running_sum = 0.0;
    for (tau, &d) in diff.iter().enumerate().skip(1) {
        running_sum += d;
        if running_sum > 0.0 {
            values.push(d * tau as f32 / running_sum);
        } else {
            values.push(1.0);
        }
    }
    DifferenceCurve::new(values)
}

/// Computes difference curves for frames of a fixed shape.
#[derive(Debug)]
pub struct DifferenceEngine {
    max_lag: usize,
    planned_len: usize,
    correlator: Correlator,
}

impl DifferenceEngine {
    pub fn new(frame_length: usize, max_lag: usize) -> Self {
        let window = frame_length.saturating_sub(max_lag);
        Self {
            max_lag,
            planned_len: frame_length,
            correlator: Correlator::new(frame_length, window),
        }
    }

    pub fn max_lag(&self) -> usize {
        self.max_lag
    }

    /// Raw squared difference `d(tau)` for `tau = 0..=max_lag`.
    pub fn difference(&mut self, signal: &[f32]) -> Vec<f32> {
        let max_lag = self.max_lag;
        if signal.len() <= max_lag {
            return vec![0.0; max_lag + 1];
        }
        let window = signal.len() - max_lag;
        if signal.len() != self.planned_len {
            log::debug!(
                "[DIFFERENCE] Replanning FFT for frame length {} (was {})",
                signal.len(),
                self.planned_len
            );
            self.correlator = Correlator::new(signal.len(), window);
            self.planned_len = signal.len();
        }

        // d(tau) ignores a constant offset, but E1 + E2 - 2r does not survive
        // one in single precision.
        let mean = signal.iter().map(|&s| s as f64).sum::<f64>() / signal.len() as f64;
        let centered: Vec<f32> = signal.iter().map(|&s| (s as f64 - mean) as f32).collect();

        let correlation = self.correlator.correlate(&centered, window, max_lag);

        // prefix[i] = sum of squares of the first i samples
        let mut prefix = Vec::with_capacity(centered.len() + 1);
        prefix.push(0.0_f64);
        let mut acc = 0.0_f64;
        for &s in &centered {
            acc += (s as f64) * (s as f64);
            prefix.push(acc);
        }

        let head_energy = prefix[window];
        let mut diff = vec![0.0; max_lag + 1];
        for (tau, slot) in diff.iter_mut().enumerate().skip(1) {
            let shifted_energy = prefix[tau + window] - prefix[tau];
            let d = head_energy + shifted_energy - 2.0 * correlation[tau] as f64;
            // Rounding in the FFT can push exact zeros slightly negative.
            *slot = d.max(0.0) as f32;
        }
        diff
    }

    /// Normalized difference curve for one frame.
    pub fn compute(&mut self, signal: &[f32]) -> DifferenceCurve {
        let diff = self.difference(signal);
        cumulative_mean_normalized_difference(&diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn test_normalization_starts_at_one() {
        let curve = cumulative_mean_normalized_difference(&[0.0, 2.0, 4.0, 0.5]);
        assert_eq!(curve.value(0), Some(1.0));
        // d'(1) = 2 * 1 / 2
        assert_eq!(curve.value(1), Some(1.0));
        // d'(2) = 4 * 2 / 6
        assert!((curve.value(2).unwrap() - 4.0 / 3.0).abs() < 1e-6);
        // d'(3) = 0.5 * 3 / 6.5
        assert!((curve.value(3).unwrap() - 1.5 / 6.5).abs() < 1e-6);
        assert_eq!(curve.max_lag(), 3);
    }

    #[test]
    fn test_zero_signal_is_flat() {
        let mut engine = DifferenceEngine::new(256, 128);
        let curve = engine.compute(&vec![0.0; 256]);
        assert!(curve.values().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_fft_matches_direct() {
        let signal: Vec<f32> = sine(220.0, 8000.0, 512)
            .iter()
            .zip(sine(330.0, 8000.0, 512))
            .map(|(a, b)| 0.6 * a + 0.3 * b)
            .collect();
        let max_lag = 200;

        let direct = difference_function(&signal, max_lag);
        let mut engine = DifferenceEngine::new(signal.len(), max_lag);
        let fast = engine.difference(&signal);

        for tau in 0..=max_lag {
            let tolerance = 1e-2 + 1e-3 * direct[tau];
            assert!(
                (fast[tau] - direct[tau]).abs() < tolerance,
                "tau {tau}: fft {} direct {}",
                fast[tau],
                direct[tau]
            );
        }
    }

    #[test]
    fn test_fft_matches_direct_with_dc_offset() {
        // A quiet tone riding on a large offset; 44100 / 330 = 133.6
        let signal: Vec<f32> = sine(330.0, 44100.0, 2048)
            .iter()
            .map(|s| 0.5 + 0.002 * s)
            .collect();
        let max_lag = 1024;

        let direct = cumulative_mean_normalized_difference(&difference_function(&signal, max_lag));
        let mut engine = DifferenceEngine::new(signal.len(), max_lag);
        let fast = engine.compute(&signal);

        for (tau, (f, d)) in fast.values().iter().zip(direct.values()).enumerate() {
            assert!((f - d).abs() < 1e-2, "tau {tau}: fft {f} direct {d}");
        }
        assert!(fast.dip_near(133.6).unwrap() < 0.01);
    }

    #[test]
    fn test_dip_near() {
        let curve = DifferenceCurve::new(vec![1.0, 0.9, 0.6, 0.2, 0.5, 0.8]);
        assert_eq!(curve.dip_near(2.4), Some(0.2));
        assert_eq!(curve.dip_near(4.6), Some(0.5));
        assert_eq!(curve.dip_near(1.2), Some(0.6));
        assert_eq!(curve.dip_near(0.6), None);
        assert_eq!(curve.dip_near(5.2), Some(0.5));
        assert_eq!(curve.dip_near(9.0), None);
        assert_eq!(curve.dip_near(f32::NAN), None);
    }

    #[test]
    fn test_dip_at_period() {
        // 8000 / 200 = 40 samples per period
        let signal = sine(200.0, 8000.0, 512);
        let mut engine = DifferenceEngine::new(512, 200);
        let curve = engine.compute(&signal);
        assert!(curve.value(40).unwrap() < 0.01);
        assert!(curve.value(20).unwrap() > 1.0);
    }

    #[test]
    fn test_replans_for_other_lengths() {
        let mut engine = DifferenceEngine::new(256, 100);
        let curve = engine.compute(&sine(200.0, 8000.0, 400));
        assert_eq!(curve.max_lag(), 100);
        assert!(curve.value(40).unwrap() < 0.01);
    }
}
