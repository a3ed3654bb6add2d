//! # Fast Fourier Transform (FFT) Module
//!
//! FFT-based cross-correlation used by the difference engine. Computing the
//! YIN difference function directly costs O(W * max_lag) per frame; going
//! through the frequency domain brings that down to O(N log N), which keeps
//! large frames well inside the hop deadline.
//!
//! ## Features
//! - High-performance FFT using RustFFT, plans cached per size
//! - DC offset removal for accurate analysis

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Removes the DC offset from a signal by making its average value zero.
///
/// A constant offset adds the same energy to every lag of the difference
/// function and blurs the dips the lag selector is looking for.
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Cross-correlates a signal prefix against the whole signal.
///
/// For a signal `x` and window `w`, [`Correlator::correlate`] returns
/// `r(tau) = sum_{i<w} x[i] * x[i + tau]` for `tau = 0..=max_lag`.
pub struct Correlator {
    size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    signal_spectrum: Vec<Complex<f32>>,
    window_spectrum: Vec<Complex<f32>>,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator").field("size", &self.size).finish()
    }
}

impl Correlator {
    /// Plans transforms large enough for a `signal_len` signal correlated
    /// against a `window` sample prefix without circular wrap-around.
    pub fn new(signal_len: usize, window: usize) -> Self {
        let size = (signal_len + window).next_power_of_two();
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        Self {
            size,
            forward,
            inverse,
            signal_spectrum: vec![Complex::default(); size],
            window_spectrum: vec![Complex::default(); size],
        }
    }

    /// FFT length in use.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Computes `r(tau)` for `tau = 0..=max_lag`.
    ///
    /// # Panics
    /// * If `window + max_lag` exceeds the signal length
    pub fn correlate(&mut self, signal: &[f32], window: usize, max_lag: usize) -> Vec<f32> {
        assert!(
            window + max_lag <= signal.len(),
            "correlation window exceeds signal length"
        );
        assert!(signal.len() + window <= self.size, "signal longer than planned size");

        for (i, slot) in self.signal_spectrum.iter_mut().enumerate() {
            let re = signal.get(i).copied().unwrap_or(0.0);
            *slot = Complex { re, im: 0.0 };
        }
        for (i, slot) in self.window_spectrum.iter_mut().enumerate() {
            let re = if i < window { signal[i] } else { 0.0 };
            *slot = Complex { re, im: 0.0 };
        }

        self.forward.process(&mut self.signal_spectrum);
        self.forward.process(&mut self.window_spectrum);

        // X * conj(W) transforms back to sum_i w[i] x[i + tau].
        for (x, w) in self.signal_spectrum.iter_mut().zip(self.window_spectrum.iter()) {
            *x *= w.conj();
        }
        self.inverse.process(&mut self.signal_spectrum);

        let scale = 1.0 / self.size as f32;
        self.signal_spectrum
            .iter()
            .take(max_lag + 1)
            .map(|c| c.re * scale)
            .collect()
    }
}
