//! # Rolling Estimation Module
//!
//! Aggregates the stream of per-frame estimates into a smoothed pitch and a
//! density curve describing how the recent estimates are spread.
//!
//! Estimates are kept as cents relative to a fixed reference frequency, with
//! their confidence as weight, in a fixed-capacity circular window. Silent
//! frames insert nothing but age the window by dropping its oldest entry, so
//! the statistics decay once a note stops.

use crate::config::{DensityMethod, SmoothingMethod, TunerConfig};
use crate::pitch::PitchEstimate;

/// Total mass of every non-empty density curve.
pub const DENSITY_MASS: f32 = 1.0;

/// Weight floor so that zero-confidence fallback estimates still count.
const MIN_WEIGHT: f32 = 1e-3;

/// Fixed-capacity circular buffer with oldest-first eviction.
#[derive(Debug, Clone)]
pub struct RollingWindow<T: Copy> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T: Copy> RollingWindow<T> {
    /// Creates a window holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            head: 0,
            len: 0,
        }
    }

    /// Inserts a value, returning the evicted oldest value when full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let capacity = self.slots.len();
        if self.len < capacity {
            let index = (self.head + self.len) % capacity;
            self.slots[index] = Some(value);
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.head].replace(value);
            self.head = (self.head + 1) % capacity;
            evicted
        }
    }

    /// Removes and returns the oldest value.
    pub fn pop_oldest(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        value
    }

    /// Iterates from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        let capacity = self.slots.len();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % capacity])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
    }
}

/// One estimate as stored in the window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowEntry {
    /// Cents relative to the estimator's reference frequency.
    pub cents: f32,
    /// Confidence weight, floored at a small positive value.
    pub weight: f32,
}

/// A point of a [`DensityCurve`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityPoint {
    /// Bin centre in cents relative to the curve centre.
    pub offset_cents: f32,
    pub density: f32,
}

/// Distribution of recent estimates around a centre frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityCurve {
    pub center_hz: f32,
    pub points: Vec<DensityPoint>,
}

impl DensityCurve {
    /// Sum of all densities; [`DENSITY_MASS`] up to rounding.
    pub fn total(&self) -> f32 {
        self.points.iter().map(|p| p.density).sum()
    }

    /// Frequency at the centre of bin `index`.
    pub fn frequency_at(&self, index: usize) -> Option<f32> {
        self.points
            .get(index)
            .map(|p| self.center_hz * 2f32.powf(p.offset_cents / 1200.0))
    }

    /// The bin holding the most mass.
    pub fn peak(&self) -> Option<DensityPoint> {
        self.points
            .iter()
            .copied()
            .max_by(|a, b| a.density.total_cmp(&b.density))
    }
}

/// Smoothed pitch and density over the last few pitched frames.
#[derive(Debug, Clone)]
pub struct RollingEstimator {
    window: RollingWindow<WindowEntry>,
    reference_hz: f32,
    smoothing: SmoothingMethod,
    density_method: DensityMethod,
    bin_count: usize,
    span_cents: f32,
    bandwidth_cents: f32,
}

impl RollingEstimator {
    pub fn new(config: &TunerConfig) -> Self {
        Self {
            window: RollingWindow::new(config.rolling_window_capacity),
            reference_hz: config.reference_hz,
            smoothing: config.smoothing,
            density_method: config.density_method,
            bin_count: config.density_bin_count.max(1),
            span_cents: config.density_span_cents,
            bandwidth_cents: config.density_bandwidth_cents,
        }
    }

    pub fn window(&self) -> &RollingWindow<WindowEntry> {
        &self.window
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    fn to_cents(&self, frequency: f32) -> f32 {
        1200.0 * (frequency / self.reference_hz).log2()
    }

    fn to_hz(&self, cents: f32) -> f32 {
        self.reference_hz * 2f32.powf(cents / 1200.0)
    }

    /// Adds a frame's estimate. Silent estimates only age the window.
    pub fn push(&mut self, estimate: &PitchEstimate) {
        match estimate.frequency_hz {
            Some(f) if f > 0.0 && f.is_finite() => {
                let entry = WindowEntry {
                    cents: self.to_cents(f),
                    weight: estimate.confidence.max(MIN_WEIGHT),
                };
                self.window.push(entry);
            }
            _ => {
                self.window.pop_oldest();
            }
        }
    }

    /// Smoothed estimate in cents relative to the reference frequency.
    pub fn smoothed_cents(&self) -> Option<f32> {
        if self.window.is_empty() {
            return None;
        }
        match self.smoothing {
            SmoothingMethod::WeightedMean => {
                let (sum, total) = self
                    .window
                    .iter()
                    .fold((0.0, 0.0), |(sum, total), e| (sum + e.cents * e.weight, total + e.weight));
                Some(sum / total)
            }
            SmoothingMethod::WeightedMedian => {
                let mut entries: Vec<WindowEntry> = self.window.iter().collect();
                entries.sort_by(|a, b| a.cents.total_cmp(&b.cents));
                let half = entries.iter().map(|e| e.weight).sum::<f32>() / 2.0;
                let mut cumulative = 0.0;
                for entry in &entries {
                    cumulative += entry.weight;
                    if cumulative >= half {
                        return Some(entry.cents);
                    }
                }
                entries.last().map(|e| e.cents)
            }
        }
    }

    /// Smoothed estimate in Hz.
    pub fn smoothed_hz(&self) -> Option<f32> {
        self.smoothed_cents().map(|c| self.to_hz(c))
    }

    /// Density curve centred on the smoothed estimate.
    pub fn density(&self) -> Option<DensityCurve> {
        self.smoothed_hz().and_then(|center| self.density_around(center))
    }

    /// Density curve centred on `center_hz`, e.g. the target note.
    pub fn density_around(&self, center_hz: f32) -> Option<DensityCurve> {
        if self.window.is_empty() || !(center_hz > 0.0 && center_hz.is_finite()) {
            return None;
        }
        let center_cents = self.to_cents(center_hz);
        let offsets = self.bin_offsets();
        let samples: Vec<(f32, f32)> = self
            .window
            .iter()
            .map(|e| (e.cents - center_cents, e.weight))
            .collect();

        let mut densities = match self.density_method {
            DensityMethod::Kernel => self.kernel(&offsets, &samples),
            DensityMethod::Histogram => self.histogram(&samples),
        };

        let mut total: f32 = densities.iter().sum();
        if !(total > f32::MIN_POSITIVE && total.is_finite()) {
            // Everything sits far outside the span; fall back to clamped bins.
            densities = self.histogram(&samples);
            total = densities.iter().sum();
        }
        let scale = DENSITY_MASS / total;

        let points = offsets
            .into_iter()
            .zip(densities)
            .map(|(offset_cents, d)| DensityPoint {
                offset_cents,
                density: d * scale,
            })
            .collect();
        Some(DensityCurve { center_hz, points })
    }

    fn bin_width(&self) -> f32 {
        if self.bin_count > 1 {
            2.0 * self.span_cents / (self.bin_count - 1) as f32
        } else {
            2.0 * self.span_cents
        }
    }

    fn bin_offsets(&self) -> Vec<f32> {
        if self.bin_count == 1 {
            return vec![0.0];
        }
        let width = self.bin_width();
        (0..self.bin_count)
            .map(|i| -self.span_cents + width * i as f32)
            .collect()
    }

    fn kernel(&self, offsets: &[f32], samples: &[(f32, f32)]) -> Vec<f32> {
        let h = self.bandwidth_cents;
        offsets
            .iter()
            .map(|&x| {
                samples
                    .iter()
                    .map(|&(c, w)| {
                        let z = (x - c) / h;
                        w * (-0.5 * z * z).exp()
                    })
                    .sum()
            })
            .collect()
    }

    fn histogram(&self, samples: &[(f32, f32)]) -> Vec<f32> {
        let mut bins = vec![0.0; self.bin_count];
        let width = self.bin_width();
        let last = self.bin_count - 1;
        for &(c, w) in samples {
            let position = ((c + self.span_cents) / width).round();
            let index = if position.is_nan() || position <= 0.0 {
                0
            } else {
                (position as usize).min(last)
            };
            bins[index] += w;
        }
        bins
    }
}
