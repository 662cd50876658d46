//! Spectral subtraction and musical-noise suppression

use std::collections::VecDeque;

/// Frequency above which gain smoothing is strengthened (Hz)
const HIGH_FREQ_HZ: f32 = 4000.0;

/// Extra smoothing weight above [`HIGH_FREQ_HZ`]
const HIGH_FREQ_SMOOTHING_BOOST: f32 = 0.1;

/// Upper bound on the smoothing weight
const MAX_SMOOTHING: f32 = 0.95;

/// Flux values kept for the variance test
const FLUX_HISTORY: usize = 10;

/// Flux values needed before suppression can trigger
const MIN_FLUX_VALUES: usize = 3;

const EPSILON: f32 = 1e-10;

/// Lowest magnitude subtraction may leave in a bin
#[inline]
pub fn subtraction_floor(magnitude: f32, noise: f32) -> f32 {
    (0.01 * magnitude).max(0.005 * noise).max(0.0)
}

/// Over-subtraction with a spectral floor and frequency-dependent gain smoothing.
///
/// The per-bin gain `sub / mag` is smoothed rather than the magnitudes, so
/// peak energy is not spread into neighbouring bins. The floor is applied last.
pub fn enhanced_spectral_subtraction(
    magnitudes: &[f32],
    noise: &[f32],
    aggressiveness: f32,
    spectral_smoothing: f32,
    bin_width: f32,
) -> Vec<f32> {
    let n = magnitudes.len().min(noise.len());
    if n == 0 {
        return Vec::new();
    }

    let mut floors = Vec::with_capacity(n);
    let mut gains = Vec::with_capacity(n);
    for (&m, &nz) in magnitudes[..n].iter().zip(&noise[..n]) {
        let m = m.max(0.0);
        let floor = subtraction_floor(m, nz);
        let sub = (m - aggressiveness * nz).max(floor);
        floors.push(floor);
        gains.push(if m > EPSILON { sub / m } else { 1.0 });
    }

    (0..n)
        .map(|i| {
            let mut weight = spectral_smoothing.clamp(0.0, 1.0);
            if i as f32 * bin_width > HIGH_FREQ_HZ {
                weight = (weight + HIGH_FREQ_SMOOTHING_BOOST).min(MAX_SMOOTHING);
            }
            let lo = i.saturating_sub(1);
            let hi = (i + 1).min(n - 1);
            let neighbourhood = gains[lo..=hi].iter().sum::<f32>() / (hi - lo + 1) as f32;
            let gain = (1.0 - weight) * gains[i] + weight * neighbourhood;
            (magnitudes[i].max(0.0) * gain).max(floors[i])
        })
        .collect()
}

/// Detects fluctuating residual tones from spectral flux variance.
///
/// The flux of a frame is its summed positive per-bin increase over the
/// previous processed frame divided by its summed magnitude, i.e. the mean
/// positive increase per bin relative to the mean level. The variance
/// threshold is therefore independent of the signal level.
#[derive(Debug, Clone)]
pub struct MusicalNoiseSuppressor {
    /// Variance above which suppression engages
    threshold: f32,
    /// Recent normalised positive flux values
    flux_history: VecDeque<f32>,
    /// Previous processed spectrum
    previous: Option<Vec<f32>>,
}

impl MusicalNoiseSuppressor {
    /// Create suppressor with a flux-variance threshold
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            flux_history: VecDeque::with_capacity(FLUX_HISTORY),
            previous: None,
        }
    }

    /// Record the processed spectrum and blend suspicious bins toward half the original.
    ///
    /// Returns `true` when suppression was applied.
    pub fn process(&mut self, original: &[f32], processed: &mut [f32]) -> bool {
        if let Some(prev) = self.previous.as_ref().filter(|p| p.len() == processed.len()) {
            let increase: f32 = processed
                .iter()
                .zip(prev)
                .map(|(&p, &q)| (p - q).max(0.0))
                .sum();
            let level: f32 = processed.iter().sum();
            if self.flux_history.len() == FLUX_HISTORY {
                self.flux_history.pop_front();
            }
            self.flux_history.push_back(increase / (level + EPSILON));
        }
        self.previous = Some(processed.to_vec());

        if self.flux_variance() <= self.threshold {
            return false;
        }

        for (p, &o) in processed.iter_mut().zip(original) {
            if o <= EPSILON {
                continue;
            }
            let weight = ((*p - o).abs() / o).min(1.0);
            *p = (1.0 - weight) * *p + weight * 0.5 * o;
        }
        true
    }

    /// Variance of the flux history (0 until enough values exist)
    pub fn flux_variance(&self) -> f32 {
        if self.flux_history.len() < MIN_FLUX_VALUES {
            return 0.0;
        }
        let n = self.flux_history.len() as f32;
        let mean = self.flux_history.iter().sum::<f32>() / n;
        self.flux_history.iter().map(|f| (f - mean).powi(2)).sum::<f32>() / n
    }

    /// Forget the flux history
    pub fn reset(&mut self) {
        self.flux_history.clear();
        self.previous = None;
    }
}
