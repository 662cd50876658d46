//! Acoustic environment classification
//!
//! Band-energy ratios, tonal-bin detection and spectral centroid/spread
//! feed a fixed rule table. Each recognised environment carries a
//! closed-form noise template that can stand in for a learned profile.

use serde::{Deserialize, Serialize};

/// Upper edge of the low band (Hz)
const LOW_BAND_HZ: f32 = 500.0;

/// Upper edge of the mid band (Hz)
const MID_BAND_HZ: f32 = 4000.0;

/// Minimum magnitude for a tonal bin
const TONAL_MIN_MAGNITUDE: f32 = 0.01;

/// Confidence reported when no template applies
const BASE_CONFIDENCE: f32 = 0.1;

/// Fraction a tonal template bin moves toward the observation
const ADAPTIVE_RATE: f32 = 0.05;

const EPSILON: f32 = 1e-10;

/// Recognised acoustic environments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentClass {
    Studio,
    Live,
    Outdoor,
    Vehicle,
    Office,
    Unknown,
}

impl EnvironmentClass {
    /// Classes with a noise template
    pub const PROFILED: [EnvironmentClass; 5] = [
        EnvironmentClass::Studio,
        EnvironmentClass::Live,
        EnvironmentClass::Outdoor,
        EnvironmentClass::Vehicle,
        EnvironmentClass::Office,
    ];

    /// Default `(aggressiveness, spectral_smoothing)` for this environment
    pub fn defaults(self) -> Option<(f32, f32)> {
        match self {
            EnvironmentClass::Studio => Some((0.8, 0.9)),
            EnvironmentClass::Live => Some((0.5, 0.7)),
            EnvironmentClass::Outdoor => Some((0.7, 0.8)),
            EnvironmentClass::Vehicle => Some((0.6, 0.75)),
            EnvironmentClass::Office => Some((0.65, 0.8)),
            EnvironmentClass::Unknown => None,
        }
    }

    /// Noise amplitude density at `hz` (per-sample RMS units)
    fn density(self, hz: f32) -> f32 {
        let bump = |center: f32, width: f32| (-((hz - center) / width).powi(2)).exp();
        match self {
            // Quiet floor with a little low-end
            EnvironmentClass::Studio => 0.001 * (1.0 + 50.0 / (hz + 50.0)),
            // Crowd babble concentrated in the speech band
            EnvironmentClass::Live => 0.02 * (0.3 + bump(1000.0, 1500.0)),
            // Pink-ish broadband plus wind rumble
            EnvironmentClass::Outdoor => {
                0.03 * (200.0 / (hz + 200.0)).sqrt() + 0.05 * (-hz / 100.0).exp()
            }
            // Engine and road rumble
            EnvironmentClass::Vehicle => 0.08 * (-hz / 150.0).exp() + 0.002,
            // HVAC, mains hum and distant chatter
            EnvironmentClass::Office => {
                0.004
                    + 0.01 * (bump(60.0, 10.0) + bump(120.0, 10.0) + bump(180.0, 10.0))
                    + 0.006 * bump(1500.0, 1000.0)
            }
            EnvironmentClass::Unknown => 0.0,
        }
    }
}

/// Expected noise magnitude per bin for one environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentProfile {
    /// Environment this template describes
    pub class: EnvironmentClass,
    /// Magnitude per bin (N/2 bins)
    pub magnitude: Vec<f32>,
}

impl EnvironmentProfile {
    /// Build the template for an `fft_size`-point Hann-windowed transform
    pub fn build(class: EnvironmentClass, fft_size: usize, sample_rate: f32) -> Self {
        let bins = fft_size / 2;
        let bin_width = sample_rate / fft_size.max(1) as f32;
        // Hann window energy: white noise of RMS s gives |X| ~ s * sqrt(0.375 N)
        let scale = (0.375 * fft_size as f32).sqrt();
        let magnitude = (0..bins)
            .map(|i| class.density(i as f32 * bin_width) * scale)
            .collect();
        Self { class, magnitude }
    }

    /// Templates for every profiled class
    pub fn all(fft_size: usize, sample_rate: f32) -> Vec<Self> {
        EnvironmentClass::PROFILED
            .iter()
            .map(|&c| Self::build(c, fft_size, sample_rate))
            .collect()
    }

    /// Nudge tonal bins toward the observed magnitude
    pub fn adapt(&mut self, observed: &[f32], tonal_bins: &[usize]) {
        for &bin in tonal_bins {
            if let (Some(t), Some(&o)) = (self.magnitude.get_mut(bin), observed.get(bin)) {
                *t += ADAPTIVE_RATE * (o - *t);
            }
        }
    }
}

/// Descriptors and classification of one magnitude frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentAnalysis {
    /// Detected class
    pub class: EnvironmentClass,
    /// Template correlation mapped to [0.1, 1]
    pub confidence: f32,
    /// Energy share below 500 Hz
    pub low_ratio: f32,
    /// Energy share 500 - 4000 Hz
    pub mid_ratio: f32,
    /// Energy share above 4000 Hz
    pub high_ratio: f32,
    /// Bins that are 5-point local maxima
    pub tonal_bins: Vec<usize>,
    /// Magnitude-weighted mean frequency (Hz)
    pub centroid_hz: f32,
    /// Magnitude-weighted standard deviation around the centroid (Hz)
    pub spread_hz: f32,
}

/// Rule table, first match wins
pub fn classify(low: f32, mid: f32, high: f32, tonal_count: usize, spread_hz: f32) -> EnvironmentClass {
    if low > 0.6 && tonal_count < 3 {
        EnvironmentClass::Vehicle
    } else if low > 0.4 && spread_hz > 1000.0 {
        EnvironmentClass::Outdoor
    } else if mid > 0.5 && tonal_count > 5 {
        EnvironmentClass::Live
    } else if low < 0.3 && mid < 0.4 && high < 0.3 {
        EnvironmentClass::Studio
    } else if (3..=6).contains(&tonal_count) {
        EnvironmentClass::Office
    } else {
        EnvironmentClass::Unknown
    }
}

/// Pearson correlation; `None` when either input has no variance
pub fn pearson(a: &[f32], b: &[f32]) -> Option<f32> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let mean_a = a[..n].iter().sum::<f32>() / n as f32;
    let mean_b = b[..n].iter().sum::<f32>() / n as f32;

    let mut cov = 0.0f32;
    let mut var_a = 0.0f32;
    let mut var_b = 0.0f32;
    for (&x, &y) in a[..n].iter().zip(&b[..n]) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denom = (var_a * var_b).sqrt();
    if denom < EPSILON {
        None
    } else {
        Some(cov / denom)
    }
}

/// Bins greater than both neighbours on each side and above the tonal floor
pub fn tonal_bins(magnitudes: &[f32]) -> Vec<usize> {
    if magnitudes.len() < 5 {
        return Vec::new();
    }
    (2..magnitudes.len() - 2)
        .filter(|&i| {
            let m = magnitudes[i];
            m > TONAL_MIN_MAGNITUDE
                && m > magnitudes[i - 1]
                && m > magnitudes[i - 2]
                && m > magnitudes[i + 1]
                && m > magnitudes[i + 2]
        })
        .collect()
}

/// Analyse a magnitude frame against the given templates
pub fn analyze(magnitudes: &[f32], bin_width: f32, profiles: &[EnvironmentProfile]) -> EnvironmentAnalysis {
    let mut low = 0.0f32;
    let mut mid = 0.0f32;
    let mut high = 0.0f32;
    let mut weighted = 0.0f32;
    let mut mag_sum = 0.0f32;

    for (i, &m) in magnitudes.iter().enumerate() {
        let hz = i as f32 * bin_width;
        let power = m * m;
        if hz < LOW_BAND_HZ {
            low += power;
        } else if hz < MID_BAND_HZ {
            mid += power;
        } else {
            high += power;
        }
        weighted += hz * m;
        mag_sum += m;
    }

    let total = low + mid + high;
    let (low_ratio, mid_ratio, high_ratio) = if total > EPSILON {
        (low / total, mid / total, high / total)
    } else {
        (0.0, 0.0, 0.0)
    };

    let (centroid_hz, spread_hz) = if mag_sum > EPSILON {
        let centroid = weighted / mag_sum;
        let variance = magnitudes
            .iter()
            .enumerate()
            .map(|(i, &m)| (i as f32 * bin_width - centroid).powi(2) * m)
            .sum::<f32>()
            / mag_sum;
        (centroid, variance.sqrt())
    } else {
        (0.0, 0.0)
    };

    let tonal = tonal_bins(magnitudes);
    let class = classify(low_ratio, mid_ratio, high_ratio, tonal.len(), spread_hz);

    let confidence = profiles
        .iter()
        .find(|p| p.class == class)
        .and_then(|p| pearson(magnitudes, &p.magnitude))
        .map_or(BASE_CONFIDENCE, |r| BASE_CONFIDENCE + 0.9 * r.max(0.0));

    EnvironmentAnalysis {
        class,
        confidence,
        low_ratio,
        mid_ratio,
        high_ratio,
        tonal_bins: tonal,
        centroid_hz,
        spread_hz,
    }
}
