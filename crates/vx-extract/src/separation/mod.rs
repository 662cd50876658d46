//! Source separation
//!
//! Isolates registered sources from a mono mixture with one of four
//! algorithms:
//! - Spectral masking from profile f0 and formants
//! - Wiener filtering against a percentile noise estimate
//! - Adaptive subtraction with per-source filter state
//! - ICA stand-in (fixed random FIR per source)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vx_extract::separation::{SeparationConfig, SourceSeparationEngine};
//! use vx_extract::SourceProfile;
//!
//! let mut engine = SourceSeparationEngine::new(SeparationConfig::default(), 16000.0)?;
//! engine.register_profile(SourceProfile::voice("alice", (90.0, 160.0), [700.0, 1200.0, 2600.0, 3400.0]));
//! let result = engine.separate(&mixture, Some(&["alice"]))?;
//! let alice = &result.sources[0];
//! ```

mod config;
mod masks;

pub use config::{SeparationAlgorithm, SeparationConfig};
pub use masks::{formant_response, harmonic_response, percentile};

use crate::analysis;
use crate::error::{ExtractError, ExtractResult};
use crate::profile::SourceProfile;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use vx_dsp::{SpectralTransform, Spectrum};

// ============ Constants ============

/// Aggressiveness bounds
const MIN_AGGRESSIVENESS: f32 = 0.3;
const MAX_AGGRESSIVENESS: f32 = 0.9;

/// Processing time above this share of the frame period lowers aggressiveness
const SLOW_RATIO: f32 = 0.8;

/// Processing time below this share of the frame period raises aggressiveness
const FAST_RATIO: f32 = 0.4;

const AGGRESSIVENESS_DOWN: f32 = 0.1;
const AGGRESSIVENESS_UP: f32 = 0.05;

/// Initial adaptive filter gain
const ADAPTIVE_INITIAL: f32 = 0.5;

/// Noise percentile for the Wiener estimate
const WIENER_NOISE_PERCENTILE: f32 = 0.25;

/// ICA stand-in filter length
const ICA_TAPS: usize = 4;

/// Confidence discount for the ICA stand-in
const ICA_CONFIDENCE: f32 = 0.5;

/// Candidate peaks searched for f0
const F0_CANDIDATES: usize = 8;

const EPSILON: f32 = 1e-10;

/// Output of one separation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeparationResult {
    /// One signal per label, each the mixture's length
    pub sources: Vec<Vec<f32>>,
    /// Per-source confidence
    pub confidences: Vec<f32>,
    /// Source ids, in request (or registration) order
    pub labels: Vec<String>,
    /// Separated energy over mixture energy (0.0 - 1.0)
    pub quality: f32,
    /// Algorithm that produced the result
    pub algorithm_used: SeparationAlgorithm,
    /// Wall-clock processing time
    pub processing_time_ms: f32,
}

/// Multi-algorithm source separation engine
pub struct SourceSeparationEngine {
    config: SeparationConfig,
    sample_rate: f32,
    algorithm: SeparationAlgorithm,
    aggressiveness: f32,
    transform: SpectralTransform,
    /// Registered profiles in registration order
    profiles: Vec<SourceProfile>,
    /// Adaptive subtraction filters per profile
    adaptive_filters: HashMap<String, Vec<f32>>,
    /// ICA stand-in weights per profile
    ica_weights: HashMap<String, [f32; ICA_TAPS]>,
    rng: ChaCha8Rng,
    /// Recent processing times (ms)
    timings: VecDeque<f32>,
}

impl SourceSeparationEngine {
    /// Create engine; fails on an unknown algorithm name or invalid FFT size
    pub fn new(config: SeparationConfig, sample_rate: f32) -> ExtractResult<Self> {
        let algorithm = config.algorithm()?;
        let transform = SpectralTransform::new(config.fft_size, sample_rate)?;
        Ok(Self {
            aggressiveness: config.aggressiveness.clamp(MIN_AGGRESSIVENESS, MAX_AGGRESSIVENESS),
            rng: ChaCha8Rng::seed_from_u64(config.ica_seed),
            timings: VecDeque::with_capacity(config.timing_window.max(1)),
            sample_rate,
            algorithm,
            transform,
            profiles: Vec::new(),
            adaptive_filters: HashMap::new(),
            ica_weights: HashMap::new(),
            config,
        })
    }

    /// Register (or replace) a source profile
    pub fn register_profile(&mut self, profile: SourceProfile) {
        self.adaptive_filters.remove(&profile.id);
        self.ica_weights.remove(&profile.id);
        if let Some(existing) = self.profiles.iter_mut().find(|p| p.id == profile.id) {
            *existing = profile;
        } else {
            log::debug!("Registered source profile '{}'", profile.id);
            self.profiles.push(profile);
        }
    }

    /// Remove a profile; returns whether it existed
    pub fn unregister_profile(&mut self, id: &str) -> bool {
        self.adaptive_filters.remove(id);
        self.ica_weights.remove(id);
        let before = self.profiles.len();
        self.profiles.retain(|p| p.id != id);
        before != self.profiles.len()
    }

    /// Registered ids in registration order
    pub fn profile_ids(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.id.as_str()).collect()
    }

    /// Active algorithm
    pub fn algorithm(&self) -> SeparationAlgorithm {
        self.algorithm
    }

    /// Switch algorithm
    pub fn set_algorithm(&mut self, algorithm: SeparationAlgorithm) {
        self.algorithm = algorithm;
    }

    /// Switch algorithm by configuration name
    pub fn set_algorithm_by_name(&mut self, name: &str) -> ExtractResult<()> {
        self.algorithm = name.parse()?;
        Ok(())
    }

    /// Current aggressiveness
    pub fn aggressiveness(&self) -> f32 {
        self.aggressiveness
    }

    /// Set aggressiveness (clamped to 0.3 - 0.9)
    pub fn set_aggressiveness(&mut self, value: f32) {
        self.aggressiveness = value.clamp(MIN_AGGRESSIVENESS, MAX_AGGRESSIVENESS);
    }

    /// Shift aggressiveness by `delta` (clamped)
    pub fn adjust_aggressiveness(&mut self, delta: f32) {
        self.set_aggressiveness(self.aggressiveness + delta);
    }

    /// Mean of the recent processing times
    pub fn average_processing_ms(&self) -> f32 {
        if self.timings.is_empty() {
            0.0
        } else {
            self.timings.iter().sum::<f32>() / self.timings.len() as f32
        }
    }

    /// Separate `target_ids` (all registered sources when `None`) from `mixture`
    pub fn separate(
        &mut self,
        mixture: &[f32],
        target_ids: Option<&[&str]>,
    ) -> ExtractResult<SeparationResult> {
        let start = Instant::now();

        let targets: Vec<usize> = match target_ids {
            Some(ids) => ids
                .iter()
                .map(|id| {
                    self.profiles
                        .iter()
                        .position(|p| p.id == *id)
                        .ok_or_else(|| ExtractError::UnknownSource(id.to_string()))
                })
                .collect::<ExtractResult<_>>()?,
            None => (0..self.profiles.len()).collect(),
        };

        self.ensure_transform(mixture.len())?;
        let n = self.transform.size();
        let mut padded = vec![0.0f32; n];
        padded[..mixture.len()].copy_from_slice(mixture);
        let spectrum = self.transform.forward_spectrum(&padded)?;
        let magnitudes = spectrum.magnitude();

        let mut sources = Vec::with_capacity(targets.len());
        let mut confidences = Vec::with_capacity(targets.len());
        let mut labels = Vec::with_capacity(targets.len());

        for idx in targets {
            let profile = &self.profiles[idx];
            let id = profile.id.clone();
            let (output, confidence) = match self.algorithm {
                SeparationAlgorithm::SpectralMasking => {
                    let gains = self.spectral_mask(&magnitudes, profile);
                    let confidence = energy_weighted_mean(&gains, &magnitudes);
                    (self.resynthesize(&spectrum, &gains, mixture.len())?, confidence)
                }
                SeparationAlgorithm::WienerFilter => {
                    let gains = wiener_filter(&magnitudes);
                    let confidence = mean(&gains);
                    (self.resynthesize(&spectrum, &gains, mixture.len())?, confidence)
                }
                SeparationAlgorithm::AdaptiveSubtraction => {
                    let gains = self.adaptive_filter(idx, &magnitudes);
                    let confidence = mean(&gains);
                    (self.resynthesize(&spectrum, &gains, mixture.len())?, confidence)
                }
                SeparationAlgorithm::Ica => {
                    let confidence = self.profiles[idx].confidence * ICA_CONFIDENCE;
                    (self.ica_stand_in(idx, mixture), confidence)
                }
            };
            sources.push(output);
            confidences.push(confidence.clamp(0.0, 1.0));
            labels.push(id);
        }

        let mixture_energy = analysis::energy(mixture);
        let quality = if mixture_energy <= EPSILON {
            0.0
        } else {
            let separated: f32 = sources.iter().map(|s| analysis::energy(s)).sum();
            (separated / mixture_energy).clamp(0.0, 1.0)
        };

        let processing_time_ms = start.elapsed().as_secs_f32() * 1000.0;
        self.record_timing(processing_time_ms, mixture.len());

        Ok(SeparationResult {
            sources,
            confidences,
            labels,
            quality,
            algorithm_used: self.algorithm,
            processing_time_ms,
        })
    }

    /// Grow the transform when the mixture exceeds the current size
    fn ensure_transform(&mut self, len: usize) -> ExtractResult<()> {
        if len > self.transform.size() {
            let size = len.next_power_of_two();
            log::debug!("Separation transform resized {} -> {size}", self.transform.size());
            self.transform = SpectralTransform::new(size, self.sample_rate)?;
            self.adaptive_filters.clear();
        }
        Ok(())
    }

    fn resynthesize(&self, spectrum: &Spectrum, gains: &[f32], len: usize) -> ExtractResult<Vec<f32>> {
        let mut masked = spectrum.clone();
        masked.apply_gains(gains)?;
        let mut output = self.transform.inverse_spectrum(&masked)?;
        output.truncate(len);
        Ok(output)
    }

    /// Strongest mixture peak inside the profile's f0 range, else the range midpoint
    fn estimate_f0(&self, magnitudes: &[f32], profile: &SourceProfile) -> f32 {
        let (lo, hi) = profile.f0_range;
        self.transform
            .find_peaks(magnitudes, F0_CANDIDATES, 2)
            .into_iter()
            .find(|p| p.frequency >= lo && p.frequency <= hi)
            .map_or_else(|| profile.f0_center(), |p| p.frequency)
    }

    fn spectral_mask(&self, magnitudes: &[f32], profile: &SourceProfile) -> Vec<f32> {
        let f0 = self.estimate_f0(magnitudes, profile);
        let bin_width = self.transform.bin_width();
        let scale = profile.confidence * self.aggressiveness;
        (0..magnitudes.len())
            .map(|i| {
                let hz = i as f32 * bin_width;
                (harmonic_response(f0, hz) * formant_response(hz, &profile.formants) * scale)
                    .clamp(0.0, 1.0)
            })
            .collect()
    }

    fn adaptive_filter(&mut self, idx: usize, magnitudes: &[f32]) -> Vec<f32> {
        let bins = magnitudes.len();
        let bin_width = self.transform.bin_width();
        let rate = self.config.adaptation_rate;
        let profile = &self.profiles[idx];

        let max_mag = magnitudes.iter().copied().fold(0.0f32, f32::max);
        let template_max = profile.spectral_template.iter().copied().fold(0.0f32, f32::max);
        let has_template = template_max > EPSILON;

        let filter = self
            .adaptive_filters
            .entry(profile.id.clone())
            .or_insert_with(|| vec![ADAPTIVE_INITIAL; bins]);
        if filter.len() != bins {
            *filter = vec![ADAPTIVE_INITIAL; bins];
        }

        for (i, f) in filter.iter_mut().enumerate() {
            let hz = i as f32 * bin_width;
            let formant = formant_response(hz, &profile.formants);
            let target = if has_template {
                0.5 * (formant
                    + masks::template_at(&profile.spectral_template, template_max, i, bins))
            } else {
                formant
            };
            let current = if max_mag > EPSILON { magnitudes[i] / max_mag } else { 0.0 };
            *f = (*f + rate * (target - current)).clamp(0.0, 1.0);
        }
        filter.clone()
    }

    fn ica_stand_in(&mut self, idx: usize, mixture: &[f32]) -> Vec<f32> {
        let id = self.profiles[idx].id.clone();
        let rng = &mut self.rng;
        let weights = *self.ica_weights.entry(id).or_insert_with(|| {
            let mut w = [0.0f32; ICA_TAPS];
            for v in &mut w {
                *v = rng.random_range(-1.0f32..1.0);
            }
            let l1: f32 = w.iter().map(|v| v.abs()).sum();
            if l1 > EPSILON {
                for v in &mut w {
                    *v /= l1;
                }
            }
            w
        });

        (0..mixture.len())
            .map(|n| {
                weights
                    .iter()
                    .enumerate()
                    .filter(|(k, _)| *k <= n)
                    .map(|(k, w)| w * mixture[n - k])
                    .sum()
            })
            .collect()
    }

    /// Keep the timing window and tune aggressiveness against the frame period
    fn record_timing(&mut self, elapsed_ms: f32, frame_len: usize) {
        let window = self.config.timing_window.max(1);
        while self.timings.len() >= window {
            self.timings.pop_front();
        }
        self.timings.push_back(elapsed_ms);

        if !self.config.self_tuning || frame_len == 0 {
            return;
        }
        let period_ms = frame_len as f32 / self.sample_rate * 1000.0;
        let average = self.average_processing_ms();
        let before = self.aggressiveness;
        if average > SLOW_RATIO * period_ms {
            self.aggressiveness = (self.aggressiveness - AGGRESSIVENESS_DOWN).max(MIN_AGGRESSIVENESS);
        } else if average < FAST_RATIO * period_ms {
            self.aggressiveness = (self.aggressiveness + AGGRESSIVENESS_UP).min(MAX_AGGRESSIVENESS);
        }
        if self.aggressiveness != before {
            log::debug!(
                "Separation aggressiveness {before:.2} -> {:.2} ({average:.2} ms of {period_ms:.2} ms)",
                self.aggressiveness
            );
        }
    }
}

/// `S^2 / (S^2 + N^2)` with N the 25th-percentile magnitude
fn wiener_filter(magnitudes: &[f32]) -> Vec<f32> {
    let noise = percentile(magnitudes, WIENER_NOISE_PERCENTILE);
    let noise_power = noise * noise;
    magnitudes
        .iter()
        .map(|&m| {
            let signal = m * m;
            let total = signal + noise_power;
            if total <= EPSILON { 0.0 } else { signal / total }
        })
        .collect()
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

/// Mask weighted by bin power
fn energy_weighted_mean(mask: &[f32], magnitudes: &[f32]) -> f32 {
    let total: f32 = magnitudes.iter().map(|m| m * m).sum();
    if total <= EPSILON {
        return 0.0;
    }
    mask.iter()
        .zip(magnitudes)
        .map(|(g, m)| g * m * m)
        .sum::<f32>()
        / total
}
