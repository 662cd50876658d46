//! Voice and source profiles
//!
//! Features:
//! - `VoiceProfiler` seam for voice-print training and matching
//! - `SpectralVoiceProfiler`: band-energy template, autocorrelation pitch,
//!   peak-picked formants
//! - `SourceProfile` consumed by the separation engine

use crate::error::{ExtractError, ExtractResult};
use serde::{Deserialize, Serialize};
use vx_dsp::{SpectralTransform, WindowType};

// ============ Constants ============

/// Pitch search range (Hz)
const MIN_F0_HZ: f32 = 60.0;
const MAX_F0_HZ: f32 = 400.0;

/// Normalised autocorrelation needed to call a frame voiced
const VOICING_THRESHOLD: f32 = 0.3;

/// Formant search range (Hz)
const FORMANT_MIN_HZ: f32 = 200.0;
const FORMANT_MAX_HZ: f32 = 4000.0;

/// Formants used when none can be measured
const DEFAULT_FORMANTS: [f32; 4] = [500.0, 1500.0, 2500.0, 3500.0];

/// f0 range used when no frame was voiced
const DEFAULT_F0_RANGE: (f32, f32) = (80.0, 300.0);

/// Weight of template similarity in the match confidence
const SIMILARITY_WEIGHT: f32 = 0.8;

const EPSILON: f32 = 1e-10;

/// Kind of sound a profile describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Human speech
    Voice,
    /// Musical instrument
    Music,
    /// Stationary noise
    Noise,
    /// Anything else
    Other,
}

/// Description of a source the separation engine can isolate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProfile {
    /// Unique id
    pub id: String,
    /// Fundamental frequency range (Hz)
    pub f0_range: (f32, f32),
    /// First four formant frequencies (Hz, 0 = unknown)
    pub formants: [f32; 4],
    /// Coarse magnitude template (any length)
    pub spectral_template: Vec<f32>,
    /// Source kind
    pub source_type: SourceType,
    /// Profile reliability (0.0 - 1.0)
    pub confidence: f32,
}

impl SourceProfile {
    /// Voice profile without a spectral template
    pub fn voice(id: impl Into<String>, f0_range: (f32, f32), formants: [f32; 4]) -> Self {
        Self {
            id: id.into(),
            f0_range,
            formants,
            spectral_template: Vec::new(),
            source_type: SourceType::Voice,
            confidence: 1.0,
        }
    }

    /// Midpoint of the f0 range
    pub fn f0_center(&self) -> f32 {
        0.5 * (self.f0_range.0 + self.f0_range.1)
    }
}

/// Trained voice print
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    /// Unique id
    pub id: String,
    /// Mean fundamental frequency (Hz)
    pub f0_hz: f32,
    /// Observed f0 range (Hz)
    pub f0_range: (f32, f32),
    /// Mean formants (Hz)
    pub formants: [f32; 4],
    /// L2-normalised band-energy template
    pub template: Vec<f32>,
    /// Frames the profile was built from
    pub frame_count: usize,
    /// Sample rate of the training audio
    pub sample_rate: f32,
}

impl From<&VoiceProfile> for SourceProfile {
    fn from(voice: &VoiceProfile) -> Self {
        SourceProfile {
            id: voice.id.clone(),
            f0_range: voice.f0_range,
            formants: voice.formants,
            spectral_template: voice.template.clone(),
            source_type: SourceType::Voice,
            confidence: 1.0,
        }
    }
}

/// Outcome of matching one frame against a profile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Confidence reached the threshold
    pub is_match: bool,
    /// Combined confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Template similarity (0.0 - 1.0)
    pub similarity: f32,
}

/// Voice-print trainer and matcher
pub trait VoiceProfiler: Send + Sync {
    /// Score `frame` against `profile`
    fn match_frame(&self, frame: &[f32], profile: &VoiceProfile, threshold: f32) -> MatchResult;

    /// Build a profile from training frames
    fn build_profile(&self, id: &str, frames: &[Vec<f32>]) -> ExtractResult<VoiceProfile>;
}

/// Per-frame voice features
#[derive(Debug, Clone)]
struct VoiceFeatures {
    template: Vec<f32>,
    f0: Option<f32>,
    formants: [f32; 4],
}

/// Reference voice profiler working on a single short-time spectrum
#[derive(Debug, Clone)]
pub struct SpectralVoiceProfiler {
    sample_rate: f32,
    transform: SpectralTransform,
    window: Vec<f32>,
    bands: usize,
    max_band_hz: f32,
}

impl SpectralVoiceProfiler {
    /// 1024-point analysis with 32 bands up to 8 kHz
    pub fn new(sample_rate: f32) -> ExtractResult<Self> {
        Self::with_params(sample_rate, 1024, 32)
    }

    /// Custom FFT size and band count
    pub fn with_params(sample_rate: f32, fft_size: usize, bands: usize) -> ExtractResult<Self> {
        if bands == 0 {
            return Err(ExtractError::InvalidConfig("band count must be > 0".into()));
        }
        let transform = SpectralTransform::new(fft_size, sample_rate)?;
        Ok(Self {
            sample_rate,
            window: WindowType::Hann.generate(fft_size),
            transform,
            bands,
            max_band_hz: (sample_rate / 2.0).min(8000.0),
        })
    }

    fn features(&self, frame: &[f32]) -> VoiceFeatures {
        let n = self.transform.size();
        let mut buffer = vec![0.0f32; n];
        let len = frame.len().min(n);
        for ((b, &s), &w) in buffer.iter_mut().zip(&frame[..len]).zip(&self.window) {
            *b = s * w;
        }

        let magnitudes = match self.transform.forward(&buffer) {
            Ok((re, im)) => SpectralTransform::magnitude_spectrum(&re, &im),
            Err(_) => vec![0.0; n / 2],
        };

        VoiceFeatures {
            template: self.band_template(&magnitudes),
            f0: self.estimate_f0(&frame[..len]),
            formants: self.estimate_formants(&magnitudes),
        }
    }

    /// Mean magnitude per linear band, L2-normalised
    fn band_template(&self, magnitudes: &[f32]) -> Vec<f32> {
        let max_bin = ((self.max_band_hz / self.transform.bin_width()) as usize).clamp(1, magnitudes.len());
        let mut template = vec![0.0f32; self.bands];
        let mut counts = vec![0usize; self.bands];
        for (i, &m) in magnitudes[..max_bin].iter().enumerate() {
            let band = (i * self.bands / max_bin).min(self.bands - 1);
            template[band] += m;
            counts[band] += 1;
        }
        for (t, &c) in template.iter_mut().zip(&counts) {
            if c > 0 {
                *t /= c as f32;
            }
        }
        normalize(&mut template);
        template
    }

    /// Autocorrelation pitch in [60, 400] Hz
    fn estimate_f0(&self, frame: &[f32]) -> Option<f32> {
        let min_lag = (self.sample_rate / MAX_F0_HZ) as usize;
        let max_lag = ((self.sample_rate / MIN_F0_HZ) as usize).min(frame.len().saturating_sub(1));
        if min_lag == 0 || min_lag >= max_lag {
            return None;
        }

        let r0: f32 = frame.iter().map(|s| s * s).sum();
        if r0 <= EPSILON {
            return None;
        }

        let mut best_lag = 0;
        let mut best = 0.0f32;
        for lag in min_lag..=max_lag {
            let r: f32 = frame[..frame.len() - lag]
                .iter()
                .zip(&frame[lag..])
                .map(|(a, b)| a * b)
                .sum();
            let normalized = r / r0;
            if normalized > best {
                best = normalized;
                best_lag = lag;
            }
        }

        (best > VOICING_THRESHOLD && best_lag > 0).then(|| self.sample_rate / best_lag as f32)
    }

    /// Four strongest envelope peaks between 200 Hz and 4 kHz, ascending
    fn estimate_formants(&self, magnitudes: &[f32]) -> [f32; 4] {
        let bin_width = self.transform.bin_width();
        let lo = (FORMANT_MIN_HZ / bin_width) as usize;
        let hi = ((FORMANT_MAX_HZ / bin_width) as usize).min(magnitudes.len());
        let mut formants = DEFAULT_FORMANTS;
        if lo >= hi {
            return formants;
        }

        // Smooth out harmonics so peaks follow the envelope
        let half = 4usize;
        let mut envelope = vec![0.0f32; magnitudes.len()];
        for i in lo..hi {
            let a = i.saturating_sub(half);
            let b = (i + half + 1).min(magnitudes.len());
            envelope[i] = magnitudes[a..b].iter().sum::<f32>() / (b - a) as f32;
        }

        let min_distance = ((200.0 / bin_width) as usize).max(1);
        let mut peaks: Vec<f32> = self
            .transform
            .find_peaks(&envelope, 4, min_distance)
            .into_iter()
            .map(|p| p.frequency)
            .collect();
        peaks.sort_by(|a, b| a.total_cmp(b));

        for (slot, hz) in formants.iter_mut().zip(peaks) {
            *slot = hz;
        }
        formants
    }
}

impl VoiceProfiler for SpectralVoiceProfiler {
    fn match_frame(&self, frame: &[f32], profile: &VoiceProfile, threshold: f32) -> MatchResult {
        let features = self.features(frame);
        let similarity = cosine_similarity(&features.template, &profile.template).max(0.0);

        let pitch_score = match features.f0 {
            Some(f0) if profile.f0_hz > 0.0 => {
                (-(f0 - profile.f0_hz).abs() / (0.2 * profile.f0_hz)).exp()
            }
            _ => 0.5,
        };

        let confidence =
            (SIMILARITY_WEIGHT * similarity + (1.0 - SIMILARITY_WEIGHT) * pitch_score).clamp(0.0, 1.0);
        MatchResult {
            is_match: confidence >= threshold,
            confidence,
            similarity,
        }
    }

    fn build_profile(&self, id: &str, frames: &[Vec<f32>]) -> ExtractResult<VoiceProfile> {
        if frames.is_empty() {
            return Err(ExtractError::NoTrainingData);
        }

        let mut template = vec![0.0f32; self.bands];
        let mut formant_sum = [0.0f32; 4];
        let mut f0s = Vec::new();
        for frame in frames {
            let features = self.features(frame);
            for (t, f) in template.iter_mut().zip(&features.template) {
                *t += f;
            }
            for (s, f) in formant_sum.iter_mut().zip(features.formants) {
                *s += f;
            }
            f0s.extend(features.f0);
        }
        normalize(&mut template);

        let count = frames.len() as f32;
        let formants = formant_sum.map(|s| s / count);

        let (f0_hz, f0_range) = if f0s.is_empty() {
            (0.5 * (DEFAULT_F0_RANGE.0 + DEFAULT_F0_RANGE.1), DEFAULT_F0_RANGE)
        } else {
            let mean = f0s.iter().sum::<f32>() / f0s.len() as f32;
            let min = f0s.iter().copied().fold(f32::INFINITY, f32::min);
            let max = f0s.iter().copied().fold(0.0f32, f32::max);
            (mean, (0.9 * min, 1.1 * max))
        };

        log::info!(
            "Voice profile '{id}' built from {} frames (f0 {f0_hz:.1} Hz, {} voiced)",
            frames.len(),
            f0s.len()
        );

        Ok(VoiceProfile {
            id: id.to_string(),
            f0_hz,
            f0_range,
            formants,
            template,
            frame_count: frames.len(),
            sample_rate: self.sample_rate,
        })
    }
}

/// Scale to unit L2 norm (no-op for silence)
fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity; 0 when either vector is silent
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na <= EPSILON || nb <= EPSILON {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const SR: f32 = 16000.0;

    /// Harmonic series with a spectral tilt
    fn voice(f0: f32, tilt: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f32 / SR;
                (1..=10)
                    .map(|h| 0.3 * tilt.powi(h - 1) * (2.0 * PI * f0 * h as f32 * t).sin())
                    .sum()
            })
            .collect()
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_build_requires_frames() {
        let profiler = SpectralVoiceProfiler::new(SR).unwrap();
        assert!(matches!(
            profiler.build_profile("x", &[]),
            Err(ExtractError::NoTrainingData)
        ));
    }

    #[test]
    fn test_pitch_estimate() {
        let profiler = SpectralVoiceProfiler::new(SR).unwrap();
        let f0 = profiler.estimate_f0(&voice(150.0, 0.7, 1024)).unwrap();
        assert!((f0 - 150.0).abs() < 5.0, "{f0}");
        assert!(profiler.estimate_f0(&[0.0; 1024]).is_none());
    }

    #[test]
    fn test_own_voice_matches_better_than_other() {
        let profiler = SpectralVoiceProfiler::new(SR).unwrap();
        let frames: Vec<Vec<f32>> = (0..5).map(|_| voice(120.0, 0.6, 1024)).collect();
        let profile = profiler.build_profile("alice", &frames).unwrap();

        assert_eq!(profile.frame_count, 5);
        assert!((profile.f0_hz - 120.0).abs() < 5.0);
        let norm: f32 = profile.template.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);

        let own = profiler.match_frame(&voice(120.0, 0.6, 1024), &profile, 0.5);
        let other = profiler.match_frame(&voice(260.0, 0.95, 1024), &profile, 0.5);
        assert!(own.is_match);
        assert!(own.confidence > other.confidence);
    }

    #[test]
    fn test_source_profile_from_voice() {
        let voice = VoiceProfile {
            id: "v".into(),
            f0_hz: 110.0,
            f0_range: (90.0, 130.0),
            formants: [700.0, 1200.0, 2600.0, 3400.0],
            template: vec![1.0],
            frame_count: 1,
            sample_rate: SR,
        };
        let source = SourceProfile::from(&voice);
        assert_eq!(source.id, "v");
        assert_eq!(source.source_type, SourceType::Voice);
        assert_eq!(source.f0_center(), 110.0);
    }
}
