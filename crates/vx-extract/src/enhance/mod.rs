//! Spectral enhancement - learn and suppress background noise
//!
//! Features:
//! - Streaming overlap-add with one window of latency
//! - Noise profile learning from noise-only frames
//! - Environment classification with template noise profiles
//! - Psychoacoustic masking before subtraction
//! - Over-subtraction with spectral floor and gain smoothing
//! - Musical noise suppression
//! - Quality-driven aggressiveness tuning

pub mod environment;
pub mod psychoacoustic;
pub mod subtraction;

pub use environment::{EnvironmentAnalysis, EnvironmentClass, EnvironmentProfile};
pub use psychoacoustic::{BarkMaskingModel, PsychoacousticModel};
pub use subtraction::{MusicalNoiseSuppressor, enhanced_spectral_subtraction, subtraction_floor};

use crate::error::{ExtractError, ExtractResult};
use crate::noise::{NoiseProfile, NoiseProfileLearner};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use vx_dsp::{FrameConfig, OverlapAddStream, SpectralTransform};

// ============ Constants ============

/// Aggressiveness bounds
const MIN_AGGRESSIVENESS: f32 = 0.2;
const MAX_AGGRESSIVENESS: f32 = 0.9;

/// Quality samples kept for tuning
const QUALITY_HISTORY: usize = 20;

/// Recent quality samples compared against the full history
const QUALITY_RECENT: usize = 5;

/// Quality deviation that triggers a tuning step
const QUALITY_DEVIATION: f32 = 0.1;

/// Aggressiveness step when quality drops
const AGGRESSIVENESS_DOWN: f32 = 0.05;

/// Aggressiveness step when quality improves
const AGGRESSIVENESS_UP: f32 = 0.02;

const EPSILON: f32 = 1e-10;

/// Enhancer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancerConfig {
    /// Framing (window size is also the FFT size)
    pub frame: FrameConfig,
    /// Over-subtraction factor (0.2 - 0.9)
    pub aggressiveness: f32,
    /// Gain smoothing weight across neighbouring bins (0.0 - 1.0)
    pub spectral_smoothing: f32,
    /// Noise learning history capacity (frames)
    pub max_history_frames: usize,
    /// Classify the environment every frame
    pub environment_adaptation: bool,
    /// Nudge environment templates toward observed tonal bins
    pub adaptive_environment_learning: bool,
    /// Classification confidence needed to switch environment
    pub environment_switch_threshold: f32,
    /// Apply psychoacoustic masking before subtraction
    pub psychoacoustic_masking: bool,
    /// Suppress fluctuating residual tones
    pub musical_noise_suppression: bool,
    /// Spectral flux variance that engages suppression
    pub musical_noise_threshold: f32,
    /// Tune aggressiveness from the quality estimate
    pub adaptive_optimization: bool,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            aggressiveness: 0.7,
            spectral_smoothing: 0.5,
            max_history_frames: 100,
            environment_adaptation: false,
            adaptive_environment_learning: false,
            environment_switch_threshold: 0.7,
            psychoacoustic_masking: true,
            musical_noise_suppression: true,
            musical_noise_threshold: 0.01,
            adaptive_optimization: true,
        }
    }
}

/// Enhancer statistics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancerStats {
    /// Analysis frames run through the pipeline
    pub frames_processed: u64,
    /// Active environment
    pub environment: EnvironmentClass,
    /// Current aggressiveness
    pub aggressiveness: f32,
    /// Current spectral smoothing
    pub spectral_smoothing: f32,
    /// Most recent quality estimate
    pub last_quality: Option<f32>,
    /// Noise learning in progress
    pub learning: bool,
    /// A noise profile is active
    pub has_noise_profile: bool,
}

/// Spectral noise reducer.
///
/// Blocks submitted to [`SpectralEnhancer::process`] form one continuous
/// stream; output lags input by [`SpectralEnhancer::latency`] samples.
pub struct SpectralEnhancer {
    stream: OverlapAddStream,
    pipeline: EnhancementPipeline,
}

/// Per-analysis-frame state, kept apart from the stream so both can be
/// borrowed while overlap-adding
struct EnhancementPipeline {
    config: EnhancerConfig,
    transform: SpectralTransform,
    learner: NoiseProfileLearner,
    model: Box<dyn PsychoacousticModel>,
    environments: Vec<EnvironmentProfile>,
    environment: EnvironmentClass,
    aggressiveness: f32,
    spectral_smoothing: f32,
    previous_spectrum: Option<Vec<f32>>,
    musical: MusicalNoiseSuppressor,
    quality_history: VecDeque<f32>,
    last_quality: Option<f32>,
    frames_processed: u64,
}

impl SpectralEnhancer {
    /// Create enhancer with the Bark masking model
    pub fn new(config: EnhancerConfig, sample_rate: f32) -> ExtractResult<Self> {
        let model = BarkMaskingModel::new(sample_rate, config.frame.window_size);
        Self::with_model(config, sample_rate, Box::new(model))
    }

    /// Create enhancer with a caller-supplied masking model
    pub fn with_model(
        config: EnhancerConfig,
        sample_rate: f32,
        model: Box<dyn PsychoacousticModel>,
    ) -> ExtractResult<Self> {
        let stream = OverlapAddStream::new(&config.frame)?;
        let fft_size = config.frame.window_size;
        let transform = SpectralTransform::new(fft_size, sample_rate)?;
        let learner = NoiseProfileLearner::new(
            fft_size / 2,
            sample_rate,
            stream.hop_size(),
            config.max_history_frames,
        );

        let pipeline = EnhancementPipeline {
            aggressiveness: config.aggressiveness.clamp(MIN_AGGRESSIVENESS, MAX_AGGRESSIVENESS),
            spectral_smoothing: config.spectral_smoothing.clamp(0.0, 1.0),
            musical: MusicalNoiseSuppressor::new(config.musical_noise_threshold),
            environments: EnvironmentProfile::all(fft_size, sample_rate),
            environment: EnvironmentClass::Unknown,
            transform,
            learner,
            model,
            previous_spectrum: None,
            quality_history: VecDeque::with_capacity(QUALITY_HISTORY),
            last_quality: None,
            frames_processed: 0,
            config,
        };

        Ok(Self { stream, pipeline })
    }

    /// Denoise the next block of the stream; output has the input's length.
    ///
    /// While learning or without a noise profile the delayed input comes back
    /// unmodified.
    pub fn process(&mut self, input: &[f32]) -> ExtractResult<Vec<f32>> {
        let pipeline = &mut self.pipeline;
        self.stream
            .process(input, |frame| pipeline.process_frame(frame, false))
    }

    /// Advance the stream without denoising; noise learning still sees the frames
    pub fn pass_through(&mut self, input: &[f32]) -> ExtractResult<Vec<f32>> {
        let pipeline = &mut self.pipeline;
        self.stream
            .process(input, |frame| pipeline.process_frame(frame, true))
    }

    /// Samples between input and output
    pub fn latency(&self) -> usize {
        self.stream.latency()
    }

    /// Run the magnitude pipeline on one spectrum (N/2 bins)
    pub fn process_spectrum(&mut self, magnitudes: &[f32]) -> ExtractResult<Vec<f32>> {
        self.pipeline.process_magnitudes(magnitudes)
    }

    /// Start learning the noise profile from the next frames
    pub fn start_learning(&mut self, duration_ms: u32) {
        self.pipeline.learner.start_learning(duration_ms);
    }

    /// Finish learning with the frames collected so far
    pub fn stop_learning(&mut self) -> Option<&NoiseProfile> {
        self.pipeline.learner.stop_learning()
    }

    /// True while noise learning is running
    pub fn is_learning(&self) -> bool {
        self.pipeline.learner.is_learning()
    }

    /// Noise learning progress in [0, 1]
    pub fn learning_progress(&self) -> f32 {
        self.pipeline.learner.progress()
    }

    /// Active noise profile
    pub fn noise_profile(&self) -> Option<&NoiseProfile> {
        self.pipeline.learner.profile()
    }

    /// Install a noise profile
    pub fn set_noise_profile(&mut self, profile: NoiseProfile) -> ExtractResult<()> {
        let bins = self.pipeline.transform.size() / 2;
        if profile.bins() != bins {
            return Err(ExtractError::InvalidConfig(format!(
                "noise profile has {} bins, expected {bins}",
                profile.bins()
            )));
        }
        self.pipeline.learner.set_profile(profile);
        Ok(())
    }

    /// Current aggressiveness
    pub fn aggressiveness(&self) -> f32 {
        self.pipeline.aggressiveness
    }

    /// Set aggressiveness (clamped to 0.2 - 0.9)
    pub fn set_aggressiveness(&mut self, value: f32) {
        self.pipeline.aggressiveness = value.clamp(MIN_AGGRESSIVENESS, MAX_AGGRESSIVENESS);
    }

    /// Shift aggressiveness by `delta` (clamped)
    pub fn adjust_aggressiveness(&mut self, delta: f32) {
        self.set_aggressiveness(self.pipeline.aggressiveness + delta);
    }

    /// Current spectral smoothing
    pub fn spectral_smoothing(&self) -> f32 {
        self.pipeline.spectral_smoothing
    }

    /// Active environment
    pub fn environment(&self) -> EnvironmentClass {
        self.pipeline.environment
    }

    /// Analyse a magnitude spectrum without changing state
    pub fn analyze_environment(&self, magnitudes: &[f32]) -> EnvironmentAnalysis {
        environment::analyze(
            magnitudes,
            self.pipeline.transform.bin_width(),
            &self.pipeline.environments,
        )
    }

    /// Statistics snapshot
    pub fn stats(&self) -> EnhancerStats {
        let p = &self.pipeline;
        EnhancerStats {
            frames_processed: p.frames_processed,
            environment: p.environment,
            aggressiveness: p.aggressiveness,
            spectral_smoothing: p.spectral_smoothing,
            last_quality: p.last_quality,
            learning: p.learner.is_learning(),
            has_noise_profile: p.learner.profile().is_some(),
        }
    }

    /// Clear temporal state and the stream history; the noise profile is kept
    pub fn reset(&mut self) {
        self.stream.reset();
        let p = &mut self.pipeline;
        p.previous_spectrum = None;
        p.musical.reset();
        p.quality_history.clear();
        p.last_quality = None;
        p.frames_processed = 0;
    }
}

impl EnhancementPipeline {
    /// Transform one windowed frame, process its magnitudes and resynthesise
    fn process_frame(&mut self, frame: &[f32], bypass: bool) -> ExtractResult<Vec<f32>> {
        if !self.learner.is_learning() && (bypass || self.learner.profile().is_none()) {
            return Ok(frame.to_vec());
        }

        let mut spectrum = self.transform.forward_spectrum(frame)?;
        let magnitudes = spectrum.magnitude();

        if self.learner.is_learning() {
            self.learner.push_frame(&magnitudes)?;
            return Ok(frame.to_vec());
        }

        let processed = self.process_magnitudes(&magnitudes)?;
        let gains: Vec<f32> = magnitudes
            .iter()
            .zip(&processed)
            .map(|(&m, &p)| if m > EPSILON { (p / m).min(1.0) } else { 1.0 })
            .collect();

        spectrum.apply_gains(&gains)?;
        Ok(self.transform.inverse_spectrum(&spectrum)?)
    }

    /// Per-frame magnitude pipeline
    fn process_magnitudes(&mut self, magnitudes: &[f32]) -> ExtractResult<Vec<f32>> {
        if self.config.environment_adaptation {
            self.adapt_environment(magnitudes);
        }

        let Some(profile) = self.learner.profile() else {
            return Ok(magnitudes.to_vec());
        };
        if profile.bins() != magnitudes.len() {
            return Err(ExtractError::Dsp(vx_dsp::DspError::SizeMismatch {
                expected: profile.bins(),
                got: magnitudes.len(),
            }));
        }
        let noise = &profile.magnitude;

        let needs_thresholds = self.config.psychoacoustic_masking || self.config.adaptive_optimization;
        let thresholds = if needs_thresholds {
            self.model
                .masking_thresholds(magnitudes, self.previous_spectrum.as_deref())
        } else {
            Vec::new()
        };

        let masked: Vec<f32> = if self.config.psychoacoustic_masking {
            let factors = self.model.reduction_factors(magnitudes, noise, &thresholds);
            magnitudes.iter().zip(&factors).map(|(m, f)| m * f).collect()
        } else {
            magnitudes.to_vec()
        };

        let mut processed = enhanced_spectral_subtraction(
            &masked,
            noise,
            self.aggressiveness,
            self.spectral_smoothing,
            self.transform.bin_width(),
        );

        if self.config.musical_noise_suppression && self.musical.process(magnitudes, &mut processed) {
            log::debug!("Musical noise suppression engaged");
        }

        if self.config.adaptive_optimization {
            let quality = self.model.quality(magnitudes, &processed, &thresholds);
            self.record_quality(quality);
        }

        self.previous_spectrum = Some(magnitudes.to_vec());
        self.frames_processed += 1;
        Ok(processed)
    }

    /// Classify the frame and switch or adapt the noise template
    fn adapt_environment(&mut self, magnitudes: &[f32]) {
        let analysis = environment::analyze(magnitudes, self.transform.bin_width(), &self.environments);

        if analysis.confidence > self.config.environment_switch_threshold
            && analysis.class != self.environment
        {
            if let (Some(template), Some((aggressiveness, smoothing))) = (
                self.environments.iter().find(|p| p.class == analysis.class),
                analysis.class.defaults(),
            ) {
                log::info!(
                    "Environment switched {:?} -> {:?} (confidence {:.2})",
                    self.environment,
                    analysis.class,
                    analysis.confidence
                );
                self.learner
                    .set_profile(NoiseProfile::from_magnitudes(template.magnitude.clone()));
                self.environment = analysis.class;
                self.aggressiveness = aggressiveness;
                self.spectral_smoothing = smoothing;
            }
        }

        if self.config.adaptive_environment_learning && !analysis.tonal_bins.is_empty() {
            let current = self.environment;
            if let Some(template) = self.environments.iter_mut().find(|p| p.class == current) {
                template.adapt(magnitudes, &analysis.tonal_bins);
            }
        }
    }

    /// Push a quality sample and nudge aggressiveness on a sustained change
    fn record_quality(&mut self, quality: f32) {
        self.last_quality = Some(quality);
        if self.quality_history.len() == QUALITY_HISTORY {
            self.quality_history.pop_front();
        }
        self.quality_history.push_back(quality);

        if self.quality_history.len() < QUALITY_RECENT {
            return;
        }

        let overall = self.quality_history.iter().sum::<f32>() / self.quality_history.len() as f32;
        let recent = self.quality_history.iter().rev().take(QUALITY_RECENT).sum::<f32>()
            / QUALITY_RECENT as f32;

        let before = self.aggressiveness;
        if recent < overall - QUALITY_DEVIATION {
            self.aggressiveness = (self.aggressiveness - AGGRESSIVENESS_DOWN).max(MIN_AGGRESSIVENESS);
        } else if recent > overall + QUALITY_DEVIATION {
            self.aggressiveness = (self.aggressiveness + AGGRESSIVENESS_UP).min(MAX_AGGRESSIVENESS);
        }
        if self.aggressiveness != before {
            log::debug!(
                "Enhancer aggressiveness {before:.2} -> {:.2} (recent quality {recent:.2}, overall {overall:.2})",
                self.aggressiveness
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vx_dsp::WindowType;

    fn small_config() -> EnhancerConfig {
        EnhancerConfig {
            frame: FrameConfig {
                window_size: 256,
                overlap_ratio: 0.5,
                window: WindowType::Hann,
            },
            ..Default::default()
        }
    }

    fn assert_delayed(input: &[f32], output: &[f32], latency: usize) {
        assert_eq!(output.len(), input.len());
        for i in latency..input.len() {
            assert!((output[i] - input[i - latency]).abs() < 1e-4, "sample {i}");
        }
    }

    #[test]
    fn test_passthrough_without_profile() {
        let mut enhancer = SpectralEnhancer::new(small_config(), 16000.0).unwrap();
        assert_eq!(enhancer.latency(), 256);
        let input: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin()).collect();
        let output = enhancer.process(&input).unwrap();
        assert!(output[..256].iter().all(|&s| s.abs() < 1e-6));
        assert_delayed(&input, &output, 256);
    }

    #[test]
    fn test_learning_passes_audio_through() {
        let mut enhancer = SpectralEnhancer::new(small_config(), 16000.0).unwrap();
        enhancer.start_learning(1000);
        let input: Vec<f32> = (0..1024).map(|i| 0.1 * (i as f32 * 0.3).sin()).collect();
        let output = enhancer.process(&input).unwrap();
        assert_delayed(&input, &output, 256);
        assert!(enhancer.is_learning());
    }

    #[test]
    fn test_learning_counts_every_hop() {
        let mut enhancer = SpectralEnhancer::new(small_config(), 16000.0).unwrap();
        // 64 ms at hop 128 -> 8 frames
        enhancer.start_learning(64);
        enhancer.process(&vec![0.01; 512]).unwrap();
        assert!(enhancer.is_learning());
        enhancer.process(&vec![0.01; 512]).unwrap();
        assert!(!enhancer.is_learning());
        assert_eq!(enhancer.noise_profile().unwrap().frame_count, 8);
    }

    #[test]
    fn test_zero_noise_profile_is_transparent_across_blocks() {
        let mut enhancer = SpectralEnhancer::new(small_config(), 16000.0).unwrap();
        enhancer
            .set_noise_profile(NoiseProfile::from_magnitudes(vec![0.0; 128]))
            .unwrap();
        let input: Vec<f32> = (0..2048)
            .map(|i| 0.6 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin())
            .collect();
        let mut output = Vec::new();
        for block in input.chunks(100) {
            output.extend(enhancer.process(block).unwrap());
        }
        assert_delayed(&input, &output, 256);
    }

    #[test]
    fn test_pass_through_keeps_stream_aligned() {
        let mut enhancer = SpectralEnhancer::new(small_config(), 16000.0).unwrap();
        enhancer
            .set_noise_profile(NoiseProfile::from_magnitudes(vec![1.0; 128]))
            .unwrap();
        let input: Vec<f32> = (0..1024).map(|i| 0.3 * (i as f32 * 0.2).sin()).collect();
        let output = enhancer.pass_through(&input).unwrap();
        assert_delayed(&input, &output, 256);
        assert_eq!(enhancer.stats().frames_processed, 0);
    }

    #[test]
    fn test_aggressiveness_clamped() {
        let mut enhancer = SpectralEnhancer::new(small_config(), 16000.0).unwrap();
        enhancer.set_aggressiveness(2.0);
        assert_eq!(enhancer.aggressiveness(), 0.9);
        enhancer.adjust_aggressiveness(-5.0);
        assert_eq!(enhancer.aggressiveness(), 0.2);
    }

    #[test]
    fn test_profile_length_checked() {
        let mut enhancer = SpectralEnhancer::new(small_config(), 16000.0).unwrap();
        assert!(enhancer
            .set_noise_profile(NoiseProfile::from_magnitudes(vec![0.0; 10]))
            .is_err());
        assert!(enhancer
            .set_noise_profile(NoiseProfile::from_magnitudes(vec![0.0; 128]))
            .is_ok());
    }

    #[test]
    fn test_spectrum_pipeline_reduces_noise_bins() {
        let mut enhancer = SpectralEnhancer::new(small_config(), 16000.0).unwrap();
        enhancer
            .set_noise_profile(NoiseProfile::from_magnitudes(vec![1.0; 128]))
            .unwrap();
        let mut mags = vec![1.0f32; 128];
        mags[40] = 100.0;
        let out = enhancer.process_spectrum(&mags).unwrap();
        assert!(out[100] < 0.5);
        assert!(out[40] > 50.0);
        assert_eq!(enhancer.stats().frames_processed, 1);
    }

    #[test]
    fn test_quality_drop_lowers_aggressiveness() {
        let mut enhancer = SpectralEnhancer::new(small_config(), 16000.0).unwrap();
        let p = &mut enhancer.pipeline;
        for _ in 0..15 {
            p.record_quality(0.9);
        }
        for _ in 0..5 {
            p.record_quality(0.3);
        }
        assert!(enhancer.aggressiveness() < 0.7);
    }

    #[test]
    fn test_environment_switch_installs_template() {
        let config = EnhancerConfig {
            environment_adaptation: true,
            ..small_config()
        };
        let mut enhancer = SpectralEnhancer::new(config, 16000.0).unwrap();
        let vehicle = EnvironmentProfile::build(EnvironmentClass::Vehicle, 256, 16000.0);
        enhancer.process_spectrum(&vehicle.magnitude).unwrap();

        assert_eq!(enhancer.environment(), EnvironmentClass::Vehicle);
        assert_eq!(enhancer.noise_profile().unwrap().magnitude, vehicle.magnitude);
        assert_eq!(enhancer.aggressiveness(), 0.6);
        assert_eq!(enhancer.spectral_smoothing(), 0.75);
    }
}
