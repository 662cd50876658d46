//! vx-extract: Target speaker extraction for VoxTract
//!
//! Isolates one trained speaker from a live, noisy, multi-speaker stream.
//!
//! ## Pipeline
//! frame -> `SpeakerDetector` (identity + activity) -> `SourceSeparationEngine`
//! (isolate target) -> `SpectralEnhancer` (denoise) -> quality feedback
//!
//! ## Modules
//! - `analysis` - Energy, zero-crossing and frame quality heuristics
//! - `noise` - Noise profile learning
//! - `enhance` - Spectral subtraction, masking, environment adaptation
//! - `separation` - Multi-algorithm source separation
//! - `profile` - Voice/source profiles and the voice matcher seam
//! - `detector` - Speaker identity tracking with hysteresis
//! - `orchestrator` - Training/extraction state machine

pub mod analysis;
pub mod detector;
pub mod enhance;
pub mod noise;
pub mod orchestrator;
pub mod profile;
pub mod separation;

mod error;

pub use detector::{DetectionResult, DetectorConfig, DetectorState, IdentityTracker, SpeakerDetector};
pub use enhance::{
    BarkMaskingModel, EnhancerConfig, EnhancerStats, EnvironmentClass, PsychoacousticModel,
    SpectralEnhancer,
};
pub use error::{ExtractError, ExtractResult};
pub use noise::{NoiseProfile, NoiseProfileLearner};
pub use orchestrator::{
    ExtractionOrchestrator, ExtractionResult, ExtractionState, ExtractionStats,
    OrchestratorConfig, ProcessOutcome, TrainingProgress,
};
pub use profile::{
    MatchResult, SourceProfile, SourceType, SpectralVoiceProfiler, VoiceProfile, VoiceProfiler,
};
pub use separation::{
    SeparationAlgorithm, SeparationConfig, SeparationResult, SourceSeparationEngine,
};

use serde::{Deserialize, Serialize};

/// Complete extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Sample rate shared by every component (Hz)
    pub sample_rate: f32,
    /// Training and feedback settings
    pub orchestrator: OrchestratorConfig,
    /// Speaker detection
    pub detector: DetectorConfig,
    /// Source separation
    pub separation: SeparationConfig,
    /// Noise reduction
    pub enhancer: EnhancerConfig,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000.0,
            orchestrator: OrchestratorConfig::default(),
            detector: DetectorConfig::default(),
            separation: SeparationConfig::default(),
            enhancer: EnhancerConfig::default(),
        }
    }
}

impl ExtractConfig {
    /// Parse from JSON; omitted fields take their defaults
    pub fn from_json(json: &str) -> ExtractResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> ExtractResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check ranges and names
    pub fn validate(&self) -> ExtractResult<()> {
        if self.sample_rate.is_nan() || self.sample_rate <= 0.0 {
            return Err(ExtractError::InvalidConfig(format!(
                "sample rate must be > 0, got {}",
                self.sample_rate
            )));
        }

        let window = self.enhancer.frame.window_size;
        if window < 2 || !window.is_power_of_two() {
            return Err(ExtractError::InvalidConfig(format!(
                "enhancer window size must be a power of two, got {window}"
            )));
        }
        if !(0.0..1.0).contains(&self.enhancer.frame.overlap_ratio) {
            return Err(ExtractError::InvalidConfig(format!(
                "overlap ratio must be in [0, 1), got {}",
                self.enhancer.frame.overlap_ratio
            )));
        }

        let fft = self.separation.fft_size;
        if fft < 2 || !fft.is_power_of_two() {
            return Err(ExtractError::InvalidConfig(format!(
                "separation FFT size must be a power of two, got {fft}"
            )));
        }
        self.separation.algorithm()?;

        if self.detector.max_speakers == 0 {
            return Err(ExtractError::InvalidConfig("max_speakers must be > 0".into()));
        }
        if self.detector.confirmation_frames == 0 {
            return Err(ExtractError::InvalidConfig(
                "confirmation_frames must be > 0".into(),
            ));
        }

        Ok(())
    }
}
