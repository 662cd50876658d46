//! Extraction orchestrator
//!
//! Sequences training and extraction over the detector, separator and
//! enhancer, and feeds a running quality estimate from target frames back
//! into their parameters.
//!
//! With target denoising enabled, extraction output lags the input by the
//! enhancer's latency; the mixture is delayed by the same amount so target
//! and interference stay aligned.
//!
//! ```text
//! Idle --start_training--> Training --finalize--> Ready --start_extraction--> Extracting
//!                             |  NoTrainingData: back to Idle/Ready       <--stop_extraction--
//! ```

use crate::analysis;
use crate::detector::SpeakerDetector;
use crate::enhance::{PsychoacousticModel, SpectralEnhancer};
use crate::error::{ExtractError, ExtractResult};
use crate::profile::{SourceProfile, SpectralVoiceProfiler, VoiceProfile, VoiceProfiler};
use crate::separation::SourceSeparationEngine;
use crate::ExtractConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Training length when none is given (ms)
    pub default_training_ms: u32,
    /// Frame quality a training frame must exceed to be kept
    pub training_quality_threshold: f32,
    /// Denoise the separated target
    pub denoise_target: bool,
    /// Separation quality needed before denoising
    pub denoise_min_separation_quality: f32,
    /// Quality below which components are retuned (target frames only)
    pub quality_target: f32,
    /// Detector threshold step on low quality
    pub detector_threshold_step: f32,
    /// Separator aggressiveness step on low quality
    pub separation_aggressiveness_step: f32,
    /// Enhancer aggressiveness step on low quality
    pub enhancer_aggressiveness_step: f32,
    /// Frames kept for statistics
    pub history_len: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_training_ms: 5000,
            training_quality_threshold: 0.5,
            denoise_target: true,
            denoise_min_separation_quality: 0.3,
            quality_target: 0.6,
            detector_threshold_step: 0.02,
            separation_aggressiveness_step: 0.05,
            enhancer_aggressiveness_step: 0.02,
            history_len: 100,
        }
    }
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionState {
    /// No target profile
    Idle,
    /// Collecting training frames
    Training,
    /// Target profile available
    Ready,
    /// Extracting the target from each frame
    Extracting,
}

/// Active training session
#[derive(Debug, Clone)]
struct TrainingSession {
    id: Uuid,
    frames: Vec<Vec<f32>>,
    frames_seen: usize,
    samples_seen: u64,
    target_duration_ms: u32,
    /// State to return to if training fails
    fallback: ExtractionState,
}

/// Training progress report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingProgress {
    /// Session id
    pub session_id: Uuid,
    /// Elapsed share of the target duration (0.0 - 1.0)
    pub progress: f32,
    /// Frames submitted
    pub frames_collected: usize,
    /// Frames kept for profiling
    pub frames_accepted: usize,
    /// Profile built and registered
    pub completed: bool,
}

/// Rolling extraction statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Frames processed while extracting
    pub frames_processed: u64,
    /// Frames attributed to the target
    pub target_frames: u64,
    /// Mean quality over the history
    pub average_quality: f32,
    /// Mean per-frame latency over the history (ms)
    pub average_latency_ms: f32,
    /// Speaker reported on the latest frame
    pub last_speaker: Option<String>,
    /// Current detector threshold
    pub detector_threshold: f32,
    /// Current separation aggressiveness
    pub separation_aggressiveness: f32,
    /// Current enhancer aggressiveness
    pub enhancer_aggressiveness: f32,
}

/// Result for one extraction frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Isolated target speech (silent on non-target frames), delayed by
    /// [`ExtractionOrchestrator::latency_samples`]
    pub target_audio: Vec<f32>,
    /// Delayed mixture minus the target
    pub interfering_audio: Vec<f32>,
    /// Detection confidence for the target
    pub confidence: f32,
    /// Combined quality estimate (0.0 - 1.0)
    pub quality: f32,
    /// Statistics after this frame
    pub stats: ExtractionStats,
}

/// Outcome of [`ExtractionOrchestrator::process`]
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Frame consumed by training
    Training(TrainingProgress),
    /// Frame run through extraction
    Extraction(ExtractionResult),
    /// Not training or extracting; frame ignored
    Bypassed,
}

/// Top-level target speaker extraction
pub struct ExtractionOrchestrator {
    config: OrchestratorConfig,
    sample_rate: f32,
    state: ExtractionState,
    profiler: Arc<dyn VoiceProfiler>,
    detector: SpeakerDetector,
    separator: SourceSeparationEngine,
    enhancer: SpectralEnhancer,
    session: Option<TrainingSession>,
    target: Option<VoiceProfile>,
    /// Mixture delay matching the enhancer latency
    mixture_delay: VecDeque<f32>,
    quality_history: VecDeque<f32>,
    latency_history: VecDeque<f32>,
    frames_processed: u64,
    target_frames: u64,
    last_speaker: Option<String>,
}

impl ExtractionOrchestrator {
    /// Create orchestrator with the reference profiler and masking model
    pub fn new(config: ExtractConfig) -> ExtractResult<Self> {
        config.validate()?;
        let profiler = Arc::new(SpectralVoiceProfiler::new(config.sample_rate)?);
        let enhancer = SpectralEnhancer::new(config.enhancer.clone(), config.sample_rate)?;
        Self::assemble(config, profiler, enhancer)
    }

    /// Create orchestrator with caller-supplied collaborators
    pub fn with_components(
        config: ExtractConfig,
        profiler: Arc<dyn VoiceProfiler>,
        model: Box<dyn PsychoacousticModel>,
    ) -> ExtractResult<Self> {
        config.validate()?;
        let enhancer = SpectralEnhancer::with_model(config.enhancer.clone(), config.sample_rate, model)?;
        Self::assemble(config, profiler, enhancer)
    }

    fn assemble(
        config: ExtractConfig,
        profiler: Arc<dyn VoiceProfiler>,
        enhancer: SpectralEnhancer,
    ) -> ExtractResult<Self> {
        let detector = SpeakerDetector::new(config.detector, config.sample_rate, Arc::clone(&profiler));
        let separator = SourceSeparationEngine::new(config.separation, config.sample_rate)?;
        let history_len = config.orchestrator.history_len.max(1);
        let latency = if config.orchestrator.denoise_target {
            enhancer.latency()
        } else {
            0
        };
        Ok(Self {
            mixture_delay: VecDeque::from(vec![0.0; latency]),
            config: config.orchestrator,
            sample_rate: config.sample_rate,
            state: ExtractionState::Idle,
            profiler,
            detector,
            separator,
            enhancer,
            session: None,
            target: None,
            quality_history: VecDeque::with_capacity(history_len),
            latency_history: VecDeque::with_capacity(history_len),
            frames_processed: 0,
            target_frames: 0,
            last_speaker: None,
        })
    }

    /// Current state
    pub fn state(&self) -> ExtractionState {
        self.state
    }

    /// Trained target profile
    pub fn target_profile(&self) -> Option<&VoiceProfile> {
        self.target.as_ref()
    }

    /// Speaker detector
    pub fn detector(&self) -> &SpeakerDetector {
        &self.detector
    }

    /// Separation engine
    pub fn separator(&self) -> &SourceSeparationEngine {
        &self.separator
    }

    /// Enhancer
    pub fn enhancer(&self) -> &SpectralEnhancer {
        &self.enhancer
    }

    /// Delay of extraction output relative to the submitted frames
    pub fn latency_samples(&self) -> usize {
        if self.config.denoise_target {
            self.enhancer.latency()
        } else {
            0
        }
    }

    /// Begin a training session (default 5000 ms)
    pub fn start_training(&mut self, duration_ms: Option<u32>) -> ExtractResult<Uuid> {
        if self.state == ExtractionState::Training {
            return Err(ExtractError::TrainingInProgress);
        }

        let id = Uuid::new_v4();
        let target_duration_ms = duration_ms.unwrap_or(self.config.default_training_ms);
        let fallback = match self.state {
            ExtractionState::Idle => ExtractionState::Idle,
            _ => ExtractionState::Ready,
        };
        self.session = Some(TrainingSession {
            id,
            frames: Vec::new(),
            frames_seen: 0,
            samples_seen: 0,
            target_duration_ms,
            fallback,
        });
        self.state = ExtractionState::Training;
        log::info!("Training session {id} started ({target_duration_ms} ms)");
        Ok(id)
    }

    /// Finalize the running session now
    pub fn finish_training(&mut self) -> ExtractResult<TrainingProgress> {
        self.finalize_training()
    }

    /// Abandon the running session without building a profile
    pub fn cancel_training(&mut self) {
        if let Some(session) = self.session.take() {
            log::info!("Training session {} cancelled", session.id);
            self.state = session.fallback;
        }
    }

    /// Begin extracting the trained target
    pub fn start_extraction(&mut self) -> ExtractResult<()> {
        match self.state {
            ExtractionState::Training => Err(ExtractError::TrainingInProgress),
            _ if self.target.is_none() => Err(ExtractError::NoProfile),
            _ => {
                self.enhancer.reset();
                self.reset_mixture_delay();
                self.state = ExtractionState::Extracting;
                log::info!("Extraction started ({} samples latency)", self.latency_samples());
                Ok(())
            }
        }
    }

    /// Stop extracting
    pub fn stop_extraction(&mut self) {
        if self.state == ExtractionState::Extracting {
            self.state = ExtractionState::Ready;
            log::info!("Extraction stopped after {} frames", self.frames_processed);
        }
    }

    /// Learn the enhancer's noise profile from the next frames submitted
    /// outside training and extraction
    pub fn learn_noise(&mut self, duration_ms: u32) {
        self.enhancer.start_learning(duration_ms);
    }

    /// Route one frame according to the current state
    pub fn process(&mut self, frame: &[f32]) -> ExtractResult<ProcessOutcome> {
        match self.state {
            ExtractionState::Training => self.train(frame).map(ProcessOutcome::Training),
            ExtractionState::Extracting => self.extract(frame).map(ProcessOutcome::Extraction),
            ExtractionState::Idle | ExtractionState::Ready => {
                if self.enhancer.is_learning() {
                    self.enhancer.process(frame)?;
                }
                Ok(ProcessOutcome::Bypassed)
            }
        }
    }

    /// Statistics snapshot
    pub fn stats(&self) -> ExtractionStats {
        ExtractionStats {
            frames_processed: self.frames_processed,
            target_frames: self.target_frames,
            average_quality: mean(&self.quality_history),
            average_latency_ms: mean(&self.latency_history),
            last_speaker: self.last_speaker.clone(),
            detector_threshold: self.detector.threshold(),
            separation_aggressiveness: self.separator.aggressiveness(),
            enhancer_aggressiveness: self.enhancer.aggressiveness(),
        }
    }

    /// Drop the session, target and statistics and return to Idle
    pub fn reset(&mut self) {
        if let Some(target) = self.target.take() {
            self.detector.unregister_speaker(&target.id);
            self.separator.unregister_profile(&target.id);
        }
        self.session = None;
        self.detector.reset();
        self.enhancer.reset();
        self.reset_mixture_delay();
        self.quality_history.clear();
        self.latency_history.clear();
        self.frames_processed = 0;
        self.target_frames = 0;
        self.last_speaker = None;
        self.state = ExtractionState::Idle;
    }

    fn train(&mut self, frame: &[f32]) -> ExtractResult<TrainingProgress> {
        let sample_rate = self.sample_rate;
        let threshold = self.config.training_quality_threshold;
        let session = self.session.as_mut().ok_or(ExtractError::NoTrainingData)?;

        session.frames_seen += 1;
        session.samples_seen += frame.len() as u64;
        let quality = analysis::frame_quality(frame);
        if quality > threshold {
            session.frames.push(frame.to_vec());
        } else {
            log::debug!("Training frame rejected (quality {quality:.2})");
        }

        let elapsed_ms = session.samples_seen as f64 * 1000.0 / sample_rate as f64;
        if elapsed_ms >= session.target_duration_ms as f64 {
            return self.finalize_training();
        }
        Ok(session_progress(session, sample_rate, false))
    }

    fn finalize_training(&mut self) -> ExtractResult<TrainingProgress> {
        let Some(session) = self.session.take() else {
            return Err(ExtractError::NoTrainingData);
        };

        if session.frames.is_empty() {
            log::warn!(
                "Training session {} produced no usable frames ({} submitted)",
                session.id,
                session.frames_seen
            );
            self.state = session.fallback;
            return Err(ExtractError::NoTrainingData);
        }

        let profile = match self.profiler.build_profile(&session.id.to_string(), &session.frames) {
            Ok(profile) => profile,
            Err(e) => {
                self.state = session.fallback;
                return Err(e);
            }
        };

        if let Err(e) = self.install_target(profile) {
            self.state = session.fallback;
            return Err(e);
        }

        log::info!(
            "Training session {} finalized from {} of {} frames",
            session.id,
            session.frames.len(),
            session.frames_seen
        );
        self.state = ExtractionState::Ready;
        Ok(session_progress(&session, self.sample_rate, true))
    }

    /// Register `profile` as the target, replacing any previous one
    fn install_target(&mut self, profile: VoiceProfile) -> ExtractResult<()> {
        if let Some(previous) = self.target.as_ref() {
            if previous.id != profile.id {
                self.detector.unregister_speaker(&previous.id);
                self.separator.unregister_profile(&previous.id);
            }
        }
        self.detector.register_speaker(profile.clone())?;
        self.separator.register_profile(SourceProfile::from(&profile));
        self.target = Some(profile);
        Ok(())
    }

    fn extract(&mut self, frame: &[f32]) -> ExtractResult<ExtractionResult> {
        let start = Instant::now();
        let target_id = self
            .target
            .as_ref()
            .map(|t| t.id.clone())
            .ok_or(ExtractError::NoProfile)?;

        let detection = self.detector.detect(frame);
        let is_target = detection.speaker_id.as_deref() == Some(target_id.as_str());

        let (separated_audio, separation_quality) = if is_target {
            let separated = self.separator.separate(frame, Some(&[target_id.as_str()]))?;
            let audio = separated
                .sources
                .into_iter()
                .next()
                .unwrap_or_else(|| vec![0.0; frame.len()]);
            (audio, separated.quality)
        } else {
            (vec![0.0; frame.len()], 0.0)
        };

        // Every frame goes through the enhancer stream so its timeline stays continuous
        let (target_audio, mixture) = if self.config.denoise_target {
            let audio = if is_target && separation_quality > self.config.denoise_min_separation_quality
            {
                self.enhancer.process(&separated_audio)?
            } else {
                self.enhancer.pass_through(&separated_audio)?
            };
            (audio, self.delay_mixture(frame))
        } else {
            (separated_audio, frame.to_vec())
        };

        let interfering_audio: Vec<f32> = mixture
            .iter()
            .zip(&target_audio)
            .map(|(x, t)| x - t)
            .collect();

        let confidence = if is_target { detection.confidence } else { 0.0 };
        let quality = (0.4 * confidence
            + 0.3 * separation_quality
            + 0.3 * analysis::energy_score(&target_audio))
        .clamp(0.0, 1.0);

        if is_target && quality < self.config.quality_target {
            self.detector.adjust_threshold(-self.config.detector_threshold_step);
            self.separator
                .adjust_aggressiveness(self.config.separation_aggressiveness_step);
            self.enhancer
                .adjust_aggressiveness(self.config.enhancer_aggressiveness_step);
            log::debug!("Low extraction quality {quality:.2}, retuning components");
        }

        self.frames_processed += 1;
        if is_target {
            self.target_frames += 1;
        }
        self.last_speaker = detection.speaker_id;
        push_bounded(&mut self.quality_history, quality, self.config.history_len);
        let latency_ms = start.elapsed().as_secs_f32() * 1000.0;
        push_bounded(&mut self.latency_history, latency_ms, self.config.history_len);

        Ok(ExtractionResult {
            target_audio,
            interfering_audio,
            confidence,
            quality,
            stats: self.stats(),
        })
    }

    /// Push `frame` into the mixture delay and take the same number of samples out
    fn delay_mixture(&mut self, frame: &[f32]) -> Vec<f32> {
        self.mixture_delay.extend(frame);
        self.mixture_delay.drain(..frame.len()).collect()
    }

    fn reset_mixture_delay(&mut self) {
        let latency = self.latency_samples();
        self.mixture_delay.clear();
        self.mixture_delay.resize(latency, 0.0);
    }
}

fn session_progress(session: &TrainingSession, sample_rate: f32, completed: bool) -> TrainingProgress {
    let elapsed_ms = session.samples_seen as f64 * 1000.0 / sample_rate as f64;
    let progress = if session.target_duration_ms == 0 {
        1.0
    } else {
        (elapsed_ms / session.target_duration_ms as f64).min(1.0) as f32
    };
    TrainingProgress {
        session_id: session.id,
        progress,
        frames_collected: session.frames_seen,
        frames_accepted: session.frames.len(),
        completed,
    }
}

fn push_bounded(history: &mut VecDeque<f32>, value: f32, capacity: usize) {
    while history.len() >= capacity.max(1) {
        history.pop_front();
    }
    history.push_back(value);
}

fn mean(values: &VecDeque<f32>) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}
