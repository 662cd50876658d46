//! Speaker detection
//!
//! Features:
//! - Energy / zero-crossing voice activity gate
//! - Trailing-mean confidence smoothing per registered speaker
//! - Confirmation hysteresis (`IdentityTracker`)
//! - Adaptive match threshold
//! - Speaker change events

use crate::analysis;
use crate::error::{ExtractError, ExtractResult};
use crate::profile::{VoiceProfile, VoiceProfiler};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

// ============ Constants ============

/// Zero-crossing rate above which a frame is treated as unvoiced
const MAX_VOICED_ZCR: f32 = 0.3;

/// Observed confidence the adaptive threshold steers toward
const TARGET_CONFIDENCE: f32 = 0.8;

/// Adaptive threshold step
const THRESHOLD_STEP: f32 = 0.02;

/// Margin kept between the threshold and the observed confidence
const THRESHOLD_MARGIN: f32 = 0.1;

/// Threshold bounds
const MIN_THRESHOLD: f32 = 0.3;
const MAX_THRESHOLD: f32 = 0.9;

/// Detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// RMS level below which frames are silent
    pub vad_threshold: f32,
    /// Consecutive frames needed to switch identity
    pub confirmation_frames: usize,
    /// Frames in the confidence trailing mean
    pub smoothing_window: usize,
    /// Starting match threshold
    pub initial_threshold: f32,
    /// Steer the threshold from observed confidence
    pub adaptive_threshold: bool,
    /// Report identity transitions
    pub change_detection: bool,
    /// Confidence needed to report a change
    pub change_sensitivity: f32,
    /// Registry capacity
    pub max_speakers: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            vad_threshold: 0.01,
            confirmation_frames: 3,
            smoothing_window: 5,
            initial_threshold: 0.6,
            adaptive_threshold: true,
            change_detection: true,
            change_sensitivity: 0.5,
            max_speakers: 10,
        }
    }
}

/// Confirmed identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorState {
    /// Nobody confirmed
    NoSpeaker,
    /// Speaker confirmed by hysteresis
    Confirmed(String),
}

impl DetectorState {
    /// Confirmed id, if any
    pub fn speaker(&self) -> Option<&str> {
        match self {
            DetectorState::NoSpeaker => None,
            DetectorState::Confirmed(id) => Some(id),
        }
    }
}

/// Confirmation hysteresis over per-frame candidates
#[derive(Debug, Clone)]
pub struct IdentityTracker {
    confirmation_frames: usize,
    state: DetectorState,
    confirmation: usize,
    /// Challenger id and its consecutive frame count
    challenger: Option<(String, usize)>,
}

impl IdentityTracker {
    /// Tracker requiring `confirmation_frames` consecutive frames to switch
    pub fn new(confirmation_frames: usize) -> Self {
        Self {
            confirmation_frames: confirmation_frames.max(1),
            state: DetectorState::NoSpeaker,
            confirmation: 0,
            challenger: None,
        }
    }

    /// Current state
    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    /// Confirmation counter
    pub fn confirmation(&self) -> usize {
        self.confirmation
    }

    /// Feed one frame's candidate (`None` when nobody passed the threshold)
    pub fn observe(&mut self, candidate: Option<&str>) {
        let Some(candidate) = candidate else {
            self.decay();
            return;
        };

        if self.state.speaker() == Some(candidate) {
            self.confirmation = (self.confirmation + 1).min(self.confirmation_frames);
            self.challenger = None;
            return;
        }

        let count = match self.challenger.take() {
            Some((id, n)) if id == candidate => n + 1,
            _ => 1,
        };

        if count >= self.confirmation_frames {
            self.state = DetectorState::Confirmed(candidate.to_string());
            self.confirmation = self.confirmation_frames;
            return;
        }

        self.challenger = Some((candidate.to_string(), count));
        self.confirmation = self.confirmation.saturating_sub(1);
        if self.confirmation == 0 {
            self.state = DetectorState::NoSpeaker;
        }
    }

    /// Silent frame or no candidate
    pub fn decay(&mut self) {
        self.challenger = None;
        self.confirmation = self.confirmation.saturating_sub(1);
        if self.confirmation == 0 {
            self.state = DetectorState::NoSpeaker;
        }
    }

    /// Forget the identity
    pub fn reset(&mut self) {
        self.state = DetectorState::NoSpeaker;
        self.confirmation = 0;
        self.challenger = None;
    }

    /// Drop the identity if it is `id`
    fn forget(&mut self, id: &str) {
        if self.state.speaker() == Some(id) {
            self.reset();
        }
        if self.challenger.as_ref().is_some_and(|(c, _)| c == id) {
            self.challenger = None;
        }
    }
}

/// Per-frame detection snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Confirmed speaker on an active frame
    pub speaker_id: Option<String>,
    /// Smoothed confidence of the reported (or best) speaker
    pub confidence: f32,
    /// Smoothed confidence per registered speaker
    pub per_speaker_confidence: HashMap<String, f32>,
    /// Frame passed the activity gate
    pub voice_activity: bool,
    /// Confirmed identity changed on this frame
    pub speaker_change: bool,
    /// Frame quality heuristic
    pub frame_quality: f32,
    /// Frame start on the sample clock (seconds)
    pub timestamp: f64,
}

/// Continuous speaker identification
pub struct SpeakerDetector {
    config: DetectorConfig,
    sample_rate: f32,
    profiler: Arc<dyn VoiceProfiler>,
    /// Registered speakers in registration order
    speakers: Vec<VoiceProfile>,
    /// Recent raw confidences per speaker
    histories: HashMap<String, VecDeque<f32>>,
    tracker: IdentityTracker,
    threshold: f32,
    samples_seen: u64,
}

impl SpeakerDetector {
    /// Create detector using `profiler` for matching
    pub fn new(config: DetectorConfig, sample_rate: f32, profiler: Arc<dyn VoiceProfiler>) -> Self {
        Self {
            tracker: IdentityTracker::new(config.confirmation_frames),
            threshold: config.initial_threshold.clamp(MIN_THRESHOLD, MAX_THRESHOLD),
            sample_rate,
            profiler,
            speakers: Vec::new(),
            histories: HashMap::new(),
            samples_seen: 0,
            config,
        }
    }

    /// Register (or replace) a speaker
    pub fn register_speaker(&mut self, profile: VoiceProfile) -> ExtractResult<()> {
        self.histories.remove(&profile.id);
        if let Some(existing) = self.speakers.iter_mut().find(|s| s.id == profile.id) {
            *existing = profile;
            return Ok(());
        }
        if self.speakers.len() >= self.config.max_speakers {
            return Err(ExtractError::MaxSpeakersExceeded {
                max: self.config.max_speakers,
            });
        }
        log::info!("Registered speaker '{}'", profile.id);
        self.speakers.push(profile);
        Ok(())
    }

    /// Remove a speaker; returns whether it existed
    pub fn unregister_speaker(&mut self, id: &str) -> bool {
        self.histories.remove(id);
        self.tracker.forget(id);
        let before = self.speakers.len();
        self.speakers.retain(|s| s.id != id);
        before != self.speakers.len()
    }

    /// Registered speaker count
    pub fn speaker_count(&self) -> usize {
        self.speakers.len()
    }

    /// Confirmed speaker
    pub fn current_speaker(&self) -> Option<&str> {
        self.tracker.state().speaker()
    }

    /// Current match threshold
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Shift the match threshold (clamped to 0.3 - 0.9)
    pub fn adjust_threshold(&mut self, delta: f32) {
        self.threshold = (self.threshold + delta).clamp(MIN_THRESHOLD, MAX_THRESHOLD);
    }

    /// Clear identity, histories and the sample clock; speakers stay registered
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.histories.clear();
        self.threshold = self.config.initial_threshold.clamp(MIN_THRESHOLD, MAX_THRESHOLD);
        self.samples_seen = 0;
    }

    /// Analyse one frame
    pub fn detect(&mut self, frame: &[f32]) -> DetectionResult {
        let timestamp = self.samples_seen as f64 / self.sample_rate as f64;
        self.samples_seen += frame.len() as u64;

        let frame_quality = analysis::frame_quality(frame);
        let previous = self.tracker.state().clone();

        let voice_activity = analysis::energy(frame) > self.config.vad_threshold.powi(2)
            && analysis::zero_crossing_rate(frame) < MAX_VOICED_ZCR;

        if !voice_activity {
            self.tracker.decay();
            let speaker_change = self.change_fired(&previous, 0.0);
            return DetectionResult {
                speaker_id: None,
                confidence: 0.0,
                per_speaker_confidence: HashMap::new(),
                voice_activity,
                speaker_change,
                frame_quality,
                timestamp,
            };
        }

        let mut per_speaker_confidence = HashMap::with_capacity(self.speakers.len());
        let mut best: Option<(usize, f32)> = None;
        for (i, speaker) in self.speakers.iter().enumerate() {
            let result = self.profiler.match_frame(frame, speaker, self.threshold);
            let history = self.histories.entry(speaker.id.clone()).or_default();
            if history.len() >= self.config.smoothing_window.max(1) {
                history.pop_front();
            }
            history.push_back(result.confidence);
            let smoothed = history.iter().sum::<f32>() / history.len() as f32;

            per_speaker_confidence.insert(speaker.id.clone(), smoothed);
            if best.is_none_or(|(_, c)| smoothed > c) {
                best = Some((i, smoothed));
            }
        }

        let candidate = best
            .filter(|&(_, c)| c > self.threshold)
            .map(|(i, _)| self.speakers[i].id.as_str());
        self.tracker.observe(candidate);

        let best_confidence = best.map_or(0.0, |(_, c)| c);
        if best.is_some() {
            self.adapt_threshold(best_confidence * frame_quality);
        }

        let speaker_id = self.tracker.state().speaker().map(str::to_string);
        let confidence = speaker_id
            .as_ref()
            .and_then(|id| per_speaker_confidence.get(id).copied())
            .unwrap_or(best_confidence);
        let speaker_change = self.change_fired(&previous, confidence);

        DetectionResult {
            speaker_id,
            confidence,
            per_speaker_confidence,
            voice_activity,
            speaker_change,
            frame_quality,
            timestamp,
        }
    }

    fn change_fired(&self, previous: &DetectorState, confidence: f32) -> bool {
        let current = self.tracker.state();
        let fired = self.config.change_detection
            && current != previous
            && confidence > self.config.change_sensitivity;
        if fired {
            log::info!(
                "Speaker change: {:?} -> {:?} (confidence {confidence:.2})",
                previous.speaker(),
                current.speaker()
            );
        }
        fired
    }

    fn adapt_threshold(&mut self, observed: f32) {
        if !self.config.adaptive_threshold {
            return;
        }
        let before = self.threshold;
        if observed > TARGET_CONFIDENCE {
            let ceiling = observed - THRESHOLD_MARGIN;
            if self.threshold + THRESHOLD_STEP <= ceiling {
                self.threshold += THRESHOLD_STEP;
            }
        } else {
            self.threshold -= THRESHOLD_STEP;
        }
        self.threshold = self.threshold.clamp(MIN_THRESHOLD, MAX_THRESHOLD);
        if self.threshold != before {
            log::debug!("Detector threshold {before:.2} -> {:.2}", self.threshold);
        }
    }
}
