//! Noise profile learning
//!
//! Collects magnitude spectra of noise-only frames into a bounded history,
//! then averages and smooths them across frequency into a [`NoiseProfile`].

use crate::error::{ExtractError, ExtractResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Cross-bin smoothing coefficient applied at finalization
const PROFILE_SMOOTHING: f32 = 0.8;

/// Per-bin noise magnitude estimate (N/2 bins)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseProfile {
    /// Expected noise magnitude per bin
    pub magnitude: Vec<f32>,
    /// Number of frames averaged (0 for synthetic profiles)
    pub frame_count: usize,
}

impl NoiseProfile {
    /// Wrap a magnitude template that was not learned from frames
    pub fn from_magnitudes(magnitude: Vec<f32>) -> Self {
        Self {
            magnitude,
            frame_count: 0,
        }
    }

    /// Number of bins
    pub fn bins(&self) -> usize {
        self.magnitude.len()
    }
}

/// Learner state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnerState {
    /// Not collecting frames
    Idle,
    /// Collecting frames until the target count is reached
    Learning,
}

/// Noise profile learner
#[derive(Debug, Clone)]
pub struct NoiseProfileLearner {
    /// Expected magnitude length
    bins: usize,
    /// Sample rate (Hz)
    sample_rate: f32,
    /// Hop between analysed frames (samples)
    hop_size: usize,
    /// History capacity
    max_history_frames: usize,
    /// Current state
    state: LearnerState,
    /// Most recent magnitude frames
    history: VecDeque<Vec<f32>>,
    /// Frames seen since learning started
    frames_collected: usize,
    /// Frames needed to cover the requested duration
    target_frames: usize,
    /// Finalized profile
    profile: Option<NoiseProfile>,
}

impl NoiseProfileLearner {
    /// Create learner for `bins`-long magnitude spectra
    pub fn new(bins: usize, sample_rate: f32, hop_size: usize, max_history_frames: usize) -> Self {
        Self {
            bins,
            sample_rate,
            hop_size: hop_size.max(1),
            max_history_frames: max_history_frames.max(1),
            state: LearnerState::Idle,
            history: VecDeque::with_capacity(max_history_frames.max(1)),
            frames_collected: 0,
            target_frames: 0,
            profile: None,
        }
    }

    /// Begin learning for `duration_ms` of audio; discards any previous profile
    pub fn start_learning(&mut self, duration_ms: u32) {
        let frames =
            duration_ms as f64 * self.sample_rate as f64 / (1000.0 * self.hop_size as f64);
        self.target_frames = (frames.ceil() as usize).max(1);
        self.history.clear();
        self.frames_collected = 0;
        self.profile = None;
        self.state = LearnerState::Learning;
        log::info!(
            "Noise learning started: {duration_ms} ms ({} frames)",
            self.target_frames
        );
    }

    /// Finalize early with whatever has been collected; when idle, returns the current profile
    pub fn stop_learning(&mut self) -> Option<&NoiseProfile> {
        if self.state != LearnerState::Learning {
            return self.profile.as_ref();
        }
        self.finalize()
    }

    /// Add one magnitude frame. Returns `true` when this frame completed learning.
    pub fn push_frame(&mut self, magnitudes: &[f32]) -> ExtractResult<bool> {
        if self.state != LearnerState::Learning {
            return Ok(false);
        }
        if magnitudes.len() != self.bins {
            return Err(ExtractError::Dsp(vx_dsp::DspError::SizeMismatch {
                expected: self.bins,
                got: magnitudes.len(),
            }));
        }

        if self.history.len() == self.max_history_frames {
            self.history.pop_front();
        }
        self.history.push_back(magnitudes.to_vec());
        self.frames_collected += 1;

        if self.frames_collected >= self.target_frames {
            self.finalize();
            return Ok(true);
        }
        Ok(false)
    }

    /// Average the history per bin and smooth across bins.
    ///
    /// With no collected frames the profile stays unset.
    pub fn finalize(&mut self) -> Option<&NoiseProfile> {
        self.state = LearnerState::Idle;
        if self.history.is_empty() {
            log::warn!("Noise learning finalized without frames, profile unset");
            return None;
        }

        let count = self.history.len() as f32;
        let mut average = vec![0.0f32; self.bins];
        for frame in &self.history {
            for (acc, &m) in average.iter_mut().zip(frame) {
                *acc += m;
            }
        }
        for a in &mut average {
            *a /= count;
        }

        let mut smoothed = Vec::with_capacity(self.bins);
        for (i, &v) in average.iter().enumerate() {
            let out = if i == 0 {
                v
            } else {
                PROFILE_SMOOTHING * smoothed[i - 1] + (1.0 - PROFILE_SMOOTHING) * v
            };
            smoothed.push(out);
        }

        log::info!(
            "Noise profile finalized from {} frames ({} seen)",
            self.history.len(),
            self.frames_collected
        );
        self.history.clear();
        self.profile = Some(NoiseProfile {
            magnitude: smoothed,
            frame_count: self.frames_collected,
        });
        self.profile.as_ref()
    }

    /// Current state
    pub fn state(&self) -> LearnerState {
        self.state
    }

    /// True while collecting frames
    pub fn is_learning(&self) -> bool {
        self.state == LearnerState::Learning
    }

    /// Learning progress in [0, 1]
    pub fn progress(&self) -> f32 {
        if self.target_frames == 0 {
            return 0.0;
        }
        (self.frames_collected as f32 / self.target_frames as f32).min(1.0)
    }

    /// Frames needed for the current session
    pub fn target_frames(&self) -> usize {
        self.target_frames
    }

    /// Frames currently held in the history
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Finalized profile, if any
    pub fn profile(&self) -> Option<&NoiseProfile> {
        self.profile.as_ref()
    }

    /// Replace the profile
    pub fn set_profile(&mut self, profile: NoiseProfile) {
        self.profile = Some(profile);
    }

    /// Drop the profile
    pub fn clear_profile(&mut self) {
        self.profile = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_frames_from_duration() {
        let mut learner = NoiseProfileLearner::new(1024, 44100.0, 1024, 100);
        learner.start_learning(100);
        // 0.1 * 44100 / 1024 = 4.3 -> 5
        assert_eq!(learner.target_frames(), 5);
        assert!(learner.is_learning());
    }

    #[test]
    fn test_auto_finalize_at_target() {
        let mut learner = NoiseProfileLearner::new(4, 1000.0, 100, 10);
        learner.start_learning(300);
        assert!(!learner.push_frame(&[1.0; 4]).unwrap());
        assert!(!learner.push_frame(&[1.0; 4]).unwrap());
        assert!(learner.push_frame(&[1.0; 4]).unwrap());
        assert_eq!(learner.state(), LearnerState::Idle);

        let profile = learner.profile().unwrap();
        assert_eq!(profile.frame_count, 3);
        for &m in &profile.magnitude {
            assert!((m - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_finalize_without_frames_leaves_profile_unset() {
        let mut learner = NoiseProfileLearner::new(4, 1000.0, 100, 10);
        learner.start_learning(1000);
        assert!(learner.finalize().is_none());
        assert!(learner.profile().is_none());
        assert!(!learner.is_learning());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut learner = NoiseProfileLearner::new(2, 1000.0, 1, 3);
        learner.start_learning(1000);
        for i in 0..10 {
            learner.push_frame(&[i as f32, i as f32]).unwrap();
        }
        assert_eq!(learner.history_len(), 3);
        // Average of the last three frames (7, 8, 9)
        let profile = learner.stop_learning().unwrap();
        assert!((profile.magnitude[0] - 8.0).abs() < 1e-5);
    }

    #[test]
    fn test_smoothing_is_causal() {
        let mut learner = NoiseProfileLearner::new(3, 1000.0, 100, 10);
        learner.start_learning(100);
        learner.push_frame(&[1.0, 0.0, 0.0]).unwrap();
        let m = &learner.profile().unwrap().magnitude;
        assert!((m[0] - 1.0).abs() < 1e-6);
        assert!((m[1] - 0.8).abs() < 1e-6);
        assert!((m[2] - 0.64).abs() < 1e-6);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let mut learner = NoiseProfileLearner::new(4, 1000.0, 100, 10);
        learner.start_learning(1000);
        assert!(learner.push_frame(&[0.0; 3]).is_err());
    }

    #[test]
    fn test_ignores_frames_when_idle() {
        let mut learner = NoiseProfileLearner::new(4, 1000.0, 100, 10);
        assert!(!learner.push_frame(&[1.0; 4]).unwrap());
        assert!(learner.profile().is_none());
    }
}
