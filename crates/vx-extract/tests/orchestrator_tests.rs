//! Orchestrator integration tests
//!
//! Drives the full train -> extract cycle with a pitch-only profiler.
//!
//! Verifies:
//! - Training state transitions and failure fallback
//! - Extraction output shapes and the target/interference split
//! - Output latency follows the enhancer when denoising
//! - Quality feedback from target frames retunes the components
//! - Noise learning outside training and extraction

use std::f32::consts::PI;
use std::sync::Arc;
use vx_extract::analysis;
use vx_extract::{
    BarkMaskingModel, DetectorConfig, ExtractConfig, ExtractError, ExtractResult,
    ExtractionOrchestrator, ExtractionState, MatchResult, OrchestratorConfig, ProcessOutcome,
    VoiceProfile, VoiceProfiler,
};

const SR: f32 = 16000.0;
const FRAME: usize = 1024;

struct PitchProfiler;

impl PitchProfiler {
    fn pitch(frame: &[f32]) -> f32 {
        analysis::zero_crossing_rate(frame) * SR / 2.0
    }
}

impl VoiceProfiler for PitchProfiler {
    fn match_frame(&self, frame: &[f32], profile: &VoiceProfile, threshold: f32) -> MatchResult {
        let confidence = if (Self::pitch(frame) - profile.f0_hz).abs() < 20.0 { 0.95 } else { 0.05 };
        MatchResult {
            is_match: confidence >= threshold,
            confidence,
            similarity: confidence,
        }
    }

    fn build_profile(&self, id: &str, frames: &[Vec<f32>]) -> ExtractResult<VoiceProfile> {
        if frames.is_empty() {
            return Err(ExtractError::NoTrainingData);
        }
        let f0 = frames.iter().map(|f| Self::pitch(f)).sum::<f32>() / frames.len() as f32;
        Ok(VoiceProfile {
            id: id.to_string(),
            f0_hz: f0,
            f0_range: (f0 - 20.0, f0 + 20.0),
            formants: [0.0; 4],
            template: Vec::new(),
            frame_count: frames.len(),
            sample_rate: SR,
        })
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn orchestrator() -> ExtractionOrchestrator {
    orchestrator_with(OrchestratorConfig::default())
}

fn orchestrator_with(orchestrator: OrchestratorConfig) -> ExtractionOrchestrator {
    init_logging();
    let config = ExtractConfig {
        sample_rate: SR,
        orchestrator,
        detector: DetectorConfig {
            smoothing_window: 1,
            adaptive_threshold: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let fft_size = config.enhancer.frame.window_size;
    ExtractionOrchestrator::with_components(
        config,
        Arc::new(PitchProfiler),
        Box::new(BarkMaskingModel::new(SR, fft_size)),
    )
    .unwrap()
}

fn voiced(f0: f32) -> Vec<f32> {
    (0..FRAME)
        .map(|i| 0.5 * (2.0 * PI * f0 * i as f32 / SR).sin())
        .collect()
}

/// 200 ms of 150 Hz voice; completes on the fourth 64 ms frame
fn train(o: &mut ExtractionOrchestrator) -> String {
    let session = o.start_training(Some(200)).unwrap();
    let frame = voiced(150.0);
    for i in 0..3 {
        match o.process(&frame).unwrap() {
            ProcessOutcome::Training(progress) => {
                assert_eq!(progress.session_id, session);
                assert_eq!(progress.frames_collected, i + 1);
                assert!(!progress.completed);
            }
            other => panic!("expected training progress, got {other:?}"),
        }
    }
    match o.process(&frame).unwrap() {
        ProcessOutcome::Training(progress) => {
            assert!(progress.completed);
            assert_eq!(progress.frames_accepted, 4);
            assert_eq!(progress.progress, 1.0);
        }
        other => panic!("expected completed training, got {other:?}"),
    }
    session.to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRAINING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_training_registers_target() {
    let mut o = orchestrator();
    let id = train(&mut o);

    assert_eq!(o.state(), ExtractionState::Ready);
    let target = o.target_profile().unwrap();
    assert_eq!(target.id, id);
    assert!((target.f0_hz - 150.0).abs() < 10.0);
    assert_eq!(o.detector().speaker_count(), 1);
    assert_eq!(o.separator().profile_ids(), vec![id.as_str()]);
}

#[test]
fn test_training_twice_rejected() {
    let mut o = orchestrator();
    o.start_training(None).unwrap();
    assert!(matches!(o.start_training(None), Err(ExtractError::TrainingInProgress)));
    assert!(matches!(o.start_extraction(), Err(ExtractError::TrainingInProgress)));
}

#[test]
fn test_silent_training_fails_without_profile() {
    let mut o = orchestrator();
    o.start_training(Some(100)).unwrap();
    let silence = vec![0.0f32; FRAME];

    match o.process(&silence).unwrap() {
        ProcessOutcome::Training(progress) => assert_eq!(progress.frames_accepted, 0),
        other => panic!("expected training progress, got {other:?}"),
    }
    assert!(matches!(o.process(&silence), Err(ExtractError::NoTrainingData)));

    assert_eq!(o.state(), ExtractionState::Idle);
    assert!(o.target_profile().is_none());
    assert_eq!(o.detector().speaker_count(), 0);
    assert!(matches!(o.start_extraction(), Err(ExtractError::NoProfile)));
}

#[test]
fn test_failed_retraining_keeps_previous_target() {
    let mut o = orchestrator();
    let id = train(&mut o);

    o.start_training(Some(50)).unwrap();
    assert!(o.process(&vec![0.0f32; FRAME]).is_err());
    assert_eq!(o.state(), ExtractionState::Ready);
    assert_eq!(o.target_profile().unwrap().id, id);
}

#[test]
fn test_retraining_replaces_target() {
    let mut o = orchestrator();
    let first = train(&mut o);
    let second = train(&mut o);
    assert_ne!(first, second);
    assert_eq!(o.detector().speaker_count(), 1);
    assert_eq!(o.separator().profile_ids(), vec![second.as_str()]);
}

#[test]
fn test_finish_training_early() {
    let mut o = orchestrator();
    o.start_training(Some(60_000)).unwrap();
    o.process(&voiced(150.0)).unwrap();
    let progress = o.finish_training().unwrap();
    assert!(progress.completed);
    assert!(progress.progress < 0.01);
    assert_eq!(o.state(), ExtractionState::Ready);
    assert!(matches!(o.finish_training(), Err(ExtractError::NoTrainingData)));
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXTRACTION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_extraction_splits_target_and_interference() {
    let mut o = orchestrator();
    let id = train(&mut o);
    o.start_extraction().unwrap();
    assert_eq!(o.state(), ExtractionState::Extracting);
    // Default enhancer window: two 1024-sample frames of delay
    assert_eq!(o.latency_samples(), 2 * FRAME);

    let frame = voiced(150.0);
    let mut last = None;
    for _ in 0..5 {
        match o.process(&frame).unwrap() {
            ProcessOutcome::Extraction(result) => last = Some(result),
            other => panic!("expected extraction, got {other:?}"),
        }
    }
    // Output of frame 5 is the separated target of frame 3, the first confirmed one
    let result = last.unwrap();
    assert_eq!(result.target_audio.len(), FRAME);
    assert_eq!(result.interfering_audio.len(), FRAME);
    for ((t, i), x) in result.target_audio.iter().zip(&result.interfering_audio).zip(&frame) {
        assert!((t + i - x).abs() < 1e-5);
    }
    assert!(result.target_audio.iter().any(|&s| s != 0.0));
    assert!((0.0..=1.0).contains(&result.quality));
    assert!((result.confidence - 0.95).abs() < 1e-6);

    assert_eq!(result.stats.frames_processed, 5);
    assert_eq!(result.stats.target_frames, 3);
    assert_eq!(result.stats.last_speaker.as_deref(), Some(id.as_str()));
}

#[test]
fn test_denoised_output_lags_by_enhancer_latency() {
    let mut o = orchestrator();
    train(&mut o);
    o.start_extraction().unwrap();

    let frames: Vec<Vec<f32>> = (1..=3)
        .map(|k| voiced(150.0).iter().map(|s| s * 0.4 * k as f32).collect())
        .collect();
    let results: Vec<_> = frames
        .iter()
        .map(|f| match o.process(f).unwrap() {
            ProcessOutcome::Extraction(result) => result,
            other => panic!("expected extraction, got {other:?}"),
        })
        .collect();

    // The first two frames only flush the delay line
    for result in &results[..2] {
        assert!(result.interfering_audio.iter().all(|&s| s == 0.0));
        assert!(result.target_audio.iter().all(|&s| s == 0.0));
    }
    // Frame 1 was not yet attributed to the target, so it comes out as interference
    assert!(results[2].target_audio.iter().all(|&s| s == 0.0));
    assert_eq!(results[2].interfering_audio, frames[0]);
}

#[test]
fn test_unconfirmed_frame_yields_silent_target() {
    let mut o = orchestrator_with(OrchestratorConfig {
        denoise_target: false,
        ..Default::default()
    });
    train(&mut o);
    o.start_extraction().unwrap();
    assert_eq!(o.latency_samples(), 0);

    let frame = voiced(150.0);
    let ProcessOutcome::Extraction(result) = o.process(&frame).unwrap() else {
        panic!("expected extraction");
    };
    assert!(result.target_audio.iter().all(|&s| s == 0.0));
    assert_eq!(result.interfering_audio, frame);
    assert_eq!(result.confidence, 0.0);
}

#[test]
fn test_non_target_frames_leave_tuning_alone() {
    let mut o = orchestrator();
    train(&mut o);
    o.start_extraction().unwrap();
    let before = o.stats();

    let silence = vec![0.0f32; FRAME];
    for _ in 0..20 {
        o.process(&silence).unwrap();
    }
    let stats = o.stats();
    assert_eq!(stats.detector_threshold, before.detector_threshold);
    assert_eq!(stats.enhancer_aggressiveness, before.enhancer_aggressiveness);
    assert_eq!(stats.target_frames, 0);
    assert_eq!(stats.last_speaker, None);
}

#[test]
fn test_low_quality_target_frame_retunes() {
    // Every target frame falls short of this target
    let mut o = orchestrator_with(OrchestratorConfig {
        quality_target: 1.5,
        ..Default::default()
    });
    train(&mut o);
    o.start_extraction().unwrap();
    let before = o.stats();

    let frame = voiced(150.0);
    o.process(&frame).unwrap();
    o.process(&frame).unwrap();
    assert_eq!(o.stats().detector_threshold, before.detector_threshold);

    o.process(&frame).unwrap();
    let stats = o.stats();
    assert_eq!(stats.target_frames, 1);
    assert!((stats.detector_threshold - (before.detector_threshold - 0.02)).abs() < 1e-6);
    assert!((stats.enhancer_aggressiveness - (before.enhancer_aggressiveness + 0.02)).abs() < 1e-6);
}

#[test]
fn test_stop_extraction_returns_to_ready() {
    let mut o = orchestrator();
    train(&mut o);
    o.start_extraction().unwrap();
    o.stop_extraction();
    assert_eq!(o.state(), ExtractionState::Ready);
    assert_eq!(o.process(&voiced(150.0)).unwrap(), ProcessOutcome::Bypassed);
}

#[test]
fn test_reset_clears_everything() {
    let mut o = orchestrator();
    train(&mut o);
    o.start_extraction().unwrap();
    o.process(&voiced(150.0)).unwrap();

    o.reset();
    assert_eq!(o.state(), ExtractionState::Idle);
    assert!(o.target_profile().is_none());
    assert_eq!(o.detector().speaker_count(), 0);
    assert!(o.separator().profile_ids().is_empty());
    assert_eq!(o.stats().frames_processed, 0);
}

// ═══════════════════════════════════════════════════════════════════════════════
// NOISE LEARNING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_learn_noise_while_idle() {
    let mut o = orchestrator();
    o.learn_noise(100);
    assert!(o.enhancer().is_learning());

    let hiss: Vec<f32> = (0..FRAME)
        .map(|i| 0.01 * ((i * 7919 % 113) as f32 / 56.0 - 1.0))
        .collect();
    for _ in 0..5 {
        assert_eq!(o.process(&hiss).unwrap(), ProcessOutcome::Bypassed);
    }
    assert!(!o.enhancer().is_learning());
    assert!(o.enhancer().noise_profile().is_some());
    assert_eq!(o.state(), ExtractionState::Idle);
}
