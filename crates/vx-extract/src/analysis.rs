//! Cheap time-domain frame descriptors
//!
//! Shared by voice-activity gating, frame quality scoring and training
//! frame selection.

/// RMS level that counts as a fully energetic frame
const FULL_SCALE_RMS: f32 = 0.1;

/// Zero-crossing rate typical of voiced speech
const SPEECH_ZCR: f32 = 0.1;

/// Distance from [`SPEECH_ZCR`] at which the ZCR score reaches zero
const ZCR_TOLERANCE: f32 = 0.2;

/// Mean-square energy
pub fn energy(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32
}

/// Root-mean-square level
pub fn rms(frame: &[f32]) -> f32 {
    energy(frame).sqrt()
}

/// Fraction of adjacent sample pairs that change sign
pub fn zero_crossing_rate(frame: &[f32]) -> f32 {
    if frame.len() < 2 {
        return 0.0;
    }
    let crossings = frame
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (frame.len() - 1) as f32
}

/// `min(rms / 0.1, 1)`
pub fn energy_score(frame: &[f32]) -> f32 {
    (rms(frame) / FULL_SCALE_RMS).min(1.0)
}

/// Triangular score peaking at speech-like zero-crossing rates
pub fn zcr_score(zcr: f32) -> f32 {
    (1.0 - (zcr - SPEECH_ZCR).abs() / ZCR_TOLERANCE).clamp(0.0, 1.0)
}

/// `0.7 * energy_score + 0.3 * zcr_score`
pub fn frame_quality(frame: &[f32]) -> f32 {
    0.7 * energy_score(frame) + 0.3 * zcr_score(zero_crossing_rate(frame))
}
