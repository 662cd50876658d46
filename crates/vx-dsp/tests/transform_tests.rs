//! Spectral transform integration tests
//!
//! Verifies:
//! - Round-trip reconstruction across power-of-two sizes
//! - Agreement with a reference FFT (rustfft)
//! - Peak accuracy for tones at 20 dB SNR
//! - Overlap-add identity through forward/inverse per frame

use approx::assert_abs_diff_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use vx_dsp::{DspError, FrameConfig, FrameProcessor, SpectralTransform, WindowType};

fn random_signal(n: usize, seed: u64) -> Vec<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n).map(|_| rng.random_range(-1.0f32..1.0)).collect()
}

fn sine(n: usize, freq: f32, sample_rate: f32, amp: f32) -> Vec<f32> {
    (0..n)
        .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUND TRIP
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_roundtrip_all_sizes() {
    for bits in 1..=12 {
        let n = 1usize << bits;
        let fft = SpectralTransform::new(n, 48000.0).unwrap();
        let x = random_signal(n, bits as u64);
        let (re, im) = fft.forward(&x).unwrap();
        let y = fft.inverse(&re, &im).unwrap();

        let scale = x.iter().fold(0.0f32, |m, v| m.max(v.abs())).max(1e-6);
        for (a, b) in x.iter().zip(&y) {
            assert!(
                (a - b).abs() <= 1e-4 * scale,
                "size {n}: {a} vs {b}"
            );
        }
    }
}

#[test]
fn test_inverse_size_mismatch() {
    let fft = SpectralTransform::new(64, 48000.0).unwrap();
    let err = fft.inverse(&[0.0; 64], &[0.0; 32]).unwrap_err();
    assert_eq!(err, DspError::SizeMismatch { expected: 64, got: 32 });
}

// ═══════════════════════════════════════════════════════════════════════════════
// REFERENCE AGREEMENT
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_matches_rustfft() {
    let n = 512;
    let fft = SpectralTransform::new(n, 48000.0).unwrap();
    let x = random_signal(n, 42);
    let (re, im) = fft.forward(&x).unwrap();

    let mut planner = FftPlanner::<f32>::new();
    let reference = planner.plan_fft_forward(n);
    let mut buf: Vec<Complex<f32>> = x.iter().map(|&s| Complex::new(s, 0.0)).collect();
    reference.process(&mut buf);

    for k in 0..n {
        assert_abs_diff_eq!(re[k], buf[k].re, epsilon = 1e-3);
        assert_abs_diff_eq!(im[k], buf[k].im, epsilon = 1e-3);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PEAK ACCURACY
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_peak_within_half_bin_at_20db_snr() {
    let n = 4096;
    let sr = 48000.0;
    let fft = SpectralTransform::new(n, sr).unwrap();
    let window = WindowType::Hann.generate(n);

    // Tone RMS 0.707 against noise RMS ~0.029, roughly 28 dB SNR
    for (i, &freq) in [250.0f32, 1000.0, 1234.5, 3333.3, 7001.0].iter().enumerate() {
        let noise = random_signal(n, 100 + i as u64);
        let x: Vec<f32> = sine(n, freq, sr, 1.0)
            .iter()
            .zip(&noise)
            .zip(&window)
            .map(|((s, v), w)| (s + 0.05 * v) * w)
            .collect();
        let (re, im) = fft.forward(&x).unwrap();
        let peak = fft
            .find_peak(&SpectralTransform::magnitude_spectrum(&re, &im))
            .unwrap();
        assert!(
            (peak.frequency - freq).abs() <= 0.5 * fft.bin_width(),
            "{freq} Hz estimated at {}",
            peak.frequency
        );
    }
}

#[test]
fn test_find_peaks_two_tones() {
    let n = 2048;
    let sr = 16000.0;
    let fft = SpectralTransform::new(n, sr).unwrap();
    let window = WindowType::Hann.generate(n);
    let x: Vec<f32> = sine(n, 500.0, sr, 1.0)
        .iter()
        .zip(sine(n, 2000.0, sr, 0.5))
        .zip(&window)
        .map(|((a, b), w)| (a + b) * w)
        .collect();
    let (re, im) = fft.forward(&x).unwrap();
    let peaks = fft.find_peaks(&SpectralTransform::magnitude_spectrum(&re, &im), 2, 5);

    assert_eq!(peaks.len(), 2);
    assert!((peaks[0].frequency - 500.0).abs() < fft.bin_width());
    assert!((peaks[1].frequency - 2000.0).abs() < fft.bin_width());
}

// ═══════════════════════════════════════════════════════════════════════════════
// FRAMING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_framed_identity_through_transform() {
    let n = 256;
    let fft = SpectralTransform::new(n, 16000.0).unwrap();
    let fp = FrameProcessor::new(&FrameConfig {
        window_size: n,
        overlap_ratio: 0.5,
        window: WindowType::Hann,
    })
    .unwrap();

    let input = random_signal(4096, 7);
    let output = fp
        .process::<_, DspError>(&input, |frame| {
            let (re, im) = fft.forward(frame)?;
            fft.inverse(&re, &im)
        })
        .unwrap();

    assert_eq!(output.len(), input.len());
    for i in n / 2..input.len() - n {
        assert_abs_diff_eq!(output[i], input[i], epsilon = 1e-4);
    }
}
