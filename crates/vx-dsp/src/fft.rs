//! Radix-2 spectral transform
//!
//! Iterative Cooley-Tukey FFT over split real/imaginary buffers:
//! - Bit-reversal permutation and twiddle tables computed once per size
//! - Inverse via conjugation through the same butterfly network
//! - Magnitude, power and phase spectra over the N/2 usable bins
//! - Peak picking with parabolic (3-bin) interpolation

use crate::error::{DspError, DspResult};
use num_complex::Complex32;
use std::f64::consts::PI;

// ============ Constants ============

/// Peaks must exceed this fraction of the global maximum
const PEAK_RELATIVE_THRESHOLD: f32 = 0.1;

/// Parabolic fit is skipped below this curvature
const PARABOLA_EPSILON: f32 = 1e-10;

// ============ Spectrum ============

/// Complex spectrum stored as parallel real/imaginary sequences
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Real parts (length N)
    pub re: Vec<f32>,
    /// Imaginary parts (length N)
    pub im: Vec<f32>,
}

impl Spectrum {
    /// Wrap existing buffers
    pub fn new(re: Vec<f32>, im: Vec<f32>) -> DspResult<Self> {
        if re.len() != im.len() {
            return Err(DspError::SizeMismatch {
                expected: re.len(),
                got: im.len(),
            });
        }
        Ok(Self { re, im })
    }

    /// Transform size N
    pub fn len(&self) -> usize {
        self.re.len()
    }

    /// True for a zero-length spectrum
    pub fn is_empty(&self) -> bool {
        self.re.is_empty()
    }

    /// Magnitudes of the first N/2 bins
    pub fn magnitude(&self) -> Vec<f32> {
        SpectralTransform::magnitude_spectrum(&self.re, &self.im)
    }

    /// Phases of the first N/2 bins
    pub fn phase(&self) -> Vec<f32> {
        SpectralTransform::phase_spectrum(&self.re, &self.im)
    }

    /// Scale bins by real gains while keeping phase and conjugate symmetry.
    ///
    /// `gains` covers bins `0..N/2`; bin `k` and its mirror `N-k` receive the
    /// same gain, the Nyquist bin reuses the last gain.
    pub fn apply_gains(&mut self, gains: &[f32]) -> DspResult<()> {
        let n = self.len();
        let half = n / 2;
        if gains.len() != half {
            return Err(DspError::SizeMismatch {
                expected: half,
                got: gains.len(),
            });
        }
        if n == 0 {
            return Ok(());
        }

        for (k, &g) in gains.iter().enumerate() {
            self.re[k] *= g;
            self.im[k] *= g;
            if k > 0 {
                self.re[n - k] *= g;
                self.im[n - k] *= g;
            }
        }
        let nyquist_gain = gains[half - 1];
        self.re[half] *= nyquist_gain;
        self.im[half] *= nyquist_gain;
        Ok(())
    }

    /// Build a conjugate-symmetric spectrum of size `n` from N/2 magnitudes and phases
    pub fn from_polar(magnitudes: &[f32], phases: &[f32], n: usize) -> DspResult<Self> {
        let half = n / 2;
        if magnitudes.len() != half || phases.len() != half {
            return Err(DspError::SizeMismatch {
                expected: half,
                got: magnitudes.len().min(phases.len()),
            });
        }

        let mut re = vec![0.0; n];
        let mut im = vec![0.0; n];
        for k in 0..half {
            let c = Complex32::from_polar(magnitudes[k], phases[k]);
            re[k] = c.re;
            im[k] = c.im;
            if k > 0 {
                re[n - k] = c.re;
                im[n - k] = -c.im;
            }
        }
        // DC must be real for a real signal
        im[0] = 0.0;
        Ok(Self { re, im })
    }
}

// ============ Peaks ============

/// Interpolated spectral peak
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Fractional bin index
    pub bin: f32,
    /// Frequency in Hz
    pub frequency: f32,
    /// Interpolated magnitude
    pub magnitude: f32,
}

// ============ Transform ============

/// Power-of-two FFT with precomputed tables
#[derive(Debug, Clone)]
pub struct SpectralTransform {
    /// Transform size N
    size: usize,
    /// Sample rate (Hz)
    sample_rate: f32,
    /// Bit-reversal permutation
    bit_reverse: Vec<usize>,
    /// Forward twiddles exp(-2πik/N), k < N/2
    twiddles: Vec<Complex32>,
}

impl SpectralTransform {
    /// Create transform for `size` samples at `sample_rate`
    pub fn new(size: usize, sample_rate: f32) -> DspResult<Self> {
        if size < 2 || !size.is_power_of_two() {
            return Err(DspError::InvalidSize(size));
        }
        if !(sample_rate > 0.0) {
            return Err(DspError::InvalidConfig(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }

        let bits = size.trailing_zeros();
        let bit_reverse = (0..size)
            .map(|i| i.reverse_bits() >> (usize::BITS - bits))
            .collect();

        // Twiddles in f64 then rounded, keeps large sizes accurate
        let twiddles = (0..size / 2)
            .map(|k| {
                let angle = -2.0 * PI * k as f64 / size as f64;
                Complex32::new(angle.cos() as f32, angle.sin() as f32)
            })
            .collect();

        Ok(Self {
            size,
            sample_rate,
            bit_reverse,
            twiddles,
        })
    }

    /// Transform size N
    pub fn size(&self) -> usize {
        self.size
    }

    /// Sample rate (Hz)
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Width of one bin in Hz
    pub fn bin_width(&self) -> f32 {
        self.sample_rate / self.size as f32
    }

    /// Forward transform of exactly N real samples
    pub fn forward(&self, samples: &[f32]) -> DspResult<(Vec<f32>, Vec<f32>)> {
        self.check_len(samples.len())?;

        let mut buf: Vec<Complex32> = self
            .bit_reverse
            .iter()
            .map(|&j| Complex32::new(samples[j], 0.0))
            .collect();
        self.butterflies(&mut buf);

        Ok(buf.into_iter().map(|c| (c.re, c.im)).unzip())
    }

    /// Forward transform returning a [`Spectrum`]
    pub fn forward_spectrum(&self, samples: &[f32]) -> DspResult<Spectrum> {
        let (re, im) = self.forward(samples)?;
        Ok(Spectrum { re, im })
    }

    /// Inverse transform; exact inverse of [`SpectralTransform::forward`]
    pub fn inverse(&self, re: &[f32], im: &[f32]) -> DspResult<Vec<f32>> {
        self.check_len(re.len())?;
        self.check_len(im.len())?;

        // conj -> forward butterflies -> conj, scaled by 1/N
        let mut buf: Vec<Complex32> = self
            .bit_reverse
            .iter()
            .map(|&j| Complex32::new(re[j], -im[j]))
            .collect();
        self.butterflies(&mut buf);

        let scale = 1.0 / self.size as f32;
        Ok(buf.into_iter().map(|c| c.re * scale).collect())
    }

    /// Inverse transform of a [`Spectrum`]
    pub fn inverse_spectrum(&self, spectrum: &Spectrum) -> DspResult<Vec<f32>> {
        self.inverse(&spectrum.re, &spectrum.im)
    }

    /// In-place radix-2 butterflies on bit-reversed input
    fn butterflies(&self, buf: &mut [Complex32]) {
        let n = self.size;
        let mut len = 2;
        while len <= n {
            let half = len / 2;
            let stride = n / len;
            for start in (0..n).step_by(len) {
                for k in 0..half {
                    let w = self.twiddles[k * stride];
                    let a = buf[start + k];
                    let b = buf[start + k + half] * w;
                    buf[start + k] = a + b;
                    buf[start + k + half] = a - b;
                }
            }
            len <<= 1;
        }
    }

    fn check_len(&self, got: usize) -> DspResult<()> {
        if got != self.size {
            return Err(DspError::SizeMismatch {
                expected: self.size,
                got,
            });
        }
        Ok(())
    }

    /// `sqrt(re² + im²)` over the first N/2 bins
    pub fn magnitude_spectrum(re: &[f32], im: &[f32]) -> Vec<f32> {
        let half = re.len().min(im.len()) / 2;
        (0..half)
            .map(|i| (re[i] * re[i] + im[i] * im[i]).sqrt())
            .collect()
    }

    /// `re² + im²` over the first N/2 bins
    pub fn power_spectrum(re: &[f32], im: &[f32]) -> Vec<f32> {
        let half = re.len().min(im.len()) / 2;
        (0..half).map(|i| re[i] * re[i] + im[i] * im[i]).collect()
    }

    /// `atan2(im, re)` over the first N/2 bins
    pub fn phase_spectrum(re: &[f32], im: &[f32]) -> Vec<f32> {
        let half = re.len().min(im.len()) / 2;
        (0..half).map(|i| im[i].atan2(re[i])).collect()
    }

    /// Center frequency of each of the N/2 bins
    pub fn frequency_bins(&self) -> Vec<f32> {
        let width = self.bin_width();
        (0..self.size / 2).map(|i| i as f32 * width).collect()
    }

    /// Strongest bin, refined by parabolic interpolation
    pub fn find_peak(&self, magnitudes: &[f32]) -> Option<Peak> {
        let (index, _) = magnitudes
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_finite())
            .max_by(|a, b| a.1.total_cmp(b.1))?;
        Some(self.interpolate_peak(magnitudes, index))
    }

    /// Up to `k` strongest local maxima at least `min_bin_distance` apart
    pub fn find_peaks(&self, magnitudes: &[f32], k: usize, min_bin_distance: usize) -> Vec<Peak> {
        if magnitudes.len() < 3 || k == 0 {
            return Vec::new();
        }

        let global_max = magnitudes
            .iter()
            .copied()
            .filter(|m| m.is_finite())
            .fold(0.0f32, f32::max);
        let threshold = PEAK_RELATIVE_THRESHOLD * global_max;

        let mut candidates: Vec<usize> = (1..magnitudes.len() - 1)
            .filter(|&i| {
                let m = magnitudes[i];
                m > threshold && m > magnitudes[i - 1] && m >= magnitudes[i + 1]
            })
            .collect();
        candidates.sort_by(|&a, &b| magnitudes[b].total_cmp(&magnitudes[a]));

        let mut accepted: Vec<usize> = Vec::with_capacity(k);
        for idx in candidates {
            if accepted.iter().all(|&a| a.abs_diff(idx) >= min_bin_distance) {
                accepted.push(idx);
                if accepted.len() == k {
                    break;
                }
            }
        }

        accepted
            .into_iter()
            .map(|idx| self.interpolate_peak(magnitudes, idx))
            .collect()
    }

    /// Parabolic interpolation around `index`, clamped to ±0.5 bin
    fn interpolate_peak(&self, magnitudes: &[f32], index: usize) -> Peak {
        let y2 = magnitudes[index];
        let mut offset = 0.0f32;
        let mut magnitude = y2;

        if index > 0 && index + 1 < magnitudes.len() {
            let y1 = magnitudes[index - 1];
            let y3 = magnitudes[index + 1];
            let denominator = y1 - 2.0 * y2 + y3;
            if denominator.abs() >= PARABOLA_EPSILON {
                offset = (0.5 * (y1 - y3) / denominator).clamp(-0.5, 0.5);
                magnitude = y2 - 0.25 * (y1 - y3) * offset;
            }
        }

        let bin = index as f32 + offset;
        Peak {
            bin,
            frequency: bin * self.bin_width(),
            magnitude,
        }
    }
}
