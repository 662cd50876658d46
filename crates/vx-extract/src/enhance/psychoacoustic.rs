//! Psychoacoustic masking
//!
//! Features:
//! - `PsychoacousticModel` seam for masking-threshold models
//! - Bark-band simultaneous masking with asymmetric spreading
//! - Temporal (forward) masking from the previous frame
//! - Noise-to-mask based quality score

/// Masking-threshold model used by the enhancer
pub trait PsychoacousticModel: Send + Sync {
    /// Per-bin masking threshold (magnitude units) for `spectrum`
    fn masking_thresholds(&self, spectrum: &[f32], previous: Option<&[f32]>) -> Vec<f32>;

    /// Per-bin reduction factors in [0, 1]
    fn reduction_factors(&self, spectrum: &[f32], noise: &[f32], thresholds: &[f32]) -> Vec<f32>;

    /// Perceptual quality of `processed` relative to `original` in [0, 1]
    fn quality(&self, original: &[f32], processed: &[f32], thresholds: &[f32]) -> f32;
}

// ============ Constants ============

/// Number of critical bands
const NUM_BARK_BANDS: usize = 25;

/// Masking offset below the spread band energy (dB)
const MASKING_OFFSET_DB: f32 = 14.0;

/// Spreading slope towards higher bands (dB per Bark)
const UPPER_SLOPE_DB: f32 = 10.0;

/// Spreading slope towards lower bands (dB per Bark)
const LOWER_SLOPE_DB: f32 = 25.0;

/// Previous-frame threshold carried into the current one
const TEMPORAL_DECAY: f32 = 0.5;

/// Threshold in quiet (magnitude)
const ABSOLUTE_THRESHOLD: f32 = 1e-6;

const EPSILON: f32 = 1e-10;

/// Hz to Bark (Traunmüller)
pub fn hz_to_bark(hz: f32) -> f32 {
    let f = hz / 1000.0;
    26.81 * f / (1.96 + f) - 0.53
}

/// Simultaneous + temporal masking over Bark bands
#[derive(Debug, Clone)]
pub struct BarkMaskingModel {
    /// Bark band of each magnitude bin
    bin_band: Vec<usize>,
    /// Bins per band
    band_sizes: [usize; NUM_BARK_BANDS],
    /// Power spreading weights, `spreading[masker][maskee]`
    spreading: Vec<[f32; NUM_BARK_BANDS]>,
}

impl BarkMaskingModel {
    /// Model for `fft_size / 2` magnitude bins
    pub fn new(sample_rate: f32, fft_size: usize) -> Self {
        let bins = fft_size / 2;
        let bin_width = sample_rate / fft_size.max(1) as f32;

        let mut bin_band = Vec::with_capacity(bins);
        let mut band_sizes = [0usize; NUM_BARK_BANDS];
        for i in 0..bins {
            let bark = hz_to_bark(i as f32 * bin_width).max(0.0);
            let band = (bark.floor() as usize).min(NUM_BARK_BANDS - 1);
            bin_band.push(band);
            band_sizes[band] += 1;
        }

        let spreading = (0..NUM_BARK_BANDS)
            .map(|masker| {
                let mut row = [0.0f32; NUM_BARK_BANDS];
                for (maskee, w) in row.iter_mut().enumerate() {
                    let delta = maskee as f32 - masker as f32;
                    let attenuation = if delta >= 0.0 {
                        UPPER_SLOPE_DB * delta
                    } else {
                        LOWER_SLOPE_DB * -delta
                    };
                    *w = 10f32.powf(-attenuation / 10.0);
                }
                row
            })
            .collect();

        Self {
            bin_band,
            band_sizes,
            spreading,
        }
    }

    /// Per-bin threshold from simultaneous masking only
    fn simultaneous(&self, spectrum: &[f32]) -> Vec<f32> {
        let mut band_energy = [0.0f32; NUM_BARK_BANDS];
        for (&m, &band) in spectrum.iter().zip(&self.bin_band) {
            band_energy[band] += m * m;
        }

        let offset = 10f32.powf(-MASKING_OFFSET_DB / 10.0);
        let mut band_threshold = [0.0f32; NUM_BARK_BANDS];
        for (masker, &energy) in band_energy.iter().enumerate() {
            if energy <= 0.0 {
                continue;
            }
            for (maskee, t) in band_threshold.iter_mut().enumerate() {
                *t += energy * self.spreading[masker][maskee];
            }
        }

        spectrum
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let band = self.bin_band.get(i).copied().unwrap_or(NUM_BARK_BANDS - 1);
                let per_bin = band_threshold[band] * offset / self.band_sizes[band].max(1) as f32;
                per_bin.sqrt().max(ABSOLUTE_THRESHOLD)
            })
            .collect()
    }
}

impl PsychoacousticModel for BarkMaskingModel {
    fn masking_thresholds(&self, spectrum: &[f32], previous: Option<&[f32]>) -> Vec<f32> {
        let mut thresholds = self.simultaneous(spectrum);
        if let Some(prev) = previous.filter(|p| p.len() == spectrum.len()) {
            for (t, p) in thresholds.iter_mut().zip(self.simultaneous(prev)) {
                *t = t.max(TEMPORAL_DECAY * p);
            }
        }
        thresholds
    }

    fn reduction_factors(&self, spectrum: &[f32], noise: &[f32], thresholds: &[f32]) -> Vec<f32> {
        spectrum
            .iter()
            .zip(noise)
            .zip(thresholds)
            .map(|((&mag, &n), &t)| {
                if mag <= EPSILON {
                    return 1.0;
                }
                // Only noise above the masking threshold is audible
                let audible = (n - t).max(0.0);
                ((mag - audible) / mag).clamp(0.0, 1.0)
            })
            .collect()
    }

    fn quality(&self, original: &[f32], processed: &[f32], thresholds: &[f32]) -> f32 {
        let signal: f32 = original.iter().map(|o| o * o).sum();
        if signal <= EPSILON {
            return 1.0;
        }
        let distortion: f32 = original
            .iter()
            .zip(processed)
            .zip(thresholds)
            .map(|((&o, &p), &t)| {
                let audible = ((o - p).abs() - t).max(0.0);
                audible * audible
            })
            .sum();
        (1.0 - (distortion / signal).sqrt()).clamp(0.0, 1.0)
    }
}
