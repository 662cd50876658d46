//! Spectral response functions used to build separation masks

/// Harmonic decay constant
const HARMONIC_SHARPNESS: f32 = 5.0;

/// Formant bandwidth as a fraction of the formant frequency
const FORMANT_BANDWIDTH: f32 = 0.1;

/// `exp(-5 |f - round(f/f0) f0| / f0)`: 1 on harmonics of `f0`, decaying between them
pub fn harmonic_response(f0: f32, hz: f32) -> f32 {
    if f0 <= 0.0 {
        return 1.0;
    }
    let nearest = (hz / f0).round() * f0;
    (-HARMONIC_SHARPNESS * (hz - nearest).abs() / f0).exp()
}

/// Mean of `exp(-|f - F| / (0.1 F))` over the known (non-zero) formants
pub fn formant_response(hz: f32, formants: &[f32]) -> f32 {
    let (sum, count) = formants
        .iter()
        .filter(|&&f| f > 0.0)
        .fold((0.0f32, 0usize), |(sum, count), &f| {
            (sum + (-(hz - f).abs() / (FORMANT_BANDWIDTH * f)).exp(), count + 1)
        });
    if count == 0 { 1.0 } else { sum / count as f32 }
}

/// Value at fraction `p` of the sorted input (nearest rank)
pub fn percentile(values: &[f32], p: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((sorted.len() - 1) as f32 * p.clamp(0.0, 1.0)).floor() as usize;
    sorted[idx]
}

/// Template value at bin `i` of `bins`, normalised by the template maximum
pub fn template_at(template: &[f32], template_max: f32, i: usize, bins: usize) -> f32 {
    if template.is_empty() || template_max <= 0.0 || bins == 0 {
        return 0.0;
    }
    let idx = (i * template.len() / bins).min(template.len() - 1);
    template[idx] / template_max
}
