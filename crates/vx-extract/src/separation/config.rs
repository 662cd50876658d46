//! Separation configuration

use crate::error::ExtractError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separation algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SeparationAlgorithm {
    /// Harmonic and formant masks built from the source profile
    #[default]
    SpectralMasking,
    /// Wiener gain against a percentile noise estimate
    WienerFilter,
    /// Per-source filter adapted across calls
    AdaptiveSubtraction,
    /// Fixed random FIR per source (no iterative estimation)
    Ica,
}

impl SeparationAlgorithm {
    /// All algorithms
    pub const ALL: [SeparationAlgorithm; 4] = [
        SeparationAlgorithm::SpectralMasking,
        SeparationAlgorithm::WienerFilter,
        SeparationAlgorithm::AdaptiveSubtraction,
        SeparationAlgorithm::Ica,
    ];

    /// Configuration name
    pub fn as_str(&self) -> &'static str {
        match self {
            SeparationAlgorithm::SpectralMasking => "spectral_masking",
            SeparationAlgorithm::WienerFilter => "wiener_filter",
            SeparationAlgorithm::AdaptiveSubtraction => "adaptive_subtraction",
            SeparationAlgorithm::Ica => "ica",
        }
    }
}

impl fmt::Display for SeparationAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeparationAlgorithm {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ExtractError::UnknownAlgorithm(s.to_string()))
    }
}

/// Separation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationConfig {
    /// Algorithm name (`spectral_masking`, `wiener_filter`, `adaptive_subtraction`, `ica`)
    pub algorithm: String,

    /// Analysis FFT size (power of two); longer mixtures use the next power of two
    pub fft_size: usize,

    /// Mask strength (0.3 - 0.9)
    pub aggressiveness: f32,

    /// Adaptive subtraction learning rate
    pub adaptation_rate: f32,

    /// Tune aggressiveness from processing time
    pub self_tuning: bool,

    /// Processing-time samples kept for tuning
    pub timing_window: usize,

    /// Seed for ICA stand-in weights
    pub ica_seed: u64,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            algorithm: SeparationAlgorithm::SpectralMasking.as_str().to_string(),
            fft_size: 2048,
            aggressiveness: 0.7,
            adaptation_rate: 0.1,
            self_tuning: true,
            timing_window: 20,
            ica_seed: 0x5eed,
        }
    }
}

impl SeparationConfig {
    /// Parsed algorithm
    pub fn algorithm(&self) -> Result<SeparationAlgorithm, ExtractError> {
        self.algorithm.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_names_roundtrip() {
        for algorithm in SeparationAlgorithm::ALL {
            assert_eq!(algorithm.as_str().parse::<SeparationAlgorithm>().unwrap(), algorithm);
        }
    }

    #[test]
    fn test_unknown_algorithm() {
        let err = "nmf".parse::<SeparationAlgorithm>().unwrap_err();
        assert!(matches!(err, ExtractError::UnknownAlgorithm(name) if name == "nmf"));
    }

    #[test]
    fn test_default_config_algorithm() {
        let config = SeparationConfig::default();
        assert_eq!(config.algorithm().unwrap(), SeparationAlgorithm::SpectralMasking);
    }
}
