//! Analysis windows
//!
//! Closed-form periodic windows for STFT analysis. Periodic (denominator `N`)
//! rather than symmetric so that Hann at 50%/75% overlap sums to a constant.

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Window function type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    /// No tapering
    Rectangular,
    /// Raised cosine, zero at the edges
    #[default]
    Hann,
    /// Raised cosine on a 0.08 pedestal
    Hamming,
    /// Three-term Blackman
    Blackman,
}

impl WindowType {
    /// Window coefficient `i` of a window of length `n`
    pub fn coefficient(self, i: usize, n: usize) -> f32 {
        if n <= 1 {
            return 1.0;
        }
        let phase = 2.0 * PI * i as f32 / n as f32;
        match self {
            WindowType::Rectangular => 1.0,
            WindowType::Hann => 0.5 * (1.0 - phase.cos()),
            WindowType::Hamming => 0.54 - 0.46 * phase.cos(),
            WindowType::Blackman => 0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos(),
        }
    }

    /// Generate the full window table
    pub fn generate(self, n: usize) -> Vec<f32> {
        (0..n).map(|i| self.coefficient(i, n)).collect()
    }
}
