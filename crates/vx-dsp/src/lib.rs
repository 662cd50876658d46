//! vx-dsp: DSP primitives for VoxTract
//!
//! Dependency-light building blocks shared by the extraction engine.
//!
//! ## Modules
//! - `fft` - Radix-2 Cooley-Tukey FFT/IFFT, magnitude/power/phase spectra, peak picking
//! - `frame` - Overlap-add framing with windowing and hop scheduling, batch and streaming
//! - `window` - Closed-form analysis windows

#![warn(missing_docs)]

pub mod fft;
pub mod frame;
pub mod window;

mod error;

pub use error::{DspError, DspResult};
pub use fft::{Peak, SpectralTransform, Spectrum};
pub use frame::{FrameConfig, FrameProcessor, OverlapAddStream};
pub use window::WindowType;
