//! Overlap-add framing
//!
//! Splits a buffer into windowed analysis frames, hands each frame to a
//! caller-supplied processor and sums the processed frames back at their
//! offsets. Output length always equals input length.
//!
//! - [`FrameProcessor`] frames one self-contained buffer
//! - [`OverlapAddStream`] carries input and overlap state across calls, so
//!   consecutive blocks of any length form one continuous stream

use crate::error::{DspError, DspResult};
use crate::window::WindowType;
use serde::{Deserialize, Serialize};

/// Framing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Analysis window length (samples)
    pub window_size: usize,
    /// Fraction of the window shared by consecutive frames (0.0 - <1.0)
    pub overlap_ratio: f32,
    /// Analysis window
    pub window: WindowType,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            window_size: 2048,
            overlap_ratio: 0.5,
            window: WindowType::Hann,
        }
    }
}

/// Overlap-add frame scheduler
#[derive(Debug, Clone)]
pub struct FrameProcessor {
    /// Window length
    window_size: usize,
    /// Hop between frame starts
    hop_size: usize,
    /// Window table
    window: Vec<f32>,
}

impl FrameProcessor {
    /// Create frame processor from configuration
    pub fn new(config: &FrameConfig) -> DspResult<Self> {
        if config.window_size == 0 {
            return Err(DspError::InvalidConfig("window size must be > 0".into()));
        }
        if !(0.0..1.0).contains(&config.overlap_ratio) {
            return Err(DspError::InvalidConfig(format!(
                "overlap ratio must be in [0, 1), got {}",
                config.overlap_ratio
            )));
        }

        let hop_size =
            ((config.window_size as f32 * (1.0 - config.overlap_ratio)).floor() as usize).max(1);
        log::debug!(
            "Frame processor: window {} ({:?}), hop {hop_size}",
            config.window_size,
            config.window
        );

        Ok(Self {
            window_size: config.window_size,
            hop_size,
            window: config.window.generate(config.window_size),
        })
    }

    /// Window length
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Hop between frame starts
    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Window table
    pub fn window(&self) -> &[f32] {
        &self.window
    }

    /// Sum of the overlapping windows at any sample (`sum(w) / hop`).
    ///
    /// Exact for Hann at 50% and 75% overlap and for rectangular frames
    /// without overlap.
    pub fn overlap_gain(&self) -> f32 {
        let sum: f32 = self.window.iter().sum();
        if sum <= 0.0 {
            1.0
        } else {
            sum / self.hop_size as f32
        }
    }

    /// Number of frames covering `len` samples: `ceil((len - W) / hop) + 1`
    pub fn frame_count(&self, len: usize) -> usize {
        if len == 0 {
            0
        } else if len <= self.window_size {
            1
        } else {
            (len - self.window_size).div_ceil(self.hop_size) + 1
        }
    }

    /// Frame `index` of `input`, zero-padded past the end and windowed
    pub fn frame(&self, input: &[f32], index: usize) -> Vec<f32> {
        let start = index * self.hop_size;
        let mut frame = vec![0.0f32; self.window_size];
        if start < input.len() {
            let end = (start + self.window_size).min(input.len());
            frame[..end - start].copy_from_slice(&input[start..end]);
        }
        for (s, w) in frame.iter_mut().zip(&self.window) {
            *s *= w;
        }
        frame
    }

    /// Run `process` over every frame and overlap-add the results
    pub fn process<F, E>(&self, input: &[f32], mut process: F) -> Result<Vec<f32>, E>
    where
        F: FnMut(&[f32]) -> Result<Vec<f32>, E>,
        E: From<DspError>,
    {
        let mut output = vec![0.0f32; input.len()];

        for index in 0..self.frame_count(input.len()) {
            let frame = self.frame(input, index);
            let processed = process(&frame)?;
            if processed.len() != self.window_size {
                return Err(DspError::SizeMismatch {
                    expected: self.window_size,
                    got: processed.len(),
                }
                .into());
            }

            let start = index * self.hop_size;
            for (out, &s) in output[start..].iter_mut().zip(&processed) {
                *out += s;
            }
        }

        Ok(output)
    }
}

/// Streaming overlap-add over consecutive blocks.
///
/// Output is the input delayed by [`OverlapAddStream::latency`] samples (one
/// window). The history starts as `window_size - hop` zeros, so every real
/// sample is covered by the full set of overlapping frames. Processed frames
/// are scaled by `1 / overlap_gain` before accumulation.
#[derive(Debug, Clone)]
pub struct OverlapAddStream {
    framer: FrameProcessor,
    /// Last `window_size` input samples
    input_buffer: Vec<f32>,
    /// New samples since the last analysis frame
    input_pos: usize,
    /// Overlap-add accumulator aligned with `input_buffer`
    overlap_buffer: Vec<f32>,
    /// Completed samples emitted during the current hop
    output_buffer: Vec<f32>,
    output_pos: usize,
    /// `1 / overlap_gain`
    normalization: f32,
}

impl OverlapAddStream {
    /// Create stream from configuration
    pub fn new(config: &FrameConfig) -> DspResult<Self> {
        let framer = FrameProcessor::new(config)?;
        let window_size = framer.window_size();
        let hop_size = framer.hop_size();
        let normalization = 1.0 / framer.overlap_gain();
        Ok(Self {
            input_buffer: vec![0.0; window_size],
            input_pos: 0,
            overlap_buffer: vec![0.0; window_size],
            output_buffer: vec![0.0; hop_size],
            output_pos: 0,
            normalization,
            framer,
        })
    }

    /// Window length
    pub fn window_size(&self) -> usize {
        self.framer.window_size()
    }

    /// Hop between analysis frames
    pub fn hop_size(&self) -> usize {
        self.framer.hop_size()
    }

    /// Delay between a sample entering and leaving the stream
    pub fn latency(&self) -> usize {
        self.framer.window_size()
    }

    /// Push `input` through the stream, running `process` on every analysis
    /// frame completed along the way. Returns one output sample per input sample.
    ///
    /// After an error the stream keeps its position but the failed frame's
    /// contribution is lost; call [`OverlapAddStream::reset`] to start clean.
    pub fn process<F, E>(&mut self, input: &[f32], mut process: F) -> Result<Vec<f32>, E>
    where
        F: FnMut(&[f32]) -> Result<Vec<f32>, E>,
        E: From<DspError>,
    {
        let window_size = self.framer.window_size();
        let hop_size = self.framer.hop_size();
        let tail = window_size - hop_size;
        let mut output = Vec::with_capacity(input.len());

        for &sample in input {
            output.push(self.output_buffer[self.output_pos]);
            self.output_pos += 1;
            self.input_buffer[tail + self.input_pos] = sample;
            self.input_pos += 1;

            if self.input_pos < hop_size {
                continue;
            }

            let frame: Vec<f32> = self
                .input_buffer
                .iter()
                .zip(self.framer.window())
                .map(|(s, w)| s * w)
                .collect();
            self.input_buffer.copy_within(hop_size.., 0);
            self.input_pos = 0;
            self.output_pos = 0;

            let processed = process(&frame)?;
            if processed.len() != window_size {
                return Err(DspError::SizeMismatch {
                    expected: window_size,
                    got: processed.len(),
                }
                .into());
            }

            for (acc, &s) in self.overlap_buffer.iter_mut().zip(&processed) {
                *acc += s * self.normalization;
            }
            self.output_buffer
                .copy_from_slice(&self.overlap_buffer[..hop_size]);
            self.overlap_buffer.copy_within(hop_size.., 0);
            self.overlap_buffer[tail..].fill(0.0);
        }

        Ok(output)
    }

    /// Clear history and pending output
    pub fn reset(&mut self) {
        self.input_buffer.fill(0.0);
        self.overlap_buffer.fill(0.0);
        self.output_buffer.fill(0.0);
        self.input_pos = 0;
        self.output_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(window_size: usize, overlap_ratio: f32, window: WindowType) -> FrameProcessor {
        FrameProcessor::new(&FrameConfig {
            window_size,
            overlap_ratio,
            window,
        })
        .unwrap()
    }

    #[test]
    fn test_hop_and_frame_count() {
        let fp = processor(1024, 0.75, WindowType::Hann);
        assert_eq!(fp.hop_size(), 256);
        assert_eq!(fp.frame_count(1024), 1);
        assert_eq!(fp.frame_count(1025), 2);
        assert_eq!(fp.frame_count(2048), 5);
        assert_eq!(fp.frame_count(0), 0);
        assert_eq!(fp.frame_count(10), 1);
    }

    #[test]
    fn test_invalid_config() {
        assert!(FrameProcessor::new(&FrameConfig {
            window_size: 0,
            ..Default::default()
        })
        .is_err());
        assert!(FrameProcessor::new(&FrameConfig {
            overlap_ratio: 1.0,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_output_length_matches_input() {
        let fp = processor(64, 0.5, WindowType::Hann);
        let input = vec![1.0f32; 150];
        let out: Vec<f32> = fp
            .process::<_, DspError>(&input, |f| Ok(f.to_vec()))
            .unwrap();
        assert_eq!(out.len(), 150);
    }

    #[test]
    fn test_hann_half_overlap_reconstructs_interior() {
        let fp = processor(64, 0.5, WindowType::Hann);
        let input: Vec<f32> = (0..512).map(|i| (i as f32 * 0.05).sin()).collect();
        let out = fp
            .process::<_, DspError>(&input, |f| Ok(f.to_vec()))
            .unwrap();
        // Periodic Hann at 50% sums to one once two frames overlap
        for i in 32..448 {
            assert!((out[i] - input[i]).abs() < 1e-5, "sample {i}");
        }
    }

    #[test]
    fn test_truncated_frame_is_zero_padded() {
        let fp = processor(8, 0.0, WindowType::Rectangular);
        let input = vec![1.0f32; 12];
        let last = fp.frame(&input, 1);
        assert_eq!(&last[..4], &[1.0; 4]);
        assert_eq!(&last[4..], &[0.0; 4]);
    }

    #[test]
    fn test_wrong_processed_length_fails() {
        let fp = processor(8, 0.5, WindowType::Hann);
        let err = fp
            .process::<_, DspError>(&[0.0; 8], |_| Ok(vec![0.0; 3]))
            .unwrap_err();
        assert_eq!(err, DspError::SizeMismatch { expected: 8, got: 3 });
    }

    fn stream(window_size: usize, overlap_ratio: f32) -> OverlapAddStream {
        OverlapAddStream::new(&FrameConfig {
            window_size,
            overlap_ratio,
            window: WindowType::Hann,
        })
        .unwrap()
    }

    #[test]
    fn test_overlap_gain() {
        assert!((processor(64, 0.5, WindowType::Hann).overlap_gain() - 1.0).abs() < 1e-5);
        assert!((processor(64, 0.75, WindowType::Hann).overlap_gain() - 2.0).abs() < 1e-5);
        assert_eq!(processor(8, 0.0, WindowType::Rectangular).overlap_gain(), 1.0);
    }

    #[test]
    fn test_stream_is_delayed_identity_across_blocks() {
        for overlap in [0.5, 0.75] {
            let mut s = stream(64, overlap);
            let input: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.07).sin()).collect();
            let mut output = Vec::new();
            // Uneven block sizes, some shorter than a hop
            for block in input.chunks(37) {
                output.extend(s.process::<_, DspError>(block, |f| Ok(f.to_vec())).unwrap());
            }
            assert_eq!(output.len(), input.len());
            assert!(output[..s.latency()].iter().all(|&x| x.abs() < 1e-6));
            for i in s.latency()..input.len() {
                assert!(
                    (output[i] - input[i - s.latency()]).abs() < 1e-4,
                    "overlap {overlap} sample {i}"
                );
            }
        }
    }

    #[test]
    fn test_stream_frames_follow_hop_clock() {
        let mut s = stream(64, 0.5);
        let mut frames = 0;
        for _ in 0..4 {
            s.process::<_, DspError>(&[0.1; 16], |f| {
                frames += 1;
                Ok(f.to_vec())
            })
            .unwrap();
        }
        // 64 samples at hop 32
        assert_eq!(frames, 2);
    }

    #[test]
    fn test_stream_reset_clears_history() {
        let mut s = stream(16, 0.5);
        s.process::<_, DspError>(&[1.0; 40], |f| Ok(f.to_vec())).unwrap();
        s.reset();
        let out = s.process::<_, DspError>(&[0.0; 16], |f| Ok(f.to_vec())).unwrap();
        assert!(out.iter().all(|&x| x == 0.0));
    }
}
