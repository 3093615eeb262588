//! Spectral Feature Extractor
//!
//! Turns a mono waveform into fixed-width magnitude-spectrum frames:
//! periodic Hann window, forward FFT, first `bins` magnitudes, gain, clamp
//! to [0, 255]. Pure transform, no internal state beyond the FFT plan.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::constants::{
    AMPLITUDE_DIVISOR, DEFAULT_FFT_SIZE, DEFAULT_FRAME_WIDTH, DEFAULT_HOP_LENGTH,
    DEFAULT_SPECTRAL_GAIN, MAX_FEATURE_VALUE, VOICE_ATTENUATION, VOICE_BAND_END,
    VOICE_BAND_START,
};
use crate::error::{SentinelError, SentinelResult};

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    pub fft_size: usize,
    pub hop_length: usize,
    /// Magnitude bins kept per frame (frame width W)
    pub bins: usize,
    pub gain: f32,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            hop_length: DEFAULT_HOP_LENGTH,
            bins: DEFAULT_FRAME_WIDTH,
            gain: DEFAULT_SPECTRAL_GAIN,
        }
    }
}

impl SpectralConfig {
    pub fn validate(&self) -> SentinelResult<()> {
        if self.fft_size == 0 || self.hop_length == 0 {
            return Err(SentinelError::InvalidConfig(
                "fft_size and hop_length must be positive".to_string(),
            ));
        }
        if self.bins == 0 || self.bins > self.fft_size / 2 + 1 {
            return Err(SentinelError::InvalidConfig(format!(
                "bins must be in 1..={} for fft_size {}",
                self.fft_size / 2 + 1,
                self.fft_size
            )));
        }
        if !(self.gain.is_finite() && self.gain > 0.0) {
            return Err(SentinelError::InvalidConfig("gain must be positive".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// FEATURE FRAME
// ============================================================================

/// One short-time magnitude spectrum slice, values in [0, 255]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    values: Vec<f32>,
}

impl FeatureFrame {
    /// Build a frame, clamping every value into [0, 255] (NaN → 0)
    pub fn new(values: Vec<f32>) -> Self {
        let values = values
            .into_iter()
            .map(|v| if v.is_nan() { 0.0 } else { v.clamp(0.0, MAX_FEATURE_VALUE) })
            .collect();
        Self { values }
    }

    /// From byte-scaled analyser output (live capture)
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            values: bytes.iter().map(|&b| b as f32).collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Values divided by 255, ready for the network
    pub fn normalized(&self) -> impl Iterator<Item = f32> + '_ {
        self.values.iter().map(|v| v / MAX_FEATURE_VALUE)
    }

    /// Diagnostic loudness on a 0-100 scale
    pub fn amplitude(&self) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.values.iter().sum::<f32>() / self.values.len() as f32;
        mean / AMPLITUDE_DIVISOR
    }

    /// Voice shield: attenuate the speech band before scoring
    pub fn suppress_voice_band(&self) -> Self {
        self.attenuate_band(VOICE_BAND_START, VOICE_BAND_END, VOICE_ATTENUATION)
    }

    pub fn attenuate_band(&self, start: usize, end: usize, factor: f32) -> Self {
        let values = self
            .values
            .iter()
            .enumerate()
            .map(|(i, &v)| if i >= start && i < end { v * factor } else { v })
            .collect();
        Self::new(values)
    }
}

// ============================================================================
// EXTRACTOR
// ============================================================================

pub struct SpectralExtractor {
    config: SpectralConfig,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for SpectralExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralExtractor")
            .field("config", &self.config)
            .finish()
    }
}

impl SpectralExtractor {
    pub fn new(config: SpectralConfig) -> SentinelResult<Self> {
        config.validate()?;

        let n = config.fft_size;
        // Periodic Hann
        let window = (0..n)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos())
            .collect();
        let fft = FftPlanner::<f32>::new().plan_fft_forward(n);

        Ok(Self { config, window, fft })
    }

    pub fn config(&self) -> &SpectralConfig {
        &self.config
    }

    /// Frame width W produced by this extractor
    pub fn width(&self) -> usize {
        self.config.bins
    }

    /// Number of frames `frames()` will yield for `len` samples
    pub fn frame_count(&self, len: usize) -> usize {
        if len < self.config.fft_size {
            0
        } else {
            (len - self.config.fft_size) / self.config.hop_length + 1
        }
    }

    /// Seconds between consecutive frame starts
    pub fn frame_period(&self, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.config.hop_length as f64 / sample_rate as f64
    }

    /// Lazy frame sequence; empty if the waveform is shorter than one window
    pub fn frames<'a>(&'a self, samples: &'a [f32]) -> SpectralFrames<'a> {
        SpectralFrames {
            extractor: self,
            samples,
            index: 0,
            total: self.frame_count(samples.len()),
            buffer: Vec::with_capacity(self.config.fft_size),
        }
    }

    fn compute_frame(&self, chunk: &[f32], buffer: &mut Vec<Complex<f32>>) -> FeatureFrame {
        buffer.clear();
        buffer.extend(
            chunk
                .iter()
                .zip(self.window.iter())
                .map(|(&s, &w)| Complex::new(s * w, 0.0)),
        );
        self.fft.process(buffer);

        let gain = self.config.gain;
        let values = buffer
            .iter()
            .take(self.config.bins)
            .map(|c| (c.norm() * gain).min(MAX_FEATURE_VALUE))
            .collect();
        FeatureFrame::new(values)
    }

    /// Frames for the training buffer: at most `max_frames`, uniform stride
    pub fn training_frames(&self, samples: &[f32], max_frames: usize) -> Vec<FeatureFrame> {
        let total = self.frame_count(samples.len());
        if total == 0 || max_frames == 0 {
            return Vec::new();
        }
        let stride = (total / max_frames).max(1);
        self.frames(samples)
            .step_by(stride)
            .take(max_frames)
            .collect()
    }
}

/// Iterator over the frames of one waveform
pub struct SpectralFrames<'a> {
    extractor: &'a SpectralExtractor,
    samples: &'a [f32],
    index: usize,
    total: usize,
    buffer: Vec<Complex<f32>>,
}

impl<'a> Iterator for SpectralFrames<'a> {
    type Item = FeatureFrame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.total {
            return None;
        }
        let cfg = &self.extractor.config;
        let start = self.index * cfg.hop_length;
        let chunk = &self.samples[start..start + cfg.fft_size];
        self.index += 1;
        Some(self.extractor.compute_frame(chunk, &mut self.buffer))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.index;
        (remaining, Some(remaining))
    }
}

impl<'a> ExactSizeIterator for SpectralFrames<'a> {}
