//! Central Configuration Constants
//!
//! Single source of truth for all engine defaults.
//! The values are empirically tuned; `SentinelConfig` exposes each of them
//! as a configurable field so deployments can override without recompiling.

use std::path::PathBuf;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "Acoustic Sentinel";

/// Directory name used under the platform config/data dirs
pub const APP_DIR_NAME: &str = "acoustic-sentinel";

// ============================================
// Spectral features
// ============================================

/// FFT window length (samples)
pub const DEFAULT_FFT_SIZE: usize = 256;

/// Hop between consecutive windows (samples)
pub const DEFAULT_HOP_LENGTH: usize = 512;

/// Number of magnitude bins kept per frame (= model input width)
pub const DEFAULT_FRAME_WIDTH: usize = 128;

/// Gain applied to raw FFT magnitudes before clamping
pub const DEFAULT_SPECTRAL_GAIN: f32 = 1800.0;

/// Upper bound of a feature value; also the normalisation divisor
pub const MAX_FEATURE_VALUE: f32 = 255.0;

/// Amplitude diagnostic = mean(frame) / this (0-100 scale)
pub const AMPLITUDE_DIVISOR: f32 = 2.55;

/// Max frames taken from one recording when filling the training buffer
pub const MAX_TRAINING_FRAMES_PER_SAMPLE: usize = 100;

/// Voice shield: attenuated bin range (inclusive start, exclusive end)
pub const VOICE_BAND_START: usize = 9;
pub const VOICE_BAND_END: usize = 40;

/// Voice shield attenuation factor
pub const VOICE_ATTENUATION: f32 = 0.2;

// ============================================
// Model
// ============================================

pub const DEFAULT_EPOCHS: usize = 81;
pub const DEFAULT_LEARNING_RATE: f32 = 0.0006;
pub const DEFAULT_BATCH_SIZE: usize = 33;
pub const DEFAULT_LATENT_DIM: usize = 9;

/// Sample rate reported before any data has been seen
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Reconstruction MSE is multiplied by this to get a readable score
pub const SCORE_SCALE: f32 = 10_000.0;

// ============================================
// Threshold calibration
// ============================================

/// Numerator of the sensitivity term: effective = base * (2 / sensitivity) * scale
pub const SENSITIVITY_NUMERATOR: f32 = 2.0;

pub const DEFAULT_SENSITIVITY: f32 = 2.0;
pub const MIN_SENSITIVITY: f32 = 0.1;
pub const MAX_SENSITIVITY: f32 = 10.0;

/// Percentile of NORMAL reconstruction errors used as baseline
pub const NORMAL_PERCENTILE: f32 = 0.99;

/// Percentile of ANOMALY reconstruction errors used for the separation check
pub const ANOMALY_PERCENTILE: f32 = 0.10;

/// Safety margin on top of the NORMAL percentile
pub const SAFETY_MARGIN: f32 = 1.05;

/// Sigma multiplier for signal-statistics auto-calibration
pub const SIGMA_MULTIPLIER: f32 = 3.5;

/// energy_factor = 1 + avg_amplitude / this
pub const ENERGY_DIVISOR: f32 = 100.0;

// ============================================
// Scoring & segmentation
// ============================================

/// Smoothing window for file scans
pub const FILE_SMOOTHING_WINDOW: usize = 8;

/// Smoothing window for live sessions
pub const LIVE_SMOOTHING_WINDOW: usize = 5;

/// Scored frames kept in the live history
pub const LIVE_HISTORY_CAPACITY: usize = 150;

/// Yield to the runtime every N frames during an async file scan
pub const SCAN_YIELD_INTERVAL: usize = 300;

/// Max gap (seconds) between qualifying frames of one incident
pub const MERGE_GAP_SECS: f64 = 0.8;

/// Intensity ratios for severity classes
pub const HIGH_SEVERITY_RATIO: f32 = 3.0;
pub const MEDIUM_SEVERITY_RATIO: f32 = 1.8;

/// Frame period assumed when it cannot be inferred from timestamps
pub const DEFAULT_FRAME_PERIOD_SECS: f64 = 0.032;

/// Seconds of audio added around an incident when cutting a verification clip
pub const VERIFY_CLIP_PADDING_SECS: f64 = 0.5;

// ============================================
// Persistence
// ============================================

/// Model bundle format version
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Model bundle file extension
pub const BUNDLE_EXTENSION: &str = "sentinel";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Directory where model bundles are stored by default
pub fn get_model_dir() -> PathBuf {
    std::env::var("SENTINEL_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR_NAME)
                .join("models")
        })
}

/// Default path of the persisted model bundle
pub fn get_default_model_path() -> PathBuf {
    get_model_dir().join(format!("model-custom.{}", BUNDLE_EXTENSION))
}

/// Default path of the JSON config file
pub fn get_config_path() -> PathBuf {
    std::env::var("SENTINEL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR_NAME)
                .join("config.json")
        })
}

