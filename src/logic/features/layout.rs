//! Feature Layout - Spectral Frame Schema
//!
//! **This file controls the feature schema a model is trained against.**
//!
//! ## Rules (NEVER break these):
//! 1. Change how a frame is computed → increment FEATURE_VERSION
//! 2. Change bin order / scaling semantics → increment FEATURE_VERSION
//!
//! A model bundle records the layout it was trained with. Loading a bundle
//! whose layout hash does not match its own fields (or whose version is
//! unknown) is rejected, so a model never silently scores frames computed
//! a different way.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use super::spectral::SpectralConfig;

// ============================================================================
// FEATURE VERSION
// ============================================================================

/// Current spectral frame layout version
/// MUST be incremented when frame computation changes
pub const FEATURE_VERSION: u8 = 1;

// ============================================================================
// LAYOUT DESCRIPTOR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureLayout {
    pub version: u8,
    pub fft_size: usize,
    pub hop_length: usize,
    pub width: usize,
    pub gain: f32,
    pub hash: u32,
}

impl FeatureLayout {
    pub fn from_spectral(config: &SpectralConfig) -> Self {
        let mut layout = Self {
            version: FEATURE_VERSION,
            fft_size: config.fft_size,
            hop_length: config.hop_length,
            width: config.bins,
            gain: config.gain,
            hash: 0,
        };
        layout.hash = layout.compute_hash();
        layout
    }

    /// CRC32 over version + every field, in declaration order
    pub fn compute_hash(&self) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&[self.version]);
        hasher.update(&(self.fft_size as u64).to_le_bytes());
        hasher.update(&(self.hop_length as u64).to_le_bytes());
        hasher.update(&(self.width as u64).to_le_bytes());
        hasher.update(&self.gain.to_le_bytes());
        hasher.finalize()
    }

    /// Spectral config equivalent to this layout
    pub fn to_spectral(&self) -> SpectralConfig {
        SpectralConfig {
            fft_size: self.fft_size,
            hop_length: self.hop_length,
            bins: self.width,
            gain: self.gain,
        }
    }
}

impl Default for FeatureLayout {
    fn default() -> Self {
        Self::from_spectral(&SpectralConfig::default())
    }
}

// ============================================================================
// LAYOUT VALIDATION
// ============================================================================

/// Error when a stored layout doesn't match what this build understands
#[derive(Debug, Clone)]
pub struct LayoutMismatchError {
    pub expected_version: u8,
    pub actual_version: u8,
    pub expected_hash: u32,
    pub actual_hash: u32,
}

impl std::fmt::Display for LayoutMismatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Feature layout mismatch: expected v{} (hash: {:08x}), got v{} (hash: {:08x})",
            self.expected_version,
            self.expected_hash,
            self.actual_version,
            self.actual_hash
        )
    }
}

impl std::error::Error for LayoutMismatchError {}

/// Validate a layout read from disk
pub fn validate_layout(layout: &FeatureLayout) -> Result<(), LayoutMismatchError> {
    let expected_hash = layout.compute_hash();
    if layout.version != FEATURE_VERSION || layout.hash != expected_hash {
        return Err(LayoutMismatchError {
            expected_version: FEATURE_VERSION,
            actual_version: layout.version,
            expected_hash,
            actual_hash: layout.hash,
        });
    }
    Ok(())
}
