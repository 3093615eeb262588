//! Features Module - Spectral Feature Extraction
//!
//! Raw PCM → fixed-width magnitude-spectrum frames for the autoencoder.
//! `layout` versions the frame schema so persisted models can be checked.

pub mod spectral;
pub mod layout;

#[cfg(test)]
mod tests;

// Re-export common types
pub use spectral::{FeatureFrame, SpectralConfig, SpectralExtractor, SpectralFrames};
pub use layout::{FeatureLayout, FEATURE_VERSION};
