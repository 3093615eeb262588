//! Logic Module - Detection engine
//!
//! - `features/` - Spectral feature extraction + layout versioning
//! - `model/` - Autoencoder, training buffer, calibration, bundle, detector context
//! - `scoring/` - Streaming scorer, file scans, live sessions
//! - `incident/` - Segmentation + optional external verification
//! - `audio/` - WAV decode/encode boundary
//! - `config` - `SentinelConfig`

pub mod audio;
pub mod config;
pub mod features;
pub mod incident;
pub mod model;
pub mod scoring;
