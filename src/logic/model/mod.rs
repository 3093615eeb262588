//! Model Module - Autoencoder lifecycle
//!
//! Network, Training Buffer, threshold calibration, persisted bundle and
//! the `AnomalyDetector` context that ties them together.

pub mod autoencoder;
pub mod buffer;
pub mod bundle;
pub mod config;
pub mod detector;
pub mod threshold;
pub mod training;

#[cfg(test)]
mod tests;

// Re-export common types
pub use autoencoder::{Autoencoder, NetworkTopology};
pub use buffer::{BufferStatus, SampleLabel, TrainingSample};
pub use bundle::{BundleMetadata, ModelBundle};
pub use config::{ModelConfig, ModelConfigUpdate};
pub use detector::{AnomalyDetector, DetectorPhase, DetectorStatus, LoadSummary, ScoreResult};
pub use threshold::{AutoCalibration, CalibrationConfig, CalibrationOutcome, CalibrationStatus};
pub use training::{spawn_retraining, EpochProgress, TrainingControl, TrainingHandle, TrainingReport};
