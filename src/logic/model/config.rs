//! Model Configuration
//!
//! Immutable per training run. Changing it rebuilds the network from scratch.

use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_EPOCHS, DEFAULT_LATENT_DIM, DEFAULT_LEARNING_RATE};
use crate::error::{SentinelError, SentinelResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelConfig {
    pub epochs: usize,
    pub learning_rate: f32,
    pub batch_size: usize,
    /// Bottleneck width, must be < input width
    pub latent_dim: usize,
    /// Fixed RNG seed for weight init + shuffling (None = entropy)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_EPOCHS,
            learning_rate: DEFAULT_LEARNING_RATE,
            batch_size: DEFAULT_BATCH_SIZE,
            latent_dim: DEFAULT_LATENT_DIM,
            seed: None,
        }
    }
}

impl ModelConfig {
    /// Reject configs the network cannot be built or trained with
    pub fn validate(&self, input_width: usize) -> SentinelResult<()> {
        if self.epochs == 0 {
            return Err(SentinelError::InvalidConfig("epochs must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(SentinelError::InvalidConfig("batchSize must be positive".to_string()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(SentinelError::InvalidConfig(format!(
                "learningRate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.latent_dim == 0 || self.latent_dim >= input_width {
            return Err(SentinelError::InvalidConfig(format!(
                "latentDim must be in 1..{}, got {}",
                input_width, self.latent_dim
            )));
        }
        Ok(())
    }
}

/// Partial update, merged over the current config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfigUpdate {
    pub epochs: Option<usize>,
    pub learning_rate: Option<f32>,
    pub batch_size: Option<usize>,
    pub latent_dim: Option<usize>,
    /// `None` keeps the current seed, `Some(None)` (JSON `null`) goes back
    /// to entropy, `Some(Some(n))` fixes it
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub seed: Option<Option<u64>>,
}

/// A field that is present (even as `null`) becomes `Some`
fn present<'de, D>(deserializer: D) -> Result<Option<Option<u64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<u64>::deserialize(deserializer).map(Some)
}

impl ModelConfigUpdate {
    pub fn apply(&self, base: &ModelConfig) -> ModelConfig {
        ModelConfig {
            epochs: self.epochs.unwrap_or(base.epochs),
            learning_rate: self.learning_rate.unwrap_or(base.learning_rate),
            batch_size: self.batch_size.unwrap_or(base.batch_size),
            latent_dim: self.latent_dim.unwrap_or(base.latent_dim),
            seed: self.seed.unwrap_or(base.seed),
        }
    }
}
