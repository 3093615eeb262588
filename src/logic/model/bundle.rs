//! Model Bundle - Self-describing persisted model
//!
//! One JSON document: topology, base64 weight blob (f32 little-endian),
//! per-tensor manifest, SHA-256 of the blob and the metadata needed to
//! interpret scores (sample rate, input width, base threshold, config,
//! feature layout).
//!
//! # Failure Strategy
//! Any mismatch → `InvalidBundle`. Nothing is applied until the whole
//! bundle has been parsed and validated.

use std::fs;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::autoencoder::{Autoencoder, NetworkTopology, WeightSpec};
use super::config::ModelConfig;
use crate::constants::BUNDLE_FORMAT_VERSION;
use crate::error::{SentinelError, SentinelResult};
use crate::logic::features::layout::{validate_layout, FeatureLayout};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    pub sample_rate: u32,
    pub input_size: usize,
    /// None for a configured but never trained network
    pub trained_at: Option<DateTime<Utc>>,
    /// Raw-MSE units, never recomputed on load (None = uncalibrated)
    pub base_threshold: Option<f32>,
    pub config: ModelConfig,
    pub feature_layout: FeatureLayout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelBundle {
    pub format_version: u32,
    pub model_topology: NetworkTopology,
    pub weights_data: String,
    pub weight_specs: Vec<WeightSpec>,
    /// Hex SHA-256 of the decoded weight bytes
    pub weights_checksum: String,
    pub metadata: BundleMetadata,
}

fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn invalid(msg: impl Into<String>) -> SentinelError {
    SentinelError::InvalidBundle(msg.into())
}

impl ModelBundle {
    pub fn pack(network: &Autoencoder, metadata: BundleMetadata) -> Self {
        let (weight_specs, values) = network.export_weights();
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();

        Self {
            format_version: BUNDLE_FORMAT_VERSION,
            model_topology: network.topology().clone(),
            weights_checksum: checksum(&bytes),
            weights_data: BASE64.encode(&bytes),
            weight_specs,
            metadata,
        }
    }

    /// Validate everything and rebuild the network
    pub fn unpack(&self) -> SentinelResult<Autoencoder> {
        if self.format_version != BUNDLE_FORMAT_VERSION {
            return Err(invalid(format!(
                "unsupported format version {} (expected {})",
                self.format_version, BUNDLE_FORMAT_VERSION
            )));
        }

        let meta = &self.metadata;
        validate_layout(&meta.feature_layout).map_err(|e| invalid(e.to_string()))?;

        let width = self.model_topology.input_width;
        if meta.input_size != width || meta.feature_layout.width != width {
            return Err(invalid(format!(
                "input width disagreement: metadata {}, layout {}, topology {}",
                meta.input_size, meta.feature_layout.width, width
            )));
        }
        if meta.config.latent_dim != self.model_topology.latent_dim {
            return Err(invalid("config latentDim does not match topology"));
        }
        meta.config
            .validate(width)
            .map_err(|e| invalid(e.to_string()))?;
        if meta.sample_rate == 0 {
            return Err(invalid("sample rate must be positive"));
        }
        if let Some(base) = meta.base_threshold {
            if !(base.is_finite() && base >= 0.0) {
                return Err(invalid(format!("bad base threshold {}", base)));
            }
        }

        let bytes = BASE64.decode(self.weights_data.as_bytes())?;
        if checksum(&bytes) != self.weights_checksum {
            return Err(invalid("weights checksum mismatch"));
        }
        if bytes.len() % 4 != 0 {
            return Err(invalid("weights blob is not a whole number of f32 values"));
        }
        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Autoencoder::from_weights(self.model_topology.clone(), &self.weight_specs, &values)
    }

    pub fn to_bytes(&self) -> SentinelResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> SentinelResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| invalid(format!("malformed bundle: {}", e)))
    }

    /// Save bundle to disk
    pub fn save(&self, path: &Path) -> SentinelResult<()> {
        // Ensure directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Load bundle from disk (parse only, call `unpack` to validate)
    pub fn load(path: &Path) -> SentinelResult<Self> {
        let data = fs::read(path)?;
        Self::from_bytes(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn bundle() -> ModelBundle {
        let net = Autoencoder::new(16, 3, &mut StdRng::seed_from_u64(1));
        let layout = FeatureLayout::from_spectral(&crate::logic::features::SpectralConfig {
            fft_size: 32,
            hop_length: 32,
            bins: 16,
            gain: 1800.0,
        });
        ModelBundle::pack(
            &net,
            BundleMetadata {
                sample_rate: 22050,
                input_size: 16,
                trained_at: Some(Utc::now()),
                base_threshold: Some(0.00123),
                config: ModelConfig { latent_dim: 3, ..Default::default() },
                feature_layout: layout,
            },
        )
    }

    #[test]
    fn test_bytes_roundtrip() {
        let original = bundle();
        let parsed = ModelBundle::from_bytes(&original.to_bytes().unwrap()).unwrap();

        assert_eq!(parsed.metadata, original.metadata);
        assert_eq!(parsed.unpack().unwrap(), original.unpack().unwrap());
    }

    #[test]
    fn test_save_load_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.sentinel");

        let original = bundle();
        original.save(&path).unwrap();
        let loaded = ModelBundle::load(&path).unwrap();

        assert_eq!(loaded.metadata.sample_rate, 22050);
        assert_eq!(loaded.metadata.base_threshold, Some(0.00123));
        assert!(loaded.unpack().is_ok());
    }

    #[test]
    fn test_reject_checksum_mismatch() {
        let mut b = bundle();
        let mut bytes = BASE64.decode(b.weights_data.as_bytes()).unwrap();
        bytes[0] ^= 0xFF;
        b.weights_data = BASE64.encode(&bytes);

        assert!(matches!(b.unpack(), Err(SentinelError::InvalidBundle(_))));
    }

    #[test]
    fn test_reject_version_and_metadata_mismatch() {
        let mut b = bundle();
        b.format_version = BUNDLE_FORMAT_VERSION + 1;
        assert!(b.unpack().is_err());

        let mut b = bundle();
        b.metadata.input_size = 32;
        assert!(b.unpack().is_err());

        let mut b = bundle();
        b.metadata.base_threshold = Some(f32::NAN);
        assert!(b.unpack().is_err());

        let mut b = bundle();
        b.metadata.feature_layout.hop_length = 64;
        assert!(b.unpack().is_err());
    }

    #[test]
    fn test_reject_garbage() {
        assert!(matches!(
            ModelBundle::from_bytes(b"{not json"),
            Err(SentinelError::InvalidBundle(_))
        ));
    }
}
