//! Engine Configuration
//!
//! Every tunable constant grouped by component. Missing JSON fields fall
//! back to the defaults in `constants`; environment variables override the
//! file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{get_config_path, get_default_model_path};
use crate::error::{SentinelError, SentinelResult};
use crate::logic::features::{FeatureLayout, SpectralConfig};
use crate::logic::incident::verify::VerifierConfig;
use crate::logic::incident::SegmenterConfig;
use crate::logic::model::{CalibrationConfig, ModelConfig};
use crate::logic::scoring::ScoringConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub spectral: SpectralConfig,
    pub model: ModelConfig,
    pub calibration: CalibrationConfig,
    pub scoring: ScoringConfig,
    pub segmenter: SegmenterConfig,
    pub verifier: VerifierConfig,
    /// Bundle location; platform data dir when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl SentinelConfig {
    /// Parse and validate a config file
    pub fn load(path: &Path) -> SentinelResult<Self> {
        let data = fs::read(path)?;
        let config: SentinelConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> SentinelResult<Self> {
        if !path.exists() {
            log::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// File (explicit path or platform default) + environment overrides
    pub fn resolve(path: Option<&Path>) -> SentinelResult<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(get_config_path);
        let mut config = Self::load_or_default(&path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> SentinelResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `SENTINEL_*` overrides from any key lookup; unparsable values are ignored
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = parsed(&lookup, "SENTINEL_SENSITIVITY") {
            self.calibration.default_sensitivity = v;
        }
        if let Some(v) = parsed(&lookup, "SENTINEL_SIGMA") {
            self.calibration.sigma_multiplier = v;
        }
        if let Some(v) = parsed(&lookup, "SENTINEL_MERGE_GAP_SECS") {
            self.segmenter.merge_gap_secs = v;
        }
        if let Some(url) = lookup("SENTINEL_VERIFIER_URL") {
            self.verifier.url = url;
        }
        if let Some(key) = lookup("SENTINEL_VERIFIER_KEY") {
            self.verifier.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> SentinelResult<()> {
        self.spectral.validate()?;
        self.model.validate(self.spectral.bins)?;
        self.calibration.validate()?;
        self.scoring.validate()?;
        self.segmenter.validate()?;
        if self.verifier.is_enabled() && self.verifier.timeout_secs == 0 {
            return Err(SentinelError::InvalidConfig(
                "verifier timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn feature_layout(&self) -> FeatureLayout {
        FeatureLayout::from_spectral(&self.spectral)
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_path.clone().unwrap_or_else(get_default_model_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = SentinelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.spectral.bins, 128);
        assert_eq!(config.segmenter.merge_gap_secs, 0.8);
        assert_eq!(config.scoring.file_window, 8);
        assert_eq!(config.scoring.live_window, 5);
        assert_eq!(config.calibration.sigma_multiplier, 3.5);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "segmenter": { "merge_gap_secs": 1.5 }, "model": { "latentDim": 12 } }"#).unwrap();

        let config = SentinelConfig::load(&path).unwrap();
        assert_eq!(config.segmenter.merge_gap_secs, 1.5);
        assert_eq!(config.segmenter.high_ratio, 3.0);
        assert_eq!(config.model.latent_dim, 12);
        assert_eq!(config.model.epochs, 81);
    }

    #[test]
    fn test_save_load_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut original = SentinelConfig::default();
        original.scoring.voice_shield = true;
        original.model_path = Some(PathBuf::from("/tmp/model.sentinel"));
        original.save(&path).unwrap();

        assert_eq!(SentinelConfig::load(&path).unwrap(), original);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = SentinelConfig::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, SentinelConfig::default());
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "model": { "latentDim": 500 } }"#).unwrap();
        assert!(matches!(SentinelConfig::load(&path), Err(SentinelError::InvalidConfig(_))));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(SentinelConfig::load(&path), Err(SentinelError::Json(_))));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("SENTINEL_SENSITIVITY", "4.5"),
            ("SENTINEL_SIGMA", " 2.0 "),
            ("SENTINEL_MERGE_GAP_SECS", "oops"),
            ("SENTINEL_VERIFIER_URL", "http://localhost:9000/verify"),
        ]
        .into_iter()
        .collect();

        let mut config = SentinelConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.calibration.default_sensitivity, 4.5);
        assert_eq!(config.calibration.sigma_multiplier, 2.0);
        assert_eq!(config.segmenter.merge_gap_secs, 0.8);
        assert!(config.verifier.is_enabled());
        assert_eq!(config.verifier.api_key, None);
    }
}
