//! Engine Commands - Session context for hosts (CLI, UI bridge)
//!
//! `Engine::init` builds the one detector of a session from `SentinelConfig`
//! and restores the persisted model if there is one. Every command returns
//! either data or a `CommandMessage` the host can show as-is.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::status::{CommandMessage, EngineStatus};
use crate::constants::{APP_VERSION, MAX_TRAINING_FRAMES_PER_SAMPLE};
use crate::error::SentinelResult;
use crate::logic::audio::decode_wav;
use crate::logic::config::SentinelConfig;
use crate::logic::features::SpectralExtractor;
use crate::logic::incident::{verify_incidents, AnomalyVerifier, HttpVerifier};
use crate::logic::model::{
    AnomalyDetector, CalibrationStatus, EpochProgress, LoadSummary, ModelConfigUpdate, SampleLabel,
    TrainingControl, TrainingReport,
};
use crate::logic::scoring::{scan_waveform, AnalysisReport, ScanOptions};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// One labeled recording waiting in the training queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub path: PathBuf,
    pub label: SampleLabel,
}

/// Per-file progress of a queue run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileProgress {
    /// 1-based
    pub index: usize,
    pub total: usize,
    pub path: PathBuf,
    /// Frames buffered from this file, None if it was skipped
    pub frames: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTrainingSummary {
    pub message: CommandMessage,
    pub files_loaded: usize,
    pub files_skipped: usize,
    pub report: Option<TrainingReport>,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct Engine {
    config: SentinelConfig,
    extractor: SpectralExtractor,
    detector: Arc<AnomalyDetector>,
    verifier: Option<Box<dyn AnomalyVerifier>>,
}

impl Engine {
    /// Build the session context; a stored model is restored when compatible
    pub fn init(config: SentinelConfig) -> SentinelResult<Self> {
        config.validate()?;
        let extractor = SpectralExtractor::new(config.spectral.clone())?;
        let detector = Arc::new(AnomalyDetector::new(
            config.feature_layout(),
            config.model.clone(),
            config.calibration.clone(),
        )?);

        let verifier: Option<Box<dyn AnomalyVerifier>> = if config.verifier.is_enabled() {
            Some(Box::new(HttpVerifier::new(config.verifier.clone())))
        } else {
            None
        };

        let engine = Self {
            config,
            extractor,
            detector,
            verifier,
        };

        let model_path = engine.config.model_path();
        if model_path.exists() {
            match engine.detector.load_from_path(&model_path) {
                Ok(summary) => log::info!(
                    "Restored model from {:?} ({} Hz)",
                    model_path,
                    summary.sample_rate
                ),
                Err(e) => log::warn!("Stored model at {:?} ignored: {}", model_path, e),
            }
        }
        Ok(engine)
    }

    pub fn with_verifier(mut self, verifier: Box<dyn AnomalyVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn detector(&self) -> &Arc<AnomalyDetector> {
        &self.detector
    }

    pub fn extractor(&self) -> &SpectralExtractor {
        &self.extractor
    }

    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    pub fn status(&self) -> EngineStatus {
        let layout = self.detector.layout();
        EngineStatus {
            version: APP_VERSION.to_string(),
            feature_version: layout.version,
            layout_hash: layout.hash,
            frame_width: layout.width,
            detector: self.detector.status(),
            model_path: self.config.model_path().display().to_string(),
            verifier_enabled: self.verifier.is_some(),
        }
    }

    // ------------------------------------------------------------------------
    // Training
    // ------------------------------------------------------------------------

    /// Decode, subsample and buffer every queued file, then retrain.
    /// Undecodable files are skipped; the buffer is replaced, not extended.
    pub fn train_from_queue<P, E>(
        &self,
        items: &[QueueItem],
        mut on_file: P,
        on_epoch: E,
    ) -> QueueTrainingSummary
    where
        P: FnMut(&FileProgress),
        E: FnMut(&EpochProgress) -> TrainingControl,
    {
        self.detector.clear_buffer();
        let mut loaded = 0;
        let mut skipped = 0;

        for (i, item) in items.iter().enumerate() {
            let frames = match decode_wav(&item.path) {
                Ok(audio) => {
                    let frames = self
                        .extractor
                        .training_frames(&audio.samples, MAX_TRAINING_FRAMES_PER_SAMPLE);
                    let count = frames.len();
                    let id = item.path.display().to_string();
                    match self
                        .detector
                        .add_sample(Some(id), frames, item.label, audio.sample_rate)
                    {
                        Ok(_) => Some(count),
                        Err(e) => {
                            log::warn!("Skipping {:?}: {}", item.path, e);
                            None
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Skipping {:?}: {}", item.path, e);
                    None
                }
            };

            match frames {
                Some(_) => loaded += 1,
                None => skipped += 1,
            }
            on_file(&FileProgress {
                index: i + 1,
                total: items.len(),
                path: item.path.clone(),
                frames,
            });
        }

        let (message, report) = match self.detector.retrain(on_epoch) {
            Ok(report) => {
                let text = format!(
                    "Model trained on {} NORMAL / {} ANOMALY frames: {}",
                    report.normal_frames, report.anomaly_frames, report.calibration.message
                );
                let message = match report.calibration.status {
                    CalibrationStatus::Success => CommandMessage::success(text),
                    CalibrationStatus::Warning => CommandMessage::warning(text),
                };
                (message, Some(report))
            }
            Err(e) => {
                log::warn!("Queue training failed: {}", e);
                (CommandMessage::error(&e), None)
            }
        };

        QueueTrainingSummary {
            message,
            files_loaded: loaded,
            files_skipped: skipped,
            report,
        }
    }

    pub fn update_config(&self, update: &ModelConfigUpdate) -> CommandMessage {
        match self.detector.update_config(update) {
            Ok(config) => CommandMessage::warning(format!(
                "Model rebuilt with latentDim={} epochs={}; retrain before scoring",
                config.latent_dim, config.epochs
            )),
            Err(e) => CommandMessage::error(&e),
        }
    }

    pub fn set_sensitivity(&self, sensitivity: f32) -> CommandMessage {
        match self.detector.set_sensitivity(sensitivity) {
            Ok(()) => CommandMessage::success(format!("Sensitivity set to {:.2}", sensitivity)),
            Err(e) => CommandMessage::error(&e),
        }
    }

    // ------------------------------------------------------------------------
    // Analysis
    // ------------------------------------------------------------------------

    /// Full file analysis; incidents are annotated when a verifier is set
    pub fn analyze_file(&self, path: &Path) -> SentinelResult<AnalysisReport> {
        let audio = decode_wav(path)?;
        let options = ScanOptions::from_config(&self.config.scoring, &self.config.segmenter);
        let mut report = scan_waveform(
            &self.detector,
            &self.extractor,
            &audio.samples,
            audio.sample_rate,
            &options,
        )?;

        if let Some(verifier) = &self.verifier {
            let verified = verify_incidents(
                &mut report.incidents,
                &audio,
                verifier.as_ref(),
                self.config.verifier.clip_padding_secs,
            );
            log::info!("{}/{} incident(s) verified", verified, report.incidents.len());
        }
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    pub fn save_model(&self) -> CommandMessage {
        let path = self.config.model_path();
        match self.detector.save_to_path(&path) {
            Ok(()) => CommandMessage::success(format!("Model saved to {}", path.display())),
            Err(e) => CommandMessage::error(&e),
        }
    }

    pub fn load_model(&self, path: &Path) -> SentinelResult<LoadSummary> {
        self.detector.load_from_path(path)
    }
}
