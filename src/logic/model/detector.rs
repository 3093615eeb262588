//! Anomaly Detector - Owned model context
//!
//! One instance owns the network, its calibration state, the sensitivity
//! knob and the Training Buffer. Callers create it once per session and
//! share it (usually behind an `Arc`).
//!
//! # Phases
//! `Idle` ⇄ `Training`. While training, `score` answers with the neutral
//! result instead of blocking, and `configure`/`load` refuse with `Busy`.
//! Training runs on a copy of the network; the live one is replaced only
//! after the run finished and calibrated, so a failed, diverged or
//! cancelled run leaves the previous model untouched.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use chrono::{DateTime, Utc};
use ndarray::Array2;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::autoencoder::{Adam, Autoencoder};
use super::buffer::{BufferStatus, SampleLabel, TrainingBuffer, TrainingSample};
use super::bundle::{BundleMetadata, ModelBundle};
use super::config::{ModelConfig, ModelConfigUpdate};
use super::threshold::{self, calibrate_from_errors, AutoCalibration, CalibrationConfig};
use super::training::{EpochProgress, TrainingControl, TrainingReport};
use crate::constants::DEFAULT_SAMPLE_RATE;
use crate::error::{SentinelError, SentinelResult};
use crate::logic::features::layout::{validate_layout, FeatureLayout};
use crate::logic::features::FeatureFrame;
use crate::logic::scoring::ScoredFrame;

// ============================================================================
// PHASE STATE MACHINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum DetectorPhase {
    Idle,
    #[serde(rename_all = "camelCase")]
    Training { epoch: usize, total_epochs: usize },
}

/// Puts the detector back to `Idle` on every exit path
struct TrainingGuard<'a> {
    phase: &'a Mutex<DetectorPhase>,
}

impl Drop for TrainingGuard<'_> {
    fn drop(&mut self) {
        *self.phase.lock() = DetectorPhase::Idle;
    }
}

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Per-frame verdict
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    pub score: f32,
    pub is_anomaly: bool,
}

impl ScoreResult {
    pub const NEUTRAL: ScoreResult = ScoreResult {
        score: 0.0,
        is_anomaly: false,
    };
}

/// What a successful `load` installed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSummary {
    pub sample_rate: u32,
    pub input_width: usize,
    pub base_threshold: Option<f32>,
    pub trained_at: Option<DateTime<Utc>>,
    pub config: ModelConfig,
}

/// Snapshot for UI polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorStatus {
    pub phase: DetectorPhase,
    pub is_trained: bool,
    pub sample_rate: u32,
    pub input_width: usize,
    pub base_threshold: Option<f32>,
    pub effective_threshold: Option<f32>,
    pub sensitivity: f32,
    pub trained_at: Option<DateTime<Utc>>,
    pub config: ModelConfig,
    pub buffer: BufferStatus,
}

// ============================================================================
// DETECTOR
// ============================================================================

struct ModelSlot {
    network: Autoencoder,
    config: ModelConfig,
    /// Raw-MSE units; None until calibrated
    base_threshold: Option<f32>,
    trained_at: Option<DateTime<Utc>>,
    sample_rate: u32,
}

pub struct AnomalyDetector {
    layout: FeatureLayout,
    calibration: CalibrationConfig,
    slot: RwLock<ModelSlot>,
    phase: Mutex<DetectorPhase>,
    sensitivity: RwLock<f32>,
    buffer: Mutex<TrainingBuffer>,
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn check_width(frame: &FeatureFrame, expected: usize) -> SentinelResult<()> {
    if frame.width() != expected {
        return Err(SentinelError::FrameWidth {
            expected,
            actual: frame.width(),
        });
    }
    Ok(())
}

/// Stack frames into a (n, W) matrix normalized to [0, 1]
pub fn frames_to_matrix(frames: &[FeatureFrame], width: usize) -> SentinelResult<Array2<f32>> {
    let mut data = Vec::with_capacity(frames.len() * width);
    for frame in frames {
        check_width(frame, width)?;
        data.extend(frame.normalized());
    }
    Array2::from_shape_vec((frames.len(), width), data)
        .map_err(|e| SentinelError::InvalidConfig(e.to_string()))
}

impl AnomalyDetector {
    /// Untrained detector for frames described by `layout`
    pub fn new(
        layout: FeatureLayout,
        config: ModelConfig,
        calibration: CalibrationConfig,
    ) -> SentinelResult<Self> {
        validate_layout(&layout).map_err(|e| SentinelError::InvalidConfig(e.to_string()))?;
        config.validate(layout.width)?;
        calibration.validate()?;

        let network = Autoencoder::new(layout.width, config.latent_dim, &mut make_rng(config.seed));
        let sensitivity = calibration.default_sensitivity;

        Ok(Self {
            layout,
            calibration,
            slot: RwLock::new(ModelSlot {
                network,
                config,
                base_threshold: None,
                trained_at: None,
                sample_rate: DEFAULT_SAMPLE_RATE,
            }),
            phase: Mutex::new(DetectorPhase::Idle),
            sensitivity: RwLock::new(sensitivity),
            buffer: Mutex::new(TrainingBuffer::new()),
        })
    }

    /// Detector restored from a persisted bundle, adopting its layout
    pub fn from_bundle_bytes(bytes: &[u8], calibration: CalibrationConfig) -> SentinelResult<Self> {
        let bundle = ModelBundle::from_bytes(bytes)?;
        let network = bundle.unpack()?;
        let meta = bundle.metadata;

        let detector = Self::new(meta.feature_layout.clone(), meta.config.clone(), calibration)?;
        *detector.slot.write() = ModelSlot {
            network,
            config: meta.config,
            base_threshold: meta.base_threshold,
            trained_at: meta.trained_at,
            sample_rate: meta.sample_rate,
        };
        Ok(detector)
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    pub fn input_width(&self) -> usize {
        self.layout.width
    }

    pub fn calibration(&self) -> &CalibrationConfig {
        &self.calibration
    }

    // ------------------------------------------------------------------------
    // Phase
    // ------------------------------------------------------------------------

    pub fn phase(&self) -> DetectorPhase {
        *self.phase.lock()
    }

    pub fn is_training(&self) -> bool {
        matches!(self.phase(), DetectorPhase::Training { .. })
    }

    fn begin_training(&self, total_epochs: usize) -> SentinelResult<TrainingGuard<'_>> {
        let mut phase = self.phase.lock();
        if let DetectorPhase::Training { .. } = *phase {
            return Err(SentinelError::Busy);
        }
        *phase = DetectorPhase::Training {
            epoch: 0,
            total_epochs,
        };
        Ok(TrainingGuard { phase: &self.phase })
    }

    // ------------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------------

    /// Rebuild the network with fresh weights; clears the base threshold
    pub fn configure(&self, config: ModelConfig) -> SentinelResult<()> {
        // Held across the rebuild so training cannot start midway
        let phase = self.phase.lock();
        if let DetectorPhase::Training { .. } = *phase {
            return Err(SentinelError::Busy);
        }
        config.validate(self.layout.width)?;

        let network = Autoencoder::new(self.layout.width, config.latent_dim, &mut make_rng(config.seed));
        let mut slot = self.slot.write();
        slot.network = network;
        slot.config = config;
        slot.base_threshold = None;
        slot.trained_at = None;

        log::info!(
            "Model rebuilt: width={} latentDim={} epochs={} lr={} batch={}",
            self.layout.width,
            slot.config.latent_dim,
            slot.config.epochs,
            slot.config.learning_rate,
            slot.config.batch_size
        );
        Ok(())
    }

    /// Merge a partial update into the current config, then `configure`
    pub fn update_config(&self, update: &ModelConfigUpdate) -> SentinelResult<ModelConfig> {
        let merged = update.apply(&self.config());
        self.configure(merged.clone())?;
        Ok(merged)
    }

    pub fn config(&self) -> ModelConfig {
        self.slot.read().config.clone()
    }

    pub fn set_sensitivity(&self, sensitivity: f32) -> SentinelResult<()> {
        threshold::validate_sensitivity(sensitivity)?;
        *self.sensitivity.write() = sensitivity;
        Ok(())
    }

    pub fn sensitivity(&self) -> f32 {
        *self.sensitivity.read()
    }

    // ------------------------------------------------------------------------
    // State accessors
    // ------------------------------------------------------------------------

    /// Calibrated at least once since the last rebuild
    pub fn is_trained(&self) -> bool {
        self.slot.read().base_threshold.is_some()
    }

    pub fn base_threshold(&self) -> Option<f32> {
        self.slot.read().base_threshold
    }

    pub fn trained_at(&self) -> Option<DateTime<Utc>> {
        self.slot.read().trained_at
    }

    pub fn sample_rate(&self) -> u32 {
        self.slot.read().sample_rate
    }

    /// Live decision threshold in score units
    pub fn effective_threshold(&self) -> SentinelResult<f32> {
        let base = self.base_threshold().ok_or(SentinelError::ThresholdUnset)?;
        self.calibration.effective_threshold(base, self.sensitivity())
    }

    pub fn status(&self) -> DetectorStatus {
        let phase = self.phase();
        let buffer = self.buffer_status();
        let sensitivity = self.sensitivity();
        let slot = self.slot.read();
        DetectorStatus {
            phase,
            is_trained: slot.base_threshold.is_some(),
            sample_rate: slot.sample_rate,
            input_width: self.layout.width,
            base_threshold: slot.base_threshold,
            effective_threshold: slot
                .base_threshold
                .and_then(|base| self.calibration.effective_threshold(base, sensitivity).ok()),
            sensitivity,
            trained_at: slot.trained_at,
            config: slot.config.clone(),
            buffer,
        }
    }

    // ------------------------------------------------------------------------
    // Training Buffer
    // ------------------------------------------------------------------------

    /// Append one labeled recording; returns its id
    pub fn add_sample(
        &self,
        id: Option<String>,
        frames: Vec<FeatureFrame>,
        label: SampleLabel,
        sample_rate: u32,
    ) -> SentinelResult<String> {
        if sample_rate == 0 {
            return Err(SentinelError::InvalidConfig(
                "sample rate must be positive".to_string(),
            ));
        }
        for frame in &frames {
            check_width(frame, self.layout.width)?;
        }

        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        log::debug!("Buffered {:?} sample {} ({} frames @ {} Hz)", label, id, frames.len(), sample_rate);
        self.buffer.lock().push(TrainingSample {
            id: id.clone(),
            frames,
            label,
            sample_rate,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    pub fn clear_buffer(&self) {
        self.buffer.lock().clear();
    }

    pub fn buffer_status(&self) -> BufferStatus {
        self.buffer.lock().status()
    }

    // ------------------------------------------------------------------------
    // Training
    // ------------------------------------------------------------------------

    /// Train from the buffer. On success the samples read for the run are
    /// removed; samples appended while it ran stay for the next one.
    pub fn retrain<F>(&self, observer: F) -> SentinelResult<TrainingReport>
    where
        F: FnMut(&EpochProgress) -> TrainingControl,
    {
        let (normal, anomaly, latest_rate, mark) = {
            let buffer = self.buffer.lock();
            (
                buffer.frames(SampleLabel::Normal),
                buffer.frames(SampleLabel::Anomaly),
                buffer.latest_sample_rate(),
                buffer.mark(),
            )
        };
        let sample_rate = latest_rate.unwrap_or_else(|| self.sample_rate());

        let report = self.train(&normal, &anomaly, sample_rate, observer)?;
        self.buffer.lock().consume_through(mark);
        Ok(report)
    }

    /// Fit on NORMAL frames, calibrate (ANOMALY frames only feed the
    /// separation check), then swap the result in
    pub fn train<F>(
        &self,
        normal: &[FeatureFrame],
        anomaly: &[FeatureFrame],
        sample_rate: u32,
        mut observer: F,
    ) -> SentinelResult<TrainingReport>
    where
        F: FnMut(&EpochProgress) -> TrainingControl,
    {
        if normal.is_empty() {
            return Err(SentinelError::NoBaselineData);
        }
        if sample_rate == 0 {
            return Err(SentinelError::InvalidConfig(
                "sample rate must be positive".to_string(),
            ));
        }
        let width = self.layout.width;
        let normal_matrix = frames_to_matrix(normal, width)?;
        let anomaly_matrix = frames_to_matrix(anomaly, width)?;

        let _guard = self.begin_training(self.config().epochs)?;
        let (mut network, config) = {
            let slot = self.slot.read();
            (slot.network.clone(), slot.config.clone())
        };
        config.validate(width)?;

        log::info!(
            "Training started: {} NORMAL / {} ANOMALY frames, {} epochs",
            normal.len(),
            anomaly.len(),
            config.epochs
        );

        let mut rng = make_rng(config.seed.map(|s| s.wrapping_add(1)));
        let mut optimizer = Adam::new(config.learning_rate, &network);

        let fitted = panic::catch_unwind(AssertUnwindSafe(|| -> SentinelResult<f32> {
            let mut loss = 0.0;
            for epoch in 1..=config.epochs {
                loss = network.train_epoch(&normal_matrix, config.batch_size, &mut optimizer, &mut rng);
                if !loss.is_finite() {
                    return Err(SentinelError::TrainingFailed(format!(
                        "loss diverged at epoch {}",
                        epoch
                    )));
                }

                *self.phase.lock() = DetectorPhase::Training {
                    epoch,
                    total_epochs: config.epochs,
                };
                log::debug!("Epoch {}/{} loss={:.6}", epoch, config.epochs, loss);

                let progress = EpochProgress {
                    epoch,
                    total_epochs: config.epochs,
                    loss,
                };
                if observer(&progress) == TrainingControl::Stop {
                    return Err(SentinelError::TrainingCancelled {
                        completed_epochs: epoch,
                    });
                }
            }
            Ok(loss)
        }));

        let final_loss = match fitted {
            Ok(Ok(loss)) => loss,
            Ok(Err(e)) => {
                log::warn!("Training aborted, previous model kept: {}", e);
                return Err(e);
            }
            Err(_) => {
                log::warn!("Training panicked, previous model kept");
                return Err(SentinelError::TrainingFailed(
                    "training run panicked".to_string(),
                ));
            }
        };

        let normal_errors = network.reconstruction_errors(&normal_matrix);
        let anomaly_errors = network.reconstruction_errors(&anomaly_matrix);
        let outcome = calibrate_from_errors(&normal_errors, &anomaly_errors, &self.calibration)?;

        {
            let mut slot = self.slot.write();
            slot.network = network;
            slot.base_threshold = Some(outcome.base_threshold);
            slot.trained_at = Some(Utc::now());
            slot.sample_rate = sample_rate;
        }

        match outcome.status {
            threshold::CalibrationStatus::Success => log::info!("Calibration: {}", outcome.message),
            threshold::CalibrationStatus::Warning => log::warn!("Calibration: {}", outcome.message),
        }
        log::info!(
            "Training finished: loss={:.6} base_threshold={:.6}",
            final_loss,
            outcome.base_threshold
        );

        Ok(TrainingReport {
            epochs_completed: config.epochs,
            final_loss,
            normal_frames: normal.len(),
            anomaly_frames: anomaly.len(),
            sample_rate,
            calibration: outcome,
        })
    }

    // ------------------------------------------------------------------------
    // Scoring
    // ------------------------------------------------------------------------

    /// MSE × score scale; neutral while training
    pub fn score(&self, frame: &FeatureFrame) -> SentinelResult<ScoreResult> {
        Ok(self.try_score(frame)?.unwrap_or(ScoreResult::NEUTRAL))
    }

    /// Like `score`, but `None` while training instead of the neutral result
    pub fn try_score(&self, frame: &FeatureFrame) -> SentinelResult<Option<ScoreResult>> {
        if self.is_training() {
            return Ok(None);
        }
        let input = frames_to_matrix(std::slice::from_ref(frame), self.layout.width)?;

        let (error, base) = {
            let slot = self.slot.read();
            let error = slot
                .network
                .reconstruction_errors(&input)
                .first()
                .copied()
                .unwrap_or(0.0);
            (error, slot.base_threshold)
        };

        let score = error * self.calibration.score_scale;
        let is_anomaly = match base {
            Some(base) => score > self.calibration.effective_threshold(base, self.sensitivity())?,
            None => false,
        };
        Ok(Some(ScoreResult { score, is_anomaly }))
    }

    /// Raw per-frame MSE, unscaled
    pub fn reconstruction_errors(&self, frames: &[FeatureFrame]) -> SentinelResult<Vec<f32>> {
        let input = frames_to_matrix(frames, self.layout.width)?;
        Ok(self.slot.read().network.reconstruction_errors(&input))
    }

    /// Adapt sensitivity to one scored recording
    pub fn auto_calibrate(&self, frames: &[ScoredFrame]) -> SentinelResult<AutoCalibration> {
        let base = self.base_threshold().ok_or(SentinelError::ThresholdUnset)?;
        let result = threshold::auto_calibrate(frames, base, &self.calibration)?;
        *self.sensitivity.write() = result.sensitivity;

        log::info!(
            "Auto-calibrated: mean={:.3} std={:.3} amp={:.1} target={:.3} sensitivity={:.3}{}",
            result.stats.mean,
            result.stats.std_dev,
            result.stats.avg_amplitude,
            result.target_threshold,
            result.sensitivity,
            if result.clamped { " (clamped)" } else { "" }
        );
        Ok(result)
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    pub fn to_bundle(&self) -> ModelBundle {
        let slot = self.slot.read();
        ModelBundle::pack(
            &slot.network,
            BundleMetadata {
                sample_rate: slot.sample_rate,
                input_size: self.layout.width,
                trained_at: slot.trained_at,
                base_threshold: slot.base_threshold,
                config: slot.config.clone(),
                feature_layout: self.layout.clone(),
            },
        )
    }

    pub fn save(&self) -> SentinelResult<Vec<u8>> {
        self.to_bundle().to_bytes()
    }

    /// Replace the active model; nothing changes unless the whole bundle is valid
    pub fn load(&self, bytes: &[u8]) -> SentinelResult<LoadSummary> {
        let bundle = ModelBundle::from_bytes(bytes)?;
        let network = bundle.unpack()?;
        let meta = bundle.metadata;

        if meta.feature_layout != self.layout {
            return Err(SentinelError::InvalidBundle(format!(
                "feature layout mismatch: bundle hash {:08x}, detector hash {:08x}",
                meta.feature_layout.hash, self.layout.hash
            )));
        }

        let phase = self.phase.lock();
        if let DetectorPhase::Training { .. } = *phase {
            return Err(SentinelError::Busy);
        }

        let summary = LoadSummary {
            sample_rate: meta.sample_rate,
            input_width: meta.input_size,
            base_threshold: meta.base_threshold,
            trained_at: meta.trained_at,
            config: meta.config.clone(),
        };
        *self.slot.write() = ModelSlot {
            network,
            config: meta.config,
            base_threshold: meta.base_threshold,
            trained_at: meta.trained_at,
            sample_rate: meta.sample_rate,
        };
        drop(phase);

        log::info!(
            "Model loaded: {} Hz, base_threshold={:?}",
            summary.sample_rate,
            summary.base_threshold
        );
        Ok(summary)
    }

    pub fn save_to_path(&self, path: &Path) -> SentinelResult<()> {
        self.to_bundle().save(path)?;
        log::info!("Model saved to {:?}", path);
        Ok(())
    }

    pub fn load_from_path(&self, path: &Path) -> SentinelResult<LoadSummary> {
        let bytes = std::fs::read(path)?;
        self.load(&bytes)
    }
}
