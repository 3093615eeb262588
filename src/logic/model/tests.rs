use std::sync::Arc;

use super::detector::{AnomalyDetector, DetectorPhase, ScoreResult};
use super::threshold::{percentile, CalibrationConfig, CalibrationStatus};
use super::training::{spawn_retraining, TrainingControl};
use super::{ModelConfig, ModelConfigUpdate, SampleLabel};
use crate::error::SentinelError;
use crate::logic::features::{FeatureFrame, FeatureLayout, SpectralConfig};
use crate::logic::scoring::ScoredFrame;

const WIDTH: usize = 16;

fn layout() -> FeatureLayout {
    FeatureLayout::from_spectral(&SpectralConfig {
        fft_size: 32,
        hop_length: 32,
        bins: WIDTH,
        gain: 1800.0,
    })
}

fn config(epochs: usize, seed: u64) -> ModelConfig {
    ModelConfig {
        epochs,
        learning_rate: 0.01,
        batch_size: 8,
        latent_dim: 3,
        seed: Some(seed),
    }
}

fn detector(epochs: usize) -> AnomalyDetector {
    AnomalyDetector::new(layout(), config(epochs, 7), CalibrationConfig::default()).unwrap()
}

/// Low-frequency heavy spectrum with a slow drift
fn normal_frames(n: usize) -> Vec<FeatureFrame> {
    (0..n)
        .map(|k| {
            let drift = (k % 10) as f32 * 2.0;
            FeatureFrame::new(
                (0..WIDTH)
                    .map(|i| 120.0 - i as f32 * 6.0 + drift)
                    .collect(),
            )
        })
        .collect()
}

/// Saturated broadband noise
fn anomaly_frames(n: usize) -> Vec<FeatureFrame> {
    (0..n).map(|_| FeatureFrame::new(vec![255.0; WIDTH])).collect()
}

fn scores(d: &AnomalyDetector, frames: &[FeatureFrame]) -> Vec<f32> {
    frames.iter().map(|f| d.score(f).unwrap().score).collect()
}

fn sorted(mut v: Vec<f32>) -> Vec<f32> {
    v.sort_by(|a, b| a.partial_cmp(b).unwrap());
    v
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[test]
fn test_configured_model_round_trip() {
    let d = detector(5);
    let probe = [normal_frames(3), anomaly_frames(1)].concat();
    let before = scores(&d, &probe);

    let restored = AnomalyDetector::new(layout(), config(5, 99), CalibrationConfig::default()).unwrap();
    assert_ne!(scores(&restored, &probe), before);

    let summary = restored.load(&d.save().unwrap()).unwrap();
    assert_eq!(summary.base_threshold, None);
    assert_eq!(scores(&restored, &probe), before);
}

#[test]
fn test_trained_model_round_trip() {
    let d = detector(10);
    d.train(&normal_frames(40), &[], 22050, |_| TrainingControl::Continue)
        .unwrap();

    let probe = [normal_frames(5), anomaly_frames(2)].concat();
    let before = scores(&d, &probe);

    let restored = AnomalyDetector::from_bundle_bytes(&d.save().unwrap(), CalibrationConfig::default()).unwrap();
    assert_eq!(restored.base_threshold(), d.base_threshold());
    assert_eq!(restored.sample_rate(), 22050);
    assert_eq!(restored.trained_at(), d.trained_at());
    assert_eq!(restored.config(), d.config());
    assert_eq!(scores(&restored, &probe), before);
}

#[test]
fn test_save_to_path_and_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("models").join("model-custom.sentinel");

    let d = detector(5);
    d.train(&normal_frames(20), &[], 16000, |_| TrainingControl::Continue)
        .unwrap();
    d.save_to_path(&path).unwrap();

    let other = detector(5);
    let summary = other.load_from_path(&path).unwrap();
    assert_eq!(summary.base_threshold, d.base_threshold());
    assert_eq!(summary.input_width, WIDTH);
}

#[test]
fn test_bad_bundle_keeps_active_model() {
    let d = detector(5);
    d.train(&normal_frames(20), &[], 16000, |_| TrainingControl::Continue)
        .unwrap();
    let probe = normal_frames(3);
    let before = scores(&d, &probe);
    let base = d.base_threshold();

    assert!(matches!(d.load(b"{\"formatVersion\":1"), Err(SentinelError::InvalidBundle(_))));

    // Same bundle shape, different feature layout
    let foreign_layout = FeatureLayout::from_spectral(&SpectralConfig {
        fft_size: 64,
        hop_length: 16,
        bins: WIDTH,
        gain: 900.0,
    });
    let foreign = AnomalyDetector::new(foreign_layout, config(5, 1), CalibrationConfig::default()).unwrap();
    assert!(matches!(d.load(&foreign.save().unwrap()), Err(SentinelError::InvalidBundle(_))));

    assert_eq!(d.base_threshold(), base);
    assert_eq!(scores(&d, &probe), before);
}

// ============================================================================
// TRAINING & CALIBRATION
// ============================================================================

#[test]
fn test_base_threshold_covers_p99() {
    let d = detector(15);
    let normal = normal_frames(60);
    let report = d
        .train(&normal, &[], 16000, |_| TrainingControl::Continue)
        .unwrap();

    let errors = sorted(d.reconstruction_errors(&normal).unwrap());
    let p99 = percentile(&errors, 0.99).unwrap();
    let base = d.base_threshold().unwrap();

    assert!(base >= p99);
    assert_eq!(report.calibration.status, CalibrationStatus::Success);
    assert_eq!(report.epochs_completed, 15);
    assert!(report.final_loss.is_finite());
}

#[test]
fn test_clean_separation_uses_midpoint() {
    let d = detector(15);
    let normal = normal_frames(50);
    let anomaly = anomaly_frames(10);
    let report = d
        .train(&normal, &anomaly, 16000, |_| TrainingControl::Continue)
        .unwrap();

    let p99 = percentile(&sorted(d.reconstruction_errors(&normal).unwrap()), 0.99).unwrap();
    let p10 = percentile(&sorted(d.reconstruction_errors(&anomaly).unwrap()), 0.10).unwrap();
    assert!(p10 > p99);

    assert_eq!(report.calibration.status, CalibrationStatus::Success);
    assert_eq!(d.base_threshold(), Some((p99 + p10) / 2.0));
    assert_eq!(report.anomaly_frames, 10);
}

#[test]
fn test_no_baseline_data() {
    let d = detector(5);
    assert!(matches!(
        d.train(&[], &anomaly_frames(4), 16000, |_| TrainingControl::Continue),
        Err(SentinelError::NoBaselineData)
    ));
    assert!(matches!(
        d.retrain(|_| TrainingControl::Continue),
        Err(SentinelError::NoBaselineData)
    ));
    assert!(!d.is_trained());
}

#[test]
fn test_scoring_is_neutral_while_training() {
    let d = detector(4);
    let probe = anomaly_frames(1).remove(0);
    let mut seen = 0;

    d.train(&normal_frames(20), &[], 16000, |progress| {
        seen += 1;
        assert_eq!(d.score(&probe).unwrap(), ScoreResult::NEUTRAL);
        assert_eq!(
            d.phase(),
            DetectorPhase::Training {
                epoch: progress.epoch,
                total_epochs: 4
            }
        );
        assert!(matches!(d.configure(config(4, 3)), Err(SentinelError::Busy)));
        TrainingControl::Continue
    })
    .unwrap();

    assert_eq!(seen, 4);
    assert_eq!(d.phase(), DetectorPhase::Idle);
    assert!(d.score(&probe).unwrap().score > 0.0);
}

#[test]
fn test_cancelled_retrain_keeps_prior_model() {
    let d = detector(6);
    d.train(&normal_frames(30), &[], 16000, |_| TrainingControl::Continue)
        .unwrap();
    let probe = normal_frames(4);
    let before = scores(&d, &probe);
    let base = d.base_threshold();

    d.add_sample(None, anomaly_frames(30), SampleLabel::Normal, 48000)
        .unwrap();
    let result = d.retrain(|p| {
        if p.epoch == 2 {
            TrainingControl::Stop
        } else {
            TrainingControl::Continue
        }
    });

    assert!(matches!(result, Err(SentinelError::TrainingCancelled { completed_epochs: 2 })));
    assert_eq!(d.base_threshold(), base);
    assert_eq!(d.sample_rate(), 16000);
    assert_eq!(scores(&d, &probe), before);
    assert_eq!(d.buffer_status().normal_frames, 30);
    assert_eq!(d.phase(), DetectorPhase::Idle);
}

#[test]
fn test_retrain_consumes_buffer() {
    let d = detector(5);
    d.add_sample(Some("rec-1".to_string()), normal_frames(20), SampleLabel::Normal, 44100)
        .unwrap();
    let id = d
        .add_sample(None, anomaly_frames(5), SampleLabel::Anomaly, 44100)
        .unwrap();
    assert!(!id.is_empty());
    assert!(d.buffer_status().is_ready);

    let report = d.retrain(|_| TrainingControl::Continue).unwrap();
    assert_eq!(report.normal_frames, 20);
    assert_eq!(report.anomaly_frames, 5);
    assert_eq!(d.sample_rate(), 44100);
    assert!(d.buffer_status().normal_frames == 0 && !d.buffer_status().is_ready);
}

#[test]
fn test_samples_added_during_retrain_survive() {
    let d = detector(3);
    d.add_sample(None, normal_frames(20), SampleLabel::Normal, 16000)
        .unwrap();

    let report = d
        .retrain(|p| {
            if p.epoch == 1 {
                d.add_sample(Some("late".to_string()), normal_frames(7), SampleLabel::Normal, 16000)
                    .unwrap();
            }
            TrainingControl::Continue
        })
        .unwrap();

    assert_eq!(report.normal_frames, 20);
    let status = d.buffer_status();
    assert_eq!(status.normal_samples, 1);
    assert_eq!(status.normal_frames, 7);
    assert!(status.is_ready);
}

#[test]
fn test_try_score_reports_busy() {
    let d = detector(2);
    let frame = normal_frames(1).remove(0);
    assert!(d.try_score(&frame).unwrap().is_some());

    d.train(&normal_frames(20), &[], 16000, |_| {
        assert_eq!(d.try_score(&frame).unwrap(), None);
        TrainingControl::Continue
    })
    .unwrap();
    assert!(d.try_score(&frame).unwrap().is_some());
}

#[test]
fn test_add_sample_rejects_wrong_width() {
    let d = detector(5);
    let result = d.add_sample(None, vec![FeatureFrame::new(vec![1.0; 8])], SampleLabel::Normal, 16000);
    assert!(matches!(result, Err(SentinelError::FrameWidth { expected: 16, actual: 8 })));
    assert!(matches!(
        d.score(&FeatureFrame::new(vec![1.0; 8])),
        Err(SentinelError::FrameWidth { .. })
    ));
}

// ============================================================================
// CONFIGURATION & THRESHOLDS
// ============================================================================

#[test]
fn test_invalid_config_keeps_model() {
    let d = detector(5);
    d.train(&normal_frames(20), &[], 16000, |_| TrainingControl::Continue)
        .unwrap();
    let before = d.config();
    let base = d.base_threshold();

    let bad = ModelConfig {
        latent_dim: WIDTH,
        ..before.clone()
    };
    assert!(matches!(d.configure(bad), Err(SentinelError::InvalidConfig(_))));
    assert_eq!(d.config(), before);
    assert_eq!(d.base_threshold(), base);
}

#[test]
fn test_update_config_rebuilds_and_clears_threshold() {
    let d = detector(5);
    d.train(&normal_frames(20), &[], 16000, |_| TrainingControl::Continue)
        .unwrap();
    assert!(d.is_trained());

    let merged = d
        .update_config(&ModelConfigUpdate {
            latent_dim: Some(5),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(merged.latent_dim, 5);
    assert_eq!(merged.epochs, 5);
    assert!(!d.is_trained());
    assert!(matches!(d.effective_threshold(), Err(SentinelError::ThresholdUnset)));
}

#[test]
fn test_sensitivity_scales_effective_threshold() {
    let d = detector(5);
    assert!(matches!(d.effective_threshold(), Err(SentinelError::ThresholdUnset)));
    d.train(&normal_frames(20), &[], 16000, |_| TrainingControl::Continue)
        .unwrap();

    d.set_sensitivity(1.0).unwrap();
    let low = d.effective_threshold().unwrap();
    d.set_sensitivity(4.0).unwrap();
    let high = d.effective_threshold().unwrap();
    assert!(high < low);

    assert!(d.set_sensitivity(0.0).is_err());
    assert!(d.set_sensitivity(f32::NAN).is_err());
    assert_eq!(d.sensitivity(), 4.0);
}

#[test]
fn test_auto_calibrate_hits_target() {
    let d = detector(5);
    d.train(&normal_frames(20), &[], 16000, |_| TrainingControl::Continue)
        .unwrap();
    let base = d.base_threshold().unwrap();

    // Flat chart at the score the default sensitivity already produces
    let level = base * d.calibration().score_scale;
    let chart: Vec<ScoredFrame> = (0..10)
        .map(|i| ScoredFrame {
            timestamp: i as f64 * 0.032,
            raw_score: level,
            smoothed_score: level,
            amplitude: 0.0,
            is_anomaly: false,
        })
        .collect();

    let result = d.auto_calibrate(&chart).unwrap();
    assert!(!result.clamped);
    assert!((d.sensitivity() - 2.0).abs() < 1e-3);
    let effective = d.effective_threshold().unwrap();
    assert!((effective - result.target_threshold).abs() <= result.target_threshold * 1e-4);

    assert!(matches!(d.auto_calibrate(&[]), Err(SentinelError::NoScores)));
    assert!((d.sensitivity() - result.sensitivity).abs() < f32::EPSILON);
}

#[test]
fn test_status_snapshot() {
    let d = detector(5);
    d.add_sample(None, normal_frames(3), SampleLabel::Normal, 8000)
        .unwrap();

    let status = d.status();
    assert_eq!(status.phase, DetectorPhase::Idle);
    assert!(!status.is_trained);
    assert_eq!(status.effective_threshold, None);
    assert_eq!(status.input_width, WIDTH);
    assert_eq!(status.buffer.normal_frames, 3);
}

// ============================================================================
// BACKGROUND TRAINING
// ============================================================================

#[tokio::test]
async fn test_background_retraining_streams_progress() {
    let d = Arc::new(detector(6));
    d.add_sample(None, normal_frames(24), SampleLabel::Normal, 16000)
        .unwrap();

    let mut handle = spawn_retraining(d.clone());
    let mut epochs = Vec::new();
    while let Some(progress) = handle.next_progress().await {
        assert_eq!(progress.total_epochs, 6);
        epochs.push(progress.epoch);
    }

    let report = handle.finish().await.unwrap();
    assert_eq!(epochs, (1..=6).collect::<Vec<_>>());
    assert_eq!(report.epochs_completed, 6);
    assert!(d.is_trained());
}

#[tokio::test]
async fn test_background_retraining_cancel() {
    let d = Arc::new(detector(50));
    d.add_sample(None, normal_frames(24), SampleLabel::Normal, 16000)
        .unwrap();

    let handle = spawn_retraining(d.clone());
    handle.cancel();
    assert!(handle.is_cancelled());

    let result = handle.finish().await;
    assert!(matches!(result, Err(SentinelError::TrainingCancelled { completed_epochs: 1 })));
    assert!(!d.is_trained());
    assert!(d.buffer_status().is_ready);
}
