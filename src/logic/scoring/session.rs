//! Analysis Sessions - File scans and live scoring
//!
//! A file scan extracts, scores and smooths every frame, optionally adapts
//! sensitivity to the recording, then derives incidents. A live session is
//! a tokio task fed frame by frame until told to stop.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::{ScoreHistory, ScoredFrame, ScoringConfig, StreamingScorer};
use crate::constants::{FILE_SMOOTHING_WINDOW, SCAN_YIELD_INTERVAL};
use crate::error::{SentinelError, SentinelResult};
use crate::logic::audio::decode_wav;
use crate::logic::features::{FeatureFrame, SpectralExtractor};
use crate::logic::incident::{segment, Incident, SegmenterConfig};
use crate::logic::model::{AnomalyDetector, AutoCalibration};

// ============================================================================
// FILE SCAN
// ============================================================================

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub window: usize,
    pub voice_shield: bool,
    /// Adapt sensitivity to the scanned recording before segmenting
    pub auto_calibrate: bool,
    pub segmenter: SegmenterConfig,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            window: FILE_SMOOTHING_WINDOW,
            voice_shield: false,
            auto_calibrate: true,
            segmenter: SegmenterConfig::default(),
        }
    }
}

impl ScanOptions {
    pub fn from_config(scoring: &ScoringConfig, segmenter: &SegmenterConfig) -> Self {
        Self {
            window: scoring.file_window,
            voice_shield: false,
            auto_calibrate: scoring.auto_calibrate_after_scan,
            segmenter: segmenter.clone(),
        }
    }
}

/// Everything one file scan produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub frames: Vec<ScoredFrame>,
    pub sample_rate: u32,
    pub frame_period: f64,
    /// None while the detector is uncalibrated
    pub effective_threshold: Option<f32>,
    pub incidents: Vec<Incident>,
    pub auto_calibration: Option<AutoCalibration>,
}

impl AnalysisReport {
    /// Re-derive flags and incidents for a new threshold
    pub fn recompute(&mut self, threshold: Option<f32>, cfg: &SegmenterConfig) {
        self.effective_threshold = threshold;
        for frame in &mut self.frames {
            frame.is_anomaly = threshold.map(|t| frame.smoothed_score > t).unwrap_or(false);
        }
        self.incidents = match threshold {
            Some(t) => segment(&self.frames, t, cfg),
            None => Vec::new(),
        };
    }

    /// Follow the detector's current threshold (e.g. after a sensitivity change)
    pub fn refresh(&mut self, detector: &AnomalyDetector, cfg: &SegmenterConfig) {
        self.recompute(detector.effective_threshold().ok(), cfg);
    }

    pub fn anomalous_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.is_anomaly).count()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames.len() as f64 * self.frame_period
    }
}

fn scan_period(detector: &AnomalyDetector, extractor: &SpectralExtractor, sample_rate: u32) -> SentinelResult<f64> {
    if sample_rate == 0 {
        return Err(SentinelError::InvalidConfig(
            "sample rate must be positive".to_string(),
        ));
    }
    if detector.is_training() {
        return Err(SentinelError::Busy);
    }
    if extractor.width() != detector.input_width() {
        return Err(SentinelError::FrameWidth {
            expected: detector.input_width(),
            actual: extractor.width(),
        });
    }
    Ok(extractor.frame_period(sample_rate))
}

/// A chart with frames scored during training is incomplete: no report,
/// no auto-calibration
fn check_complete(scorer: &StreamingScorer, total: usize) -> SentinelResult<()> {
    if scorer.busy_frames() > 0 {
        log::warn!(
            "Scan discarded: {}/{} frames arrived while training",
            scorer.busy_frames(),
            total
        );
        return Err(SentinelError::Busy);
    }
    Ok(())
}

fn finish_scan(
    detector: &AnomalyDetector,
    frames: Vec<ScoredFrame>,
    sample_rate: u32,
    frame_period: f64,
    options: &ScanOptions,
) -> AnalysisReport {
    let auto_calibration = if options.auto_calibrate && detector.is_trained() && !frames.is_empty() {
        match detector.auto_calibrate(&frames) {
            Ok(result) => Some(result),
            Err(e) => {
                log::warn!("Auto-calibration skipped: {}", e);
                None
            }
        }
    } else {
        None
    };

    let mut report = AnalysisReport {
        frames,
        sample_rate,
        frame_period,
        effective_threshold: None,
        incidents: Vec::new(),
        auto_calibration,
    };
    report.refresh(detector, &options.segmenter);

    log::info!(
        "Scan complete: {} frames, {} incident(s), threshold {:?}",
        report.frames.len(),
        report.incidents.len(),
        report.effective_threshold
    );
    report
}

/// Score a whole waveform in one go
pub fn scan_waveform(
    detector: &Arc<AnomalyDetector>,
    extractor: &SpectralExtractor,
    samples: &[f32],
    sample_rate: u32,
    options: &ScanOptions,
) -> SentinelResult<AnalysisReport> {
    let period = scan_period(detector, extractor, sample_rate)?;
    let mut scorer = StreamingScorer::new(detector.clone(), options.window, options.voice_shield);

    let mut frames = Vec::with_capacity(extractor.frame_count(samples.len()));
    for (i, frame) in extractor.frames(samples).enumerate() {
        frames.push(scorer.score_frame(i as f64 * period, &frame)?);
    }
    check_complete(&scorer, frames.len())?;
    Ok(finish_scan(detector, frames, sample_rate, period, options))
}

/// Same as `scan_waveform`, yielding to the runtime every few hundred frames
pub async fn scan_waveform_async(
    detector: &Arc<AnomalyDetector>,
    extractor: &SpectralExtractor,
    samples: &[f32],
    sample_rate: u32,
    options: &ScanOptions,
) -> SentinelResult<AnalysisReport> {
    let period = scan_period(detector, extractor, sample_rate)?;
    let mut scorer = StreamingScorer::new(detector.clone(), options.window, options.voice_shield);

    let total = extractor.frame_count(samples.len());
    let mut frames = Vec::with_capacity(total);
    for (i, frame) in extractor.frames(samples).enumerate() {
        frames.push(scorer.score_frame(i as f64 * period, &frame)?);
        if (i + 1) % SCAN_YIELD_INTERVAL == 0 {
            log::debug!("Scanned {}/{} frames", i + 1, total);
            tokio::task::yield_now().await;
        }
    }
    check_complete(&scorer, frames.len())?;
    Ok(finish_scan(detector, frames, sample_rate, period, options))
}

/// Decode and scan a WAV file; a decode failure yields no report at all
pub fn scan_file(
    detector: &Arc<AnomalyDetector>,
    extractor: &SpectralExtractor,
    path: &Path,
    options: &ScanOptions,
) -> SentinelResult<AnalysisReport> {
    let audio = decode_wav(path)?;
    scan_waveform(detector, extractor, &audio.samples, audio.sample_rate, options)
}

// ============================================================================
// LIVE SESSION
// ============================================================================

#[derive(Debug, Clone)]
pub struct LiveOptions {
    pub window: usize,
    pub voice_shield: bool,
    pub history_capacity: usize,
    /// Seconds between pushed frames
    pub frame_period_secs: f64,
}

impl LiveOptions {
    pub fn from_config(scoring: &ScoringConfig, frame_period_secs: f64) -> Self {
        Self {
            window: scoring.live_window,
            voice_shield: scoring.voice_shield,
            history_capacity: scoring.history_capacity,
            frame_period_secs,
        }
    }
}

/// Live scoring task fed by the capture side
pub struct LiveSession {
    frames: mpsc::Sender<FeatureFrame>,
    stop: watch::Sender<bool>,
    history: Arc<Mutex<ScoreHistory>>,
    task: JoinHandle<usize>,
}

impl LiveSession {
    /// Spawn the session; scored frames arrive on the returned receiver
    pub fn start(
        detector: Arc<AnomalyDetector>,
        options: LiveOptions,
    ) -> (Self, mpsc::UnboundedReceiver<ScoredFrame>) {
        let (frames_tx, mut frames_rx) = mpsc::channel::<FeatureFrame>(64);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let (scores_tx, scores_rx) = mpsc::unbounded_channel();
        let history = Arc::new(Mutex::new(ScoreHistory::new(options.history_capacity)));
        let shared = history.clone();

        let task = tokio::spawn(async move {
            let mut scorer = StreamingScorer::new(detector, options.window, options.voice_shield);
            let mut index = 0usize;

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    next = frames_rx.recv() => {
                        let Some(frame) = next else { break };
                        let timestamp = index as f64 * options.frame_period_secs;
                        index += 1;

                        match scorer.score_frame(timestamp, &frame) {
                            Ok(scored) => {
                                shared.lock().push(scored.clone());
                                // Listener may have gone away
                                let _ = scores_tx.send(scored);
                            }
                            Err(e) => log::warn!("Live frame {} dropped: {}", index, e),
                        }
                    }
                }
            }

            log::info!("Live session stopped after {} frames", index);
            index
        });

        log::info!("Live session started");
        (
            Self {
                frames: frames_tx,
                stop: stop_tx,
                history,
                task,
            },
            scores_rx,
        )
    }

    /// Queue one frame; false once the session has ended
    pub async fn push(&self, frame: FeatureFrame) -> bool {
        self.frames.send(frame).await.is_ok()
    }

    /// Sender for a capture callback
    pub fn frame_sender(&self) -> mpsc::Sender<FeatureFrame> {
        self.frames.clone()
    }

    /// Recent scored frames, oldest first
    pub fn history(&self) -> Vec<ScoredFrame> {
        self.history.lock().snapshot()
    }

    /// Stop scheduling; returns how many frames were received
    pub async fn stop(self) -> usize {
        let _ = self.stop.send(true);
        self.task.await.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::audio::{encode_wav, AudioData};
    use crate::logic::features::{FeatureLayout, SpectralConfig};
    use crate::logic::model::{CalibrationConfig, ModelConfig, TrainingControl};

    const RATE: u32 = 8000;

    fn spectral() -> SpectralConfig {
        SpectralConfig {
            fft_size: 32,
            hop_length: 32,
            bins: 16,
            gain: 1800.0,
        }
    }

    fn detector() -> Arc<AnomalyDetector> {
        let config = ModelConfig {
            epochs: 20,
            learning_rate: 0.01,
            batch_size: 16,
            latent_dim: 3,
            seed: Some(11),
        };
        Arc::new(
            AnomalyDetector::new(
                FeatureLayout::from_spectral(&spectral()),
                config,
                CalibrationConfig::default(),
            )
            .unwrap(),
        )
    }

    fn tone(secs: f64) -> Vec<f32> {
        let n = (RATE as f64 * secs) as usize;
        (0..n)
            .map(|i| 0.01 * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / RATE as f32).sin())
            .collect()
    }

    fn noise(secs: f64) -> Vec<f32> {
        let mut state = 7u32;
        let n = (RATE as f64 * secs) as usize;
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5
            })
            .collect()
    }

    fn trained(extractor: &SpectralExtractor) -> Arc<AnomalyDetector> {
        let d = detector();
        let frames: Vec<_> = extractor.frames(&tone(2.0)).collect();
        d.train(&frames, &[], RATE, |_| TrainingControl::Continue).unwrap();
        d
    }

    fn no_auto() -> ScanOptions {
        ScanOptions {
            auto_calibrate: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_scan_flags_noise_burst() {
        let extractor = SpectralExtractor::new(spectral()).unwrap();
        let d = trained(&extractor);

        let waveform = [tone(2.0), noise(0.5), tone(2.0)].concat();
        let report = scan_waveform(&d, &extractor, &waveform, RATE, &no_auto()).unwrap();

        assert_eq!(report.frames.len(), extractor.frame_count(waveform.len()));
        assert_eq!(report.frame_period, 0.004);
        assert!(report.effective_threshold.is_some());
        assert!(!report.incidents.is_empty());

        let first = &report.incidents[0];
        assert!(first.start_offset >= 1.9 && first.start_offset <= 2.6);
        assert!(report.anomalous_frames() > 0);
        assert!(report.auto_calibration.is_none());
    }

    #[test]
    fn test_threshold_change_recomputes_incidents() {
        let extractor = SpectralExtractor::new(spectral()).unwrap();
        let d = trained(&extractor);
        let waveform = [tone(1.0), noise(0.3), tone(1.0)].concat();
        let mut report = scan_waveform(&d, &extractor, &waveform, RATE, &no_auto()).unwrap();
        assert!(!report.incidents.is_empty());

        // Nothing clears an enormous threshold
        report.recompute(Some(f32::MAX), &SegmenterConfig::default());
        assert!(report.incidents.is_empty());
        assert_eq!(report.anomalous_frames(), 0);

        report.refresh(&d, &SegmenterConfig::default());
        assert!(!report.incidents.is_empty());
    }

    #[test]
    fn test_scan_auto_calibrates_sensitivity() {
        let extractor = SpectralExtractor::new(spectral()).unwrap();
        let d = trained(&extractor);
        let waveform = [tone(1.0), noise(0.2), tone(1.0)].concat();

        let report = scan_waveform(&d, &extractor, &waveform, RATE, &ScanOptions::default()).unwrap();
        let calibration = report.auto_calibration.as_ref().unwrap();
        assert_eq!(d.sensitivity(), calibration.sensitivity);
        assert_eq!(report.effective_threshold, d.effective_threshold().ok());
    }

    #[test]
    fn test_scan_during_training_is_busy() {
        let extractor = SpectralExtractor::new(spectral()).unwrap();
        let d = trained(&extractor);
        let before = d.sensitivity();
        let waveform = [tone(1.0), noise(0.5), tone(1.0)].concat();
        let frames: Vec<_> = extractor.frames(&tone(1.0)).collect();

        d.train(&frames, &[], RATE, |p| {
            if p.epoch == 1 {
                let result = scan_waveform(&d, &extractor, &waveform, RATE, &ScanOptions::default());
                assert!(matches!(result, Err(SentinelError::Busy)));
            }
            TrainingControl::Continue
        })
        .unwrap();
        assert_eq!(d.sensitivity(), before);

        // Training started midway through the scan
        let mut scorer = StreamingScorer::new(d.clone(), 4, false);
        let frame = extractor.frames(&tone(0.1)).next().unwrap();
        scorer.score_frame(0.0, &frame).unwrap();
        d.train(&frames, &[], RATE, |_| {
            scorer.score_frame(0.1, &frame).unwrap();
            TrainingControl::Stop
        })
        .unwrap_err();
        assert!(matches!(check_complete(&scorer, 2), Err(SentinelError::Busy)));
        assert_eq!(d.sensitivity(), before);
    }

    #[test]
    fn test_untrained_scan_has_no_incidents() {
        let extractor = SpectralExtractor::new(spectral()).unwrap();
        let d = detector();
        let report = scan_waveform(&d, &extractor, &noise(0.5), RATE, &ScanOptions::default()).unwrap();

        assert_eq!(report.effective_threshold, None);
        assert!(report.incidents.is_empty());
        assert!(report.auto_calibration.is_none());
        assert!(report.frames.iter().all(|f| f.raw_score > 0.0));
    }

    #[test]
    fn test_scan_rejects_bad_input() {
        let d = detector();
        let wide = SpectralExtractor::new(SpectralConfig {
            bins: 17,
            ..spectral()
        })
        .unwrap();
        assert!(matches!(
            scan_waveform(&d, &wide, &tone(0.1), RATE, &ScanOptions::default()),
            Err(SentinelError::FrameWidth { .. })
        ));

        let extractor = SpectralExtractor::new(spectral()).unwrap();
        assert!(scan_waveform(&d, &extractor, &tone(0.1), 0, &ScanOptions::default()).is_err());

        let short = scan_waveform(&d, &extractor, &[0.0; 10], RATE, &ScanOptions::default()).unwrap();
        assert!(short.frames.is_empty() && short.incidents.is_empty());
    }

    #[test]
    fn test_scan_file_and_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = SpectralExtractor::new(spectral()).unwrap();
        let d = detector();

        let good = dir.path().join("tone.wav");
        let bytes = encode_wav(&AudioData {
            samples: tone(0.5),
            sample_rate: RATE,
        })
        .unwrap();
        std::fs::write(&good, bytes).unwrap();
        let report = scan_file(&d, &extractor, &good, &ScanOptions::default()).unwrap();
        assert_eq!(report.sample_rate, RATE);
        assert_eq!(report.frames.len(), 125);

        let bad = dir.path().join("broken.wav");
        std::fs::write(&bad, b"RIFF....garbage").unwrap();
        assert!(matches!(
            scan_file(&d, &extractor, &bad, &ScanOptions::default()),
            Err(SentinelError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_async_scan_matches_sync() {
        let extractor = SpectralExtractor::new(spectral()).unwrap();
        let d = trained(&extractor);
        let waveform = [tone(2.0), noise(0.3), tone(1.0)].concat();

        let sync = scan_waveform(&d, &extractor, &waveform, RATE, &no_auto()).unwrap();
        let async_report = scan_waveform_async(&d, &extractor, &waveform, RATE, &no_auto())
            .await
            .unwrap();
        assert_eq!(sync.frames, async_report.frames);
        assert_eq!(sync.incidents, async_report.incidents);
    }

    #[tokio::test]
    async fn test_live_session_scores_and_stops() {
        let d = detector();
        let options = LiveOptions {
            window: 5,
            voice_shield: true,
            history_capacity: 4,
            frame_period_secs: 0.032,
        };
        let (session, mut scores) = LiveSession::start(d, options);

        for i in 0..6 {
            assert!(session.push(FeatureFrame::new(vec![i as f32 * 10.0; 16])).await);
        }
        let mut received = Vec::new();
        for _ in 0..6 {
            received.push(scores.recv().await.unwrap());
        }

        assert_eq!(received[5].timestamp, 5.0 * 0.032);
        assert!(received.iter().all(|f| !f.is_anomaly));
        let history = session.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[3], received[5]);

        let sender = session.frame_sender();
        assert_eq!(session.stop().await, 6);
        assert!(sender.send(FeatureFrame::new(vec![0.0; 16])).await.is_err());
    }
}
