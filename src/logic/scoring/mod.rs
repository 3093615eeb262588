//! Scoring Module - Streaming Scorer
//!
//! Per frame: model score → sliding-window mean → threshold check.
//! File scans and live sessions share `StreamingScorer`; only the frame
//! source differs (see `session`).

pub mod session;

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constants::{FILE_SMOOTHING_WINDOW, LIVE_HISTORY_CAPACITY, LIVE_SMOOTHING_WINDOW};
use crate::error::{SentinelError, SentinelResult};
use crate::logic::features::FeatureFrame;
use crate::logic::model::AnomalyDetector;

pub use session::{
    scan_file, scan_waveform, scan_waveform_async, AnalysisReport, LiveOptions, LiveSession, ScanOptions,
};

/// One scored frame of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredFrame {
    /// Seconds since the start of the session
    pub timestamp: f64,
    pub raw_score: f32,
    pub smoothed_score: f32,
    /// Diagnostic only
    pub amplitude: f32,
    pub is_anomaly: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub file_window: usize,
    pub live_window: usize,
    pub history_capacity: usize,
    /// Attenuate the speech band in live mode
    pub voice_shield: bool,
    /// Adapt sensitivity to each scanned file
    pub auto_calibrate_after_scan: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            file_window: FILE_SMOOTHING_WINDOW,
            live_window: LIVE_SMOOTHING_WINDOW,
            history_capacity: LIVE_HISTORY_CAPACITY,
            voice_shield: false,
            auto_calibrate_after_scan: true,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> SentinelResult<()> {
        if self.file_window == 0 || self.live_window == 0 || self.history_capacity == 0 {
            return Err(SentinelError::InvalidConfig(
                "smoothing windows and history capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SMOOTHING
// ============================================================================

/// Unweighted mean over the last `capacity` scores
#[derive(Debug, Clone)]
pub struct ScoreSmoother {
    window: VecDeque<f32>,
    capacity: usize,
}

impl ScoreSmoother {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a score, evicting the oldest past capacity; returns the mean
    pub fn push(&mut self, score: f32) -> f32 {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(score);
        self.window.iter().sum::<f32>() / self.window.len() as f32
    }

    /// Current mean without adding a score; 0 when empty
    pub fn mean(&self) -> f32 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f32>() / self.window.len() as f32
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

/// Bounded rolling history of scored frames
#[derive(Debug, Clone)]
pub struct ScoreHistory {
    frames: VecDeque<ScoredFrame>,
    capacity: usize,
}

impl ScoreHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: ScoredFrame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn latest(&self) -> Option<&ScoredFrame> {
        self.frames.back()
    }

    /// Oldest first
    pub fn snapshot(&self) -> Vec<ScoredFrame> {
        self.frames.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

// ============================================================================
// STREAMING SCORER
// ============================================================================

pub struct StreamingScorer {
    detector: Arc<AnomalyDetector>,
    smoother: ScoreSmoother,
    voice_shield: bool,
    busy_frames: usize,
}

impl StreamingScorer {
    pub fn new(detector: Arc<AnomalyDetector>, window: usize, voice_shield: bool) -> Self {
        Self {
            detector,
            smoother: ScoreSmoother::new(window),
            voice_shield,
            busy_frames: 0,
        }
    }

    pub fn detector(&self) -> &Arc<AnomalyDetector> {
        &self.detector
    }

    /// Score one frame; flagged when the smoothed score beats the live threshold.
    ///
    /// While the detector trains the frame comes back unflagged with a zero
    /// raw score, and the smoothing window is left as it was.
    pub fn score_frame(&mut self, timestamp: f64, frame: &FeatureFrame) -> SentinelResult<ScoredFrame> {
        let scored = if self.voice_shield {
            self.detector.try_score(&frame.suppress_voice_band())?
        } else {
            self.detector.try_score(frame)?
        };

        let Some(result) = scored else {
            self.busy_frames += 1;
            return Ok(ScoredFrame {
                timestamp,
                raw_score: 0.0,
                smoothed_score: self.smoother.mean(),
                amplitude: frame.amplitude(),
                is_anomaly: false,
            });
        };

        let smoothed_score = self.smoother.push(result.score);
        let is_anomaly = self
            .detector
            .effective_threshold()
            .map(|t| smoothed_score > t)
            .unwrap_or(false);

        Ok(ScoredFrame {
            timestamp,
            raw_score: result.score,
            smoothed_score,
            amplitude: frame.amplitude(),
            is_anomaly,
        })
    }

    /// Frames that arrived while the detector was training
    pub fn busy_frames(&self) -> usize {
        self.busy_frames
    }

    pub fn reset(&mut self) {
        self.smoother.reset();
        self.busy_frames = 0;
    }
}
