//! Anomaly Segmenter
//!
//! Pure (scored frames × threshold) → ordered, non-overlapping incidents.
//! A frame qualifies when its smoothed score is strictly above the
//! threshold. A qualifying frame joins the open incident if it lies at most
//! `merge_gap_secs` after that incident's last qualifying frame, otherwise
//! it closes it and opens a new one.

use serde::{Deserialize, Serialize};

use super::types::{Incident, Severity};
use crate::constants::{DEFAULT_FRAME_PERIOD_SECS, HIGH_SEVERITY_RATIO, MEDIUM_SEVERITY_RATIO, MERGE_GAP_SECS};
use crate::error::{SentinelError, SentinelResult};
use crate::logic::scoring::ScoredFrame;

/// Slack for decimal timestamps (0.1 * 8 != 0.8)
const GAP_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    pub merge_gap_secs: f64,
    pub high_ratio: f32,
    pub medium_ratio: f32,
    /// Used when the frame period cannot be read off the timestamps
    pub default_frame_period_secs: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            merge_gap_secs: MERGE_GAP_SECS,
            high_ratio: HIGH_SEVERITY_RATIO,
            medium_ratio: MEDIUM_SEVERITY_RATIO,
            default_frame_period_secs: DEFAULT_FRAME_PERIOD_SECS,
        }
    }
}

impl SegmenterConfig {
    pub fn validate(&self) -> SentinelResult<()> {
        if !(self.merge_gap_secs.is_finite() && self.merge_gap_secs >= 0.0) {
            return Err(SentinelError::InvalidConfig(format!(
                "merge gap must be non-negative, got {}",
                self.merge_gap_secs
            )));
        }
        if !(self.default_frame_period_secs.is_finite() && self.default_frame_period_secs > 0.0) {
            return Err(SentinelError::InvalidConfig(
                "default frame period must be positive".to_string(),
            ));
        }
        if !(self.medium_ratio.is_finite() && self.medium_ratio >= 1.0 && self.high_ratio >= self.medium_ratio) {
            return Err(SentinelError::InvalidConfig(format!(
                "severity ratios must satisfy 1 <= medium ({}) <= high ({})",
                self.medium_ratio, self.high_ratio
            )));
        }
        Ok(())
    }
}

/// Incident under construction
struct OpenIncident {
    start: f64,
    last: f64,
    peak: f32,
    frames: usize,
}

impl OpenIncident {
    fn new(timestamp: f64, intensity: f32) -> Self {
        Self {
            start: timestamp,
            last: timestamp,
            peak: intensity,
            frames: 1,
        }
    }

    fn absorb(&mut self, timestamp: f64, intensity: f32) {
        self.last = timestamp;
        self.peak = self.peak.max(intensity);
        self.frames += 1;
    }

    fn close(self, index: usize, frame_period: f64, cfg: &SegmenterConfig) -> Incident {
        Incident {
            id: format!("anom-{}", index),
            start_offset: self.start,
            duration: (self.last - self.start).max(frame_period),
            peak_intensity: self.peak,
            severity: Severity::from_intensity(self.peak, cfg.high_ratio, cfg.medium_ratio),
            frame_count: self.frames,
            verification: None,
        }
    }
}

/// Spacing of the first two frames, or the configured default
fn frame_period(frames: &[&ScoredFrame], cfg: &SegmenterConfig) -> f64 {
    match frames {
        [first, second, ..] => {
            let dt = second.timestamp - first.timestamp;
            if dt.is_finite() && dt > 0.0 {
                dt
            } else {
                cfg.default_frame_period_secs
            }
        }
        _ => cfg.default_frame_period_secs,
    }
}

pub fn segment(frames: &[ScoredFrame], threshold: f32, cfg: &SegmenterConfig) -> Vec<Incident> {
    if !(threshold.is_finite() && threshold > 0.0) {
        return Vec::new();
    }

    let mut ordered: Vec<&ScoredFrame> = frames.iter().filter(|f| f.timestamp.is_finite()).collect();
    ordered.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    let period = frame_period(&ordered, cfg);

    let mut incidents = Vec::new();
    let mut open: Option<OpenIncident> = None;

    for frame in ordered {
        if !(frame.smoothed_score > threshold) {
            continue;
        }
        let intensity = frame.smoothed_score / threshold;

        open = match open.take() {
            Some(mut current) if frame.timestamp - current.last <= cfg.merge_gap_secs + GAP_EPSILON => {
                current.absorb(frame.timestamp, intensity);
                Some(current)
            }
            Some(current) => {
                incidents.push(current.close(incidents.len(), period, cfg));
                Some(OpenIncident::new(frame.timestamp, intensity))
            }
            None => Some(OpenIncident::new(frame.timestamp, intensity)),
        };
    }
    if let Some(current) = open {
        incidents.push(current.close(incidents.len(), period, cfg));
    }

    log::debug!("Segmented {} incident(s) at threshold {:.3}", incidents.len(), threshold);
    incidents
}
