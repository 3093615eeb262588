//! Training Buffer - Labeled frame batches awaiting a training run
//!
//! Append-only. A training run consumes exactly the samples it read; a
//! manual clear drops everything. NORMAL frames are the only
//! reconstruction targets; ANOMALY frames are kept as a held-out set for
//! the calibration separation check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logic::features::FeatureFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleLabel {
    Normal,
    Anomaly,
}

/// One labeled recording worth of frames
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSample {
    pub id: String,
    pub frames: Vec<FeatureFrame>,
    pub label: SampleLabel,
    pub sample_rate: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct TrainingBuffer {
    samples: Vec<TrainingSample>,
    /// Samples ever pushed; removals only happen from the front
    pushed: u64,
}

impl TrainingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: TrainingSample) {
        self.samples.push(sample);
        self.pushed += 1;
    }

    /// Position after the newest sample, for `consume_through`
    pub fn mark(&self) -> u64 {
        self.pushed
    }

    /// Drop the samples pushed before `mark`; later ones stay
    pub fn consume_through(&mut self, mark: u64) {
        let oldest = self.pushed - self.samples.len() as u64;
        let count = mark.saturating_sub(oldest).min(self.samples.len() as u64) as usize;
        self.samples.drain(..count);
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[TrainingSample] {
        &self.samples
    }

    /// All frames carrying `label`, in insertion order
    pub fn frames(&self, label: SampleLabel) -> Vec<FeatureFrame> {
        self.samples
            .iter()
            .filter(|s| s.label == label)
            .flat_map(|s| s.frames.iter().cloned())
            .collect()
    }

    /// Sample rate of the most recently appended recording
    pub fn latest_sample_rate(&self) -> Option<u32> {
        self.samples.last().map(|s| s.sample_rate)
    }

    pub fn status(&self) -> BufferStatus {
        let mut status = BufferStatus {
            latest_sample_rate: self.latest_sample_rate(),
            ..Default::default()
        };
        for sample in &self.samples {
            match sample.label {
                SampleLabel::Normal => {
                    status.normal_samples += 1;
                    status.normal_frames += sample.frames.len();
                }
                SampleLabel::Anomaly => {
                    status.anomaly_samples += 1;
                    status.anomaly_frames += sample.frames.len();
                }
            }
        }
        status.is_ready = status.normal_frames > 0;
        status
    }
}

/// Buffer status information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferStatus {
    pub normal_samples: usize,
    pub anomaly_samples: usize,
    pub normal_frames: usize,
    pub anomaly_frames: usize,
    pub latest_sample_rate: Option<u32>,
    /// At least one NORMAL frame is available
    pub is_ready: bool,
}
