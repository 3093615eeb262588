//! Background Training - Progress stream + cooperative cancellation
//!
//! `AnomalyDetector::retrain` is synchronous and CPU bound. This wraps it in
//! `spawn_blocking`, forwards one `EpochProgress` per epoch over a channel
//! and checks a cancel flag at every epoch boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::detector::AnomalyDetector;
use super::threshold::CalibrationOutcome;
use crate::error::{SentinelError, SentinelResult};

/// Emitted once per completed epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochProgress {
    /// 1-based
    pub epoch: usize,
    pub total_epochs: usize,
    pub loss: f32,
}

/// Observer verdict after each epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingControl {
    Continue,
    Stop,
}

/// Result of a successful training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs_completed: usize,
    pub final_loss: f32,
    pub normal_frames: usize,
    pub anomaly_frames: usize,
    pub sample_rate: u32,
    pub calibration: CalibrationOutcome,
}

/// Handle to a retraining run on the blocking pool
pub struct TrainingHandle {
    progress: mpsc::UnboundedReceiver<EpochProgress>,
    cancel: Arc<AtomicBool>,
    task: JoinHandle<SentinelResult<TrainingReport>>,
}

impl TrainingHandle {
    /// Next epoch event, None once the run is over
    pub async fn next_progress(&mut self) -> Option<EpochProgress> {
        self.progress.recv().await
    }

    /// Ask the run to stop after the current epoch
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Wait for the run to end
    pub async fn finish(self) -> SentinelResult<TrainingReport> {
        self.task
            .await
            .map_err(|e| SentinelError::TrainingFailed(format!("training task aborted: {}", e)))?
    }
}

/// Retrain `detector` from its Training Buffer in the background
pub fn spawn_retraining(detector: Arc<AnomalyDetector>) -> TrainingHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();

    let task = tokio::task::spawn_blocking(move || {
        detector.retrain(|progress| {
            // Receiver may be gone, training goes on regardless
            let _ = tx.send(progress.clone());
            if flag.load(Ordering::SeqCst) {
                TrainingControl::Stop
            } else {
                TrainingControl::Continue
            }
        })
    });

    TrainingHandle {
        progress: rx,
        cancel,
        task,
    }
}
