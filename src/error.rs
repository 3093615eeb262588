//! Engine error taxonomy.
//!
//! Scoring a single frame while training runs is not an error: it returns
//! the neutral result. A file scan that overlaps training fails with `Busy`.

use thiserror::Error;

pub type SentinelResult<T> = Result<T, SentinelError>;

#[derive(Debug, Error)]
pub enum SentinelError {
    /// Rejected before the network is touched; prior model stays intact
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no NORMAL baseline data available for training/calibration")]
    NoBaselineData,

    /// A training run is in progress
    #[error("detector is busy (training in progress)")]
    Busy,

    /// Generic training failure, distinct from missing data
    #[error("training failed: {0}")]
    TrainingFailed(String),

    #[error("training cancelled after {completed_epochs} epoch(s)")]
    TrainingCancelled { completed_epochs: usize },

    /// Malformed or incompatible persisted bundle
    #[error("invalid model bundle: {0}")]
    InvalidBundle(String),

    #[error("base threshold is not calibrated")]
    ThresholdUnset,

    #[error("frame width mismatch: expected {expected}, got {actual}")]
    FrameWidth { expected: usize, actual: usize },

    #[error("no scored frames available")]
    NoScores,

    /// Unreadable/corrupt audio at the decode boundary
    #[error("audio decode error: {0}")]
    Decode(String),

    #[error("verification error: {0}")]
    Verification(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SentinelError {
    /// Short machine-readable kind, used in command messages
    pub fn kind(&self) -> &'static str {
        match self {
            SentinelError::InvalidConfig(_) => "config",
            SentinelError::NoBaselineData => "no_data",
            SentinelError::Busy => "busy",
            SentinelError::TrainingFailed(_) => "training_failed",
            SentinelError::TrainingCancelled { .. } => "cancelled",
            SentinelError::InvalidBundle(_) => "bundle",
            SentinelError::ThresholdUnset => "threshold_unset",
            SentinelError::FrameWidth { .. } => "frame_width",
            SentinelError::NoScores => "no_scores",
            SentinelError::Decode(_) => "decode",
            SentinelError::Verification(_) => "verification",
            SentinelError::Io(_) => "io",
            SentinelError::Json(_) => "json",
        }
    }
}

impl From<hound::Error> for SentinelError {
    fn from(err: hound::Error) -> Self {
        SentinelError::Decode(err.to_string())
    }
}

impl From<base64::DecodeError> for SentinelError {
    fn from(err: base64::DecodeError) -> Self {
        SentinelError::InvalidBundle(format!("weights blob is not valid base64: {}", err))
    }
}
