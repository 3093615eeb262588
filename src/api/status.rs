use serde::{Deserialize, Serialize};

use crate::logic::model::DetectorStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub version: String,
    pub feature_version: u8,
    pub layout_hash: u32,
    pub frame_width: usize,

    pub detector: DetectorStatus,
    pub model_path: String,
    pub verifier_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Success,
    Warning,
    Error,
}

/// Human-readable outcome of a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub status: MessageStatus,
    pub message: String,
    /// Error kind for `Error` messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl CommandMessage {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: MessageStatus::Success,
            message: message.into(),
            code: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: MessageStatus::Warning,
            message: message.into(),
            code: None,
        }
    }

    pub fn error(err: &crate::error::SentinelError) -> Self {
        Self {
            status: MessageStatus::Error,
            message: err.to_string(),
            code: Some(err.kind().to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == MessageStatus::Error
    }
}
