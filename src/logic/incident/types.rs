use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,    // Barely above threshold
    Medium, // > medium ratio
    High,   // > high ratio
}

impl Severity {
    pub fn from_intensity(intensity: f32, high_ratio: f32, medium_ratio: f32) -> Self {
        if intensity > high_ratio {
            Severity::High
        } else if intensity > medium_ratio {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Verified,
    FalsePositive,
    /// Verifier failed; the incident is assumed real
    Unverified,
}

/// Advisory annotation from an external verifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub status: VerificationStatus,
    pub genuine: bool,
    pub reason: String,
}

impl Verification {
    pub fn from_verdict(genuine: bool, reason: String) -> Self {
        Self {
            status: if genuine {
                VerificationStatus::Verified
            } else {
                VerificationStatus::FalsePositive
            },
            genuine,
            reason,
        }
    }

    pub fn unverified(reason: String) -> Self {
        Self {
            status: VerificationStatus::Unverified,
            genuine: true,
            reason,
        }
    }
}

/// Merged interval of above-threshold frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    /// Seconds from the start of the session
    pub start_offset: f64,
    /// Seconds, at least one frame period
    pub duration: f64,
    /// Peak smoothed score / threshold, ≥ 1
    pub peak_intensity: f32,
    pub severity: Severity,
    pub frame_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
}

impl Incident {
    pub fn end_offset(&self) -> f64 {
        self.start_offset + self.duration
    }
}
