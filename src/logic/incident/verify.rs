//! Incident Verification - Optional external second opinion
//!
//! A verifier receives a short WAV clip around a finalized incident and
//! answers genuine / false positive. Its answer is only an annotation:
//! errors never drop an incident, they mark it `Unverified` and assume it
//! is real.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use super::types::{Incident, Verification};
use crate::constants::VERIFY_CLIP_PADDING_SECS;
use crate::error::{SentinelError, SentinelResult};
use crate::logic::audio::{encode_wav, AudioData};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifierVerdict {
    pub is_real_anomaly: bool,
    #[serde(default)]
    pub reason: String,
}

pub trait AnomalyVerifier: Send + Sync {
    fn verify(&self, clip: &AudioData, incident: &Incident) -> SentinelResult<VerifierVerdict>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Audio kept on each side of the incident
    pub clip_padding_secs: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: None,
            timeout_secs: 30,
            clip_padding_secs: VERIFY_CLIP_PADDING_SECS,
        }
    }
}

impl VerifierConfig {
    pub fn is_enabled(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

// ============================================================================
// HTTP VERIFIER
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest<'a> {
    incident_id: &'a str,
    start_offset: f64,
    duration: f64,
    peak_intensity: f32,
    severity: &'static str,
    mime_type: &'static str,
    audio: String,
}

/// POSTs the clip as base64 WAV, expects `{ "isRealAnomaly", "reason" }`
pub struct HttpVerifier {
    config: VerifierConfig,
}

impl HttpVerifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }
}

impl AnomalyVerifier for HttpVerifier {
    fn verify(&self, clip: &AudioData, incident: &Incident) -> SentinelResult<VerifierVerdict> {
        let body = VerifyRequest {
            incident_id: &incident.id,
            start_offset: incident.start_offset,
            duration: incident.duration,
            peak_intensity: incident.peak_intensity,
            severity: incident.severity.as_str(),
            mime_type: "audio/wav",
            audio: BASE64.encode(encode_wav(clip)?),
        };

        let mut request = ureq::post(&self.config.url)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .set("Content-Type", "application/json");
        if let Some(key) = &self.config.api_key {
            request = request.set("Authorization", &format!("Bearer {}", key));
        }

        let response = match request.send_string(&serde_json::to_string(&body)?) {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, _)) => {
                return Err(SentinelError::Verification(format!("verifier returned HTTP {}", code)));
            }
            Err(e) => return Err(SentinelError::Verification(e.to_string())),
        };

        let text = response
            .into_string()
            .map_err(|e| SentinelError::Verification(e.to_string()))?;
        serde_json::from_str(&text)
            .map_err(|e| SentinelError::Verification(format!("unreadable verdict: {}", e)))
    }
}

// ============================================================================
// ANNOTATION
// ============================================================================

/// Annotate every incident; returns how many got a definite verdict
pub fn verify_incidents(
    incidents: &mut [Incident],
    audio: &AudioData,
    verifier: &dyn AnomalyVerifier,
    padding_secs: f64,
) -> usize {
    let mut verified = 0;
    for incident in incidents.iter_mut() {
        let clip = audio.clip(
            incident.start_offset - padding_secs,
            incident.end_offset() + padding_secs,
        );

        incident.verification = Some(match verifier.verify(&clip, incident) {
            Ok(verdict) => {
                verified += 1;
                log::info!(
                    "Incident {} verified: genuine={} ({})",
                    incident.id,
                    verdict.is_real_anomaly,
                    verdict.reason
                );
                Verification::from_verdict(verdict.is_real_anomaly, verdict.reason)
            }
            Err(e) => {
                log::warn!("Verification of {} failed, assuming genuine: {}", incident.id, e);
                Verification::unverified(e.to_string())
            }
        });
    }
    verified
}
