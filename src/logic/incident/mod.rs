//! Incident Module - Anomaly segmentation and verification
//!
//! Incidents are a derived view of (scores × threshold): recomputed from
//! scratch by `segment` whenever the threshold moves, never patched.

pub mod segmenter;
pub mod types;
pub mod verify;

pub use segmenter::{segment, SegmenterConfig};
pub use types::{Incident, Severity, Verification, VerificationStatus};
pub use verify::{verify_incidents, AnomalyVerifier, HttpVerifier, VerifierVerdict};
