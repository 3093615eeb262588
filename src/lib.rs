//! Acoustic Sentinel - autoencoder-based acoustic anomaly detection engine
//!
//! Raw audio → spectral frames → reconstruction-error scores → calibrated
//! threshold → incidents. `api::Engine` is the session entry point.

pub mod api;
pub mod constants;
pub mod error;
pub mod logic;

pub use api::Engine;
pub use error::{SentinelError, SentinelResult};
