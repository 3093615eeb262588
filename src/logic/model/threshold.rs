//! Threshold Calibration
//!
//! Two strategies feed the same downstream threshold:
//! - training-time: percentiles of NORMAL (and optionally ANOMALY)
//!   reconstruction errors set `base_threshold`
//! - auto-calibration: sigma rule + energy compensation over one scored
//!   recording adjusts `sensitivity`, leaving `base_threshold` alone
//!
//! effective = base_threshold * (2 / sensitivity) * 10000

use serde::{Deserialize, Serialize};

use crate::constants::{
    ANOMALY_PERCENTILE, DEFAULT_SENSITIVITY, ENERGY_DIVISOR, MAX_SENSITIVITY, MIN_SENSITIVITY,
    NORMAL_PERCENTILE, SAFETY_MARGIN, SCORE_SCALE, SENSITIVITY_NUMERATOR, SIGMA_MULTIPLIER,
};
use crate::error::{SentinelError, SentinelResult};
use crate::logic::scoring::ScoredFrame;

// ============================================================================
// CONFIG
// ============================================================================

/// Threshold Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Percentile of NORMAL errors (0.0 - 1.0)
    pub normal_percentile: f32,

    /// Percentile of ANOMALY errors for the separation check
    pub anomaly_percentile: f32,

    /// Multiplier on the NORMAL percentile
    pub safety_margin: f32,

    /// k in mean + k * stddev
    pub sigma_multiplier: f32,

    /// energy_factor = 1 + avg_amplitude / energy_divisor
    pub energy_divisor: f32,

    /// Sensitivity applied at startup
    pub default_sensitivity: f32,

    /// Sensitivity clamp used by auto-calibration
    pub min_sensitivity: f32,
    pub max_sensitivity: f32,

    /// Fixed reporting scale shared by scores and thresholds
    pub score_scale: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            normal_percentile: NORMAL_PERCENTILE,
            anomaly_percentile: ANOMALY_PERCENTILE,
            safety_margin: SAFETY_MARGIN,
            sigma_multiplier: SIGMA_MULTIPLIER,
            energy_divisor: ENERGY_DIVISOR,
            default_sensitivity: DEFAULT_SENSITIVITY,
            min_sensitivity: MIN_SENSITIVITY,
            max_sensitivity: MAX_SENSITIVITY,
            score_scale: SCORE_SCALE,
        }
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> SentinelResult<()> {
        let unit = |v: f32| v.is_finite() && (0.0..=1.0).contains(&v);
        let positive = |v: f32| v.is_finite() && v > 0.0;

        if !unit(self.normal_percentile) || !unit(self.anomaly_percentile) {
            return Err(SentinelError::InvalidConfig(
                "percentiles must be within [0, 1]".to_string(),
            ));
        }
        if !positive(self.safety_margin)
            || !positive(self.energy_divisor)
            || !positive(self.score_scale)
            || !(self.sigma_multiplier.is_finite() && self.sigma_multiplier >= 0.0)
        {
            return Err(SentinelError::InvalidConfig(
                "calibration factors must be positive".to_string(),
            ));
        }
        if !positive(self.min_sensitivity) || self.max_sensitivity < self.min_sensitivity {
            return Err(SentinelError::InvalidConfig(format!(
                "invalid sensitivity range [{}, {}]",
                self.min_sensitivity, self.max_sensitivity
            )));
        }
        validate_sensitivity(self.default_sensitivity)
    }

    /// effective = base * (2 / sensitivity) * scale
    pub fn effective_threshold(&self, base_threshold: f32, sensitivity: f32) -> SentinelResult<f32> {
        effective_threshold(base_threshold, sensitivity, self.score_scale)
    }

    /// Sensitivity that maps `base_threshold` onto `target`, clamped
    pub fn sensitivity_for_target(&self, base_threshold: f32, target: f32) -> (f32, bool) {
        let raw = if target > 0.0 && target.is_finite() {
            base_threshold * SENSITIVITY_NUMERATOR * self.score_scale / target
        } else {
            f32::INFINITY
        };
        let clamped = raw.clamp(self.min_sensitivity, self.max_sensitivity);
        (clamped, clamped != raw)
    }
}

pub fn validate_sensitivity(sensitivity: f32) -> SentinelResult<()> {
    if sensitivity.is_finite() && sensitivity > 0.0 {
        Ok(())
    } else {
        Err(SentinelError::InvalidConfig(format!(
            "sensitivity must be a positive number, got {}",
            sensitivity
        )))
    }
}

/// Live decision threshold in score units
pub fn effective_threshold(base_threshold: f32, sensitivity: f32, score_scale: f32) -> SentinelResult<f32> {
    if !(base_threshold.is_finite() && base_threshold >= 0.0) {
        return Err(SentinelError::InvalidConfig(format!(
            "base threshold must be a non-negative number, got {}",
            base_threshold
        )));
    }
    validate_sensitivity(sensitivity)?;
    Ok(base_threshold * (SENSITIVITY_NUMERATOR / sensitivity) * score_scale)
}

/// Nearest-rank (floor) percentile of an ascending slice
pub fn percentile(sorted: &[f32], q: f32) -> Option<f32> {
    if sorted.is_empty() {
        return None;
    }
    let idx = ((sorted.len() as f32 * q).floor() as usize).min(sorted.len() - 1);
    Some(sorted[idx])
}

fn sorted_finite(values: &[f32]) -> Vec<f32> {
    let mut sorted: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

// ============================================================================
// TRAINING-TIME CALIBRATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationStatus {
    Success,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    pub status: CalibrationStatus,
    pub message: String,
    /// Raw-MSE units
    pub base_threshold: f32,
    pub normal_percentile_error: f32,
    pub anomaly_percentile_error: Option<f32>,
    pub normal_count: usize,
    pub anomaly_count: usize,
}

/// Derive `base_threshold` from per-frame reconstruction errors
pub fn calibrate_from_errors(
    normal_errors: &[f32],
    anomaly_errors: &[f32],
    cfg: &CalibrationConfig,
) -> SentinelResult<CalibrationOutcome> {
    let normal = sorted_finite(normal_errors);
    let p_normal = percentile(&normal, cfg.normal_percentile).ok_or(SentinelError::NoBaselineData)?;

    let anomaly = sorted_finite(anomaly_errors);
    let p_anomaly = percentile(&anomaly, cfg.anomaly_percentile);

    let margin_threshold = p_normal * cfg.safety_margin;
    let (status, base_threshold, message) = match p_anomaly {
        Some(p_anom) if p_anom > p_normal => (
            CalibrationStatus::Success,
            (p_normal + p_anom) / 2.0,
            format!(
                "clean separation: NORMAL p{:.0} {:.6} < ANOMALY p{:.0} {:.6}, threshold at midpoint",
                cfg.normal_percentile * 100.0,
                p_normal,
                cfg.anomaly_percentile * 100.0,
                p_anom
            ),
        ),
        Some(p_anom) => (
            CalibrationStatus::Warning,
            margin_threshold,
            format!(
                "classes overlap (ANOMALY p{:.0} {:.6} <= NORMAL p{:.0} {:.6}), consider reducing latentDim",
                cfg.anomaly_percentile * 100.0,
                p_anom,
                cfg.normal_percentile * 100.0,
                p_normal
            ),
        ),
        None => (
            CalibrationStatus::Success,
            margin_threshold,
            format!(
                "calibrated on NORMAL baseline: p{:.0} {:.6} x {:.2}",
                cfg.normal_percentile * 100.0,
                p_normal,
                cfg.safety_margin
            ),
        ),
    };

    Ok(CalibrationOutcome {
        status,
        message,
        base_threshold,
        normal_percentile_error: p_normal,
        anomaly_percentile_error: p_anomaly,
        normal_count: normal.len(),
        anomaly_count: anomaly.len(),
    })
}

// ============================================================================
// SIGNAL-STATISTICS AUTO-CALIBRATION
// ============================================================================

/// Score statistics over one analysed recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalStats {
    pub mean: f32,
    /// Population standard deviation
    pub std_dev: f32,
    pub avg_amplitude: f32,
    pub sample_count: usize,
}

impl SignalStats {
    /// None for an empty chart
    pub fn from_frames(frames: &[ScoredFrame]) -> Option<Self> {
        if frames.is_empty() {
            return None;
        }
        let n = frames.len() as f64;
        let mean = frames.iter().map(|f| f.smoothed_score as f64).sum::<f64>() / n;
        let variance = frames
            .iter()
            .map(|f| (f.smoothed_score as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        let avg_amplitude = frames.iter().map(|f| f.amplitude as f64).sum::<f64>() / n;

        Some(Self {
            mean: mean as f32,
            std_dev: variance.sqrt() as f32,
            avg_amplitude: avg_amplitude as f32,
            sample_count: frames.len(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoCalibration {
    pub stats: SignalStats,
    pub energy_factor: f32,
    pub target_threshold: f32,
    pub sensitivity: f32,
    /// Sensitivity hit the clamp, so effective != target
    pub clamped: bool,
    pub effective_threshold: f32,
}

/// Solve for the sensitivity that puts the live threshold at
/// (mean + k·σ) · (1 + avg_amplitude / divisor)
pub fn auto_calibrate(
    frames: &[ScoredFrame],
    base_threshold: f32,
    cfg: &CalibrationConfig,
) -> SentinelResult<AutoCalibration> {
    let stats = SignalStats::from_frames(frames).ok_or(SentinelError::NoScores)?;

    let energy_factor = 1.0 + stats.avg_amplitude / cfg.energy_divisor;
    let target_threshold = (stats.mean + cfg.sigma_multiplier * stats.std_dev) * energy_factor;
    let (sensitivity, clamped) = cfg.sensitivity_for_target(base_threshold, target_threshold);
    let effective_threshold = cfg.effective_threshold(base_threshold, sensitivity)?;

    Ok(AutoCalibration {
        stats,
        energy_factor,
        target_threshold,
        sensitivity,
        clamped,
        effective_threshold,
    })
}
