//! Confidence calibration gate.
//!
//! Oracle-reported confidence scores are untrusted twice over: individual
//! values can be out of range (or NaN), and whole batches can cluster at
//! ~0.9 regardless of evidence strength. Clamping and distribution
//! rejection are independent checks — a batch can pass one and fail the
//! other. Nothing is written to a ledger until both have run.

use crate::error::EngineError;
use crate::thresholds::{Band, HIGH_CONFIDENCE, MAX_HIGH_RATIO, MIN_BATCH_FOR_RATIO};

/// Clamp a single confidence into the component's band.
/// NaN is treated as "no signal" and lands on the floor.
pub fn clamp_confidence(value: f64, band: Band) -> f64 {
    if value.is_nan() {
        return band.floor;
    }
    value.clamp(band.floor, band.ceiling)
}

/// Fraction of a batch scoring at or above HIGH_CONFIDENCE.
/// NaN never counts as high.
pub fn high_ratio(confidences: &[f64]) -> f64 {
    if confidences.is_empty() {
        return 0.0;
    }
    let high = confidences.iter().filter(|c| **c >= HIGH_CONFIDENCE).count();
    high as f64 / confidences.len() as f64
}

/// Anti-clustering check on raw (pre-clamp) confidences.
///
/// Batches of fewer than MIN_BATCH_FOR_RATIO candidates always pass.
/// Rejection means the whole pass aborts with zero ledger writes; the
/// caller surfaces it as a retryable "regenerate" signal.
pub fn check_distribution(confidences: &[f64]) -> Result<(), EngineError> {
    if confidences.len() < MIN_BATCH_FOR_RATIO {
        return Ok(());
    }
    let ratio = high_ratio(confidences);
    if ratio > MAX_HIGH_RATIO {
        let high = confidences.iter().filter(|c| **c >= HIGH_CONFIDENCE).count();
        return Err(EngineError::CalibrationRejected(format!(
            "{high} of {} candidates scored >= {HIGH_CONFIDENCE} ({:.0}% > {:.0}% allowed)",
            confidences.len(),
            ratio * 100.0,
            MAX_HIGH_RATIO * 100.0,
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "calibration_tests.rs"]
mod tests;
