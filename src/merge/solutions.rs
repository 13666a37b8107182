//! Solution ledger manager: full-replace-with-dedup per analysis pass.
//!
//! Deliberately simpler than the diagnosis engine — the whole set is
//! atomically replaced on every successful pass, with no cross-turn
//! confidence preservation. The asymmetry is inherited product behavior;
//! do not "fix" it here.

use uuid::Uuid;

use crate::calibration::{check_distribution, clamp_confidence};
use crate::db::{validate_text, SolutionRecord};
use crate::error::EngineError;
use crate::oracle::SolutionCandidate;
use crate::thresholds::SOLUTION_BAND;

/// Compute the replacement set for the solution ledger.
///
/// Validates every candidate, runs the distribution gate (rejection aborts
/// the pass with zero writes), then dedups by exact solution text — first
/// within the batch, then against the prior set: a candidate restating a
/// prior solution verbatim carries the prior record forward (same id and
/// created_at) instead of minting a duplicate row.
pub fn plan_replacement(
    candidates: &[SolutionCandidate],
    existing: &[SolutionRecord],
    now: i64,
) -> Result<Vec<SolutionRecord>, EngineError> {
    for c in candidates {
        validate_text("solution", &c.solution)?;
    }

    let confidences: Vec<f64> = candidates.iter().map(|c| c.confidence).collect();
    check_distribution(&confidences)?;

    let mut out: Vec<SolutionRecord> = Vec::with_capacity(candidates.len());
    let mut seen: Vec<&str> = Vec::with_capacity(candidates.len());

    for c in candidates {
        let text = c.solution.trim();
        if seen.contains(&text) {
            continue;
        }
        seen.push(text);

        // Exact (case-sensitive) text match is sufficient here, unlike
        // diagnosis fuzzy matching.
        if let Some(prior) = existing.iter().find(|r| r.solution.trim() == text) {
            out.push(prior.clone());
            continue;
        }

        out.push(SolutionRecord {
            id: Uuid::new_v4().to_string(),
            solution: text.to_string(),
            category: c.category,
            confidence: clamp_confidence(c.confidence, SOLUTION_BAND),
            reasoning: c.reasoning.trim().to_string(),
            created_at: now,
        });
    }

    Ok(out)
}
