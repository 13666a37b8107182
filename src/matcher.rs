//! Entity matching for diagnosis candidates.
//!
//! Decides whether an oracle candidate refers to a diagnosis already on the
//! ledger. Two strategies, tried in fixed order:
//!
//! 1. case-insensitive equality on the diagnosis display name
//! 2. the oracle's `relates_to_existing` back-reference, also compared
//!    case-insensitively (the oracle sometimes rewords the name but still
//!    points at the entity it meant)
//!
//! The back-reference is an LLM-produced field and may be absent or wrong;
//! both strategies failing degrades to "no match", never an error.

use crate::db::DiagnosisRecord;
use crate::oracle::DiagnosisCandidate;

/// Index into `existing` of the record the candidate refers to, if any.
pub fn find_match(candidate: &DiagnosisCandidate, existing: &[DiagnosisRecord]) -> Option<usize> {
    let name = candidate.diagnosis.trim();
    if let Some(i) = existing
        .iter()
        .position(|r| r.diagnosis.trim().eq_ignore_ascii_case(name))
    {
        return Some(i);
    }

    let back_ref = candidate.relates_to_existing.as_deref()?.trim();
    if back_ref.is_empty() {
        return None;
    }
    existing
        .iter()
        .position(|r| r.diagnosis.trim().eq_ignore_ascii_case(back_ref))
}
