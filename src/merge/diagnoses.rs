//! Diagnosis merge engine: preserve/update/insert over the diagnosis ledger.
//!
//! Pure — takes the existing ledger as a snapshot and returns the new one,
//! holding no state between calls. The transactional wrapper lives in
//! `db::diagnoses`.

use tracing::debug;
use uuid::Uuid;

use crate::calibration::{check_distribution, clamp_confidence};
use crate::db::DiagnosisRecord;
use crate::error::EngineError;
use crate::matcher::find_match;
use crate::oracle::{DiagnosisBatch, DiagnosisCandidate};
use crate::thresholds::{DIAGNOSIS_BAND, PRESERVE_THRESHOLD};

/// Merge an oracle candidate batch into the existing ledger snapshot.
///
/// Preserve mode (`preserve_existing`): records at or above the preservation
/// threshold survive; the rest are purged before candidates are considered.
/// A candidate matching a survivor upgrades it in place — confidence is
/// monotonically non-decreasing, reasoning is appended pipe-separated as an
/// audit trail. Unmatched candidates insert with confidence clamped into the
/// diagnosis band.
///
/// Replace mode (the degraded path, when the oracle response carried no
/// relation signal): the whole ledger is replaced with the clamped,
/// deduplicated candidate set.
///
/// Either way the distribution gate runs first; a rejected batch leaves the
/// snapshot untouched and the error propagates to the caller.
pub fn merge_diagnoses(
    batch: &DiagnosisBatch,
    existing: Vec<DiagnosisRecord>,
    now: i64,
) -> Result<Vec<DiagnosisRecord>, EngineError> {
    let confidences: Vec<f64> = batch.diagnoses.iter().map(|c| c.confidence).collect();
    check_distribution(&confidences)?;

    let mut ledger: Vec<DiagnosisRecord> = if batch.preserve_existing {
        let before = existing.len();
        let kept: Vec<DiagnosisRecord> = existing
            .into_iter()
            .filter(|r| r.confidence >= PRESERVE_THRESHOLD)
            .collect();
        if kept.len() < before {
            debug!(purged = before - kept.len(), "purged low-confidence diagnoses");
        }
        kept
    } else {
        Vec::new()
    };

    for candidate in &batch.diagnoses {
        apply_candidate(&mut ledger, candidate, now);
    }

    Ok(ledger)
}

/// Update a matched record in place, or insert a new one. The matcher also
/// sees records inserted earlier in this pass, which keeps identity strings
/// pairwise distinct even within a noisy batch.
fn apply_candidate(ledger: &mut Vec<DiagnosisRecord>, candidate: &DiagnosisCandidate, now: i64) {
    let clamped = clamp_confidence(candidate.confidence, DIAGNOSIS_BAND);
    match find_match(candidate, ledger) {
        Some(i) => {
            let record = &mut ledger[i];
            record.confidence = record.confidence.max(clamped);
            append_reasoning(&mut record.reasoning, &candidate.reasoning);
            record.updated_at = now;
        }
        None => {
            ledger.push(DiagnosisRecord {
                id: Uuid::new_v4().to_string(),
                diagnosis: candidate.diagnosis.trim().to_string(),
                confidence: clamped,
                reasoning: candidate.reasoning.trim().to_string(),
                related_to: candidate
                    .relates_to_existing
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from),
                created_at: now,
                updated_at: now,
            });
        }
    }
}

fn append_reasoning(existing: &mut String, addition: &str) {
    let addition = addition.trim();
    if addition.is_empty() || existing.contains(addition) {
        return;
    }
    if existing.trim().is_empty() {
        *existing = addition.to_string();
    } else {
        existing.push_str(" | ");
        existing.push_str(addition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, confidence: f64) -> DiagnosisRecord {
        DiagnosisRecord {
            id: format!("id-{name}"),
            diagnosis: name.into(),
            confidence,
            reasoning: "initial finding".into(),
            related_to: None,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn candidate(name: &str, confidence: f64) -> DiagnosisCandidate {
        DiagnosisCandidate {
            diagnosis: name.into(),
            confidence,
            reasoning: format!("evidence for {name}"),
            relates_to_existing: None,
        }
    }

    fn preserve_batch(diagnoses: Vec<DiagnosisCandidate>) -> DiagnosisBatch {
        DiagnosisBatch { diagnoses, preserve_existing: true }
    }

    #[test]
    fn matched_candidate_keeps_max_confidence() {
        // existing Migraine 0.75, candidate 0.60 with a back-reference:
        // result keeps 0.75 and appends the new reasoning
        let existing = vec![record("Migraine", 0.75)];
        let batch = preserve_batch(vec![DiagnosisCandidate {
            diagnosis: "Migraine".into(),
            confidence: 0.60,
            reasoning: "recurring aura".into(),
            relates_to_existing: Some("Migraine".into()),
        }]);
        let out = merge_diagnoses(&batch, existing, 2000).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 0.75);
        assert_eq!(out[0].reasoning, "initial finding | recurring aura");
        assert_eq!(out[0].updated_at, 2000);
        assert_eq!(out[0].id, "id-Migraine");
    }

    #[test]
    fn matched_candidate_can_raise_confidence() {
        let existing = vec![record("Migraine", 0.72)];
        let batch = preserve_batch(vec![candidate("migraine", 0.8)]);
        let out = merge_diagnoses(&batch, existing, 2000).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 0.8);
    }

    #[test]
    fn low_confidence_records_purged_even_without_candidates() {
        let existing = vec![record("Tension Headache", 0.5)];
        let batch = preserve_batch(vec![]);
        let out = merge_diagnoses(&batch, existing, 2000).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn unmatched_candidate_inserted_clamped() {
        let existing = vec![record("Migraine", 0.9)];
        let batch = preserve_batch(vec![candidate("Anemia", 0.95)]);
        let out = merge_diagnoses(&batch, existing, 2000).unwrap();
        assert_eq!(out.len(), 2);
        let anemia = out.iter().find(|r| r.diagnosis == "Anemia").unwrap();
        assert_eq!(anemia.confidence, 0.85); // ceiling, never "certain"
        assert_eq!(anemia.created_at, 2000);
    }

    #[test]
    fn high_confidence_record_survives_unmatched_pass() {
        let existing = vec![record("Migraine", 0.8)];
        let batch = preserve_batch(vec![candidate("Insomnia", 0.4)]);
        let out = merge_diagnoses(&batch, existing, 2000).unwrap();
        assert!(out.iter().any(|r| r.diagnosis == "Migraine" && r.confidence == 0.8));
    }

    #[test]
    fn duplicate_candidates_in_batch_collapse() {
        let batch = preserve_batch(vec![
            candidate("Migraine", 0.5),
            DiagnosisCandidate {
                diagnosis: "migraine".into(),
                confidence: 0.6,
                reasoning: "second mention".into(),
                relates_to_existing: None,
            },
        ]);
        let out = merge_diagnoses(&batch, vec![], 2000).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 0.6);
    }

    #[test]
    fn identity_strings_pairwise_distinct_after_merge() {
        let existing = vec![record("Migraine", 0.8), record("Insomnia", 0.75)];
        let batch = preserve_batch(vec![
            candidate("MIGRAINE", 0.5),
            candidate("insomnia", 0.5),
            candidate("Anemia", 0.5),
        ]);
        let out = merge_diagnoses(&batch, existing, 2000).unwrap();
        let mut names: Vec<String> =
            out.iter().map(|r| r.diagnosis.to_lowercase()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), out.len());
    }

    #[test]
    fn replace_mode_discards_high_confidence_records() {
        // Degraded path: no relation signal from the oracle, full reset.
        let existing = vec![record("Migraine", 0.85)];
        let batch = DiagnosisBatch {
            diagnoses: vec![candidate("Anemia", 0.5)],
            preserve_existing: false,
        };
        let out = merge_diagnoses(&batch, existing, 2000).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].diagnosis, "Anemia");
    }

    #[test]
    fn clustered_batch_rejected_without_touching_ledger() {
        let existing = vec![record("Migraine", 0.8)];
        let batch = preserve_batch(vec![
            candidate("A", 0.9),
            candidate("B", 0.85),
            candidate("C", 0.82),
            candidate("D", 0.4),
            candidate("E", 0.3),
        ]);
        let err = merge_diagnoses(&batch, existing, 2000).unwrap_err();
        assert!(matches!(err, EngineError::CalibrationRejected(_)));
    }

    #[test]
    fn nan_confidence_clamps_to_floor_on_insert() {
        let batch = preserve_batch(vec![candidate("Anemia", f64::NAN)]);
        let out = merge_diagnoses(&batch, vec![], 2000).unwrap();
        assert_eq!(out[0].confidence, 0.3);
    }

    #[test]
    fn reasoning_not_duplicated_on_repeat_candidate() {
        let existing = vec![record("Migraine", 0.75)];
        let batch = preserve_batch(vec![DiagnosisCandidate {
            diagnosis: "Migraine".into(),
            confidence: 0.5,
            reasoning: "initial finding".into(),
            relates_to_existing: None,
        }]);
        let out = merge_diagnoses(&batch, existing, 2000).unwrap();
        assert_eq!(out[0].reasoning, "initial finding");
    }
}
