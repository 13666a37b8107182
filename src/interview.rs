//! Interview completeness state machine.
//!
//! Decides when a guided data-gathering flow has asked enough questions.
//! One-way: `Gathering → Complete`, derived fresh from the transcript each
//! turn, never persisted. The oracle's judgment is advisory; the turn-count
//! rules are the authority, including a hard valve at INTERVIEW_MAX_TURNS
//! so a broken or over-eager oracle can never produce an infinite interview.

use serde::Serialize;

use crate::oracle::{ChatTurn, CompletenessJudgment};
use crate::thresholds::{
    INTERVIEW_FALLBACK_TURNS, INTERVIEW_MAX_TURNS, INTERVIEW_MIN_TURNS, INTERVIEW_TOPIC_TURNS,
    TOPIC_QUALITY_MIN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Continue,
    Complete,
}

#[derive(Debug, Clone, Serialize)]
pub struct Completeness {
    pub decision: Decision,
    pub turn_count: u32,
    pub quality_score: f64,
    /// True when the hard turn-count valve decided, oracle judgment ignored.
    pub forced: bool,
}

impl Completeness {
    pub fn is_complete(&self) -> bool {
        self.decision == Decision::Complete
    }
}

/// One turn = one answer from the patient.
pub fn count_turns(messages: &[ChatTurn]) -> u32 {
    messages.iter().filter(|m| m.role == "user").count() as u32
}

/// Decide whether the interview is complete.
///
/// `judgment` is `None` when the oracle call failed; the flow then falls
/// back to the deterministic turn-count rule so it can never hang on a
/// broken oracle.
pub fn assess(turn_count: u32, judgment: Option<&CompletenessJudgment>) -> Completeness {
    // Hard safety valve first: at the cap, the oracle has no say.
    if turn_count >= INTERVIEW_MAX_TURNS {
        return Completeness {
            decision: Decision::Complete,
            turn_count,
            quality_score: judgment.map_or(0.0, |j| j.confidence_score),
            forced: true,
        };
    }

    let Some(j) = judgment else {
        // Oracle down: complete iff we've gathered a reasonable amount.
        return Completeness {
            decision: if turn_count >= INTERVIEW_FALLBACK_TURNS {
                Decision::Complete
            } else {
                Decision::Continue
            },
            turn_count,
            quality_score: 0.0,
            forced: false,
        };
    };

    let oracle_says_done = j.should_complete && turn_count >= INTERVIEW_MIN_TURNS;
    let topic_covered = turn_count >= INTERVIEW_TOPIC_TURNS
        && j.identified_topics_count >= 1
        && j.confidence_score > TOPIC_QUALITY_MIN;

    Completeness {
        decision: if oracle_says_done || topic_covered {
            Decision::Complete
        } else {
            Decision::Continue
        },
        turn_count,
        quality_score: j.confidence_score,
        forced: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn judgment(should_complete: bool, score: f64, topics: u32) -> CompletenessJudgment {
        CompletenessJudgment {
            should_complete,
            confidence_score: score,
            reasoning: String::new(),
            identified_topics_count: topics,
        }
    }

    #[test]
    fn count_turns_only_counts_patient_answers() {
        let msgs = vec![
            ChatTurn { role: "assistant".into(), content: "q1".into() },
            ChatTurn { role: "user".into(), content: "a1".into() },
            ChatTurn { role: "assistant".into(), content: "q2".into() },
            ChatTurn { role: "user".into(), content: "a2".into() },
        ];
        assert_eq!(count_turns(&msgs), 2);
    }

    #[test]
    fn oracle_completion_needs_three_turns() {
        let j = judgment(true, 0.9, 2);
        assert!(!assess(2, Some(&j)).is_complete());
        assert!(assess(3, Some(&j)).is_complete());
    }

    #[test]
    fn oracle_continue_respected_below_cap() {
        let j = judgment(false, 0.2, 0);
        let c = assess(9, Some(&j));
        assert!(!c.is_complete());
        assert!(!c.forced);
    }

    #[test]
    fn forced_at_ten_regardless_of_oracle() {
        let j = judgment(false, 0.1, 0);
        let c = assess(10, Some(&j));
        assert!(c.is_complete());
        assert!(c.forced);
    }

    #[test]
    fn forced_at_ten_when_oracle_failed() {
        let c = assess(10, None);
        assert!(c.is_complete());
        assert!(c.forced);
        assert_eq!(c.quality_score, 0.0);
    }

    #[test]
    fn topic_coverage_completes_at_six() {
        let j = judgment(false, 0.5, 1);
        assert!(!assess(5, Some(&j)).is_complete());
        assert!(assess(6, Some(&j)).is_complete());
    }

    #[test]
    fn trivial_quality_topic_does_not_complete() {
        let j = judgment(false, 0.3, 1); // quality must be strictly above the floor
        assert!(!assess(6, Some(&j)).is_complete());
    }

    #[test]
    fn no_topics_does_not_complete_at_six() {
        let j = judgment(false, 0.9, 0);
        assert!(!assess(6, Some(&j)).is_complete());
    }

    #[test]
    fn fallback_rule_without_oracle() {
        assert!(!assess(6, None).is_complete());
        let c = assess(7, None);
        assert!(c.is_complete());
        assert!(!c.forced);
    }
}
