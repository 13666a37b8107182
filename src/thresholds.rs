/// Tuning constants for the accumulation engine, in one place.
///
/// The hierarchy for diagnosis confidence: insert floor (0.3) < preservation
/// cutoff (0.7) < high-confidence mark (0.8) < insert ceiling (0.85).

/// Diagnosis records at or above this confidence survive a merge pass
/// untouched unless a candidate matches and upgrades them.
pub const PRESERVE_THRESHOLD: f64 = 0.7;

/// A candidate confidence at or above this counts as "high" for the
/// calibration gate's clustering check.
pub const HIGH_CONFIDENCE: f64 = 0.8;

/// Reject a batch when more than this fraction of candidates score high.
/// Catches the degenerate oracle response where everything is ~0.9.
pub const MAX_HIGH_RATIO: f64 = 0.4;

/// Batches smaller than this skip the distribution check —
/// a ratio over 1-2 samples is noise, not a distribution.
pub const MIN_BATCH_FOR_RATIO: usize = 3;

/// Confidence clamp band per component. Floors and ceilings are deliberate:
/// oracle-reported diagnosis confidence is never allowed to reach "certain".
#[derive(Debug, Clone, Copy)]
pub struct Band {
    pub floor: f64,
    pub ceiling: f64,
}

pub const DIAGNOSIS_BAND: Band = Band { floor: 0.3, ceiling: 0.85 };
pub const SOLUTION_BAND: Band = Band { floor: 0.1, ceiling: 0.9 };
pub const TOPIC_BAND: Band = Band { floor: 0.15, ceiling: 0.89 };

/// Interview flow: minimum turns before the oracle may end it.
pub const INTERVIEW_MIN_TURNS: u32 = 3;

/// Interview flow: with an identified topic of non-trivial quality,
/// this many turns is enough.
pub const INTERVIEW_TOPIC_TURNS: u32 = 6;

/// Interview flow: deterministic fallback cutoff when the oracle is down.
pub const INTERVIEW_FALLBACK_TURNS: u32 = 7;

/// Interview flow: hard safety valve — always complete at this many turns.
pub const INTERVIEW_MAX_TURNS: u32 = 10;

/// Quality floor below which an identified topic doesn't count toward
/// early completion.
pub const TOPIC_QUALITY_MIN: f64 = 0.3;
