//! Analysis passes: one oracle call plus one ledger transaction per pass.
//!
//! Each pass follows the same shape: snapshot the ledger for the prompt,
//! call the oracle (bounded timeout, outside any transaction), then hand the
//! validated batch to a single read-merge-write transaction. An oracle or
//! calibration failure ends the pass with the ledger untouched.

pub mod diagnoses;
pub mod memory;
pub mod solutions;

use tracing::{info, warn};

use crate::db::{AggregateKey, DiagnosisRecord, MemoryDocument, SolutionRecord};
use crate::error::EngineError;
use crate::interview::{self, Completeness};
use crate::oracle::{self, ChatTurn, ToolCallResult};
use crate::thresholds::TOPIC_BAND;
use crate::{db_call, AppState};

fn oracle_cfg(state: &AppState) -> Result<&oracle::OracleConfig, EngineError> {
    state.oracle.as_ref().ok_or(EngineError::OracleNotConfigured)
}

fn log_usage<T>(state: &AppState, task: &str, result: &ToolCallResult<T>) {
    if let Some(ref u) = result.usage {
        if let Err(e) = state.db.log_llm_call(
            task,
            &result.model,
            u.prompt_tokens,
            u.completion_tokens,
            result.duration_ms,
        ) {
            warn!(error = %e, "usage logging failed");
        }
    }
}

/// Diagnosis pass: preserve/update/insert against the diagnosis ledger.
pub async fn run_diagnosis_pass(
    state: &AppState,
    key: &AggregateKey,
    transcript: &str,
) -> Result<Vec<DiagnosisRecord>, EngineError> {
    let cfg = oracle_cfg(state)?;

    let snapshot = {
        let key = key.clone();
        db_call(&state.db, move |db| db.get_diagnoses(&key)).await??
    };

    let result = oracle::propose_diagnoses(cfg, transcript, &snapshot).await?;
    log_usage(state, "diagnosis", &result);
    let batch = result.value;

    let merged = {
        let key = key.clone();
        db_call(&state.db, move |db| db.merge_diagnoses(&key, &batch)).await??
    };
    info!(
        conversation = %key.conversation_id,
        records = merged.len(),
        "diagnosis merge pass committed"
    );
    Ok(merged)
}

/// Solution pass: atomic full replace of the solution ledger.
pub async fn run_solution_pass(
    state: &AppState,
    key: &AggregateKey,
    transcript: &str,
) -> Result<Vec<SolutionRecord>, EngineError> {
    let cfg = oracle_cfg(state)?;

    let snapshot = {
        let key = key.clone();
        db_call(&state.db, move |db| db.get_solutions(&key)).await??
    };

    let result = oracle::propose_solutions(cfg, transcript, &snapshot).await?;
    log_usage(state, "solution", &result);
    let candidates = result.value;

    let replaced = {
        let key = key.clone();
        db_call(&state.db, move |db| db.replace_solutions(&key, &candidates)).await??
    };
    info!(
        conversation = %key.conversation_id,
        records = replaced.len(),
        "solution ledger replaced"
    );
    Ok(replaced)
}

/// Memory pass: shallow merge of oracle-proposed fact updates.
/// An empty update set skips the write entirely — no timestamp churn.
pub async fn run_memory_pass(
    state: &AppState,
    key: &AggregateKey,
    transcript: &str,
) -> Result<MemoryDocument, EngineError> {
    let cfg = oracle_cfg(state)?;

    let snapshot = {
        let key = key.clone();
        db_call(&state.db, move |db| db.get_memory(&key)).await??
    };

    let result = oracle::propose_memory_updates(cfg, transcript, &snapshot.data).await?;
    log_usage(state, "memory", &result);
    let updates = result.value;

    if updates.is_empty() {
        info!(conversation = %key.conversation_id, "memory pass proposed no updates, skipping write");
        return Ok(snapshot);
    }

    let merged = {
        let key = key.clone();
        db_call(&state.db, move |db| db.merge_memory(&key, &updates)).await??
    };
    info!(
        conversation = %key.conversation_id,
        keys = merged.data.len(),
        "memory merge pass committed"
    );
    Ok(merged)
}

/// Interview step: ask the oracle for a completeness judgment, then let the
/// turn-count rules decide. Oracle failure degrades to the deterministic
/// fallback — this step can never hang or error out on a broken oracle.
pub async fn run_interview_step(
    state: &AppState,
    messages: &[ChatTurn],
) -> Result<Completeness, EngineError> {
    let turn_count = interview::count_turns(messages);

    let judgment = match state.oracle.as_ref() {
        None => {
            warn!(turn_count, "oracle not configured, using turn-count fallback");
            None
        }
        Some(cfg) => {
            let transcript = oracle::render_transcript(messages);
            match oracle::judge_completeness(cfg, &transcript).await {
                Ok(result) => {
                    log_usage(state, "interview", &result);
                    let mut j = result.value;
                    // Oracle-reported quality gets the topic-extraction clamp band.
                    j.confidence_score =
                        crate::calibration::clamp_confidence(j.confidence_score, TOPIC_BAND);
                    Some(j)
                }
                Err(e) => {
                    warn!(error = %e, turn_count, "completeness oracle failed, using turn-count fallback");
                    None
                }
            }
        }
    };

    Ok(interview::assess(turn_count, judgment.as_ref()))
}
