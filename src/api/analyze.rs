//! Analysis, interview, and ledger-read handlers.
//!
//! Every analysis endpoint takes the same body shape — conversation and
//! patient identifiers plus either structured recent messages or a free-text
//! context — and answers `{"success": true, ...}` on commit. Failures come
//! back through `EngineError::into_response` with the ledger untouched.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::db::AggregateKey;
use crate::error::EngineError;
use crate::merge;
use crate::oracle::ChatTurn;
use crate::{db_call, AppState};

use super::get_owner;

#[derive(Debug, Deserialize)]
pub(super) struct AnalyzeRequest {
    conversation_id: String,
    patient_id: String,
    #[serde(default)]
    recent_messages: Vec<ChatTurn>,
    #[serde(default)]
    conversation_context: Option<String>,
}

impl AnalyzeRequest {
    fn key(&self, owner: String) -> Result<AggregateKey, EngineError> {
        let key = AggregateKey::new(self.conversation_id.clone(), self.patient_id.clone(), owner);
        key.validate()?;
        Ok(key)
    }

    fn transcript(&self) -> Result<String, EngineError> {
        if !self.recent_messages.is_empty() {
            return Ok(crate::oracle::render_transcript(&self.recent_messages));
        }
        match self.conversation_context.as_deref().map(str::trim) {
            Some(ctx) if !ctx.is_empty() => Ok(ctx.to_string()),
            _ => Err(EngineError::EmptyContext),
        }
    }
}

pub(super) async fn analyze_diagnoses(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let key = req.key(get_owner(&headers)?)?;
    let transcript = req.transcript()?;
    let records = merge::run_diagnosis_pass(&state, &key, &transcript).await?;
    Ok(Json(serde_json::json!({ "success": true, "diagnoses": records })))
}

pub(super) async fn analyze_solutions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let key = req.key(get_owner(&headers)?)?;
    let transcript = req.transcript()?;
    let records = merge::run_solution_pass(&state, &key, &transcript).await?;
    Ok(Json(serde_json::json!({ "success": true, "solutions": records })))
}

pub(super) async fn analyze_memory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let key = req.key(get_owner(&headers)?)?;
    let transcript = req.transcript()?;
    let doc = merge::run_memory_pass(&state, &key, &transcript).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "memory": doc.data,
        "updated_at": doc.updated_at,
    })))
}

pub(super) async fn interview_step(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<serde_json::Value>, EngineError> {
    // This step writes no ledger, but the aggregate must still belong to
    // the caller before any of its conversation is processed.
    let key = req.key(get_owner(&headers)?)?;
    if req.recent_messages.is_empty() {
        return Err(EngineError::EmptyContext);
    }
    db_call(&state.db, move |db| db.check_access(&key)).await??;
    let completeness = merge::run_interview_step(&state, &req.recent_messages).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "decision": completeness.decision,
        "complete": completeness.is_complete(),
        "turn_count": completeness.turn_count,
        "quality_score": completeness.quality_score,
        "forced": completeness.forced,
    })))
}

#[derive(Debug, Deserialize)]
pub(super) struct VisualConfirmationRequest {
    conversation_id: String,
    patient_id: String,
    search_term: String,
    matches: bool,
    image_id: String,
}

pub(super) async fn visual_confirmation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<VisualConfirmationRequest>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let key = AggregateKey::new(req.conversation_id, req.patient_id, get_owner(&headers)?);
    key.validate()?;
    let (doc, entry_key) = db_call(&state.db, move |db| {
        db.insert_visual_confirmation(&key, &req.search_term, req.matches, &req.image_id)
    })
    .await??;
    Ok(Json(serde_json::json!({
        "success": true,
        "key": entry_key,
        "memory": doc.data,
    })))
}

#[derive(Debug, Deserialize)]
pub(super) struct LedgerQuery {
    conversation_id: String,
    patient_id: String,
}

impl LedgerQuery {
    fn key(self, headers: &HeaderMap) -> Result<AggregateKey, EngineError> {
        let key = AggregateKey::new(self.conversation_id, self.patient_id, get_owner(headers)?);
        key.validate()?;
        Ok(key)
    }
}

pub(super) async fn get_diagnoses(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<LedgerQuery>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let key = q.key(&headers)?;
    let records = db_call(&state.db, move |db| db.get_diagnoses(&key)).await??;
    Ok(Json(serde_json::json!({ "success": true, "diagnoses": records })))
}

pub(super) async fn get_solutions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<LedgerQuery>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let key = q.key(&headers)?;
    let records = db_call(&state.db, move |db| db.get_solutions(&key)).await??;
    Ok(Json(serde_json::json!({ "success": true, "solutions": records })))
}

pub(super) async fn get_memory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<LedgerQuery>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let key = q.key(&headers)?;
    let doc = db_call(&state.db, move |db| db.get_memory(&key)).await??;
    Ok(Json(serde_json::json!({
        "success": true,
        "memory": doc.data,
        "updated_at": doc.updated_at,
    })))
}
