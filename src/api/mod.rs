use axum::extract::State;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use subtle::ConstantTimeEq;
use tower_http::limit::RequestBodyLimitLayer;

use crate::error::EngineError;
use crate::AppState;

mod analyze;

use analyze::*;

/// Requests carry the owning user in this header; the aggregate ownership
/// check in the DB layer enforces that it matches the ledger's owner.
fn get_owner(headers: &axum::http::HeaderMap) -> Result<String, EngineError> {
    headers
        .get("x-owner-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| EngineError::Validation("missing x-owner-id header".into()))
}

/// Auth middleware: checks Bearer token if ANAMNESIS_API_KEY is configured.
async fn require_auth(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, EngineError> {
    let Some(ref expected) = state.api_key else {
        return Ok(next.run(req).await);
    };

    let unauthorized = || EngineError::Unauthorized;

    let header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or_else(unauthorized)?;

    // constant-time comparison to prevent timing attacks
    if token.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(next.run(req).await)
    } else {
        Err(unauthorized())
    }
}

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats));

    let protected = Router::new()
        .route("/analyze/diagnoses", post(analyze_diagnoses))
        .route("/analyze/solutions", post(analyze_solutions))
        .route("/analyze/memory", post(analyze_memory))
        .route("/interview/step", post(interview_step))
        .route("/memory/visual-confirmation", post(visual_confirmation))
        .route("/ledgers/diagnoses", get(get_diagnoses))
        .route("/ledgers/solutions", get(get_solutions))
        .route("/ledgers/memory", get(get_memory))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "oracle": state.oracle.is_some(),
    }))
}

async fn stats(State(state): State<AppState>) -> Result<Json<crate::db::Stats>, EngineError> {
    let stats = crate::db_call(&state.db, |db| db.stats()).await??;
    Ok(Json(stats))
}
