use anamnesis::api::router;
use anamnesis::AppState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

fn test_state(api_key: Option<&str>) -> AppState {
    let db = anamnesis::db::LedgerDB::open(":memory:").unwrap();
    AppState {
        db: std::sync::Arc::new(db),
        oracle: None,
        api_key: api_key.map(|s| s.to_string()),
        started_at: std::time::Instant::now(),
    }
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_req(
    method: &str,
    uri: &str,
    body: serde_json::Value,
    owner: Option<&str>,
    token: Option<&str>,
) -> Request<Body> {
    let mut b = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(o) = owner {
        b = b.header("x-owner-id", o);
    }
    if let Some(t) = token {
        b = b.header("authorization", format!("Bearer {t}"));
    }
    b.body(Body::from(serde_json::to_vec(&body).unwrap())).unwrap()
}

fn get_req(uri: &str, owner: Option<&str>, token: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().method("GET").uri(uri);
    if let Some(o) = owner {
        b = b.header("x-owner-id", o);
    }
    if let Some(t) = token {
        b = b.header("authorization", format!("Bearer {t}"));
    }
    b.body(Body::empty()).unwrap()
}

fn interview_body(turns: u32) -> serde_json::Value {
    let mut messages = Vec::new();
    for i in 0..turns {
        messages.push(json!({"role": "assistant", "content": format!("question {i}")}));
        messages.push(json!({"role": "user", "content": format!("answer {i}")}));
    }
    json!({
        "conversation_id": "conv-1",
        "patient_id": "patient-1",
        "recent_messages": messages,
    })
}

// --- auth ---

#[tokio::test]
async fn auth_rejects_no_token() {
    let app = router(test_state(Some("secret123")));
    let resp = app
        .oneshot(get_req(
            "/ledgers/diagnoses?conversation_id=c&patient_id=p",
            Some("owner-1"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn auth_rejects_wrong_token() {
    let app = router(test_state(Some("secret123")));
    let resp = app
        .oneshot(get_req(
            "/ledgers/diagnoses?conversation_id=c&patient_id=p",
            Some("owner-1"),
            Some("wrongtoken"),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn auth_passes_correct_token() {
    let app = router(test_state(Some("secret123")));
    let resp = app
        .oneshot(get_req(
            "/ledgers/diagnoses?conversation_id=c&patient_id=p",
            Some("owner-1"),
            Some("secret123"),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_is_public() {
    let app = router(test_state(Some("secret123")));
    let resp = app.oneshot(get_req("/health", None, None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["oracle"], false);
}

// --- request validation ---

#[tokio::test]
async fn missing_owner_header_rejected() {
    let app = router(test_state(None));
    let resp = app
        .oneshot(get_req("/ledgers/diagnoses?conversation_id=c&patient_id=p", None, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn empty_context_rejected() {
    let app = router(test_state(None));
    let body = json!({"conversation_id": "c", "patient_id": "p"});
    let resp = app
        .oneshot(json_req("POST", "/analyze/diagnoses", body, Some("owner-1"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn analysis_without_oracle_is_unavailable() {
    let app = router(test_state(None));
    let body = json!({
        "conversation_id": "c",
        "patient_id": "p",
        "conversation_context": "patient reports frequent headaches",
    });
    let resp = app
        .oneshot(json_req("POST", "/analyze/diagnoses", body, Some("owner-1"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// --- ledger reads ---

#[tokio::test]
async fn empty_ledgers_read_as_empty() {
    let app = router(test_state(None));
    let resp = app
        .clone()
        .oneshot(get_req(
            "/ledgers/diagnoses?conversation_id=c&patient_id=p",
            Some("owner-1"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["diagnoses"], json!([]));

    let resp = app
        .oneshot(get_req("/ledgers/memory?conversation_id=c&patient_id=p", Some("owner-1"), None))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["memory"], json!({}));
}

// --- interview flow (no oracle: deterministic fallback rules) ---

#[tokio::test]
async fn interview_continues_early() {
    let app = router(test_state(None));
    let resp = app
        .oneshot(json_req("POST", "/interview/step", interview_body(5), Some("owner-1"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["decision"], "continue");
    assert_eq!(body["complete"], json!(false));
    assert_eq!(body["turn_count"], 5);
}

#[tokio::test]
async fn interview_fallback_completes_at_seven() {
    let app = router(test_state(None));
    let resp = app
        .oneshot(json_req("POST", "/interview/step", interview_body(7), Some("owner-1"), None))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["decision"], "complete");
    assert_eq!(body["forced"], json!(false));
}

#[tokio::test]
async fn interview_forced_complete_at_ten() {
    let app = router(test_state(None));
    let resp = app
        .oneshot(json_req("POST", "/interview/step", interview_body(10), Some("owner-1"), None))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["decision"], "complete");
    assert_eq!(body["forced"], json!(true));
}

#[tokio::test]
async fn interview_step_answers_only_the_aggregate_owner() {
    let app = router(test_state(None));
    let claim = json!({
        "conversation_id": "conv-1",
        "patient_id": "patient-1",
        "search_term": "skin rash",
        "matches": true,
        "image_id": "img-1",
    });
    let resp = app
        .clone()
        .oneshot(json_req("POST", "/memory/visual-confirmation", claim, Some("owner-1"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(json_req("POST", "/interview/step", interview_body(5), Some("owner-2"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn interview_requires_messages() {
    let app = router(test_state(None));
    let body = json!({"conversation_id": "c", "patient_id": "p"});
    let resp = app
        .oneshot(json_req("POST", "/interview/step", body, Some("owner-1"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- visual confirmation feedback ---

#[tokio::test]
async fn visual_confirmation_round_trip() {
    let app = router(test_state(None));
    let body = json!({
        "conversation_id": "conv-1",
        "patient_id": "patient-1",
        "search_term": "skin rash",
        "matches": true,
        "image_id": "img-42",
    });
    let resp = app
        .clone()
        .oneshot(json_req("POST", "/memory/visual-confirmation", body.clone(), Some("owner-1"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let first = body_json(resp).await;
    assert_eq!(first["key"], "visual_confirmation_skin_rash");

    // repeat confirmation for the same term gets its own key
    let resp = app
        .clone()
        .oneshot(json_req("POST", "/memory/visual-confirmation", body, Some("owner-1"), None))
        .await
        .unwrap();
    let second = body_json(resp).await;
    assert_eq!(second["key"], "visual_confirmation_skin_rash_2");

    let resp = app
        .oneshot(get_req(
            "/ledgers/memory?conversation_id=conv-1&patient_id=patient-1",
            Some("owner-1"),
            None,
        ))
        .await
        .unwrap();
    let stored = body_json(resp).await;
    assert_eq!(stored["memory"]["visual_confirmation_skin_rash"]["image_id"], "img-42");
    assert_eq!(stored["memory"]["visual_confirmation_skin_rash_2"]["matches"], json!(true));
}

#[tokio::test]
async fn foreign_owner_cannot_read_claimed_aggregate() {
    let app = router(test_state(None));
    let body = json!({
        "conversation_id": "conv-1",
        "patient_id": "patient-1",
        "search_term": "skin rash",
        "matches": false,
        "image_id": "img-1",
    });
    let resp = app
        .clone()
        .oneshot(json_req("POST", "/memory/visual-confirmation", body, Some("owner-1"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(get_req(
            "/ledgers/memory?conversation_id=conv-1&patient_id=patient-1",
            Some("owner-2"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// --- stats ---

#[tokio::test]
async fn stats_reports_counts() {
    let app = router(test_state(None));
    let body = json!({
        "conversation_id": "conv-1",
        "patient_id": "patient-1",
        "search_term": "skin rash",
        "matches": true,
        "image_id": "img-1",
    });
    app.clone()
        .oneshot(json_req("POST", "/memory/visual-confirmation", body, Some("owner-1"), None))
        .await
        .unwrap();

    let resp = app.oneshot(get_req("/stats", None, None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let stats = body_json(resp).await;
    assert_eq!(stats["aggregates"], 1);
    assert_eq!(stats["memories"], 1);
}
