use axum::http::StatusCode;
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("conversation context must not be empty")]
    EmptyContext,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("oracle not configured (set ANAMNESIS_LLM_URL)")]
    OracleNotConfigured,

    /// Network failure, timeout, or non-2xx from the oracle.
    #[error("oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// Valid transport, but the payload failed to parse or validate.
    #[error("oracle returned malformed output: {0}")]
    OracleMalformed(String),

    /// Distributionally implausible confidence scores. Retryable:
    /// the caller should regenerate; no ledger write occurred.
    #[error("calibration rejected: {0}")]
    CalibrationRejected(String),

    /// Concurrent write on the same aggregate. Retryable with a fresh pass.
    #[error("conflicting write in progress, retry")]
    Conflict,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Conflict => StatusCode::CONFLICT,
            Self::CalibrationRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::OracleNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            Self::OracleUnavailable(_) | Self::OracleMalformed(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Whether the caller can meaningfully retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict
                | Self::CalibrationRejected(_)
                | Self::OracleUnavailable(_)
                | Self::OracleMalformed(_)
        )
    }
}

impl axum::response::IntoResponse for EngineError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "retryable": self.is_retryable(),
        }));
        (status, body).into_response()
    }
}
