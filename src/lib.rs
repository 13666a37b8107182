//! anamnesis — clinical knowledge accumulation engine.
//!
//! A consistency layer over an unreliable data source: repeatedly calls an
//! external reasoning oracle on fragments of a health-guidance conversation
//! and merges its noisy, possibly-contradictory output into durable
//! per-conversation ledgers (diagnoses, solutions, free-form memory), with
//! calibration gates in front of every write.

pub mod api;
pub mod calibration;
pub mod db;
pub mod error;
pub mod interview;
pub mod matcher;
pub mod merge;
pub mod oracle;
pub mod prompts;
pub mod thresholds;

use std::sync::Arc;

pub type SharedDB = Arc<db::LedgerDB>;

/// Run a blocking DB operation on tokio's blocking thread pool.
///
/// All synchronous LedgerDB calls in async context MUST go through this
/// to avoid starving tokio worker threads.
pub async fn db_call<F, T>(db: &SharedDB, f: F) -> Result<T, error::EngineError>
where
    F: FnOnce(&db::LedgerDB) -> T + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| error::EngineError::Internal(e.to_string()))
}

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDB,
    pub oracle: Option<oracle::OracleConfig>,
    pub api_key: Option<String>,
    pub started_at: std::time::Instant,
}
