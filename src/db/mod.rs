//! SQLite-backed ledger storage, partitioned by conversation aggregate.
//!
//! Every mutation is a single read-merge-write transaction (`BEGIN
//! IMMEDIATE`), so at most one merge per aggregate is in flight at a time;
//! a concurrent writer gets SQLITE_BUSY, surfaced as a retryable
//! `EngineError::Conflict`. The database is the single source of truth —
//! no in-process caches.

mod diagnoses;
mod memory;
mod solutions;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Set busy_timeout on every connection handed out by the pool.
/// Prevents spurious SQLITE_BUSY under concurrent write pressure.
#[derive(Debug)]
struct BusyTimeoutCustomizer;
impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error> for BusyTimeoutCustomizer {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }
}

type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

const MAX_TEXT_LEN: usize = 4096;

/// The unit of isolation: every ledger row belongs to exactly one aggregate
/// and merges never cross aggregate boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateKey {
    pub conversation_id: String,
    pub patient_id: String,
    pub owner_id: String,
}

impl AggregateKey {
    pub fn new(
        conversation_id: impl Into<String>,
        patient_id: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            patient_id: patient_id.into(),
            owner_id: owner_id.into(),
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        for (field, value) in [
            ("conversation_id", &self.conversation_id),
            ("patient_id", &self.patient_id),
            ("owner_id", &self.owner_id),
        ] {
            if value.trim().is_empty() {
                return Err(EngineError::Validation(format!("{field} must not be empty")));
            }
            if value.len() > 128 {
                return Err(EngineError::Validation(format!("{field} too long")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Lifestyle,
    Stress,
    Sleep,
    Nutrition,
    Exercise,
    MentalHealth,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Lifestyle => "lifestyle",
            Category::Stress => "stress",
            Category::Sleep => "sleep",
            Category::Nutrition => "nutrition",
            Category::Exercise => "exercise",
            Category::MentalHealth => "mental_health",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "lifestyle" => Ok(Category::Lifestyle),
            "stress" => Ok(Category::Stress),
            "sleep" => Ok(Category::Sleep),
            "nutrition" => Ok(Category::Nutrition),
            "exercise" => Ok(Category::Exercise),
            "mental_health" => Ok(Category::MentalHealth),
            other => Err(EngineError::Validation(format!("unknown category: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    pub id: String,
    /// Display name, doubles as the natural identity key. Case-insensitively
    /// unique within an aggregate.
    pub diagnosis: String,
    pub confidence: f64,
    /// Pipe-separated audit trail: each matched candidate appends its
    /// reasoning rather than overwriting the history.
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_to: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionRecord {
    pub id: String,
    pub solution: String,
    pub category: Category,
    pub confidence: f64,
    pub reasoning: String,
    pub created_at: i64,
}

pub type MemoryMap = serde_json::Map<String, serde_json::Value>;

/// The stored memory document plus its timestamps. `updated_at` must not
/// move on an empty merge.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryDocument {
    pub data: MemoryMap,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Serialize)]
pub struct Stats {
    pub aggregates: usize,
    pub diagnoses: usize,
    pub solutions: usize,
    pub memories: usize,
    pub oracle_calls: i64,
    pub oracle_input_tokens: i64,
    pub oracle_output_tokens: i64,
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}

/// SQLITE_BUSY / SQLITE_LOCKED mean another merge holds the aggregate's
/// write transaction — retryable, not a database fault.
fn map_busy(e: rusqlite::Error) -> EngineError {
    if let rusqlite::Error::SqliteFailure(f, _) = &e {
        if matches!(
            f.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ) {
            return EngineError::Conflict;
        }
    }
    EngineError::Database(e)
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS aggregates (
    conversation_id TEXT NOT NULL,
    patient_id TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (conversation_id, patient_id)
);

CREATE TABLE IF NOT EXISTS diagnoses (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    patient_id TEXT NOT NULL,
    diagnosis TEXT NOT NULL,
    confidence REAL NOT NULL,
    reasoning TEXT NOT NULL DEFAULT '',
    related_to TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_diagnoses_aggregate ON diagnoses(conversation_id, patient_id);

CREATE TABLE IF NOT EXISTS solutions (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    patient_id TEXT NOT NULL,
    solution TEXT NOT NULL,
    category TEXT NOT NULL,
    confidence REAL NOT NULL,
    reasoning TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_solutions_aggregate ON solutions(conversation_id, patient_id);

CREATE TABLE IF NOT EXISTS memory (
    conversation_id TEXT NOT NULL,
    patient_id TEXT NOT NULL,
    data TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (conversation_id, patient_id)
);

CREATE TABLE IF NOT EXISTS llm_usage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    task TEXT NOT NULL,
    model TEXT NOT NULL,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    duration_ms INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_llm_usage_ts ON llm_usage(ts);
"#;

pub struct LedgerDB {
    pool: Pool<SqliteConnectionManager>,
}

impl LedgerDB {
    /// Open (or create) a database at the given path.
    /// Pool size defaults to 8 (1 writer + 7 readers in WAL mode).
    pub fn open(path: &str) -> Result<Self, EngineError> {
        let pool_size = if path == ":memory:" { 2 } else { 8 };
        let manager = if path == ":memory:" {
            // Shared cache so all pool connections see the same in-memory DB.
            // Each test gets a unique name to avoid cross-test pollution.
            let name = uuid::Uuid::new_v4().to_string();
            SqliteConnectionManager::file(format!("file:{name}?mode=memory&cache=shared"))
        } else {
            SqliteConnectionManager::file(path)
        };
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_customizer(Box::new(BusyTimeoutCustomizer))
            .build(manager)
            .map_err(|e| EngineError::Internal(format!("pool: {e}")))?;

        let conn = pool.get().map_err(|e| EngineError::Internal(e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        drop(conn);

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConn, EngineError> {
        self.pool.get().map_err(|e| EngineError::Internal(e.to_string()))
    }

    /// Verify the caller owns the aggregate, claiming it on first contact.
    /// Must run inside the caller's transaction so a claim and the write it
    /// authorizes commit (or roll back) together.
    fn ensure_owner(conn: &rusqlite::Connection, key: &AggregateKey) -> Result<(), EngineError> {
        let existing: Option<String> = conn
            .query_row(
                "SELECT owner_id FROM aggregates WHERE conversation_id = ?1 AND patient_id = ?2",
                rusqlite::params![key.conversation_id, key.patient_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match existing {
            Some(owner) if owner == key.owner_id => Ok(()),
            Some(_) => Err(EngineError::Unauthorized),
            None => {
                conn.execute(
                    "INSERT INTO aggregates (conversation_id, patient_id, owner_id, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![key.conversation_id, key.patient_id, key.owner_id, now_ms()],
                )?;
                Ok(())
            }
        }
    }

    /// Read-only ownership check for ledger GETs. An unclaimed aggregate is
    /// readable by anyone (it has no data yet); a claimed one only by its owner.
    fn check_owner(conn: &rusqlite::Connection, key: &AggregateKey) -> Result<(), EngineError> {
        let owner: Option<String> = conn
            .query_row(
                "SELECT owner_id FROM aggregates WHERE conversation_id = ?1 AND patient_id = ?2",
                rusqlite::params![key.conversation_id, key.patient_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match owner {
            Some(o) if o != key.owner_id => Err(EngineError::Unauthorized),
            _ => Ok(()),
        }
    }

    /// Read-only ownership check without touching any ledger. Used by
    /// endpoints that process a conversation but write nothing.
    pub fn check_access(&self, key: &AggregateKey) -> Result<(), EngineError> {
        key.validate()?;
        let conn = self.conn()?;
        Self::check_owner(&conn, key)
    }

    pub fn log_llm_call(
        &self,
        task: &str,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        duration_ms: u64,
    ) -> Result<(), EngineError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO llm_usage (ts, task, model, input_tokens, output_tokens, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![now_ms(), task, model, input_tokens, output_tokens, duration_ms as i64],
        )?;
        Ok(())
    }

    pub fn stats(&self) -> Result<Stats, EngineError> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<usize, rusqlite::Error> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0)).map(|n| n as usize)
        };
        let aggregates = count("SELECT COUNT(*) FROM aggregates")?;
        let diagnoses = count("SELECT COUNT(*) FROM diagnoses")?;
        let solutions = count("SELECT COUNT(*) FROM solutions")?;
        let memories = count("SELECT COUNT(*) FROM memory")?;
        let (oracle_calls, oracle_input_tokens, oracle_output_tokens) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(input_tokens), 0), COALESCE(SUM(output_tokens), 0)
             FROM llm_usage",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(Stats {
            aggregates,
            diagnoses,
            solutions,
            memories,
            oracle_calls,
            oracle_input_tokens,
            oracle_output_tokens,
        })
    }
}

pub(crate) fn validate_text(field: &str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{field} must not be empty")));
    }
    if value.chars().count() > MAX_TEXT_LEN {
        return Err(EngineError::Validation(format!("{field} too long")));
    }
    Ok(())
}
