//! Diagnosis ledger persistence.

use rusqlite::params;

use super::*;
use crate::oracle::DiagnosisBatch;

const COLS: &str = "id, diagnosis, confidence, reasoning, related_to, created_at, updated_at";

fn row_to_record(row: &rusqlite::Row) -> Result<DiagnosisRecord, rusqlite::Error> {
    Ok(DiagnosisRecord {
        id: row.get(0)?,
        diagnosis: row.get(1)?,
        confidence: row.get(2)?,
        reasoning: row.get(3)?,
        related_to: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl LedgerDB {
    pub fn get_diagnoses(&self, key: &AggregateKey) -> Result<Vec<DiagnosisRecord>, EngineError> {
        key.validate()?;
        let conn = self.conn()?;
        Self::check_owner(&conn, key)?;
        Self::read_diagnoses(&conn, key)
    }

    fn read_diagnoses(
        conn: &rusqlite::Connection,
        key: &AggregateKey,
    ) -> Result<Vec<DiagnosisRecord>, EngineError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLS} FROM diagnoses
             WHERE conversation_id = ?1 AND patient_id = ?2
             ORDER BY created_at, id"
        ))?;
        let rows = stmt
            .query_map(params![key.conversation_id, key.patient_id], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// One merge pass as a single transaction: re-read the ledger, run the
    /// merge engine, replace the aggregate's rows, commit. A concurrent pass
    /// on the same aggregate queues on the write lock or fails retryably;
    /// partial writes never land.
    pub fn merge_diagnoses(
        &self,
        key: &AggregateKey,
        batch: &DiagnosisBatch,
    ) -> Result<Vec<DiagnosisRecord>, EngineError> {
        key.validate()?;
        let conn = self.conn()?;
        conn.execute_batch("BEGIN IMMEDIATE").map_err(map_busy)?;

        let result = (|| {
            Self::ensure_owner(&conn, key)?;
            let existing = Self::read_diagnoses(&conn, key)?;
            let merged = crate::merge::diagnoses::merge_diagnoses(batch, existing, now_ms())?;

            conn.execute(
                "DELETE FROM diagnoses WHERE conversation_id = ?1 AND patient_id = ?2",
                params![key.conversation_id, key.patient_id],
            )?;
            let mut stmt = conn.prepare(
                "INSERT INTO diagnoses
                 (id, conversation_id, patient_id, diagnosis, confidence, reasoning, related_to, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for r in &merged {
                stmt.execute(params![
                    r.id,
                    key.conversation_id,
                    key.patient_id,
                    r.diagnosis,
                    r.confidence,
                    r.reasoning,
                    r.related_to,
                    r.created_at,
                    r.updated_at,
                ])?;
            }
            Ok(merged)
        })();

        match result {
            Ok(merged) => {
                conn.execute_batch("COMMIT").map_err(map_busy)?;
                Ok(merged)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }
}
