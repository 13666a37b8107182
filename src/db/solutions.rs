//! Solution ledger persistence.

use rusqlite::params;

use super::*;
use crate::oracle::SolutionCandidate;

const COLS: &str = "id, solution, category, confidence, reasoning, created_at";

fn row_to_record(row: &rusqlite::Row) -> Result<SolutionRecord, rusqlite::Error> {
    let category: String = row.get(2)?;
    let category = Category::parse(&category).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("bad category: {category}").into(),
        )
    })?;
    Ok(SolutionRecord {
        id: row.get(0)?,
        solution: row.get(1)?,
        category,
        confidence: row.get(3)?,
        reasoning: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl LedgerDB {
    pub fn get_solutions(&self, key: &AggregateKey) -> Result<Vec<SolutionRecord>, EngineError> {
        key.validate()?;
        let conn = self.conn()?;
        Self::check_owner(&conn, key)?;
        Self::read_solutions(&conn, key)
    }

    fn read_solutions(
        conn: &rusqlite::Connection,
        key: &AggregateKey,
    ) -> Result<Vec<SolutionRecord>, EngineError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLS} FROM solutions
             WHERE conversation_id = ?1 AND patient_id = ?2
             ORDER BY created_at, id"
        ))?;
        let rows = stmt
            .query_map(params![key.conversation_id, key.patient_id], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Atomic full replace: validate + gate + dedup inside one transaction,
    /// delete the prior set, insert the accepted set. Gate rejection rolls
    /// back with zero writes.
    pub fn replace_solutions(
        &self,
        key: &AggregateKey,
        candidates: &[SolutionCandidate],
    ) -> Result<Vec<SolutionRecord>, EngineError> {
        key.validate()?;
        let conn = self.conn()?;
        conn.execute_batch("BEGIN IMMEDIATE").map_err(map_busy)?;

        let result = (|| {
            Self::ensure_owner(&conn, key)?;
            let existing = Self::read_solutions(&conn, key)?;
            let planned = crate::merge::solutions::plan_replacement(candidates, &existing, now_ms())?;

            conn.execute(
                "DELETE FROM solutions WHERE conversation_id = ?1 AND patient_id = ?2",
                params![key.conversation_id, key.patient_id],
            )?;
            let mut stmt = conn.prepare(
                "INSERT INTO solutions
                 (id, conversation_id, patient_id, solution, category, confidence, reasoning, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for r in &planned {
                stmt.execute(params![
                    r.id,
                    key.conversation_id,
                    key.patient_id,
                    r.solution,
                    r.category.as_str(),
                    r.confidence,
                    r.reasoning,
                    r.created_at,
                ])?;
            }
            Ok(planned)
        })();

        match result {
            Ok(planned) => {
                conn.execute_batch("COMMIT").map_err(map_busy)?;
                Ok(planned)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }
}
