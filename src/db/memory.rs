//! Memory ledger persistence: one JSON document per aggregate.

use rusqlite::params;

use super::*;
use crate::merge::memory::{merge_memory, visual_confirmation_key, visual_confirmation_value};

impl LedgerDB {
    /// Current memory document; an aggregate with no memory yet reads as an
    /// empty map with zeroed timestamps.
    pub fn get_memory(&self, key: &AggregateKey) -> Result<MemoryDocument, EngineError> {
        key.validate()?;
        let conn = self.conn()?;
        Self::check_owner(&conn, key)?;
        Self::read_memory(&conn, key)
    }

    fn read_memory(
        conn: &rusqlite::Connection,
        key: &AggregateKey,
    ) -> Result<MemoryDocument, EngineError> {
        let row: Option<(String, i64, i64)> = conn
            .query_row(
                "SELECT data, created_at, updated_at FROM memory
                 WHERE conversation_id = ?1 AND patient_id = ?2",
                params![key.conversation_id, key.patient_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match row {
            Some((data, created_at, updated_at)) => {
                let data: MemoryMap = serde_json::from_str(&data)
                    .map_err(|e| EngineError::Internal(format!("stored memory corrupt: {e}")))?;
                Ok(MemoryDocument { data, created_at, updated_at })
            }
            None => Ok(MemoryDocument { data: MemoryMap::new(), created_at: 0, updated_at: 0 }),
        }
    }

    fn write_memory(
        conn: &rusqlite::Connection,
        key: &AggregateKey,
        doc: &MemoryDocument,
    ) -> Result<(), EngineError> {
        let data = serde_json::to_string(&doc.data)
            .map_err(|e| EngineError::Internal(format!("memory serialize: {e}")))?;
        conn.execute(
            "INSERT INTO memory (conversation_id, patient_id, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (conversation_id, patient_id)
             DO UPDATE SET data = ?3, updated_at = ?5",
            params![key.conversation_id, key.patient_id, data, doc.created_at, doc.updated_at],
        )?;
        Ok(())
    }

    /// Shallow merge of oracle-proposed updates, all keys in one transaction.
    /// Callers skip this entirely for an empty update set — `updated_at`
    /// must not move when nothing changed.
    pub fn merge_memory(
        &self,
        key: &AggregateKey,
        updates: &MemoryMap,
    ) -> Result<MemoryDocument, EngineError> {
        key.validate()?;
        let conn = self.conn()?;
        conn.execute_batch("BEGIN IMMEDIATE").map_err(map_busy)?;

        let result = (|| {
            Self::ensure_owner(&conn, key)?;
            let current = Self::read_memory(&conn, key)?;
            if updates.is_empty() {
                return Ok(current);
            }
            let now = now_ms();
            let doc = MemoryDocument {
                data: merge_memory(&current.data, updates),
                created_at: if current.created_at == 0 { now } else { current.created_at },
                updated_at: now,
            };
            Self::write_memory(&conn, key, &doc)?;
            Ok(doc)
        })();

        match result {
            Ok(doc) => {
                conn.execute_batch("COMMIT").map_err(map_busy)?;
                Ok(doc)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Inject an image-confirmation entry under a fresh reserved key.
    /// Bypasses the oracle merge path entirely; existing keys (including
    /// prior confirmations for the same term) are never overwritten.
    pub fn insert_visual_confirmation(
        &self,
        key: &AggregateKey,
        search_term: &str,
        matches: bool,
        image_id: &str,
    ) -> Result<(MemoryDocument, String), EngineError> {
        key.validate()?;
        validate_text("search_term", search_term)?;
        validate_text("image_id", image_id)?;

        let conn = self.conn()?;
        conn.execute_batch("BEGIN IMMEDIATE").map_err(map_busy)?;

        let result = (|| {
            Self::ensure_owner(&conn, key)?;
            let current = Self::read_memory(&conn, key)?;
            let now = now_ms();
            let entry_key = visual_confirmation_key(search_term, &current.data);
            let mut data = current.data;
            data.insert(entry_key.clone(), visual_confirmation_value(matches, image_id, now));
            let doc = MemoryDocument {
                data,
                created_at: if current.created_at == 0 { now } else { current.created_at },
                updated_at: now,
            };
            Self::write_memory(&conn, key, &doc)?;
            Ok((doc, entry_key))
        })();

        match result {
            Ok(out) => {
                conn.execute_batch("COMMIT").map_err(map_busy)?;
                Ok(out)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }
}
