use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rusqlite::{Connection, params};
use serde::Serialize;

use cx_core::similarity::cosine_similarity;
use cx_core::time::{millis_to_iso8601, now_millis};
use cx_core::{MemoryRecord, MetadataValue, QueryFilters, SessionSnapshot, VectorMemory};

use crate::error::{Result, StoreError};
use crate::schema;

/// Score bonus per query keyword found in a memory's content.
pub const KEYWORD_BONUS: f64 = 0.05;

const SESSION_KEY: &str = "session_state";

/// One scored query hit.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    pub id: String,
    pub score: f64,
    pub content: String,
    pub metadata: BTreeMap<String, MetadataValue>,
    pub updated_at: String,
}

/// Record counts grouped by the `kind` metadata field.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub by_kind: BTreeMap<String, usize>,
}

/// Brute-force vector store over a single SQLite file.
pub struct MemoryStore {
    conn: Mutex<Connection>,
}

impl MemoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Metadata ---

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = ?1")?;
        let result = stmt.query_row([key], |row| row.get(0)).ok();
        Ok(result)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // --- Session state ---

    pub fn save_session(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        self.set_metadata(SESSION_KEY, &json)
    }

    /// The saved session, or `None` before the first save.
    pub fn load_session(&self) -> Result<Option<SessionSnapshot>> {
        match self.get_metadata(SESSION_KEY)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Returns whether a saved session existed.
    pub fn clear_session(&self) -> Result<bool> {
        let removed = self
            .conn()
            .execute("DELETE FROM metadata WHERE key = ?1", [SESSION_KEY])?;
        Ok(removed > 0)
    }

    // --- Write ---

    /// Insert or replace every record in one transaction.
    pub fn upsert_records(&self, records: &[MemoryRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let updated_at = millis_to_iso8601(now_millis());
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO memories (id, vector, content, metadata, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for record in records {
                if record.id.is_empty() {
                    return Err(StoreError::InvalidData("record id is empty".into()));
                }
                let metadata = serde_json::to_string(&record.metadata)?;
                stmt.execute(params![
                    record.id,
                    encode_vector(&record.vector),
                    record.text().unwrap_or_default(),
                    metadata,
                    updated_at,
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(records = records.len(), "upserted memories");
        Ok(records.len())
    }

    pub fn clear(&self) -> Result<usize> {
        let removed = self.conn().execute("DELETE FROM memories", [])?;
        tracing::info!(removed, "cleared memory store");
        Ok(removed)
    }

    // --- Read ---

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT COALESCE(json_extract(metadata, '$.kind'), 'unknown'), COUNT(*)
             FROM memories GROUP BY 1 ORDER BY 1",
        )?;
        let rows: Vec<(String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;

        let mut stats = StoreStats::default();
        for (kind, n) in rows {
            stats.total += n as usize;
            stats.by_kind.insert(kind, n as usize);
        }
        Ok(stats)
    }

    /// Rank every stored memory against `vector`: cosine similarity plus a
    /// fixed bonus per keyword contained in the content. Records failing a
    /// metadata filter or with empty content are skipped.
    pub fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        keywords: &[String],
        filters: Option<&QueryFilters>,
    ) -> Result<Vec<ScoredMemory>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, vector, content, metadata, updated_at FROM memories
             WHERE content != '' ORDER BY updated_at DESC, rowid DESC",
        )?;
        let rows: Vec<(String, Vec<u8>, String, String, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .collect::<std::result::Result<_, _>>()?;

        let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        let mut hits = Vec::new();
        for (id, blob, content, metadata, updated_at) in rows {
            let metadata: BTreeMap<String, MetadataValue> = serde_json::from_str(&metadata)?;
            if !matches_filters(&metadata, filters) {
                continue;
            }
            let stored = decode_vector(&id, &blob)?;
            let lowered = content.to_lowercase();
            let keyword_hits = keywords.iter().filter(|k| lowered.contains(k.as_str())).count();
            let score = cosine_similarity(vector, &stored) + KEYWORD_BONUS * keyword_hits as f64;
            hits.push(ScoredMemory {
                id,
                score,
                content,
                metadata,
                updated_at,
            });
        }

        // Stable: equal scores keep most-recent-first order.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Top-K contents joined by blank lines; empty when nothing matches.
    pub fn query_text(
        &self,
        vector: &[f32],
        top_k: usize,
        keywords: &[String],
        filters: Option<&QueryFilters>,
    ) -> Result<String> {
        let hits = self.search(vector, top_k, keywords, filters)?;
        Ok(hits
            .into_iter()
            .map(|h| h.content)
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

#[async_trait]
impl VectorMemory for MemoryStore {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        keywords: &[String],
        filters: Option<&QueryFilters>,
    ) -> cx_core::Result<String> {
        self.query_text(vector, top_k, keywords, filters)
            .map_err(StoreError::into_retrieval)
    }

    async fn upsert(&self, records: Vec<MemoryRecord>) -> cx_core::Result<()> {
        self.upsert_records(&records)
            .map(|_| ())
            .map_err(StoreError::into_persistence)
    }

    fn is_available(&self) -> bool {
        true
    }
}

fn matches_filters(metadata: &BTreeMap<String, MetadataValue>, filters: Option<&QueryFilters>) -> bool {
    filters.is_none_or(|f| f.iter().all(|(k, v)| metadata.get(k) == Some(v)))
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(id: &str, blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::InvalidData(format!(
            "vector for '{id}' has {} bytes, not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
