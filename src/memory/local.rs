//! Local keyword-indexed fallback store.
//!
//! Used when both remote backends are unavailable or empty and keywords
//! exist. Backed by an embedded SQLite database; matching is plain keyword
//! `LIKE` search filtered by recency and minimum confidence. Hits carry a
//! neutral similarity constant rather than a computed score.

use crate::models::{Action, MatchType, MemoryEntry, MemorySource};
use crate::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

/// Similarity assigned to local hits.
///
/// Not a computed score; callers must not treat it as one.
pub const NEUTRAL_SIMILARITY: f32 = 0.5;

/// Embedded keyword-indexed store of past cases.
pub struct LocalMemoryStore {
    conn: Mutex<Connection>,
}

impl LocalMemoryStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::OperationFailed {
            operation: "local_store_open".to_string(),
            cause: e.to_string(),
        })?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory store (tests, ephemeral deployments).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::OperationFailed {
            operation: "local_store_open".to_string(),
            cause: e.to_string(),
        })?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS notes (
                id          TEXT PRIMARY KEY,
                created_at  INTEGER NOT NULL,
                assets      TEXT NOT NULL DEFAULT '',
                action      TEXT,
                confidence  REAL NOT NULL DEFAULT 0.0,
                summary     TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notes_created_at ON notes(created_at);",
        )
        .map_err(|e| Error::OperationFailed {
            operation: "local_store_init".to_string(),
            cause: e.to_string(),
        })
    }

    /// Inserts or replaces a past case.
    pub fn insert(
        &self,
        id: &str,
        created_at: DateTime<Utc>,
        assets: &[String],
        action: Option<Action>,
        confidence: f32,
        summary: &str,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO notes (id, created_at, assets, action, confidence, summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                id,
                created_at.timestamp(),
                assets.join(","),
                action.map(|a| a.as_str()),
                f64::from(confidence),
                summary,
            ],
        )
        .map_err(|e| Error::OperationFailed {
            operation: "local_store_insert".to_string(),
            cause: e.to_string(),
        })?;
        Ok(())
    }

    /// Keyword search filtered by recency window and minimum confidence.
    ///
    /// A row matches when its summary contains any of the keywords
    /// (case-insensitive). Results are ordered newest first.
    pub fn search(
        &self,
        keywords: &[String],
        window_hours: u32,
        min_confidence: f32,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        let cutoff = (Utc::now() - ChronoDuration::hours(i64::from(window_hours))).timestamp();

        let mut sql = String::from(
            "SELECT id, created_at, assets, action, confidence, summary FROM notes
             WHERE created_at >= ?1 AND confidence >= ?2 AND (",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(cutoff), Box::new(f64::from(min_confidence))];
        for (i, keyword) in keywords.iter().enumerate() {
            if i > 0 {
                sql.push_str(" OR ");
            }
            sql.push_str(&format!("summary LIKE ?{} COLLATE NOCASE", i + 3));
            params.push(Box::new(format!("%{keyword}%")));
        }
        sql.push_str(") ORDER BY created_at DESC LIMIT ?");
        sql.push_str(&(keywords.len() + 3).to_string());
        params.push(Box::new(i64::try_from(limit).unwrap_or(i64::MAX)));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(|e| Error::OperationFailed {
            operation: "local_store_search".to_string(),
            cause: e.to_string(),
        })?;

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(std::convert::AsRef::as_ref).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                let id: String = row.get(0)?;
                let created_at: i64 = row.get(1)?;
                let assets: String = row.get(2)?;
                let action: Option<String> = row.get(3)?;
                let confidence: f64 = row.get(4)?;
                let summary: String = row.get(5)?;
                Ok((id, created_at, assets, action, confidence, summary))
            })
            .map_err(|e| Error::OperationFailed {
                operation: "local_store_search".to_string(),
                cause: e.to_string(),
            })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, created_at, assets, action, confidence, summary) =
                row.map_err(|e| Error::OperationFailed {
                    operation: "local_store_search".to_string(),
                    cause: e.to_string(),
                })?;
            #[allow(clippy::cast_possible_truncation)]
            entries.push(MemoryEntry {
                id,
                created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_else(Utc::now),
                assets: assets
                    .split(',')
                    .filter(|a| !a.is_empty())
                    .map(str::to_string)
                    .collect(),
                action: action.as_deref().map(Action::parse),
                confidence: confidence as f32,
                similarity: NEUTRAL_SIMILARITY,
                summary,
                source: MemorySource::Local,
                match_type: MatchType::Keyword,
            });
        }
        Ok(entries)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::OperationFailed {
            operation: "local_store_lock".to_string(),
            cause: "connection mutex poisoned".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_rows() -> LocalMemoryStore {
        let store = LocalMemoryStore::in_memory().unwrap();
        store
            .insert(
                "n1",
                Utc::now(),
                &["BTC".to_string()],
                Some(Action::Buy),
                0.8,
                "ETF inflow drove Bitcoin rally",
            )
            .unwrap();
        store
            .insert(
                "n2",
                Utc::now() - ChronoDuration::hours(200),
                &["ETH".to_string()],
                Some(Action::Observe),
                0.9,
                "Ethereum upgrade completed without incident",
            )
            .unwrap();
        store
            .insert(
                "n3",
                Utc::now(),
                &["SOL".to_string()],
                None,
                0.1,
                "Solana rumor about Bitcoin bridge",
            )
            .unwrap();
        store
    }

    #[test]
    fn test_keyword_match() {
        let store = store_with_rows();
        let hits = store
            .search(&["bitcoin".to_string()], 72, 0.3, 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "n1");
        assert!((hits[0].similarity - NEUTRAL_SIMILARITY).abs() < f32::EPSILON);
        assert_eq!(hits[0].source, MemorySource::Local);
    }

    #[test]
    fn test_recency_window_excludes_old() {
        let store = store_with_rows();
        let hits = store
            .search(&["ethereum".to_string()], 72, 0.3, 10)
            .unwrap();
        assert!(hits.is_empty());
        let hits = store
            .search(&["ethereum".to_string()], 300, 0.3, 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_min_confidence_filter() {
        let store = store_with_rows();
        // n3 mentions "Bitcoin" but has confidence 0.1.
        let hits = store
            .search(&["bitcoin".to_string()], 72, 0.3, 10)
            .unwrap();
        assert!(hits.iter().all(|h| h.id != "n3"));
    }

    #[test]
    fn test_empty_keywords_returns_empty() {
        let store = store_with_rows();
        assert!(store.search(&[], 72, 0.0, 10).unwrap().is_empty());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        let store = LocalMemoryStore::open(&path).unwrap();
        store
            .insert("x", Utc::now(), &[], None, 0.5, "persisted note")
            .unwrap();
        drop(store);
        let reopened = LocalMemoryStore::open(&path).unwrap();
        let hits = reopened
            .search(&["persisted".to_string()], 1, 0.0, 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
    }
}
