//! Message Log
//!
//! Durable append-only log of conversation turns with SQLite backend.
//! Each row carries the turn text and, when available, its embedding as a
//! little-endian f32 BLOB. Keeping both in one row means the relational
//! log and the similarity index cannot drift apart: an id either has a
//! vector or it doesn't.

use anyhow::Result;
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::{debug, info};

use crate::embeddings::{embedding_from_bytes, embedding_to_bytes, EmbeddingClient};

/// A logged conversation turn
#[derive(Debug, Clone)]
pub struct LoggedMessage {
    pub id: i64,
    pub role: String,
    pub content: String,
    pub timestamp: i64,
}

/// Similarity search hit
#[derive(Debug, Clone)]
pub struct SimilarMessage {
    pub message: LoggedMessage,
    pub score: f64,
}

/// Append-only message log with per-row embeddings
pub struct MessageLog {
    conn: Connection,
}

impl MessageLog {
    /// Open or create the log database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let log = Self { conn };
        log.init_schema()?;

        info!("Message log opened: {}", path.display());
        Ok(log)
    }

    /// In-memory log for tests and ephemeral runs
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let log = Self { conn };
        log.init_schema()?;
        Ok(log)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                role TEXT NOT NULL CHECK(role IN ('system', 'user', 'assistant')),
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL DEFAULT (unixepoch()),
                embedding BLOB
            );

            CREATE INDEX IF NOT EXISTS idx_messages_timestamp
                ON messages(timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_messages_has_embedding
                ON messages(embedding IS NOT NULL);
            "#,
        )?;

        Ok(())
    }

    /// Append a turn, returning its auto-incremented id
    pub fn append(&self, role: &str, content: &str, embedding: Option<&[f32]>) -> Result<i64> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let embedding_bytes = embedding.map(embedding_to_bytes);

        self.conn.execute(
            "INSERT INTO messages (role, content, timestamp, embedding)
             VALUES (?1, ?2, ?3, ?4)",
            params![role, content, timestamp, embedding_bytes],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!("Logged {} message #{}", role, id);
        Ok(id)
    }

    /// Most recent messages in chronological order
    pub fn recent(&self, limit: usize) -> Result<Vec<LoggedMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, role, content, timestamp FROM messages
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let mut messages: Vec<LoggedMessage> = stmt
            .query_map(params![limit], |row| {
                Ok(LoggedMessage {
                    id: row.get(0)?,
                    role: row.get(1)?,
                    content: row.get(2)?,
                    timestamp: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        messages.reverse();
        Ok(messages)
    }

    /// Top-k messages most similar to the query vector
    ///
    /// Scans all rows with embeddings and ranks by cosine similarity;
    /// ties break towards the newer message.
    pub fn search_similar(&self, query_vec: &[f32], top_k: usize) -> Result<Vec<SimilarMessage>> {
        if top_k == 0 {
            return Ok(vec![]);
        }

        let mut stmt = self.conn.prepare(
            "SELECT id, role, content, timestamp, embedding
             FROM messages
             WHERE embedding IS NOT NULL",
        )?;

        let mut results: Vec<SimilarMessage> = stmt
            .query_map([], |row| {
                let embedding_bytes: Vec<u8> = row.get(4)?;
                let embedding = embedding_from_bytes(&embedding_bytes);
                let score = EmbeddingClient::cosine_similarity(query_vec, &embedding) as f64;
                Ok(SimilarMessage {
                    message: LoggedMessage {
                        id: row.get(0)?,
                        role: row.get(1)?,
                        content: row.get(2)?,
                        timestamp: row.get(3)?,
                    },
                    score,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.message.id.cmp(&a.message.id))
        });
        results.truncate(top_k);

        Ok(results)
    }

    /// Messages logged without an embedding (service was down at write time)
    pub fn unembedded(&self, batch_size: usize) -> Result<Vec<(i64, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, content FROM messages
             WHERE embedding IS NULL
             LIMIT ?1",
        )?;

        let rows: Vec<(i64, String)> = stmt
            .query_map(params![batch_size], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(rows)
    }

    /// Attach an embedding to an existing row
    pub fn set_embedding(&self, id: i64, embedding: &[f32]) -> Result<()> {
        let bytes = embedding_to_bytes(embedding);
        self.conn.execute(
            "UPDATE messages SET embedding = ?1 WHERE id = ?2",
            params![bytes, id],
        )?;
        Ok(())
    }

    /// Total logged messages
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Messages that carry an embedding
    pub fn embedded_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Wipe the log
    pub fn clear(&self) -> Result<usize> {
        let rows = self.conn.execute("DELETE FROM messages", [])?;
        info!("Cleared {} logged messages", rows);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log() -> MessageLog {
        MessageLog::open_in_memory().unwrap()
    }

    #[test]
    fn test_append_and_recent() {
        let log = temp_log();

        log.append("user", "Hello there", None).unwrap();
        log.append("assistant", "Hi! How can I help?", None).unwrap();

        let recent = log.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].role, "user");
        assert_eq!(recent[1].role, "assistant");
        assert!(recent[0].id < recent[1].id);
    }

    #[test]
    fn test_ids_auto_increment() {
        let log = temp_log();

        let first = log.append("user", "one", None).unwrap();
        let second = log.append("user", "two", None).unwrap();
        assert_eq!(second, first + 1);
    }

    #[test]
    fn test_search_similar_ranks_by_cosine() {
        let log = temp_log();

        log.append("user", "exact match", Some(&[1.0, 0.0, 0.0])).unwrap();
        log.append("user", "orthogonal", Some(&[0.0, 1.0, 0.0])).unwrap();
        log.append("user", "close match", Some(&[0.9, 0.1, 0.0])).unwrap();
        log.append("user", "no embedding", None).unwrap();

        let results = log.search_similar(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].message.content, "exact match");
        assert_eq!(results[1].message.content, "close match");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_search_similar_skips_unembedded_rows() {
        let log = temp_log();

        log.append("user", "no vector", None).unwrap();
        let results = log.search_similar(&[1.0, 0.0], 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_search_similar_zero_k() {
        let log = temp_log();
        log.append("user", "anything", Some(&[1.0])).unwrap();
        assert!(log.search_similar(&[1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_unembedded_backfill() {
        let log = temp_log();

        let id = log.append("user", "late vector", None).unwrap();
        log.append("user", "has vector", Some(&[0.5, 0.5])).unwrap();

        let pending = log.unembedded(10).unwrap();
        assert_eq!(pending, vec![(id, "late vector".to_string())]);

        log.set_embedding(id, &[1.0, 0.0]).unwrap();
        assert!(log.unembedded(10).unwrap().is_empty());
        assert_eq!(log.embedded_count().unwrap(), 2);
    }

    #[test]
    fn test_count_and_clear() {
        let log = temp_log();

        log.append("user", "one", None).unwrap();
        log.append("assistant", "two", None).unwrap();
        assert_eq!(log.count().unwrap(), 2);

        let cleared = log.clear().unwrap();
        assert_eq!(cleared, 2);
        assert_eq!(log.count().unwrap(), 0);
    }
}
