//! SQLite storage for long-term snapshots and promotion feedback

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::config::Config;
use crate::error::{poisoned, Error, Result};
use crate::item::{MemoryItem, Metadata};
use crate::ltm::LongTermMemory;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open the database named by the configuration
    pub fn new(config: &Config) -> Result<Self> {
        config.ensure_dirs()?;
        Self::open(config.sqlite_path())
    }

    /// Open or create a database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Replace the stored snapshot with the current contents of `ltm`
    ///
    /// Returns the number of items written.
    pub fn save_ltm(&self, ltm: &LongTermMemory) -> Result<usize> {
        let items = ltm.items()?;
        let mut conn = self.conn.lock().map_err(poisoned)?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM ltm_items", [])?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO ltm_items (
                    id, content, embedding, dimensionality, metadata, created_at, updated_at, seq
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;

            for (seq, item) in items.iter().enumerate() {
                stmt.execute(params![
                    item.id,
                    item.content,
                    encode_embedding(&item.embedding),
                    item.dimensionality() as i64,
                    serde_json::to_string(&item.metadata)?,
                    item.created_at.to_rfc3339(),
                    item.updated_at.to_rfc3339(),
                    seq as i64,
                ])?;
            }
        }
        tx.commit()?;

        info!(count = items.len(), "Saved long-term snapshot");
        Ok(items.len())
    }

    /// Rebuild a long-term store from the stored snapshot
    ///
    /// Items are replayed in their original write order. A row whose
    /// embedding does not match `dimensionality` fails the whole load.
    pub fn load_ltm(&self, dimensionality: usize) -> Result<LongTermMemory> {
        let ltm = LongTermMemory::new(dimensionality)?;
        let conn = self.conn.lock().map_err(poisoned)?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, content, embedding, metadata, created_at, updated_at
            FROM ltm_items ORDER BY seq
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(ItemRow {
                id: row.get(0)?,
                content: row.get(1)?,
                embedding: row.get(2)?,
                metadata: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            })
        })?;

        for row in rows {
            ltm.add(row?.into_item()?)?;
        }

        info!(count = ltm.len()?, "Loaded long-term snapshot");
        Ok(ltm)
    }

    /// Record whether a memory was helpful; the latest answer wins
    pub fn record_feedback(&self, memory_id: &str, helpful: bool) -> Result<()> {
        let conn = self.conn.lock().map_err(poisoned)?;

        conn.execute(
            r#"
            INSERT INTO memory_feedback (memory_id, helpful, recorded_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(memory_id) DO UPDATE SET
                helpful = excluded.helpful,
                recorded_at = excluded.recorded_at
            "#,
            params![memory_id, helpful, Utc::now().to_rfc3339()],
        )?;

        Ok(())
    }

    /// Get the feedback recorded for a memory
    pub fn get_feedback(&self, memory_id: &str) -> Result<Option<MemoryFeedback>> {
        let conn = self.conn.lock().map_err(poisoned)?;

        let row = conn
            .query_row(
                "SELECT memory_id, helpful, recorded_at FROM memory_feedback WHERE memory_id = ?1",
                params![memory_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(memory_id, helpful, recorded_at)| -> Result<MemoryFeedback> {
            Ok(MemoryFeedback {
                memory_id,
                helpful,
                recorded_at: parse_timestamp(&recorded_at)?,
            })
        })
        .transpose()
    }

    /// Count of (helpful, not helpful) answers
    pub fn feedback_stats(&self) -> Result<(usize, usize)> {
        let conn = self.conn.lock().map_err(poisoned)?;

        let (helpful, not_helpful): (i64, i64) = conn.query_row(
            r#"
            SELECT COALESCE(SUM(helpful = 1), 0), COALESCE(SUM(helpful = 0), 0)
            FROM memory_feedback
            "#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok((helpful as usize, not_helpful as usize))
    }
}

/// Feedback on a memory's usefulness
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryFeedback {
    pub memory_id: String,
    pub helpful: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Intermediate struct for reading from SQLite
struct ItemRow {
    id: String,
    content: String,
    embedding: Vec<u8>,
    metadata: String,
    created_at: String,
    updated_at: String,
}

impl ItemRow {
    fn into_item(self) -> Result<MemoryItem> {
        let metadata: Metadata = serde_json::from_str(&self.metadata)?;

        Ok(MemoryItem {
            embedding: decode_embedding(&self.embedding)
                .ok_or_else(|| Error::storage(format!("Corrupt embedding blob for {}", self.id)))?,
            id: self.id,
            content: self.content,
            metadata,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::storage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_snapshot_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("memory.db");

        let ltm = LongTermMemory::new(3).unwrap();
        ltm.add(MemoryItem::new("1", "rust content", vec![1.0, 0.0, 0.0]).with_tag("tag", "rust"))
            .unwrap();
        ltm.add(MemoryItem::new("2", "python content", vec![0.9, 0.1, 0.0])).unwrap();

        let storage = SqliteStorage::open(&db_path).unwrap();
        assert_eq!(storage.save_ltm(&ltm).unwrap(), 2);
        drop(storage);

        let storage = SqliteStorage::open(&db_path).unwrap();
        let restored = storage.load_ltm(3).unwrap();

        assert_eq!(restored.len().unwrap(), 2);
        let item = restored.get("1").unwrap().unwrap();
        assert_eq!(item, ltm.get("1").unwrap().unwrap());

        let ids: Vec<String> = restored.items().unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let storage = SqliteStorage::in_memory().unwrap();
        let ltm = LongTermMemory::new(2).unwrap();

        ltm.add(MemoryItem::new("1", "a", vec![1.0, 0.0])).unwrap();
        ltm.add(MemoryItem::new("2", "b", vec![0.0, 1.0])).unwrap();
        storage.save_ltm(&ltm).unwrap();

        ltm.delete("1").unwrap();
        storage.save_ltm(&ltm).unwrap();

        let restored = storage.load_ltm(2).unwrap();
        assert!(restored.get("1").unwrap().is_none());
        assert!(restored.get("2").unwrap().is_some());
    }

    #[test]
    fn test_load_with_wrong_dimensionality_fails() {
        let storage = SqliteStorage::in_memory().unwrap();
        let ltm = LongTermMemory::new(2).unwrap();
        ltm.add(MemoryItem::new("1", "a", vec![1.0, 0.0])).unwrap();
        storage.save_ltm(&ltm).unwrap();

        let err = storage.load_ltm(3).err().unwrap();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 2 }));
    }

    #[test]
    fn test_embedding_blob_round_trip() {
        let embedding = vec![0.25, -1.5, 3.0e-7];
        assert_eq!(decode_embedding(&encode_embedding(&embedding)).unwrap(), embedding);
        assert!(decode_embedding(&[0, 1, 2]).is_none());
    }

    #[test]
    fn test_feedback_storage() {
        let storage = SqliteStorage::in_memory().unwrap();

        storage.record_feedback("mem1", true).unwrap();
        storage.record_feedback("mem2", false).unwrap();

        assert!(storage.get_feedback("mem1").unwrap().unwrap().helpful);
        assert!(!storage.get_feedback("mem2").unwrap().unwrap().helpful);
        assert!(storage.get_feedback("mem3").unwrap().is_none());
        assert_eq!(storage.feedback_stats().unwrap(), (1, 1));
    }

    #[test]
    fn test_duplicate_feedback_updates() {
        let storage = SqliteStorage::in_memory().unwrap();

        storage.record_feedback("mem1", true).unwrap();
        storage.record_feedback("mem1", false).unwrap();

        assert!(!storage.get_feedback("mem1").unwrap().unwrap().helpful);
        assert_eq!(storage.feedback_stats().unwrap(), (0, 1));
    }
}
