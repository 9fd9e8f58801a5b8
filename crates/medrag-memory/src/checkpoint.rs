use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use medrag_core::error::{RagError, Result};
use medrag_core::traits::CheckpointStore;
use medrag_core::types::{ConversationId, ConversationState};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS checkpoints (
        conversation_id TEXT PRIMARY KEY,
        state_json TEXT NOT NULL,
        turn_count INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL
    );";

/// Persistent conversation checkpoints backed by SQLite.
///
/// One row per conversation; `save` replaces the row inside a transaction so
/// readers see either the old state or the new one.
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    /// Open or create the checkpoint database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RagError::Checkpoint(format!("Failed to create checkpoint directory: {}", e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| RagError::Checkpoint(format!("Failed to open checkpoint store: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| RagError::Checkpoint(e.to_string()))?;
        conn.execute_batch(SCHEMA).map_err(|e| {
            RagError::Checkpoint(format!("Failed to initialize checkpoint schema: {}", e))
        })?;

        debug!(path = %path.display(), "Checkpoint store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| RagError::Checkpoint(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| RagError::Checkpoint(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load_sync(&self, id: &str) -> Result<Option<ConversationState>> {
        let conn = self.conn.lock().map_err(|e| RagError::Checkpoint(e.to_string()))?;
        let json: Option<String> = conn
            .query_row(
                "SELECT state_json FROM checkpoints WHERE conversation_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RagError::Checkpoint(format!("Failed to load checkpoint: {}", e)))?;

        match json {
            Some(json) => {
                let state = serde_json::from_str(&json).map_err(|e| {
                    RagError::Checkpoint(format!("Corrupt checkpoint for {}: {}", id, e))
                })?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    fn save_sync(&self, id: &str, state: &ConversationState) -> Result<()> {
        let json = serde_json::to_string(state)
            .map_err(|e| RagError::Checkpoint(format!("Failed to serialize state: {}", e)))?;
        let updated_at = state.updated_at.unwrap_or_else(Utc::now).to_rfc3339();

        let mut conn = self.conn.lock().map_err(|e| RagError::Checkpoint(e.to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| RagError::Checkpoint(e.to_string()))?;
        tx.execute(
            "INSERT INTO checkpoints (conversation_id, state_json, turn_count, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(conversation_id) DO UPDATE SET
                 state_json = excluded.state_json,
                 turn_count = excluded.turn_count,
                 updated_at = excluded.updated_at",
            params![id, json, state.turn_count as i64, updated_at],
        )
        .map_err(|e| RagError::Checkpoint(format!("Failed to save checkpoint: {}", e)))?;
        tx.commit()
            .map_err(|e| RagError::Checkpoint(format!("Failed to commit checkpoint: {}", e)))?;
        Ok(())
    }

    /// Delete the checkpoint for a conversation. Returns rows removed.
    pub fn delete(&self, id: &ConversationId) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| RagError::Checkpoint(e.to_string()))?;
        let deleted = conn
            .execute(
                "DELETE FROM checkpoints WHERE conversation_id = ?1",
                params![id.as_str()],
            )
            .map_err(|e| RagError::Checkpoint(format!("Failed to delete checkpoint: {}", e)))?;
        Ok(deleted)
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn load(&self, id: &ConversationId) -> BoxFuture<'_, Result<Option<ConversationState>>> {
        let id = id.0.clone();
        Box::pin(async move { self.load_sync(&id) })
    }

    fn save(&self, id: &ConversationId, state: &ConversationState) -> BoxFuture<'_, Result<()>> {
        let id = id.0.clone();
        let state = state.clone();
        Box::pin(async move {
            self.save_sync(&id, &state)?;
            debug!(conversation_id = %id, turn_count = state.turn_count, "Checkpoint saved");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medrag_core::types::{RouteDecision, ScoredDocument};

    fn temp_store() -> (tempfile::TempDir, SqliteCheckpointStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCheckpointStore::open(&dir.path().join("checkpoints.db")).unwrap();
        (dir, store)
    }

    fn state_with_turns(id: &str, turns: usize) -> ConversationState {
        let mut state = ConversationState::new(ConversationId::from_string(id));
        for i in 0..turns {
            state.begin_turn(format!("question {}", i));
            state.answer = Some(format!("answer {}", i));
            state.complete_turn(3);
        }
        state
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (_dir, store) = temp_store();
        let id = ConversationId::from_string("conv-1");

        let mut state = state_with_turns("conv-1", 2);
        state.rewritten_query = "Which medication was prescribed?".into();
        state.graded_docs = vec![ScoredDocument::new("rx-1", "Metformin", 0.91)];
        state.route_decision = RouteDecision::Continue;

        store.save(&id, &state).await.unwrap();

        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_save_overwrites_same_conversation() {
        let (_dir, store) = temp_store();
        let id = ConversationId::from_string("conv-1");

        store.save(&id, &state_with_turns("conv-1", 1)).await.unwrap();
        store.save(&id, &state_with_turns("conv-1", 4)).await.unwrap();

        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded.turn_count, 4);
        assert_eq!(loaded.turn_history.len(), 3);
        let rows: i64 = store
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM checkpoints", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        let loaded = store
            .load(&ConversationId::from_string("nope"))
            .await
            .unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        let id = ConversationId::from_string("conv-del");
        store.save(&id, &state_with_turns("conv-del", 1)).await.unwrap();

        assert_eq!(store.delete(&id).unwrap(), 1);
        assert!(store.load(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_row_is_checkpoint_error() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO checkpoints (conversation_id, state_json, updated_at)
                 VALUES ('bad', '{not json', 'x')",
                [],
            )
            .unwrap();
        }
        let err = store
            .load(&ConversationId::from_string("bad"))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Checkpoint(_)));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.db");
        let id = ConversationId::from_string("conv-restart");

        {
            let store = SqliteCheckpointStore::open(&path).unwrap();
            store.save(&id, &state_with_turns("conv-restart", 2)).await.unwrap();
        }

        let store = SqliteCheckpointStore::open(&path).unwrap();
        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded.turn_history.len(), 2);
        assert_eq!(loaded.turn_history[1].query, "question 1");
    }
}
