//! Persisted client state
//!
//! A small SQLite key/value table holding the cursor, the item list and the
//! pending queue as JSON. Everything is reloaded verbatim on start.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::cache::ItemCache;
use super::queue::PendingQueue;
use crate::error::SyncError;

const CURSOR_KEY: &str = "last_sequence";
const ITEMS_KEY: &str = "items";
const QUEUE_KEY: &str = "pending_changes";

/// Everything a client keeps between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientState {
    /// Highest server sequence number already folded into `items`
    pub cursor: u64,
    pub items: ItemCache,
    pub queue: PendingQueue,
}

pub struct ClientStateStore {
    db: Connection,
}

impl ClientStateStore {
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path)?;
        Self::init(db)
    }

    pub fn open_in_memory() -> Result<Self, SyncError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self, SyncError> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS client_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(Self { db })
    }

    fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<T>, SyncError> {
        let raw: Option<String> = self
            .db
            .query_row("SELECT value FROM client_state WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Load saved state, or an empty state on first run.
    pub fn load(&self) -> Result<ClientState, SyncError> {
        let state = ClientState {
            cursor: self.get(CURSOR_KEY)?.unwrap_or(0),
            items: self.get(ITEMS_KEY)?.unwrap_or_default(),
            queue: self.get(QUEUE_KEY)?.unwrap_or_default(),
        };
        info!(
            cursor = state.cursor,
            items = state.items.len(),
            pending = state.queue.len(),
            "Loaded client state"
        );
        Ok(state)
    }

    /// Write all three keys in one transaction.
    pub fn save(&mut self, state: &ClientState) -> Result<(), SyncError> {
        let entries = [
            (CURSOR_KEY, serde_json::to_string(&state.cursor)?),
            (ITEMS_KEY, serde_json::to_string(&state.items)?),
            (QUEUE_KEY, serde_json::to_string(&state.queue)?),
        ];

        let tx = self.db.transaction()?;
        for (key, value) in &entries {
            tx.execute(
                "INSERT INTO client_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
        }
        tx.commit()?;

        debug!(cursor = state.cursor, pending = state.queue.len(), "Saved client state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_first_load_is_empty() {
        let store = ClientStateStore::open_in_memory().unwrap();
        assert_eq!(store.load().unwrap(), ClientState::default());
    }

    #[test]
    fn test_state_reloads_verbatim() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.db");

        let mut state = ClientState::default();
        let created = state.items.create("Milk");
        state.queue.record_change(created);
        state.cursor = 17;

        {
            let mut store = ClientStateStore::open(&path).unwrap();
            store.save(&state).unwrap();
        }

        let store = ClientStateStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap(), state);
    }
}
