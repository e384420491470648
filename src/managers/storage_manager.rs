//! Local key-value storage with change notifications.
//!
//! Mirrors the extension storage contract the UI layer writes through:
//! JSON values under string keys, partitioned into named areas, with every
//! write published to subscribers as `{area, key, old_value, new_value}`.

use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::database::Database;
use crate::types::bookmark::{now_millis, BookmarkTree};
use crate::types::errors::StorageError;

/// Storage area the sync engine watches.
pub const LOCAL_AREA: &str = "local";
/// Key holding the full bookmark tree.
pub const BOOKMARKS_KEY: &str = "bookmarks";
/// Key holding a pending conflict record.
pub const CONFLICT_KEY: &str = "bookmarkConflict";

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Who performed a write. The sync engine discards its own writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    User,
    SyncEngine,
}

/// A single key mutation as seen by subscribers.
#[derive(Debug, Clone)]
pub struct StorageChange {
    pub area: String,
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub origin: WriteOrigin,
}

/// A handle to the `local` storage area. Clones share the database and the
/// change feed.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Database>,
    area: String,
    changes: broadcast::Sender<StorageChange>,
}

impl LocalStore {
    /// Opens the `local` area.
    pub fn new(db: Arc<Database>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            db,
            area: LOCAL_AREA.to_string(),
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }

    pub fn get_value(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let raw: Option<String> = self
            .db
            .connection()
            .query_row(
                "SELECT value FROM kv_store WHERE area = ?1 AND key = ?2",
                params![self.area, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get_value(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T, origin: WriteOrigin) -> Result<(), StorageError> {
        let new_value = serde_json::to_value(value)?;
        let encoded = serde_json::to_string(&new_value)?;

        let old_value = {
            let conn = self.db.connection();
            let old: Option<String> = conn
                .query_row(
                    "SELECT value FROM kv_store WHERE area = ?1 AND key = ?2",
                    params![self.area, key],
                    |row| row.get(0),
                )
                .optional()?;
            conn.execute(
                "INSERT INTO kv_store (area, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(area, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![self.area, key, encoded, now_millis()],
            )?;
            old
        };

        self.publish(key, old_value, Some(new_value), origin);
        Ok(())
    }

    pub fn remove(&self, key: &str, origin: WriteOrigin) -> Result<(), StorageError> {
        let old_value = {
            let conn = self.db.connection();
            let old: Option<String> = conn
                .query_row(
                    "SELECT value FROM kv_store WHERE area = ?1 AND key = ?2",
                    params![self.area, key],
                    |row| row.get(0),
                )
                .optional()?;
            conn.execute(
                "DELETE FROM kv_store WHERE area = ?1 AND key = ?2",
                params![self.area, key],
            )?;
            old
        };

        if old_value.is_some() {
            self.publish(key, old_value, None, origin);
        }
        Ok(())
    }

    /// The stored bookmark tree; empty when nothing has been saved yet.
    pub fn load_bookmarks(&self) -> Result<BookmarkTree, StorageError> {
        Ok(self.get(BOOKMARKS_KEY)?.unwrap_or_default())
    }

    pub fn save_bookmarks(&self, tree: &BookmarkTree, origin: WriteOrigin) -> Result<(), StorageError> {
        self.set(BOOKMARKS_KEY, tree, origin)
    }

    fn publish(&self, key: &str, old_raw: Option<String>, new_value: Option<Value>, origin: WriteOrigin) {
        let change = StorageChange {
            area: self.area.clone(),
            key: key.to_string(),
            old_value: old_raw.and_then(|s| serde_json::from_str(&s).ok()),
            new_value,
            origin,
        };
        // No subscribers is not an error.
        let _ = self.changes.send(change);
    }
}
