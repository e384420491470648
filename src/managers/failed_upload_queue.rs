//! Uploads that exhausted their retries, kept for a later retry pass.

use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use crate::database::Database;
use crate::types::bookmark::{now_millis, BookmarkTree};
use crate::types::errors::StorageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUpload {
    pub id: i64,
    pub user_id: String,
    pub bookmarks: BookmarkTree,
    pub created_at: i64,
}

/// Bounded per-user queue in the `failed_uploads` table. When full, the
/// oldest entries are dropped.
pub struct FailedUploadQueue {
    db: Arc<Database>,
    capacity: usize,
}

impl FailedUploadQueue {
    pub fn new(db: Arc<Database>, capacity: usize) -> Self {
        Self {
            db,
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, user_id: &str, tree: &BookmarkTree) -> Result<(), StorageError> {
        let payload = serde_json::to_string(tree)?;
        let conn = self.db.connection();
        conn.execute(
            "INSERT INTO failed_uploads (user_id, payload, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, payload, now_millis()],
        )?;
        conn.execute(
            "DELETE FROM failed_uploads WHERE user_id = ?1 AND id NOT IN (
                 SELECT id FROM failed_uploads WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2
             )",
            params![user_id, self.capacity as i64],
        )?;
        Ok(())
    }

    /// Most recently queued entry for the user.
    pub fn latest(&self, user_id: &str) -> Result<Option<FailedUpload>, StorageError> {
        let row: Option<(i64, String, i64)> = self
            .db
            .connection()
            .query_row(
                "SELECT id, payload, created_at FROM failed_uploads
                 WHERE user_id = ?1 ORDER BY id DESC LIMIT 1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match row {
            Some((id, payload, created_at)) => Ok(Some(FailedUpload {
                id,
                user_id: user_id.to_string(),
                bookmarks: serde_json::from_str(&payload)?,
                created_at,
            })),
            None => Ok(None),
        }
    }

    pub fn len(&self, user_id: &str) -> Result<usize, StorageError> {
        let count: i64 = self.db.connection().query_row(
            "SELECT COUNT(*) FROM failed_uploads WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_empty(&self, user_id: &str) -> Result<bool, StorageError> {
        Ok(self.len(user_id)? == 0)
    }

    pub fn clear(&self, user_id: &str) -> Result<(), StorageError> {
        self.db
            .connection()
            .execute("DELETE FROM failed_uploads WHERE user_id = ?1", params![user_id])?;
        Ok(())
    }
}
