//! Tombstone tracker: durable record of deletions the remote has not seen.
//!
//! A delete made while offline (or while sync is not entitled) is otherwise
//! indistinguishable from "never existed" and would be restored by the next
//! merge with an older remote copy.

use rusqlite::params;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::database::Database;
use crate::types::bookmark::{now_millis, Bookmark, BookmarkTree};
use crate::types::errors::StorageError;

/// Persisted pending-deletion set backed by the `tombstones` table.
pub struct TombstoneTracker {
    db: Arc<Database>,
}

impl TombstoneTracker {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Records `id` as deleted. Tracking the same ID twice keeps one entry.
    pub fn track_deletion(&self, id: &str) -> Result<(), StorageError> {
        self.db.connection().execute(
            "INSERT OR IGNORE INTO tombstones (id, deleted_at) VALUES (?1, ?2)",
            params![id, now_millis()],
        )?;
        Ok(())
    }

    pub fn get_pending_deletions(&self) -> Result<BTreeSet<String>, StorageError> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare("SELECT id FROM tombstones")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(ids)
    }

    pub fn has_pending(&self) -> Result<bool, StorageError> {
        let count: i64 = self
            .db
            .connection()
            .query_row("SELECT COUNT(*) FROM tombstones", [], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Empties the set once the remote tree is confirmed free of these IDs.
    pub fn clear_deletions(&self) -> Result<(), StorageError> {
        self.db.connection().execute("DELETE FROM tombstones", [])?;
        Ok(())
    }
}

/// Returns `tree` without any node whose ID is in `deleted`, at any depth.
///
/// Surviving folders keep their surviving children in order.
pub fn filter_tree(tree: &[Bookmark], deleted: &BTreeSet<String>) -> BookmarkTree {
    if deleted.is_empty() {
        return tree.to_vec();
    }
    tree.iter()
        .filter(|node| !deleted.contains(&node.id))
        .map(|node| {
            let mut kept = node.clone();
            if let Some(children) = &node.children {
                kept.children = Some(filter_tree(children, deleted));
            }
            kept
        })
        .collect()
}
