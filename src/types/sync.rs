use serde::{Deserialize, Serialize};

use super::bookmark::BookmarkTree;

/// Raw AES-256-GCM output used by `CryptoService`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedData {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
}

/// Encrypted bookmark payload as stored remotely. Both fields are base64;
/// `content` is the ciphertext with the GCM tag appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub iv: String,
    pub content: String,
}

/// The `bookmarks` column of the remote record.
///
/// Records written before encryption was introduced hold the raw tree.
/// The two shapes are told apart by the presence of an `iv` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, try_from = "serde_json::Value")]
pub enum RemoteBookmarks {
    Encrypted(EncryptedPayload),
    Legacy(BookmarkTree),
}

impl TryFrom<serde_json::Value> for RemoteBookmarks {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Null => Ok(RemoteBookmarks::Legacy(Vec::new())),
            serde_json::Value::Object(ref map) if map.contains_key("iv") => {
                serde_json::from_value(value)
                    .map(RemoteBookmarks::Encrypted)
                    .map_err(|e| format!("malformed encrypted payload: {}", e))
            }
            serde_json::Value::Array(_) => serde_json::from_value(value)
                .map(RemoteBookmarks::Legacy)
                .map_err(|e| format!("malformed legacy bookmark tree: {}", e)),
            other => Err(format!("unexpected bookmarks payload: {}", other)),
        }
    }
}

/// One row of the remote `user_bookmarks` table. At most one per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub user_id: String,
    pub bookmarks: RemoteBookmarks,
    /// ISO-8601 timestamp of the last write.
    pub updated_at: String,
}

/// Decoded remote state handed to the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub bookmarks: BookmarkTree,
    /// Epoch milliseconds of the last remote write.
    pub updated_at: i64,
    pub was_encrypted: bool,
}

/// Stored when startup reconciliation finds the trees too far apart to merge
/// without asking the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub local: BookmarkTree,
    pub server: BookmarkTree,
    pub local_count: usize,
    pub server_count: usize,
    pub timestamp: i64,
}

/// The user's answer to a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictChoice {
    Local,
    Server,
    Merge,
}

impl std::str::FromStr for ConflictChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(ConflictChoice::Local),
            "server" => Ok(ConflictChoice::Server),
            "merge" => Ok(ConflictChoice::Merge),
            other => Err(format!("unknown conflict choice: {}", other)),
        }
    }
}

/// Snapshot of engine state polled by the status display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_active: bool,
    pub is_syncing: bool,
    pub is_online: bool,
    pub change_counter: u32,
    /// Epoch milliseconds of the last confirmed sync.
    pub last_sync_time: i64,
    pub has_pending_changes: bool,
    pub queued_sync: bool,
    pub has_failed_uploads: bool,
    pub has_conflict: bool,
}

/// Notifications published by the engine for the host UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SyncEvent {
    Online,
    Offline,
    Syncing,
    Synced,
    Error(String),
    #[serde(rename = "bookmark_conflict", rename_all = "camelCase")]
    Conflict { local_count: usize, server_count: usize },
    QueueSynced,
}

/// What a reconciliation cycle ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Sync is not active for any user.
    Inactive,
    /// `init_sync` was called again for the user already being synced.
    AlreadyActive,
    /// Another sync operation holds the lock.
    Busy,
    /// A conflict record is waiting for the user.
    ConflictPending,
    /// The remote could not be reached.
    Offline,
    /// No remote record existed; local state became the initial remote state.
    InitializedRemote,
    /// Local and remote already matched.
    InSync,
    /// Local was empty and took the remote tree.
    Downloaded,
    /// The trees were merged and written back where they differed.
    Merged,
    /// Divergence was too large; a conflict record was created.
    ConflictDetected,
}
