use thiserror::Error;

// === CryptoError ===

/// Errors related to cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Failed to derive the encryption key.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
    /// Encryption operation failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),
    /// Decryption failed: wrong key, tampered or corrupted data.
    #[error("Decryption failed: {0}")]
    Decryption(String),
    /// Failed to generate random bytes.
    #[error("Random generation failed: {0}")]
    RandomGeneration(String),
    /// The provided key is invalid.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

// === StorageError ===

/// Errors from the local SQLite-backed storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// === BookmarkError ===

/// Errors related to local bookmark editing.
#[derive(Debug, Error)]
pub enum BookmarkError {
    /// Bookmark with the given ID was not found.
    #[error("Bookmark not found: {0}")]
    NotFound(String),
    /// A bookmark with the same URL already exists at that level.
    #[error("Duplicate bookmark URL: {0}")]
    DuplicateUrl(String),
    /// The target folder was not found.
    #[error("Bookmark folder not found: {0}")]
    FolderNotFound(String),
    /// A folder cannot be moved into itself or one of its descendants.
    #[error("Invalid move: {0}")]
    InvalidMove(String),
    /// The edit would break the link/folder shape of a node.
    #[error("Invalid bookmark edit: {0}")]
    InvalidEdit(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

// === RemoteError ===

/// Errors from the remote record store.
///
/// Only [`RemoteError::Network`] means "offline"; every other variant is a
/// data or server problem that must not be treated as a connectivity loss.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport failure: connect, timeout, DNS, dropped connection.
    #[error("Remote network error: {0}")]
    Network(String),
    /// The server answered with a non-success status.
    #[error("Remote API error ({status}): {message}")]
    Api { status: u16, message: String },
    /// The encrypted payload could not be decrypted with this user's key.
    #[error("Remote payload could not be decrypted: {0}")]
    Decryption(String),
    /// The record exists but its shape is not a bookmark payload.
    #[error("Remote payload is malformed: {0}")]
    InvalidPayload(String),
    /// Encrypting a payload for upload failed.
    #[error("Remote payload could not be encrypted: {0}")]
    Encryption(String),
}

impl RemoteError {
    /// Whether this failure should flip the engine into offline mode.
    pub fn is_network(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() {
            RemoteError::Network(e.to_string())
        } else if let Some(status) = e.status() {
            RemoteError::Api {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else if e.is_decode() {
            RemoteError::InvalidPayload(e.to_string())
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}

// === SyncError ===

/// Errors surfaced by the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync is not active")]
    Inactive,
    #[error("No conflict is pending")]
    NoConflict,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl SyncError {
    /// Whether the underlying cause is a connectivity failure.
    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::Remote(e) if e.is_network())
    }
}

// === SettingsError ===

/// Errors related to sync settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The provided settings key path is invalid.
    #[error("Invalid settings key: {0}")]
    InvalidKey(String),
    /// The provided value is invalid for the given key.
    #[error("Invalid settings value: {0}")]
    InvalidValue(String),
    /// A file I/O error occurred.
    #[error("Settings I/O error: {0}")]
    IoError(String),
    /// A serialization/deserialization error occurred.
    #[error("Settings serialization error: {0}")]
    SerializationError(String),
}
