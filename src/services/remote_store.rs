//! Remote access layer: the single-row-per-user `user_bookmarks` record.
//!
//! [`RemoteStore`] is the raw record transport (a PostgREST endpoint in
//! production, [`InMemoryRemote`] in tests). [`RemoteAccess`] adds the
//! encryption codec and legacy-payload detection on top.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::services::sync_codec::SyncCodec;
use crate::types::bookmark::BookmarkTree;
use crate::types::errors::RemoteError;
use crate::types::settings::RemoteSettings;
use crate::types::sync::{RemoteBookmarks, RemoteRecord, RemoteSnapshot};

const MAX_LOG_BODY_CHARS: usize = 512;

/// Record-level transport to the remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Returns the user's record, or `None` when the user has never synced.
    async fn fetch_record(&self, user_id: &str) -> Result<Option<RemoteRecord>, RemoteError>;

    /// Inserts or replaces the user's record in one write.
    async fn upsert_record(&self, record: &RemoteRecord) -> Result<(), RemoteError>;

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<(), RemoteError>;
}

// === SupabaseRemote ===

/// PostgREST client for the hosted `user_bookmarks` table.
pub struct SupabaseRemote {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    table: String,
}

impl SupabaseRemote {
    pub fn new(settings: &RemoteSettings) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| RemoteError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            table: settings.table.clone(),
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn headers(&self) -> Result<HeaderMap, RemoteError> {
        let invalid = |_| RemoteError::Api {
            status: 0,
            message: "API key is not a valid header value".to_string(),
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("apikey", HeaderValue::from_str(&self.api_key).map_err(invalid)?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(invalid)?,
        );
        Ok(headers)
    }

    /// Reads the body and maps non-success statuses to errors.
    async fn read_body(response: reqwest::Response) -> Result<String, RemoteError> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            debug!(status = %status, "remote response");
            return Ok(body);
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!(status = %status, body = %preview, "remote error response");

        // Gateway failures mean the backend is unreachable, not that it refused us.
        if matches!(status.as_u16(), 502..=504) {
            return Err(RemoteError::Network(format!("gateway error {}", status)));
        }
        Err(RemoteError::Api {
            status: status.as_u16(),
            message: preview,
        })
    }
}

#[async_trait]
impl RemoteStore for SupabaseRemote {
    async fn fetch_record(&self, user_id: &str) -> Result<Option<RemoteRecord>, RemoteError> {
        let filter = format!("eq.{}", user_id);
        let response = self
            .client
            .get(self.table_url())
            .headers(self.headers()?)
            .query(&[
                ("user_id", filter.as_str()),
                ("select", "user_id,bookmarks,updated_at"),
                ("limit", "1"),
            ])
            .send()
            .await?;

        let body = Self::read_body(response).await?;
        let mut rows: Vec<RemoteRecord> = serde_json::from_str(&body)
            .map_err(|e| RemoteError::InvalidPayload(e.to_string()))?;
        Ok(rows.pop())
    }

    async fn upsert_record(&self, record: &RemoteRecord) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.table_url())
            .headers(self.headers()?)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .query(&[("on_conflict", "user_id")])
            .json(&[record])
            .send()
            .await?;

        Self::read_body(response).await.map(|_| ())
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        let response = self
            .client
            .get(self.table_url())
            .headers(self.headers()?)
            .query(&[("select", "user_id"), ("limit", "1")])
            .send()
            .await?;

        Self::read_body(response).await.map(|_| ())
    }
}

// === InMemoryRemote ===

/// Process-local remote store with scriptable connectivity and failures.
#[derive(Default)]
pub struct InMemoryRemote {
    records: Mutex<HashMap<String, RemoteRecord>>,
    offline: AtomicBool,
    failing_uploads: AtomicUsize,
    uploads: AtomicUsize,
    fetches: AtomicUsize,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    /// Makes the next `count` upserts fail with a server error.
    pub fn fail_next_uploads(&self, count: usize) {
        self.failing_uploads.store(count, Ordering::SeqCst);
    }

    /// Number of successful upserts so far.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn record(&self, user_id: &str) -> Option<RemoteRecord> {
        self.lock().get(user_id).cloned()
    }

    pub fn put_record(&self, record: RemoteRecord) {
        self.lock().insert(record.user_id.clone(), record);
    }

    /// Stores a pre-encryption plaintext record.
    pub fn put_legacy(&self, user_id: &str, tree: BookmarkTree) {
        self.put_record(RemoteRecord {
            user_id: user_id.to_string(),
            bookmarks: RemoteBookmarks::Legacy(tree),
            updated_at: timestamp_now(),
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RemoteRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("remote unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn fetch_record(&self, user_id: &str) -> Result<Option<RemoteRecord>, RemoteError> {
        self.ensure_online()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.record(user_id))
    }

    async fn upsert_record(&self, record: &RemoteRecord) -> Result<(), RemoteError> {
        self.ensure_online()?;
        let failing = self
            .failing_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RemoteError::Api {
                status: 500,
                message: "injected upload failure".to_string(),
            });
        }
        self.put_record(record.clone());
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        self.ensure_online()
    }
}

// === RemoteAccess ===

fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Encrypting facade over a [`RemoteStore`] used by the sync engine.
pub struct RemoteAccess {
    store: Arc<dyn RemoteStore>,
    codec: Arc<SyncCodec>,
}

impl RemoteAccess {
    pub fn new(store: Arc<dyn RemoteStore>, codec: Arc<SyncCodec>) -> Self {
        Self { store, codec }
    }

    /// Loads and decodes the user's tree. `Ok(None)` means first-time sync.
    ///
    /// A record that fails to decrypt is an error, never an empty tree.
    pub async fn fetch_remote(&self, user_id: &str) -> Result<Option<RemoteSnapshot>, RemoteError> {
        let Some(record) = self.store.fetch_record(user_id).await? else {
            return Ok(None);
        };

        let updated_at = DateTime::parse_from_rfc3339(&record.updated_at)
            .map(|t| t.timestamp_millis())
            .unwrap_or_else(|e| {
                warn!(error = %e, value = %record.updated_at, "unparseable remote updated_at");
                0
            });

        let (bookmarks, was_encrypted) = match record.bookmarks {
            RemoteBookmarks::Encrypted(payload) => {
                let tree = self
                    .codec
                    .decrypt(&payload, user_id)
                    .map_err(|e| RemoteError::Decryption(e.to_string()))?;
                (tree, true)
            }
            RemoteBookmarks::Legacy(tree) => {
                debug!("remote record is a legacy plaintext payload");
                (tree, false)
            }
        };

        Ok(Some(RemoteSnapshot {
            bookmarks,
            updated_at,
            was_encrypted,
        }))
    }

    /// Encrypts `tree` and replaces the user's record with it.
    pub async fn upload_remote(&self, user_id: &str, tree: &BookmarkTree) -> Result<(), RemoteError> {
        let payload = self
            .codec
            .encrypt(tree, user_id)
            .map_err(|e| RemoteError::Encryption(e.to_string()))?;

        let record = RemoteRecord {
            user_id: user_id.to_string(),
            bookmarks: RemoteBookmarks::Encrypted(payload),
            updated_at: timestamp_now(),
        };
        self.store.upsert_record(&record).await
    }

    pub async fn check_connection(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "connection probe failed");
                false
            }
        }
    }
}
