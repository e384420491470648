//! App Core for marksync.
//!
//! Central struct wiring storage, the remote store and the sync manager, and
//! gating sync on the signed-in user's entitlement.

use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::database::connection::Database;
use crate::managers::bookmark_manager::BookmarkManager;
use crate::managers::failed_upload_queue::FailedUploadQueue;
use crate::managers::storage_manager::LocalStore;
use crate::managers::sync_manager::{SyncManager, SyncManagerTrait, SyncServices};
use crate::managers::tombstone_manager::TombstoneTracker;
use crate::services::crypto_service::CryptoService;
use crate::services::remote_store::{RemoteAccess, RemoteStore, SupabaseRemote};
use crate::services::sync_codec::SyncCodec;
use crate::types::errors::SyncError;
use crate::types::settings::SyncSettings;
use crate::types::sync::CycleOutcome;

/// Who is signed in and whether their plan includes sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub user_id: Option<String>,
    pub entitled: bool,
}

/// Central application struct holding storage, tombstones and the sync manager.
///
/// `BookmarkManager` is created on demand via [`App::bookmarks`] because it
/// borrows the store with a lifetime.
pub struct App {
    pub db: Arc<Database>,
    pub store: LocalStore,
    pub tombstones: Arc<TombstoneTracker>,
    pub sync: SyncManager,
    session: Mutex<Session>,
}

impl App {
    /// Opens the database at `db_path` and talks to the hosted remote store.
    pub fn new<P: AsRef<Path>>(db_path: P, settings: SyncSettings) -> Result<Self, Box<dyn std::error::Error>> {
        let db = Database::open(db_path)?;
        let remote = SupabaseRemote::new(&settings.remote)?;
        Ok(Self::with_remote(db, Arc::new(remote), settings))
    }

    /// Builds the app over an already opened database and any remote store.
    pub fn with_remote(db: Database, remote: Arc<dyn RemoteStore>, settings: SyncSettings) -> Self {
        let db = Arc::new(db);
        let store = LocalStore::new(Arc::clone(&db));
        let tombstones = Arc::new(TombstoneTracker::new(Arc::clone(&db)));
        let failed_uploads = Arc::new(FailedUploadQueue::new(Arc::clone(&db), settings.max_failed_uploads));
        let codec = Arc::new(SyncCodec::new(Arc::new(CryptoService::new()), &settings.app_secret));

        let services = SyncServices {
            store: store.clone(),
            tombstones: Arc::clone(&tombstones),
            failed_uploads,
            remote: Arc::new(RemoteAccess::new(remote, codec)),
        };

        Self {
            db,
            store,
            tombstones,
            sync: SyncManager::new(services, settings),
            session: Mutex::new(Session::default()),
        }
    }

    pub fn session(&self) -> Session {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Applies a sign-in, sign-out or entitlement change.
    ///
    /// Starts sync for a signed-in entitled user and stops it otherwise.
    /// Returns the outcome of the startup cycle when sync was started.
    ///
    /// A repeated session is a no-op only while the running engine already
    /// matches it; `sync.init` and `sync.stop` can move the engine without
    /// going through here.
    pub async fn set_session(&self, user_id: Option<&str>, entitled: bool) -> Result<Option<CycleOutcome>, SyncError> {
        let next = Session {
            user_id: user_id.map(str::to_string),
            entitled,
        };
        let wanted_user = user_id.filter(|_| entitled);
        {
            let mut current = self
                .session
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if *current == next && self.sync.current_user().as_deref() == wanted_user {
                return Ok(None);
            }
            *current = next;
        }

        match user_id {
            Some(user) if entitled => {
                info!(user_id = user, "sync entitlement active");
                self.sync.init_sync(user).await.map(Some)
            }
            _ => {
                self.sync.stop_sync();
                Ok(None)
            }
        }
    }

    /// A bookmark editor. Deletions leave tombstones unless sync is running
    /// and the remote is reachable.
    pub fn bookmarks(&self) -> BookmarkManager<'_> {
        let record_tombstones = !(self.sync.is_active() && self.sync.is_online());
        BookmarkManager::new(&self.store, &self.tombstones, record_tombstones)
    }

    /// Stops background sync work.
    pub fn shutdown(&self) {
        self.sync.stop_sync();
    }
}
