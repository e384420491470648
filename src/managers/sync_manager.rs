//! Sync Manager: keeps the local bookmark tree and the user's remote record
//! in agreement.
//!
//! [`SyncManager`] is the long-lived entry point. Each `init_sync` builds a
//! fresh [`SyncEngine`] for the signed-in user; `stop_sync` tears it down, so
//! no counters, timers or hashes survive from one session to the next.
//!
//! Writes the engine makes to local storage carry [`WriteOrigin::SyncEngine`]
//! and are discarded by the change listener.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::managers::failed_upload_queue::FailedUploadQueue;
use crate::managers::storage_manager::{
    LocalStore, StorageChange, WriteOrigin, BOOKMARKS_KEY, CONFLICT_KEY, LOCAL_AREA,
};
use crate::managers::tombstone_manager::{filter_tree, TombstoneTracker};
use crate::services::bookmark_tree::{collect_ids, count_bookmarks};
use crate::services::content_hasher::ContentHash;
use crate::services::merge_resolver::merge;
use crate::services::remote_store::RemoteAccess;
use crate::types::bookmark::{now_millis, BookmarkTree};
use crate::types::errors::{RemoteError, SyncError};
use crate::types::settings::SyncSettings;
use crate::types::sync::{ConflictChoice, ConflictRecord, CycleOutcome, SyncEvent, SyncStatus};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Trait defining the sync lifecycle exposed to the host.
#[async_trait]
pub trait SyncManagerTrait: Send + Sync {
    /// Starts syncing for `user_id` and runs one reconciliation cycle.
    async fn init_sync(&self, user_id: &str) -> Result<CycleOutcome, SyncError>;
    fn stop_sync(&self);
    /// Runs a cycle now, breaking a stuck lock. Returns whether a cycle ran.
    async fn force_sync_bookmarks(&self) -> bool;
    fn get_sync_status(&self) -> SyncStatus;
    async fn resolve_conflict(&self, choice: ConflictChoice) -> Result<(), SyncError>;
}

/// Collaborators shared by the manager and every engine it creates.
#[derive(Clone)]
pub struct SyncServices {
    pub store: LocalStore,
    pub tombstones: Arc<TombstoneTracker>,
    pub failed_uploads: Arc<FailedUploadQueue>,
    pub remote: Arc<RemoteAccess>,
}

pub struct SyncManager {
    services: SyncServices,
    settings: Arc<SyncSettings>,
    events: broadcast::Sender<SyncEvent>,
    engine: Mutex<Option<Arc<SyncEngine>>>,
}

impl SyncManager {
    pub fn new(services: SyncServices, settings: SyncSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            services,
            settings: Arc::new(settings),
            events,
            engine: Mutex::new(None),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn engine(&self) -> Option<Arc<SyncEngine>> {
        lock_slot(&self.engine).clone()
    }

    pub fn is_active(&self) -> bool {
        self.engine().is_some()
    }

    /// Online state of the running engine; `false` when sync is inactive.
    pub fn is_online(&self) -> bool {
        self.engine().map_or(false, |engine| engine.state().is_online)
    }

    pub fn current_user(&self) -> Option<String> {
        self.engine().map(|engine| engine.user_id.clone())
    }

    /// Runs one reconciliation cycle if sync is active and idle.
    pub async fn perform_startup_sync(&self) -> Result<CycleOutcome, SyncError> {
        match self.engine() {
            Some(engine) => engine.perform_startup_sync().await,
            None => Ok(CycleOutcome::Inactive),
        }
    }

    /// The pending conflict record, if any.
    pub fn conflict(&self) -> Result<Option<ConflictRecord>, SyncError> {
        Ok(self.services.store.get(CONFLICT_KEY)?)
    }
}

#[async_trait]
impl SyncManagerTrait for SyncManager {
    async fn init_sync(&self, user_id: &str) -> Result<CycleOutcome, SyncError> {
        if let Some(current) = self.engine() {
            if current.user_id == user_id {
                debug!(user_id, "sync already active");
                return Ok(CycleOutcome::AlreadyActive);
            }
            self.stop_sync();
        }

        info!(user_id, "initializing sync manager");
        let engine = Arc::new(SyncEngine::new(
            user_id,
            self.services.clone(),
            Arc::clone(&self.settings),
            self.events.clone(),
        ));
        engine.start_background_tasks();
        *lock_slot(&self.engine) = Some(Arc::clone(&engine));

        engine.perform_startup_sync().await
    }

    fn stop_sync(&self) {
        let engine = lock_slot(&self.engine).take();
        if let Some(engine) = engine {
            info!(user_id = %engine.user_id, "stopping sync manager");
            engine.shutdown();
        }
    }

    async fn force_sync_bookmarks(&self) -> bool {
        match self.engine() {
            Some(engine) => engine.force_sync().await,
            None => false,
        }
    }

    fn get_sync_status(&self) -> SyncStatus {
        match self.engine() {
            Some(engine) => engine.status(),
            None => SyncStatus::default(),
        }
    }

    async fn resolve_conflict(&self, choice: ConflictChoice) -> Result<(), SyncError> {
        let engine = self.engine().ok_or(SyncError::Inactive)?;
        engine.resolve_conflict(choice).await
    }
}

// === SyncEngine ===

/// Orchestration state for one signed-in session.
#[derive(Debug)]
struct SyncState {
    change_counter: u32,
    last_synced_hash: Option<ContentHash>,
    /// The tree both sides last agreed on.
    last_synced_tree: Option<BookmarkTree>,
    last_sync_time: i64,
    is_online: bool,
    queued_sync: bool,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            change_counter: 0,
            last_synced_hash: None,
            last_synced_tree: None,
            last_sync_time: 0,
            is_online: true,
            queued_sync: false,
        }
    }
}

/// Holds the sync lock until dropped. Releases only if the lock was not
/// stolen by a forced sync in the meantime.
struct SyncLockGuard<'a> {
    lock: &'a AtomicU64,
    generation: u64,
}

impl Drop for SyncLockGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .lock
            .compare_exchange(self.generation, 0, Ordering::SeqCst, Ordering::SeqCst);
    }
}

pub(crate) struct SyncEngine {
    user_id: String,
    services: SyncServices,
    settings: Arc<SyncSettings>,
    events: broadcast::Sender<SyncEvent>,
    state: Mutex<SyncState>,
    /// Generation of the current lock holder; 0 when free.
    lock: AtomicU64,
    next_generation: AtomicU64,
    active: AtomicBool,
    debounce: Mutex<Option<JoinHandle<()>>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

fn lock_slot<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SyncEngine {
    fn new(
        user_id: &str,
        services: SyncServices,
        settings: Arc<SyncSettings>,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            services,
            settings,
            events,
            state: Mutex::new(SyncState::default()),
            lock: AtomicU64::new(0),
            next_generation: AtomicU64::new(0),
            active: AtomicBool::new(true),
            debounce: Mutex::new(None),
            reconnect: Mutex::new(None),
            background: Mutex::new(Vec::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        lock_slot(&self.state)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn is_syncing(&self) -> bool {
        self.lock.load(Ordering::SeqCst) != 0
    }

    fn emit(&self, event: SyncEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn try_lock(&self) -> Option<SyncLockGuard<'_>> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock
            .compare_exchange(0, generation, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SyncLockGuard {
                lock: &self.lock,
                generation,
            })
    }

    fn steal_lock(&self) -> SyncLockGuard<'_> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        if self.lock.swap(generation, Ordering::SeqCst) != 0 {
            warn!("resetting sync lock for manual override");
        }
        SyncLockGuard {
            lock: &self.lock,
            generation,
        }
    }

    fn conflict_pending(&self) -> Result<bool, SyncError> {
        Ok(self.services.store.get_value(CONFLICT_KEY)?.is_some())
    }

    fn debounce_pending(&self) -> bool {
        lock_slot(&self.debounce)
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    fn cancel_debounce(&self) {
        if let Some(handle) = lock_slot(&self.debounce).take() {
            handle.abort();
        }
    }

    fn mark_synced(&self, tree: &BookmarkTree, hash: ContentHash) {
        let mut state = self.state();
        state.last_synced_hash = Some(hash);
        state.last_synced_tree = Some(tree.clone());
        state.last_sync_time = now_millis();
        state.change_counter = 0;
    }

    /// Tombstones every node of the last synced tree that is missing from
    /// `local`, so a deletion not yet uploaded survives the next merge.
    fn record_unsynced_deletions(&self, local: &BookmarkTree) -> Result<usize, SyncError> {
        let Some(synced) = self.state().last_synced_tree.clone() else {
            return Ok(0);
        };
        let present = collect_ids(local);
        let missing: Vec<String> = collect_ids(&synced)
            .into_iter()
            .filter(|id| !present.contains(id))
            .collect();
        for id in &missing {
            self.services.tombstones.track_deletion(id)?;
        }
        if !missing.is_empty() {
            debug!(count = missing.len(), "recorded unsynced local deletions");
        }
        Ok(missing.len())
    }

    fn save_local(&self, tree: &BookmarkTree) -> Result<(), SyncError> {
        self.services.store.save_bookmarks(tree, WriteOrigin::SyncEngine)?;
        debug!(count = tree.len(), "saved to local storage (internal write)");
        Ok(())
    }

    fn status(&self) -> SyncStatus {
        let (is_online, change_counter, last_sync_time, queued_sync) = {
            let state = self.state();
            (
                state.is_online,
                state.change_counter,
                state.last_sync_time,
                state.queued_sync,
            )
        };
        SyncStatus {
            is_active: self.is_active(),
            is_syncing: self.is_syncing(),
            is_online,
            change_counter,
            last_sync_time,
            has_pending_changes: change_counter > 0,
            queued_sync,
            has_failed_uploads: self
                .services
                .failed_uploads
                .is_empty(&self.user_id)
                .map(|empty| !empty)
                .unwrap_or(false),
            has_conflict: self.conflict_pending().unwrap_or(false),
        }
    }

    // --- lifecycle ---

    fn start_background_tasks(self: &Arc<Self>) {
        let changes = self.services.store.subscribe();
        let listener = tokio::spawn(listen_for_changes(Arc::downgrade(self), changes));

        let period = self.settings.heartbeat_interval();
        let weak = Arc::downgrade(self);
        let heartbeat = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(engine) = weak.upgrade() else { break };
                if !engine.is_active() {
                    break;
                }
                engine.heartbeat().await;
            }
        });

        lock_slot(&self.background).extend([listener, heartbeat]);
    }

    fn shutdown(&self) {
        self.active.store(false, Ordering::SeqCst);
        if self.state().change_counter > 0 {
            let recorded = self
                .services
                .store
                .load_bookmarks()
                .map_err(SyncError::from)
                .and_then(|local| self.record_unsynced_deletions(&local));
            if let Err(e) = recorded {
                warn!(error = %e, "failed to record pending deletions on stop");
            }
        }
        self.cancel_debounce();
        if let Some(handle) = lock_slot(&self.reconnect).take() {
            handle.abort();
        }
        for handle in lock_slot(&self.background).drain(..) {
            handle.abort();
        }
        *self.state() = SyncState::default();
        self.lock.store(0, Ordering::SeqCst);
    }

    // --- connectivity ---

    fn set_online(&self, online: bool) {
        let changed = {
            let mut state = self.state();
            let changed = state.is_online != online;
            state.is_online = online;
            changed
        };
        if changed {
            self.emit(if online { SyncEvent::Online } else { SyncEvent::Offline });
        }
    }

    fn go_offline(self: &Arc<Self>) {
        if self.state().is_online {
            warn!("remote unreachable, switching to offline mode");
        }
        self.set_online(false);
        self.start_reconnect_probe();
    }

    fn start_reconnect_probe(self: &Arc<Self>) {
        let mut slot = lock_slot(&self.reconnect);
        if slot.as_ref().map_or(false, |handle| !handle.is_finished()) {
            return;
        }

        let period = self.settings.offline_check_interval();
        let weak = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(engine) = weak.upgrade() else { break };
                if !engine.is_active() {
                    break;
                }
                if engine.services.remote.check_connection().await {
                    info!("connection restored");
                    // Detach so a failing cycle can start a new probe.
                    lock_slot(&engine.reconnect).take();
                    engine.set_online(true);
                    if let Err(e) = engine.perform_startup_sync().await {
                        warn!(error = %e, "sync after reconnect failed");
                    }
                    break;
                }
            }
        }));
    }

    // --- local change handling ---

    fn on_storage_change(self: &Arc<Self>, change: StorageChange) {
        if !self.is_active() || change.area != LOCAL_AREA || change.key != BOOKMARKS_KEY {
            return;
        }
        if change.origin == WriteOrigin::SyncEngine {
            debug!("internal write detected, skipping upload trigger");
            return;
        }

        let tree: BookmarkTree = match change.new_value {
            Some(value) => match serde_json::from_value(value) {
                Ok(tree) => tree,
                Err(e) => {
                    warn!(error = %e, "ignoring unreadable bookmark write");
                    return;
                }
            },
            None => Vec::new(),
        };
        self.on_local_change(&tree);
    }

    fn on_local_change(self: &Arc<Self>, tree: &BookmarkTree) {
        let hash = ContentHash::of(tree);
        let counter = {
            let mut state = self.state();
            if state.last_synced_hash.as_ref() == Some(&hash) {
                return;
            }
            state.change_counter += 1;
            state.change_counter
        };
        debug!(counter, "detected local change");

        self.cancel_debounce();
        if counter >= self.settings.change_threshold {
            self.schedule_upload();
        } else {
            self.schedule_debounced_upload();
        }
    }

    fn schedule_debounced_upload(self: &Arc<Self>) {
        let delay = self.settings.debounce_delay();
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            if let Some(engine) = weak.upgrade() {
                // The upload runs detached; cancelling the debounce must never
                // cut a request short.
                engine.schedule_upload();
            }
        });
        if let Some(previous) = lock_slot(&self.debounce).replace(handle) {
            previous.abort();
        }
    }

    fn schedule_upload(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.trigger_upload().await;
        });
    }

    fn after_unlock(self: &Arc<Self>) {
        let queued = std::mem::take(&mut self.state().queued_sync);
        if queued && self.is_active() {
            debug!("running upload queued during sync");
            self.schedule_upload();
        }
    }

    // --- uploads ---

    async fn upload_with_retry(&self, tree: &BookmarkTree) -> Result<(), RemoteError> {
        let mut attempt = 0;
        loop {
            match self.services.remote.upload_remote(&self.user_id, tree).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_network() || matches!(e, RemoteError::Encryption(_)) => return Err(e),
                Err(e) if attempt >= self.settings.max_retries => return Err(e),
                Err(e) => {
                    attempt += 1;
                    warn!(attempt, error = %e, "upload failed, retrying");
                    sleep(self.settings.retry_delay()).await;
                }
            }
        }
    }

    /// Uploads with retries. A network failure flips the engine offline; any
    /// other failure parks the payload in the failed-upload queue.
    async fn upload_or_queue(self: &Arc<Self>, tree: &BookmarkTree) -> Result<(), SyncError> {
        match self.upload_with_retry(tree).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_network() => Err(e.into()),
            Err(e) => {
                error!(error = %e, "upload failed after retries, queueing for later");
                self.services.failed_uploads.push(&self.user_id, tree)?;
                Err(e.into())
            }
        }
    }

    async fn trigger_upload(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }
        if !self.state().is_online {
            debug!("offline, deferring upload");
            return;
        }
        let Some(guard) = self.try_lock() else {
            debug!("sync in progress, queueing upload");
            self.state().queued_sync = true;
            return;
        };

        if let Err(e) = self.upload_local().await {
            self.report_failure(&e);
        }
        drop(guard);
        self.after_unlock();
    }

    async fn upload_local(self: &Arc<Self>) -> Result<(), SyncError> {
        let tree = self.services.store.load_bookmarks()?;
        let hash = ContentHash::of(&tree);
        if self.state().last_synced_hash.as_ref() == Some(&hash) {
            debug!("state identical to remote, skipping upload");
            self.state().change_counter = 0;
            return Ok(());
        }

        info!(count = tree.len(), "uploading current state");
        self.emit(SyncEvent::Syncing);
        if let Err(e) = self.upload_or_queue(&tree).await {
            // The next cycle merges with the remote; keep deletions from
            // being restored by it.
            if let Err(record_err) = self.record_unsynced_deletions(&tree) {
                warn!(error = %record_err, "failed to record pending deletions");
            }
            return Err(e);
        }
        self.mark_synced(&tree, hash);
        self.emit(SyncEvent::Synced);
        info!("upload complete");
        Ok(())
    }

    fn report_failure(self: &Arc<Self>, err: &SyncError) {
        if err.is_network() {
            warn!(error = %err, "sync interrupted by connectivity loss");
            self.go_offline();
        } else {
            error!(error = %err, "sync failed");
            self.emit(SyncEvent::Error(err.to_string()));
        }
    }

    // --- heartbeat and retry queue ---

    async fn heartbeat(self: &Arc<Self>) {
        if self.is_syncing() {
            debug!("heartbeat skipped, sync in progress");
            return;
        }
        if !self.state().is_online {
            debug!("heartbeat skipped, offline");
            return;
        }

        let has_failed = self
            .services
            .failed_uploads
            .is_empty(&self.user_id)
            .map(|empty| !empty)
            .unwrap_or(false);
        if has_failed {
            if let Err(e) = self.retry_failed_uploads().await {
                self.report_failure(&e);
            }
            return;
        }

        let counter = self.state().change_counter;
        if counter == 0 {
            debug!("heartbeat: checking for remote changes");
            if let Err(e) = self.perform_startup_sync().await {
                debug!(error = %e, "heartbeat cycle failed");
            }
        } else if !self.debounce_pending() {
            debug!(counter, "heartbeat: flushing pending changes");
            self.trigger_upload().await;
        }
    }

    /// Replays the newest queued payload if it still matches local state;
    /// otherwise drops the stale queue and reconciles instead.
    async fn retry_failed_uploads(self: &Arc<Self>) -> Result<(), SyncError> {
        let Some(entry) = self.services.failed_uploads.latest(&self.user_id)? else {
            return Ok(());
        };

        let local_hash = ContentHash::of(&self.services.store.load_bookmarks()?);
        let queued_hash = ContentHash::of(&entry.bookmarks);
        if queued_hash != local_hash {
            info!("queued upload superseded by newer local state");
            self.services.failed_uploads.clear(&self.user_id)?;
            self.perform_startup_sync().await?;
            return Ok(());
        }

        let Some(guard) = self.try_lock() else {
            return Ok(());
        };
        info!(queued_at = entry.created_at, "retrying failed upload");
        let result = self.upload_with_retry(&entry.bookmarks).await;
        drop(guard);
        self.after_unlock();

        result?;
        self.services.failed_uploads.clear(&self.user_id)?;
        self.mark_synced(&entry.bookmarks, queued_hash);
        self.emit(SyncEvent::QueueSynced);
        info!("failed upload queue flushed");
        Ok(())
    }

    // --- reconciliation ---

    async fn perform_startup_sync(self: &Arc<Self>) -> Result<CycleOutcome, SyncError> {
        if !self.is_active() {
            return Ok(CycleOutcome::Inactive);
        }
        let Some(guard) = self.try_lock() else {
            debug!("sync already in progress, skipping cycle");
            return Ok(CycleOutcome::Busy);
        };
        let result = self.reconcile().await;
        drop(guard);
        self.after_unlock();
        result
    }

    async fn force_sync(self: &Arc<Self>) -> bool {
        if !self.is_active() {
            return false;
        }
        if self.conflict_pending().unwrap_or(false) {
            info!("force sync refused, conflict awaits resolution");
            return false;
        }

        info!("force sync: manually triggered");
        self.cancel_debounce();
        self.state().change_counter = 0;

        let guard = self.steal_lock();
        let result = self.reconcile().await;
        drop(guard);
        self.after_unlock();

        if let Ok(outcome) = result {
            info!(?outcome, "force sync finished");
        }
        true
    }

    async fn reconcile(self: &Arc<Self>) -> Result<CycleOutcome, SyncError> {
        if self.conflict_pending()? {
            debug!("conflict pending, automatic reconciliation suspended");
            return Ok(CycleOutcome::ConflictPending);
        }
        if !self.services.remote.check_connection().await {
            info!("offline: skipping sync cycle");
            self.go_offline();
            return Ok(CycleOutcome::Offline);
        }
        self.set_online(true);
        self.emit(SyncEvent::Syncing);

        let result = self.reconcile_online().await;
        match &result {
            Ok(CycleOutcome::ConflictDetected) => {}
            Ok(outcome) => {
                if !self.services.failed_uploads.is_empty(&self.user_id)? {
                    self.services.failed_uploads.clear(&self.user_id)?;
                    self.emit(SyncEvent::QueueSynced);
                }
                info!(?outcome, "sync cycle complete");
                self.emit(SyncEvent::Synced);
            }
            Err(e) => self.report_failure(e),
        }
        result
    }

    async fn reconcile_online(self: &Arc<Self>) -> Result<CycleOutcome, SyncError> {
        let local = self.services.store.load_bookmarks()?;
        self.record_unsynced_deletions(&local)?;
        let remote = self.services.remote.fetch_remote(&self.user_id).await?;
        let deleted = self.services.tombstones.get_pending_deletions()?;

        let Some(snapshot) = remote else {
            if !local.is_empty() {
                info!(count = count_bookmarks(&local), "initializing remote with local data");
                self.upload_or_queue(&local).await?;
            }
            if !deleted.is_empty() {
                self.services.tombstones.clear_deletions()?;
            }
            self.mark_synced(&local, ContentHash::of(&local));
            return Ok(CycleOutcome::InitializedRemote);
        };

        let mut server = snapshot.bookmarks;
        if !deleted.is_empty() {
            info!(count = deleted.len(), "applying offline deletions to remote data");
            let cleaned = filter_tree(&server, &deleted);
            if cleaned != server {
                info!("propagating deletions to remote before merging");
                self.upload_or_queue(&cleaned).await?;
                server = cleaned;
            }
            self.services.tombstones.clear_deletions()?;
        }

        let local_hash = ContentHash::of(&local);
        let server_hash = ContentHash::of(&server);
        if local_hash == server_hash {
            self.mark_synced(&server, server_hash);
            return Ok(CycleOutcome::InSync);
        }

        if local.is_empty() && !server.is_empty() {
            info!(count = count_bookmarks(&server), "downloading remote data to local storage");
            self.save_local(&server)?;
            self.mark_synced(&server, server_hash);
            return Ok(CycleOutcome::Downloaded);
        }

        let local_count = count_bookmarks(&local);
        let server_count = count_bookmarks(&server);
        if local_count > 0
            && server_count > 0
            && local_count.abs_diff(server_count) > self.settings.divergence_threshold
        {
            warn!(local_count, server_count, "significant divergence, asking the user");
            let record = ConflictRecord {
                local,
                server,
                local_count,
                server_count,
                timestamp: now_millis(),
            };
            self.services
                .store
                .set(CONFLICT_KEY, &record, WriteOrigin::SyncEngine)?;
            self.emit(SyncEvent::Conflict {
                local_count,
                server_count,
            });
            return Ok(CycleOutcome::ConflictDetected);
        }

        info!("data mismatch, merging");
        let merged = merge(&local, &server);
        let merged_hash = ContentHash::of(&merged);
        if merged_hash != local_hash {
            self.save_local(&merged)?;
        }
        if merged_hash != server_hash {
            info!("uploading merged result");
            self.upload_or_queue(&merged).await?;
        }
        self.mark_synced(&merged, merged_hash);
        Ok(CycleOutcome::Merged)
    }

    async fn resolve_conflict(self: &Arc<Self>, choice: ConflictChoice) -> Result<(), SyncError> {
        let record: ConflictRecord = self
            .services
            .store
            .get(CONFLICT_KEY)?
            .ok_or(SyncError::NoConflict)?;

        let resolved = match choice {
            ConflictChoice::Local => record.local,
            ConflictChoice::Server => record.server,
            ConflictChoice::Merge => merge(&record.local, &record.server),
        };

        let guard = self.steal_lock();
        self.cancel_debounce();
        self.save_local(&resolved)?;
        let uploaded = self.upload_with_retry(&resolved).await;
        drop(guard);
        self.after_unlock();

        if let Err(e) = uploaded {
            // The record stays so the user can retry the same choice.
            let err = SyncError::from(e);
            self.report_failure(&err);
            return Err(err);
        }

        self.services.store.remove(CONFLICT_KEY, WriteOrigin::SyncEngine)?;
        self.mark_synced(&resolved, ContentHash::of(&resolved));
        self.emit(SyncEvent::Synced);
        info!(?choice, "conflict resolved");
        Ok(())
    }
}

async fn listen_for_changes(engine: Weak<SyncEngine>, mut changes: broadcast::Receiver<StorageChange>) {
    loop {
        let change = match changes.recv().await {
            Ok(change) => Some(change),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "storage change feed lagged");
                None
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(engine) = engine.upgrade() else { break };
        if !engine.is_active() {
            break;
        }
        match change {
            Some(change) => engine.on_storage_change(change),
            // Missed notifications: re-read the tree and treat it as one change.
            None => match engine.services.store.load_bookmarks() {
                Ok(tree) => engine.on_local_change(&tree),
                Err(e) => warn!(error = %e, "failed to reload bookmarks after lag"),
            },
        }
    }
}
