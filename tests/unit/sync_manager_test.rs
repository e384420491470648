//! Unit tests for the sync manager lifecycle and reconciliation cycles.
//!
//! Every test runs against an `InMemoryRemote` on a paused tokio clock, so
//! debounce, retry, heartbeat and reconnect timers advance deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::Receiver;
use tokio::time::sleep;

use marksync::app::App;
use marksync::database::Database;
use marksync::managers::bookmark_manager::BookmarkManagerTrait;
use marksync::managers::storage_manager::WriteOrigin;
use marksync::managers::sync_manager::SyncManagerTrait;
use marksync::services::crypto_service::CryptoService;
use marksync::services::remote_store::{InMemoryRemote, RemoteAccess, RemoteStore};
use marksync::services::sync_codec::SyncCodec;
use marksync::types::bookmark::{Bookmark, BookmarkTree};
use marksync::types::errors::{RemoteError, SyncError};
use marksync::types::settings::SyncSettings;
use marksync::types::sync::{ConflictChoice, CycleOutcome, RemoteRecord, SyncEvent, SyncStatus};

const SECRET: &str = "test-app-secret";
const USER: &str = "user-1";

/// Delays every upsert made by the device under test.
struct SlowUploads {
    inner: Arc<InMemoryRemote>,
    delay_ms: Arc<AtomicU64>,
}

#[async_trait]
impl RemoteStore for SlowUploads {
    async fn fetch_record(&self, user_id: &str) -> Result<Option<RemoteRecord>, RemoteError> {
        self.inner.fetch_record(user_id).await
    }

    async fn upsert_record(&self, record: &RemoteRecord) -> Result<(), RemoteError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            sleep(Duration::from_millis(delay)).await;
        }
        self.inner.upsert_record(record).await
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        self.inner.ping().await
    }
}

struct Harness {
    app: App,
    remote: Arc<InMemoryRemote>,
    /// A second device talking to the same remote record.
    other_device: RemoteAccess,
    upload_delay_ms: Arc<AtomicU64>,
}

fn harness() -> Harness {
    let remote = Arc::new(InMemoryRemote::new());
    let upload_delay_ms = Arc::new(AtomicU64::new(0));
    let settings = SyncSettings {
        app_secret: SECRET.to_string(),
        ..SyncSettings::default()
    };
    let db = Database::open_in_memory().expect("Failed to open in-memory database");
    let device: Arc<dyn RemoteStore> = Arc::new(SlowUploads {
        inner: remote.clone(),
        delay_ms: Arc::clone(&upload_delay_ms),
    });
    let app = App::with_remote(db, device, settings);
    let codec = SyncCodec::new(Arc::new(CryptoService::new()), SECRET);
    let store: Arc<dyn RemoteStore> = remote.clone();
    Harness {
        app,
        remote,
        other_device: RemoteAccess::new(store, Arc::new(codec)),
        upload_delay_ms,
    }
}

impl Harness {
    fn seed_local(&self, tree: &BookmarkTree) {
        self.app.store.save_bookmarks(tree, WriteOrigin::User).unwrap();
    }

    fn local(&self) -> BookmarkTree {
        self.app.store.load_bookmarks().unwrap()
    }

    async fn remote_tree(&self) -> BookmarkTree {
        self.other_device
            .fetch_remote(USER)
            .await
            .unwrap()
            .expect("remote record should exist")
            .bookmarks
    }

    async fn sign_in(&self) -> Result<Option<CycleOutcome>, SyncError> {
        self.app.set_session(Some(USER), true).await
    }

    fn set_upload_delay(&self, delay: Duration) {
        self.upload_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn add(&self, url: &str) {
        self.app.bookmarks().add_bookmark(url, "Added", None, false).unwrap();
    }
}

fn links(prefix: &str, count: usize) -> BookmarkTree {
    (0..count)
        .map(|i| Bookmark::link(&format!("https://{}.example/{}", prefix, i), &format!("{} {}", prefix, i)))
        .collect()
}

fn drain(events: &mut Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

// ─── Startup reconciliation ───

#[tokio::test(start_paused = true)]
async fn test_first_sync_uploads_local_tree() {
    let h = harness();
    let tree = links("a", 3);
    h.seed_local(&tree);

    let outcome = h.sign_in().await.unwrap();
    assert_eq!(outcome, Some(CycleOutcome::InitializedRemote));
    assert_eq!(h.remote.upload_count(), 1);
    assert_eq!(h.remote_tree().await, tree);

    let status = h.app.sync.get_sync_status();
    assert!(status.is_active);
    assert!(status.is_online);
    assert!(!status.is_syncing);
    assert_eq!(status.change_counter, 0);
    assert!(status.last_sync_time > 0);
}

#[tokio::test(start_paused = true)]
async fn test_first_sync_with_nothing_anywhere_uploads_nothing() {
    let h = harness();
    let outcome = h.sign_in().await.unwrap();
    assert_eq!(outcome, Some(CycleOutcome::InitializedRemote));
    assert_eq!(h.remote.upload_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_device_downloads_remote_tree() {
    let h = harness();
    let tree = vec![
        Bookmark::folder("Work", links("w", 2)),
        Bookmark::link("https://b.example", "B"),
    ];
    h.other_device.upload_remote(USER, &tree).await.unwrap();

    let outcome = h.sign_in().await.unwrap();
    assert_eq!(outcome, Some(CycleOutcome::Downloaded));
    assert_eq!(h.local(), tree);
    assert_eq!(h.remote.upload_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_engine_writes_do_not_trigger_uploads() {
    let h = harness();
    h.other_device.upload_remote(USER, &links("r", 4)).await.unwrap();

    h.sign_in().await.unwrap();
    sleep(Duration::from_secs(10)).await;

    assert_eq!(h.remote.upload_count(), 1);
    assert_eq!(h.app.sync.get_sync_status().change_counter, 0);
}

#[tokio::test(start_paused = true)]
async fn test_identical_trees_are_in_sync() {
    let h = harness();
    let tree = links("a", 2);
    h.seed_local(&tree);
    h.other_device.upload_remote(USER, &tree).await.unwrap();

    assert_eq!(h.sign_in().await.unwrap(), Some(CycleOutcome::InSync));
    assert_eq!(h.remote.upload_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_small_divergence_is_merged_both_ways() {
    let h = harness();
    let shared = links("shared", 2);
    let mut local = shared.clone();
    local.push(Bookmark::link("https://local-only.example", "Local only"));
    let mut server = shared.clone();
    server.push(Bookmark::link("https://remote-only.example", "Remote only"));
    h.seed_local(&local);
    h.other_device.upload_remote(USER, &server).await.unwrap();

    assert_eq!(h.sign_in().await.unwrap(), Some(CycleOutcome::Merged));

    let merged = h.local();
    assert_eq!(merged.len(), 4);
    assert_eq!(h.remote_tree().await, merged);
    assert_eq!(h.remote.upload_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_undecryptable_remote_is_an_error_not_an_empty_tree() {
    let h = harness();
    let local = links("a", 1);
    h.seed_local(&local);
    let stranger = RemoteAccess::new(
        h.remote.clone(),
        Arc::new(SyncCodec::new(Arc::new(CryptoService::new()), "another-secret")),
    );
    stranger.upload_remote(USER, &links("x", 3)).await.unwrap();
    let mut events = h.app.sync.subscribe_events();

    let err = h.sign_in().await.unwrap_err();
    assert!(matches!(err, SyncError::Remote(RemoteError::Decryption(_))));
    assert_eq!(h.local(), local);
    assert_eq!(h.remote.upload_count(), 1);
    assert!(h.app.sync.is_online());
    assert!(drain(&mut events)
        .iter()
        .any(|event| matches!(event, SyncEvent::Error(_))));
}

// ─── Tombstones ───

#[tokio::test(start_paused = true)]
async fn test_deletion_while_signed_out_is_not_resurrected() {
    let h = harness();
    let tree = links("a", 3);
    h.seed_local(&tree);
    h.other_device.upload_remote(USER, &tree).await.unwrap();

    h.app.bookmarks().delete_bookmark(&tree[1].id).unwrap();
    assert!(h.app.tombstones.has_pending().unwrap());

    assert_eq!(h.sign_in().await.unwrap(), Some(CycleOutcome::InSync));

    let expected = vec![tree[0].clone(), tree[2].clone()];
    assert_eq!(h.local(), expected);
    assert_eq!(h.remote_tree().await, expected);
    assert!(!h.app.tombstones.has_pending().unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_offline_deletion_applies_after_reconnect() {
    let h = harness();
    let tree = links("a", 3);
    h.seed_local(&tree);
    h.other_device.upload_remote(USER, &tree).await.unwrap();
    h.remote.set_online(false);
    let mut events = h.app.sync.subscribe_events();

    assert_eq!(h.sign_in().await.unwrap(), Some(CycleOutcome::Offline));
    assert!(!h.app.sync.is_online());
    assert!(drain(&mut events).contains(&SyncEvent::Offline));

    h.app.bookmarks().delete_bookmark(&tree[1].id).unwrap();
    assert!(h.app.tombstones.has_pending().unwrap());

    h.remote.set_online(true);
    sleep(Duration::from_secs(6)).await;

    let expected = vec![tree[0].clone(), tree[2].clone()];
    assert!(h.app.sync.is_online());
    assert!(drain(&mut events).contains(&SyncEvent::Online));
    assert_eq!(h.remote_tree().await, expected);
    assert_eq!(h.local(), expected);
    assert!(!h.app.tombstones.has_pending().unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_online_deletion_leaves_no_tombstone() {
    let h = harness();
    let tree = links("a", 2);
    h.seed_local(&tree);
    h.sign_in().await.unwrap();

    h.app.bookmarks().delete_bookmark(&tree[0].id).unwrap();
    assert!(!h.app.tombstones.has_pending().unwrap());

    sleep(Duration::from_secs(6)).await;
    assert_eq!(h.remote_tree().await, vec![tree[1].clone()]);
}

#[tokio::test(start_paused = true)]
async fn test_deletion_survives_upload_lost_to_network_failure() {
    let h = harness();
    let tree = links("a", 3);
    h.seed_local(&tree);
    h.sign_in().await.unwrap();

    // The engine still believes it is online when the user deletes.
    h.remote.set_online(false);
    h.app.bookmarks().delete_bookmark(&tree[1].id).unwrap();
    sleep(Duration::from_secs(6)).await;
    assert!(!h.app.sync.is_online());
    assert!(h.app.tombstones.has_pending().unwrap());

    h.remote.set_online(true);
    sleep(Duration::from_secs(6)).await;

    let expected = vec![tree[0].clone(), tree[2].clone()];
    assert!(h.app.sync.is_online());
    assert_eq!(h.local(), expected);
    assert_eq!(h.remote_tree().await, expected);
    assert!(!h.app.tombstones.has_pending().unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_deletion_survives_superseded_failed_upload() {
    let h = harness();
    let tree = links("a", 3);
    h.seed_local(&tree);
    h.sign_in().await.unwrap();

    // One attempt plus three retries, then the payload is queued.
    h.remote.fail_next_uploads(4);
    h.app.bookmarks().delete_bookmark(&tree[0].id).unwrap();
    sleep(Duration::from_secs(25)).await;
    assert!(h.app.sync.get_sync_status().has_failed_uploads);

    // A newer edit, still debouncing when the heartbeat fires at 60s, makes
    // the queued payload stale, so the heartbeat reconciles instead.
    sleep(Duration::from_secs(32)).await;
    h.add("https://later.example");
    sleep(Duration::from_secs(10)).await;

    let local = h.local();
    assert!(local.iter().all(|node| node.id != tree[0].id));
    assert!(local.iter().any(|node| node.url.as_deref() == Some("https://later.example")));
    assert_eq!(h.remote_tree().await, local);
    assert!(!h.app.sync.get_sync_status().has_failed_uploads);
}

#[tokio::test(start_paused = true)]
async fn test_force_sync_keeps_local_deletion_pending_upload() {
    let h = harness();
    let tree = links("a", 3);
    h.seed_local(&tree);
    h.sign_in().await.unwrap();

    h.app.bookmarks().delete_bookmark(&tree[2].id).unwrap();
    assert!(h.app.sync.force_sync_bookmarks().await);

    let expected = vec![tree[0].clone(), tree[1].clone()];
    assert_eq!(h.local(), expected);
    assert_eq!(h.remote_tree().await, expected);
}

// ─── Conflicts ───

#[tokio::test(start_paused = true)]
async fn test_large_divergence_creates_conflict() {
    let h = harness();
    h.seed_local(&links("local", 15));
    h.other_device.upload_remote(USER, &links("server", 2)).await.unwrap();
    let mut events = h.app.sync.subscribe_events();

    let outcome = h.sign_in().await.unwrap();
    assert_eq!(outcome, Some(CycleOutcome::ConflictDetected));
    assert!(drain(&mut events).contains(&SyncEvent::Conflict {
        local_count: 15,
        server_count: 2,
    }));

    let record = h.app.sync.conflict().unwrap().expect("conflict record");
    assert_eq!(record.local_count, 15);
    assert_eq!(record.server_count, 2);
    assert!(h.app.sync.get_sync_status().has_conflict);

    // Neither side was touched.
    assert_eq!(h.local().len(), 15);
    assert_eq!(h.remote_tree().await.len(), 2);

    // Automatic and manual cycles stay suspended.
    assert!(!h.app.sync.force_sync_bookmarks().await);
    assert_eq!(
        h.app.sync.perform_startup_sync().await.unwrap(),
        CycleOutcome::ConflictPending
    );
}

#[tokio::test(start_paused = true)]
async fn test_resolve_conflict_keep_local() {
    let h = harness();
    let local = links("local", 15);
    h.seed_local(&local);
    h.other_device.upload_remote(USER, &links("server", 2)).await.unwrap();
    h.sign_in().await.unwrap();

    h.app.sync.resolve_conflict(ConflictChoice::Local).await.unwrap();

    assert!(h.app.sync.conflict().unwrap().is_none());
    assert_eq!(h.remote_tree().await, local);
    assert_eq!(h.local(), local);
    assert!(!h.app.sync.get_sync_status().has_conflict);
}

#[tokio::test(start_paused = true)]
async fn test_resolve_conflict_merge_unions_both_sides() {
    let h = harness();
    h.seed_local(&links("local", 15));
    h.other_device.upload_remote(USER, &links("server", 2)).await.unwrap();
    h.sign_in().await.unwrap();

    h.app.sync.resolve_conflict(ConflictChoice::Merge).await.unwrap();
    let uploads = h.remote.upload_count();

    assert_eq!(h.local().len(), 17);
    assert_eq!(h.remote_tree().await, h.local());

    // The resolved tree was written by the engine and must not echo.
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.remote.upload_count(), uploads);
}

#[tokio::test(start_paused = true)]
async fn test_resolve_conflict_server_and_failed_upload_keeps_record() {
    let h = harness();
    let server = links("server", 2);
    h.seed_local(&links("local", 15));
    h.other_device.upload_remote(USER, &server).await.unwrap();
    h.sign_in().await.unwrap();

    h.remote.fail_next_uploads(10);
    let err = h
        .app
        .sync
        .resolve_conflict(ConflictChoice::Server)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Remote(RemoteError::Api { .. })));
    assert!(h.app.sync.conflict().unwrap().is_some());

    h.remote.fail_next_uploads(0);
    h.app.sync.resolve_conflict(ConflictChoice::Server).await.unwrap();
    assert_eq!(h.local(), server);
    assert!(h.app.sync.conflict().unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_resolve_without_conflict_fails() {
    let h = harness();
    h.sign_in().await.unwrap();
    let err = h
        .app
        .sync
        .resolve_conflict(ConflictChoice::Local)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NoConflict));
}

// ─── Local change batching ───

#[tokio::test(start_paused = true)]
async fn test_debounce_batches_changes_into_one_upload() {
    let h = harness();
    h.sign_in().await.unwrap();

    for i in 0..3 {
        h.app
            .bookmarks()
            .add_bookmark(&format!("https://d.example/{}", i), "D", None, false)
            .unwrap();
    }

    sleep(Duration::from_secs(4)).await;
    assert_eq!(h.remote.upload_count(), 0);
    let status = h.app.sync.get_sync_status();
    assert_eq!(status.change_counter, 3);
    assert!(status.has_pending_changes);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.remote.upload_count(), 1);
    assert_eq!(h.remote_tree().await.len(), 3);
    assert_eq!(h.app.sync.get_sync_status().change_counter, 0);
}

#[tokio::test(start_paused = true)]
async fn test_threshold_uploads_immediately() {
    let h = harness();
    h.sign_in().await.unwrap();

    for i in 0..10 {
        h.app
            .bookmarks()
            .add_bookmark(&format!("https://t.example/{}", i), "T", None, false)
            .unwrap();
    }

    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.remote.upload_count(), 1);
    assert_eq!(h.remote_tree().await.len(), 10);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.remote.upload_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_write_restoring_synced_state_is_not_a_change() {
    let h = harness();
    let tree = links("a", 2);
    h.seed_local(&tree);
    h.sign_in().await.unwrap();

    h.app.bookmarks().replace_all(tree.clone()).unwrap();
    sleep(Duration::from_secs(10)).await;

    assert_eq!(h.app.sync.get_sync_status().change_counter, 0);
    assert_eq!(h.remote.upload_count(), 1);
}

// ─── Heartbeat and force sync ───

#[tokio::test(start_paused = true)]
async fn test_heartbeat_pulls_remote_changes() {
    let h = harness();
    let tree = links("a", 1);
    h.seed_local(&tree);
    h.sign_in().await.unwrap();

    let mut newer = tree.clone();
    newer.push(Bookmark::link("https://x.example", "From another device"));
    h.other_device.upload_remote(USER, &newer).await.unwrap();

    sleep(Duration::from_secs(30)).await;
    assert_eq!(h.local(), tree);

    sleep(Duration::from_secs(31)).await;
    assert_eq!(h.local(), newer);
}

#[tokio::test(start_paused = true)]
async fn test_force_sync_runs_cycle_now() {
    let h = harness();
    let tree = links("a", 1);
    h.seed_local(&tree);
    h.sign_in().await.unwrap();

    let mut newer = tree.clone();
    newer.push(Bookmark::link("https://x.example", "From another device"));
    h.other_device.upload_remote(USER, &newer).await.unwrap();

    assert!(h.app.sync.force_sync_bookmarks().await);
    assert_eq!(h.local(), newer);
    assert_eq!(h.app.sync.get_sync_status().change_counter, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cycle_is_busy_while_upload_holds_lock() {
    let h = harness();
    h.sign_in().await.unwrap();
    h.set_upload_delay(Duration::from_secs(10));
    h.add("https://slow.example");

    // The debounced upload starts at 5s and runs until 15s.
    sleep(Duration::from_secs(6)).await;
    assert!(h.app.sync.get_sync_status().is_syncing);
    assert_eq!(
        h.app.sync.perform_startup_sync().await.unwrap(),
        CycleOutcome::Busy
    );

    sleep(Duration::from_secs(10)).await;
    assert!(!h.app.sync.get_sync_status().is_syncing);
    assert_eq!(h.remote.upload_count(), 1);
    assert_eq!(h.remote_tree().await, h.local());
}

#[tokio::test(start_paused = true)]
async fn test_force_sync_overrides_held_lock() {
    let h = harness();
    h.sign_in().await.unwrap();
    h.set_upload_delay(Duration::from_secs(10));
    h.add("https://stuck.example");
    sleep(Duration::from_secs(6)).await;
    assert!(h.app.sync.get_sync_status().is_syncing);

    h.set_upload_delay(Duration::ZERO);
    assert!(h.app.sync.force_sync_bookmarks().await);
    assert_eq!(h.remote.upload_count(), 1);
    assert_eq!(h.remote_tree().await, h.local());
    assert!(!h.app.sync.get_sync_status().is_syncing);

    // The overridden upload still finishes without disturbing anything.
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.remote.upload_count(), 2);
    assert_eq!(h.remote_tree().await, h.local());
    assert!(!h.app.sync.get_sync_status().is_syncing);
}

#[tokio::test(start_paused = true)]
async fn test_force_sync_cancels_pending_debounce() {
    let h = harness();
    h.sign_in().await.unwrap();
    h.add("https://f.example");
    sleep(Duration::from_millis(10)).await;
    assert_eq!(h.app.sync.get_sync_status().change_counter, 1);

    // Without the cancel, the debounce would fire at 5s against the held
    // lock and be queued.
    h.set_upload_delay(Duration::from_secs(10));
    let (attempted, mid_status) = tokio::join!(h.app.sync.force_sync_bookmarks(), async {
        sleep(Duration::from_secs(6)).await;
        h.app.sync.get_sync_status()
    });
    assert!(attempted);
    assert!(mid_status.is_syncing);
    assert!(!mid_status.queued_sync);

    sleep(Duration::from_secs(20)).await;
    assert_eq!(h.remote.upload_count(), 1);
    assert_eq!(h.app.sync.get_sync_status().change_counter, 0);
}

#[tokio::test(start_paused = true)]
async fn test_change_during_upload_runs_after_lock_release() {
    let h = harness();
    h.sign_in().await.unwrap();
    h.set_upload_delay(Duration::from_secs(10));
    h.add("https://first.example");

    // First upload holds the lock from 5s to 15s; the second change's
    // debounce fires at 13s and has to wait.
    sleep(Duration::from_secs(8)).await;
    h.add("https://second.example");
    sleep(Duration::from_secs(6)).await;
    let status = h.app.sync.get_sync_status();
    assert!(status.is_syncing);
    assert!(status.queued_sync);
    assert_eq!(h.remote.upload_count(), 0);

    sleep(Duration::from_secs(12)).await;
    let status = h.app.sync.get_sync_status();
    assert!(!status.queued_sync);
    assert!(!status.is_syncing);
    assert_eq!(h.remote.upload_count(), 2);
    assert_eq!(h.remote_tree().await.len(), 2);
    assert_eq!(h.remote_tree().await, h.local());
}

#[tokio::test(start_paused = true)]
async fn test_force_sync_when_inactive_does_nothing() {
    let h = harness();
    assert!(!h.app.sync.force_sync_bookmarks().await);
    assert_eq!(h.remote.fetch_count(), 0);
}

// ─── Failure handling ───

#[tokio::test(start_paused = true)]
async fn test_failed_upload_is_queued_and_retried_by_heartbeat() {
    let h = harness();
    h.sign_in().await.unwrap();
    let mut events = h.app.sync.subscribe_events();

    // One attempt plus three retries.
    h.remote.fail_next_uploads(4);
    h.app
        .bookmarks()
        .add_bookmark("https://q.example", "Q", None, false)
        .unwrap();

    sleep(Duration::from_secs(25)).await;
    let status = h.app.sync.get_sync_status();
    assert!(status.has_failed_uploads);
    assert!(status.is_online);
    assert_eq!(h.remote.upload_count(), 0);
    assert!(drain(&mut events)
        .iter()
        .any(|event| matches!(event, SyncEvent::Error(_))));

    sleep(Duration::from_secs(40)).await;
    assert!(!h.app.sync.get_sync_status().has_failed_uploads);
    assert_eq!(h.remote.upload_count(), 1);
    assert_eq!(h.remote_tree().await, h.local());
    assert!(drain(&mut events).contains(&SyncEvent::QueueSynced));
}

#[tokio::test(start_paused = true)]
async fn test_network_loss_during_upload_goes_offline() {
    let h = harness();
    h.sign_in().await.unwrap();

    h.remote.set_online(false);
    h.app
        .bookmarks()
        .add_bookmark("https://n.example", "N", None, false)
        .unwrap();
    sleep(Duration::from_secs(6)).await;

    // Offline edits stay local; nothing was queued as a failure.
    assert!(!h.app.sync.is_online());
    let status = h.app.sync.get_sync_status();
    assert!(!status.has_failed_uploads);
    assert_eq!(status.change_counter, 1);

    h.remote.set_online(true);
    sleep(Duration::from_secs(6)).await;
    assert!(h.app.sync.is_online());
    assert_eq!(h.remote_tree().await, h.local());
}

// ─── Lifecycle ───

#[tokio::test(start_paused = true)]
async fn test_init_sync_twice_for_same_user_is_noop() {
    let h = harness();
    assert_eq!(
        h.app.sync.init_sync(USER).await.unwrap(),
        CycleOutcome::InitializedRemote
    );
    assert_eq!(
        h.app.sync.init_sync(USER).await.unwrap(),
        CycleOutcome::AlreadyActive
    );
    assert_eq!(h.app.sync.current_user().as_deref(), Some(USER));
}

#[tokio::test(start_paused = true)]
async fn test_switching_user_replaces_engine() {
    let h = harness();
    h.app.sync.init_sync(USER).await.unwrap();
    h.app.sync.init_sync("user-2").await.unwrap();
    assert_eq!(h.app.sync.current_user().as_deref(), Some("user-2"));
}

#[tokio::test(start_paused = true)]
async fn test_stop_sync_resets_state_and_stops_uploads() {
    let h = harness();
    h.sign_in().await.unwrap();
    h.app
        .bookmarks()
        .add_bookmark("https://s.example", "S", None, false)
        .unwrap();
    sleep(Duration::from_millis(10)).await;

    h.app.set_session(None, false).await.unwrap();
    assert!(!h.app.sync.is_active());
    assert_eq!(h.app.sync.get_sync_status(), SyncStatus::default());

    sleep(Duration::from_secs(120)).await;
    assert_eq!(h.remote.upload_count(), 0);
    assert!(matches!(
        h.app.sync.resolve_conflict(ConflictChoice::Local).await,
        Err(SyncError::Inactive)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unentitled_session_does_not_sync() {
    let h = harness();
    h.seed_local(&links("a", 2));
    let outcome = h.app.set_session(Some(USER), false).await.unwrap();
    assert_eq!(outcome, None);
    assert!(!h.app.sync.is_active());
    assert_eq!(h.remote.fetch_count(), 0);
}
