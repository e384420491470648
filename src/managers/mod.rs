// marksync state managers
// Managers own persisted or long-lived state: local storage, tombstones, the failed-upload queue, bookmark edits, sync.

pub mod bookmark_manager;
pub mod failed_upload_queue;
pub mod storage_manager;
pub mod sync_manager;
pub mod tombstone_manager;
