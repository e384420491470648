//! RPC method handler for the marksync JSON-RPC protocol.
//!
//! Extracted from `rpc_server.rs` so it can be unit-tested independently.
//! `handle_method` dispatches calls from the extension host to the sync
//! manager and the bookmark editor on the `App`.

use serde_json::{json, Value};

use crate::app::App;
use crate::managers::bookmark_manager::BookmarkManagerTrait;
use crate::managers::sync_manager::SyncManagerTrait;
use crate::types::bookmark::BookmarkTree;
use crate::types::sync::ConflictChoice;

fn str_param<'a>(params: &'a Value, name: &str) -> Result<&'a str, String> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing {}", name))
}

fn opt_str_param<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
    params.get(name).and_then(|v| v.as_str())
}

fn check_url(url: &str) -> Result<(), String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err("invalid url: must start with http:// or https://".to_string());
    }
    Ok(())
}

/// Dispatch a JSON-RPC method call to the appropriate handler.
///
/// Returns `Ok(Value)` on success or `Err(String)` with an error message.
pub async fn handle_method(app: &App, method: &str, params: &Value) -> Result<Value, String> {
    match method {
        // ─── Session ───
        "session.set" => {
            let user_id = opt_str_param(params, "userId");
            let entitled = params.get("entitled").and_then(|v| v.as_bool()).unwrap_or(false);
            let outcome = app
                .set_session(user_id, entitled)
                .await
                .map_err(|e| e.to_string())?;
            Ok(json!({"active": app.sync.is_active(), "outcome": outcome.map(|o| format!("{:?}", o))}))
        }

        // ─── Sync ───
        "sync.init" => {
            let user_id = str_param(params, "userId")?;
            let outcome = app.sync.init_sync(user_id).await.map_err(|e| e.to_string())?;
            Ok(json!({"outcome": format!("{:?}", outcome)}))
        }
        "sync.stop" => {
            app.sync.stop_sync();
            Ok(json!({"ok": true}))
        }
        "sync.force" => {
            let attempted = app.sync.force_sync_bookmarks().await;
            Ok(json!({"attempted": attempted}))
        }
        "sync.status" => {
            serde_json::to_value(app.sync.get_sync_status()).map_err(|e| e.to_string())
        }
        "sync.conflict" => {
            let record = app.sync.conflict().map_err(|e| e.to_string())?;
            serde_json::to_value(record).map_err(|e| e.to_string())
        }
        "sync.resolveConflict" => {
            let choice: ConflictChoice = str_param(params, "choice")?.parse()?;
            app.sync
                .resolve_conflict(choice)
                .await
                .map_err(|e| e.to_string())?;
            Ok(json!({"ok": true}))
        }

        // ─── Bookmarks ───
        "bookmarks.get" => {
            let tree = app.bookmarks().get_bookmarks().map_err(|e| e.to_string())?;
            serde_json::to_value(tree).map_err(|e| e.to_string())
        }
        "bookmarks.set" => {
            let raw = params.get("bookmarks").cloned().ok_or("missing bookmarks")?;
            let tree: BookmarkTree = serde_json::from_value(raw).map_err(|e| format!("invalid bookmarks: {}", e))?;
            app.bookmarks().replace_all(tree).map_err(|e| e.to_string())?;
            Ok(json!({"ok": true}))
        }
        "bookmarks.add" => {
            let url = str_param(params, "url")?;
            let title = str_param(params, "title")?;
            check_url(url)?;
            let folder = opt_str_param(params, "folderId");
            let incognito = params.get("incognito").and_then(|v| v.as_bool()).unwrap_or(false);
            let id = app
                .bookmarks()
                .add_bookmark(url, title, folder, incognito)
                .map_err(|e| e.to_string())?;
            Ok(json!({"id": id, "url": url, "title": title}))
        }
        "bookmarks.createFolder" => {
            let title = str_param(params, "title")?;
            let parent = opt_str_param(params, "parentId");
            let id = app
                .bookmarks()
                .create_folder(title, parent)
                .map_err(|e| e.to_string())?;
            Ok(json!({"id": id}))
        }
        "bookmarks.update" => {
            let id = str_param(params, "id")?;
            let url = opt_str_param(params, "url");
            if let Some(u) = url {
                check_url(u)?;
            }
            let title = opt_str_param(params, "title");
            app.bookmarks()
                .update_bookmark(id, url, title)
                .map_err(|e| e.to_string())?;
            Ok(json!({"ok": true}))
        }
        "bookmarks.move" => {
            let id = str_param(params, "id")?;
            let folder = opt_str_param(params, "folderId");
            app.bookmarks()
                .move_bookmark(id, folder)
                .map_err(|e| e.to_string())?;
            Ok(json!({"ok": true}))
        }
        "bookmarks.delete" => {
            let id = str_param(params, "id")?;
            app.bookmarks().delete_bookmark(id).map_err(|e| e.to_string())?;
            Ok(json!({"ok": true}))
        }
        "bookmarks.clear" => {
            app.bookmarks().clear_all().map_err(|e| e.to_string())?;
            Ok(json!({"ok": true}))
        }

        _ => Err(format!("unknown method: {}", method)),
    }
}
