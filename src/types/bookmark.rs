use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A full bookmark tree as stored under the `bookmarks` key.
pub type BookmarkTree = Vec<Bookmark>;

/// A node in the bookmark tree: either a link (has `url`) or a folder
/// (`is_folder`, has `children`).
///
/// Field names follow the extension's storage format (camelCase) so trees
/// written by the UI layer deserialize unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub incognito: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_folder: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Bookmark>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_added: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

impl Bookmark {
    /// Creates a link bookmark with a fresh ID.
    pub fn link(url: &str, title: &str) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            url: Some(url.to_string()),
            title: Some(title.to_string()),
            date_added: Some(now),
            updated_at: Some(now),
            ..Default::default()
        }
    }

    /// Creates a folder with a fresh ID.
    pub fn folder(title: &str, children: Vec<Bookmark>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            title: Some(title.to_string()),
            is_folder: true,
            children: Some(children),
            date_added: Some(now),
            updated_at: Some(now),
            ..Default::default()
        }
    }

    /// Children of a folder; empty for links.
    pub fn children(&self) -> &[Bookmark] {
        self.children.as_deref().unwrap_or(&[])
    }

    /// The timestamp used to pick a winner when two copies of a link meet.
    pub fn last_modified(&self) -> Option<i64> {
        self.updated_at.or(self.date_added)
    }

    /// Marks the node as edited now.
    pub fn touch(&mut self) {
        self.updated_at = Some(now_millis());
    }
}
