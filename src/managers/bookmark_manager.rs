//! Bookmark Manager for marksync.
//!
//! Implements `BookmarkManagerTrait`: edits of the local bookmark tree made on
//! behalf of the user. Every edit rewrites the whole tree through the local
//! store, which is what the sync engine's change listener observes.

use tracing::debug;

use crate::managers::storage_manager::{LocalStore, WriteOrigin};
use crate::managers::tombstone_manager::TombstoneTracker;
use crate::services::bookmark_tree::{find_by_id, find_by_id_mut, insert_into_folder, move_node, remove_by_id};
use crate::types::bookmark::{Bookmark, BookmarkTree};
use crate::types::errors::BookmarkError;

/// Trait defining bookmark management operations.
pub trait BookmarkManagerTrait {
    fn get_bookmarks(&self) -> Result<BookmarkTree, BookmarkError>;
    fn add_bookmark(&mut self, url: &str, title: &str, folder_id: Option<&str>, incognito: bool) -> Result<String, BookmarkError>;
    fn create_folder(&mut self, title: &str, parent_id: Option<&str>) -> Result<String, BookmarkError>;
    fn update_bookmark(&mut self, id: &str, url: Option<&str>, title: Option<&str>) -> Result<(), BookmarkError>;
    fn move_bookmark(&mut self, id: &str, folder_id: Option<&str>) -> Result<(), BookmarkError>;
    fn delete_bookmark(&mut self, id: &str) -> Result<(), BookmarkError>;
    /// Replaces the whole tree, as an import or drag-and-drop reorder does.
    fn replace_all(&mut self, tree: BookmarkTree) -> Result<(), BookmarkError>;
    fn clear_all(&mut self) -> Result<(), BookmarkError>;
}

/// Bookmark manager over the local store.
pub struct BookmarkManager<'a> {
    store: &'a LocalStore,
    tombstones: &'a TombstoneTracker,
    record_tombstones: bool,
}

impl<'a> BookmarkManager<'a> {
    /// Creates a manager. With `record_tombstones` set (device offline or
    /// user not entitled to sync), deletions are remembered for the next
    /// reconciliation.
    pub fn new(store: &'a LocalStore, tombstones: &'a TombstoneTracker, record_tombstones: bool) -> Self {
        Self {
            store,
            tombstones,
            record_tombstones,
        }
    }

    fn save(&self, tree: &BookmarkTree) -> Result<(), BookmarkError> {
        self.store.save_bookmarks(tree, WriteOrigin::User)?;
        Ok(())
    }

    /// The level a new child of `folder_id` would land in.
    fn level<'t>(tree: &'t BookmarkTree, folder_id: Option<&str>) -> Result<&'t [Bookmark], BookmarkError> {
        match folder_id {
            None => Ok(tree),
            Some(fid) => match find_by_id(tree, fid) {
                Some(folder) if folder.is_folder => Ok(folder.children()),
                _ => Err(BookmarkError::FolderNotFound(fid.to_string())),
            },
        }
    }
}

fn collect_ids(node: &Bookmark, out: &mut Vec<String>) {
    out.push(node.id.clone());
    for child in node.children() {
        collect_ids(child, out);
    }
}

impl<'a> BookmarkManagerTrait for BookmarkManager<'a> {
    fn get_bookmarks(&self) -> Result<BookmarkTree, BookmarkError> {
        Ok(self.store.load_bookmarks()?)
    }

    /// Adds a link. Returns the generated ID. A URL already saved at the same
    /// level is rejected.
    fn add_bookmark(
        &mut self,
        url: &str,
        title: &str,
        folder_id: Option<&str>,
        incognito: bool,
    ) -> Result<String, BookmarkError> {
        let mut tree = self.store.load_bookmarks()?;
        let duplicate = Self::level(&tree, folder_id)?
            .iter()
            .any(|node| node.url.as_deref() == Some(url));
        if duplicate {
            return Err(BookmarkError::DuplicateUrl(url.to_string()));
        }

        let mut bookmark = Bookmark::link(url, title);
        bookmark.incognito = incognito;
        let id = bookmark.id.clone();
        insert_into_folder(&mut tree, folder_id, bookmark)?;
        self.save(&tree)?;
        Ok(id)
    }

    fn create_folder(&mut self, title: &str, parent_id: Option<&str>) -> Result<String, BookmarkError> {
        let mut tree = self.store.load_bookmarks()?;
        let folder = Bookmark::folder(title, Vec::new());
        let id = folder.id.clone();
        insert_into_folder(&mut tree, parent_id, folder)?;
        self.save(&tree)?;
        Ok(id)
    }

    /// Updates the url and/or title and bumps `updatedAt`.
    fn update_bookmark(
        &mut self,
        id: &str,
        url: Option<&str>,
        title: Option<&str>,
    ) -> Result<(), BookmarkError> {
        let mut tree = self.store.load_bookmarks()?;
        let node = find_by_id_mut(&mut tree, id).ok_or_else(|| BookmarkError::NotFound(id.to_string()))?;

        if let Some(u) = url {
            if node.is_folder {
                return Err(BookmarkError::InvalidEdit(format!("folder {} cannot have a url", id)));
            }
            node.url = Some(u.to_string());
        }
        if let Some(t) = title {
            node.title = Some(t.to_string());
        }
        node.touch();
        self.save(&tree)
    }

    /// Moves a bookmark or folder to a different folder (or to root if `folder_id` is `None`).
    fn move_bookmark(&mut self, id: &str, folder_id: Option<&str>) -> Result<(), BookmarkError> {
        let mut tree = self.store.load_bookmarks()?;
        move_node(&mut tree, id, folder_id)?;
        self.save(&tree)
    }

    /// Deletes a node and its subtree.
    fn delete_bookmark(&mut self, id: &str) -> Result<(), BookmarkError> {
        let mut tree = self.store.load_bookmarks()?;
        let removed = remove_by_id(&mut tree, id).ok_or_else(|| BookmarkError::NotFound(id.to_string()))?;

        // Record tombstones before the tree write.
        if self.record_tombstones {
            let mut ids = Vec::new();
            collect_ids(&removed, &mut ids);
            for removed_id in &ids {
                self.tombstones.track_deletion(removed_id)?;
            }
            debug!(count = ids.len(), "recorded tombstones for offline deletion");
        }
        self.save(&tree)
    }

    fn replace_all(&mut self, tree: BookmarkTree) -> Result<(), BookmarkError> {
        self.save(&tree)
    }

    fn clear_all(&mut self) -> Result<(), BookmarkError> {
        self.save(&Vec::new())
    }
}
