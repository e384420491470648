//! Recursive helpers over the nested bookmark tree.

use std::collections::BTreeSet;

use crate::types::bookmark::Bookmark;
use crate::types::errors::BookmarkError;

/// Total number of nodes, folders included, at every depth.
pub fn count_bookmarks(tree: &[Bookmark]) -> usize {
    tree.iter()
        .map(|node| 1 + count_bookmarks(node.children()))
        .sum()
}

/// IDs of every node at every depth.
pub fn collect_ids(tree: &[Bookmark]) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    let mut stack: Vec<&Bookmark> = tree.iter().collect();
    while let Some(node) = stack.pop() {
        ids.insert(node.id.clone());
        stack.extend(node.children());
    }
    ids
}

pub fn find_by_id<'a>(tree: &'a [Bookmark], id: &str) -> Option<&'a Bookmark> {
    for node in tree {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = find_by_id(node.children(), id) {
            return Some(found);
        }
    }
    None
}

pub fn find_by_id_mut<'a>(tree: &'a mut [Bookmark], id: &str) -> Option<&'a mut Bookmark> {
    for node in tree.iter_mut() {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = node
            .children
            .as_deref_mut()
            .and_then(|children| find_by_id_mut(children, id))
        {
            return Some(found);
        }
    }
    None
}

/// Detaches the node with `id` from wherever it sits and returns it.
pub fn remove_by_id(tree: &mut Vec<Bookmark>, id: &str) -> Option<Bookmark> {
    if let Some(pos) = tree.iter().position(|node| node.id == id) {
        return Some(tree.remove(pos));
    }
    tree.iter_mut()
        .filter_map(|node| node.children.as_mut())
        .find_map(|children| remove_by_id(children, id))
}

/// Appends `node` to the folder `folder_id`, or to the root level when `None`.
pub fn insert_into_folder(
    tree: &mut Vec<Bookmark>,
    folder_id: Option<&str>,
    node: Bookmark,
) -> Result<(), BookmarkError> {
    let Some(folder_id) = folder_id else {
        tree.push(node);
        return Ok(());
    };

    match find_by_id_mut(tree, folder_id) {
        Some(folder) if folder.is_folder => {
            folder.children.get_or_insert_with(Vec::new).push(node);
            Ok(())
        }
        _ => Err(BookmarkError::FolderNotFound(folder_id.to_string())),
    }
}

/// Moves a node under another folder (or to the root level).
///
/// The tree is left untouched if the target is missing or lies inside the
/// node being moved.
pub fn move_node(
    tree: &mut Vec<Bookmark>,
    id: &str,
    target_folder: Option<&str>,
) -> Result<(), BookmarkError> {
    let node = find_by_id(tree, id).ok_or_else(|| BookmarkError::NotFound(id.to_string()))?;

    if let Some(target) = target_folder {
        if target == id || find_by_id(node.children(), target).is_some() {
            return Err(BookmarkError::InvalidMove(format!(
                "cannot move {} into its own subtree",
                id
            )));
        }
        match find_by_id(tree, target) {
            Some(folder) if folder.is_folder => {}
            _ => return Err(BookmarkError::FolderNotFound(target.to_string())),
        }
    }

    let mut node = remove_by_id(tree, id).ok_or_else(|| BookmarkError::NotFound(id.to_string()))?;
    node.touch();
    insert_into_folder(tree, target_folder, node)
}
