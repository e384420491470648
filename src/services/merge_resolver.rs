//! Deterministic two-way merge of bookmark trees.
//!
//! Remote is the base. Folders are matched by ID and merged recursively,
//! links are matched by URL (the same page saved on two devices gets two IDs)
//! and the newer copy wins. Each output level lists folders first, then
//! links, each group in first-seen order (remote before local-only).

use std::collections::HashMap;

use crate::types::bookmark::{Bookmark, BookmarkTree};

/// Insertion-ordered map; a later insert under an existing key replaces the
/// value in place.
struct OrderedNodes<'a> {
    index: HashMap<&'a str, usize>,
    nodes: Vec<Bookmark>,
}

impl<'a> OrderedNodes<'a> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            nodes: Vec::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&Bookmark> {
        self.index.get(key).map(|&i| &self.nodes[i])
    }

    fn put(&mut self, key: &'a str, node: Bookmark) {
        match self.index.get(key) {
            Some(&i) => self.nodes[i] = node,
            None => {
                self.index.insert(key, self.nodes.len());
                self.nodes.push(node);
            }
        }
    }
}

/// Whether the local copy of a link should replace the remote one.
fn local_is_newer(local: &Bookmark, remote: &Bookmark) -> bool {
    match (local.last_modified(), remote.last_modified()) {
        (Some(l), Some(r)) => l > r,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

pub fn merge(local: &[Bookmark], remote: &[Bookmark]) -> BookmarkTree {
    let mut folders = OrderedNodes::new();
    let mut links = OrderedNodes::new();

    for node in remote {
        if node.is_folder {
            folders.put(&node.id, node.clone());
        } else if let Some(url) = node.url.as_deref() {
            links.put(url, node.clone());
        }
    }

    for node in local {
        if node.is_folder {
            let merged = match folders.get(&node.id) {
                Some(existing) => Bookmark {
                    children: Some(merge(node.children(), existing.children())),
                    ..existing.clone()
                },
                None => node.clone(),
            };
            folders.put(&node.id, merged);
        } else if let Some(url) = node.url.as_deref() {
            let take_local = links
                .get(url)
                .map_or(true, |existing| local_is_newer(node, existing));
            if take_local {
                links.put(url, node.clone());
            }
        }
    }

    let mut out = folders.nodes;
    out.extend(links.nodes);
    out
}
