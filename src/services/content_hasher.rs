//! Change-detection fingerprint of a bookmark tree.
//!
//! Not a security primitive. Two trees hash equal exactly when they have the
//! same nodes with the same field values in the same per-folder order.

use ring::digest::{Context, SHA256};
use std::fmt;

use crate::types::bookmark::Bookmark;

/// Hex-encoded SHA-256 over a canonical walk of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(tree: &[Bookmark]) -> Self {
        let mut ctx = Context::new(&SHA256);
        write_level(&mut ctx, tree);
        let digest = ctx.finish();
        let hex = digest
            .as_ref()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<String>();
        ContentHash(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Every field is tagged and length-prefixed so adjacent values cannot alias.
fn write_level(ctx: &mut Context, nodes: &[Bookmark]) {
    ctx.update(b"[");
    ctx.update(&(nodes.len() as u64).to_le_bytes());
    for node in nodes {
        write_node(ctx, node);
    }
    ctx.update(b"]");
}

fn write_node(ctx: &mut Context, node: &Bookmark) {
    write_str(ctx, b'i', Some(&node.id));
    write_str(ctx, b'u', node.url.as_deref());
    write_str(ctx, b't', node.title.as_deref());
    ctx.update(&[b'p', node.incognito as u8, b'f', node.is_folder as u8]);
    write_i64(ctx, b'd', node.date_added);
    write_i64(ctx, b'm', node.updated_at);
    match &node.children {
        Some(children) => {
            ctx.update(b"c");
            write_level(ctx, children);
        }
        None => ctx.update(b"-"),
    }
}

fn write_str(ctx: &mut Context, tag: u8, value: Option<&str>) {
    match value {
        Some(s) => {
            ctx.update(&[tag, 1]);
            ctx.update(&(s.len() as u64).to_le_bytes());
            ctx.update(s.as_bytes());
        }
        None => ctx.update(&[tag, 0]),
    }
}

fn write_i64(ctx: &mut Context, tag: u8, value: Option<i64>) {
    match value {
        Some(v) => {
            ctx.update(&[tag, 1]);
            ctx.update(&v.to_le_bytes());
        }
        None => ctx.update(&[tag, 0]),
    }
}
