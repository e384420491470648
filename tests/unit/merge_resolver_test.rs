//! Unit tests for the two-way bookmark merge.
//!
//! Covers the concurrent-edit scenarios the sync engine relies on: links
//! matched by URL with newest-wins, folders matched by ID and merged
//! recursively, and the folders-then-links ordering of every level.

use marksync::services::merge_resolver::merge;
use marksync::types::bookmark::Bookmark;
use rstest::rstest;

fn link(id: &str, url: &str, title: &str, updated_at: i64) -> Bookmark {
    Bookmark {
        id: id.into(),
        url: Some(url.into()),
        title: Some(title.into()),
        date_added: Some(updated_at),
        updated_at: Some(updated_at),
        ..Default::default()
    }
}

fn folder(id: &str, title: &str, children: Vec<Bookmark>) -> Bookmark {
    Bookmark {
        id: id.into(),
        title: Some(title.into()),
        is_folder: true,
        children: Some(children),
        date_added: Some(1),
        updated_at: Some(1),
        ..Default::default()
    }
}

fn titles(tree: &[Bookmark]) -> Vec<&str> {
    tree.iter().filter_map(|node| node.title.as_deref()).collect()
}

/// Device A renamed a link at t=300, device B saved it at t=200: A's title wins.
#[test]
fn test_concurrent_title_edit_newest_wins() {
    let local = vec![link("a-id", "https://a.com", "A2", 300)];
    let remote = vec![link("b-id", "https://a.com", "A1", 200)];

    let merged = merge(&local, &remote);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].title.as_deref(), Some("A2"));
    assert_eq!(merged[0].id, "a-id");
}

#[test]
fn test_older_local_edit_loses() {
    let local = vec![link("a-id", "https://a.com", "Stale", 100)];
    let remote = vec![link("b-id", "https://a.com", "Fresh", 200)];

    let merged = merge(&local, &remote);
    assert_eq!(titles(&merged), vec!["Fresh"]);
}

#[rstest]
#[case::local_newer(300, 200, "local")]
#[case::remote_newer(200, 300, "remote")]
#[case::tie_keeps_remote(250, 250, "remote")]
fn test_timestamp_rule(#[case] local_ts: i64, #[case] remote_ts: i64, #[case] winner: &str) {
    let merged = merge(
        &[link("l", "https://x.com", "local", local_ts)],
        &[link("r", "https://x.com", "remote", remote_ts)],
    );
    assert_eq!(titles(&merged), vec![winner]);
}

/// `updatedAt` takes precedence over `dateAdded` when picking the newer copy.
#[test]
fn test_updated_at_preferred_over_date_added() {
    let mut local = link("l", "https://x.com", "edited", 0);
    local.date_added = Some(10);
    local.updated_at = Some(500);
    let mut remote = link("r", "https://x.com", "original", 0);
    remote.date_added = Some(400);
    remote.updated_at = None;

    let merged = merge(&[local], &[remote]);
    assert_eq!(titles(&merged), vec!["edited"]);
}

#[test]
fn test_disjoint_links_are_unioned_remote_first() {
    let local = vec![link("1", "https://local.com", "Local", 1)];
    let remote = vec![link("2", "https://remote.com", "Remote", 1)];

    let merged = merge(&local, &remote);
    assert_eq!(titles(&merged), vec!["Remote", "Local"]);
}

#[test]
fn test_folders_merge_recursively_by_id() {
    let local = vec![folder(
        "work",
        "Work",
        vec![
            link("1", "https://shared.com", "Shared new", 50),
            link("2", "https://only-local.com", "Only local", 1),
        ],
    )];
    let remote = vec![folder(
        "work",
        "Work (remote)",
        vec![
            link("3", "https://shared.com", "Shared old", 10),
            link("4", "https://only-remote.com", "Only remote", 1),
        ],
    )];

    let merged = merge(&local, &remote);
    assert_eq!(merged.len(), 1);
    let work = &merged[0];
    assert!(work.is_folder);
    // Folder metadata comes from the remote copy.
    assert_eq!(work.title.as_deref(), Some("Work (remote)"));
    assert_eq!(
        titles(work.children()),
        vec!["Shared new", "Only remote", "Only local"]
    );
}

#[test]
fn test_folder_present_on_one_side_is_kept_whole() {
    let local = vec![folder(
        "new",
        "New",
        vec![link("1", "https://a.com", "A", 1)],
    )];
    let remote = vec![folder("old", "Old", Vec::new())];

    let merged = merge(&local, &remote);
    assert_eq!(titles(&merged), vec!["Old", "New"]);
    assert_eq!(merged[1].children().len(), 1);
}

#[test]
fn test_every_level_lists_folders_before_links() {
    let local = vec![
        link("1", "https://a.com", "A", 1),
        folder(
            "f1",
            "F1",
            vec![
                link("2", "https://b.com", "B", 1),
                folder("f2", "F2", Vec::new()),
            ],
        ),
    ];
    let remote = vec![link("3", "https://c.com", "C", 1)];

    let merged = merge(&local, &remote);
    assert_eq!(titles(&merged), vec!["F1", "C", "A"]);
    assert_eq!(titles(merged[0].children()), vec!["F2", "B"]);
}

#[test]
fn test_same_url_in_different_folders_stays_separate() {
    let local = vec![
        folder("f", "F", vec![link("1", "https://a.com", "In folder", 1)]),
        link("2", "https://a.com", "At root", 1),
    ];

    let merged = merge(&local, &[]);
    assert_eq!(merged.len(), 2);
    assert_eq!(titles(merged[0].children()), vec!["In folder"]);
    assert_eq!(merged[1].title.as_deref(), Some("At root"));
}

#[test]
fn test_empty_inputs() {
    assert!(merge(&[], &[]).is_empty());
    let only = vec![link("1", "https://a.com", "A", 1)];
    assert_eq!(merge(&only, &[]), only);
    assert_eq!(merge(&[], &only), only);
}
