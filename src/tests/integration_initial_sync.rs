//! Startup binding: front-matter identities, legacy sidecars, and the
//! catch-up pulls and pushes queued for work that happened while the
//! daemon was down.

use crate::content::frontmatter::{self, PageFrontMatter};
use crate::domain::SyncStatus;
use crate::hierarchy::ignore::IgnoreSet;
use crate::store::StateStore;
use crate::tests::support::{remote_page, setup_engine};

fn bound_file(id: &str, title: &str, version: i64, body: &str) -> String {
    frontmatter::write(
        &PageFrontMatter {
            id: Some(id.to_string()),
            title: Some(title.to_string()),
            space: Some("DOC".to_string()),
            version: Some(version),
            labels: None,
        },
        body,
    )
}

// a file edited while the daemon was down pushes at startup
#[tokio::test]
async fn test_offline_edit_is_pushed_at_startup() {
    let h = setup_engine().await;
    h.remote.put_page(remote_page("p1", "Hello", "<p>Hi</p>", 1));
    h.write_file("hello.md", &bound_file("p1", "Hello", 1, "Edited offline\n"));

    let ignore = IgnoreSet::load(h.workdir.path(), ".espejo");
    h.engine.initial_sync(&ignore).await.unwrap();
    h.drain_queue().await;

    let updates = h.remote.updates.lock().unwrap().clone();
    assert_eq!(updates.len(), 1, "the offline edit should push exactly once");
    assert_eq!(updates[0].version, 2);
    assert!(updates[0].storage.contains("Edited offline"));

    let record = h.store.get_page("p1").await.unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert_eq!(record.version, 2);
}

// a remote page that moved ahead while the daemon was down pulls at startup
#[tokio::test]
async fn test_remote_ahead_is_pulled_at_startup() {
    let h = setup_engine().await;

    // the local file matches version 1, the remote is already at 2
    h.remote.put_page(remote_page("p1", "Hello", "<p>New content</p>", 2));
    h.write_file("hello.md", &bound_file("p1", "Hello", 1, "Hi\n"));
    // pretend version 1 was fully synced once
    h.store.write_base("p1", "Hi\n").await.unwrap();

    let ignore = IgnoreSet::load(h.workdir.path(), ".espejo");
    h.engine.initial_sync(&ignore).await.unwrap();
    h.drain_queue().await;

    let body = frontmatter::parse(&h.read_file("hello.md"), "hello.md").1;
    assert!(body.contains("New content"));

    let record = h.store.get_page("p1").await.unwrap().unwrap();
    assert_eq!(record.version, 2);
    assert_eq!(record.sync_status, SyncStatus::Synced);
}

// legacy sidecar files resolve the binding and are removed
#[tokio::test]
async fn test_legacy_sidecar_migration() {
    let h = setup_engine().await;
    h.remote.put_page(remote_page("p9", "Old Page", "<p>remote body</p>", 2));

    h.write_file("old-page.md", "local body without a header\n");
    h.write_file("old-page.md.meta.json", r#"{"pageId":"p9","title":"Old Page"}"#);

    let ignore = IgnoreSet::load(h.workdir.path(), ".espejo");
    h.engine.initial_sync(&ignore).await.unwrap();

    assert!(
        !h.workdir.path().join("old-page.md.meta.json").exists(),
        "sidecar should be consumed"
    );
    assert_eq!(
        h.store.page_for_path("old-page.md").await.unwrap().unwrap(),
        "p9"
    );

    // the remote is ahead and there is no base: reconciliation surfaces a
    // conflict instead of guessing
    h.drain_queue().await;
    let record = h.store.get_page("p9").await.unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Conflict);
}

// untracked files without any binding stay untouched at startup
#[tokio::test]
async fn test_untracked_files_are_left_alone() {
    let h = setup_engine().await;
    h.write_file("scratch.md", "# Scratch\n");

    let ignore = IgnoreSet::load(h.workdir.path(), ".espejo");
    h.engine.initial_sync(&ignore).await.unwrap();
    h.drain_queue().await;

    assert!(h.store.page_for_path("scratch.md").await.unwrap().is_none());
    assert_eq!(h.read_file("scratch.md"), "# Scratch\n");
    assert!(h.remote.created.lock().unwrap().is_empty(), "initial sync never auto-creates");
}
