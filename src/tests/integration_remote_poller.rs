//! The poller against the scripted remote: version diffs become events,
//! the first listing only seeds the snapshot, shutdown stops the loop.

use crate::config::SyncScope;
use crate::domain::{RemoteEvent, RemoteEventKind};
use crate::sources::Poller;
use crate::tests::support::{remote_page, MockRemote};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

async fn expect_event(rx: &mut mpsc::Receiver<RemoteEvent>) -> RemoteEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a poll event")
        .expect("channel closed")
}

#[tokio::test]
async fn test_poller_emits_created_changed_deleted() {
    let remote = MockRemote::new();
    remote.put_page(remote_page("p1", "One", "<p>1</p>", 1));

    let (tx, mut rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = Poller::new(
        remote.clone(),
        SyncScope::Space { space_key: "DOC".to_string() },
        Duration::from_millis(50),
        tx,
    );
    let handle = tokio::spawn(poller.run(shutdown_rx));

    // give the first tick time to build the snapshot, then create a page
    tokio::time::sleep(Duration::from_millis(200)).await;
    remote.put_page(remote_page("p2", "Two", "<p>2</p>", 1));

    let event = expect_event(&mut rx).await;
    assert_eq!(event, RemoteEvent { page_id: "p2".into(), kind: RemoteEventKind::Created });

    // bump a version
    let mut page = remote.page("p1").unwrap();
    page.version = 2;
    remote.put_page(page);
    let event = expect_event(&mut rx).await;
    assert_eq!(event, RemoteEvent { page_id: "p1".into(), kind: RemoteEventKind::Changed });

    // delete a page
    remote.pages.lock().unwrap().remove("p2");
    let event = expect_event(&mut rx).await;
    assert_eq!(event, RemoteEvent { page_id: "p2".into(), kind: RemoteEventKind::Deleted });

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}

#[tokio::test]
async fn test_unchanged_pages_stay_quiet() {
    let remote = MockRemote::new();
    remote.put_page(remote_page("p1", "One", "<p>1</p>", 1));

    let (tx, mut rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = Poller::new(
        remote.clone(),
        SyncScope::Space { space_key: "DOC".to_string() },
        Duration::from_millis(50),
        tx,
    );
    let handle = tokio::spawn(poller.run(shutdown_rx));

    // several ticks pass; the unchanged page must not produce anything
    let quiet = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
    assert!(quiet.is_err(), "unexpected event: {:?}", quiet);

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}
