//! The webhook endpoint contract: 204 on accepted events, 400 on garbage,
//! 403 when the page/space filter says the event is not ours.

use crate::domain::{RemoteEvent, RemoteEventKind};
use crate::sources::{webhook_router, WebhookFilter, WebhookState};
use axum::body::Body;
use http::{Request, StatusCode};
use tokio::sync::mpsc;
use tower::ServiceExt;

fn post(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn space_state(space: &str) -> (axum::Router, mpsc::Receiver<RemoteEvent>) {
    let (tx, rx) = mpsc::channel(16);
    let state = WebhookState {
        filter: WebhookFilter::Space(space.to_string()),
        events: tx,
    };
    (webhook_router(state), rx)
}

#[tokio::test]
async fn test_page_updated_dispatches_changed() {
    let (app, mut rx) = space_state("DOC");

    let response = app
        .oneshot(post(
            r#"{"eventType":"page_updated","page":{"id":"p1","title":"Hello","spaceKey":"DOC"}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let event = rx.try_recv().expect("event should have been dispatched");
    assert_eq!(event, RemoteEvent { page_id: "p1".into(), kind: RemoteEventKind::Changed });
}

#[tokio::test]
async fn test_page_created_and_removed_kinds() {
    let (app, mut rx) = space_state("DOC");

    let response = app
        .clone()
        .oneshot(post(
            r#"{"eventType":"page_created","page":{"id":"p2","spaceKey":"DOC"}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(rx.try_recv().unwrap().kind, RemoteEventKind::Created);

    let response = app
        .oneshot(post(
            r#"{"eventType":"page_trashed","page":{"id":"p2","spaceKey":"DOC"}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(rx.try_recv().unwrap().kind, RemoteEventKind::Deleted);
}

#[tokio::test]
async fn test_malformed_payload_is_rejected() {
    let (app, mut rx) = space_state("DOC");

    let response = app.clone().oneshot(post("{not json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // valid json, wrong shape
    let response = app.oneshot(post(r#"{"something":"else"}"#)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(rx.try_recv().is_err(), "nothing may be dispatched");
}

#[tokio::test]
async fn test_unknown_event_type_is_rejected() {
    let (app, mut rx) = space_state("DOC");

    let response = app
        .oneshot(post(
            r#"{"eventType":"page_liked","page":{"id":"p1","spaceKey":"DOC"}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_space_filter_rejects_foreign_events() {
    let (app, mut rx) = space_state("DOC");

    // wrong space
    let response = app
        .clone()
        .oneshot(post(
            r#"{"eventType":"page_updated","page":{"id":"p1","spaceKey":"OTHER"}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // no space key at all: cannot be attributed, also rejected
    let response = app
        .oneshot(post(r#"{"eventType":"page_updated","page":{"id":"p1"}}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    assert!(rx.try_recv().is_err(), "filtered events are not dispatched");
}

#[tokio::test]
async fn test_page_filter_accepts_only_its_page() {
    let (tx, mut rx) = mpsc::channel(16);
    let state = WebhookState { filter: WebhookFilter::Page("p42".to_string()), events: tx };
    let app = webhook_router(state);

    let response = app
        .clone()
        .oneshot(post(
            r#"{"eventType":"page_updated","page":{"id":"p42","spaceKey":"DOC"}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(rx.try_recv().unwrap().page_id, "p42");

    let response = app
        .oneshot(post(
            r#"{"eventType":"page_updated","page":{"id":"p7","spaceKey":"DOC"}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(rx.try_recv().is_err());
}
