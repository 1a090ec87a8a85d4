//! Embedded webhook receiver: the remote pushes page events to
//! `POST /webhook` instead of waiting for the next poll tick. Accepted
//! events join the same reconciliation channel as poller events.

use crate::domain::{RemoteEvent, RemoteEventKind};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Page-scoped daemons accept only their own page; space- and subtree-scoped
/// daemons accept anything carrying their space key.
#[derive(Debug, Clone)]
pub enum WebhookFilter {
    Page(String),
    Space(String),
}

impl WebhookFilter {
    fn accepts(&self, payload: &WebhookPayload) -> bool {
        match self {
            WebhookFilter::Page(page_id) => payload.page.id == *page_id,
            // an event without a space key cannot be attributed; reject it
            WebhookFilter::Space(space) => payload.page.space_key.as_deref() == Some(space),
        }
    }
}

#[derive(Clone)]
pub struct WebhookState {
    pub filter: WebhookFilter,
    pub events: mpsc::Sender<RemoteEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event_type: String,
    pub page: WebhookPage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPage {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub space_key: Option<String>,
}

pub fn webhook_router(state: WebhookState) -> Router {
    Router::new().route("/webhook", post(receive)).with_state(state)
}

async fn receive(
    State(state): State<WebhookState>,
    payload: Result<Json<WebhookPayload>, JsonRejection>,
) -> StatusCode {
    let Json(payload) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            warn!(error = %rejection, "malformed webhook payload");
            return StatusCode::BAD_REQUEST;
        }
    };

    let kind = match payload.event_type.as_str() {
        "page_created" => RemoteEventKind::Created,
        "page_updated" => RemoteEventKind::Changed,
        // removals are surfaced, never applied to local files
        "page_removed" | "page_trashed" => RemoteEventKind::Deleted,
        other => {
            warn!(event_type = other, "unknown webhook event type");
            return StatusCode::BAD_REQUEST;
        }
    };

    if !state.filter.accepts(&payload) {
        debug!(page_id = %payload.page.id, "webhook event outside scope, not dispatched");
        return StatusCode::FORBIDDEN;
    }

    info!(page_id = %payload.page.id, event = %payload.event_type, "webhook event accepted");
    if state
        .events
        .send(RemoteEvent { page_id: payload.page.id, kind })
        .await
        .is_err()
    {
        warn!("reconciliation channel closed, dropping webhook event");
    }
    StatusCode::NO_CONTENT
}

/// Binds the receiver and serves until the shutdown signal flips.
pub async fn serve(
    port: u16,
    state: WebhookState,
    mut shutdown: watch::Receiver<bool>,
) -> crate::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "webhook receiver listening");
    axum::serve(listener, webhook_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}
