//! Thin reqwest adapter for the remote page API. Deliberately plain: bearer
//! auth, JSON bodies, one request per call. Pagination and retry belong to
//! the caller's poll loop, not here.

use crate::config::SyncScope;
use crate::error::{Result, SyncError};
use crate::remote::{PageCreate, PageSummary, PageUpdate, RemoteClient, RemotePage, RemoteUser};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpRemote {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Validation(format!("HTTP client setup failed: {}", e)))?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self { client, base_url, token: token.into() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Maps transport and status failures onto the error taxonomy: 401/403
    /// are auth, 404 is permanent for the page in question, everything else
    /// is transient and retried by the next tick.
    async fn check(&self, response: Response, page_id: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SyncError::Auth(format!(
                "remote returned {}; credentials missing or expired",
                status
            ))),
            StatusCode::NOT_FOUND => Err(SyncError::RemotePermanent {
                page_id: page_id.to_string(),
                reason: "404 not found".to_string(),
            }),
            _ => Err(SyncError::RemoteTransient(format!("remote returned {}", status))),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str, page_id: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::RemoteTransient(e.to_string()))?;
        let response = self.check(response, page_id).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::RemoteTransient(format!("malformed response: {}", e)))
    }
}

#[async_trait]
impl RemoteClient for HttpRemote {
    async fn get_page(&self, page_id: &str) -> Result<RemotePage> {
        self.get_json(&format!("/api/pages/{}", page_id), page_id).await
    }

    async fn list_pages(&self, scope: &SyncScope) -> Result<Vec<PageSummary>> {
        match scope {
            SyncScope::Page { page_id } => {
                let one: PageSummary = self
                    .get_json(&format!("/api/pages/{}/summary", page_id), page_id)
                    .await?;
                Ok(vec![one])
            }
            SyncScope::Subtree { ancestor_id } => {
                self.get_json(&format!("/api/pages/{}/descendants", ancestor_id), ancestor_id)
                    .await
            }
            SyncScope::Space { space_key } => {
                self.get_json(&format!("/api/spaces/{}/pages", space_key), "").await
            }
        }
    }

    async fn update_page(&self, update: &PageUpdate) -> Result<RemotePage> {
        let response = self
            .client
            .put(self.url(&format!("/api/pages/{}", update.id)))
            .bearer_auth(&self.token)
            .json(update)
            .send()
            .await
            .map_err(|e| SyncError::RemoteTransient(e.to_string()))?;
        let response = self.check(response, &update.id).await?;
        response
            .json::<RemotePage>()
            .await
            .map_err(|e| SyncError::RemoteTransient(format!("malformed response: {}", e)))
    }

    async fn create_page(&self, create: &PageCreate) -> Result<RemotePage> {
        let response = self
            .client
            .post(self.url("/api/pages"))
            .bearer_auth(&self.token)
            .json(create)
            .send()
            .await
            .map_err(|e| SyncError::RemoteTransient(e.to_string()))?;
        let response = self.check(response, "").await?;
        response
            .json::<RemotePage>()
            .await
            .map_err(|e| SyncError::RemoteTransient(format!("malformed response: {}", e)))
    }

    async fn delete_page(&self, page_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/api/pages/{}", page_id)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::RemoteTransient(e.to_string()))?;
        self.check(response, page_id).await?;
        Ok(())
    }

    async fn archive_page(&self, page_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/api/pages/{}/archive", page_id)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::RemoteTransient(e.to_string()))?;
        self.check(response, page_id).await?;
        Ok(())
    }

    async fn get_labels(&self, page_id: &str) -> Result<Vec<String>> {
        self.get_json(&format!("/api/pages/{}/labels", page_id), page_id).await
    }

    async fn add_label(&self, page_id: &str, label: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/api/pages/{}/labels", page_id)))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "label": label }))
            .send()
            .await
            .map_err(|e| SyncError::RemoteTransient(e.to_string()))?;
        self.check(response, page_id).await?;
        Ok(())
    }

    async fn remove_label(&self, page_id: &str, label: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/api/pages/{}/labels/{}", page_id, label)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::RemoteTransient(e.to_string()))?;
        self.check(response, page_id).await?;
        Ok(())
    }

    async fn list_attachments(&self, page_id: &str) -> Result<Vec<String>> {
        self.get_json(&format!("/api/pages/{}/attachments", page_id), page_id).await
    }

    async fn upload_attachment(&self, page_id: &str, filename: &str, bytes: Vec<u8>) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/api/pages/{}/attachments/{}", page_id, filename)))
            .bearer_auth(&self.token)
            .body(bytes)
            .send()
            .await
            .map_err(|e| SyncError::RemoteTransient(e.to_string()))?;
        self.check(response, page_id).await?;
        Ok(())
    }

    async fn update_attachment(&self, page_id: &str, filename: &str, bytes: Vec<u8>) -> Result<()> {
        let response = self
            .client
            .put(self.url(&format!("/api/pages/{}/attachments/{}", page_id, filename)))
            .bearer_auth(&self.token)
            .body(bytes)
            .send()
            .await
            .map_err(|e| SyncError::RemoteTransient(e.to_string()))?;
        self.check(response, page_id).await?;
        Ok(())
    }

    async fn get_users_bulk(&self, user_ids: &[String]) -> Result<Vec<RemoteUser>> {
        let response = self
            .client
            .post(self.url("/api/users/bulk"))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "ids": user_ids }))
            .send()
            .await
            .map_err(|e| SyncError::RemoteTransient(e.to_string()))?;
        let response = self.check(response, "").await?;
        response
            .json::<Vec<RemoteUser>>()
            .await
            .map_err(|e| SyncError::RemoteTransient(format!("malformed response: {}", e)))
    }

    async fn register_webhook(&self, callback_url: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("/api/webhooks"))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "url": callback_url }))
            .send()
            .await
            .map_err(|e| SyncError::RemoteTransient(e.to_string()))?;
        self.check(response, "").await?;
        Ok(())
    }
}
