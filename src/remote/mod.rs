//! The narrow surface the sync engine consumes from the remote system. The
//! real HTTP adapter lives in `http`; tests substitute scripted fakes the
//! same way the store is faked.

use crate::config::SyncScope;
use crate::domain::Ancestor;
use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub mod convert;
pub mod http;

pub use self::convert::{StorageConverter, XhtmlConverter};
pub use self::http::HttpRemote;

/// A full page as returned by `get_page`: metadata plus the storage-format
/// body. Contributor counts ride along so pulls can refresh the store
/// without extra round trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePage {
    pub id: String,
    pub title: String,
    pub space_key: String,
    pub version: i64,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Root first, parent last.
    #[serde(default)]
    pub ancestors: Vec<Ancestor>,
    pub storage: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub is_restricted: bool,
    #[serde(default)]
    pub version_count: i64,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub modified_by: Option<String>,
    #[serde(default)]
    pub modified_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub contributors: Vec<RemoteContributor>,
}

fn default_status() -> String {
    "current".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteContributor {
    pub user_id: String,
    pub contributions: i64,
    #[serde(default)]
    pub last_contributed_at: Option<NaiveDateTime>,
}

/// The lightweight listing shape the poller diffs on every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub id: String,
    pub title: String,
    pub version: i64,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageUpdate {
    pub id: String,
    pub title: String,
    pub storage: String,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCreate {
    pub space_key: String,
    pub title: String,
    pub storage: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUser {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn get_page(&self, page_id: &str) -> Result<RemotePage>;
    /// All pages in the configured scope with their current versions.
    async fn list_pages(&self, scope: &SyncScope) -> Result<Vec<PageSummary>>;
    async fn update_page(&self, update: &PageUpdate) -> Result<RemotePage>;
    async fn create_page(&self, create: &PageCreate) -> Result<RemotePage>;
    async fn delete_page(&self, page_id: &str) -> Result<()>;
    async fn archive_page(&self, page_id: &str) -> Result<()>;

    async fn get_labels(&self, page_id: &str) -> Result<Vec<String>>;
    async fn add_label(&self, page_id: &str, label: &str) -> Result<()>;
    async fn remove_label(&self, page_id: &str, label: &str) -> Result<()>;

    async fn list_attachments(&self, page_id: &str) -> Result<Vec<String>>;
    async fn upload_attachment(&self, page_id: &str, filename: &str, bytes: Vec<u8>) -> Result<()>;
    async fn update_attachment(&self, page_id: &str, filename: &str, bytes: Vec<u8>) -> Result<()>;

    async fn get_users_bulk(&self, user_ids: &[String]) -> Result<Vec<RemoteUser>>;
    async fn register_webhook(&self, callback_url: &str) -> Result<()>;
}
