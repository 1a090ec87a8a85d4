use crate::domain::{Contributor, LinkEdge, PageRecord, UserRecord};
use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;

pub mod model;
pub mod sqlite;

pub use self::sqlite::SqliteStore;

/// Filters for [`StateStore::list_pages`]. All fields combine with AND;
/// the default matches everything.
#[derive(Debug, Clone, Default)]
pub struct PageFilter {
    pub space_key: Option<String>,
    pub label: Option<String>,
    pub ancestor_id: Option<String>,
    pub modified_before: Option<NaiveDateTime>,
    pub content_status: Option<crate::domain::ContentStatus>,
    pub restricted: Option<bool>,
    pub min_version_count: Option<i64>,
}

/// The durable index behind the sync engine and the audit subsystem. One
/// implementation per backing store; the SQLite one is canonical. Every
/// operation is total, linearizable, and never blocks on network I/O. The
/// sync engine holds the only writing handle while the daemon runs; audits
/// read concurrently.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn upsert_page(&self, page: &PageRecord) -> Result<()>;
    async fn get_page(&self, page_id: &str) -> Result<Option<PageRecord>>;
    async fn list_pages(&self, filter: &PageFilter) -> Result<Vec<PageRecord>>;
    /// Removes the page and everything hanging off it (links, labels,
    /// contributors, attachments, path binding, base content) atomically.
    async fn delete_page(&self, page_id: &str) -> Result<()>;
    async fn all_page_ids(&self) -> Result<Vec<String>>;
    /// Pages with no parent and no incoming link edges.
    async fn orphaned_pages(&self) -> Result<Vec<PageRecord>>;

    /// Replaces all outgoing edges of a page in one transaction.
    async fn set_page_links(&self, page_id: &str, links: &[LinkEdge]) -> Result<()>;
    async fn outgoing_links(&self, page_id: &str) -> Result<Vec<LinkEdge>>;
    async fn incoming_links(&self, page_id: &str) -> Result<Vec<LinkEdge>>;
    async fn broken_links(&self) -> Result<Vec<LinkEdge>>;
    async fn external_links(&self, page_id: Option<&str>) -> Result<Vec<LinkEdge>>;

    async fn set_page_labels(&self, page_id: &str, labels: &[String]) -> Result<()>;
    async fn page_labels(&self, page_id: &str) -> Result<Vec<String>>;
    async fn pages_with_label(&self, label: &str) -> Result<Vec<PageRecord>>;

    async fn set_page_contributors(&self, page_id: &str, contributors: &[Contributor]) -> Result<()>;
    async fn page_contributors(&self, page_id: &str) -> Result<Vec<Contributor>>;

    async fn upsert_user(&self, user: &UserRecord) -> Result<()>;
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>>;
    /// The stalest `checked_at` in the user cache; drives freshness reports.
    async fn oldest_user_check(&self) -> Result<Option<NaiveDateTime>>;

    async fn set_page_attachments(&self, page_id: &str, filenames: &[String]) -> Result<()>;
    async fn page_attachments(&self, page_id: &str) -> Result<Vec<String>>;

    async fn get_meta(&self, key: &str) -> Result<Option<String>>;
    async fn set_meta(&self, key: &str, value: &str) -> Result<()>;

    /// Base content: the page's Markdown as of the last successful sync,
    /// the common ancestor for three-way merges. Replaced atomically.
    async fn read_base(&self, page_id: &str) -> Result<Option<String>>;
    async fn write_base(&self, page_id: &str, markdown: &str) -> Result<()>;

    /// The injective path index: at most one live page per path.
    async fn page_for_path(&self, path: &str) -> Result<Option<String>>;
    async fn path_for_page(&self, page_id: &str) -> Result<Option<String>>;
    async fn bind_path(&self, page_id: &str, path: &str) -> Result<()>;
    async fn release_path(&self, path: &str) -> Result<()>;
}
