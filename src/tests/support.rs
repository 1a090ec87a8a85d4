//! Shared fakes for the integration tests: a scripted remote and a fully
//! wired engine over a temp directory, so no test touches the network.

use crate::config::{SyncConfig, SyncScope};
use crate::engine::SyncEngine;
use crate::error::{Result, SyncError};
use crate::remote::{
    PageCreate, PageSummary, PageUpdate, RemoteClient, RemotePage, RemoteUser, XhtmlConverter,
};
use crate::store::SqliteStore;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// --- Manual Mock: RemoteClient ---
// holds the "remote truth" in a HashMap and records every write the engine
// performs, so tests can assert on exactly what went over the wire
#[derive(Default)]
pub struct MockRemote {
    pub pages: Mutex<HashMap<String, RemotePage>>,
    pub updates: Mutex<Vec<PageUpdate>>,
    pub created: Mutex<Vec<PageCreate>>,
    pub attachments: Mutex<HashMap<String, Vec<String>>>,
    pub users: Mutex<HashMap<String, RemoteUser>>,
    id_counter: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_page(&self, page: RemotePage) {
        self.pages.lock().unwrap().insert(page.id.clone(), page);
    }

    pub fn page(&self, id: &str) -> Option<RemotePage> {
        self.pages.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn get_page(&self, page_id: &str) -> Result<RemotePage> {
        self.pages.lock().unwrap().get(page_id).cloned().ok_or_else(|| {
            SyncError::RemotePermanent {
                page_id: page_id.to_string(),
                reason: "404 not found".to_string(),
            }
        })
    }

    async fn list_pages(&self, _scope: &SyncScope) -> Result<Vec<PageSummary>> {
        let pages = self.pages.lock().unwrap();
        let mut summaries: Vec<PageSummary> = pages
            .values()
            .map(|p| PageSummary {
                id: p.id.clone(),
                title: p.title.clone(),
                version: p.version,
                parent_id: p.parent_id.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }

    async fn update_page(&self, update: &PageUpdate) -> Result<RemotePage> {
        let mut pages = self.pages.lock().unwrap();
        let page = pages
            .get_mut(&update.id)
            .ok_or_else(|| SyncError::RemotePermanent {
                page_id: update.id.clone(),
                reason: "404 not found".to_string(),
            })?;
        page.title = update.title.clone();
        page.storage = update.storage.clone();
        page.version = update.version;
        page.version_count = update.version;
        let updated = page.clone();
        drop(pages);
        self.updates.lock().unwrap().push(update.clone());
        Ok(updated)
    }

    async fn create_page(&self, create: &PageCreate) -> Result<RemotePage> {
        let n = self.id_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let page = RemotePage {
            id: format!("gen-{}", n),
            title: create.title.clone(),
            space_key: create.space_key.clone(),
            version: 1,
            parent_id: create.parent_id.clone(),
            ancestors: Vec::new(),
            storage: create.storage.clone(),
            status: "current".to_string(),
            is_restricted: false,
            version_count: 1,
            created_by: None,
            created_at: None,
            modified_by: None,
            modified_at: None,
            labels: Vec::new(),
            contributors: Vec::new(),
        };
        self.pages.lock().unwrap().insert(page.id.clone(), page.clone());
        self.created.lock().unwrap().push(create.clone());
        Ok(page)
    }

    async fn delete_page(&self, page_id: &str) -> Result<()> {
        self.pages.lock().unwrap().remove(page_id);
        Ok(())
    }

    async fn archive_page(&self, page_id: &str) -> Result<()> {
        if let Some(page) = self.pages.lock().unwrap().get_mut(page_id) {
            page.status = "archived".to_string();
        }
        Ok(())
    }

    async fn get_labels(&self, page_id: &str) -> Result<Vec<String>> {
        Ok(self.page(page_id).map(|p| p.labels).unwrap_or_default())
    }

    async fn add_label(&self, page_id: &str, label: &str) -> Result<()> {
        if let Some(page) = self.pages.lock().unwrap().get_mut(page_id) {
            page.labels.push(label.to_string());
        }
        Ok(())
    }

    async fn remove_label(&self, page_id: &str, label: &str) -> Result<()> {
        if let Some(page) = self.pages.lock().unwrap().get_mut(page_id) {
            page.labels.retain(|l| l != label);
        }
        Ok(())
    }

    async fn list_attachments(&self, page_id: &str) -> Result<Vec<String>> {
        Ok(self.attachments.lock().unwrap().get(page_id).cloned().unwrap_or_default())
    }

    async fn upload_attachment(&self, page_id: &str, filename: &str, _bytes: Vec<u8>) -> Result<()> {
        self.attachments
            .lock()
            .unwrap()
            .entry(page_id.to_string())
            .or_default()
            .push(filename.to_string());
        Ok(())
    }

    async fn update_attachment(&self, _page_id: &str, _filename: &str, _bytes: Vec<u8>) -> Result<()> {
        Ok(())
    }

    async fn get_users_bulk(&self, user_ids: &[String]) -> Result<Vec<RemoteUser>> {
        let users = self.users.lock().unwrap();
        Ok(user_ids.iter().filter_map(|id| users.get(id).cloned()).collect())
    }

    async fn register_webhook(&self, _callback_url: &str) -> Result<()> {
        Ok(())
    }
}

// --- Fixtures ---

pub fn test_config(workdir: &std::path::Path) -> SyncConfig {
    SyncConfig {
        base_url: "http://remote.test".to_string(),
        token: "test-token".to_string(),
        space_key: "DOC".to_string(),
        scope: SyncScope::Space { space_key: "DOC".to_string() },
        workdir: workdir.to_path_buf(),
        state_dir: workdir.join(".espejo"),
        poll_interval_secs: 60,
        webhook_port: None,
        webhook_callback_url: None,
        conflict_policy: crate::config::ConflictPolicy::Merge,
        auto_create: true,
        audit: crate::config::AuditConfig::default(),
        link_check: crate::config::LinkCheckConfig::default(),
    }
}

pub fn remote_page(id: &str, title: &str, storage: &str, version: i64) -> RemotePage {
    RemotePage {
        id: id.to_string(),
        title: title.to_string(),
        space_key: "DOC".to_string(),
        version,
        parent_id: None,
        ancestors: Vec::new(),
        storage: storage.to_string(),
        status: "current".to_string(),
        is_restricted: false,
        version_count: version,
        created_by: None,
        created_at: None,
        modified_by: None,
        modified_at: None,
        labels: Vec::new(),
        contributors: Vec::new(),
    }
}

/// A fully wired engine over a temp workdir, in-memory database included.
pub struct TestHarness {
    pub engine: Arc<SyncEngine>,
    pub remote: Arc<MockRemote>,
    pub store: Arc<SqliteStore>,
    pub workdir: TempDir,
}

pub async fn setup_engine() -> TestHarness {
    let workdir = tempfile::tempdir().expect("tempdir");
    let config = Arc::new(test_config(workdir.path()));

    std::fs::create_dir_all(&config.state_dir).unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    let store = Arc::new(SqliteStore::new(pool, config.state_dir.clone()));
    store.init().await.expect("migrations");

    let remote = MockRemote::new();
    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        remote.clone(),
        Arc::new(XhtmlConverter),
        config,
    ));

    TestHarness { engine, remote, store, workdir }
}

impl TestHarness {
    /// Runs everything currently queued, like one worker pass would.
    pub async fn drain_queue(&self) {
        while self.engine.queue.depth().await > 0 {
            let (key, item) = self.engine.queue.next().await;
            let _ = self.engine.reconcile(item).await;
            self.engine.queue.done(&key).await;
        }
    }

    pub fn read_file(&self, rel: &str) -> String {
        std::fs::read_to_string(self.workdir.path().join(rel)).expect("file should exist")
    }

    pub fn write_file(&self, rel: &str, content: &str) {
        let path = self.workdir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
}
