//! Startup reconciliation: bind what is already on disk, designate the
//! space home, and queue catch-up work for everything that changed while
//! the daemon was down.

use crate::config::SyncScope;
use crate::content::{content_hash, frontmatter, normalize};
use crate::domain::{PageRecord, RemoteEvent, RemoteEventKind, SyncStatus};
use crate::engine::SyncEngine;
use crate::error::Result;
use crate::hierarchy::ignore::IgnoreSet;
use crate::sources::LocalEvent;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Shape of the metadata sidecars an older layout left next to each page
/// file. Migrated into front matter bindings on sight.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacySidecar {
    page_id: String,
    #[serde(default)]
    title: Option<String>,
}

impl SyncEngine {
    pub async fn initial_sync(&self, ignore: &IgnoreSet) -> Result<()> {
        // 1. space home, so the root's children collapse to the workdir root
        let summaries = match self.remote.list_pages(&self.config.scope).await {
            Ok(summaries) => Some(summaries),
            Err(e) => {
                warn!(error = %e, "could not list remote pages at startup; poller will catch up");
                None
            }
        };

        if let (SyncScope::Space { .. }, Some(summaries)) = (&self.config.scope, &summaries) {
            if self.store.get_meta("home_page_id").await?.is_none() {
                if let Some(home) = summaries.iter().find(|s| s.parent_id.is_none()) {
                    info!(page_id = %home.id, title = %home.title, "designated space home");
                    self.store.set_meta("home_page_id", &home.id).await?;
                }
            }
        }
        self.store.set_meta("space_key", &self.config.space_key).await?;

        // 2. bind every markdown file already in the working tree
        self.bind_local_files(ignore).await?;

        // 3. remote catch-up: pull what is new or moved ahead, surface what
        //    disappeared
        if let Some(summaries) = summaries {
            let mut seen = std::collections::HashSet::new();
            for summary in &summaries {
                seen.insert(summary.id.clone());
                let kind = match self.store.get_page(&summary.id).await? {
                    None => Some(RemoteEventKind::Created),
                    Some(record) if summary.version > record.version => {
                        Some(RemoteEventKind::Changed)
                    }
                    Some(_) => None,
                };
                if let Some(kind) = kind {
                    self.enqueue_remote(RemoteEvent { page_id: summary.id.clone(), kind }).await;
                }
            }
            for page_id in self.store.all_page_ids().await? {
                if !seen.contains(&page_id) {
                    self.enqueue_remote(RemoteEvent {
                        page_id,
                        kind: RemoteEventKind::Deleted,
                    })
                    .await;
                }
            }
        }

        // 4. local catch-up: files edited while the daemon was down
        for page_id in self.store.all_page_ids().await? {
            let record = match self.store.get_page(&page_id).await? {
                Some(record) => record,
                None => continue,
            };
            let rel = match &record.local_path {
                Some(rel) => rel.clone(),
                None => continue,
            };
            let text = match tokio::fs::read_to_string(self.config.workdir.join(&rel)).await {
                Ok(text) => text,
                Err(_) => continue,
            };
            let hash = content_hash(&normalize(&text));
            if record.local_hash.as_deref() == Some(hash.as_str()) {
                continue;
            }

            // an unrecorded hash can still be a clean copy of the baseline
            // (fresh binding of a previously synced tree); recognize it
            // instead of queueing a pointless push
            let base_hash = match self.store.read_base(&page_id).await? {
                Some(base) => Some(content_hash(&normalize(&base))),
                None => None,
            };
            if base_hash.is_some() && base_hash.as_deref() == Some(hash.as_str()) {
                let mut updated = record.clone();
                updated.local_hash = Some(hash);
                // the base is the remote's last synced form by definition
                if updated.remote_hash.is_none() {
                    updated.remote_hash = base_hash.clone();
                }
                updated.base_hash = base_hash;
                updated.refresh_sync_status();
                self.store.upsert_page(&updated).await?;
                continue;
            }

            debug!(page_id = %page_id, path = %rel, "local edits found at startup");
            self.enqueue_local(LocalEvent::Changed(rel.into())).await;
        }

        info!("initial sync queued");
        Ok(())
    }

    /// Resolves the page identity of each working file: existing state
    /// binding first, then a legacy sidecar, then the front matter. Files
    /// with none of those stay untracked.
    async fn bind_local_files(&self, ignore: &IgnoreSet) -> Result<()> {
        let workdir = self.config.workdir.clone();
        for entry in WalkDir::new(&workdir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file()
                || entry.path().extension().and_then(|s| s.to_str()) != Some("md")
            {
                continue;
            }
            let rel = match entry.path().strip_prefix(&workdir) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            };
            if ignore.should_ignore(&rel, false) {
                continue;
            }
            let rel_str = rel.to_string_lossy().replace('\\', "/");

            // (a) already bound
            if self.store.page_for_path(&rel_str).await?.is_some() {
                continue;
            }

            let text = tokio::fs::read_to_string(entry.path()).await?;

            // (b) legacy sidecar migration
            let sidecar_path = entry.path().with_extension("md.meta.json");
            let page_id = match read_sidecar(&sidecar_path).await {
                Some(sidecar) => {
                    info!(path = %rel_str, page_id = %sidecar.page_id, "migrating legacy sidecar");
                    let _ = tokio::fs::remove_file(&sidecar_path).await;
                    Some((sidecar.page_id, sidecar.title))
                }
                // (c) front matter
                None => {
                    let (meta, _) = frontmatter::parse(&text, &rel_str);
                    meta.id.map(|id| (id, meta.title))
                }
            };

            let (page_id, title) = match page_id {
                Some(found) => found,
                None => {
                    debug!(path = %rel_str, "untracked markdown file");
                    continue;
                }
            };

            if self.store.get_page(&page_id).await?.is_none() {
                let (meta, _) = frontmatter::parse(&text, &rel_str);
                let mut record = PageRecord::new(
                    page_id.clone(),
                    title.or(meta.title).unwrap_or_else(|| rel_str.clone()),
                    self.config.space_key.clone(),
                );
                record.version = meta.version.unwrap_or(0);
                record.local_path = Some(rel_str.clone());
                // local_hash stays unset so the catch-up pass queues a push
                record.sync_status = SyncStatus::LocalModified;
                self.store.upsert_page(&record).await?;
            }
            self.store.bind_path(&page_id, &rel_str).await?;
        }
        Ok(())
    }
}

async fn read_sidecar(path: &Path) -> Option<LegacySidecar> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    serde_json::from_str(&text).ok()
}
