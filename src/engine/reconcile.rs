//! Reconciliation: bringing one page into agreement in response to one
//! event. Dispatch picks pull, push, merge, create, or move from the three
//! fingerprints (local, base, remote); all store writes happen here.

use crate::config::SyncScope;
use crate::content::{
    content_hash, frontmatter, frontmatter::PageFrontMatter, has_conflict_markers, merge,
    normalize,
};
use crate::domain::{
    ContentStatus, Contributor, LinkEdge, LinkKind, PageRecord, RemoteEventKind, SyncEvent,
    SyncStatus,
};
use crate::engine::{SyncEngine, WorkItem};
use crate::error::{Result, SyncError};
use crate::hierarchy;
use crate::links::{extract_attachment_refs, extract_links};
use crate::remote::RemotePage;
use crate::sources::LocalEvent;
use crate::store::PageFilter;
use chrono::Utc;
use std::path::Path;
use tracing::{debug, info, warn};

impl SyncEngine {
    pub(crate) async fn reconcile(&self, item: WorkItem) -> Result<()> {
        match item {
            WorkItem::Remote(event) => match event.kind {
                RemoteEventKind::Deleted => {
                    info!(page_id = %event.page_id, "remote deleted page; local copy kept");
                    self.emit(SyncEvent::Status {
                        message: format!(
                            "page {} was deleted on the remote; the local file is kept",
                            event.page_id
                        ),
                    });
                    Ok(())
                }
                RemoteEventKind::Created | RemoteEventKind::Changed => {
                    self.reconcile_remote_change(&event.page_id).await
                }
            },
            WorkItem::Local(LocalEvent::Removed(path)) => {
                let rel = posix(&path);
                info!(path = %rel, "local file removed; deletion is not propagated");
                self.emit(SyncEvent::Status {
                    message: format!("{} was deleted locally; the remote page is kept", rel),
                });
                Ok(())
            }
            WorkItem::Local(LocalEvent::Changed(path)) => self.push(&path).await,
        }
    }

    /// A remote-side change: pull when the local side is clean, merge when
    /// both sides moved.
    async fn reconcile_remote_change(&self, page_id: &str) -> Result<()> {
        let record = match self.store.get_page(page_id).await? {
            None => return self.pull(page_id).await,
            Some(record) => record,
        };

        let rel = match &record.local_path {
            Some(rel) => rel.clone(),
            // nothing on disk yet
            None => return self.pull(page_id).await,
        };
        let local_hash_now =
            match tokio::fs::read_to_string(self.config.workdir.join(&rel)).await {
                Ok(text) => Some(content_hash(&normalize(&text))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            };

        let locally_clean = match (&local_hash_now, &record.base_hash) {
            // no local file: (re)create it
            (None, _) => return self.pull(page_id).await,
            (Some(now), Some(base)) => now == base,
            // no baseline to compare against; let the merge path surface it
            (Some(_), None) => false,
        };

        if locally_clean {
            self.pull(page_id).await
        } else {
            let body = self.read_body(&rel).await?;
            let remote_page = match self.fetch_remote(page_id).await? {
                Some(page) => page,
                None => return Ok(()),
            };
            self.merge_sides(page_id, &rel, body, &record, remote_page).await
        }
    }

    // ---- pull ----

    /// Remote → local. Writes the file (moving it first when the ancestor
    /// chain changed), replaces the base snapshot, and rebuilds the page's
    /// edges. Any failure leaves the state entry untouched so the next
    /// event retries.
    pub(crate) async fn pull(&self, page_id: &str) -> Result<()> {
        let page = match self.fetch_remote(page_id).await? {
            Some(page) => page,
            None => return Ok(()),
        };
        let markdown = self.converter.storage_to_markdown(&page.storage)?;

        let target = self.resolve_target_path(&page).await?;

        // move detection: same page bound to a different path
        let previous = self.store.path_for_page(page_id).await?;
        if let Some(old) = previous {
            if old != target {
                self.move_local_file(&old, &target).await?;
                self.emit(SyncEvent::Status {
                    message: format!("moved {} -> {}", old, target),
                });
            }
        }

        let meta = PageFrontMatter {
            id: Some(page.id.clone()),
            title: Some(page.title.clone()),
            space: Some(page.space_key.clone()),
            version: Some(page.version),
            labels: if page.labels.is_empty() { None } else { Some(page.labels.clone()) },
        };
        let file_text = frontmatter::write(&meta, &markdown);

        let abs = self.config.workdir.join(&target);
        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&abs, &file_text).await?;

        let hash = content_hash(&normalize(&markdown));
        self.store.write_base(page_id, &markdown).await?;

        let mut record = record_from_remote(&page);
        record.local_path = Some(target.clone());
        record.local_hash = Some(hash.clone());
        record.base_hash = Some(hash.clone());
        record.remote_hash = Some(hash);
        record.sync_status = SyncStatus::Synced;
        self.store.upsert_page(&record).await?;
        self.store.bind_path(page_id, &target).await?;

        self.store.set_page_labels(page_id, &page.labels).await?;
        let contributors: Vec<Contributor> = page
            .contributors
            .iter()
            .map(|c| Contributor {
                page_id: page_id.to_string(),
                user_id: c.user_id.clone(),
                contributions: c.contributions,
                last_contributed_at: c.last_contributed_at,
            })
            .collect();
        self.store.set_page_contributors(page_id, &contributors).await?;

        self.refresh_links(page_id, &target, &markdown).await?;

        info!(page_id, path = %target, version = page.version, "pulled page");
        self.emit(SyncEvent::Pull { page_id: page_id.to_string(), path: target });
        Ok(())
    }

    // ---- push ----

    /// Local → remote. Falls through to merge when the remote moved ahead,
    /// and to create when the file is untracked and auto-create is on.
    pub(crate) async fn push(&self, path: &Path) -> Result<()> {
        let rel = posix(path);
        let abs = self.config.workdir.join(&rel);
        let text = match tokio::fs::read_to_string(&abs).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %rel, "file vanished before push");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let (meta, body) = frontmatter::parse(&text, &rel);
        let page_id = match meta.id.clone() {
            Some(id) => Some(id),
            None => self.store.page_for_path(&rel).await?,
        };

        let page_id = match page_id {
            Some(id) => id,
            None if self.config.auto_create => {
                return self.create_remote_page(&rel, &meta, &body).await;
            }
            None => {
                self.emit(SyncEvent::Status {
                    message: format!("{} is untracked; enable auto-create to push it", rel),
                });
                return Ok(());
            }
        };

        if has_conflict_markers(&body) {
            warn!(page_id = %page_id, path = %rel, "push rejected, conflict markers present");
            return Err(SyncError::UnresolvedConflict { page_id, path: path.to_path_buf() });
        }

        let record = self.store.get_page(&page_id).await?;
        if let Some(reason) = record.as_ref().and_then(|r| r.inaccessible_reason.clone()) {
            self.emit(SyncEvent::Status {
                message: format!("page {} is marked inaccessible ({}); not pushing", page_id, reason),
            });
            return Ok(());
        }

        let remote_page = match self.fetch_remote(&page_id).await? {
            Some(page) => page,
            None => return Ok(()),
        };

        let known_version = record.as_ref().map(|r| r.version).unwrap_or(0);
        if remote_page.version > known_version {
            let record = match record {
                Some(record) => record,
                None => record_from_remote(&remote_page),
            };
            return self.merge_sides(&page_id, &rel, body, &record, remote_page).await;
        }

        let title = meta.title.clone().unwrap_or_else(|| remote_page.title.clone());
        self.push_body(&page_id, &rel, &title, &body, &remote_page).await
    }

    /// Steps 3–7 of a push: attachments, conversion, the version bump, and
    /// the new baseline.
    async fn push_body(
        &self,
        page_id: &str,
        rel: &str,
        title: &str,
        body: &str,
        remote_page: &RemotePage,
    ) -> Result<()> {
        self.upload_attachments(page_id, rel, body).await;

        let storage = self.converter.markdown_to_storage(body)?;
        let update = crate::remote::PageUpdate {
            id: page_id.to_string(),
            title: title.to_string(),
            storage,
            version: remote_page.version + 1,
        };
        let updated = self.remote.update_page(&update).await?;

        let hash = content_hash(&normalize(body));
        self.store.write_base(page_id, body).await?;

        let mut record = record_from_remote(&updated);
        record.local_path = Some(rel.to_string());
        record.local_hash = Some(hash.clone());
        record.base_hash = Some(hash.clone());
        record.remote_hash = Some(hash);
        record.sync_status = SyncStatus::Synced;
        self.store.upsert_page(&record).await?;
        self.store.bind_path(page_id, rel).await?;

        self.refresh_links(page_id, rel, body).await?;

        info!(page_id, path = %rel, version = record.version, "pushed page");
        self.emit(SyncEvent::Push { page_id: page_id.to_string(), path: rel.to_string() });
        Ok(())
    }

    /// Untracked file with auto-create enabled: create the remote page under
    /// the scope's parent and write the new id back into the front matter.
    async fn create_remote_page(&self, rel: &str, meta: &PageFrontMatter, body: &str) -> Result<()> {
        let parent_id = match &self.config.scope {
            SyncScope::Page { page_id } => Some(page_id.clone()),
            SyncScope::Subtree { ancestor_id } => Some(ancestor_id.clone()),
            SyncScope::Space { .. } => self.store.get_meta("home_page_id").await?,
        };
        let title = meta
            .title
            .clone()
            .unwrap_or_else(|| title_from_path(rel));

        let storage = self.converter.markdown_to_storage(body)?;
        let created = self
            .remote
            .create_page(&crate::remote::PageCreate {
                space_key: self.config.space_key.clone(),
                title: title.clone(),
                storage,
                parent_id,
            })
            .await?;

        // bind the file to its new identity
        let new_meta = PageFrontMatter {
            id: Some(created.id.clone()),
            title: Some(title),
            space: Some(created.space_key.clone()),
            version: Some(created.version),
            labels: meta.labels.clone(),
        };
        let file_text = frontmatter::write(&new_meta, body);
        tokio::fs::write(self.config.workdir.join(rel), &file_text).await?;

        let hash = content_hash(&normalize(body));
        self.store.write_base(&created.id, body).await?;

        let mut record = record_from_remote(&created);
        record.local_path = Some(rel.to_string());
        record.local_hash = Some(hash.clone());
        record.base_hash = Some(hash.clone());
        record.remote_hash = Some(hash);
        record.sync_status = SyncStatus::Synced;
        self.store.upsert_page(&record).await?;
        self.store.bind_path(&created.id, rel).await?;
        self.refresh_links(&created.id, rel, body).await?;

        info!(page_id = %created.id, path = %rel, "created remote page for untracked file");
        self.emit(SyncEvent::Push { page_id: created.id.clone(), path: rel.to_string() });
        Ok(())
    }

    // ---- merge ----

    /// Both sides diverged from the baseline. A clean three-way merge is
    /// pushed as the next version; a dirty one falls to the conflict policy.
    async fn merge_sides(
        &self,
        page_id: &str,
        rel: &str,
        local_body: String,
        record: &PageRecord,
        remote_page: RemotePage,
    ) -> Result<()> {
        let remote_md = self.converter.storage_to_markdown(&remote_page.storage)?;

        let base = match self.store.read_base(page_id).await? {
            Some(base) => base,
            None => {
                // nothing to merge against; surface rather than guess
                let mut updated = record.clone();
                updated.remote_hash = Some(content_hash(&normalize(&remote_md)));
                updated.local_hash = Some(content_hash(&normalize(&local_body)));
                updated.sync_status = SyncStatus::Conflict;
                self.store.upsert_page(&updated).await?;
                return Err(SyncError::MergeBaseMissing(page_id.to_string()));
            }
        };

        let outcome = merge(&base, &local_body, &remote_md);
        if outcome.success {
            // when the merge result IS the remote side, the local file had
            // nothing to add; adopt the remote instead of minting a version
            if outcome.content == remote_md {
                return self.pull(page_id).await;
            }
            info!(page_id, "three-way merge succeeded");
            let title = remote_page.title.clone();
            let meta = PageFrontMatter {
                id: Some(page_id.to_string()),
                title: Some(title.clone()),
                space: Some(remote_page.space_key.clone()),
                version: Some(remote_page.version + 1),
                labels: None,
            };
            let file_text = frontmatter::write(&meta, &outcome.content);
            tokio::fs::write(self.config.workdir.join(rel), &file_text).await?;

            return self
                .push_body(page_id, rel, &title, &outcome.content, &remote_page)
                .await;
        }

        match self.config.conflict_policy {
            crate::config::ConflictPolicy::Merge => {
                warn!(page_id, conflicts = outcome.conflict_count, "merge left conflict markers");
                let meta = PageFrontMatter {
                    id: Some(page_id.to_string()),
                    title: Some(remote_page.title.clone()),
                    space: Some(remote_page.space_key.clone()),
                    version: Some(record.version),
                    labels: None,
                };
                let file_text = frontmatter::write(&meta, &outcome.content);
                tokio::fs::write(self.config.workdir.join(rel), &file_text).await?;

                let mut updated = record.clone();
                updated.local_hash = Some(content_hash(&normalize(&outcome.content)));
                updated.remote_hash = Some(content_hash(&normalize(&remote_md)));
                updated.sync_status = SyncStatus::Conflict;
                self.store.upsert_page(&updated).await?;

                self.emit(SyncEvent::Conflict {
                    page_id: page_id.to_string(),
                    reason: format!("{} conflicting regions written to {}", outcome.conflict_count, rel),
                });
                Ok(())
            }
            crate::config::ConflictPolicy::Local => {
                info!(page_id, "conflict resolved by policy: keeping local");
                let title = remote_page.title.clone();
                self.push_body(page_id, rel, &title, &local_body, &remote_page).await
            }
            crate::config::ConflictPolicy::Remote => {
                info!(page_id, "conflict resolved by policy: keeping remote");
                self.pull(page_id).await
            }
        }
    }

    // ---- shared helpers ----

    /// get_page with the taxonomy applied: permanent failures mark the
    /// record and end the attempt (returning None), transient ones bubble
    /// up for the next tick to retry.
    async fn fetch_remote(&self, page_id: &str) -> Result<Option<RemotePage>> {
        match self.remote.get_page(page_id).await {
            Ok(page) => Ok(Some(page)),
            Err(SyncError::RemotePermanent { page_id, reason }) => {
                warn!(page_id = %page_id, reason = %reason, "page is gone on the remote");
                if let Some(mut record) = self.store.get_page(&page_id).await? {
                    record.inaccessible_reason = Some(reason.clone());
                    self.store.upsert_page(&record).await?;
                }
                self.emit(SyncEvent::Error {
                    page_id: Some(page_id.clone()),
                    message: format!("remote page unavailable: {}", reason),
                });
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// §4.3 in full: hierarchical path, home collapsing, children get a
    /// directory, collisions get numeric suffixes.
    async fn resolve_target_path(&self, page: &RemotePage) -> Result<String> {
        let has_children = !self
            .store
            .list_pages(&PageFilter { ancestor_id: Some(page.id.clone()), ..Default::default() })
            .await?
            .is_empty();
        let home_id = self.store.get_meta("home_page_id").await?;

        let preferred =
            hierarchy::resolve_path(&page.ancestors, &page.title, has_children, home_id.as_deref());

        let mut candidate = preferred.clone();
        let mut n = 2;
        loop {
            match self.store.page_for_path(&candidate).await? {
                Some(owner) if owner != page.id => {
                    candidate = hierarchy::suffixed(&preferred, n);
                    n += 1;
                }
                _ => return Ok(candidate),
            }
        }
    }

    /// Renames the working file and its attachments directory together.
    async fn move_local_file(&self, old_rel: &str, new_rel: &str) -> Result<()> {
        let old_abs = self.config.workdir.join(old_rel);
        let new_abs = self.config.workdir.join(new_rel);
        if let Some(parent) = new_abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::rename(&old_abs, &new_abs).await {
            Ok(()) => {}
            // the source may already be gone; the pull rewrites the target
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let old_attachments = self.config.workdir.join(hierarchy::attachments_dir(old_rel));
        if old_attachments.is_dir() {
            let new_attachments = self.config.workdir.join(hierarchy::attachments_dir(new_rel));
            tokio::fs::rename(&old_attachments, &new_attachments).await?;
        }
        Ok(())
    }

    /// Rebuilds the page's outgoing edges and attachment references from its
    /// current Markdown.
    async fn refresh_links(&self, page_id: &str, source_rel: &str, markdown: &str) -> Result<()> {
        let now = Utc::now().naive_utc();
        let mut edges = Vec::new();
        for raw in extract_links(markdown) {
            let (target_id, is_broken) = match raw.kind {
                LinkKind::External | LinkKind::Attachment => (None, false),
                LinkKind::Internal => {
                    let resolved = resolve_relative(source_rel, &raw.target);
                    let mut target = self.store.page_for_path(&resolved).await?;
                    if target.is_none() && !resolved.ends_with(".md") {
                        target = self.store.page_for_path(&format!("{}.md", resolved)).await?;
                    }
                    let broken = target.is_none();
                    (target, broken)
                }
            };
            edges.push(LinkEdge {
                source_id: page_id.to_string(),
                target_id,
                target: raw.target,
                kind: raw.kind,
                text: raw.text,
                line: raw.line,
                is_broken,
                discovered_at: now,
            });
        }
        self.store.set_page_links(page_id, &edges).await?;

        let refs = extract_attachment_refs(markdown);
        self.store.set_page_attachments(page_id, &refs).await?;
        Ok(())
    }

    /// Creates or replaces every attachment the Markdown references. A
    /// single failed file is logged and skipped; the page push proceeds.
    async fn upload_attachments(&self, page_id: &str, rel: &str, body: &str) {
        let refs = extract_attachment_refs(body);
        if refs.is_empty() {
            return;
        }
        let dir = self.config.workdir.join(hierarchy::attachments_dir(rel));
        let existing = match self.remote.list_attachments(page_id).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(page_id, error = %e, "could not list remote attachments; assuming none");
                Vec::new()
            }
        };

        for name in refs {
            let path = dir.join(&name);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(page_id, file = %name, error = %e, "attachment unreadable, skipping");
                    continue;
                }
            };
            let result = if existing.iter().any(|f| f == &name) {
                self.remote.update_attachment(page_id, &name, bytes).await
            } else {
                self.remote.upload_attachment(page_id, &name, bytes).await
            };
            if let Err(e) = result {
                warn!(page_id, file = %name, error = %e, "attachment upload failed, continuing");
            }
        }
    }

    async fn read_body(&self, rel: &str) -> Result<String> {
        let text = tokio::fs::read_to_string(self.config.workdir.join(rel)).await?;
        let (_, body) = frontmatter::parse(&text, rel);
        Ok(body)
    }
}

/// Builds a state record from a remote response. Sync-side fields (paths and
/// hashes) are filled in by the caller.
pub(crate) fn record_from_remote(page: &RemotePage) -> PageRecord {
    PageRecord {
        page_id: page.id.clone(),
        title: page.title.clone(),
        space_key: page.space_key.clone(),
        version: page.version,
        parent_id: page
            .parent_id
            .clone()
            .or_else(|| page.ancestors.last().map(|a| a.id.clone())),
        ancestors: page.ancestors.clone(),
        content_status: ContentStatus::parse(&page.status),
        is_restricted: page.is_restricted,
        version_count: if page.version_count > 0 { page.version_count } else { page.version },
        created_by: page.created_by.clone(),
        created_at: page.created_at,
        modified_by: page.modified_by.clone(),
        modified_at: page.modified_at,
        local_path: None,
        local_hash: None,
        base_hash: None,
        remote_hash: None,
        sync_status: SyncStatus::Unsynced,
        inaccessible_reason: None,
    }
}

fn posix(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn title_from_path(rel: &str) -> String {
    let stem = rel
        .rsplit('/')
        .next()
        .unwrap_or(rel)
        .trim_end_matches(".md");
    stem.replace('-', " ")
}

/// Resolves a relative link target against its source file, dropping any
/// fragment. `guides/install.md` + `../intro.md` -> `intro.md`.
fn resolve_relative(source_rel: &str, target: &str) -> String {
    let target = target.split('#').next().unwrap_or(target);
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }

    let mut components: Vec<&str> = source_rel.split('/').collect();
    components.pop(); // the source file itself
    for part in target.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            normal => components.push(normal),
        }
    }
    components.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Ancestor;

    #[test]
    fn test_resolve_relative_paths() {
        assert_eq!(resolve_relative("a/b.md", "c.md"), "a/c.md");
        assert_eq!(resolve_relative("a/b.md", "../c.md"), "c.md");
        assert_eq!(resolve_relative("a/b.md", "./d/c.md"), "a/d/c.md");
        assert_eq!(resolve_relative("b.md", "/root.md"), "root.md");
        assert_eq!(resolve_relative("a/b.md", "c.md#section"), "a/c.md");
    }

    #[test]
    fn test_title_from_path() {
        assert_eq!(title_from_path("guides/getting-started.md"), "getting started");
        assert_eq!(title_from_path("intro.md"), "intro");
    }

    #[test]
    fn test_record_from_remote_falls_back_to_chain_parent() {
        let page = RemotePage {
            id: "p2".into(),
            title: "Child".into(),
            space_key: "DOC".into(),
            version: 3,
            parent_id: None,
            ancestors: vec![Ancestor { id: "p1".into(), title: "Parent".into() }],
            storage: String::new(),
            status: "current".into(),
            is_restricted: false,
            version_count: 0,
            created_by: None,
            created_at: None,
            modified_by: None,
            modified_at: None,
            labels: Vec::new(),
            contributors: Vec::new(),
        };
        let record = record_from_remote(&page);
        assert_eq!(record.parent_id.as_deref(), Some("p1"));
        assert_eq!(record.version_count, 3);
    }
}
