pub mod initial;
pub mod lockfile;
pub mod queue;
pub mod reconcile;

pub use self::lockfile::Lockfile;
pub use self::queue::{PageQueue, WorkItem};

use crate::config::SyncConfig;
use crate::domain::{RemoteEvent, SyncEvent};
use crate::remote::{RemoteClient, StorageConverter};
use crate::sources::LocalEvent;
use crate::store::StateStore;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error};

/// The reconciliation context: every operation runs against this one bundle
/// of collaborators. The engine owns all store writes while the daemon runs;
/// audits hold their own read-only handle.
pub struct SyncEngine {
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) remote: Arc<dyn RemoteClient>,
    pub(crate) converter: Arc<dyn StorageConverter>,
    pub(crate) config: Arc<SyncConfig>,
    pub(crate) queue: PageQueue,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn StateStore>,
        remote: Arc<dyn RemoteClient>,
        converter: Arc<dyn StorageConverter>,
        config: Arc<SyncConfig>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self { store, remote, converter, config, queue: PageQueue::new(), events }
    }

    /// Every reconciliation step emits exactly one event here.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    pub async fn enqueue_remote(&self, event: RemoteEvent) {
        let key = format!("page:{}", event.page_id);
        self.queue.push(key, WorkItem::Remote(event)).await;
    }

    /// Local events are keyed by the page bound to the path when one exists,
    /// so local and remote events for the same page serialize; untracked
    /// paths get their own key.
    pub async fn enqueue_local(&self, event: LocalEvent) {
        let path = match &event {
            LocalEvent::Changed(p) | LocalEvent::Removed(p) => p.clone(),
        };
        let rel = path.to_string_lossy().replace('\\', "/");
        let key = match self.store.page_for_path(&rel).await {
            Ok(Some(page_id)) => format!("page:{}", page_id),
            _ => format!("path:{}", rel),
        };
        self.queue.push(key, WorkItem::Local(event)).await;
    }

    /// Refreshes the cached activity state of every known contributor in
    /// bulk, so audits never make per-page user calls. Returns how many
    /// users were refreshed.
    pub async fn refresh_user_cache(&self) -> crate::error::Result<usize> {
        use std::collections::BTreeSet;

        let mut user_ids: BTreeSet<String> = BTreeSet::new();
        for page_id in self.store.all_page_ids().await? {
            for contributor in self.store.page_contributors(&page_id).await? {
                user_ids.insert(contributor.user_id);
            }
        }
        if user_ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = user_ids.into_iter().collect();
        let now = chrono::Utc::now().naive_utc();
        let mut refreshed = 0;

        // one bulk call per chunk, a bounded batch of chunks in flight
        let chunks: Vec<&[String]> = ids.chunks(50).collect();
        for batch in chunks.chunks(self.config.link_check.concurrency.max(1)) {
            let lookups = futures_util::future::join_all(
                batch.iter().map(|chunk| self.remote.get_users_bulk(chunk)),
            )
            .await;
            for result in lookups {
                let users = match result {
                    Ok(users) => users,
                    Err(e) => {
                        debug!(error = %e, "bulk user lookup failed; cache kept as-is");
                        continue;
                    }
                };
                for user in users {
                    self.store
                        .upsert_user(&crate::domain::UserRecord {
                            user_id: user.id,
                            display_name: user.display_name,
                            email: user.email,
                            is_active: user.is_active,
                            checked_at: Some(now),
                        })
                        .await?;
                    refreshed += 1;
                }
            }
        }
        Ok(refreshed)
    }

    /// The single queue consumer. Operations for distinct pages could run in
    /// parallel without breaking ordering, but one worker is enough and
    /// keeps the failure modes simple.
    pub async fn run_worker(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let (key, item) = tokio::select! {
                _ = shutdown.changed() => {
                    debug!("reconciliation worker stopping");
                    return;
                }
                next = self.queue.next() => next,
            };

            if let Err(e) = self.reconcile(item).await {
                // conflict-shaped failures surface as conflict events, not
                // errors; the user resolves them, the daemon moves on
                match e {
                    crate::error::SyncError::MergeBaseMissing(page_id) => {
                        self.emit(SyncEvent::Conflict {
                            page_id,
                            reason: "no base content recorded; resolve manually".to_string(),
                        });
                    }
                    crate::error::SyncError::UnresolvedConflict { page_id, path } => {
                        self.emit(SyncEvent::Conflict {
                            page_id,
                            reason: format!("{} still contains conflict markers", path.display()),
                        });
                    }
                    e => {
                        if e.is_fatal() {
                            error!(error = %e, "fatal error during reconciliation");
                        }
                        self.emit(SyncEvent::Error { page_id: None, message: e.to_string() });
                    }
                }
            }
            self.queue.done(&key).await;
        }
    }
}
