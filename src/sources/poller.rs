use crate::config::SyncScope;
use crate::domain::{RemoteEvent, RemoteEventKind};
use crate::remote::RemoteClient;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Interval-driven remote change source. Each tick lists the pages in scope
/// with their versions, diffs against the previous snapshot, and emits one
/// event per difference. A failed tick keeps the old snapshot and retries on
/// the next interval; ticks that fire while work is still in flight are
/// skipped rather than queued.
pub struct Poller {
    remote: Arc<dyn RemoteClient>,
    scope: SyncScope,
    interval: Duration,
    events: mpsc::Sender<RemoteEvent>,
}

impl Poller {
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        scope: SyncScope,
        interval: Duration,
        events: mpsc::Sender<RemoteEvent>,
    ) -> Self {
        Self { remote, scope, interval, events }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        // snapshot of page id -> version; None until the first successful
        // listing so startup differences don't flood the queue
        let mut snapshot: Option<HashMap<String, i64>> = None;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    debug!("poller stopping");
                    return;
                }
            }

            let current = match self.remote.list_pages(&self.scope).await {
                Ok(pages) => pages
                    .into_iter()
                    .map(|p| (p.id, p.version))
                    .collect::<HashMap<_, _>>(),
                Err(e) => {
                    warn!(error = %e, "poll tick failed, retrying on next interval");
                    continue;
                }
            };

            let previous = match snapshot.replace(current.clone()) {
                Some(prev) => prev,
                None => {
                    debug!(pages = current.len(), "initial poll snapshot built");
                    continue;
                }
            };

            for (id, version) in &current {
                let kind = match previous.get(id) {
                    None => RemoteEventKind::Created,
                    Some(prev_version) if prev_version != version => RemoteEventKind::Changed,
                    Some(_) => continue,
                };
                self.emit(RemoteEvent { page_id: id.clone(), kind }).await;
            }
            for id in previous.keys() {
                if !current.contains_key(id) {
                    self.emit(RemoteEvent {
                        page_id: id.clone(),
                        kind: RemoteEventKind::Deleted,
                    })
                    .await;
                }
            }
        }
    }

    async fn emit(&self, event: RemoteEvent) {
        debug!(page_id = %event.page_id, kind = %event.kind, "poller observed remote change");
        if self.events.send(event).await.is_err() {
            // the reconciliation side is gone; nothing left to do
            warn!("reconciliation channel closed, dropping poll event");
        }
    }
}
