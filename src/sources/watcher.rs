//! Local change source: a recursive OS watcher over the working directory,
//! debounced and hash-gated so editor touch-writes and the engine's own
//! pulls never turn into spurious pushes.

use crate::content::{content_hash, frontmatter, normalize};
use crate::hierarchy::{self, ignore::IgnoreSet};
use crate::store::StateStore;
use notify::{EventKind, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const DEBOUNCE_MS: u64 = 500;
const RAW_CHANNEL_CAPACITY: usize = 100;

/// A debounced, filtered local filesystem event. Paths are relative to the
/// working directory and always point at a page file (attachment changes are
/// rewritten to their owning page).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    Changed(PathBuf),
    /// Local deletions are observed but never propagated to the remote.
    Removed(PathBuf),
}

enum RawEvent {
    Touched(PathBuf),
    Removed(PathBuf),
}

/// Keeps the OS watcher and its worker alive. Dropping (or `shutdown`)
/// closes the watch and drains the worker.
pub struct LocalWatcher {
    _watcher: notify::RecommendedWatcher,
    worker: JoinHandle<()>,
}

impl LocalWatcher {
    pub fn spawn(
        workdir: PathBuf,
        ignore: Arc<IgnoreSet>,
        store: Arc<dyn StateStore>,
        events: mpsc::Sender<LocalEvent>,
    ) -> crate::error::Result<Self> {
        let (raw_tx, raw_rx) = mpsc::channel::<RawEvent>(RAW_CHANNEL_CAPACITY);

        // overflow alarm: when the raw channel fills up we fall back to a
        // full rescan instead of losing edits
        let needs_rescan = Arc::new(AtomicBool::new(false));
        let needs_rescan_watcher = needs_rescan.clone();

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(_) => return,
                };
                let raw = match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) => {
                        event.paths.first().map(|p| RawEvent::Touched(p.clone()))
                    }
                    EventKind::Remove(_) => {
                        event.paths.first().map(|p| RawEvent::Removed(p.clone()))
                    }
                    _ => None,
                };
                if let Some(raw) = raw {
                    if let Err(mpsc::error::TrySendError::Full(_)) = raw_tx.try_send(raw) {
                        needs_rescan_watcher.store(true, Ordering::SeqCst);
                    }
                }
            })?;
        watcher.watch(&workdir, RecursiveMode::Recursive)?;
        info!(dir = %workdir.display(), "watching working directory");

        let worker = tokio::spawn(run_worker(
            workdir,
            ignore,
            store,
            raw_rx,
            events,
            needs_rescan,
        ));

        Ok(Self { _watcher: watcher, worker })
    }

    /// Stops watching and waits for the worker to drain.
    pub async fn shutdown(self) {
        drop(self._watcher);
        let _ = self.worker.await;
    }
}

async fn run_worker(
    workdir: PathBuf,
    ignore: Arc<IgnoreSet>,
    store: Arc<dyn StateStore>,
    mut raw_rx: mpsc::Receiver<RawEvent>,
    events: mpsc::Sender<LocalEvent>,
    needs_rescan: Arc<AtomicBool>,
) {
    let mut touched: HashSet<PathBuf> = HashSet::new();
    let mut removed: HashSet<PathBuf> = HashSet::new();

    loop {
        let first = match raw_rx.recv().await {
            Some(event) => event,
            None => break,
        };
        collect(first, &mut touched, &mut removed);

        // drain everything arriving within the debounce window so a burst of
        // editor writes collapses into one push attempt per path
        loop {
            match tokio::time::timeout(Duration::from_millis(DEBOUNCE_MS), raw_rx.recv()).await {
                Ok(Some(event)) => collect(event, &mut touched, &mut removed),
                Ok(None) | Err(_) => break,
            }
        }

        if needs_rescan.swap(false, Ordering::SeqCst) {
            debug!("raw event channel overflowed, rescanning the whole tree");
            touched.clear();
            removed.clear();
            for entry in walkdir::WalkDir::new(&workdir).into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_file()
                    && entry.path().extension().and_then(|s| s.to_str()) == Some("md")
                {
                    touched.insert(entry.into_path());
                }
            }
        }

        for path in touched.drain() {
            if let Some(rel) = candidate_page_path(&workdir, &path, &ignore) {
                if content_actually_changed(&workdir, &rel, store.as_ref()).await {
                    if events.send(LocalEvent::Changed(rel)).await.is_err() {
                        return;
                    }
                }
            }
        }
        for path in removed.drain() {
            if let Some(rel) = candidate_page_path(&workdir, &path, &ignore) {
                if events.send(LocalEvent::Removed(rel)).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn collect(event: RawEvent, touched: &mut HashSet<PathBuf>, removed: &mut HashSet<PathBuf>) {
    match event {
        RawEvent::Touched(p) => {
            removed.remove(&p);
            touched.insert(p);
        }
        RawEvent::Removed(p) => {
            touched.remove(&p);
            removed.insert(p);
        }
    }
}

/// Filters one raw path down to the page file it concerns, or None when the
/// event is not ours to handle. Attachment paths map to their owning page.
fn candidate_page_path(workdir: &Path, path: &Path, ignore: &IgnoreSet) -> Option<PathBuf> {
    let rel = path.strip_prefix(workdir).ok()?;
    if ignore.should_ignore(rel, false) {
        return None;
    }

    let rel_str = rel.to_string_lossy().replace('\\', "/");
    if let Some(owner) = hierarchy::owning_page_file(&rel_str) {
        return Some(PathBuf::from(owner));
    }

    if rel.extension().and_then(|s| s.to_str()) == Some("md") {
        return Some(rel.to_path_buf());
    }
    None
}

/// The hash gate: only enqueue when the file's canonical content differs
/// from the last hash the store observed for it.
async fn content_actually_changed(
    workdir: &Path,
    rel: &Path,
    store: &dyn StateStore,
) -> bool {
    let text = match tokio::fs::read_to_string(workdir.join(rel)).await {
        Ok(text) => text,
        // attachment-only change or a file that vanished mid-burst; let the
        // reconciler sort it out
        Err(_) => return true,
    };
    let new_hash = content_hash(&normalize(&text));

    let rel_str = rel.to_string_lossy().replace('\\', "/");
    let page_id = match store.page_for_path(&rel_str).await {
        Ok(Some(id)) => id,
        // untracked file: always a candidate (auto-create may want it)
        _ => {
            let (meta, _) = frontmatter::parse(&text, &rel_str);
            match meta.id {
                Some(id) => id,
                None => return true,
            }
        }
    };

    match store.get_page(&page_id).await {
        Ok(Some(page)) => {
            if page.local_hash.as_deref() == Some(new_hash.as_str()) {
                debug!(path = %rel_str, "content unchanged, dropping watch event");
                false
            } else {
                true
            }
        }
        _ => true,
    }
}
