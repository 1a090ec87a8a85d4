//! The per-page work queue. Keys are page identities; at most one operation
//! per key is ever in flight, and a newer event for a queued key replaces
//! the older one ("reconcile current state now" is idempotent). Events for
//! a key that is mid-operation are parked and re-armed when it finishes.

use crate::domain::RemoteEvent;
use crate::sources::LocalEvent;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Remote(RemoteEvent),
    Local(LocalEvent),
}

#[derive(Default)]
struct QueueState {
    /// Keys waiting their turn, in arrival order.
    order: VecDeque<String>,
    /// Latest pending item per queued key.
    pending: HashMap<String, WorkItem>,
    in_flight: HashSet<String>,
    /// Items that arrived for an in-flight key.
    parked: HashMap<String, WorkItem>,
}

pub struct PageQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Default for PageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PageQueue {
    pub fn new() -> Self {
        Self { state: Mutex::new(QueueState::default()), notify: Notify::new() }
    }

    pub async fn push(&self, key: String, item: WorkItem) {
        let mut state = self.state.lock().await;
        if state.in_flight.contains(&key) {
            state.parked.insert(key, item);
        } else {
            if !state.pending.contains_key(&key) {
                state.order.push_back(key.clone());
            }
            state.pending.insert(key, item);
        }
        drop(state);
        self.notify.notify_one();
    }

    /// Blocks until work is available, then claims the next key. The caller
    /// must call [`PageQueue::done`] with the key when the operation ends.
    pub async fn next(&self) -> (String, WorkItem) {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.order.pop_front() {
                    let item = state
                        .pending
                        .remove(&key)
                        .expect("queued key always has a pending item");
                    state.in_flight.insert(key.clone());
                    return (key, item);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Releases a key and re-queues anything that parked behind it.
    pub async fn done(&self, key: &str) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(key);
        if let Some(item) = state.parked.remove(key) {
            state.order.push_back(key.to_string());
            state.pending.insert(key.to_string(), item);
            drop(state);
            self.notify.notify_one();
        }
    }

    pub async fn depth(&self) -> usize {
        let state = self.state.lock().await;
        state.order.len() + state.parked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RemoteEvent, RemoteEventKind};

    fn changed(id: &str) -> WorkItem {
        WorkItem::Remote(RemoteEvent {
            page_id: id.to_string(),
            kind: RemoteEventKind::Changed,
        })
    }

    fn created(id: &str) -> WorkItem {
        WorkItem::Remote(RemoteEvent {
            page_id: id.to_string(),
            kind: RemoteEventKind::Created,
        })
    }

    #[tokio::test]
    async fn test_later_event_replaces_queued_one() {
        let queue = PageQueue::new();
        queue.push("p1".into(), created("p1")).await;
        queue.push("p1".into(), changed("p1")).await;
        assert_eq!(queue.depth().await, 1);

        let (key, item) = queue.next().await;
        assert_eq!(key, "p1");
        assert_eq!(item, changed("p1"));
        queue.done("p1").await;
        assert_eq!(queue.depth().await, 0);
    }

    #[tokio::test]
    async fn test_in_flight_key_parks_and_rearms() {
        let queue = PageQueue::new();
        queue.push("p1".into(), changed("p1")).await;

        let (key, _) = queue.next().await;
        // arrives while p1 is being reconciled
        queue.push("p1".into(), changed("p1")).await;
        assert_eq!(queue.depth().await, 1, "parked, not queued");

        queue.done(&key).await;
        let (key, item) = queue.next().await;
        assert_eq!(key, "p1");
        assert_eq!(item, changed("p1"));
        queue.done("p1").await;
    }

    #[tokio::test]
    async fn test_distinct_keys_keep_arrival_order() {
        let queue = PageQueue::new();
        queue.push("a".into(), changed("a")).await;
        queue.push("b".into(), changed("b")).await;
        queue.push("c".into(), changed("c")).await;

        let (first, _) = queue.next().await;
        queue.done(&first).await;
        let (second, _) = queue.next().await;
        queue.done(&second).await;
        let (third, _) = queue.next().await;
        queue.done(&third).await;

        assert_eq!(vec![first, second, third], vec!["a", "b", "c"]);
    }
}
