//! Active watch subscriptions and event dispatch

use dashmap::DashMap;
use notifymux_protocol::{WatchEvent, WatchId};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// One delivered batch of file system events
pub type EventBatch = Vec<WatchEvent>;

/// Active subscriptions keyed by watch id.
///
/// Watch ids come from their own counter, disjoint from request ids, so a
/// watch id stays valid across the many requests that may reference it.
pub(crate) struct WatchRegistry {
    next_id: AtomicU64,
    senders: DashMap<WatchId, mpsc::Sender<EventBatch>>,
}

impl WatchRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            senders: DashMap::new(),
        }
    }

    /// Allocate the next watch id. Never blocks.
    pub(crate) fn next_watch_id(&self) -> WatchId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Route events for `watch_id` into the given channel
    pub(crate) fn register(&self, watch_id: WatchId, sender: mpsc::Sender<EventBatch>) {
        let previous = self.senders.insert(watch_id, sender);
        debug_assert!(previous.is_none(), "watch id {watch_id} reused");
    }

    /// Remove a subscription. Returns whether it was still present.
    pub(crate) fn unregister(&self, watch_id: WatchId) -> bool {
        self.senders.remove(&watch_id).is_some()
    }

    /// Deliver a batch to its subscription, if one still exists.
    ///
    /// Batches for unknown ids are dropped without complaint: the worker
    /// may still have events in flight for a subscription that was just
    /// disposed.
    pub(crate) fn dispatch(&self, watch_id: WatchId, events: EventBatch) {
        let Some(sender) = self.senders.get(&watch_id) else {
            trace!(watch_id, "dropping batch for unknown watch id");
            return;
        };
        match sender.try_send(events) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(watch_id, "subscription buffer full, dropping event batch");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(watch_id, "subscription receiver gone, dropping event batch");
            }
        }
    }

    /// Drop every subscription, ending all event streams
    pub(crate) fn clear(&self) {
        self.senders.clear();
    }

    #[cfg(test)]
    pub(crate) fn active_count(&self) -> usize {
        self.senders.len()
    }
}
