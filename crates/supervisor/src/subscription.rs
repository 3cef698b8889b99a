//! Caller-facing handle for one watch subscription

use crate::registry::EventBatch;
use crate::supervisor::{ShutdownGuard, SupervisorShared};
use crate::Result;
use notifymux_protocol::WatchId;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A live subscription to file system events under one root.
///
/// Event batches arrive in worker order through [`recv`](Watch::recv); the
/// stream ends when the subscription is disposed or the worker goes away.
/// Holding a `Watch` keeps the worker process alive.
pub struct Watch {
    watch_id: WatchId,
    events: mpsc::Receiver<EventBatch>,
    shared: Arc<SupervisorShared>,
    _guard: Arc<ShutdownGuard>,
    disposed: bool,
}

impl Watch {
    pub(crate) fn new(
        watch_id: WatchId,
        events: mpsc::Receiver<EventBatch>,
        shared: Arc<SupervisorShared>,
        guard: Arc<ShutdownGuard>,
    ) -> Self {
        Self {
            watch_id,
            events,
            shared,
            _guard: guard,
            disposed: false,
        }
    }

    /// The id the supervisor assigned to this subscription
    pub fn id(&self) -> WatchId {
        self.watch_id
    }

    /// Next batch of events.
    ///
    /// Returns `None` once the stream has ended: after [`dispose`], after
    /// `kill`, or after a worker crash. A crash is also reported on the
    /// supervisor's fault channel.
    ///
    /// [`dispose`]: Watch::dispose
    pub async fn recv(&mut self) -> Option<EventBatch> {
        self.events.recv().await
    }

    /// Stop this subscription.
    ///
    /// Local delivery stops immediately; the worker's acknowledgement is
    /// awaited before returning. Only the first call does anything, and a
    /// worker that died in the meantime counts as successfully disposed.
    pub async fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        self.events.close();
        self.shared.unwatch(self.watch_id).await
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        if !self.disposed {
            self.shared.forget_watch(self.watch_id);
        }
    }
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("watch_id", &self.watch_id)
            .field("disposed", &self.disposed)
            .finish()
    }
}
