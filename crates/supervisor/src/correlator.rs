//! Correlation of in-flight requests with worker responses

use crate::error::{Error, Result};
use dashmap::DashMap;
use notifymux_protocol::RequestId;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

/// Completes one caller's pending request
pub(crate) type Completion = oneshot::Sender<Result<()>>;

/// Tracks in-flight requests by id and completes each at most once.
///
/// Ids are allocated from a counter that starts at zero and is never
/// reused for the lifetime of one worker process.
pub(crate) struct RequestCorrelator {
    next_id: AtomicU64,
    pending: DashMap<RequestId, Completion>,
}

impl RequestCorrelator {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            pending: DashMap::new(),
        }
    }

    /// Allocate the next request id. Never blocks.
    pub(crate) fn next_request_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Track an in-flight request until a response or failure completes it
    pub(crate) fn register(&self, request_id: RequestId, completion: Completion) {
        let previous = self.pending.insert(request_id, completion);
        debug_assert!(previous.is_none(), "request id {request_id} reused");
    }

    /// Complete a pending request with the worker's verdict.
    ///
    /// Returns `false` when the id is unknown; the caller decides whether
    /// that is a protocol violation or an expected stray after shutdown.
    pub(crate) fn complete(&self, request_id: RequestId, result: Result<()>) -> bool {
        match self.pending.remove(&request_id) {
            Some((_, completion)) => {
                // The caller may have stopped waiting
                let _ = completion.send(result);
                true
            }
            None => false,
        }
    }

    /// Remove a pending request without completing it
    pub(crate) fn take(&self, request_id: RequestId) -> Option<Completion> {
        self.pending
            .remove(&request_id)
            .map(|(_, completion)| completion)
    }

    /// Fail every in-flight request with a clone of the given error
    pub(crate) fn fail_all(&self, error: &Error) {
        let ids: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        for request_id in ids {
            if let Some((_, completion)) = self.pending.remove(&request_id) {
                let _ = completion.send(Err(error.clone()));
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
