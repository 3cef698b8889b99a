//! Frame types exchanged between the supervisor and the worker
//!
//! The shapes here are the wire contract: internally tagged JSON objects
//! with camelCase tags and field names. Changing a tag or field name is a
//! breaking protocol change.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Line the worker prints on stdout once its backend is initialized and it
/// is ready to accept requests. Printed before any JSON frame.
pub const READY_MARKER: &str = "Listening";

/// Correlates a request with the response the worker sends back for it.
///
/// Allocated monotonically from zero by the supervisor, never reused for
/// the lifetime of a worker process.
pub type RequestId = u64;

/// Identifies one watch subscription across event batches.
///
/// Allocated monotonically from zero by the supervisor, from a counter
/// independent of [`RequestId`].
pub type WatchId = u64;

/// Requests written to the worker's stdin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    /// Start watching `root` recursively under the given subscription id
    #[serde(rename_all = "camelCase")]
    Watch {
        request_id: RequestId,
        watch_id: WatchId,
        root: PathBuf,
    },
    /// Stop the subscription identified by `watch_id`
    #[serde(rename_all = "camelCase")]
    Unwatch {
        request_id: RequestId,
        watch_id: WatchId,
    },
    /// Stop every active subscription
    #[serde(rename_all = "camelCase")]
    UnwatchAll { request_id: RequestId },
}

impl Request {
    /// The correlation id carried by this request
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::Watch { request_id, .. } => *request_id,
            Self::Unwatch { request_id, .. } => *request_id,
            Self::UnwatchAll { request_id } => *request_id,
        }
    }
}

/// Frames read from the worker's stdout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    /// The request identified by `request_id` succeeded
    #[serde(rename_all = "camelCase")]
    OkResponse { request_id: RequestId },
    /// The request identified by `request_id` failed
    #[serde(rename_all = "camelCase")]
    ErrorResponse {
        request_id: RequestId,
        description: String,
    },
    /// A batch of file system events for one subscription
    #[serde(rename_all = "camelCase")]
    WatchEvents {
        watch_id: WatchId,
        events: Vec<WatchEvent>,
    },
    /// An error not tied to any request, such as a backend failure
    WatcherError { description: String },
}

/// A single file system change inside a [`WorkerMessage::WatchEvents`] batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum WatchEvent {
    /// File or directory was created
    Created { path: PathBuf },
    /// File contents or metadata changed
    Modified { path: PathBuf },
    /// File or directory was removed
    Deleted { path: PathBuf },
    /// File or directory moved within the watched root
    #[serde(rename_all = "camelCase")]
    Renamed { path: PathBuf, old_path: PathBuf },
    /// The backend reported an error for this path
    Error { path: PathBuf, description: String },
}

impl WatchEvent {
    /// Get the primary path associated with this event
    pub fn path(&self) -> &Path {
        match self {
            Self::Created { path } => path,
            Self::Modified { path } => path,
            Self::Deleted { path } => path,
            Self::Renamed { path, .. } => path,
            Self::Error { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn watch_request_wire_shape() {
        let request = Request::Watch {
            request_id: 0,
            watch_id: 0,
            root: PathBuf::from("/projects/demo"),
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"type":"watch","requestId":0,"watchId":0,"root":"/projects/demo"}"#
        );
    }

    #[test]
    fn unwatch_request_wire_shape() {
        let request = Request::Unwatch {
            request_id: 7,
            watch_id: 2,
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"type":"unwatch","requestId":7,"watchId":2}"#
        );
    }

    #[test]
    fn unwatch_all_request_wire_shape() {
        let request = Request::UnwatchAll { request_id: 3 };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"type":"unwatchAll","requestId":3}"#
        );
    }

    #[test]
    fn responses_parse_by_tag() {
        let ok: WorkerMessage = serde_json::from_str(r#"{"type":"okResponse","requestId":4}"#)
            .expect("okResponse should parse");
        assert_eq!(ok, WorkerMessage::OkResponse { request_id: 4 });

        let err: WorkerMessage = serde_json::from_str(
            r#"{"type":"errorResponse","requestId":5,"description":"No path was found"}"#,
        )
        .expect("errorResponse should parse");
        assert_eq!(
            err,
            WorkerMessage::ErrorResponse {
                request_id: 5,
                description: "No path was found".to_string(),
            }
        );
    }

    #[test]
    fn event_batch_parses_with_camel_case_actions() {
        let message: WorkerMessage = serde_json::from_str(
            r#"{"type":"watchEvents","watchId":1,"events":[
                {"action":"created","path":"/w/foo"},
                {"action":"renamed","path":"/w/new","oldPath":"/w/old"},
                {"action":"error","path":"/w","description":"queue overflowed"}
            ]}"#,
        )
        .expect("watchEvents should parse");

        let WorkerMessage::WatchEvents { watch_id, events } = message else {
            panic!("expected a watchEvents frame");
        };
        assert_eq!(watch_id, 1);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].path(), Path::new("/w/foo"));
        assert_eq!(
            events[1],
            WatchEvent::Renamed {
                path: PathBuf::from("/w/new"),
                old_path: PathBuf::from("/w/old"),
            }
        );
    }

    #[test]
    fn watcher_error_parses_without_request_id() {
        let message: WorkerMessage =
            serde_json::from_str(r#"{"type":"watcherError","description":"backend failed"}"#)
                .expect("watcherError should parse");
        assert_eq!(
            message,
            WorkerMessage::WatcherError {
                description: "backend failed".to_string(),
            }
        );
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let result = serde_json::from_str::<WorkerMessage>(r#"{"type":"telemetry","data":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn request_id_accessor_covers_all_variants() {
        assert_eq!(
            Request::Watch {
                request_id: 9,
                watch_id: 1,
                root: PathBuf::new(),
            }
            .request_id(),
            9
        );
        assert_eq!(
            Request::Unwatch {
                request_id: 10,
                watch_id: 1,
            }
            .request_id(),
            10
        );
        assert_eq!(Request::UnwatchAll { request_id: 11 }.request_id(), 11);
    }
}
