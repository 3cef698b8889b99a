#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! Wire protocol shared by the watcher supervisor and its worker process
//!
//! Frames are single lines of JSON separated by `\n`. Requests flow to the
//! worker on its stdin; responses, event batches, and out-of-band errors flow
//! back on its stdout. Before the first frame, the worker announces readiness
//! with the bare marker line [`READY_MARKER`].

mod error;
mod framing;
mod messages;

pub use error::ProtocolError;
pub use framing::{decode_request, decode_worker_message, encode, FrameReader, FrameWriter};
pub use messages::{Request, RequestId, WatchEvent, WatchId, WorkerMessage, READY_MARKER};
