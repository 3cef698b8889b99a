//! Error types for supervisor operations

use thiserror::Error;

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for supervisor operations.
///
/// Errors are `Clone` because a single worker failure has to be reported to
/// every caller that was waiting on the worker at the time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The worker process could not be launched or failed before readiness
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// The worker answered a request with an error response
    #[error("Request rejected by worker: {0}")]
    Rejected(String),

    /// The worker exited while it was still supposed to be running
    #[error("Worker crashed: {0}")]
    Crash(String),

    /// The supervisor was killed before the operation could complete
    #[error("Watcher killed")]
    Killed,

    /// The worker broke the wire protocol
    #[error("Protocol violation: {0}")]
    Protocol(String),
}

impl Error {
    /// Creates a spawn error
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Creates a rejection error
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Creates a crash error
    pub fn crash(msg: impl Into<String>) -> Self {
        Self::Crash(msg.into())
    }

    /// Creates a protocol violation error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

/// Failures that are not tied to any one call, delivered through the
/// supervisor's fault channel.
///
/// A caller that wants to crash loudly on worker trouble takes the channel
/// once and treats anything received on it as fatal. A caller that does not
/// care simply never takes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The worker reported an error not tied to any request
    Worker { description: String },
    /// The worker exited without being killed
    Crash { details: String },
    /// The worker broke the wire protocol and was shut down
    Protocol { message: String },
}
